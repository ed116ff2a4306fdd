//! SQL schema for the tandem SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS users (
    user_id  INTEGER PRIMARY KEY,
    username TEXT NOT NULL UNIQUE
);

-- The document of record.
CREATE TABLE IF NOT EXISTS posts (
    post_id              INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id              INTEGER NOT NULL,
    raw                  TEXT NOT NULL,
    edit_reason          TEXT,
    shared_edits_enabled INTEGER NOT NULL DEFAULT 0,
    bumped_at            TEXT NOT NULL,   -- RFC 3339 UTC
    updated_at           TEXT NOT NULL
);

-- Append-only history of the document of record.
CREATE TABLE IF NOT EXISTS post_revisions (
    post_revision_id INTEGER PRIMARY KEY AUTOINCREMENT,
    post_id          INTEGER NOT NULL REFERENCES posts(post_id),
    number           INTEGER NOT NULL,
    user_id          INTEGER NOT NULL,
    raw              TEXT NOT NULL,
    edit_reason      TEXT,
    created_at       TEXT NOT NULL,
    UNIQUE (post_id, number)
);

-- The shared-edit revision log. Rows are appended by edit acceptance and
-- only ever updated by compaction (raw, state_hash, post_revision_id).
CREATE TABLE IF NOT EXISTS shared_edit_revisions (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    post_id          INTEGER NOT NULL REFERENCES posts(post_id),
    version          INTEGER NOT NULL,
    format           TEXT NOT NULL,   -- 'patch' | 'merge'
    client_id        TEXT NOT NULL,
    user_id          INTEGER NOT NULL,
    revision         TEXT NOT NULL,
    raw              TEXT,            -- NULL until resolved
    state_hash       TEXT,            -- 64-char hex SHA-256
    post_revision_id INTEGER REFERENCES post_revisions(post_revision_id),
    created_at       TEXT NOT NULL,
    updated_at       TEXT NOT NULL,
    UNIQUE (post_id, version)
);

CREATE INDEX IF NOT EXISTS shared_edit_revisions_post_idx
    ON shared_edit_revisions(post_id);

PRAGMA user_version = 1;
";
