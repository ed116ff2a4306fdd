//! Encoding and decoding helpers between domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! All timestamps are stored as RFC 3339 strings. Revision formats use their
//! lowercase string form.

use chrono::{DateTime, Utc};
use tandem_core::{
  post::{Post, PostRevision},
  revision::{Revision, RevisionFormat, RevisionState},
};

use crate::{Error, Result};

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

// ─── RevisionFormat ──────────────────────────────────────────────────────────

pub fn encode_format(f: RevisionFormat) -> &'static str { f.into() }

pub fn decode_format(s: &str) -> Result<RevisionFormat> {
  s.parse().map_err(|_| Error::UnknownFormat(s.to_owned()))
}

// ─── Row types ───────────────────────────────────────────────────────────────

pub const REVISION_COLUMNS: &str = "id, post_id, version, format, client_id, \
  user_id, revision, raw, state_hash, post_revision_id, created_at, updated_at";

/// Raw values read directly from a `shared_edit_revisions` row.
pub struct RawRevision {
  pub id:               i64,
  pub post_id:          i64,
  pub version:          i64,
  pub format:           String,
  pub client_id:        String,
  pub user_id:          i64,
  pub revision:         String,
  pub raw:              Option<String>,
  pub state_hash:       Option<String>,
  pub post_revision_id: Option<i64>,
  pub created_at:       String,
  pub updated_at:       String,
}

impl RawRevision {
  /// Column order matches [`REVISION_COLUMNS`].
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:               row.get(0)?,
      post_id:          row.get(1)?,
      version:          row.get(2)?,
      format:           row.get(3)?,
      client_id:        row.get(4)?,
      user_id:          row.get(5)?,
      revision:         row.get(6)?,
      raw:              row.get(7)?,
      state_hash:       row.get(8)?,
      post_revision_id: row.get(9)?,
      created_at:       row.get(10)?,
      updated_at:       row.get(11)?,
    })
  }

  pub fn into_revision(self) -> Result<Revision> {
    Ok(Revision {
      id:               self.id,
      post_id:          self.post_id,
      version:          self.version,
      format:           decode_format(&self.format)?,
      client_id:        self.client_id,
      user_id:          self.user_id,
      revision:         self.revision,
      state:            self
        .raw
        .map_or(RevisionState::Unresolved, RevisionState::Resolved),
      state_hash:       self.state_hash,
      post_revision_id: self.post_revision_id,
      created_at:       decode_dt(&self.created_at)?,
      updated_at:       decode_dt(&self.updated_at)?,
    })
  }
}

pub const POST_COLUMNS: &str = "post_id, user_id, raw, edit_reason, \
  shared_edits_enabled, bumped_at, updated_at";

pub struct RawPost {
  pub post_id:              i64,
  pub user_id:              i64,
  pub raw:                  String,
  pub edit_reason:          Option<String>,
  pub shared_edits_enabled: bool,
  pub bumped_at:            String,
  pub updated_at:           String,
}

impl RawPost {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      post_id:              row.get(0)?,
      user_id:              row.get(1)?,
      raw:                  row.get(2)?,
      edit_reason:          row.get(3)?,
      shared_edits_enabled: row.get(4)?,
      bumped_at:            row.get(5)?,
      updated_at:           row.get(6)?,
    })
  }

  pub fn into_post(self) -> Result<Post> {
    Ok(Post {
      post_id:              self.post_id,
      user_id:              self.user_id,
      raw:                  self.raw,
      edit_reason:          self.edit_reason,
      shared_edits_enabled: self.shared_edits_enabled,
      bumped_at:            decode_dt(&self.bumped_at)?,
      updated_at:           decode_dt(&self.updated_at)?,
    })
  }
}

pub const POST_REVISION_COLUMNS: &str =
  "post_revision_id, post_id, number, user_id, raw, edit_reason, created_at";

pub struct RawPostRevision {
  pub post_revision_id: i64,
  pub post_id:          i64,
  pub number:           i64,
  pub user_id:          i64,
  pub raw:              String,
  pub edit_reason:      Option<String>,
  pub created_at:       String,
}

impl RawPostRevision {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      post_revision_id: row.get(0)?,
      post_id:          row.get(1)?,
      number:           row.get(2)?,
      user_id:          row.get(3)?,
      raw:              row.get(4)?,
      edit_reason:      row.get(5)?,
      created_at:       row.get(6)?,
    })
  }

  pub fn into_post_revision(self) -> Result<PostRevision> {
    Ok(PostRevision {
      post_revision_id: self.post_revision_id,
      post_id:          self.post_id,
      number:           self.number,
      user_id:          self.user_id,
      raw:              self.raw,
      edit_reason:      self.edit_reason,
      created_at:       decode_dt(&self.created_at)?,
    })
  }
}
