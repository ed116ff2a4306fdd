//! The SQLite implementation of [`RevisionStore`] and [`PostStore`].

use std::path::Path;

use chrono::Utc;
use rusqlite::{ErrorCode, OptionalExtension as _, Transaction};
use tandem_core::{
  post::{Post, PostRevision, Publication},
  revision::{NewRevision, Revision},
  store::{PostStore, RevisionStore},
};

use crate::{
  Error, Result,
  encode::{
    POST_COLUMNS, POST_REVISION_COLUMNS, REVISION_COLUMNS, RawPost,
    RawPostRevision, RawRevision, encode_dt, encode_format,
  },
  schema::SCHEMA,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A tandem store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store, useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Insert or rename a user.
  pub async fn upsert_user(&self, user_id: i64, username: String) -> Result<()> {
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO users (user_id, username) VALUES (?1, ?2)
           ON CONFLICT (user_id) DO UPDATE SET username = excluded.username",
          rusqlite::params![user_id, username],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Create a post together with its first post revision.
  pub async fn create_post(&self, user_id: i64, raw: String) -> Result<Post> {
    let now = encode_dt(Utc::now());

    let raw_post = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        tx.execute(
          "INSERT INTO posts (user_id, raw, bumped_at, updated_at)
           VALUES (?1, ?2, ?3, ?3)",
          rusqlite::params![user_id, raw, now],
        )?;
        let post_id = tx.last_insert_rowid();
        tx.execute(
          "INSERT INTO post_revisions (post_id, number, user_id, raw, created_at)
           VALUES (?1, 1, ?2, ?3, ?4)",
          rusqlite::params![post_id, user_id, raw, now],
        )?;
        let post = tx.query_row(
          &format!("SELECT {POST_COLUMNS} FROM posts WHERE post_id = ?1"),
          rusqlite::params![post_id],
          RawPost::from_row,
        )?;
        tx.commit()?;
        Ok(post)
      })
      .await?;

    raw_post.into_post()
  }

  /// Fetch one revision row with a caller-supplied filter.
  async fn query_revision(
    &self,
    filter: &'static str,
    params: Vec<i64>,
  ) -> Result<Option<Revision>> {
    let raw = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!(
                "SELECT {REVISION_COLUMNS} FROM shared_edit_revisions WHERE \
                 {filter}"
              ),
              rusqlite::params_from_iter(params),
              RawRevision::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawRevision::into_revision).transpose()
  }

  async fn query_revisions(
    &self,
    filter: &'static str,
    params: Vec<i64>,
  ) -> Result<Vec<Revision>> {
    let raws = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {REVISION_COLUMNS} FROM shared_edit_revisions WHERE {filter} \
           ORDER BY version ASC"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params_from_iter(params), RawRevision::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawRevision::into_revision).collect()
  }
}

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
  matches!(
    e,
    rusqlite::Error::SqliteFailure(f, _) if f.code == ErrorCode::ConstraintViolation
  )
}

fn insert_revision_row(
  tx: &Transaction<'_>,
  input: &NewRevision,
  now: &str,
) -> rusqlite::Result<usize> {
  tx.execute(
    "INSERT INTO shared_edit_revisions (
       post_id, version, format, client_id, user_id, revision, raw,
       state_hash, created_at, updated_at
     )
     SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9
     WHERE NOT EXISTS (
       SELECT 1 FROM shared_edit_revisions WHERE post_id = ?1 AND version >= ?2
     )",
    rusqlite::params![
      input.post_id,
      input.version,
      encode_format(input.format),
      input.client_id,
      input.user_id,
      input.revision,
      input.raw,
      input.state_hash,
      now,
    ],
  )
}

fn select_revision_by_id(
  tx: &Transaction<'_>,
  id: i64,
) -> rusqlite::Result<RawRevision> {
  tx.query_row(
    &format!("SELECT {REVISION_COLUMNS} FROM shared_edit_revisions WHERE id = ?1"),
    rusqlite::params![id],
    RawRevision::from_row,
  )
}

// ─── RevisionStore impl ──────────────────────────────────────────────────────

impl RevisionStore for SqliteStore {
  type Error = Error;

  async fn insert_revision(&self, input: NewRevision) -> Result<Option<Revision>> {
    let now = encode_dt(Utc::now());
    let (post_id, version) = (input.post_id, input.version);

    let raw = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let inserted = match insert_revision_row(&tx, &input, &now) {
          Ok(n) => n,
          Err(e) if is_constraint_violation(&e) => 0,
          Err(e) => return Err(e.into()),
        };
        if inserted == 0 {
          return Ok(None);
        }
        let row = select_revision_by_id(&tx, tx.last_insert_rowid())?;
        tx.commit()?;
        Ok(Some(row))
      })
      .await?;

    if raw.is_none() {
      tracing::debug!(post_id, version, "conditional revision insert lost");
    }
    raw.map(RawRevision::into_revision).transpose()
  }

  async fn revision(&self, post_id: i64, version: i64) -> Result<Option<Revision>> {
    self
      .query_revision("post_id = ?1 AND version = ?2", vec![post_id, version])
      .await
  }

  async fn latest_revision(&self, post_id: i64) -> Result<Option<Revision>> {
    self
      .query_revision(
        "post_id = ?1 ORDER BY version DESC LIMIT 1",
        vec![post_id],
      )
      .await
  }

  async fn latest_resolved(&self, post_id: i64) -> Result<Option<Revision>> {
    self
      .query_revision(
        "post_id = ?1 AND raw IS NOT NULL ORDER BY version DESC LIMIT 1",
        vec![post_id],
      )
      .await
  }

  async fn revisions_after(&self, post_id: i64, after: i64) -> Result<Vec<Revision>> {
    self
      .query_revisions("post_id = ?1 AND version > ?2", vec![post_id, after])
      .await
  }

  async fn revisions(&self, post_id: i64) -> Result<Vec<Revision>> {
    self
      .query_revisions("post_id = ?1", vec![post_id])
      .await
  }

  async fn last_compacted(&self, post_id: i64) -> Result<Option<Revision>> {
    self
      .query_revision(
        "post_id = ?1 AND post_revision_id IS NOT NULL \
         ORDER BY version DESC LIMIT 1",
        vec![post_id],
      )
      .await
  }

  async fn resolve_revision(
    &self,
    post_id: i64,
    version: i64,
    raw: String,
    state_hash: Option<String>,
  ) -> Result<Revision> {
    let now = encode_dt(Utc::now());

    let row = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let updated = tx.execute(
          "UPDATE shared_edit_revisions
           SET raw = ?3, state_hash = COALESCE(?4, state_hash), updated_at = ?5
           WHERE post_id = ?1 AND version = ?2",
          rusqlite::params![post_id, version, raw, state_hash, now],
        )?;
        if updated == 0 {
          return Ok(None);
        }
        let row = tx
          .query_row(
            &format!(
              "SELECT {REVISION_COLUMNS} FROM shared_edit_revisions
               WHERE post_id = ?1 AND version = ?2"
            ),
            rusqlite::params![post_id, version],
            RawRevision::from_row,
          )?;
        tx.commit()?;
        Ok(Some(row))
      })
      .await?;

    row
      .ok_or(Error::RevisionNotFound { post_id, version })?
      .into_revision()
  }

  async fn replace_with_baseline(
    &self,
    baseline: NewRevision,
    expected_head: i64,
  ) -> Result<Option<Revision>> {
    let now = encode_dt(Utc::now());
    let (post_id, version) = (baseline.post_id, baseline.version);

    let row = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let head: i64 = tx.query_row(
          "SELECT COALESCE(MAX(version), 0) FROM shared_edit_revisions
           WHERE post_id = ?1",
          rusqlite::params![baseline.post_id],
          |row| row.get(0),
        )?;
        if head != expected_head {
          return Ok(None);
        }
        tx.execute(
          "DELETE FROM shared_edit_revisions WHERE post_id = ?1",
          rusqlite::params![baseline.post_id],
        )?;
        insert_revision_row(&tx, &baseline, &now)?;
        let row = select_revision_by_id(&tx, tx.last_insert_rowid())?;
        tx.commit()?;
        Ok(Some(row))
      })
      .await?;

    let Some(row) = row else {
      tracing::debug!(post_id, expected_head, "revision log moved, baseline not installed");
      return Ok(None);
    };
    tracing::info!(post_id, version, "revision log replaced with baseline");
    row.into_revision().map(Some)
  }

  async fn delete_revisions(&self, post_id: i64) -> Result<u64> {
    let deleted = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "DELETE FROM shared_edit_revisions WHERE post_id = ?1",
          rusqlite::params![post_id],
        )?)
      })
      .await?;
    Ok(deleted as u64)
  }
}

// ─── PostStore impl ──────────────────────────────────────────────────────────

/// Result of the publish transaction, resolved into errors outside the
/// connection thread.
enum PublishOutcome {
  PostMissing,
  RevisionMissing,
  Unchanged,
  Published(RawPostRevision),
}

impl PostStore for SqliteStore {
  async fn get_post(&self, post_id: i64) -> Result<Option<Post>> {
    let raw = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!("SELECT {POST_COLUMNS} FROM posts WHERE post_id = ?1"),
              rusqlite::params![post_id],
              RawPost::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawPost::into_post).transpose()
  }

  async fn set_shared_edits(&self, post_id: i64, enabled: bool) -> Result<bool> {
    let updated = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE posts SET shared_edits_enabled = ?2 WHERE post_id = ?1",
          rusqlite::params![post_id, enabled],
        )?)
      })
      .await?;
    Ok(updated > 0)
  }

  async fn usernames(&self, user_ids: Vec<i64>) -> Result<Vec<String>> {
    let names = self
      .conn
      .call(move |conn| {
        let mut stmt =
          conn.prepare("SELECT username FROM users WHERE user_id = ?1")?;
        let mut names = Vec::with_capacity(user_ids.len());
        for id in user_ids {
          if let Some(name) = stmt
            .query_row(rusqlite::params![id], |r| r.get::<_, String>(0))
            .optional()?
          {
            names.push(name);
          }
        }
        Ok(names)
      })
      .await?;
    Ok(names)
  }

  async fn publish(&self, publication: Publication) -> Result<Option<PostRevision>> {
    let now = encode_dt(Utc::now());
    let Publication {
      post_id,
      raw,
      edit_reason,
      user_id,
      options,
      compacted_version,
    } = publication;

    let outcome = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;

        let current: Option<String> = tx
          .query_row(
            "SELECT raw FROM posts WHERE post_id = ?1",
            rusqlite::params![post_id],
            |r| r.get(0),
          )
          .optional()?;
        let Some(current) = current else {
          return Ok(PublishOutcome::PostMissing);
        };

        let (stamp, outcome) = if current == raw {
          let latest: Option<i64> = tx.query_row(
            "SELECT MAX(post_revision_id) FROM post_revisions WHERE post_id = ?1",
            rusqlite::params![post_id],
            |r| r.get(0),
          )?;
          (latest, None)
        } else {
          let number: i64 = tx.query_row(
            "SELECT COALESCE(MAX(number), 0) + 1 FROM post_revisions WHERE post_id = ?1",
            rusqlite::params![post_id],
            |r| r.get(0),
          )?;
          tx.execute(
            "INSERT INTO post_revisions
               (post_id, number, user_id, raw, edit_reason, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![post_id, number, user_id, raw, edit_reason, now],
          )?;
          let post_revision_id = tx.last_insert_rowid();

          if options.bypass_bump {
            tx.execute(
              "UPDATE posts SET raw = ?2, edit_reason = ?3, updated_at = ?4
               WHERE post_id = ?1",
              rusqlite::params![post_id, raw, edit_reason, now],
            )?;
          } else {
            tx.execute(
              "UPDATE posts SET raw = ?2, edit_reason = ?3, updated_at = ?4,
                 bumped_at = ?4
               WHERE post_id = ?1",
              rusqlite::params![post_id, raw, edit_reason, now],
            )?;
          }

          let row = tx.query_row(
            &format!(
              "SELECT {POST_REVISION_COLUMNS} FROM post_revisions
               WHERE post_revision_id = ?1"
            ),
            rusqlite::params![post_revision_id],
            RawPostRevision::from_row,
          )?;
          (Some(post_revision_id), Some(row))
        };

        let stamped = tx.execute(
          "UPDATE shared_edit_revisions SET post_revision_id = ?3, updated_at = ?4
           WHERE post_id = ?1 AND version = ?2",
          rusqlite::params![post_id, compacted_version, stamp, now],
        )?;
        if stamped == 0 {
          // Dropping the transaction rolls back the post revision.
          return Ok(PublishOutcome::RevisionMissing);
        }

        tx.commit()?;
        Ok(match outcome {
          Some(row) => PublishOutcome::Published(row),
          None => PublishOutcome::Unchanged,
        })
      })
      .await?;

    match outcome {
      PublishOutcome::PostMissing => Err(Error::PostNotFound(post_id)),
      PublishOutcome::RevisionMissing => Err(Error::RevisionNotFound {
        post_id,
        version: compacted_version,
      }),
      PublishOutcome::Unchanged => Ok(None),
      PublishOutcome::Published(row) => {
        let revision = row.into_post_revision()?;
        tracing::info!(
          post_id,
          number = revision.number,
          skip_staff_log = options.skip_staff_log,
          "published resolved content"
        );
        Ok(Some(revision))
      }
    }
  }

  async fn post_revisions(&self, post_id: i64) -> Result<Vec<PostRevision>> {
    let raws = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {POST_REVISION_COLUMNS} FROM post_revisions
           WHERE post_id = ?1 ORDER BY number ASC"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![post_id], RawPostRevision::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawPostRevision::into_post_revision).collect()
  }
}
