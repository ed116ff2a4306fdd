//! Error type for `tandem-store-sqlite`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] tandem_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  #[error("unknown revision format: {0:?}")]
  UnknownFormat(String),

  #[error("post not found: {0}")]
  PostNotFound(i64),

  #[error("revision {version} of post {post_id} not found")]
  RevisionNotFound { post_id: i64, version: i64 },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
