//! Error type for `tandem-sync`.
//!
//! Several variants are protocol events rather than faults: the recovery
//! outcomes and `StateDiverged` tell the client how to proceed.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error(transparent)]
  Core(#[from] tandem_core::Error),

  #[error("store error: {0}")]
  Store(Box<dyn std::error::Error + Send + Sync>),

  #[error("post not found: {0}")]
  PostNotFound(i64),

  #[error("shared edits are not initialized for post {0}")]
  NotInitialized(i64),

  #[error("post {post_id} is at version {latest}, edit claims version {claimed}")]
  UnknownVersion { post_id: i64, claimed: i64, latest: i64 },

  #[error("edit format does not match the document format of post {0}")]
  FormatMismatch(i64),

  #[error("post {post_id}: gave up after {attempts} rebase attempts")]
  RevisionConflict { post_id: i64, attempts: usize },

  #[error("client state for post {post_id} has diverged (edit accepted as version {version})")]
  StateDiverged { post_id: i64, version: i64 },

  #[error("state of post {0} is corrupt and needs client text to recover")]
  NeedsRecoveryText(i64),

  #[error("state of post {post_id} was recovered from the post (version {version})")]
  StateRecovered { post_id: i64, version: i64 },

  #[error("state of post {post_id} was recovered from client text (version {version})")]
  StateRecoveredFromClient { post_id: i64, version: i64 },

  #[error("state of post {0} is healthy; recovery not needed")]
  RecoveryNotNeeded(i64),

  #[error("recovery of post {post_id} failed: {reason}")]
  RecoveryFailed { post_id: i64, reason: String },

  #[error("recovery of post {post_id} is rate limited for {retry_after:?}")]
  RateLimited { post_id: i64, retry_after: Duration },
}

impl From<tandem_core::validation::ValidationError> for Error {
  fn from(e: tandem_core::validation::ValidationError) -> Self {
    Self::Core(e.into())
  }
}

impl Error {
  pub fn store<E>(e: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Self::Store(Box::new(e))
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
