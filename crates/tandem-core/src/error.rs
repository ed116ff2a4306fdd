//! Error types for `tandem-core`.

use thiserror::Error;

use crate::{merge::EngineError, patch::PatchError, validation::ValidationError};

#[derive(Debug, Error)]
pub enum Error {
  #[error("invalid payload: {0}")]
  Validation(#[from] ValidationError),

  /// A decoded state failed structural validation. Carries enough context to
  /// drive automated recovery.
  #[error("state corruption detected for post {post_id} at version {version}")]
  StateCorruption { post_id: i64, version: i64 },

  #[error("post length {length} exceeds the limit of {limit}")]
  PostLengthExceeded { limit: usize, length: usize },

  #[error("edit would blank the content of post {0}")]
  BlankStateRejected(i64),

  #[error("merge engine error: {0}")]
  Engine(#[from] EngineError),

  #[error("patch error: {0}")]
  Patch(#[from] PatchError),

  #[error("unknown revision format: {0:?}")]
  UnknownFormat(String),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
