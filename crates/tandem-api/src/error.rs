//! API error type and [`axum::response::IntoResponse`] implementation.
//!
//! Every failure is reported as a machine-readable [`ErrorCode`] together
//! with the [`ClientAction`] the client should take. Clients switch on the
//! code, never on the message.

use std::time::Duration;

use axum::{
  Json,
  extract::rejection::JsonRejection,
  http::{HeaderValue, StatusCode, header},
  response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::json;
use strum::{Display, IntoStaticStr};
use thiserror::Error;

// ─── Codes ───────────────────────────────────────────────────────────────────

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Serialize, Display, IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorCode {
  InvalidUpdate,
  PostLengthExceeded,
  BlankStateRejected,
  StateDiverged,
  NeedsRecoveryText,
  NotInitialized,
  StateRecovered,
  StateRecoveredFromClient,
  RecoveryNotNeeded,
  RevisionConflict,
  RateLimited,
  CommitFailed,
  DisableFailed,
  ResetFailed,
  RecoveryFailed,
  Unauthorized,
  Forbidden,
  NotFound,
  InternalError,
}

/// What the client should do after receiving an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ClientAction {
  /// Discard local state and fetch the latest document.
  Resync,
  /// Repeat the edit with the client's copy of the text attached.
  ResendWithRecoveryText,
  /// Wait `retry_after` seconds before trying again.
  Backoff,
  None,
}

impl ErrorCode {
  pub fn status(self) -> StatusCode {
    use ErrorCode::*;
    match self {
      InvalidUpdate => StatusCode::BAD_REQUEST,
      Unauthorized => StatusCode::UNAUTHORIZED,
      Forbidden => StatusCode::FORBIDDEN,
      NotFound => StatusCode::NOT_FOUND,
      PostLengthExceeded => StatusCode::UNPROCESSABLE_ENTITY,
      RateLimited => StatusCode::TOO_MANY_REQUESTS,
      BlankStateRejected
      | StateDiverged
      | NeedsRecoveryText
      | NotInitialized
      | StateRecovered
      | StateRecoveredFromClient
      | RecoveryNotNeeded
      | RevisionConflict => StatusCode::CONFLICT,
      CommitFailed | DisableFailed | ResetFailed | RecoveryFailed
      | InternalError => StatusCode::INTERNAL_SERVER_ERROR,
    }
  }

  pub fn action(self) -> ClientAction {
    use ErrorCode::*;
    match self {
      StateDiverged
      | NotInitialized
      | StateRecovered
      | StateRecoveredFromClient
      | RevisionConflict => ClientAction::Resync,
      NeedsRecoveryText => ClientAction::ResendWithRecoveryText,
      RateLimited => ClientAction::Backoff,
      _ => ClientAction::None,
    }
  }

  /// The specific code for a service error. `None` means the error has no
  /// code of its own and the endpoint's failure code applies.
  pub fn for_sync_error(e: &tandem_sync::Error) -> Option<Self> {
    use tandem_core::Error as CoreError;
    use tandem_sync::Error as SyncError;

    Some(match e {
      SyncError::Core(
        CoreError::Validation(_) | CoreError::Patch(_) | CoreError::UnknownFormat(_),
      ) => Self::InvalidUpdate,
      SyncError::Core(CoreError::PostLengthExceeded { .. }) => Self::PostLengthExceeded,
      SyncError::Core(CoreError::BlankStateRejected(_)) => Self::BlankStateRejected,
      SyncError::UnknownVersion { .. } | SyncError::FormatMismatch(_) => Self::InvalidUpdate,
      SyncError::PostNotFound(_) => Self::NotFound,
      SyncError::NotInitialized(_) => Self::NotInitialized,
      SyncError::RevisionConflict { .. } => Self::RevisionConflict,
      SyncError::StateDiverged { .. } => Self::StateDiverged,
      SyncError::NeedsRecoveryText(_) => Self::NeedsRecoveryText,
      SyncError::StateRecovered { .. } => Self::StateRecovered,
      SyncError::StateRecoveredFromClient { .. } => Self::StateRecoveredFromClient,
      SyncError::RecoveryNotNeeded(_) => Self::RecoveryNotNeeded,
      SyncError::RecoveryFailed { .. } => Self::RecoveryFailed,
      SyncError::RateLimited { .. } => Self::RateLimited,
      _ => return None,
    })
  }
}

// ─── Error ───────────────────────────────────────────────────────────────────

/// An error returned by an API handler.
#[derive(Debug, Error)]
pub enum ApiError {
  #[error("authentication required")]
  Unauthorized,

  #[error("{0}")]
  Forbidden(&'static str),

  #[error("{0}")]
  InvalidUpdate(String),

  #[error(transparent)]
  Sync(#[from] tandem_sync::Error),

  /// An operation failed; `code` applies unless the cause carries a more
  /// specific one.
  #[error("{source}")]
  Failed {
    code:   ErrorCode,
    #[source]
    source: tandem_sync::Error,
  },
}

impl ApiError {
  /// Adapter for `map_err` attaching an endpoint's failure code.
  pub fn failed(code: ErrorCode) -> impl FnOnce(tandem_sync::Error) -> Self {
    move |source| Self::Failed { code, source }
  }

  pub fn code(&self) -> ErrorCode {
    match self {
      Self::Unauthorized => ErrorCode::Unauthorized,
      Self::Forbidden(_) => ErrorCode::Forbidden,
      Self::InvalidUpdate(_) => ErrorCode::InvalidUpdate,
      Self::Sync(e) => ErrorCode::for_sync_error(e).unwrap_or(ErrorCode::InternalError),
      Self::Failed { code, source } => ErrorCode::for_sync_error(source).unwrap_or(*code),
    }
  }

  fn retry_after(&self) -> Option<Duration> {
    match self {
      Self::Sync(tandem_sync::Error::RateLimited { retry_after, .. })
      | Self::Failed {
        source: tandem_sync::Error::RateLimited { retry_after, .. },
        ..
      } => Some(*retry_after),
      _ => None,
    }
  }
}

impl From<JsonRejection> for ApiError {
  fn from(rejection: JsonRejection) -> Self {
    Self::InvalidUpdate(rejection.body_text())
  }
}

/// Whole seconds, rounded up and at least one.
fn retry_after_secs(d: Duration) -> u64 {
  (d.as_secs() + u64::from(d.subsec_nanos() > 0)).max(1)
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let code = self.code();
    let status = code.status();
    if status.is_server_error() {
      tracing::error!(code = %code, error = %self, "request failed");
    }

    let retry_after = self.retry_after().map(retry_after_secs);
    let mut body = json!({
      "error":   code,
      "message": self.to_string(),
      "action":  code.action(),
    });
    if let Some(secs) = retry_after {
      body["retry_after"] = json!(secs);
    }

    let mut res = (status, Json(body)).into_response();
    if let Some(secs) = retry_after {
      res.headers_mut().insert(header::RETRY_AFTER, HeaderValue::from(secs));
    }
    if matches!(self, Self::Unauthorized) {
      res.headers_mut().insert(
        header::WWW_AUTHENTICATE,
        HeaderValue::from_static("Basic realm=\"tandem\""),
      );
    }
    res
  }
}
