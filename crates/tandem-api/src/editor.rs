//! The authenticated editor behind a request.
//!
//! Authentication is the embedding server's job: it verifies credentials and
//! inserts an [`Editor`] into the request extensions. Handlers extract it and
//! reject the request with `unauthorized` when it is missing.

use axum::{extract::FromRequestParts, http::request::Parts};
use serde::{Deserialize, Serialize};
use tandem_sync::SyncSettings;

use crate::error::ApiError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Editor {
  pub user_id:     i64,
  pub username:    String,
  #[serde(default)]
  pub staff:       bool,
  #[serde(default)]
  pub trust_level: u8,
}

impl Editor {
  /// Staff, or trusted enough to turn shared editing on and off.
  pub fn require_toggle(&self, settings: &SyncSettings) -> Result<(), ApiError> {
    if self.staff || self.trust_level >= settings.min_trust_to_enable {
      Ok(())
    } else {
      Err(ApiError::Forbidden("not allowed to toggle shared edits"))
    }
  }

  pub fn require_staff(&self) -> Result<(), ApiError> {
    if self.staff {
      Ok(())
    } else {
      Err(ApiError::Forbidden("staff only"))
    }
  }
}

impl<S: Send + Sync> FromRequestParts<S> for Editor {
  type Rejection = ApiError;

  async fn from_request_parts(
    parts: &mut Parts,
    _state: &S,
  ) -> Result<Self, Self::Rejection> {
    parts
      .extensions
      .get::<Editor>()
      .cloned()
      .ok_or(ApiError::Unauthorized)
  }
}
