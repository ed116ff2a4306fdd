//! HTTP Basic-auth verification and the middleware that turns credentials
//! into an [`Editor`].

use std::sync::Arc;

use argon2::{Argon2, PasswordHash, PasswordVerifier};
use axum::{
  extract::{Request, State},
  http::HeaderMap,
  middleware::Next,
  response::Response,
};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use serde::Deserialize;
use tandem_api::{ApiError, Editor};

/// A user allowed to sign in, as listed under `[[users]]` in `config.toml`.
#[derive(Debug, Deserialize, Clone)]
pub struct UserConfig {
  pub user_id:       i64,
  pub username:      String,
  /// PHC string produced by argon2, e.g. `$argon2id$v=19$…`
  pub password_hash: String,
  #[serde(default)]
  pub staff:         bool,
  #[serde(default)]
  pub trust_level:   u8,
}

impl UserConfig {
  fn editor(&self) -> Editor {
    Editor {
      user_id:     self.user_id,
      username:    self.username.clone(),
      staff:       self.staff,
      trust_level: self.trust_level,
    }
  }
}

/// Credentials accepted as valid for this server instance.
#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
  pub users: Vec<UserConfig>,
}

/// Verify the `Authorization` header and return the editor it names.
pub fn verify_auth(headers: &HeaderMap, config: &AuthConfig) -> Result<Editor, ApiError> {
  let header_val = headers
    .get(axum::http::header::AUTHORIZATION)
    .and_then(|v| v.to_str().ok())
    .ok_or(ApiError::Unauthorized)?;

  let encoded = header_val
    .strip_prefix("Basic ")
    .ok_or(ApiError::Unauthorized)?;

  let decoded = B64.decode(encoded).map_err(|_| ApiError::Unauthorized)?;
  let creds   = std::str::from_utf8(&decoded).map_err(|_| ApiError::Unauthorized)?;

  let (username, password) = creds.split_once(':').ok_or(ApiError::Unauthorized)?;

  let user = config
    .users
    .iter()
    .find(|u| u.username == username)
    .ok_or(ApiError::Unauthorized)?;

  let parsed_hash = PasswordHash::new(&user.password_hash)
    .map_err(|_| ApiError::Unauthorized)?;

  Argon2::default()
    .verify_password(password.as_bytes(), &parsed_hash)
    .map_err(|_| ApiError::Unauthorized)?;

  Ok(user.editor())
}

/// Middleware: authenticate the request and attach the [`Editor`].
pub async fn require_editor(
  State(auth): State<Arc<AuthConfig>>,
  mut req: Request,
  next: Next,
) -> Result<Response, ApiError> {
  let editor = verify_auth(req.headers(), &auth)?;
  tracing::debug!(user_id = editor.user_id, "authenticated");
  req.extensions_mut().insert(editor);
  Ok(next.run(req).await)
}
