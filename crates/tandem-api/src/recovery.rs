//! Handlers for corruption recovery and diagnostics.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `PUT`  | `/shared_edits/p/{post_id}/recover` | Body: [`RecoverBody`] |
//! | `GET`  | `/shared_edits/p/{post_id}/health` | Staff only |

use axum::{
  Json,
  extract::{Path, State, rejection::JsonRejection},
};
use serde::Deserialize;
use tandem_core::store::PostStore;
use tandem_sync::{HealthReport, Recovery, SharedEdits, kv::KeyValue};

use crate::{
  editor::Editor,
  error::{ApiError, ErrorCode},
};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RecoverBody {
  /// Rebuild from this text instead of the post.
  pub text:  Option<String>,
  /// Rebuild from the post even when the document looks healthy, purging
  /// the log. Staff only.
  pub force: bool,
}

/// `PUT /shared_edits/p/{post_id}/recover`
pub async fn recover<S, K>(
  State(edits): State<SharedEdits<S, K>>,
  editor: Editor,
  Path(post_id): Path<i64>,
  body: Result<Json<RecoverBody>, JsonRejection>,
) -> Result<Json<Recovery>, ApiError>
where
  S: PostStore + 'static,
  K: KeyValue + 'static,
{
  let Json(body) = body?;
  if body.force {
    editor.require_staff()?;
  }

  let recovery = match body.text {
    Some(text) => edits.recover_from_text(post_id, editor.user_id, &text).await,
    None => edits.recover_from_post_raw(post_id, body.force).await,
  }
  .map_err(ApiError::failed(ErrorCode::RecoveryFailed))?;
  Ok(Json(recovery))
}

/// `GET /shared_edits/p/{post_id}/health`
pub async fn health<S, K>(
  State(edits): State<SharedEdits<S, K>>,
  editor: Editor,
  Path(post_id): Path<i64>,
) -> Result<Json<HealthReport>, ApiError>
where
  S: PostStore + 'static,
  K: KeyValue + 'static,
{
  editor.require_staff()?;
  Ok(Json(edits.health_check(post_id).await?))
}
