//! Handlers for switching shared editing on and off.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `PUT`  | `/shared_edits/p/{post_id}/enable` | `?format=merge\|patch`; staff or trusted |
//! | `PUT`  | `/shared_edits/p/{post_id}/disable` | Commits, then drops the revision log |
//! | `PUT`  | `/shared_edits/p/{post_id}/reset` | Staff only; rebuilds from the post |

use axum::{
  Json,
  extract::{Path, Query, State},
};
use serde::{Deserialize, Serialize};
use tandem_core::{revision::RevisionFormat, store::PostStore};
use tandem_sync::{Recovery, SharedEdits, kv::KeyValue};

use crate::{
  editor::Editor,
  error::{ApiError, ErrorCode},
};

#[derive(Debug, Deserialize)]
pub struct EnableParams {
  pub format: Option<RevisionFormat>,
}

#[derive(Debug, Serialize)]
pub struct Toggled {
  pub post_id: i64,
  pub enabled: bool,
  /// Head version after enabling.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub version: Option<i64>,
}

/// `PUT /shared_edits/p/{post_id}/enable`
pub async fn enable<S, K>(
  State(edits): State<SharedEdits<S, K>>,
  editor: Editor,
  Path(post_id): Path<i64>,
  Query(params): Query<EnableParams>,
) -> Result<Json<Toggled>, ApiError>
where
  S: PostStore + 'static,
  K: KeyValue + 'static,
{
  editor.require_toggle(edits.settings())?;
  let version = edits.enable(post_id, params.format).await?;
  tracing::info!(post_id, user_id = editor.user_id, "enabled shared edits");
  Ok(Json(Toggled { post_id, enabled: true, version: Some(version) }))
}

/// `PUT /shared_edits/p/{post_id}/disable`
pub async fn disable<S, K>(
  State(edits): State<SharedEdits<S, K>>,
  editor: Editor,
  Path(post_id): Path<i64>,
) -> Result<Json<Toggled>, ApiError>
where
  S: PostStore + 'static,
  K: KeyValue + 'static,
{
  editor.require_toggle(edits.settings())?;
  edits
    .disable(post_id)
    .await
    .map_err(ApiError::failed(ErrorCode::DisableFailed))?;
  tracing::info!(post_id, user_id = editor.user_id, "disabled shared edits");
  Ok(Json(Toggled { post_id, enabled: false, version: None }))
}

/// `PUT /shared_edits/p/{post_id}/reset`
pub async fn reset<S, K>(
  State(edits): State<SharedEdits<S, K>>,
  editor: Editor,
  Path(post_id): Path<i64>,
) -> Result<Json<Recovery>, ApiError>
where
  S: PostStore + 'static,
  K: KeyValue + 'static,
{
  editor.require_staff()?;
  let recovery = edits
    .reset(post_id)
    .await
    .map_err(ApiError::failed(ErrorCode::ResetFailed))?;
  Ok(Json(recovery))
}
