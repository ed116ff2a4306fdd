//! Handlers for reading and editing a shared document.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/shared_edits/p/{post_id}` | Resolved text, version, merge state |
//! | `PUT`  | `/shared_edits/p/{post_id}` | Body: [`SubmitBody`]; returns [`AcceptedEdit`] |
//! | `PUT`  | `/shared_edits/p/{post_id}/commit` | Compact now and write through to the post |

use axum::{
  Json,
  extract::{Path, State, rejection::JsonRejection},
};
use serde::Deserialize;
use serde_json::Value;
use tandem_core::store::PostStore;
use tandem_sync::{
  AcceptedEdit, Commit, EditPayload, EditRequest, LatestState, SharedEdits,
  kv::KeyValue,
};

use crate::{
  editor::Editor,
  error::{ApiError, ErrorCode},
};

// ─── Latest ──────────────────────────────────────────────────────────────────

/// `GET /shared_edits/p/{post_id}`
pub async fn latest<S, K>(
  State(edits): State<SharedEdits<S, K>>,
  _editor: Editor,
  Path(post_id): Path<i64>,
) -> Result<Json<LatestState>, ApiError>
where
  S: PostStore + 'static,
  K: KeyValue + 'static,
{
  Ok(Json(edits.latest(post_id).await?))
}

// ─── Submit ──────────────────────────────────────────────────────────────────

/// JSON body accepted by `PUT /shared_edits/p/{post_id}`.
///
/// A JSON array `update` is a legacy op list and requires `version`; a string
/// `update` is a base64 merge delta.
#[derive(Debug, Deserialize)]
pub struct SubmitBody {
  pub client_id:         String,
  pub update:            Value,
  pub version:           Option<i64>,
  pub state_vector:      Option<String>,
  pub cursor:            Option<Value>,
  pub awareness:         Option<String>,
  #[serde(default)]
  pub allow_blank_state: bool,
  pub recovery_text:     Option<String>,
}

impl SubmitBody {
  fn into_request(self, post_id: i64, user_id: i64) -> Result<EditRequest, ApiError> {
    let payload = match self.update {
      Value::Array(ops) => {
        let version = self.version.ok_or_else(|| {
          ApiError::InvalidUpdate("an op list update needs a version".into())
        })?;
        let operation = serde_json::from_value(Value::Array(ops))
          .map_err(|e| ApiError::InvalidUpdate(e.to_string()))?;
        EditPayload::Patch { operation, version }
      }
      Value::String(update) => EditPayload::Merge {
        update,
        state_vector: self.state_vector,
        allow_blank_state: self.allow_blank_state,
        recovery_text: self.recovery_text,
      },
      _ => {
        return Err(ApiError::InvalidUpdate(
          "update must be an op list or a base64 string".into(),
        ));
      }
    };
    Ok(EditRequest {
      post_id,
      user_id,
      client_id: self.client_id,
      payload,
      cursor: self.cursor,
      awareness: self.awareness,
    })
  }
}

/// `PUT /shared_edits/p/{post_id}`
pub async fn submit<S, K>(
  State(edits): State<SharedEdits<S, K>>,
  editor: Editor,
  Path(post_id): Path<i64>,
  body: Result<Json<SubmitBody>, JsonRejection>,
) -> Result<Json<AcceptedEdit>, ApiError>
where
  S: PostStore + 'static,
  K: KeyValue + 'static,
{
  let Json(body) = body?;
  let request = body.into_request(post_id, editor.user_id)?;
  Ok(Json(edits.submit_edit(request).await?))
}

// ─── Commit ──────────────────────────────────────────────────────────────────

/// `PUT /shared_edits/p/{post_id}/commit`
pub async fn commit<S, K>(
  State(edits): State<SharedEdits<S, K>>,
  _editor: Editor,
  Path(post_id): Path<i64>,
) -> Result<Json<Commit>, ApiError>
where
  S: PostStore + 'static,
  K: KeyValue + 'static,
{
  let commit = edits
    .commit(post_id)
    .await
    .map_err(ApiError::failed(ErrorCode::CommitFailed))?
    .ok_or(tandem_sync::Error::NotInitialized(post_id))?;
  Ok(Json(commit))
}
