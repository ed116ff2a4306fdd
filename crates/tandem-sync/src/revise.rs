//! The revision engine: accepting client edits into the log.
//!
//! No lock is taken here. The store's conditional insert admits exactly one
//! writer per version; losers either rebase (legacy patches) or re-apply on
//! the new head (merge updates, which commute).

use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::Serialize;
use tandem_core::{
  hash::state_hash,
  patch::Operation,
  revision::{NewRevision, Revision, RevisionFormat},
  store::PostStore,
  validation::SyncStatus,
};

use crate::{
  Error, Result, SharedEdits, commit::Commit, kv::KeyValue,
  service::SYSTEM_USER_ID, transport::ChannelMessage,
};

// ─── Types ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum EditPayload {
  /// A positional patch against the client's believed head `version`.
  Patch { operation: Operation, version: i64 },
  /// A base64 merge-engine update.
  Merge {
    update:            String,
    state_vector:      Option<String>,
    allow_blank_state: bool,
    /// Client copy of the text, used if the server state turns out corrupt.
    recovery_text:     Option<String>,
  },
}

#[derive(Debug, Clone)]
pub struct EditRequest {
  pub post_id:   i64,
  pub user_id:   i64,
  pub client_id: String,
  pub payload:   EditPayload,
  pub cursor:    Option<serde_json::Value>,
  pub awareness: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AcceptedEdit {
  pub version:        i64,
  /// The update as stored: rebased op list JSON, or the base64 merge update.
  pub update:         String,
  pub state_hash:     Option<String>,
  /// Base64 update the client needs to catch up, if it was behind.
  pub missing_update: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LatestState {
  pub format:     RevisionFormat,
  pub raw:        String,
  pub version:    i64,
  /// Base64 merge state, for merge-format documents.
  pub state:      Option<String>,
  pub state_hash: String,
}

// ─── Engine ──────────────────────────────────────────────────────────────────

impl<S: PostStore + 'static, K: KeyValue + 'static> SharedEdits<S, K> {
  /// Append a client edit to the log, publish it to the document channel,
  /// and schedule compaction.
  pub async fn submit_edit(&self, request: EditRequest) -> Result<AcceptedEdit> {
    self.validator.validate_client_id(&request.client_id)?;
    if let Some(awareness) = request.awareness.as_deref() {
      self.validator.validate_awareness(Some(awareness))?;
    }

    let (accepted, sync) = match &request.payload {
      EditPayload::Patch { operation, version } => {
        let accepted = self
          .submit_patch(&request, operation.clone(), *version)
          .await?;
        (accepted, None)
      }
      EditPayload::Merge {
        update,
        state_vector,
        allow_blank_state,
        recovery_text,
      } => {
        self
          .submit_merge(
            &request,
            update,
            state_vector.as_deref(),
            *allow_blank_state,
            recovery_text.as_deref(),
          )
          .await?
      }
    };

    let post_id = request.post_id;
    tracing::debug!(
      post_id,
      version = accepted.version,
      user_id = request.user_id,
      "accepted edit"
    );
    self.broadcast(post_id, ChannelMessage::Edit {
      version:   accepted.version,
      update:    accepted.update.clone(),
      client_id: request.client_id,
      user_id:   request.user_id,
      cursor:    request.cursor,
      awareness: request.awareness,
    });
    self.schedule_commit(post_id).await;

    match sync {
      Some(SyncStatus::Diverged) => {
        tracing::warn!(post_id, version = accepted.version, "client state diverged");
        Err(Error::StateDiverged { post_id, version: accepted.version })
      }
      Some(SyncStatus::Behind { missing_update }) => Ok(AcceptedEdit {
        missing_update: Some(STANDARD.encode(missing_update)),
        ..accepted
      }),
      Some(SyncStatus::InSync) | None => Ok(accepted),
    }
  }

  async fn submit_patch(
    &self,
    request: &EditRequest,
    mut operation: Operation,
    mut version: i64,
  ) -> Result<AcceptedEdit> {
    let post_id = request.post_id;
    let head = self.head(post_id).await?;
    if head.format != RevisionFormat::Patch {
      return Err(Error::FormatMismatch(post_id));
    }
    let unknown = || Error::UnknownVersion {
      post_id,
      claimed: version,
      latest: head.version,
    };
    if version > head.version {
      return Err(unknown());
    }
    let base = self
      .store
      .revision(post_id, version)
      .await
      .map_err(Error::store)?
      .ok_or_else(unknown)?;
    if let Some(len) = base.patch_target_len()? {
      if operation.base_len() != len {
        return Err(
          tandem_core::Error::Patch(tandem_core::patch::PatchError::LengthMismatch {
            expected: len,
            actual:   operation.base_len(),
          })
          .into(),
        );
      }
    }

    for _ in 0..=self.settings.max_rebase_attempts {
      let revision = operation.to_json();
      let inserted = self
        .store
        .insert_revision(NewRevision {
          post_id,
          version: version + 1,
          format: RevisionFormat::Patch,
          client_id: request.client_id.clone(),
          user_id: request.user_id,
          revision: revision.clone(),
          raw: None,
          state_hash: None,
        })
        .await
        .map_err(Error::store)?;
      if let Some(row) = inserted {
        return Ok(AcceptedEdit {
          version:        row.version,
          update:         revision,
          state_hash:     None,
          missing_update: None,
        });
      }

      let newer = self
        .store
        .revisions_after(post_id, version)
        .await
        .map_err(Error::store)?;
      operation = rebase(post_id, operation, &newer)?;
      version = newer.last().map_or(version, |r| r.version);
      tracing::debug!(post_id, version, "rebased edit onto newer revisions");
    }

    Err(Error::RevisionConflict {
      post_id,
      attempts: self.settings.max_rebase_attempts,
    })
  }

  async fn submit_merge(
    &self,
    request: &EditRequest,
    update: &str,
    state_vector: Option<&str>,
    allow_blank_state: bool,
    recovery_text: Option<&str>,
  ) -> Result<(AcceptedEdit, Option<SyncStatus>)> {
    let post_id = request.post_id;
    let update_bytes = self.validator.validate_update(Some(update))?;
    let state_vector = state_vector
      .map(|sv| self.validator.validate_state_vector(Some(sv)))
      .transpose()?;

    for _ in 0..=self.settings.max_rebase_attempts {
      let head = self.head(post_id).await?;
      if head.format != RevisionFormat::Merge {
        return Err(Error::FormatMismatch(post_id));
      }

      let Some(current) = head.raw().and_then(|raw| STANDARD.decode(raw).ok())
      else {
        return Err(
          self
            .recover_corrupt_state(post_id, request.user_id, recovery_text)
            .await,
        );
      };
      let applied = match self.validator.safe_apply_update(
        post_id,
        head.version,
        &current,
        &update_bytes,
        allow_blank_state,
      ) {
        Ok(applied) => applied,
        Err(tandem_core::Error::StateCorruption { .. }) => {
          return Err(
            self
              .recover_corrupt_state(post_id, request.user_id, recovery_text)
              .await,
          );
        }
        Err(e) => return Err(e.into()),
      };

      let hash = state_hash(&applied.text);
      let inserted = self
        .store
        .insert_revision(NewRevision {
          post_id,
          version: head.version + 1,
          format: RevisionFormat::Merge,
          client_id: request.client_id.clone(),
          user_id: request.user_id,
          revision: update.to_owned(),
          raw: Some(STANDARD.encode(&applied.state)),
          state_hash: Some(hash.clone()),
        })
        .await
        .map_err(Error::store)?;
      let Some(row) = inserted else {
        tracing::debug!(post_id, version = head.version, "lost insert race, reapplying");
        continue;
      };

      let sync = state_vector
        .as_deref()
        .map(|sv| self.validator.validate_client_state_vector(&applied.state, sv))
        .transpose()?;
      let accepted = AcceptedEdit {
        version:        row.version,
        update:         update.to_owned(),
        state_hash:     Some(hash),
        missing_update: None,
      };
      return Ok((accepted, sync));
    }

    Err(Error::RevisionConflict {
      post_id,
      attempts: self.settings.max_rebase_attempts,
    })
  }

  /// The resolved head of the document, materialised without touching the
  /// post. A corrupt merge head is recovered from the post when no edits
  /// would be lost.
  pub async fn latest(&self, post_id: i64) -> Result<LatestState> {
    let commit = match self.resolve(post_id).await {
      Err(Error::Core(tandem_core::Error::StateCorruption { .. })) => {
        match self.recover_corrupt_state(post_id, SYSTEM_USER_ID, None).await {
          Error::StateRecovered { .. } => self.resolve(post_id).await?,
          e => return Err(e),
        }
      }
      other => other?,
    };
    let commit = commit.ok_or(Error::NotInitialized(post_id))?;
    self.latest_state(commit).await
  }

  async fn latest_state(&self, commit: Commit) -> Result<LatestState> {
    let row = self
      .store
      .revision(commit.post_id, commit.version)
      .await
      .map_err(Error::store)?
      .ok_or(Error::NotInitialized(commit.post_id))?;
    let state = match row.format {
      RevisionFormat::Merge => row.raw().map(str::to_owned),
      RevisionFormat::Patch => None,
    };
    Ok(LatestState {
      format: row.format,
      state_hash: state_hash(&commit.raw),
      raw: commit.raw,
      version: commit.version,
      state,
    })
  }
}

/// Transform `operation` past every newer legacy edit, oldest first.
fn rebase(post_id: i64, mut operation: Operation, newer: &[Revision]) -> Result<Operation> {
  for row in newer {
    match row.patch()? {
      Some(theirs) => {
        operation = operation
          .transform(&theirs)
          .map_err(tandem_core::Error::from)?
          .0;
      }
      // A baseline replaced the history the edit was written against.
      None => {
        return Err(Error::RevisionConflict { post_id, attempts: 0 });
      }
    }
  }
  Ok(operation)
}
