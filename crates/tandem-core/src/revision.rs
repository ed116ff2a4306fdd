//! Revision types: the rows of the append-only revision log.
//!
//! One revision exists per accepted edit (or system event such as a baseline
//! or recovery) against one post. Rows are never mutated by edit acceptance;
//! only compaction touches them, and only to materialise `raw` or to stamp
//! `post_revision_id`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Result, patch::Operation};

// ─── Format ──────────────────────────────────────────────────────────────────

/// Which code path produced a revision.
#[derive(
  Debug,
  Clone,
  Copy,
  Default,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
  strum::Display,
  strum::EnumString,
  strum::IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RevisionFormat {
  /// Legacy positional patches. `revision` holds an operation list, `raw`
  /// holds plain text once resolved.
  Patch,
  /// Merge-engine deltas. `revision` holds the base64 update, `raw` holds the
  /// base64 full state after applying it.
  #[default]
  Merge,
}

// ─── State ───────────────────────────────────────────────────────────────────

/// Whether a revision's snapshot has been materialised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "raw", rename_all = "snake_case")]
pub enum RevisionState {
  /// A pure delta row; its content only exists relative to earlier rows.
  Unresolved,
  /// The full snapshot as of this revision.
  Resolved(String),
}

impl RevisionState {
  pub fn is_resolved(&self) -> bool { matches!(self, Self::Resolved(_)) }

  pub fn raw(&self) -> Option<&str> {
    match self {
      Self::Resolved(raw) => Some(raw),
      Self::Unresolved => None,
    }
  }
}

// ─── Revision ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Revision {
  pub id:               i64,
  pub post_id:          i64,
  /// Strictly increasing per post; gaps are tolerated.
  pub version:          i64,
  pub format:           RevisionFormat,
  pub client_id:        String,
  pub user_id:          i64,
  pub revision:         String,
  pub state:            RevisionState,
  pub state_hash:       Option<String>,
  /// Set once this row's content has been folded into the post.
  pub post_revision_id: Option<i64>,
  pub created_at:       DateTime<Utc>,
  pub updated_at:       DateTime<Utc>,
}

impl Revision {
  pub fn raw(&self) -> Option<&str> { self.state.raw() }

  pub fn is_compacted(&self) -> bool { self.post_revision_id.is_some() }

  /// The positional patch carried by a legacy row, if any.
  pub fn patch(&self) -> Result<Option<Operation>> {
    if self.format != RevisionFormat::Patch || self.revision.trim().is_empty() {
      return Ok(None);
    }
    Ok(Some(Operation::from_json(&self.revision)?))
  }

  /// Length of the document as of this legacy revision, when it can be known
  /// from the row alone.
  pub fn patch_target_len(&self) -> Result<Option<usize>> {
    if let Some(raw) = self.raw() {
      return Ok(Some(raw.chars().count()));
    }
    Ok(self.patch()?.map(|op| op.target_len()))
  }
}

/// The head of a post's log: the highest version with a resolved snapshot.
pub fn head(revisions: &[Revision]) -> Option<&Revision> {
  revisions
    .iter()
    .filter(|r| r.state.is_resolved())
    .max_by_key(|r| r.version)
}

// ─── NewRevision ─────────────────────────────────────────────────────────────

/// Input to [`crate::store::RevisionStore::insert_revision`].
/// Timestamps and the row id are assigned by the store.
#[derive(Debug, Clone)]
pub struct NewRevision {
  pub post_id:    i64,
  pub version:    i64,
  pub format:     RevisionFormat,
  pub client_id:  String,
  pub user_id:    i64,
  pub revision:   String,
  pub raw:        Option<String>,
  pub state_hash: Option<String>,
}

impl NewRevision {
  /// A resolved row carrying a full snapshot and an empty delta.
  pub fn baseline(
    post_id: i64,
    version: i64,
    format: RevisionFormat,
    client_id: impl Into<String>,
    user_id: i64,
    raw: String,
    state_hash: String,
  ) -> Self {
    Self {
      post_id,
      version,
      format,
      client_id: client_id.into(),
      user_id,
      revision: String::new(),
      raw: Some(raw),
      state_hash: Some(state_hash),
    }
  }
}
