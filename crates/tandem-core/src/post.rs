//! The document of record: the authoritative post content that compaction
//! writes through to.
//!
//! Only the minimal surface the engine needs is modelled here: current raw
//! text, edit reason, the shared-edits flag, and an append-only history of
//! post revisions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
  pub post_id:              i64,
  pub user_id:              i64,
  pub raw:                  String,
  pub edit_reason:          Option<String>,
  pub shared_edits_enabled: bool,
  pub bumped_at:            DateTime<Utc>,
  pub updated_at:           DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostRevision {
  pub post_revision_id: i64,
  pub post_id:          i64,
  /// 1-based, per post.
  pub number:           i64,
  pub user_id:          i64,
  pub raw:              String,
  pub edit_reason:      Option<String>,
  pub created_at:       DateTime<Utc>,
}

/// Attribution flags for system-driven consolidation of collaborative edits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishOptions {
  pub bypass_rate_limiter: bool,
  /// When set, the post's `bumped_at` is left untouched.
  pub bypass_bump:         bool,
  pub skip_staff_log:      bool,
}

impl PublishOptions {
  pub const fn consolidation() -> Self {
    Self {
      bypass_rate_limiter: true,
      bypass_bump:         true,
      skip_staff_log:      true,
    }
  }
}

/// Input to [`crate::store::PostStore::publish`]. Written atomically: the new
/// post revision, the post update, and the compaction stamp on the
/// originating log row.
#[derive(Debug, Clone)]
pub struct Publication {
  pub post_id:           i64,
  pub raw:               String,
  pub edit_reason:       String,
  /// The user the post revision is attributed to.
  pub user_id:           i64,
  pub options:           PublishOptions,
  /// Version of the revision-log row to stamp with the new post revision id.
  pub compacted_version: i64,
}
