//! Tunables for the shared-edits service.
//!
//! Every field has a default, so an empty `[shared_edits]` table (or none at
//! all) yields a working configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tandem_core::{revision::RevisionFormat, validation::Limits};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
  /// Delay between the first uncommitted edit and its compaction.
  pub commit_delay_secs:        u64,
  /// Expiry of the per-document "compaction pending" sentinel.
  pub commit_sentinel_ttl_secs: u64,
  /// Minimum spacing between recovery attempts on one document.
  pub recovery_cooldown_secs:   u64,
  /// Recovery attempts allowed per document in each fixed one-hour window.
  pub recovery_hourly_cap:      u64,
  /// Longest rebase chain a single submission may follow before giving up.
  pub max_rebase_attempts:      usize,
  /// Messages buffered per subscriber on a document channel.
  pub channel_capacity:         usize,
  /// Trust level at which non-staff users may toggle shared edits.
  pub min_trust_to_enable:      u8,
  /// Edit reason written on compaction; `{users}` is replaced with the
  /// comma-joined contributor list.
  pub edit_reason_template:     String,
  /// Format of documents enabled without an explicit choice.
  pub default_format:           RevisionFormat,
  pub limits:                   Limits,
}

impl Default for SyncSettings {
  fn default() -> Self {
    Self {
      commit_delay_secs:        10,
      commit_sentinel_ttl_secs: 60,
      recovery_cooldown_secs:   30,
      recovery_hourly_cap:      10,
      max_rebase_attempts:      32,
      channel_capacity:         256,
      min_trust_to_enable:      3,
      edit_reason_template:     "Edited collaboratively by {users}".to_owned(),
      default_format:           RevisionFormat::Merge,
      limits:                   Limits::default(),
    }
  }
}

impl SyncSettings {
  pub fn commit_delay(&self) -> Duration {
    Duration::from_secs(self.commit_delay_secs)
  }

  pub fn commit_sentinel_ttl(&self) -> Duration {
    Duration::from_secs(self.commit_sentinel_ttl_secs)
  }

  pub fn recovery_cooldown(&self) -> Duration {
    Duration::from_secs(self.recovery_cooldown_secs)
  }
}
