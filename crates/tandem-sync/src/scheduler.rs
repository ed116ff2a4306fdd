//! Deferred compaction with a per-document debounce sentinel.
//!
//! The first accepted edit on an idle document sets the sentinel and spawns a
//! job that compacts after `commit_delay`. Edits arriving while the sentinel
//! is live do nothing. The job clears the sentinel before compacting, so an
//! edit landing mid-compaction schedules a fresh job.

use tandem_core::store::PostStore;

use crate::{SharedEdits, kv::KeyValue};

pub(crate) fn commit_key(post_id: i64) -> String {
  format!("shared_edits:commit:{post_id}")
}

impl<S: PostStore + 'static, K: KeyValue + 'static> SharedEdits<S, K> {
  /// Returns whether a new compaction job was scheduled.
  pub async fn schedule_commit(&self, post_id: i64) -> bool {
    let key = commit_key(post_id);
    if !self
      .kv
      .set_if_absent(&key, self.settings.commit_sentinel_ttl())
      .await
    {
      return false;
    }

    let this = self.clone();
    let delay = self.settings.commit_delay();
    tokio::spawn(async move {
      tokio::time::sleep(delay).await;
      this.kv.delete(&key).await;
      match this.commit(post_id).await {
        Ok(Some(commit)) => {
          tracing::debug!(post_id, version = commit.version, "scheduled commit finished");
        }
        Ok(None) => {}
        Err(e) => {
          tracing::error!(post_id, error = %e, "scheduled commit failed");
        }
      }
    });
    true
  }
}
