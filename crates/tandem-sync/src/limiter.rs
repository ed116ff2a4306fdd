//! Rate limiting for recovery operations: a short per-document cooldown plus
//! an hourly cap, both kept in the shared key-value store.
//!
//! The cap is a fixed window. It opens at the first attempt and lasts an
//! hour, however the attempts inside it are spread.

use std::{sync::Arc, time::Duration};

use crate::{Error, Result, SyncSettings, kv::KeyValue};

const HOUR: Duration = Duration::from_secs(60 * 60);

pub struct RecoveryLimiter<K> {
  kv:         Arc<K>,
  cooldown:   Duration,
  hourly_cap: u64,
}

fn cooldown_key(post_id: i64) -> String {
  format!("shared_edits:recovery_cooldown:{post_id}")
}

fn hourly_key(post_id: i64) -> String {
  format!("shared_edits:recovery_count:{post_id}")
}

impl<K: KeyValue> RecoveryLimiter<K> {
  pub fn new(kv: Arc<K>, settings: &SyncSettings) -> Self {
    Self {
      kv,
      cooldown: settings.recovery_cooldown(),
      hourly_cap: settings.recovery_hourly_cap,
    }
  }

  /// Record a recovery attempt, or reject it with the time to wait. A
  /// rejected attempt leaves the cooldown untouched.
  pub async fn check(&self, post_id: i64) -> Result<()> {
    let cooldown = cooldown_key(post_id);
    if let Some(retry_after) = self.kv.ttl(&cooldown).await {
      tracing::warn!(post_id, ?retry_after, "recovery rejected: cooldown");
      return Err(Error::RateLimited { post_id, retry_after });
    }

    let hourly = hourly_key(post_id);
    let attempts = self.kv.incr(&hourly, HOUR).await;
    if attempts > self.hourly_cap {
      let retry_after = self.kv.ttl(&hourly).await.unwrap_or(HOUR);
      tracing::warn!(post_id, attempts, ?retry_after, "recovery rejected: hourly cap");
      return Err(Error::RateLimited { post_id, retry_after });
    }

    // Another attempt may have started since the cooldown was read.
    if !self.kv.set_if_absent(&cooldown, self.cooldown).await {
      let retry_after = self.kv.ttl(&cooldown).await.unwrap_or(self.cooldown);
      return Err(Error::RateLimited { post_id, retry_after });
    }
    Ok(())
  }
}
