//! A fast, expiring key-value store for short-lived coordination state:
//! the commit sentinel and the recovery rate-limit counters.
//!
//! [`MemoryKv`] keeps everything in process. Expiry is measured on
//! [`tokio::time::Instant`], so paused-clock tests can drive it. A key is
//! checked when touched, and every write sweeps out whatever else expired.

use std::{
  collections::HashMap,
  future::Future,
  sync::{Mutex, PoisonError},
  time::Duration,
};

use tokio::time::Instant;

pub trait KeyValue: Send + Sync {
  /// Set `key` with the given expiry unless it is already live. Returns
  /// whether this call created it.
  fn set_if_absent(
    &self,
    key: &str,
    ttl: Duration,
  ) -> impl Future<Output = bool> + Send;

  /// Increment a counter, creating it at 1 with the given expiry when absent.
  /// The expiry is not extended by later increments.
  fn incr(&self, key: &str, ttl: Duration) -> impl Future<Output = u64> + Send;

  /// Time until `key` expires, or `None` if it is not live.
  fn ttl(&self, key: &str) -> impl Future<Output = Option<Duration>> + Send;

  /// Returns whether a live key was removed.
  fn delete(&self, key: &str) -> impl Future<Output = bool> + Send;
}

struct Entry {
  value:      u64,
  expires_at: Instant,
}

#[derive(Default)]
pub struct MemoryKv {
  entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryKv {
  pub fn new() -> Self { Self::default() }

  fn with_live<T>(
    &self,
    key: &str,
    f: impl FnOnce(&mut HashMap<String, Entry>, Instant) -> T,
  ) -> T {
    let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
    let now = Instant::now();
    if entries.get(key).is_some_and(|e| e.expires_at <= now) {
      entries.remove(key);
    }
    f(&mut entries, now)
  }

  /// Like [`Self::with_live`], after dropping every expired entry.
  fn with_swept<T>(
    &self,
    key: &str,
    f: impl FnOnce(&mut HashMap<String, Entry>, Instant) -> T,
  ) -> T {
    self.with_live(key, |entries, now| {
      entries.retain(|_, e| e.expires_at > now);
      f(entries, now)
    })
  }

  #[cfg(test)]
  fn len(&self) -> usize {
    self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
  }
}

impl KeyValue for MemoryKv {
  async fn set_if_absent(&self, key: &str, ttl: Duration) -> bool {
    self.with_swept(key, |entries, now| {
      if entries.contains_key(key) {
        return false;
      }
      entries.insert(key.to_owned(), Entry { value: 1, expires_at: now + ttl });
      true
    })
  }

  async fn incr(&self, key: &str, ttl: Duration) -> u64 {
    self.with_swept(key, |entries, now| {
      let entry = entries
        .entry(key.to_owned())
        .or_insert(Entry { value: 0, expires_at: now + ttl });
      entry.value += 1;
      entry.value
    })
  }

  async fn ttl(&self, key: &str) -> Option<Duration> {
    self.with_live(key, |entries, now| {
      entries.get(key).map(|e| e.expires_at - now)
    })
  }

  async fn delete(&self, key: &str) -> bool {
    self.with_live(key, |entries, _| entries.remove(key).is_some())
  }
}
