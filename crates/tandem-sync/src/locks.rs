//! Per-document advisory locks for compaction and recovery.
//!
//! Edit acceptance never takes these. Public entry points that read and
//! rewrite a range of revision rows acquire the document's lock once and pass
//! the [`DocumentGuard`] to their `*_locked` helpers.

use std::{
  collections::HashMap,
  sync::{Arc, Mutex, PoisonError},
};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Default)]
pub struct DocumentLocks {
  locks: Mutex<HashMap<i64, Arc<AsyncMutex<()>>>>,
}

/// Proof that the holder owns a document's lock.
pub struct DocumentGuard {
  post_id: i64,
  _guard:  OwnedMutexGuard<()>,
}

impl DocumentGuard {
  pub fn post_id(&self) -> i64 { self.post_id }
}

impl DocumentLocks {
  pub fn new() -> Self { Self::default() }

  pub async fn lock(&self, post_id: i64) -> DocumentGuard {
    let lock = {
      let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
      // Drop entries nobody holds or waits on.
      locks.retain(|_, l| Arc::strong_count(l) > 1);
      locks.entry(post_id).or_default().clone()
    };
    DocumentGuard { post_id, _guard: lock.lock_owned().await }
  }
}
