//! The service object that owns the engine, locks, hub, and coordination
//! store, and exposes every shared-edits operation.

use std::sync::Arc;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use tandem_core::{
  merge::MergeEngine,
  post::Post,
  revision::{Revision, RevisionFormat},
  store::PostStore,
  validation::StateValidator,
};

use crate::{
  Error, Result, SyncSettings,
  kv::{KeyValue, MemoryKv},
  limiter::RecoveryLimiter,
  locks::DocumentLocks,
  transport::{ChannelMessage, Hub},
};

/// User id recorded on rows written by the system rather than an editor.
pub const SYSTEM_USER_ID: i64 = -1;

pub struct SharedEdits<S, K = MemoryKv> {
  pub(crate) store:     Arc<S>,
  pub(crate) kv:        Arc<K>,
  pub(crate) validator: StateValidator,
  pub(crate) locks:     Arc<DocumentLocks>,
  pub(crate) hub:       Arc<Hub>,
  pub(crate) limiter:   Arc<RecoveryLimiter<K>>,
  pub(crate) settings:  Arc<SyncSettings>,
}

impl<S, K> Clone for SharedEdits<S, K> {
  fn clone(&self) -> Self {
    Self {
      store:     self.store.clone(),
      kv:        self.kv.clone(),
      validator: self.validator.clone(),
      locks:     self.locks.clone(),
      hub:       self.hub.clone(),
      limiter:   self.limiter.clone(),
      settings:  self.settings.clone(),
    }
  }
}

impl<S: PostStore> SharedEdits<S, MemoryKv> {
  /// A service backed by an in-process key-value store.
  pub fn new(store: S, settings: SyncSettings) -> Self {
    Self::with_kv(store, MemoryKv::new(), settings)
  }
}

impl<S: PostStore, K: KeyValue> SharedEdits<S, K> {
  pub fn with_kv(store: S, kv: K, settings: SyncSettings) -> Self {
    let kv = Arc::new(kv);
    let engine = Arc::new(MergeEngine::new());
    Self {
      store: Arc::new(store),
      limiter: Arc::new(RecoveryLimiter::new(kv.clone(), &settings)),
      kv,
      validator: StateValidator::new(engine, settings.limits),
      locks: Arc::new(DocumentLocks::new()),
      hub: Arc::new(Hub::new(settings.channel_capacity)),
      settings: Arc::new(settings),
    }
  }

  pub fn store(&self) -> &S { &self.store }

  pub fn hub(&self) -> &Hub { &self.hub }

  pub fn settings(&self) -> &SyncSettings { &self.settings }

  pub fn validator(&self) -> &StateValidator { &self.validator }

  // ── Shared helpers ────────────────────────────────────────────────────────

  pub(crate) async fn post(&self, post_id: i64) -> Result<Post> {
    self
      .store
      .get_post(post_id)
      .await
      .map_err(Error::store)?
      .ok_or(Error::PostNotFound(post_id))
  }

  pub(crate) async fn head(&self, post_id: i64) -> Result<Revision> {
    self
      .store
      .latest_revision(post_id)
      .await
      .map_err(Error::store)?
      .ok_or(Error::NotInitialized(post_id))
  }

  /// Encode `text` in the document's format for storage in `raw`.
  pub(crate) fn encode_snapshot(&self, format: RevisionFormat, text: &str) -> String {
    match format {
      RevisionFormat::Patch => text.to_owned(),
      RevisionFormat::Merge => {
        STANDARD.encode(self.validator.engine().state_from_text(text))
      }
    }
  }

  /// Materialise the text held in a snapshot column.
  pub(crate) fn decode_snapshot(
    &self,
    format: RevisionFormat,
    raw: &str,
  ) -> Result<String, tandem_core::validation::ValidationError> {
    match format {
      RevisionFormat::Patch => Ok(raw.to_owned()),
      RevisionFormat::Merge => {
        self.validator.validate_state(Some(raw)).map(|d| d.text)
      }
    }
  }

  pub(crate) fn broadcast(&self, post_id: i64, message: ChannelMessage) {
    self.hub.publish(post_id, message);
  }
}
