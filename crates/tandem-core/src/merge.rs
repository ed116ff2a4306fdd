//! The document merge engine: a conflict-free replicated text type backed by
//! [`yrs`].
//!
//! The engine is an explicitly constructed service object. Every operation
//! runs inside a [`MergeSession`], which holds the engine's lock for its whole
//! lifetime. Composite operations (decode, apply, re-encode, re-decode) run
//! inside a single session and pass it by reference to their helpers, so a
//! helper never needs to take the lock a second time.
//!
//! Decoding untrusted bytes never unwinds past the engine: panics raised by
//! the underlying library are caught and reported as [`EngineError`].

use std::{
  any::Any,
  panic::{self, AssertUnwindSafe},
  sync::{Mutex, MutexGuard, PoisonError},
};

use thiserror::Error;
use yrs::{
  Doc, GetString, OffsetKind, Options, ReadTxn, StateVector, Text, TextRef,
  Transact, Update,
  updates::{decoder::Decode, encoder::Encode},
};

/// Name of the shared text root inside every document.
pub const TEXT_ROOT: &str = "post";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
  #[error("cannot decode engine payload: {0}")]
  Decode(String),

  #[error("cannot apply update: {0}")]
  Apply(String),

  #[error("engine fault: {0}")]
  Panicked(String),
}

// ─── Handle ──────────────────────────────────────────────────────────────────

/// A live document handle. Only usable through a [`MergeSession`].
pub struct TextDoc {
  doc:  Doc,
  text: TextRef,
}

impl TextDoc {
  fn empty() -> Self {
    let doc = Doc::with_options(Options {
      offset_kind: OffsetKind::Utf16,
      ..Options::default()
    });
    let text = doc.get_or_insert_text(TEXT_ROOT);
    Self { doc, text }
  }
}

/// How a client's state vector relates to the server's.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VectorComparison {
  /// The server holds updates the client has not seen.
  pub client_missing: bool,
  /// The client claims updates the server has never received.
  pub client_ahead:   bool,
}

// ─── Engine ──────────────────────────────────────────────────────────────────

/// Process-owned merge engine. Construct one per process (or per test).
#[derive(Default)]
pub struct MergeEngine {
  lock: Mutex<()>,
}

impl MergeEngine {
  pub fn new() -> Self { Self::default() }

  /// Acquire the engine for a sequence of operations.
  pub fn session(&self) -> MergeSession<'_> {
    let guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
    MergeSession { _guard: guard }
  }

  /// Encode a fresh document whose text is `text`.
  pub fn state_from_text(&self, text: &str) -> Vec<u8> {
    let session = self.session();
    let mut doc = session.new_document();
    session.insert(&mut doc, 0, text);
    session.encode_state(&doc)
  }

  /// Decode `state` and materialise its text.
  pub fn text_from_state(&self, state: &[u8]) -> Result<String, EngineError> {
    let session = self.session();
    let doc = session.decode_state(state)?;
    Ok(session.text(&doc))
  }
}

// ─── Session ─────────────────────────────────────────────────────────────────

/// Exclusive access to the engine. Dropping the session releases the lock.
pub struct MergeSession<'a> {
  _guard: MutexGuard<'a, ()>,
}

impl MergeSession<'_> {
  pub fn new_document(&self) -> TextDoc { TextDoc::empty() }

  /// Insert `text` at a UTF-16 offset; offsets past the end append.
  pub fn insert(&self, doc: &mut TextDoc, index: u32, text: &str) {
    if text.is_empty() {
      return;
    }
    let mut txn = doc.doc.transact_mut();
    let index = index.min(doc.text.len(&txn));
    doc.text.insert(&mut txn, index, text);
  }

  /// Delete `len` UTF-16 units starting at `index`, clamped to the text.
  pub fn delete(&self, doc: &mut TextDoc, index: u32, len: u32) {
    let mut txn = doc.doc.transact_mut();
    let total = doc.text.len(&txn);
    let index = index.min(total);
    let len = len.min(total - index);
    if len > 0 {
      doc.text.remove_range(&mut txn, index, len);
    }
  }

  pub fn encode_state(&self, doc: &TextDoc) -> Vec<u8> {
    doc
      .doc
      .transact()
      .encode_state_as_update_v1(&StateVector::default())
  }

  /// Decode a full state. Empty input yields a new, empty document.
  pub fn decode_state(&self, bytes: &[u8]) -> Result<TextDoc, EngineError> {
    let mut doc = TextDoc::empty();
    if !bytes.is_empty() {
      self.apply_update(&mut doc, bytes)?;
    }
    Ok(doc)
  }

  /// Merge a remote update. Re-applying an update already merged is a no-op.
  pub fn apply_update(
    &self,
    doc: &mut TextDoc,
    update: &[u8],
  ) -> Result<(), EngineError> {
    guarded(|| {
      let update = Update::decode_v1(update)
        .map_err(|e| EngineError::Decode(e.to_string()))?;
      doc
        .doc
        .transact_mut()
        .apply_update(update)
        .map_err(|e| EngineError::Apply(e.to_string()))
    })
  }

  pub fn encode_state_vector(&self, doc: &TextDoc) -> Vec<u8> {
    doc.doc.transact().state_vector().encode_v1()
  }

  /// The update a peer at `since` needs to reach `doc`.
  pub fn diff_update(
    &self,
    doc: &TextDoc,
    since: &[u8],
  ) -> Result<Vec<u8>, EngineError> {
    guarded(|| {
      let sv = StateVector::decode_v1(since)
        .map_err(|e| EngineError::Decode(e.to_string()))?;
      Ok(doc.doc.transact().encode_diff_v1(&sv))
    })
  }

  pub fn text(&self, doc: &TextDoc) -> String {
    doc.text.get_string(&doc.doc.transact())
  }

  /// Rewrite the document's text to `new_text` with the smallest single
  /// splice, returning the update that performs it.
  pub fn diff_text(&self, doc: &mut TextDoc, new_text: &str) -> Vec<u8> {
    let old_text = self.text(doc);
    let (start, old_end, new_end) = splice_bounds(&old_text, new_text);

    let index = utf16_len(&old_text[..start]);
    let removed = utf16_len(&old_text[start..old_end]);
    let inserted = &new_text[start..new_end];

    let mut txn = doc.doc.transact_mut();
    if removed > 0 {
      doc.text.remove_range(&mut txn, index, removed);
    }
    if !inserted.is_empty() {
      doc.text.insert(&mut txn, index, inserted);
    }
    txn.encode_update_v1()
  }

  /// Compare a client's encoded state vector against `doc`.
  pub fn compare_state_vector(
    &self,
    doc: &TextDoc,
    client: &[u8],
  ) -> Result<VectorComparison, EngineError> {
    guarded(|| {
      let client = StateVector::decode_v1(client)
        .map_err(|e| EngineError::Decode(e.to_string()))?;
      let server = doc.doc.transact().state_vector();

      let client_missing =
        server.iter().any(|(id, clock)| *clock > client.get(id));
      let client_ahead =
        client.iter().any(|(id, clock)| *clock > server.get(id));

      Ok(VectorComparison { client_missing, client_ahead })
    })
  }
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

fn guarded<T>(
  f: impl FnOnce() -> Result<T, EngineError>,
) -> Result<T, EngineError> {
  panic::catch_unwind(AssertUnwindSafe(f))
    .unwrap_or_else(|payload| Err(EngineError::Panicked(panic_message(payload))))
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
  if let Some(s) = payload.downcast_ref::<&str>() {
    (*s).to_owned()
  } else if let Some(s) = payload.downcast_ref::<String>() {
    s.clone()
  } else {
    "unknown panic".to_owned()
  }
}

fn utf16_len(s: &str) -> u32 { s.encode_utf16().count() as u32 }

/// Byte offsets `(start, old_end, new_end)` of the differing middle section,
/// always on char boundaries.
fn splice_bounds(old: &str, new: &str) -> (usize, usize, usize) {
  let start = old
    .char_indices()
    .zip(new.chars())
    .find(|((_, a), b)| a != b)
    .map(|((i, _), _)| i)
    .unwrap_or_else(|| old.len().min(new.len()));

  let old_tail = &old[start..];
  let new_tail = &new[start..];
  let suffix: usize = old_tail
    .chars()
    .rev()
    .zip(new_tail.chars().rev())
    .take_while(|(a, b)| a == b)
    .map(|(a, _)| a.len_utf8())
    .sum();

  (start, old.len() - suffix, new.len() - suffix)
}
