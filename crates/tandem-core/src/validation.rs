//! The state validator: gatekeeper for every payload entering the revision
//! log, and the safe-apply path that turns engine faults into typed errors.
//!
//! Ordinary bad input is never an `Err` from the engine's point of view; each
//! `validate_*` method returns `Result<_, ValidationError>` carrying a
//! machine-readable [`ValidationErrorKind`].

use std::sync::Arc;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
  Error, Result,
  merge::{MergeEngine, MergeSession},
};

// ─── Limits ──────────────────────────────────────────────────────────────────

pub const MAX_UPDATE_BYTES: usize = 1024 * 1024;
pub const MAX_STATE_VECTOR_BYTES: usize = 64 * 1024;
pub const MAX_AWARENESS_BYTES: usize = 16 * 1024;
pub const MAX_CLIENT_ID_BYTES: usize = 255;
pub const SNAPSHOT_THRESHOLD_BYTES: usize = 100 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
  pub max_update_bytes:         usize,
  pub max_state_vector_bytes:   usize,
  pub max_awareness_bytes:      usize,
  pub max_client_id_bytes:      usize,
  pub snapshot_threshold_bytes: usize,
  /// Maximum document length in chars. `None` disables the check.
  pub max_post_length:          Option<usize>,
}

impl Default for Limits {
  fn default() -> Self {
    Self {
      max_update_bytes:         MAX_UPDATE_BYTES,
      max_state_vector_bytes:   MAX_STATE_VECTOR_BYTES,
      max_awareness_bytes:      MAX_AWARENESS_BYTES,
      max_client_id_bytes:      MAX_CLIENT_ID_BYTES,
      snapshot_threshold_bytes: SNAPSHOT_THRESHOLD_BYTES,
      max_post_length:          None,
    }
  }
}

// ─── Verdicts ────────────────────────────────────────────────────────────────

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ValidationErrorKind {
  Missing,
  MalformedBase64,
  TooLarge,
  InvalidState,
  InvalidClientId,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct ValidationError {
  pub kind:    ValidationErrorKind,
  pub message: String,
}

impl ValidationError {
  fn new(kind: ValidationErrorKind, message: impl Into<String>) -> Self {
    Self { kind, message: message.into() }
  }
}

/// A state that decoded cleanly, with its materialised text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedState {
  pub bytes: Vec<u8>,
  pub text:  String,
}

/// Where a client stands relative to the server's document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStatus {
  InSync,
  /// The server holds updates the client lacks; `missing_update` brings the
  /// client up to date.
  Behind { missing_update: Vec<u8> },
  /// The client claims updates the server never received.
  Diverged,
}

/// The outcome of [`StateValidator::safe_apply_update`].
#[derive(Debug, Clone)]
pub struct AppliedUpdate {
  pub state:         Vec<u8>,
  pub text:          String,
  pub previous_text: String,
}

// ─── Validator ───────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct StateValidator {
  engine: Arc<MergeEngine>,
  limits: Limits,
}

impl StateValidator {
  pub fn new(engine: Arc<MergeEngine>, limits: Limits) -> Self {
    Self { engine, limits }
  }

  pub fn engine(&self) -> &MergeEngine { &self.engine }

  pub fn limits(&self) -> &Limits { &self.limits }

  /// Decode and structurally check a base64 document state.
  pub fn validate_state(
    &self,
    encoded: Option<&str>,
  ) -> Result<DecodedState, ValidationError> {
    let bytes = decode_payload(encoded, "state", None)?;
    let session = self.engine.session();
    let text = decoded_text(&session, &bytes)?;
    Ok(DecodedState { bytes, text })
  }

  pub fn validate_update(
    &self,
    encoded: Option<&str>,
  ) -> Result<Vec<u8>, ValidationError> {
    decode_payload(encoded, "update", Some(self.limits.max_update_bytes))
  }

  pub fn validate_awareness(
    &self,
    encoded: Option<&str>,
  ) -> Result<Vec<u8>, ValidationError> {
    decode_payload(encoded, "awareness", Some(self.limits.max_awareness_bytes))
  }

  pub fn validate_state_vector(
    &self,
    encoded: Option<&str>,
  ) -> Result<Vec<u8>, ValidationError> {
    decode_payload(
      encoded,
      "state vector",
      Some(self.limits.max_state_vector_bytes),
    )
  }

  pub fn validate_client_id(&self, id: &str) -> Result<(), ValidationError> {
    if id.is_empty() {
      return Err(ValidationError::new(
        ValidationErrorKind::InvalidClientId,
        "client id is empty",
      ));
    }
    if id.len() > self.limits.max_client_id_bytes {
      return Err(ValidationError::new(
        ValidationErrorKind::InvalidClientId,
        format!(
          "client id is {} bytes, limit is {}",
          id.len(),
          self.limits.max_client_id_bytes
        ),
      ));
    }
    Ok(())
  }

  /// Whether a state has grown past the point where it should be rebuilt
  /// from plain text.
  pub fn should_snapshot(&self, encoded: &str) -> bool {
    STANDARD
      .decode(encoded)
      .is_ok_and(|bytes| bytes.len() > self.limits.snapshot_threshold_bytes)
  }

  /// Compare a client's state vector with the server's state, computing the
  /// catch-up update when the client is behind.
  pub fn validate_client_state_vector(
    &self,
    server_state: &[u8],
    client_state_vector: &[u8],
  ) -> Result<SyncStatus> {
    let session = self.engine.session();
    let doc = session.decode_state(server_state)?;
    let cmp = session.compare_state_vector(&doc, client_state_vector)?;

    if cmp.client_ahead {
      Ok(SyncStatus::Diverged)
    } else if cmp.client_missing {
      let missing_update = session.diff_update(&doc, client_state_vector)?;
      Ok(SyncStatus::Behind { missing_update })
    } else {
      Ok(SyncStatus::InSync)
    }
  }

  /// Apply `update` to `current_state`, the state of revision `version`,
  /// verifying the result.
  ///
  /// A current or resulting state that fails to decode is reported as
  /// [`Error::StateCorruption`] of `version`. Growth past `max_post_length`
  /// is rejected only when the edit makes the document longer than it
  /// already was.
  pub fn safe_apply_update(
    &self,
    post_id: i64,
    version: i64,
    current_state: &[u8],
    update: &[u8],
    allow_blank_state: bool,
  ) -> Result<AppliedUpdate> {
    let corruption = || Error::StateCorruption { post_id, version };

    let session = self.engine.session();
    let mut doc = session.decode_state(current_state).map_err(|_| corruption())?;
    let previous_text = session.text(&doc);

    session.apply_update(&mut doc, update).map_err(|e| {
      ValidationError::new(ValidationErrorKind::InvalidState, e.to_string())
    })?;

    let state = session.encode_state(&doc);
    let text = decoded_text(&session, &state).map_err(|_| corruption())?;

    if let Some(limit) = self.limits.max_post_length {
      let length = text.chars().count();
      if length > limit && length > previous_text.chars().count() {
        return Err(Error::PostLengthExceeded { limit, length });
      }
    }

    if !allow_blank_state && is_blank(&text) && !is_blank(&previous_text) {
      return Err(Error::BlankStateRejected(post_id));
    }

    Ok(AppliedUpdate { state, text, previous_text })
  }

  /// Enforce `max_post_length` on text arriving from outside the engine.
  pub fn check_length(&self, text: &str) -> Result<()> {
    match self.limits.max_post_length {
      Some(limit) if text.chars().count() > limit => {
        Err(Error::PostLengthExceeded { limit, length: text.chars().count() })
      }
      _ => Ok(()),
    }
  }
}

pub fn is_blank(text: &str) -> bool { text.trim().is_empty() }

// ─── Helpers ─────────────────────────────────────────────────────────────────

fn decode_payload(
  encoded: Option<&str>,
  what: &str,
  max: Option<usize>,
) -> Result<Vec<u8>, ValidationError> {
  let encoded = match encoded {
    Some(s) if !s.is_empty() => s,
    _ => {
      return Err(ValidationError::new(
        ValidationErrorKind::Missing,
        format!("{what} is missing"),
      ));
    }
  };

  let bytes = STANDARD.decode(encoded).map_err(|e| {
    ValidationError::new(
      ValidationErrorKind::MalformedBase64,
      format!("{what} is not valid base64: {e}"),
    )
  })?;

  if bytes.is_empty() {
    return Err(ValidationError::new(
      ValidationErrorKind::Missing,
      format!("{what} is empty"),
    ));
  }
  match max {
    Some(max) if bytes.len() > max => Err(ValidationError::new(
      ValidationErrorKind::TooLarge,
      format!("{what} is {} bytes, limit is {max}", bytes.len()),
    )),
    _ => Ok(bytes),
  }
}

fn decoded_text(
  session: &MergeSession<'_>,
  bytes: &[u8],
) -> Result<String, ValidationError> {
  session
    .decode_state(bytes)
    .map(|doc| session.text(&doc))
    .map_err(|e| {
      ValidationError::new(ValidationErrorKind::InvalidState, e.to_string())
    })
}

#[cfg(test)]
mod tests {
  use super::*;

  fn validator(max_post_length: Option<usize>) -> StateValidator {
    StateValidator::new(Arc::new(MergeEngine::new()), Limits {
      max_post_length,
      ..Limits::default()
    })
  }

  fn b64(bytes: &[u8]) -> String { STANDARD.encode(bytes) }

  /// An update that rewrites `from` into `to`.
  fn rewrite(engine: &MergeEngine, from: &[u8], to: &str) -> Vec<u8> {
    let session = engine.session();
    let mut doc = session.decode_state(from).unwrap();
    session.diff_text(&mut doc, to)
  }

  #[test]
  fn validate_state_rejects_bad_input_without_panicking() {
    let v = validator(None);
    let cases = [
      (None, ValidationErrorKind::Missing),
      (Some(""), ValidationErrorKind::Missing),
      (Some("not-base64!!!"), ValidationErrorKind::MalformedBase64),
    ];
    for (input, kind) in cases {
      let err = v.validate_state(input).unwrap_err();
      assert_eq!(err.kind, kind, "input {input:?}");
      assert!(!err.message.is_empty());
    }

    let garbage = b64(&[0xFF; 16]);
    let err = v.validate_state(Some(&garbage)).unwrap_err();
    assert_eq!(err.kind, ValidationErrorKind::InvalidState);
  }

  #[test]
  fn validate_state_returns_text() {
    let v = validator(None);
    let state = v.engine().state_from_text("hello world");
    let decoded = v.validate_state(Some(&b64(&state))).unwrap();
    assert_eq!(decoded.text, "hello world");
    assert_eq!(decoded.bytes, state);
  }

  #[test]
  fn update_size_ceiling() {
    let v = validator(None);
    let at_limit = b64(&vec![1u8; MAX_UPDATE_BYTES]);
    assert!(v.validate_update(Some(&at_limit)).is_ok());

    let over = b64(&vec![1u8; MAX_UPDATE_BYTES + 1]);
    assert_eq!(
      v.validate_update(Some(&over)).unwrap_err().kind,
      ValidationErrorKind::TooLarge
    );

    let big_vector = b64(&vec![1u8; MAX_STATE_VECTOR_BYTES + 1]);
    assert_eq!(
      v.validate_state_vector(Some(&big_vector)).unwrap_err().kind,
      ValidationErrorKind::TooLarge
    );
    let big_awareness = b64(&vec![1u8; MAX_AWARENESS_BYTES + 1]);
    assert_eq!(
      v.validate_awareness(Some(&big_awareness)).unwrap_err().kind,
      ValidationErrorKind::TooLarge
    );
  }

  #[test]
  fn client_id_bounds() {
    let v = validator(None);
    assert!(v.validate_client_id("abc").is_ok());
    assert!(v.validate_client_id(&"x".repeat(255)).is_ok());
    assert_eq!(
      v.validate_client_id("").unwrap_err().kind,
      ValidationErrorKind::InvalidClientId
    );
    assert_eq!(
      v.validate_client_id(&"x".repeat(256)).unwrap_err().kind,
      ValidationErrorKind::InvalidClientId
    );
  }

  #[test]
  fn should_snapshot_past_threshold() {
    let v = validator(None);
    assert!(!v.should_snapshot(&b64(&[0u8; 1024])));
    assert!(v.should_snapshot(&b64(&vec![0u8; SNAPSHOT_THRESHOLD_BYTES + 1])));
    assert!(!v.should_snapshot("%%%"));
  }

  #[test]
  fn growth_past_limit_is_rejected() {
    let v = validator(Some(100));
    let base = v.engine().state_from_text(&"a".repeat(90));
    let update = rewrite(v.engine(), &base, &"a".repeat(150));

    match v.safe_apply_update(1, 1, &base, &update, false) {
      Err(Error::PostLengthExceeded { limit: 100, length: 150 }) => {}
      other => panic!("expected PostLengthExceeded, got {other:?}"),
    }
  }

  #[test]
  fn shrinking_an_over_limit_document_is_allowed() {
    let v = validator(Some(100));
    let base = v.engine().state_from_text(&"a".repeat(150));
    let update = rewrite(v.engine(), &base, &"a".repeat(120));

    let applied = v.safe_apply_update(1, 1, &base, &update, false).unwrap();
    assert_eq!(applied.text.len(), 120);
    assert_eq!(applied.previous_text.len(), 150);
  }

  #[test]
  fn blank_guard() {
    let v = validator(None);
    let base = v.engine().state_from_text("some content");
    let update = rewrite(v.engine(), &base, "");

    assert!(matches!(
      v.safe_apply_update(7, 1, &base, &update, false),
      Err(Error::BlankStateRejected(7))
    ));
    let applied = v.safe_apply_update(7, 1, &base, &update, true).unwrap();
    assert_eq!(applied.text, "");
  }

  #[test]
  fn corrupt_current_state_is_reported_as_corruption() {
    let v = validator(None);
    let update = rewrite(v.engine(), &[], "x");
    assert!(matches!(
      v.safe_apply_update(3, 5, &[0xFF; 16], &update, false),
      Err(Error::StateCorruption { post_id: 3, version: 5 })
    ));
  }

  #[test]
  fn garbage_update_is_a_validation_error() {
    let v = validator(None);
    let base = v.engine().state_from_text("abc");
    assert!(matches!(
      v.safe_apply_update(1, 1, &base, &[0xFF; 16], false),
      Err(Error::Validation(ValidationError {
        kind: ValidationErrorKind::InvalidState,
        ..
      }))
    ));
  }

  #[test]
  fn client_state_vector_comparison() {
    let v = validator(None);
    let engine = v.engine();

    let base = engine.state_from_text("abc");
    let base_sv = {
      let session = engine.session();
      let doc = session.decode_state(&base).unwrap();
      session.encode_state_vector(&doc)
    };

    // Server moved on.
    let update = rewrite(engine, &base, "abcd");
    let applied = v.safe_apply_update(1, 1, &base, &update, false).unwrap();

    assert_eq!(
      v.validate_client_state_vector(&base, &base_sv).unwrap(),
      SyncStatus::InSync
    );

    let SyncStatus::Behind { missing_update } =
      v.validate_client_state_vector(&applied.state, &base_sv).unwrap()
    else {
      panic!("client should be behind");
    };
    let session = engine.session();
    let mut client = session.decode_state(&base).unwrap();
    session.apply_update(&mut client, &missing_update).unwrap();
    assert_eq!(session.text(&client), "abcd");
    drop(session);

    let ahead_sv = {
      let session = engine.session();
      let doc = session.decode_state(&applied.state).unwrap();
      session.encode_state_vector(&doc)
    };
    assert_eq!(
      v.validate_client_state_vector(&base, &ahead_sv).unwrap(),
      SyncStatus::Diverged
    );
  }
}
