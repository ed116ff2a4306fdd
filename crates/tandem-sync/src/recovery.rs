//! Corruption recovery and the read-only health check.
//!
//! Recovery replaces the head of the log with a fresh baseline derived from
//! trusted text: the post's own content, or text supplied by a client holding
//! a better copy. Every recovery path is rate limited and runs under the
//! document lock.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::Serialize;
use tandem_core::{
  hash::state_hash,
  revision::{NewRevision, Revision, RevisionFormat},
  store::PostStore,
};
use uuid::Uuid;

use crate::{
  Error, Result, SharedEdits,
  kv::KeyValue,
  locks::DocumentGuard,
  service::SYSTEM_USER_ID,
  transport::ChannelMessage,
};

/// A freshly installed baseline.
#[derive(Debug, Clone, Serialize)]
pub struct Recovery {
  pub post_id: i64,
  pub version: i64,
  pub format:  RevisionFormat,
  /// Plain text of the new baseline.
  pub raw:     String,
  /// Base64 merge state, for merge-format documents.
  pub state:   Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionGap {
  pub after:  i64,
  pub before: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
  pub post_id:          i64,
  pub initialized:      bool,
  pub healthy:          bool,
  pub format:           Option<RevisionFormat>,
  pub revision_count:   usize,
  pub latest_version:   Option<i64>,
  /// Edits not yet folded into the post.
  pub uncompacted:      usize,
  /// Informational; gaps are not faults.
  pub version_gaps:     Vec<VersionGap>,
  pub state_valid:      bool,
  /// Length of the resolved text in chars.
  pub text_length:      Option<usize>,
  /// Size of the encoded snapshot in bytes.
  pub state_bytes:      Option<usize>,
  /// Encoded bytes per text byte.
  pub bloat_ratio:      Option<f64>,
  pub snapshot_overdue: bool,
  pub error:            Option<String>,
}

impl<S: PostStore + 'static, K: KeyValue + 'static> SharedEdits<S, K> {
  // ── Recovery ──────────────────────────────────────────────────────────────

  /// Rebuild the document from the post's current content. Without `force`
  /// a healthy document is left alone and old rows are kept; with `force`
  /// the log is purged and replaced by the baseline.
  pub async fn recover_from_post_raw(
    &self,
    post_id: i64,
    force: bool,
  ) -> Result<Recovery> {
    let guard = self.locks.lock(post_id).await;
    self.recover_from_post_raw_locked(&guard, force).await
  }

  pub(crate) async fn recover_from_post_raw_locked(
    &self,
    guard: &DocumentGuard,
    force: bool,
  ) -> Result<Recovery> {
    let post_id = guard.post_id();
    let post = self.post(post_id).await?;
    if !force && self.health_check(post_id).await?.healthy {
      return Err(Error::RecoveryNotNeeded(post_id));
    }
    self.limiter.check(post_id).await?;

    let format = self.document_format(post_id).await?;
    let row = self
      .install_baseline(guard, format, &post.raw, SYSTEM_USER_ID, force)
      .await?;
    tracing::info!(post_id, version = row.version, force, "recovered from post");
    Ok(recovery(row, post.raw))
  }

  /// Rebuild the document from client-supplied text.
  pub async fn recover_from_text(
    &self,
    post_id: i64,
    user_id: i64,
    text: &str,
  ) -> Result<Recovery> {
    self.validator.check_length(text)?;
    let guard = self.locks.lock(post_id).await;
    self.post(post_id).await?;
    self.limiter.check(post_id).await?;

    let format = self.document_format(post_id).await?;
    let row = self
      .install_baseline(&guard, format, text, user_id, false)
      .await?;
    tracing::info!(post_id, version = row.version, user_id, "recovered from client text");
    Ok(recovery(row, text.to_owned()))
  }

  /// Run the corruption sub-protocol after an edit found the head state
  /// corrupt. Always yields the error describing the outcome to the client.
  pub(crate) async fn recover_corrupt_state(
    &self,
    post_id: i64,
    user_id: i64,
    recovery_text: Option<&str>,
  ) -> Error {
    tracing::warn!(post_id, with_text = recovery_text.is_some(), "corrupt state detected");
    self
      .try_recover_corrupt_state(post_id, user_id, recovery_text)
      .await
      .unwrap_or_else(|e| e)
  }

  async fn try_recover_corrupt_state(
    &self,
    post_id: i64,
    user_id: i64,
    recovery_text: Option<&str>,
  ) -> Result<Error> {
    if let Some(text) = recovery_text {
      let r = self.recover_from_text(post_id, user_id, text).await?;
      return Ok(Error::StateRecoveredFromClient { post_id, version: r.version });
    }
    if self.uncompacted_edits(post_id).await? == 0 {
      let r = self.recover_from_post_raw(post_id, true).await?;
      return Ok(Error::StateRecovered { post_id, version: r.version });
    }
    Ok(Error::NeedsRecoveryText(post_id))
  }

  /// Append (or, with `purge`, substitute) a resolved baseline holding
  /// `text`, and tell subscribers to resync.
  pub(crate) async fn install_baseline(
    &self,
    guard: &DocumentGuard,
    format: RevisionFormat,
    text: &str,
    user_id: i64,
    purge: bool,
  ) -> Result<Revision> {
    let post_id = guard.post_id();
    let raw = self.verified_snapshot(post_id, format, text)?;

    for _ in 0..=self.settings.max_rebase_attempts {
      let head = self
        .store
        .latest_revision(post_id)
        .await
        .map_err(Error::store)?
        .map_or(0, |r| r.version);
      let baseline = system_baseline(post_id, head + 1, format, user_id, &raw, text);

      let row = if purge {
        self
          .store
          .replace_with_baseline(baseline, head)
          .await
          .map_err(Error::store)?
      } else {
        self.store.insert_revision(baseline).await.map_err(Error::store)?
      };

      if let Some(row) = row {
        self.broadcast(post_id, ChannelMessage::Resync { version: Some(row.version) });
        return Ok(row);
      }
    }
    Err(Error::RevisionConflict {
      post_id,
      attempts: self.settings.max_rebase_attempts,
    })
  }

  /// Collapse the log into one merge baseline holding `text`, provided
  /// `head` is still the newest row. Returns `None` when an edit landed
  /// after `head`; that edit is kept and the next compaction folds it in.
  pub(crate) async fn rebaseline(
    &self,
    guard: &DocumentGuard,
    text: &str,
    head: i64,
  ) -> Result<Option<Revision>> {
    let post_id = guard.post_id();
    let raw = self.verified_snapshot(post_id, RevisionFormat::Merge, text)?;
    let baseline = system_baseline(
      post_id,
      head + 1,
      RevisionFormat::Merge,
      SYSTEM_USER_ID,
      &raw,
      text,
    );

    let row = self
      .store
      .replace_with_baseline(baseline, head)
      .await
      .map_err(Error::store)?;
    if let Some(row) = &row {
      self.broadcast(post_id, ChannelMessage::Resync { version: Some(row.version) });
    }
    Ok(row)
  }

  /// Encode `text` as a snapshot and check that it decodes back to `text`.
  fn verified_snapshot(
    &self,
    post_id: i64,
    format: RevisionFormat,
    text: &str,
  ) -> Result<String> {
    let raw = self.encode_snapshot(format, text);
    match self.decode_snapshot(format, &raw) {
      Ok(decoded) if decoded == text => Ok(raw),
      Ok(_) => Err(Error::RecoveryFailed {
        post_id,
        reason: "rebuilt state does not reproduce its text".to_owned(),
      }),
      Err(e) => Err(Error::RecoveryFailed { post_id, reason: e.to_string() }),
    }
  }

  // ── Diagnostics ───────────────────────────────────────────────────────────

  /// Walk the log and report on its state. Never writes.
  pub async fn health_check(&self, post_id: i64) -> Result<HealthReport> {
    let rows = self.store.revisions(post_id).await.map_err(Error::store)?;
    let mut report = HealthReport {
      post_id,
      initialized: !rows.is_empty(),
      healthy: false,
      format: rows.last().map(|r| r.format),
      revision_count: rows.len(),
      latest_version: rows.last().map(|r| r.version),
      uncompacted: 0,
      version_gaps: Vec::new(),
      state_valid: false,
      text_length: None,
      state_bytes: None,
      bloat_ratio: None,
      snapshot_overdue: false,
      error: None,
    };
    if rows.is_empty() {
      report.error = Some("shared edits are not initialized".to_owned());
      return Ok(report);
    }

    report.version_gaps = rows
      .windows(2)
      .filter(|w| w[1].version != w[0].version + 1)
      .map(|w| VersionGap { after: w[0].version, before: w[1].version })
      .collect();

    let compacted = rows
      .iter()
      .rposition(Revision::is_compacted)
      .map_or(0, |i| i + 1);
    report.uncompacted = count_edits(&rows[compacted..]);

    let Some(at) = rows.iter().rposition(|r| r.raw().is_some()) else {
      report.error = Some("no resolved snapshot".to_owned());
      return Ok(report);
    };
    let snapshot = &rows[at];
    let raw = snapshot.raw().unwrap_or_default();

    match self.replay(snapshot, &rows[at + 1..]) {
      Ok(text) => {
        let state_bytes = match snapshot.format {
          RevisionFormat::Patch => raw.len(),
          RevisionFormat::Merge => STANDARD.decode(raw).map_or(0, |b| b.len()),
        };
        report.state_valid = true;
        report.text_length = Some(text.chars().count());
        report.state_bytes = Some(state_bytes);
        report.bloat_ratio = Some(state_bytes as f64 / text.len().max(1) as f64);
        report.snapshot_overdue = snapshot.format == RevisionFormat::Merge
          && self.validator.should_snapshot(raw);
      }
      Err(e) => report.error = Some(e.to_string()),
    }

    report.healthy = report.state_valid;
    Ok(report)
  }

  // ── Helpers ───────────────────────────────────────────────────────────────

  /// The format of the newest row, or the configured default for an empty
  /// log.
  pub(crate) async fn document_format(&self, post_id: i64) -> Result<RevisionFormat> {
    Ok(
      self
        .store
        .latest_revision(post_id)
        .await
        .map_err(Error::store)?
        .map_or(self.settings.default_format, |r| r.format),
    )
  }

  pub(crate) async fn uncompacted_edits(&self, post_id: i64) -> Result<usize> {
    let since = self
      .store
      .last_compacted(post_id)
      .await
      .map_err(Error::store)?
      .map_or(0, |r| r.version);
    let rows = self
      .store
      .revisions_after(post_id, since)
      .await
      .map_err(Error::store)?;
    Ok(count_edits(&rows))
  }
}

fn count_edits(rows: &[Revision]) -> usize {
  rows
    .iter()
    .filter(|r| !r.revision.is_empty() && r.user_id != SYSTEM_USER_ID)
    .count()
}

fn system_baseline(
  post_id: i64,
  version: i64,
  format: RevisionFormat,
  user_id: i64,
  raw: &str,
  text: &str,
) -> NewRevision {
  NewRevision::baseline(
    post_id,
    version,
    format,
    format!("system-{}", Uuid::new_v4()),
    user_id,
    raw.to_owned(),
    state_hash(text),
  )
}

fn recovery(row: Revision, text: String) -> Recovery {
  let state = match row.format {
    RevisionFormat::Merge => row.raw().map(str::to_owned),
    RevisionFormat::Patch => None,
  };
  Recovery {
    post_id: row.post_id,
    version: row.version,
    format: row.format,
    raw: text,
    state,
  }
}
