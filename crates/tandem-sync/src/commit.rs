//! Compaction: folding the unresolved tail of the revision log into one
//! resolved snapshot and writing it through to the post.

use serde::Serialize;
use tandem_core::{
  hash::state_hash,
  post::{PostRevision, PublishOptions, Publication},
  revision::{Revision, RevisionFormat},
  store::PostStore,
};

use crate::{
  Error, Result, SharedEdits,
  kv::KeyValue,
  locks::DocumentGuard,
  service::SYSTEM_USER_ID,
};

/// The outcome of a compaction pass.
#[derive(Debug, Clone, Serialize)]
pub struct Commit {
  pub post_id:       i64,
  /// The last revision folded into the snapshot.
  pub version:       i64,
  /// Resolved plain text.
  pub raw:           String,
  /// Set when this pass wrote a new post revision.
  pub post_revision: Option<PostRevision>,
}

impl<S: PostStore + 'static, K: KeyValue + 'static> SharedEdits<S, K> {
  /// Compact the document and write the result through to the post.
  /// Returns `None` when the document has no snapshot to start from.
  pub async fn commit(&self, post_id: i64) -> Result<Option<Commit>> {
    let guard = self.locks.lock(post_id).await;
    self.commit_locked(&guard, true).await
  }

  /// Resolve the snapshot without touching the post.
  pub async fn resolve(&self, post_id: i64) -> Result<Option<Commit>> {
    let guard = self.locks.lock(post_id).await;
    self.commit_locked(&guard, false).await
  }

  pub(crate) async fn commit_locked(
    &self,
    guard: &DocumentGuard,
    apply: bool,
  ) -> Result<Option<Commit>> {
    let post_id = guard.post_id();
    let Some(snapshot) =
      self.store.latest_resolved(post_id).await.map_err(Error::store)?
    else {
      return Ok(None);
    };
    let tail = self
      .store
      .revisions_after(post_id, snapshot.version)
      .await
      .map_err(Error::store)?;

    let text = self.replay(&snapshot, &tail)?;
    let last = tail.last().unwrap_or(&snapshot);

    if last.raw().is_none() {
      // Only legacy rows are ever unresolved; their snapshot is plain text.
      self
        .store
        .resolve_revision(post_id, last.version, text.clone(), Some(state_hash(&text)))
        .await
        .map_err(Error::store)?;
      tracing::debug!(post_id, version = last.version, "materialised snapshot");
    }

    let mut commit = Commit {
      post_id,
      version: last.version,
      raw: text,
      post_revision: None,
    };
    if last.is_compacted() || !apply {
      return Ok(Some(commit));
    }

    let post = self.post(post_id).await?;
    let since = self
      .store
      .last_compacted(post_id)
      .await
      .map_err(Error::store)?
      .map_or(0, |r| r.version);
    let contributors = contributors(
      &self.store.revisions_after(post_id, since).await.map_err(Error::store)?,
    );
    let names = self
      .store
      .usernames(contributors.clone())
      .await
      .map_err(Error::store)?;

    let edit_reason = if names.is_empty() {
      post.edit_reason.clone().unwrap_or_default()
    } else {
      merge_edit_reason(
        &self.settings.edit_reason_template,
        post.edit_reason.as_deref(),
        &names,
      )
    };

    commit.post_revision = self
      .store
      .publish(Publication {
        post_id,
        raw: commit.raw.clone(),
        edit_reason,
        user_id: contributors.last().copied().unwrap_or(post.user_id),
        options: PublishOptions::consolidation(),
        compacted_version: last.version,
      })
      .await
      .map_err(Error::store)?;

    tracing::info!(
      post_id,
      version = last.version,
      contributors = contributors.len(),
      published = commit.post_revision.is_some(),
      "compacted shared edits"
    );

    if last.format == RevisionFormat::Merge
      && last.raw().is_some_and(|raw| self.validator.should_snapshot(raw))
    {
      match self.rebaseline(guard, &commit.raw, last.version).await? {
        Some(fresh) => {
          tracing::info!(post_id, version = fresh.version, "rebaselined bloated state");
          commit.version = fresh.version;
        }
        None => {
          tracing::debug!(post_id, version = last.version, "log moved, rebaseline deferred");
        }
      }
    }

    Ok(Some(commit))
  }

  /// Materialise the text at the end of `tail`, starting from `snapshot`.
  pub(crate) fn replay(&self, snapshot: &Revision, tail: &[Revision]) -> Result<String> {
    let raw = snapshot.raw().unwrap_or_default();
    let mut text = self
      .decode_snapshot(snapshot.format, raw)
      .map_err(|_| tandem_core::Error::StateCorruption {
        post_id: snapshot.post_id,
        version: snapshot.version,
      })?;

    for row in tail {
      if let Some(op) = row.patch()? {
        text = op.apply(&text).map_err(tandem_core::Error::from)?;
      }
    }
    Ok(text)
  }
}

/// Distinct editing users, in order of first contribution. Baselines and
/// system rows are not edits.
fn contributors(rows: &[Revision]) -> Vec<i64> {
  let mut ids = Vec::new();
  for row in rows {
    if row.revision.is_empty() || row.user_id == SYSTEM_USER_ID {
      continue;
    }
    if !ids.contains(&row.user_id) {
      ids.push(row.user_id);
    }
  }
  ids
}

/// Render `template` with the union of names already credited in `existing`
/// and `names`, keeping first-seen order.
pub(crate) fn merge_edit_reason(
  template: &str,
  existing: Option<&str>,
  names: &[String],
) -> String {
  let (prefix, suffix) = template.split_once("{users}").unwrap_or((template, ""));

  let mut all: Vec<String> = existing
    .and_then(|r| r.strip_prefix(prefix))
    .and_then(|r| r.strip_suffix(suffix))
    .map(|inner| {
      inner
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
    })
    .unwrap_or_default();

  for name in names {
    if !all.contains(name) {
      all.push(name.clone());
    }
  }
  template.replace("{users}", &all.join(", "))
}
