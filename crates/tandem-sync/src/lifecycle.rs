//! Turning shared editing on and off for a post, and the staff reset.

use tandem_core::{
  revision::RevisionFormat,
  store::PostStore,
};

use crate::{
  Error, Result, SharedEdits,
  kv::KeyValue,
  recovery::Recovery,
  service::SYSTEM_USER_ID,
  transport::ChannelMessage,
};

impl<S: PostStore + 'static, K: KeyValue + 'static> SharedEdits<S, K> {
  /// Enable shared edits, seeding version 1 from the post when the log is
  /// empty. Returns the current head version.
  pub async fn enable(
    &self,
    post_id: i64,
    format: Option<RevisionFormat>,
  ) -> Result<i64> {
    let guard = self.locks.lock(post_id).await;
    let post = self.post(post_id).await?;

    let version = match self.store.latest_revision(post_id).await.map_err(Error::store)? {
      Some(head) => head.version,
      None => {
        let format = format.unwrap_or(self.settings.default_format);
        self
          .install_baseline(&guard, format, &post.raw, SYSTEM_USER_ID, false)
          .await?
          .version
      }
    };
    self.store.set_shared_edits(post_id, true).await.map_err(Error::store)?;

    tracing::info!(post_id, version, "shared edits enabled");
    Ok(version)
  }

  /// Commit outstanding edits, drop the revision log, and clear the flag.
  pub async fn disable(&self, post_id: i64) -> Result<()> {
    let guard = self.locks.lock(post_id).await;
    self.post(post_id).await?;

    self.commit_locked(&guard, true).await?;
    let removed = self.store.delete_revisions(post_id).await.map_err(Error::store)?;
    self.store.set_shared_edits(post_id, false).await.map_err(Error::store)?;
    self.broadcast(post_id, ChannelMessage::Resync { version: None });

    tracing::info!(post_id, removed, "shared edits disabled");
    Ok(())
  }

  /// Commit what can be committed, then rebuild the log from the post. Not
  /// subject to the recovery rate limit.
  pub async fn reset(&self, post_id: i64) -> Result<Recovery> {
    let guard = self.locks.lock(post_id).await;
    let format = self.document_format(post_id).await?;
    self.head(post_id).await?;

    // A corrupt log cannot be committed; the reset replaces it regardless.
    if let Err(e) = self.commit_locked(&guard, true).await {
      tracing::warn!(post_id, error = %e, "commit before reset failed");
    }
    let post = self.post(post_id).await?;
    let row = self
      .install_baseline(&guard, format, &post.raw, SYSTEM_USER_ID, true)
      .await?;

    tracing::info!(post_id, version = row.version, "shared edits reset");
    Ok(Recovery {
      post_id,
      version: row.version,
      format,
      state: (format == RevisionFormat::Merge).then(|| row.raw().unwrap_or_default().to_owned()),
      raw: post.raw,
    })
  }
}
