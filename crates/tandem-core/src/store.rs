//! Storage traits for the revision log and the document of record.
//!
//! Implemented by storage backends (e.g. `tandem-store-sqlite`). The sync
//! service depends on these abstractions, never on a concrete backend, so the
//! compaction and revision algorithms can be exercised against any store.

use std::future::Future;

use crate::{
  post::{Post, PostRevision, Publication},
  revision::{NewRevision, Revision},
};

// ─── Revision log ────────────────────────────────────────────────────────────

/// The append-only revision log.
///
/// Writers only ever append through [`RevisionStore::insert_revision`], whose
/// conditional insert is the sole concurrency primitive for edit acceptance.
/// All methods return `Send` futures so the trait can be used behind `axum`.
pub trait RevisionStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Append a revision if, and only if, no row for the post has a version
  /// greater than or equal to `input.version`. Returns `None` when another
  /// writer got there first.
  fn insert_revision(
    &self,
    input: NewRevision,
  ) -> impl Future<Output = Result<Option<Revision>, Self::Error>> + Send + '_;

  fn revision(
    &self,
    post_id: i64,
    version: i64,
  ) -> impl Future<Output = Result<Option<Revision>, Self::Error>> + Send + '_;

  /// The row with the highest version, resolved or not.
  fn latest_revision(
    &self,
    post_id: i64,
  ) -> impl Future<Output = Result<Option<Revision>, Self::Error>> + Send + '_;

  /// The highest-version row carrying a snapshot.
  fn latest_resolved(
    &self,
    post_id: i64,
  ) -> impl Future<Output = Result<Option<Revision>, Self::Error>> + Send + '_;

  /// Rows with `version > after`, oldest first.
  fn revisions_after(
    &self,
    post_id: i64,
    after: i64,
  ) -> impl Future<Output = Result<Vec<Revision>, Self::Error>> + Send + '_;

  /// Every row for the post, oldest first.
  fn revisions(
    &self,
    post_id: i64,
  ) -> impl Future<Output = Result<Vec<Revision>, Self::Error>> + Send + '_;

  /// The highest-version row already folded into the document of record.
  fn last_compacted(
    &self,
    post_id: i64,
  ) -> impl Future<Output = Result<Option<Revision>, Self::Error>> + Send + '_;

  /// Materialise (or replace) the snapshot of an existing row.
  fn resolve_revision(
    &self,
    post_id: i64,
    version: i64,
    raw: String,
    state_hash: Option<String>,
  ) -> impl Future<Output = Result<Revision, Self::Error>> + Send + '_;

  /// Atomically purge every row for the post and insert `baseline` in their
  /// place, provided the newest row is still `expected_head` (`0` for an
  /// empty log). Returns `None`, leaving the log untouched, when another
  /// writer has appended since.
  fn replace_with_baseline(
    &self,
    baseline: NewRevision,
    expected_head: i64,
  ) -> impl Future<Output = Result<Option<Revision>, Self::Error>> + Send + '_;

  /// Delete every row for the post. Returns the number of rows removed.
  fn delete_revisions(
    &self,
    post_id: i64,
  ) -> impl Future<Output = Result<u64, Self::Error>> + Send + '_;
}

// ─── Document of record ──────────────────────────────────────────────────────

/// The minimal surface of the external post store that compaction and
/// recovery need. Shares the revision store's error type because
/// [`PostStore::publish`] spans both in one transaction.
pub trait PostStore: RevisionStore {
  fn get_post(
    &self,
    post_id: i64,
  ) -> impl Future<Output = Result<Option<Post>, Self::Error>> + Send + '_;

  /// Flip the shared-edits flag. Returns `false` if the post does not exist.
  fn set_shared_edits(
    &self,
    post_id: i64,
    enabled: bool,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  /// Usernames for the given ids, in the order of `user_ids`. Unknown ids
  /// are skipped.
  fn usernames(
    &self,
    user_ids: Vec<i64>,
  ) -> impl Future<Output = Result<Vec<String>, Self::Error>> + Send + '_;

  /// Write resolved content through to the post.
  ///
  /// In one transaction: append a post revision, update the post's raw and
  /// edit reason, and stamp `post_revision_id` on the compacted log row.
  /// When the raw text is unchanged no post revision is written, the row is
  /// stamped with the post's current revision, and `None` is returned.
  fn publish(
    &self,
    publication: Publication,
  ) -> impl Future<Output = Result<Option<PostRevision>, Self::Error>> + Send + '_;

  fn post_revisions(
    &self,
    post_id: i64,
  ) -> impl Future<Output = Result<Vec<PostRevision>, Self::Error>> + Send + '_;
}
