//! Integration tests for `SharedEdits` against an in-memory SQLite store.

use std::{sync::Mutex, time::Duration};

use base64::{Engine as _, engine::general_purpose::STANDARD};
use tandem_core::{
  merge::MergeEngine,
  patch::Operation,
  post::{Post, PostRevision, Publication},
  revision::{NewRevision, Revision, RevisionFormat},
  store::{PostStore, RevisionStore},
  validation::Limits,
};
use tandem_store_sqlite::SqliteStore;

use crate::{
  ChannelMessage, EditPayload, EditRequest, Error, SharedEdits, SyncSettings,
  kv::KeyValue as _,
  scheduler::commit_key,
};

const BASE: &str = "0123456\n0123456\n0123456\n";
const ALICE: i64 = 1;
const BOB: i64 = 2;

async fn service_with(
  settings: SyncSettings,
  raw: &str,
) -> (SharedEdits<SqliteStore>, SqliteStore, i64) {
  let store = SqliteStore::open_in_memory().await.expect("in-memory store");
  store.upsert_user(ALICE, "alice".into()).await.unwrap();
  store.upsert_user(BOB, "bob".into()).await.unwrap();
  let post = store.create_post(ALICE, raw.into()).await.unwrap();
  (SharedEdits::new(store.clone(), settings), store, post.post_id)
}

async fn service(raw: &str) -> (SharedEdits<SqliteStore>, SqliteStore, i64) {
  service_with(SyncSettings::default(), raw).await
}

fn patch_edit(post_id: i64, user_id: i64, json: &str, version: i64) -> EditRequest {
  EditRequest {
    post_id,
    user_id,
    client_id: format!("client-{user_id}"),
    payload: EditPayload::Patch {
      operation: Operation::from_json(json).unwrap(),
      version,
    },
    cursor: None,
    awareness: None,
  }
}

fn merge_edit(post_id: i64, user_id: i64, update: String) -> EditRequest {
  EditRequest {
    post_id,
    user_id,
    client_id: format!("client-{user_id}"),
    payload: EditPayload::Merge {
      update,
      state_vector: None,
      allow_blank_state: false,
      recovery_text: None,
    },
    cursor: None,
    awareness: None,
  }
}

/// A client-side update turning the base64 `state` into `text`.
fn rewrite(state: &str, text: &str) -> String {
  let engine = MergeEngine::new();
  let session = engine.session();
  let mut doc = session.decode_state(&STANDARD.decode(state).unwrap()).unwrap();
  STANDARD.encode(session.diff_text(&mut doc, text))
}

fn text_of(state: &str) -> String {
  MergeEngine::new()
    .text_from_state(&STANDARD.decode(state).unwrap())
    .unwrap()
}

async fn merge_state(svc: &SharedEdits<SqliteStore>, post_id: i64) -> String {
  svc.latest(post_id).await.unwrap().state.expect("merge state")
}

// ─── Legacy patch path ───────────────────────────────────────────────────────

#[tokio::test]
async fn concurrent_patches_are_rebased() {
  let (svc, store, post_id) = service(BASE).await;
  assert_eq!(svc.enable(post_id, Some(RevisionFormat::Patch)).await.unwrap(), 1);

  let first = svc
    .submit_edit(patch_edit(post_id, ALICE, r#"[8, -7, "mister", 9]"#, 1))
    .await
    .unwrap();
  assert_eq!(first.version, 2);

  // Written against version 1 as well; must land after the first edit.
  let second = svc
    .submit_edit(patch_edit(post_id, BOB, r#"[16, -7, "hello", 1]"#, 1))
    .await
    .unwrap();
  assert_eq!(second.version, 3);

  let commit = svc.commit(post_id).await.unwrap().unwrap();
  assert_eq!(commit.raw, "0123456\nmister\nhello\n");
  assert_eq!(commit.version, 3);

  let post = store.get_post(post_id).await.unwrap().unwrap();
  assert_eq!(post.raw, "0123456\nmister\nhello\n");
  assert_eq!(
    post.edit_reason.as_deref(),
    Some("Edited collaboratively by alice, bob")
  );
}

#[tokio::test]
async fn versions_stay_unique_under_contention() {
  let (svc, store, post_id) = service("abc").await;
  svc.enable(post_id, Some(RevisionFormat::Patch)).await.unwrap();

  let handles: Vec<_> = (0..6)
    .map(|i| {
      let svc = svc.clone();
      tokio::spawn(async move {
        svc
          .submit_edit(patch_edit(post_id, ALICE, &format!(r#"[3, "{i}"]"#), 1))
          .await
      })
    })
    .collect();
  for h in handles {
    h.await.unwrap().unwrap();
  }

  let versions: Vec<i64> = store
    .revisions(post_id)
    .await
    .unwrap()
    .iter()
    .map(|r| r.version)
    .collect();
  assert_eq!(versions, (1..=7).collect::<Vec<_>>());

  let commit = svc.commit(post_id).await.unwrap().unwrap();
  assert_eq!(commit.raw.len(), 9);
  assert!(commit.raw.starts_with("abc"));
}

#[tokio::test]
async fn patch_rejections() {
  let (svc, _store, post_id) = service("abc").await;

  assert!(matches!(
    svc.submit_edit(patch_edit(post_id, ALICE, "[3]", 1)).await,
    Err(Error::NotInitialized(_))
  ));

  svc.enable(post_id, Some(RevisionFormat::Patch)).await.unwrap();
  assert!(matches!(
    svc.submit_edit(patch_edit(post_id, ALICE, "[3]", 5)).await,
    Err(Error::UnknownVersion { claimed: 5, latest: 1, .. })
  ));
  assert!(matches!(
    svc.submit_edit(patch_edit(post_id, ALICE, r#"[2, "x"]"#, 1)).await,
    Err(Error::Core(tandem_core::Error::Patch(_)))
  ));
  assert!(matches!(
    svc
      .submit_edit(merge_edit(post_id, ALICE, STANDARD.encode([1, 2, 3])))
      .await,
    Err(Error::FormatMismatch(_))
  ));

  let mut bad_client = patch_edit(post_id, ALICE, "[3]", 1);
  bad_client.client_id = "x".repeat(256);
  assert!(matches!(
    svc.submit_edit(bad_client).await,
    Err(Error::Core(tandem_core::Error::Validation(_)))
  ));
}

#[tokio::test]
async fn rebase_chain_is_bounded() {
  let settings = SyncSettings { max_rebase_attempts: 0, ..SyncSettings::default() };
  let (svc, _store, post_id) = service_with(settings, "abc").await;
  svc.enable(post_id, Some(RevisionFormat::Patch)).await.unwrap();
  svc.submit_edit(patch_edit(post_id, ALICE, r#"[3, "d"]"#, 1)).await.unwrap();

  assert!(matches!(
    svc.submit_edit(patch_edit(post_id, BOB, r#"["z", 3]"#, 1)).await,
    Err(Error::RevisionConflict { .. })
  ));
}

// ─── Compaction ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn compaction_is_idempotent() {
  let (svc, store, post_id) = service(BASE).await;
  svc.enable(post_id, Some(RevisionFormat::Patch)).await.unwrap();
  svc
    .submit_edit(patch_edit(post_id, ALICE, r#"[8, -7, "mister", 9]"#, 1))
    .await
    .unwrap();

  let first = svc.commit(post_id).await.unwrap().unwrap();
  assert!(first.post_revision.is_some());
  let stamped = store.revision(post_id, 2).await.unwrap().unwrap().post_revision_id;
  assert!(stamped.is_some());

  let second = svc.commit(post_id).await.unwrap().unwrap();
  assert!(second.post_revision.is_none());
  assert_eq!(second.raw, first.raw);
  assert_eq!(store.post_revisions(post_id).await.unwrap().len(), 2);
  assert_eq!(
    store.revision(post_id, 2).await.unwrap().unwrap().post_revision_id,
    stamped
  );
}

#[tokio::test]
async fn resolve_does_not_touch_the_post() {
  let (svc, store, post_id) = service("abc").await;
  svc.enable(post_id, Some(RevisionFormat::Patch)).await.unwrap();
  svc.submit_edit(patch_edit(post_id, ALICE, r#"[3, "d"]"#, 1)).await.unwrap();

  let latest = svc.latest(post_id).await.unwrap();
  assert_eq!(latest.raw, "abcd");
  assert_eq!(latest.version, 2);
  assert!(latest.state.is_none());

  assert_eq!(store.get_post(post_id).await.unwrap().unwrap().raw, "abc");
  let head = store.latest_resolved(post_id).await.unwrap().unwrap();
  assert_eq!(head.version, 2);
  assert!(!head.is_compacted());
}

#[tokio::test]
async fn commit_without_snapshot_is_a_noop() {
  let (svc, _store, post_id) = service("abc").await;
  assert!(svc.commit(post_id).await.unwrap().is_none());
}

fn tiny_snapshots() -> SyncSettings {
  let limits = Limits { snapshot_threshold_bytes: 1, ..Limits::default() };
  SyncSettings { limits, ..SyncSettings::default() }
}

#[tokio::test]
async fn bloated_merge_state_is_rebaselined() {
  let (svc, store, post_id) = service_with(tiny_snapshots(), "hello").await;
  svc.enable(post_id, Some(RevisionFormat::Merge)).await.unwrap();
  let base = merge_state(&svc, post_id).await;
  svc
    .submit_edit(merge_edit(post_id, ALICE, rewrite(&base, "hello world")))
    .await
    .unwrap();

  let report = svc.health_check(post_id).await.unwrap();
  assert!(report.snapshot_overdue);
  let state_bytes = report.state_bytes.unwrap();
  assert_eq!(
    report.bloat_ratio,
    Some(state_bytes as f64 / "hello world".len() as f64)
  );

  let mut rx = svc.hub().subscribe(post_id);
  let commit = svc.commit(post_id).await.unwrap().unwrap();
  assert_eq!(commit.raw, "hello world");
  assert_eq!(commit.version, 3);
  assert_eq!(rx.recv().await.unwrap(), ChannelMessage::Resync { version: Some(3) });

  let rows = store.revisions(post_id).await.unwrap();
  assert_eq!(rows.len(), 1);
  assert_eq!(rows[0].version, 3);
  assert!(rows[0].revision.is_empty());
  assert_eq!(text_of(rows[0].raw().unwrap()), "hello world");
  assert_eq!(store.get_post(post_id).await.unwrap().unwrap().raw, "hello world");
  assert_eq!(svc.latest(post_id).await.unwrap().raw, "hello world");
}

/// SQLite, except that one queued edit is submitted through a second
/// service as soon as compaction has published.
struct EditAfterPublish {
  inner:   SqliteStore,
  pending: Mutex<Option<(SharedEdits<SqliteStore>, EditRequest)>>,
}

impl RevisionStore for EditAfterPublish {
  type Error = tandem_store_sqlite::Error;

  async fn insert_revision(
    &self,
    input: NewRevision,
  ) -> Result<Option<Revision>, Self::Error> {
    self.inner.insert_revision(input).await
  }

  async fn revision(
    &self,
    post_id: i64,
    version: i64,
  ) -> Result<Option<Revision>, Self::Error> {
    self.inner.revision(post_id, version).await
  }

  async fn latest_revision(&self, post_id: i64) -> Result<Option<Revision>, Self::Error> {
    self.inner.latest_revision(post_id).await
  }

  async fn latest_resolved(&self, post_id: i64) -> Result<Option<Revision>, Self::Error> {
    self.inner.latest_resolved(post_id).await
  }

  async fn revisions_after(
    &self,
    post_id: i64,
    after: i64,
  ) -> Result<Vec<Revision>, Self::Error> {
    self.inner.revisions_after(post_id, after).await
  }

  async fn revisions(&self, post_id: i64) -> Result<Vec<Revision>, Self::Error> {
    self.inner.revisions(post_id).await
  }

  async fn last_compacted(&self, post_id: i64) -> Result<Option<Revision>, Self::Error> {
    self.inner.last_compacted(post_id).await
  }

  async fn resolve_revision(
    &self,
    post_id: i64,
    version: i64,
    raw: String,
    state_hash: Option<String>,
  ) -> Result<Revision, Self::Error> {
    self.inner.resolve_revision(post_id, version, raw, state_hash).await
  }

  async fn replace_with_baseline(
    &self,
    baseline: NewRevision,
    expected_head: i64,
  ) -> Result<Option<Revision>, Self::Error> {
    self.inner.replace_with_baseline(baseline, expected_head).await
  }

  async fn delete_revisions(&self, post_id: i64) -> Result<u64, Self::Error> {
    self.inner.delete_revisions(post_id).await
  }
}

impl PostStore for EditAfterPublish {
  async fn get_post(&self, post_id: i64) -> Result<Option<Post>, Self::Error> {
    self.inner.get_post(post_id).await
  }

  async fn set_shared_edits(
    &self,
    post_id: i64,
    enabled: bool,
  ) -> Result<bool, Self::Error> {
    self.inner.set_shared_edits(post_id, enabled).await
  }

  async fn usernames(&self, user_ids: Vec<i64>) -> Result<Vec<String>, Self::Error> {
    self.inner.usernames(user_ids).await
  }

  async fn publish(
    &self,
    publication: Publication,
  ) -> Result<Option<PostRevision>, Self::Error> {
    let published = self.inner.publish(publication).await?;
    let pending = self.pending.lock().unwrap().take();
    if let Some((editor, request)) = pending {
      editor.submit_edit(request).await.expect("edit during compaction");
    }
    Ok(published)
  }

  async fn post_revisions(&self, post_id: i64) -> Result<Vec<PostRevision>, Self::Error> {
    self.inner.post_revisions(post_id).await
  }
}

#[tokio::test]
async fn rebaseline_keeps_edits_accepted_during_compaction() {
  let (editor, store, post_id) = service_with(tiny_snapshots(), "hello").await;
  editor.enable(post_id, Some(RevisionFormat::Merge)).await.unwrap();
  let base = merge_state(&editor, post_id).await;
  editor
    .submit_edit(merge_edit(post_id, ALICE, rewrite(&base, "hello world")))
    .await
    .unwrap();
  let head = merge_state(&editor, post_id).await;
  let late = merge_edit(post_id, BOB, rewrite(&head, "hello world, from bob"));

  let compactor = SharedEdits::new(
    EditAfterPublish {
      inner:   store.clone(),
      pending: Mutex::new(Some((editor, late))),
    },
    tiny_snapshots(),
  );

  // Bob's edit lands as version 3 after version 2 was published, so the log
  // must not be collapsed.
  let first = compactor.commit(post_id).await.unwrap().unwrap();
  assert_eq!(first.raw, "hello world");
  assert_eq!(first.version, 2);
  let versions: Vec<i64> = store
    .revisions(post_id)
    .await
    .unwrap()
    .iter()
    .map(|r| r.version)
    .collect();
  assert_eq!(versions, vec![1, 2, 3]);

  let mut rx = compactor.hub().subscribe(post_id);
  let second = compactor.commit(post_id).await.unwrap().unwrap();
  assert_eq!(second.raw, "hello world, from bob");
  assert_eq!(second.version, 4);
  assert_eq!(rx.recv().await.unwrap(), ChannelMessage::Resync { version: Some(4) });

  let rows = store.revisions(post_id).await.unwrap();
  assert_eq!(rows.len(), 1);
  assert_eq!(text_of(rows[0].raw().unwrap()), "hello world, from bob");
  assert_eq!(
    store.get_post(post_id).await.unwrap().unwrap().raw,
    "hello world, from bob"
  );
}

// ─── Merge path ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn merge_edits_commute() {
  let (svc, store, post_id) = service("hello").await;
  svc.enable(post_id, Some(RevisionFormat::Merge)).await.unwrap();
  let base = merge_state(&svc, post_id).await;

  let a = svc
    .submit_edit(merge_edit(post_id, ALICE, rewrite(&base, "hello world")))
    .await
    .unwrap();
  let b = svc
    .submit_edit(merge_edit(post_id, BOB, rewrite(&base, "oh hello")))
    .await
    .unwrap();
  assert_eq!((a.version, b.version), (2, 3));

  let latest = svc.latest(post_id).await.unwrap();
  assert_eq!(latest.raw, "oh hello world");
  assert_eq!(Some(latest.state_hash.clone()), b.state_hash);
  assert_eq!(text_of(&latest.state.unwrap()), "oh hello world");

  svc.commit(post_id).await.unwrap();
  assert_eq!(store.get_post(post_id).await.unwrap().unwrap().raw, "oh hello world");
}

#[tokio::test]
async fn duplicate_merge_update_is_harmless() {
  let (svc, _store, post_id) = service("hello").await;
  svc.enable(post_id, Some(RevisionFormat::Merge)).await.unwrap();
  let base = merge_state(&svc, post_id).await;
  let update = rewrite(&base, "hello!");

  svc.submit_edit(merge_edit(post_id, ALICE, update.clone())).await.unwrap();
  svc.submit_edit(merge_edit(post_id, ALICE, update)).await.unwrap();
  assert_eq!(svc.latest(post_id).await.unwrap().raw, "hello!");
}

#[tokio::test]
async fn client_behind_receives_missing_update() {
  let (svc, _store, post_id) = service("hello").await;
  svc.enable(post_id, Some(RevisionFormat::Merge)).await.unwrap();
  let base = merge_state(&svc, post_id).await;

  svc
    .submit_edit(merge_edit(post_id, BOB, rewrite(&base, "oh hello")))
    .await
    .unwrap();

  // Alice edits from the original base and reports her own state vector.
  let engine = MergeEngine::new();
  let session = engine.session();
  let mut doc = session.decode_state(&STANDARD.decode(&base).unwrap()).unwrap();
  let update = session.diff_text(&mut doc, "hello world");
  let sv = session.encode_state_vector(&doc);

  let mut request = merge_edit(post_id, ALICE, STANDARD.encode(&update));
  if let EditPayload::Merge { state_vector, .. } = &mut request.payload {
    *state_vector = Some(STANDARD.encode(&sv));
  }
  let accepted = svc.submit_edit(request).await.unwrap();

  let missing = STANDARD.decode(accepted.missing_update.unwrap()).unwrap();
  session.apply_update(&mut doc, &missing).unwrap();
  assert_eq!(session.text(&doc), "oh hello world");
}

#[tokio::test]
async fn diverged_client_is_told_after_acceptance() {
  let (svc, store, post_id) = service("hello").await;
  svc.enable(post_id, Some(RevisionFormat::Merge)).await.unwrap();
  let base = merge_state(&svc, post_id).await;

  let engine = MergeEngine::new();
  let session = engine.session();
  let mut doc = session.decode_state(&STANDARD.decode(&base).unwrap()).unwrap();
  let sent = session.diff_text(&mut doc, "hello world");
  // A local change the server never receives.
  session.diff_text(&mut doc, "hello world!!");
  let sv = session.encode_state_vector(&doc);

  let mut request = merge_edit(post_id, ALICE, STANDARD.encode(&sent));
  if let EditPayload::Merge { state_vector, .. } = &mut request.payload {
    *state_vector = Some(STANDARD.encode(&sv));
  }
  assert!(matches!(
    svc.submit_edit(request).await,
    Err(Error::StateDiverged { version: 2, .. })
  ));
  assert_eq!(store.latest_revision(post_id).await.unwrap().unwrap().version, 2);
}

#[tokio::test]
async fn length_limit_only_blocks_growth() {
  let limits = Limits { max_post_length: Some(100), ..Limits::default() };
  let settings = SyncSettings { limits, ..SyncSettings::default() };

  let (svc, _store, post_id) = service_with(settings.clone(), &"a".repeat(90)).await;
  svc.enable(post_id, Some(RevisionFormat::Merge)).await.unwrap();
  let base = merge_state(&svc, post_id).await;
  assert!(matches!(
    svc
      .submit_edit(merge_edit(post_id, ALICE, rewrite(&base, &"a".repeat(150))))
      .await,
    Err(Error::Core(tandem_core::Error::PostLengthExceeded { limit: 100, length: 150 }))
  ));

  let (svc, _store, post_id) = service_with(settings, &"a".repeat(150)).await;
  svc.enable(post_id, Some(RevisionFormat::Merge)).await.unwrap();
  let base = merge_state(&svc, post_id).await;
  let accepted = svc
    .submit_edit(merge_edit(post_id, ALICE, rewrite(&base, &"a".repeat(120))))
    .await;
  assert!(accepted.is_ok());
}

#[tokio::test]
async fn blank_guard() {
  let (svc, _store, post_id) = service("something").await;
  svc.enable(post_id, Some(RevisionFormat::Merge)).await.unwrap();
  let base = merge_state(&svc, post_id).await;
  let update = rewrite(&base, "");

  assert!(matches!(
    svc.submit_edit(merge_edit(post_id, ALICE, update.clone())).await,
    Err(Error::Core(tandem_core::Error::BlankStateRejected(_)))
  ));

  let mut request = merge_edit(post_id, ALICE, update);
  if let EditPayload::Merge { allow_blank_state, .. } = &mut request.payload {
    *allow_blank_state = true;
  }
  svc.submit_edit(request).await.unwrap();
  assert_eq!(svc.latest(post_id).await.unwrap().raw, "");
}

#[tokio::test]
async fn accepted_edits_are_published() {
  let (svc, _store, post_id) = service("hello").await;
  svc.enable(post_id, Some(RevisionFormat::Merge)).await.unwrap();
  let base = merge_state(&svc, post_id).await;
  let mut rx = svc.hub().subscribe(post_id);

  let update = rewrite(&base, "hello!");
  svc.submit_edit(merge_edit(post_id, BOB, update.clone())).await.unwrap();

  match rx.recv().await.unwrap() {
    ChannelMessage::Edit { version, update: sent, client_id, user_id, .. } => {
      assert_eq!(version, 2);
      assert_eq!(sent, update);
      assert_eq!(client_id, "client-2");
      assert_eq!(user_id, BOB);
    }
    other => panic!("unexpected message {other:?}"),
  }
}

// ─── Corruption and recovery ─────────────────────────────────────────────────

fn garbage() -> String { STANDARD.encode([0xFF; 16]) }

#[tokio::test]
async fn corruption_is_detected_and_recovered() {
  let (svc, store, post_id) = service("hello world").await;
  svc.enable(post_id, Some(RevisionFormat::Merge)).await.unwrap();
  let base = merge_state(&svc, post_id).await;
  svc
    .submit_edit(merge_edit(post_id, ALICE, rewrite(&base, "hello brave world")))
    .await
    .unwrap();
  svc.commit(post_id).await.unwrap();

  assert!(svc.health_check(post_id).await.unwrap().healthy);
  store.resolve_revision(post_id, 2, garbage(), None).await.unwrap();

  let report = svc.health_check(post_id).await.unwrap();
  assert!(report.initialized);
  assert!(!report.healthy);
  assert!(!report.state_valid);
  assert!(report.error.is_some());
  assert!(matches!(
    svc.resolve(post_id).await,
    Err(Error::Core(tandem_core::Error::StateCorruption { version: 2, .. }))
  ));

  let recovery = svc.recover_from_post_raw(post_id, false).await.unwrap();
  assert_eq!(recovery.version, 3);
  assert_eq!(recovery.raw, "hello brave world");
  assert_eq!(text_of(&recovery.state.unwrap()), "hello brave world");

  let report = svc.health_check(post_id).await.unwrap();
  assert!(report.healthy);
  assert_eq!(report.text_length, Some("hello brave world".len()));
}

#[tokio::test]
async fn healthy_documents_need_no_recovery() {
  let (svc, _store, post_id) = service("fine").await;
  svc.enable(post_id, None).await.unwrap();
  assert!(matches!(
    svc.recover_from_post_raw(post_id, false).await,
    Err(Error::RecoveryNotNeeded(_))
  ));
}

#[tokio::test]
async fn corrupt_head_with_pending_edits_needs_client_text() {
  let (svc, store, post_id) = service("abc").await;
  svc.enable(post_id, Some(RevisionFormat::Merge)).await.unwrap();
  let base = merge_state(&svc, post_id).await;
  svc
    .submit_edit(merge_edit(post_id, ALICE, rewrite(&base, "abcd")))
    .await
    .unwrap();
  store.resolve_revision(post_id, 2, garbage(), None).await.unwrap();

  let update = rewrite(&base, "abcde");
  assert!(matches!(
    svc.submit_edit(merge_edit(post_id, ALICE, update.clone())).await,
    Err(Error::NeedsRecoveryText(_))
  ));

  let mut request = merge_edit(post_id, ALICE, update);
  if let EditPayload::Merge { recovery_text, .. } = &mut request.payload {
    *recovery_text = Some("abcd from client".into());
  }
  assert!(matches!(
    svc.submit_edit(request).await,
    Err(Error::StateRecoveredFromClient { version: 3, .. })
  ));
  assert_eq!(svc.latest(post_id).await.unwrap().raw, "abcd from client");
}

#[tokio::test]
async fn corrupt_head_without_pending_edits_recovers_from_post() {
  let (svc, store, post_id) = service("abc").await;
  svc.enable(post_id, Some(RevisionFormat::Merge)).await.unwrap();
  store.resolve_revision(post_id, 1, garbage(), None).await.unwrap();

  let mut rx = svc.hub().subscribe(post_id);
  let latest = svc.latest(post_id).await.unwrap();
  assert_eq!(latest.raw, "abc");
  assert_eq!(latest.version, 2);
  assert_eq!(store.revisions(post_id).await.unwrap().len(), 1);
  assert_eq!(
    rx.recv().await.unwrap(),
    ChannelMessage::Resync { version: Some(2) }
  );
}

#[tokio::test]
async fn recovery_is_rate_limited() {
  let (svc, _store, post_id) = service("abc").await;
  svc.enable(post_id, None).await.unwrap();

  svc.recover_from_post_raw(post_id, true).await.unwrap();
  match svc.recover_from_post_raw(post_id, true).await {
    Err(Error::RateLimited { retry_after, .. }) => {
      assert!(retry_after <= Duration::from_secs(30));
    }
    other => panic!("expected rate limit, got {other:?}"),
  }
}

#[tokio::test]
async fn recovery_text_respects_length_limit() {
  let limits = Limits { max_post_length: Some(5), ..Limits::default() };
  let settings = SyncSettings { limits, ..SyncSettings::default() };
  let (svc, _store, post_id) = service_with(settings, "abc").await;
  svc.enable(post_id, None).await.unwrap();

  assert!(matches!(
    svc.recover_from_text(post_id, ALICE, "too long").await,
    Err(Error::Core(tandem_core::Error::PostLengthExceeded { .. }))
  ));
}

#[tokio::test]
async fn health_reports_gaps_and_uncompacted_edits() {
  let (svc, _store, post_id) = service("abc").await;
  svc.enable(post_id, Some(RevisionFormat::Patch)).await.unwrap();
  svc.submit_edit(patch_edit(post_id, ALICE, r#"[3, "d"]"#, 1)).await.unwrap();
  svc.recover_from_text(post_id, ALICE, "xyz").await.unwrap();
  svc.submit_edit(patch_edit(post_id, ALICE, r#"[3, "!"]"#, 3)).await.unwrap();

  let report = svc.health_check(post_id).await.unwrap();
  assert!(report.healthy);
  assert_eq!(report.latest_version, Some(4));
  assert!(report.version_gaps.is_empty());
  assert_eq!(report.uncompacted, 2);
  assert_eq!(report.text_length, Some(4));
  assert_eq!(report.state_bytes, Some(3));
  assert_eq!(report.bloat_ratio, Some(0.75));
  assert!(!report.snapshot_overdue);

  let fresh = svc.health_check(post_id + 1).await.unwrap();
  assert!(!fresh.initialized);
  assert!(!fresh.healthy);
}

// ─── Lifecycle ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn enable_and_disable() {
  let (svc, store, post_id) = service("abc").await;
  assert_eq!(svc.enable(post_id, Some(RevisionFormat::Patch)).await.unwrap(), 1);
  assert_eq!(svc.enable(post_id, None).await.unwrap(), 1);
  assert!(store.get_post(post_id).await.unwrap().unwrap().shared_edits_enabled);

  svc.submit_edit(patch_edit(post_id, ALICE, r#"[3, "d"]"#, 1)).await.unwrap();
  let mut rx = svc.hub().subscribe(post_id);
  svc.disable(post_id).await.unwrap();

  let post = store.get_post(post_id).await.unwrap().unwrap();
  assert_eq!(post.raw, "abcd");
  assert!(!post.shared_edits_enabled);
  assert!(store.revisions(post_id).await.unwrap().is_empty());
  assert_eq!(rx.recv().await.unwrap(), ChannelMessage::Resync { version: None });

  assert!(matches!(svc.enable(999, None).await, Err(Error::PostNotFound(999))));
}

#[tokio::test]
async fn reset_rebuilds_from_the_post() {
  let (svc, store, post_id) = service("abc").await;
  svc.enable(post_id, Some(RevisionFormat::Merge)).await.unwrap();
  let base = merge_state(&svc, post_id).await;
  svc
    .submit_edit(merge_edit(post_id, ALICE, rewrite(&base, "abc!")))
    .await
    .unwrap();

  let reset = svc.reset(post_id).await.unwrap();
  assert_eq!(reset.raw, "abc!");
  assert_eq!(reset.version, 3);
  assert_eq!(store.revisions(post_id).await.unwrap().len(), 1);
  assert_eq!(text_of(&reset.state.unwrap()), "abc!");
}

// ─── Scheduler ───────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn commits_are_debounced() {
  let (svc, store, post_id) = service("abc").await;
  svc.enable(post_id, Some(RevisionFormat::Patch)).await.unwrap();

  svc.submit_edit(patch_edit(post_id, ALICE, r#"[3, "d"]"#, 1)).await.unwrap();
  // The edit scheduled a job; a second request finds the sentinel.
  assert!(!svc.schedule_commit(post_id).await);

  let mut raw = String::new();
  for _ in 0..200 {
    tokio::time::sleep(Duration::from_millis(100)).await;
    raw = store.get_post(post_id).await.unwrap().unwrap().raw;
    if raw == "abcd" {
      break;
    }
  }
  assert_eq!(raw, "abcd");

  // The job cleared the sentinel before compacting.
  assert!(svc.kv.ttl(&commit_key(post_id)).await.is_none());
  assert!(svc.schedule_commit(post_id).await);
}
