//! Integration tests for the roster and activity stores against the
//! in-memory document backend.

use std::{sync::Arc, time::Duration};

use chrono::NaiveDate;
use claustro_core::{
  activity::{ActivityDraft, ActivityStatus},
  document::DocumentStore,
  error::{StoreError, WriteError},
  outcome::{MutationOutcome, StatusUpdate},
  settings::DirectorySettings,
  user::{Career, Role, UserDraft},
};
use claustro_store_memory::MemoryStore;
use tokio::time::timeout;

use crate::{
  ActivityStore, RosterFilter, RosterStore, SyncAdapter, SyncStatus,
};

const ADMIN: &str = "head.admin@potros.inst.edu";

fn settings() -> DirectorySettings {
  DirectorySettings {
    required_email_domain: "potros.inst.edu".to_string(),
    primary_admin_email:   ADMIN.to_string(),
  }
}

fn roster(remote: &MemoryStore) -> Arc<RosterStore<MemoryStore>> {
  Arc::new(RosterStore::new(Some(Arc::new(remote.clone())), settings()))
}

fn activities(remote: &MemoryStore) -> Arc<ActivityStore<MemoryStore>> {
  Arc::new(ActivityStore::new(Some(Arc::new(remote.clone()))))
}

fn draft(name: &str, potro: &str) -> UserDraft {
  let mut d = UserDraft::new(name);
  d.potro_email = Some(potro.to_string());
  d
}

fn activity_draft(title: &str, due: (i32, u32, u32)) -> ActivityDraft {
  let mut d = ActivityDraft::new(title);
  d.due_date = NaiveDate::from_ymd_opt(due.0, due.1, due.2);
  d
}

// ─── Roster: upsert ──────────────────────────────────────────────────────────

#[tokio::test]
async fn upsert_round_trips_through_every_identity_key() {
  let remote = MemoryStore::new();
  let store = roster(&remote);

  let mut d = draft("Ana López", "Ana.Lopez@potros.inst.edu");
  d.control_number = Some("00123".to_string());
  d.alternate_email = Some("ana@gmail.com".to_string());
  let (record, outcome) = store.upsert(d, ADMIN).await.unwrap();
  assert!(outcome.is_confirmed());

  for key in [
    record.id.as_str(),
    "00123",
    "ana.lopez@potros.inst.edu",
    "ANA@GMAIL.COM",
  ] {
    let found = store
      .find_by_identity_key(key)
      .unwrap_or_else(|| panic!("no record for key {key}"));
    assert_eq!(found, record);
  }

  // The write reached the remote collection with merge fields resolved.
  let doc = remote
    .get_one("users", &record.id)
    .await
    .unwrap()
    .expect("remote document");
  assert_eq!(doc.get("name").unwrap(), "Ana López");
  assert_eq!(doc.get("role").unwrap(), "instructor");
}

#[tokio::test]
async fn upsert_derives_id_and_resolves_collisions_with_suffix() {
  let remote = MemoryStore::new();
  let store = roster(&remote);

  let (first, _) = store
    .upsert(draft("Ana", "ana@potros.inst.edu"), ADMIN)
    .await
    .unwrap();
  assert_eq!(first.id, "ana");

  // Same local part under a different domain: same base id, new suffix.
  let (second, _) = store
    .upsert(draft("Ana B", "ana@otherschool.edu"), ADMIN)
    .await
    .unwrap();
  assert_eq!(second.id, "ana-2");

  // Control number wins over email for the base id.
  let mut d = draft("Carlos", "carlos@potros.inst.edu");
  d.control_number = Some("00999".to_string());
  let (third, _) = store.upsert(d, ADMIN).await.unwrap();
  assert_eq!(third.id, "00999");
}

#[tokio::test]
async fn duplicate_identity_key_is_a_conflict() {
  let remote = MemoryStore::new();
  let store = roster(&remote);

  store
    .upsert(draft("Ana", "ana@potros.inst.edu"), ADMIN)
    .await
    .unwrap();

  // Different explicit id, same potro email.
  let mut dup = draft("Imposter", "ana@potros.inst.edu");
  dup.id = Some("imposter".to_string());
  let err = store.upsert(dup, ADMIN).await.unwrap_err();
  assert!(matches!(err, StoreError::Conflict(ref k) if k == "ana@potros.inst.edu"));

  // The conflicting record was never applied locally.
  assert_eq!(store.records().len(), 1);
}

#[tokio::test]
async fn editing_a_record_does_not_conflict_with_itself() {
  let remote = MemoryStore::new();
  let store = roster(&remote);

  let (record, _) = store
    .upsert(draft("Ana", "ana@potros.inst.edu"), ADMIN)
    .await
    .unwrap();

  let mut edit = draft("Ana López", "ana@potros.inst.edu");
  edit.id = Some(record.id.clone());
  edit.phone = Some("644-123".to_string());
  let (updated, outcome) = store.upsert(edit, ADMIN).await.unwrap();
  assert!(outcome.is_confirmed());
  assert_eq!(updated.id, record.id);
  assert_eq!(updated.name, "Ana López");
  assert_eq!(store.records().len(), 1);
  // Creation provenance survives an edit.
  assert_eq!(updated.created_at, record.created_at);
}

#[tokio::test]
async fn upsert_remote_failure_keeps_the_local_change() {
  let remote = MemoryStore::new();
  let store = roster(&remote);

  remote.fail_writes(WriteError::Unavailable("offline".to_string()));
  let (record, outcome) = store
    .upsert(draft("Ana", "ana@potros.inst.edu"), ADMIN)
    .await
    .unwrap();

  assert!(matches!(
    outcome,
    MutationOutcome::Degraded(WriteError::Unavailable(_))
  ));
  // Optimistic state is kept, remote has nothing.
  assert!(store.find_by_identity_key("ana@potros.inst.edu").is_some());
  assert!(remote.get_one("users", &record.id).await.unwrap().is_none());
}

#[tokio::test]
async fn permission_denied_is_distinguishable_from_unavailable() {
  let remote = MemoryStore::new();
  let store = roster(&remote);

  remote.fail_writes(WriteError::PermissionDenied("rules".to_string()));
  let (_, outcome) = store
    .upsert(draft("Ana", "ana@potros.inst.edu"), ADMIN)
    .await
    .unwrap();
  assert!(matches!(
    outcome,
    MutationOutcome::Degraded(WriteError::PermissionDenied(_))
  ));
}

#[tokio::test]
async fn unconfigured_remote_degrades_but_keeps_local_edits() {
  let store: RosterStore<MemoryStore> =
    RosterStore::new(None, settings());

  let (_, outcome) = store
    .upsert(draft("Ana", "ana@potros.inst.edu"), ADMIN)
    .await
    .unwrap();
  assert!(matches!(
    outcome,
    MutationOutcome::Degraded(WriteError::Unavailable(_))
  ));
  assert_eq!(store.records().len(), 1);
  // An unconfigured store still counts as loaded so resolution can run.
  assert!(*store.loaded().borrow());
}

// ─── Roster: protection ──────────────────────────────────────────────────────

#[tokio::test]
async fn primary_admin_cannot_be_deleted() {
  let remote = MemoryStore::new();
  let store = roster(&remote);

  let (admin, _) = store
    .upsert(draft("Head Admin", ADMIN), ADMIN)
    .await
    .unwrap();
  let mut admin_draft = draft("Head Admin", ADMIN);
  admin_draft.role = Role::Administrator;
  admin_draft.id = Some(admin.id.clone());
  store.upsert(admin_draft, ADMIN).await.unwrap();

  let err = store
    .remove(&admin.id, "someone.else@potros.inst.edu")
    .await
    .unwrap_err();
  assert!(matches!(err, StoreError::ProtectedRecord(_)));
  assert_eq!(store.records().len(), 1);
}

#[tokio::test]
async fn primary_admin_cannot_be_demoted() {
  let remote = MemoryStore::new();
  let store = roster(&remote);

  let mut d = draft("Head Admin", ADMIN);
  d.role = Role::Administrator;
  let (admin, _) = store.upsert(d, ADMIN).await.unwrap();

  let mut demote = draft("Head Admin", ADMIN);
  demote.id = Some(admin.id.clone());
  demote.role = Role::Instructor;
  let err = store.upsert(demote, ADMIN).await.unwrap_err();
  assert!(matches!(err, StoreError::ProtectedRecord(_)));
  assert_eq!(store.records()[0].role, Role::Administrator);
}

#[tokio::test]
async fn callers_cannot_delete_their_own_record() {
  let remote = MemoryStore::new();
  let store = roster(&remote);

  let (me, _) = store
    .upsert(draft("Ana", "ana@potros.inst.edu"), ADMIN)
    .await
    .unwrap();
  let err = store
    .remove(&me.id, "ana@potros.inst.edu")
    .await
    .unwrap_err();
  assert!(matches!(err, StoreError::ProtectedRecord(_)));
}

// ─── Roster: sync & deletion registry ────────────────────────────────────────

#[tokio::test]
async fn snapshot_replaces_roster_and_reports_live() {
  let remote = MemoryStore::new();
  let store = roster(&remote);
  let _adapter =
    SyncAdapter::spawn_roster(store.clone(), Arc::new(remote.clone()));

  store
    .upsert(draft("Zoe", "zoe@potros.inst.edu"), ADMIN)
    .await
    .unwrap();
  store
    .upsert(draft("Ana", "ana@potros.inst.edu"), ADMIN)
    .await
    .unwrap();

  let mut changes = store.changes();
  timeout(
    Duration::from_secs(1),
    changes.wait_for(|records| {
      records.len() == 2 && records[0].name == "Ana"
    }),
  )
  .await
  .expect("snapshot")
  .unwrap();

  assert!(*store.loaded().borrow());
  assert!(store.sync_status().borrow().is_live());
}

#[tokio::test]
async fn deletion_registry_prevents_resurrection_by_stale_snapshot() {
  let remote = MemoryStore::new();
  let store = roster(&remote);

  let (record, _) = store
    .upsert(draft("Ana", "ana@potros.inst.edu"), ADMIN)
    .await
    .unwrap();

  let _adapter =
    SyncAdapter::spawn_roster(store.clone(), Arc::new(remote.clone()));
  let mut changes = store.changes();
  timeout(
    Duration::from_secs(1),
    changes.wait_for(|records| records.len() == 1),
  )
  .await
  .expect("initial snapshot")
  .unwrap();

  // Remote delete fails; the document survives server-side.
  remote.fail_writes(WriteError::Unavailable("offline".to_string()));
  let outcome = store
    .remove(&record.id, "someone.else@potros.inst.edu")
    .await
    .unwrap();
  assert!(matches!(outcome, MutationOutcome::Degraded(_)));
  assert!(store.records().is_empty());

  // A stale snapshot still containing the record must not resurrect it.
  let mut changes = store.changes();
  remote.emit_snapshot("users");
  timeout(Duration::from_secs(1), changes.changed())
    .await
    .expect("stale snapshot applied")
    .unwrap();
  assert!(
    store.find_by_identity_key("ana@potros.inst.edu").is_none(),
    "deleted record came back"
  );
}

#[tokio::test]
async fn subscription_error_keeps_last_known_roster() {
  let remote = MemoryStore::new();
  let store = roster(&remote);
  store
    .upsert(draft("Ana", "ana@potros.inst.edu"), ADMIN)
    .await
    .unwrap();
  let _adapter =
    SyncAdapter::spawn_roster(store.clone(), Arc::new(remote.clone()));
  let mut changes = store.changes();
  timeout(
    Duration::from_secs(1),
    changes.wait_for(|records| records.len() == 1),
  )
  .await
  .expect("initial snapshot")
  .unwrap();

  remote.fail_subscriptions("users", "missing or insufficient permissions");
  timeout(
    Duration::from_secs(1),
    store
      .sync_status()
      .wait_for(|s| matches!(s, SyncStatus::Failed { .. })),
  )
  .await
  .expect("failed status")
  .unwrap();

  // Last known-good data is retained and the roster still counts loaded.
  assert_eq!(store.records().len(), 1);
  assert!(*store.loaded().borrow());
}

// ─── Roster: filter & import ─────────────────────────────────────────────────

#[tokio::test]
async fn filter_matches_search_role_and_career() {
  let remote = MemoryStore::new();
  let store = roster(&remote);

  let mut ana = draft("Ana López", "ana@potros.inst.edu");
  ana.career = Career::Mechatronics;
  ana.control_number = Some("00123".to_string());
  store.upsert(ana, ADMIN).await.unwrap();

  let mut bob = draft("Bob", "bob@potros.inst.edu");
  bob.role = Role::Assistant;
  store.upsert(bob, ADMIN).await.unwrap();

  let by_name = store.filter(&RosterFilter {
    search: Some("LÓPEZ".to_string()),
    ..Default::default()
  });
  assert_eq!(by_name.len(), 1);

  let by_control = store.filter(&RosterFilter {
    search: Some("00123".to_string()),
    ..Default::default()
  });
  assert_eq!(by_control.len(), 1);

  let by_role = store.filter(&RosterFilter {
    role: Some(Role::Assistant),
    ..Default::default()
  });
  assert_eq!(by_role.len(), 1);
  assert_eq!(by_role[0].name, "Bob");

  let by_career = store.filter(&RosterFilter {
    career: Some(Career::Software),
    ..Default::default()
  });
  assert_eq!(by_career.len(), 1);
  assert_eq!(by_career[0].name, "Bob");
}

#[tokio::test]
async fn import_skips_existing_and_primary_admin() {
  let remote = MemoryStore::new();
  let store = roster(&remote);

  store
    .upsert(draft("Ana", "ana@potros.inst.edu"), ADMIN)
    .await
    .unwrap();

  let outcome = store
    .import(
      vec![
        draft("Ana Again", "ana@potros.inst.edu"),
        draft("Head Admin", ADMIN),
        draft("Carlos", "carlos@potros.inst.edu"),
        draft("No Email", ""),
      ],
      ADMIN,
    )
    .await;

  assert_eq!(outcome.added, vec!["carlos".to_string()]);
  assert_eq!(outcome.skipped.len(), 3);
  assert!(outcome.status.is_confirmed());

  let imported = store.find_by_identity_key("carlos@potros.inst.edu").unwrap();
  assert!(imported.imported_at.is_some());
  assert!(remote.get_one("users", "carlos").await.unwrap().is_some());
}

#[tokio::test]
async fn failed_import_batch_degrades_but_keeps_local_additions() {
  let remote = MemoryStore::new();
  let store = roster(&remote);

  remote.fail_writes(WriteError::PermissionDenied("rules".to_string()));
  let outcome = store
    .import(vec![draft("Carlos", "carlos@potros.inst.edu")], ADMIN)
    .await;

  assert!(matches!(
    outcome.status,
    MutationOutcome::Degraded(WriteError::PermissionDenied(_))
  ));
  assert_eq!(store.records().len(), 1);
  assert!(remote.get_one("users", "carlos").await.unwrap().is_none());
}

#[tokio::test]
async fn backfill_external_ref_updates_login_keys() {
  let remote = MemoryStore::new();
  let store = roster(&remote);

  let (record, _) = store
    .upsert(draft("Ana", "ana@potros.inst.edu"), ADMIN)
    .await
    .unwrap();
  assert!(store.find_for_login("other@x.com", "uid-42").is_none());

  let outcome = store
    .backfill_external_ref(&record.id, "uid-42")
    .await
    .unwrap();
  assert!(outcome.is_confirmed());
  assert!(store.find_for_login("other@x.com", "uid-42").is_some());

  let doc = remote.get_one("users", &record.id).await.unwrap().unwrap();
  assert_eq!(doc.get("externalIdentityRef").unwrap(), "uid-42");
}

// ─── Activities ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn new_activities_start_pending_and_edits_keep_status() {
  let remote = MemoryStore::new();
  let store = activities(&remote);

  let (created, outcome) = store
    .upsert(activity_draft("Grade exams", (2025, 6, 1)), ADMIN)
    .await
    .unwrap();
  assert!(outcome.is_confirmed());
  assert_eq!(created.status, ActivityStatus::Pending);

  store
    .set_status(&created.id, ActivityStatus::InProgress, "ana@potros.inst.edu")
    .await
    .unwrap();

  let mut edit = activity_draft("Grade final exams", (2025, 6, 2));
  edit.id = Some(created.id.clone());
  let (edited, _) = store.upsert(edit, ADMIN).await.unwrap();
  assert_eq!(edited.status, ActivityStatus::InProgress);
  assert_eq!(edited.title, "Grade final exams");
}

#[tokio::test]
async fn status_update_failure_rolls_back_unlike_roster_edits() {
  let remote = MemoryStore::new();
  let store = activities(&remote);

  let (created, _) = store
    .upsert(activity_draft("Grade exams", (2025, 6, 1)), ADMIN)
    .await
    .unwrap();

  remote.fail_writes(WriteError::PermissionDenied("rules".to_string()));
  let update = store
    .set_status(&created.id, ActivityStatus::InProgress, "ana@potros.inst.edu")
    .await
    .unwrap();

  assert!(matches!(
    update,
    StatusUpdate::RolledBack(WriteError::PermissionDenied(_))
  ));
  assert_eq!(
    store.get(&created.id).unwrap().status,
    ActivityStatus::Pending
  );

  // Unavailability reports a different reason but the same rollback.
  remote.fail_writes(WriteError::Unavailable("offline".to_string()));
  let update = store
    .set_status(&created.id, ActivityStatus::Completed, "ana@potros.inst.edu")
    .await
    .unwrap();
  assert!(matches!(
    update,
    StatusUpdate::RolledBack(WriteError::Unavailable(_))
  ));
  assert_eq!(
    store.get(&created.id).unwrap().status,
    ActivityStatus::Pending
  );
}

#[tokio::test]
async fn requesting_the_current_status_is_a_no_op() {
  let remote = MemoryStore::new();
  let store = activities(&remote);

  let (created, _) = store
    .upsert(activity_draft("Grade exams", (2025, 6, 1)), ADMIN)
    .await
    .unwrap();

  // Even with writes failing, a same-status request issues no write.
  remote.fail_writes(WriteError::Unavailable("offline".to_string()));
  let update = store
    .set_status(&created.id, ActivityStatus::Pending, "ana@potros.inst.edu")
    .await
    .unwrap();
  assert_eq!(update, StatusUpdate::Unchanged);
}

#[tokio::test]
async fn visible_to_applies_role_assignee_and_career_rules() {
  let remote = MemoryStore::new();
  let store = activities(&remote);

  let mut open = activity_draft("Department meeting", (2025, 5, 1));
  open.career = Career::Global;
  store.upsert(open, ADMIN).await.unwrap();

  let mut assigned = activity_draft("Grade exams", (2025, 6, 1));
  assigned.responsible_email = Some("ana@potros.inst.edu".to_string());
  assigned.career = Career::Software;
  store.upsert(assigned, ADMIN).await.unwrap();

  let mut other_career = activity_draft("Lab audit", (2025, 7, 1));
  other_career.career = Career::Mechatronics;
  store.upsert(other_career, ADMIN).await.unwrap();

  let visible = store.visible_to(
    Role::Instructor,
    "ana@potros.inst.edu",
    Career::Software,
  );
  let titles: Vec<_> = visible.iter().map(|a| a.title.as_str()).collect();
  assert_eq!(titles, ["Grade exams", "Department meeting"]);

  let visible = store.visible_to(
    Role::Instructor,
    "bob@potros.inst.edu",
    Career::Software,
  );
  let titles: Vec<_> = visible.iter().map(|a| a.title.as_str()).collect();
  assert_eq!(titles, ["Department meeting"]);

  assert!(
    store
      .visible_to(Role::Assistant, "x@potros.inst.edu", Career::Software)
      .is_empty()
  );
}

#[tokio::test]
async fn removed_activity_stays_removed_on_remote_failure() {
  let remote = MemoryStore::new();
  let store = activities(&remote);

  let (created, _) = store
    .upsert(activity_draft("Grade exams", (2025, 6, 1)), ADMIN)
    .await
    .unwrap();

  remote.fail_writes(WriteError::Unavailable("offline".to_string()));
  let outcome = store.remove(&created.id).await.unwrap();
  assert!(matches!(outcome, MutationOutcome::Degraded(_)));
  assert!(store.get(&created.id).is_none());

  let err = store.remove(&created.id).await.unwrap_err();
  assert!(matches!(err, StoreError::NotFound(_)));
}
