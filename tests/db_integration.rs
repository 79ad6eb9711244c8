//! Database integration tests.
//!
//! All tests require TEST_DATABASE_URL to be set.
//! Run with: TEST_DATABASE_URL=postgres://... cargo test --test db_integration
//!
//! Tests should be run single-threaded to avoid conflicts:
//!   cargo test --test db_integration -- --test-threads=1

mod common;

use common::{seed_tenant, StubGenerator};
use sitelog::db::{Database, EntryEdit, EntryUpdate, NewEntry};
use sitelog::summary::{
    EntryType, GenerationMode, ProjectKey, SchedulerConfig, SummaryMetadata, SummaryScheduler,
    SummaryState, SummaryStore,
};
use std::sync::Arc;
use uuid::Uuid;

/// Skip the test if TEST_DATABASE_URL is not set.
macro_rules! require_db {
    () => {
        if !common::has_test_db() {
            eprintln!("Skipping: TEST_DATABASE_URL not set");
            return;
        }
    };
}

async fn setup() -> Database {
    common::setup_test_db().await
}

fn text(content: &str) -> NewEntry {
    NewEntry {
        entry_type: EntryType::Text,
        subtype: None,
        text_content: Some(content.to_string()),
        transcript_text: None,
    }
}

// --- Connection ---

#[tokio::test]
async fn connect_and_health_check() {
    require_db!();
    let db = setup().await;
    db.health_check().await.unwrap();
}

// --- Summary metadata ---

#[tokio::test]
async fn missing_summary_reads_as_none() {
    require_db!();
    let db = setup().await;
    let t = seed_tenant(&db).await;
    let key = ProjectKey::new(t.company_id, t.project_id);
    assert!(db.read_metadata(key).await.unwrap().is_none());
}

#[tokio::test]
async fn summary_write_keeps_other_metadata_keys() {
    require_db!();
    let db = setup().await;
    let t = seed_tenant(&db).await;
    let key = ProjectKey::new(t.company_id, t.project_id);

    let meta = SummaryMetadata {
        state: SummaryState::Scheduled,
        scheduled_for: Some(chrono::Utc::now()),
        ..Default::default()
    };
    db.write_metadata(key, &meta).await.unwrap();

    let stored = db.read_metadata(key).await.unwrap().unwrap();
    assert_eq!(stored.state, SummaryState::Scheduled);
    let template: Option<String> = sqlx::query_scalar(
        "SELECT metadata ->> 'pdf_template' FROM projects WHERE id = $1",
    )
    .bind(t.project_id)
    .fetch_one(db.pool())
    .await
    .unwrap();
    assert_eq!(template.as_deref(), Some("standard"));
}

#[tokio::test]
async fn summary_is_scoped_by_company() {
    require_db!();
    let db = setup().await;
    let t = seed_tenant(&db).await;
    let key = ProjectKey::new(t.company_id, t.project_id);
    db.write_metadata(key, &SummaryMetadata::default()).await.unwrap();

    let foreign = ProjectKey::new(Uuid::new_v4(), t.project_id);
    assert!(db.read_metadata(foreign).await.unwrap().is_none());
    assert!(db
        .write_metadata(foreign, &SummaryMetadata::default())
        .await
        .is_err());
}

#[tokio::test]
async fn scheduled_summaries_are_listed_for_resume() {
    require_db!();
    let db = setup().await;
    let t = seed_tenant(&db).await;
    let key = ProjectKey::new(t.company_id, t.project_id);
    let due = chrono::Utc::now() + chrono::TimeDelta::seconds(30);
    let meta = SummaryMetadata {
        state: SummaryState::Scheduled,
        scheduled_for: Some(due),
        ..Default::default()
    };
    db.write_metadata(key, &meta).await.unwrap();

    let pending = db.get_scheduled_summaries().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].0, key);
    assert_eq!(pending[0].1.timestamp_millis(), due.timestamp_millis());
}

// --- Entries ---

#[tokio::test]
async fn active_entries_exclude_superseded_and_deleted() {
    require_db!();
    let db = setup().await;
    let t = seed_tenant(&db).await;
    let key = ProjectKey::new(t.company_id, t.project_id);

    let first = db.insert_entry(key, &text("Livraison parpaings")).await.unwrap();
    let second = db.insert_entry(key, &text("Montage échafaudage")).await.unwrap();
    let third = db.insert_entry(key, &text("Erreur de saisie")).await.unwrap();

    let edit = db
        .supersede_entry(
            key,
            second.id,
            &EntryUpdate {
                text_content: Some("Montage échafaudage façade nord".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let EntryEdit::Superseded(edited) = edit else {
        panic!("expected a new version, got {:?}", edit);
    };
    assert_eq!(edited.created_at, second.created_at);
    assert_eq!(edited.entry_type, "text");

    assert_eq!(
        db.soft_delete_entry(key, third.id).await.unwrap(),
        Some(EntryType::Text)
    );
    assert_eq!(db.soft_delete_entry(key, third.id).await.unwrap(), None);

    let active = db.list_active_entries(key).await.unwrap();
    let ids: Vec<Uuid> = active.iter().map(|e| e.id).collect();
    assert_eq!(ids, vec![first.id, edited.id]);
    assert_eq!(
        active[1].text_content.as_deref(),
        Some("Montage échafaudage façade nord")
    );

    let superseded_by: Option<Uuid> =
        sqlx::query_scalar("SELECT superseded_by FROM entries WHERE id = $1")
            .bind(second.id)
            .fetch_one(db.pool())
            .await
            .unwrap();
    assert_eq!(superseded_by, Some(edited.id));
}

#[tokio::test]
async fn entry_cannot_attach_to_another_company_project() {
    require_db!();
    let db = setup().await;
    let a = seed_tenant(&db).await;
    let b = seed_tenant(&db).await;
    let crossed = ProjectKey::new(a.company_id, b.project_id);

    assert!(!db.project_exists(crossed).await.unwrap());
    assert!(db
        .project_exists(ProjectKey::new(b.company_id, b.project_id))
        .await
        .unwrap());
    assert!(db.insert_entry(crossed, &text("Intrusion")).await.is_err());
    assert!(db
        .list_active_entries(ProjectKey::new(b.company_id, b.project_id))
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn superseded_entry_cannot_be_edited_again() {
    require_db!();
    let db = setup().await;
    let t = seed_tenant(&db).await;
    let key = ProjectKey::new(t.company_id, t.project_id);
    let entry = db.insert_entry(key, &text("v1")).await.unwrap();
    let update = EntryUpdate {
        text_content: Some("v2".into()),
        ..Default::default()
    };
    assert!(matches!(
        db.supersede_entry(key, entry.id, &update).await.unwrap(),
        EntryEdit::Superseded(_)
    ));
    assert!(matches!(
        db.supersede_entry(key, entry.id, &update).await.unwrap(),
        EntryEdit::NotFound
    ));
}

#[tokio::test]
async fn text_entry_cannot_be_blanked_by_edit() {
    require_db!();
    let db = setup().await;
    let t = seed_tenant(&db).await;
    let key = ProjectKey::new(t.company_id, t.project_id);
    let entry = db.insert_entry(key, &text("Réception menuiseries")).await.unwrap();
    let blank = EntryUpdate {
        text_content: Some("   ".into()),
        ..Default::default()
    };
    assert!(matches!(
        db.supersede_entry(key, entry.id, &blank).await.unwrap(),
        EntryEdit::Rejected(_)
    ));

    let active = db.list_active_entries(key).await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, entry.id);
}

// --- Membership ---

#[tokio::test]
async fn membership_lookup() {
    require_db!();
    let db = setup().await;
    let t = seed_tenant(&db).await;
    assert!(db.is_company_member(t.company_id, t.user_id).await.unwrap());
    assert!(!db.is_company_member(t.company_id, Uuid::new_v4()).await.unwrap());
    assert!(!db.is_company_member(Uuid::new_v4(), t.user_id).await.unwrap());
}

// --- Scheduler against Postgres ---

#[tokio::test]
async fn manual_generation_persists_summary() {
    require_db!();
    let db = setup().await;
    let t = seed_tenant(&db).await;
    let key = ProjectKey::new(t.company_id, t.project_id);
    db.insert_entry(key, &text("Coulage dalle")).await.unwrap();
    db.insert_entry(
        key,
        &NewEntry {
            entry_type: EntryType::Audio,
            subtype: None,
            text_content: None,
            transcript_text: Some("Séchage prévu jusqu'à jeudi".into()),
        },
    )
    .await
    .unwrap();

    let generator = StubGenerator::new();
    let scheduler = SummaryScheduler::new(
        Arc::new(db.clone()),
        generator.clone(),
        SchedulerConfig::default(),
    );
    scheduler.notify_entry_changed(key, EntryType::Text).await;
    assert_eq!(
        db.read_metadata(key).await.unwrap().unwrap().state,
        SummaryState::Scheduled
    );

    let outcome = scheduler.trigger_generation(key, GenerationMode::Manual).await;
    assert_eq!(outcome.status(), "generated");
    assert_eq!(generator.calls(), 1);
    assert_eq!(scheduler.pending_timers(), 0);

    let stored = db.read_metadata(key).await.unwrap().unwrap();
    assert_eq!(stored.state, SummaryState::Ready);
    assert_eq!(stored.artisan_short.as_deref(), Some("2 entrées, côté artisan"));
    assert!(stored.scheduled_for.is_none());
    assert!(stored.generation_started_at.is_none());
}
