//! Shared test helpers for integration tests.

#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use sitelog::db::Database;
use sitelog::server::AppState;
use sitelog::summary::{Entry, SchedulerConfig, SummaryGenerator, SummaryVariants};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use uuid::Uuid;

/// HS256 secret the test router verifies bearer tokens with.
pub const TEST_JWT_SECRET: &str = "sitelog-test-secret";

/// Returns the test database URL from the `TEST_DATABASE_URL` environment variable.
/// Panics if the variable is not set.
pub fn test_db_url() -> String {
    std::env::var("TEST_DATABASE_URL")
        .expect("TEST_DATABASE_URL must be set for integration tests")
}

/// Returns true if the test database URL is configured.
pub fn has_test_db() -> bool {
    std::env::var("TEST_DATABASE_URL").is_ok()
}

/// One-time schema initialization.
static SCHEMA_INIT: OnceCell<()> = OnceCell::const_new();

/// Ensure the test database schema is set up (runs migrations once per test binary).
pub async fn ensure_schema() {
    SCHEMA_INIT
        .get_or_init(|| async {
            let pool = sqlx::PgPool::connect(&test_db_url()).await.unwrap();
            run_migrations(&pool).await;
        })
        .await;
}

/// Connect to the test database (also ensures schema is set up).
pub async fn setup_test_db() -> Database {
    ensure_schema().await;
    let db = Database::connect(&test_db_url())
        .await
        .expect("Failed to connect to test database");
    truncate_all_tables(db.pool()).await;
    db
}

/// Truncate all tables to ensure test isolation.
pub async fn truncate_all_tables(pool: &sqlx::PgPool) {
    sqlx::raw_sql("TRUNCATE TABLE entries, projects, company_members, companies CASCADE")
        .execute(pool)
        .await
        .unwrap();
}

/// A company with one project and one member.
pub struct Tenant {
    pub company_id: Uuid,
    pub project_id: Uuid,
    pub user_id: Uuid,
}

/// Insert a company, a project, and a member user.
pub async fn seed_tenant(db: &Database) -> Tenant {
    let company_id: Uuid =
        sqlx::query_scalar("INSERT INTO companies (name) VALUES ('Bâti Ouest') RETURNING id")
            .fetch_one(db.pool())
            .await
            .unwrap();
    let project_id: Uuid = sqlx::query_scalar(
        "INSERT INTO projects (company_id, name, metadata)
         VALUES ($1, 'Rénovation rue des Lilas', '{\"pdf_template\": \"standard\"}'::jsonb)
         RETURNING id",
    )
    .bind(company_id)
    .fetch_one(db.pool())
    .await
    .unwrap();
    let user_id = Uuid::new_v4();
    sqlx::query("INSERT INTO company_members (company_id, user_id, role) VALUES ($1, $2, 'owner')")
        .bind(company_id)
        .bind(user_id)
        .execute(db.pool())
        .await
        .unwrap();
    Tenant {
        company_id,
        project_id,
        user_id,
    }
}

/// Returns fixed variants after an optional delay and counts its calls.
pub struct StubGenerator {
    pub calls: AtomicUsize,
    pub delay: Duration,
}

impl StubGenerator {
    pub fn new() -> Arc<Self> {
        Self::slow(Duration::ZERO)
    }

    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            delay,
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SummaryGenerator for StubGenerator {
    async fn generate(&self, entries: &[Entry]) -> Result<SummaryVariants> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(SummaryVariants {
            artisan_short: format!("{} entrées, côté artisan", entries.len()),
            artisan_detail: "Détail artisan".to_string(),
            client_short: format!("{} entrées, côté client", entries.len()),
            client_detail: "Détail client".to_string(),
        })
    }
}

/// Build the application state on a clean test database.
pub async fn build_test_state(generator: Arc<dyn SummaryGenerator>) -> Arc<AppState> {
    let db = setup_test_db().await;
    AppState::new(
        db,
        generator,
        SchedulerConfig::default(),
        Some(TEST_JWT_SECRET.to_string()),
    )
}

/// Sign a Supabase-style access token for `user_id`.
pub fn bearer_token(user_id: Uuid) -> String {
    let claims = serde_json::json!({
        "sub": user_id.to_string(),
        "role": "authenticated",
        "aud": "authenticated",
        "exp": chrono::Utc::now().timestamp() + 3600,
    });
    let token = jsonwebtoken::encode(
        &jsonwebtoken::Header::new(jsonwebtoken::Algorithm::HS256),
        &claims,
        &jsonwebtoken::EncodingKey::from_secret(TEST_JWT_SECRET.as_bytes()),
    )
    .unwrap();
    format!("Bearer {}", token)
}

/// Run all migrations against the test database, skipping Supabase-specific commands.
async fn run_migrations(pool: &sqlx::PgPool) {
    let migration_files = ["supabase/migrations/001_sitelog_core.sql"];

    for file in &migration_files {
        let path = std::path::Path::new(file);
        if !path.exists() {
            panic!("Migration file not found: {}", file);
        }
        let sql = std::fs::read_to_string(path).unwrap();
        let cleaned = clean_migration_sql(&sql);
        if !cleaned.trim().is_empty() {
            sqlx::raw_sql(&cleaned).execute(pool).await.unwrap_or_else(|e| {
                panic!("Migration {} failed: {}", file, e);
            });
        }
    }
}

/// Remove Supabase-specific SQL (ALTER PUBLICATION, RLS, policies).
fn clean_migration_sql(sql: &str) -> String {
    sql.lines()
        .filter(|line| {
            let t = line.trim();
            !t.starts_with("ALTER PUBLICATION")
                && !t.contains("ENABLE ROW LEVEL SECURITY")
                && !t.starts_with("CREATE POLICY")
        })
        .collect::<Vec<_>>()
        .join("\n")
}
