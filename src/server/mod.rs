//! # Server - HTTP API for Project Entries and Summaries
//!
//! Runs an Axum HTTP server exposing the logbook entry routes and the summary
//! routes of each project. Every entry mutation is reported to the shared
//! [`SummaryScheduler`] so summaries are regenerated after the debounce window.
//!
//! ## Routes
//!
//! | Method | Path | Handler |
//! |--------|------|---------|
//! | `GET`/`POST` | `/api/companies/{company_id}/projects/{project_id}/entries` | list / create |
//! | `PUT`/`DELETE` | `…/entries/{entry_id}` | edit (supersede) / soft delete |
//! | `GET` | `…/summary` | current summary document |
//! | `POST` | `…/summary/generate` | manual generation |
//! | `GET` | `/healthz`, `/readyz`, `/metrics` | probes and Prometheus scrape |
//!
//! Project routes require a Supabase JWT whose subject belongs to the company.

pub(crate) mod middleware_auth;
mod routes_entries;
mod routes_health;
mod routes_summary;

use crate::summary::{EntryType, ProjectKey, SchedulerConfig, SummaryGenerator, SummaryScheduler};
use crate::{db, prom_metrics};
use anyhow::Result;
use axum::extract::Request;
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::routing::{get, post, put};
use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn, Instrument};

pub struct AppState {
    pub db: db::Database,
    pub scheduler: SummaryScheduler,
    pub prom_metrics: Arc<prom_metrics::Metrics>,
    /// Supabase HS256 secret. Tokens are decoded without verification when unset.
    pub jwt_secret: Option<String>,
}

impl AppState {
    pub fn new(
        db: db::Database,
        generator: Arc<dyn SummaryGenerator>,
        config: SchedulerConfig,
        jwt_secret: Option<String>,
    ) -> Arc<Self> {
        let prom_metrics = Arc::new(prom_metrics::Metrics::new());
        let scheduler = SummaryScheduler::with_metrics(
            Arc::new(db.clone()),
            generator,
            config,
            Arc::clone(&prom_metrics),
        );
        Arc::new(AppState {
            db,
            scheduler,
            prom_metrics,
            jwt_secret,
        })
    }

    /// Report an entry mutation to the scheduler without holding up the response.
    pub(super) fn notify_entry_changed(&self, key: ProjectKey, entry_type: EntryType) {
        let scheduler = self.scheduler.clone();
        tokio::spawn(async move {
            scheduler.notify_entry_changed(key, entry_type).await;
        });
    }
}

/// Middleware that records HTTP request duration into the Prometheus histogram,
/// generates (or propagates) a request ID for correlation, and wraps the
/// request in a tracing span using `.instrument()` for proper async propagation.
async fn metrics_middleware(
    axum::extract::State(state): axum::extract::State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> axum::response::Response {
    let request_id = req
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let method = req.method().to_string();
    let raw_path = req.uri().path().to_string();
    let norm_path = normalize_path(&raw_path);
    let start = std::time::Instant::now();

    let span = tracing::info_span!(
        "request",
        request_id = %request_id,
        method = %method,
        path = %raw_path,
    );
    let mut response = next.run(req).instrument(span).await;

    state
        .prom_metrics
        .http_request_duration
        .get_or_create(&prom_metrics::HttpLabel {
            method,
            path: norm_path,
        })
        .observe(start.elapsed().as_secs_f64());

    if let Ok(value) = request_id.parse() {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}

/// Normalize URL path to collapse high-cardinality segments (UUIDs, numeric IDs)
/// into placeholders, preventing histogram label explosion.
fn normalize_path(path: &str) -> String {
    path.split('/')
        .map(|seg| {
            if seg.is_empty() {
                seg.to_string()
            } else if seg.chars().all(|c| c.is_ascii_digit()) {
                ":id".to_string()
            } else if seg.len() == 36 && seg.chars().filter(|c| *c == '-').count() == 4 {
                ":uuid".to_string()
            } else {
                seg.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let project_routes = Router::new()
        .route(
            "/entries",
            get(routes_entries::handler_list_entries).post(routes_entries::handler_create_entry),
        )
        .route(
            "/entries/{entry_id}",
            put(routes_entries::handler_edit_entry).delete(routes_entries::handler_delete_entry),
        )
        .route("/summary", get(routes_summary::handler_get_summary))
        .route(
            "/summary/generate",
            post(routes_summary::handler_generate_summary),
        );

    Router::new()
        .route("/healthz", get(routes_health::handler_healthz))
        .route("/readyz", get(routes_health::handler_readyz))
        .route("/metrics", get(routes_health::handler_metrics))
        .nest(
            "/api/companies/{company_id}/projects/{project_id}",
            project_routes,
        )
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(CatchPanicLayer::new())
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            metrics_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(1024 * 1024))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(30),
        ))
        .with_state(state)
}

pub async fn run(
    port: u16,
    database_url: &str,
    generator: Arc<dyn SummaryGenerator>,
    config: SchedulerConfig,
    jwt_secret: Option<String>,
) -> Result<()> {
    if jwt_secret.is_none() {
        warn!("SUPABASE_JWT_SECRET not set, bearer tokens are decoded without verification");
    }
    let database = db::Database::connect(database_url).await?;
    let state = AppState::new(database, generator, config, jwt_secret);

    match state.db.get_scheduled_summaries().await {
        Ok(pending) => {
            state.scheduler.resume_pending(&pending);
        }
        Err(e) => warn!(error = %e, "failed to load pending summary schedules"),
    }

    let app = build_router(state.clone());
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    info!(port, "server running");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    state.scheduler.shutdown();
    info!("server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! { _ = ctrl_c => info!("received SIGINT, shutting down"), _ = sigterm.recv() => info!("received SIGTERM, shutting down") }
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                ctrl_c.await.ok();
                info!("received SIGINT, shutting down");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("received SIGINT, shutting down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_path_preserves_static_routes() {
        assert_eq!(normalize_path("/healthz"), "/healthz");
        assert_eq!(normalize_path("/metrics"), "/metrics");
    }

    #[test]
    fn normalize_path_collapses_numeric_ids() {
        assert_eq!(normalize_path("/api/items/42"), "/api/items/:id");
    }

    #[test]
    fn normalize_path_collapses_uuids() {
        assert_eq!(
            normalize_path(
                "/api/companies/550e8400-e29b-41d4-a716-446655440000/projects/6ba7b810-9dad-11d1-80b4-00c04fd430c8/summary"
            ),
            "/api/companies/:uuid/projects/:uuid/summary"
        );
    }

    #[test]
    fn normalize_path_handles_empty_and_root() {
        assert_eq!(normalize_path("/"), "/");
        assert_eq!(normalize_path(""), "");
    }
}
