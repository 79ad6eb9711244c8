//! # Project Summary REST API
//!
//! | Endpoint | Effect |
//! |----------|--------|
//! | `GET …/summary` | the stored summary document (`idle` when none exists) |
//! | `POST …/summary/generate` | manual generation; responds with the trigger outcome |

use super::middleware_auth::ProjectAccess;
use super::AppState;
use crate::summary::{GenerationMode, SkipReason, TriggerOutcome};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use std::sync::Arc;

/// HTTP status for a trigger outcome. The body always carries the outcome.
fn outcome_status(outcome: &TriggerOutcome) -> StatusCode {
    match outcome.skip_reason() {
        None => StatusCode::OK,
        Some(SkipReason::AlreadyGenerating) => StatusCode::CONFLICT,
        Some(SkipReason::GenerationFailed) => StatusCode::BAD_GATEWAY,
        Some(SkipReason::StorageError) => StatusCode::SERVICE_UNAVAILABLE,
        Some(SkipReason::NotScheduled | SkipReason::NotDue) => StatusCode::OK,
    }
}

/// `GET …/summary` - Current summary document.
pub(super) async fn handler_get_summary(
    State(state): State<Arc<AppState>>,
    access: ProjectAccess,
) -> impl IntoResponse {
    match state.db.get_summary_metadata(access.key).await {
        Ok(meta) => Json(meta.unwrap_or_default()).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({"error": e.to_string()})),
        )
            .into_response(),
    }
}

/// `POST …/summary/generate` - Generate now, cancelling any pending timer.
pub(super) async fn handler_generate_summary(
    State(state): State<Arc<AppState>>,
    access: ProjectAccess,
) -> impl IntoResponse {
    let outcome = state
        .scheduler
        .trigger_generation(access.key, GenerationMode::Manual)
        .await;
    (outcome_status(&outcome), Json(outcome))
}
