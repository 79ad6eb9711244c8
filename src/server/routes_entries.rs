//! # Project Entry REST API
//!
//! | Endpoint | Effect |
//! |----------|--------|
//! | `GET …/entries` | active entries, oldest first |
//! | `POST …/entries` | insert, then schedule summary regeneration |
//! | `PUT …/entries/{entry_id}` | supersede with an edited version, then schedule |
//! | `DELETE …/entries/{entry_id}` | soft delete, then schedule |
//!
//! Scheduling runs in a spawned task; a scheduling failure is logged and never
//! fails the entry write.

use super::middleware_auth::ProjectAccess;
use super::AppState;
use crate::db::{has_text, EntryEdit, EntryUpdate, NewEntry};
use crate::summary::EntryType;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

fn internal_error(e: anyhow::Error) -> axum::response::Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({"error": e.to_string()})),
    )
        .into_response()
}

fn bad_request(message: &str) -> axum::response::Response {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({ "error": message })),
    )
        .into_response()
}

fn not_found() -> axum::response::Response {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({"error": "entry not found"})),
    )
        .into_response()
}

/// Text entries carry their content inline; photos and audio may arrive
/// before a caption or transcript exists.
fn validate_new_entry(entry: &NewEntry) -> Result<(), &'static str> {
    if entry.entry_type == EntryType::Text && !has_text(entry.text_content.as_deref()) {
        return Err("text entries require text_content");
    }
    Ok(())
}

/// `GET …/entries` - List the project's active entries.
pub(super) async fn handler_list_entries(
    State(state): State<Arc<AppState>>,
    access: ProjectAccess,
) -> impl IntoResponse {
    match state.db.get_active_entries(access.key).await {
        Ok(entries) => Json(serde_json::json!({ "entries": entries })).into_response(),
        Err(e) => internal_error(e),
    }
}

/// `POST …/entries` - Create an entry.
pub(super) async fn handler_create_entry(
    State(state): State<Arc<AppState>>,
    access: ProjectAccess,
    Json(payload): Json<NewEntry>,
) -> impl IntoResponse {
    if let Err(message) = validate_new_entry(&payload) {
        return bad_request(message);
    }
    match state.db.insert_entry(access.key, &payload).await {
        Ok(row) => {
            info!(project = %access.key.project_id, user = %access.user.user_id, entry = %row.id, entry_type = %payload.entry_type, "entry created");
            state.notify_entry_changed(access.key, payload.entry_type);
            (StatusCode::CREATED, Json(row)).into_response()
        }
        Err(e) => internal_error(e),
    }
}

/// `PUT …/entries/{entry_id}` - Replace an entry with an edited version.
pub(super) async fn handler_edit_entry(
    State(state): State<Arc<AppState>>,
    access: ProjectAccess,
    Path((_, _, entry_id)): Path<(Uuid, Uuid, Uuid)>,
    Json(payload): Json<EntryUpdate>,
) -> impl IntoResponse {
    match state.db.supersede_entry(access.key, entry_id, &payload).await {
        Ok(EntryEdit::Superseded(row)) => {
            info!(project = %access.key.project_id, user = %access.user.user_id, previous = %entry_id, entry = %row.id, "entry edited");
            match row.entry_type.parse::<EntryType>() {
                Ok(entry_type) => state.notify_entry_changed(access.key, entry_type),
                Err(e) => tracing::warn!(entry = %row.id, error = %e, "edited entry has unknown type"),
            }
            Json(row).into_response()
        }
        Ok(EntryEdit::NotFound) => not_found(),
        Ok(EntryEdit::Rejected(message)) => bad_request(message),
        Err(e) => internal_error(e),
    }
}

/// `DELETE …/entries/{entry_id}` - Soft-delete an entry.
pub(super) async fn handler_delete_entry(
    State(state): State<Arc<AppState>>,
    access: ProjectAccess,
    Path((_, _, entry_id)): Path<(Uuid, Uuid, Uuid)>,
) -> impl IntoResponse {
    match state.db.soft_delete_entry(access.key, entry_id).await {
        Ok(Some(entry_type)) => {
            info!(project = %access.key.project_id, user = %access.user.user_id, entry = %entry_id, "entry deleted");
            state.notify_entry_changed(access.key, entry_type);
            StatusCode::NO_CONTENT.into_response()
        }
        Ok(None) => not_found(),
        Err(e) => internal_error(e),
    }
}
