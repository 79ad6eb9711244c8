//! JWT auth extractors for the project API routes.
//!
//! Extracts the Supabase JWT from the `Authorization: Bearer <token>` header
//! and decodes it. Project routes use the [`ProjectAccess`] extractor, which
//! additionally requires the token subject to be a member of the company in
//! the path.

use axum::extract::{FromRequestParts, Path};
use axum::http::request::Parts;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use super::AppState;
use crate::summary::ProjectKey;

/// JWT claims from a Supabase-issued token.
#[derive(Debug, Deserialize)]
struct SupabaseClaims {
    /// Subject: the Supabase auth user ID (UUID).
    sub: String,
}

/// Authenticated user info.
#[derive(Debug, Clone, Serialize)]
pub struct AuthUser {
    pub user_id: Uuid,
}

/// Decode and optionally verify a Supabase JWT.
///
/// With a secret, performs full HS256 verification. Otherwise decodes without
/// signature validation (development mode).
fn decode_jwt(token: &str, secret: Option<&str>) -> Result<SupabaseClaims, String> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_audience(&["authenticated"]);
    match secret {
        Some(secret) => {
            let key = DecodingKey::from_secret(secret.as_bytes());
            let data = decode::<SupabaseClaims>(token, &key, &validation)
                .map_err(|e| format!("JWT verification failed: {}", e))?;
            Ok(data.claims)
        }
        None => {
            validation.insecure_disable_signature_validation();
            validation.validate_exp = false;
            let data = decode::<SupabaseClaims>(token, &DecodingKey::from_secret(b""), &validation)
                .map_err(|e| format!("JWT decode failed: {}", e))?;
            Ok(data.claims)
        }
    }
}

pub(super) fn extract_auth_user(state: &AppState, parts: &Parts) -> Option<AuthUser> {
    let auth_header = parts.headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = auth_header.strip_prefix("Bearer ")?;
    let claims = decode_jwt(token, state.jwt_secret.as_deref()).ok()?;
    let user_id = claims.sub.parse().ok()?;
    Some(AuthUser { user_id })
}

fn reject(status: StatusCode, message: &str) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

/// Path segments shared by every project route.
#[derive(Debug, Deserialize)]
struct ProjectPath {
    company_id: Uuid,
    project_id: Uuid,
}

/// Axum extractor for routes scoped to one project.
///
/// Returns 401 if no valid JWT is present, 403 if the user is not a member of
/// the company in the path, and 404 if the project does not belong to that
/// company.
pub struct ProjectAccess {
    pub user: AuthUser,
    pub key: ProjectKey,
}

impl FromRequestParts<Arc<AppState>> for ProjectAccess {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let user = extract_auth_user(state, parts)
            .ok_or_else(|| reject(StatusCode::UNAUTHORIZED, "Authentication required"))?;

        let Path(path) = Path::<ProjectPath>::from_request_parts(parts, state)
            .await
            .map_err(IntoResponse::into_response)?;

        match state.db.is_company_member(path.company_id, user.user_id).await {
            Ok(true) => {}
            Ok(false) => return Err(reject(StatusCode::FORBIDDEN, "Not a member of this company")),
            Err(e) => {
                warn!(error = %e, "membership lookup failed");
                return Err(reject(StatusCode::INTERNAL_SERVER_ERROR, "Membership lookup failed"));
            }
        }

        let key = ProjectKey::new(path.company_id, path.project_id);
        match state.db.project_exists(key).await {
            Ok(true) => Ok(ProjectAccess { user, key }),
            Ok(false) => Err(reject(StatusCode::NOT_FOUND, "Project not found")),
            Err(e) => {
                warn!(error = %e, "project lookup failed");
                Err(reject(StatusCode::INTERNAL_SERVER_ERROR, "Project lookup failed"))
            }
        }
    }
}
