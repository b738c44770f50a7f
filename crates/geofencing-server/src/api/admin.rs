//! Administrator secret check.

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::api::auth::Credential;
use crate::state::SharedState;

/// Creates the admin router.
pub fn router() -> Router<SharedState> {
    Router::new().route("/check", post(check_admin))
}

/// Result of an administrator secret check.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({ "is_admin": true }))]
pub struct AdminCheckResponse {
    /// Whether the credential is the administrator secret.
    pub is_admin: bool,
}

/// Checks whether the `Authorization` header carries the administrator
/// secret. Never fails; a missing secret in the configuration yields
/// `false`.
#[utoipa::path(
    post,
    path = "/api/admin/check",
    tag = "system",
    operation_id = "checkAdmin",
    summary = "Check the administrator secret",
    responses(
        (status = 200, description = "Check result", body = AdminCheckResponse)
    )
)]
pub async fn check_admin(
    State(state): State<SharedState>,
    credential: Credential,
) -> Json<AdminCheckResponse> {
    Json(AdminCheckResponse {
        is_admin: credential.is_admin(state.engine()),
    })
}
