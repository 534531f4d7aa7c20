//! API-side authorization guard.
//!
//! Handlers call this before touching the lifecycle service, keeping the
//! domain and infra crates auth-agnostic.

use axum::http::StatusCode;
use axum::response::Response;

use licensedesk_auth::{Permission, authorize};

use crate::app::errors::json_error;
use crate::context::PrincipalContext;

/// Check that the request's principal holds `required`; on failure the
/// returned response is a ready-made 403 envelope.
pub fn require_permission(
    principal: &PrincipalContext,
    required: &Permission,
) -> Result<(), Response> {
    authorize(principal.principal(), required)
        .map_err(|e| json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string()))
}
