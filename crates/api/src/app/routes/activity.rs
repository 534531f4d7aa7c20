use std::sync::Arc;

use axum::{
    extract::{rejection::QueryRejection, Extension, Query},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};

use licensedesk_auth::Permission;

use crate::app::{dto, errors};
use crate::app::services::AppServices;
use crate::authz::require_permission;
use crate::context::PrincipalContext;

pub fn router() -> Router {
    Router::new().route("/", get(list_activity))
}

/// Newest-first audit trail, optionally narrowed to one subject.
pub async fn list_activity(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    query: Result<Query<dto::ActivityQuery>, QueryRejection>,
) -> Response {
    if let Err(resp) = require_permission(&principal, &Permission::ACTIVITY_READ) {
        return resp;
    }
    let Query(query) = match query {
        Ok(q) => q,
        Err(rejection) => return errors::query_rejection(rejection),
    };
    let (filter, pagination) = match query.into_parts() {
        Ok(parts) => parts,
        Err(e) => return errors::domain_error_to_response(e),
    };

    match services.lifecycle().list_activity(filter, pagination).await {
        Ok(page) => (StatusCode::OK, Json(dto::activity_page_to_json(&page))).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}
