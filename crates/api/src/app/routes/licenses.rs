use std::sync::Arc;

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Extension, Path, Query,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};

use licensedesk_auth::Permission;
use licensedesk_core::LicenseId;

use crate::app::{dto, errors};
use crate::app::services::AppServices;
use crate::authz::require_permission;
use crate::context::PrincipalContext;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_licenses).post(create_license))
        .route("/by-key/:key", get(get_license_by_key))
        .route(
            "/:id",
            get(get_license).patch(update_license).delete(delete_license),
        )
}

fn parse_id(raw: &str) -> Result<LicenseId, Response> {
    raw.parse().map_err(|_| errors::invalid_id("license"))
}

pub async fn create_license(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    body: Result<Json<dto::CreateLicenseRequest>, JsonRejection>,
) -> Response {
    if let Err(resp) = require_permission(&principal, &Permission::LICENSES_WRITE) {
        return resp;
    }
    let Json(body) = match body {
        Ok(b) => b,
        Err(rejection) => return errors::json_rejection(rejection),
    };
    let new = match body.into_new_license() {
        Ok(n) => n,
        Err(e) => return errors::domain_error_to_response(e),
    };

    match services.lifecycle().create_license(principal.actor(), new).await {
        Ok(license) => (StatusCode::CREATED, Json(dto::license_to_json(&license))).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn list_licenses(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    query: Result<Query<dto::LicenseListQuery>, QueryRejection>,
) -> Response {
    if let Err(resp) = require_permission(&principal, &Permission::LICENSES_READ) {
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

    match services
        .lifecycle()
        .list_licenses(principal.actor(), filter, pagination)
        .await
    {
        Ok(licenses) => {
            let items = licenses.iter().map(dto::license_to_json).collect::<Vec<_>>();
            (
                StatusCode::OK,
                Json(serde_json::json!({
                    "items": items,
                    "limit": pagination.limit,
                    "offset": pagination.offset,
                })),
            )
                .into_response()
        }
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn get_license(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> Response {
    if let Err(resp) = require_permission(&principal, &Permission::LICENSES_READ) {
        return resp;
    }
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.lifecycle().get_license(principal.actor(), id).await {
        Ok(license) => (StatusCode::OK, Json(dto::license_to_json(&license))).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn get_license_by_key(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(key): Path<String>,
) -> Response {
    if let Err(resp) = require_permission(&principal, &Permission::LICENSES_READ) {
        return resp;
    }

    match services
        .lifecycle()
        .get_license_by_key(principal.actor(), &key)
        .await
    {
        Ok(license) => (StatusCode::OK, Json(dto::license_to_json(&license))).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn update_license(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    body: Result<Json<dto::UpdateLicenseRequest>, JsonRejection>,
) -> Response {
    if let Err(resp) = require_permission(&principal, &Permission::LICENSES_WRITE) {
        return resp;
    }
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let Json(body) = match body {
        Ok(b) => b,
        Err(rejection) => return errors::json_rejection(rejection),
    };
    let changes = match body.into_changes() {
        Ok(c) => c,
        Err(e) => return errors::domain_error_to_response(e),
    };

    match services
        .lifecycle()
        .update_license(principal.actor(), id, changes)
        .await
    {
        Ok(license) => (StatusCode::OK, Json(dto::license_to_json(&license))).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn delete_license(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> Response {
    if let Err(resp) = require_permission(&principal, &Permission::LICENSES_WRITE) {
        return resp;
    }
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.lifecycle().delete_license(principal.actor(), id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}
