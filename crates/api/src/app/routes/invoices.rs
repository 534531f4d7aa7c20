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
use licensedesk_core::InvoiceId;

use crate::app::{dto, errors};
use crate::app::services::AppServices;
use crate::authz::require_permission;
use crate::context::PrincipalContext;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_invoices).post(create_invoice))
        .route(
            "/:id",
            get(get_invoice).patch(update_invoice).delete(delete_invoice),
        )
}

fn parse_id(raw: &str) -> Result<InvoiceId, Response> {
    raw.parse().map_err(|_| errors::invalid_id("invoice"))
}

pub async fn create_invoice(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    body: Result<Json<dto::CreateInvoiceRequest>, JsonRejection>,
) -> Response {
    if let Err(resp) = require_permission(&principal, &Permission::INVOICES_WRITE) {
        return resp;
    }
    let Json(body) = match body {
        Ok(b) => b,
        Err(rejection) => return errors::json_rejection(rejection),
    };
    let (new, license_ids) = match body.into_parts() {
        Ok(parts) => parts,
        Err(e) => return errors::domain_error_to_response(e),
    };

    match services
        .lifecycle()
        .create_invoice(principal.actor(), new, license_ids)
        .await
    {
        Ok(created) => (
            StatusCode::CREATED,
            Json(dto::invoice_with_licenses_to_json(&created)),
        )
            .into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn list_invoices(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    query: Result<Query<dto::InvoiceListQuery>, QueryRejection>,
) -> Response {
    if let Err(resp) = require_permission(&principal, &Permission::INVOICES_READ) {
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

    match services.lifecycle().list_invoices(filter, pagination).await {
        Ok(invoices) => {
            let items = invoices.iter().map(dto::invoice_to_json).collect::<Vec<_>>();
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

pub async fn get_invoice(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> Response {
    if let Err(resp) = require_permission(&principal, &Permission::INVOICES_READ) {
        return resp;
    }
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.lifecycle().get_invoice(id).await {
        Ok(found) => (StatusCode::OK, Json(dto::invoice_with_licenses_to_json(&found))).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn update_invoice(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    body: Result<Json<dto::UpdateInvoiceRequest>, JsonRejection>,
) -> Response {
    if let Err(resp) = require_permission(&principal, &Permission::INVOICES_WRITE) {
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
        .update_invoice(principal.actor(), id, changes)
        .await
    {
        Ok(updated) => (StatusCode::OK, Json(dto::invoice_with_licenses_to_json(&updated))).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn delete_invoice(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> Response {
    if let Err(resp) = require_permission(&principal, &Permission::INVOICES_WRITE) {
        return resp;
    }
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.lifecycle().delete_invoice(principal.actor(), id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}
