use axum::{routing::get, Router};

pub mod activity;
pub mod invoices;
pub mod licenses;
pub mod system;

/// Router for all authenticated endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .nest("/licenses", licenses::router())
        .nest("/invoices", invoices::router())
        .nest("/activity", activity::router())
}
