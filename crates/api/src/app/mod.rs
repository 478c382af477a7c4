//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: store, notification bus, ledger services and handler registry
//! - `routes/`: HTTP routes + handlers (one file per ledger area)
//! - `dto.rs`: request DTOs and JSON mapping helpers
//! - `errors.rs`: `LedgerError` to status code mapping

use std::sync::Arc;

use axum::{routing::get, Extension, Router};
use tower::ServiceBuilder;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

/// Build the full HTTP router (public entrypoint used by `main.rs` and tests).
pub fn build_app(services: services::AppServices) -> Router {
    let ledger_routes = routes::router().layer(
        ServiceBuilder::new()
            .layer(axum::middleware::from_fn(middleware::acting_user_middleware))
            .layer(Extension(Arc::new(services))),
    );

    Router::new()
        .route("/health", get(routes::system::health))
        .merge(ledger_routes)
}
