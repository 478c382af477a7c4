use axum::{routing::post, Router};

pub mod accounts;
pub mod cash_sessions;
pub mod events;
pub mod journal;
pub mod money_locations;
pub mod system;

/// Router for all ledger endpoints.
pub fn router() -> Router {
    Router::new()
        .nest("/accounts", accounts::router())
        .nest("/money-locations", money_locations::router())
        .nest("/journal", journal::router())
        .nest("/cash-sessions", cash_sessions::router())
        .route("/events", post(events::dispatch_event))
}
