use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};

use cashbook_accounting::NewJournalEntry;
use cashbook_core::JournalEntryId;

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::RequestContext;

pub fn router() -> Router {
    Router::new()
        .route("/entries", get(list_entries).post(create_entry))
        .route("/entries/:id", get(get_entry))
        .route("/entries/:id/post", post(post_entry))
}

fn parse_id(raw: &str) -> Result<JournalEntryId, Response> {
    raw.parse().map_err(|_| errors::invalid_id("journal entry"))
}

pub async fn create_entry(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Json(body): Json<NewJournalEntry>,
) -> Result<Response, Response> {
    let user = errors::require_user(&ctx)?;
    let entry = services
        .ledger
        .journal
        .create_entry(body, user)
        .await
        .map_err(errors::ledger_error_to_response)?;
    Ok((StatusCode::CREATED, Json(entry)).into_response())
}

pub async fn list_entries(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::EntriesQuery>,
) -> Result<Response, Response> {
    let filter = dto::to_entry_filter(query)?;
    let items = services
        .ledger
        .journal
        .list_entries(&filter)
        .await
        .map_err(errors::ledger_error_to_response)?;
    Ok((StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response())
}

pub async fn get_entry(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> Result<Response, Response> {
    let entry = services
        .ledger
        .journal
        .get_entry(parse_id(&id)?)
        .await
        .map_err(errors::ledger_error_to_response)?;
    Ok((StatusCode::OK, Json(entry)).into_response())
}

/// Idempotent: posting a posted entry returns it unchanged.
pub async fn post_entry(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> Result<Response, Response> {
    errors::require_user(&ctx)?;
    let entry = services
        .ledger
        .journal
        .post_entry(parse_id(&id)?)
        .await
        .map_err(errors::ledger_error_to_response)?;
    Ok((StatusCode::OK, Json(entry)).into_response())
}
