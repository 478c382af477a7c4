use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};

use cashbook_accounting::{LocationFilter, NewMoneyLocation};
use cashbook_core::MoneyLocationId;

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::RequestContext;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_locations).post(create_location))
        .route("/:id", get(get_location))
        .route("/:id/deactivate", post(deactivate_location))
        .route("/:id/reconcile", post(reconcile_location))
}

fn parse_id(raw: &str) -> Result<MoneyLocationId, Response> {
    raw.parse().map_err(|_| errors::invalid_id("money location"))
}

pub async fn list_locations(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::LocationQuery>,
) -> Result<Response, Response> {
    let filter = match query.filter.as_deref() {
        Some(raw) => raw.parse::<LocationFilter>().map_err(|e| {
            errors::json_error(StatusCode::BAD_REQUEST, "invalid_filter", e.to_string())
        })?,
        None => LocationFilter::Active,
    };
    let items = services
        .ledger
        .locations
        .list(filter)
        .await
        .map_err(errors::ledger_error_to_response)?;
    Ok((StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response())
}

pub async fn get_location(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> Result<Response, Response> {
    let location = services
        .ledger
        .locations
        .get(parse_id(&id)?)
        .await
        .map_err(errors::ledger_error_to_response)?;
    Ok((StatusCode::OK, Json(location)).into_response())
}

pub async fn create_location(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Json(body): Json<NewMoneyLocation>,
) -> Result<Response, Response> {
    let user = errors::require_user(&ctx)?;
    let location = services
        .ledger
        .locations
        .create(body)
        .await
        .map_err(errors::ledger_error_to_response)?;
    tracing::info!(code = %location.code, acting_user = %user, "money location created");
    Ok((StatusCode::CREATED, Json(location)).into_response())
}

pub async fn deactivate_location(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> Result<Response, Response> {
    let user = errors::require_user(&ctx)?;
    let location = services
        .ledger
        .locations
        .deactivate(parse_id(&id)?)
        .await
        .map_err(errors::ledger_error_to_response)?;
    tracing::info!(code = %location.code, acting_user = %user, "money location deactivated");
    Ok((StatusCode::OK, Json(location)).into_response())
}

pub async fn reconcile_location(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> Result<Response, Response> {
    errors::require_user(&ctx)?;
    let reconciliation = services
        .ledger
        .locations
        .reconcile_balance(parse_id(&id)?)
        .await
        .map_err(errors::ledger_error_to_response)?;
    Ok((StatusCode::OK, Json(reconciliation)).into_response())
}
