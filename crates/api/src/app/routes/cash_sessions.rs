use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};

use cashbook_core::{CashSessionId, MoneyLocationId};

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::RequestContext;

pub fn router() -> Router {
    Router::new()
        .route("/", post(open_session))
        .route("/active/:location_id", get(get_active_session))
        .route("/:id/close", post(close_session))
        .route("/:id/force-close", post(force_close_session))
}

fn parse_session_id(raw: &str) -> Result<CashSessionId, Response> {
    raw.parse().map_err(|_| errors::invalid_id("cash session"))
}

pub async fn open_session(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Json(body): Json<dto::OpenSessionRequest>,
) -> Result<Response, Response> {
    let user = errors::require_user(&ctx)?;
    let session = services
        .ledger
        .sessions
        .open_session(body.money_location_id, body.starting_cash, user, body.notes)
        .await
        .map_err(errors::ledger_error_to_response)?;
    Ok((StatusCode::CREATED, Json(session)).into_response())
}

/// 404 when the location has no open session.
pub async fn get_active_session(
    Extension(services): Extension<Arc<AppServices>>,
    Path(location_id): Path<String>,
) -> Result<Response, Response> {
    let location_id: MoneyLocationId = location_id
        .parse()
        .map_err(|_| errors::invalid_id("money location"))?;
    let session = services
        .ledger
        .sessions
        .get_active_session(location_id)
        .await
        .map_err(errors::ledger_error_to_response)?;
    match session {
        Some(session) => Ok((StatusCode::OK, Json(session)).into_response()),
        None => Err(errors::json_error(
            StatusCode::NOT_FOUND,
            "no_open_session",
            format!("no open cash session for location {location_id}"),
        )),
    }
}

pub async fn close_session(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::CloseSessionRequest>,
) -> Result<Response, Response> {
    let user = errors::require_user(&ctx)?;
    let session = services
        .ledger
        .sessions
        .close_session(parse_session_id(&id)?, body.actual_cash, user, body.notes)
        .await
        .map_err(errors::ledger_error_to_response)?;
    Ok((StatusCode::OK, Json(session)).into_response())
}

pub async fn force_close_session(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::CloseSessionRequest>,
) -> Result<Response, Response> {
    let user = errors::require_user(&ctx)?;
    let session = services
        .ledger
        .sessions
        .force_close(parse_session_id(&id)?, body.actual_cash, user, body.notes)
        .await
        .map_err(errors::ledger_error_to_response)?;
    Ok((StatusCode::OK, Json(session)).into_response())
}
