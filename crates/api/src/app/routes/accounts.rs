use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};

use cashbook_accounting::NewAccount;

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::RequestContext;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_accounts).post(create_account))
        .route("/tree", get(account_tree))
        .route("/:code", get(get_account))
        .route("/:code/balance", get(get_balance))
        .route("/:code/deactivate", post(deactivate_account))
}

pub async fn list_accounts(
    Extension(services): Extension<Arc<AppServices>>,
) -> Result<Response, Response> {
    let items = services
        .ledger
        .accounts
        .list_accounts()
        .await
        .map_err(errors::ledger_error_to_response)?;
    Ok((StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response())
}

pub async fn account_tree(
    Extension(services): Extension<Arc<AppServices>>,
) -> Result<Response, Response> {
    let nodes = services
        .ledger
        .accounts
        .account_tree()
        .await
        .map_err(errors::ledger_error_to_response)?;
    Ok((StatusCode::OK, Json(serde_json::json!({ "items": nodes }))).into_response())
}

pub async fn get_account(
    Extension(services): Extension<Arc<AppServices>>,
    Path(code): Path<String>,
) -> Result<Response, Response> {
    let account = services
        .ledger
        .accounts
        .get_account(&code)
        .await
        .map_err(errors::ledger_error_to_response)?;
    Ok((StatusCode::OK, Json(account)).into_response())
}

pub async fn get_balance(
    Extension(services): Extension<Arc<AppServices>>,
    Path(code): Path<String>,
    Query(query): Query<dto::BalanceQuery>,
) -> Result<Response, Response> {
    let ledger = &services.ledger;
    let account = ledger
        .accounts
        .get_account(&code)
        .await
        .map_err(errors::ledger_error_to_response)?;
    let balance = ledger
        .journal
        .get_account_balance(account.id, query.as_of)
        .await
        .map_err(errors::ledger_error_to_response)?;
    Ok((StatusCode::OK, Json(dto::balance_to_json(&account, balance, query.as_of))).into_response())
}

pub async fn create_account(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Json(body): Json<NewAccount>,
) -> Result<Response, Response> {
    let user = errors::require_user(&ctx)?;
    let account = services
        .ledger
        .accounts
        .create_account(body)
        .await
        .map_err(errors::ledger_error_to_response)?;
    tracing::info!(code = %account.code, acting_user = %user, "account created");
    Ok((StatusCode::CREATED, Json(account)).into_response())
}

pub async fn deactivate_account(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Path(code): Path<String>,
) -> Result<Response, Response> {
    let user = errors::require_user(&ctx)?;
    let accounts = &services.ledger.accounts;
    let account = accounts
        .get_account(&code)
        .await
        .map_err(errors::ledger_error_to_response)?;
    let account = accounts
        .deactivate_account(account.id)
        .await
        .map_err(errors::ledger_error_to_response)?;
    tracing::info!(code = %account.code, acting_user = %user, "account deactivated");
    Ok((StatusCode::OK, Json(account)).into_response())
}
