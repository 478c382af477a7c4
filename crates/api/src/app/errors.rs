use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use cashbook_accounting::LedgerError;

use crate::context::RequestContext;

pub fn ledger_error_to_response(err: LedgerError) -> axum::response::Response {
    let (status, code) = classify(&err);
    if status.is_server_error() {
        tracing::warn!(error = %err, status = status.as_u16(), "ledger request failed");
    }
    json_error(status, code, err.to_string())
}

fn classify(err: &LedgerError) -> (StatusCode, &'static str) {
    match err {
        LedgerError::ImbalancedEntry { .. } => (StatusCode::UNPROCESSABLE_ENTITY, "imbalanced_entry"),
        LedgerError::InsufficientLines { .. } => (StatusCode::UNPROCESSABLE_ENTITY, "insufficient_lines"),
        LedgerError::GroupAccount(_) => (StatusCode::UNPROCESSABLE_ENTITY, "group_account"),
        LedgerError::SessionNotOpen(_) => (StatusCode::UNPROCESSABLE_ENTITY, "session_not_open"),
        LedgerError::PendingActivity(_) => (StatusCode::UNPROCESSABLE_ENTITY, "pending_activity"),
        LedgerError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
        LedgerError::AccountNotFound(_) => (StatusCode::NOT_FOUND, "account_not_found"),
        LedgerError::MoneyLocationNotFound(_) => (StatusCode::NOT_FOUND, "money_location_not_found"),
        LedgerError::EntryNotFound(_) => (StatusCode::NOT_FOUND, "entry_not_found"),
        LedgerError::SessionNotFound(_) => (StatusCode::NOT_FOUND, "session_not_found"),
        LedgerError::SessionAlreadyOpen(_) => (StatusCode::CONFLICT, "session_already_open"),
        LedgerError::SessionStillOpen(_) => (StatusCode::CONFLICT, "session_still_open"),
        LedgerError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
        LedgerError::SequenceExhausted { .. } => (StatusCode::CONFLICT, "sequence_exhausted"),
        LedgerError::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
        LedgerError::Persistence(_) => (StatusCode::INTERNAL_SERVER_ERROR, "persistence_error"),
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

pub fn invalid_id(what: &str) -> axum::response::Response {
    json_error(StatusCode::BAD_REQUEST, "invalid_id", format!("invalid {what} id"))
}

/// Writes need an acting user for the audit columns.
pub fn require_user(ctx: &RequestContext) -> Result<cashbook_core::UserId, axum::response::Response> {
    ctx.acting_user().ok_or_else(|| {
        json_error(
            StatusCode::UNAUTHORIZED,
            "missing_user",
            "x-user-id header is required for writes",
        )
    })
}
