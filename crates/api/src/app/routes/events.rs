use std::sync::Arc;

use axum::{
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use tracing::debug;

use cashbook_infra::handlers::BusinessEvent;

use crate::app::errors;
use crate::app::services::AppServices;
use crate::context::RequestContext;

/// Hand a business event to the registered ledger handlers.
///
/// The `x-user-id` header is the acting user; a different `acting_user` in
/// the payload is overridden. Handler failures do not fail the request; they
/// come back in the report with `202 Accepted` so the caller can see which
/// handler refused.
pub async fn dispatch_event(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Json(event): Json<BusinessEvent>,
) -> Result<Response, Response> {
    let user = errors::require_user(&ctx)?;
    if event.acting_user() != user {
        debug!(claimed = %event.acting_user(), acting_user = %user, "overriding payload acting user");
    }
    let event = event.with_acting_user(user);
    let report = services.registry.dispatch(&event).await;

    let status = if report.is_clean() {
        StatusCode::OK
    } else {
        StatusCode::ACCEPTED
    };
    let failed = report
        .failed
        .iter()
        .map(|(handler, error)| serde_json::json!({ "handler": handler, "error": error }))
        .collect::<Vec<_>>();

    Ok((
        status,
        Json(serde_json::json!({
            "event_type": report.event_type,
            "delivered": report.delivered,
            "failed": failed,
        })),
    )
        .into_response())
}
