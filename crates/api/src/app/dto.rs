use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;

use cashbook_accounting::{Account, EntryFilter, EntryType};
use cashbook_core::{CashSessionId, MoneyLocationId};

use crate::app::errors;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct BalanceQuery {
    pub as_of: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct LocationQuery {
    /// `all`, `active`, `drawers` or `type:<LOCATION_TYPE>`. Defaults to `active`.
    pub filter: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct EntriesQuery {
    #[serde(rename = "type")]
    pub entry_type: Option<String>,
    pub session: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub posted: Option<bool>,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct OpenSessionRequest {
    pub money_location_id: MoneyLocationId,
    #[serde(default)]
    pub starting_cash: Decimal,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CloseSessionRequest {
    pub actual_cash: Decimal,
    pub notes: Option<String>,
}

// -------------------------
// Mapping helpers
// -------------------------

pub fn to_entry_filter(query: EntriesQuery) -> Result<EntryFilter, axum::response::Response> {
    let entry_type = match query.entry_type.as_deref() {
        Some(raw) => Some(raw.parse::<EntryType>().map_err(|e| {
            errors::json_error(axum::http::StatusCode::BAD_REQUEST, "invalid_entry_type", e.to_string())
        })?),
        None => None,
    };
    let cash_session_id = match query.session.as_deref() {
        Some(raw) => Some(raw.parse::<CashSessionId>().map_err(|_| errors::invalid_id("session"))?),
        None => None,
    };

    Ok(EntryFilter {
        entry_type,
        cash_session_id,
        from: query.from,
        to: query.to,
        is_posted: query.posted,
        limit: query.limit,
    })
}

/// Signed ledger balance plus the same figure on the account's normal side.
pub fn balance_to_json(account: &Account, signed: Decimal, as_of: Option<DateTime<Utc>>) -> serde_json::Value {
    serde_json::json!({
        "account_id": account.id,
        "code": account.code,
        "name": account.name,
        "normal_side": account.normal_side,
        "balance": signed,
        "natural_balance": account.natural_balance(signed),
        "as_of": as_of,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_filter_parses_type_and_session() {
        let session = CashSessionId::new();
        let filter = to_entry_filter(EntriesQuery {
            entry_type: Some("SALE".into()),
            session: Some(session.to_string()),
            posted: Some(true),
            limit: Some(5),
            ..EntriesQuery::default()
        })
        .unwrap();

        assert_eq!(filter.entry_type, Some(EntryType::Sale));
        assert_eq!(filter.cash_session_id, Some(session));
        assert_eq!(filter.is_posted, Some(true));
        assert_eq!(filter.limit, Some(5));
    }

    #[test]
    fn bad_session_id_is_rejected() {
        let result = to_entry_filter(EntriesQuery {
            session: Some("nope".into()),
            ..EntriesQuery::default()
        });
        assert_eq!(result.unwrap_err().status(), axum::http::StatusCode::BAD_REQUEST);
    }
}
