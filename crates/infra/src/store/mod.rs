//! Ledger storage boundary.
//!
//! This module defines the infrastructure-facing abstraction the services
//! persist through, plus an in-memory and a Postgres implementation.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use cashbook_accounting::{LedgerError, LedgerResult};

pub use in_memory::{FailPoint, InMemoryLedgerStore};
pub use postgres::PostgresLedgerStore;
pub use r#trait::{LedgerStore, StoreError, StoreResult};

/// Run one storage call under `timeout`.
///
/// A call that does not finish in time is dropped. Both stores make every
/// call all-or-nothing, so a dropped call leaves no partial state behind.
pub async fn bounded<T, F>(timeout: Duration, operation: &'static str, call: F) -> LedgerResult<T>
where
    F: Future<Output = StoreResult<T>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result.map_err(LedgerError::from),
        Err(_) => {
            warn!(operation, timeout_ms = timeout.as_millis() as u64, "storage call timed out");
            Err(LedgerError::Timeout(operation))
        }
    }
}
