//! Best-effort publication of ledger notifications.

use tracing::{debug, warn};

use cashbook_accounting::LedgerEvent;
use cashbook_events::{Event, EventBus, EventEnvelope};

/// Envelope type carried on the ledger notification bus.
pub type LedgerEnvelope = EventEnvelope<LedgerEvent>;

/// Publish `event` once. A failed publish is logged and swallowed: the
/// ledger rows are already committed and remain the source of truth.
pub(crate) fn publish<B>(bus: &B, event: LedgerEvent)
where
    B: EventBus<LedgerEnvelope>,
{
    let event_type = event.event_type();
    match bus.publish(EventEnvelope::wrap(event)) {
        Ok(()) => debug!(event_type, "ledger notification published"),
        Err(err) => warn!(event_type, error = ?err, "failed to publish ledger notification"),
    }
}
