//! Event mechanics for the ledger: typed events, envelopes, pub/sub and the
//! handler registry used to route business events to their handlers.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;
pub mod registry;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
pub use registry::{DispatchReport, EventHandler, HandlerError, HandlerRegistry};
