//! Typed handler registry (synchronous, best-effort dispatch).
//!
//! Business workflows (sales, payments, procurement) raise typed events; each
//! event type is routed to the handlers registered for it. The registry is the
//! explicit replacement for a string-keyed bus with untyped payloads:
//!
//! - keys are the stable `Event::event_type()` names
//! - payloads stay typed (`M`) all the way into the handler
//! - delivery is synchronous and in registration order
//! - a failing handler is logged and skipped; nothing is retried (at-most-once)

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use crate::Event;

/// Failure reported by a handler. The registry only logs it.
#[derive(Debug, Error)]
#[error(transparent)]
pub struct HandlerError(Box<dyn std::error::Error + Send + Sync + 'static>);

impl HandlerError {
    pub fn new<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self(Box::new(err))
    }

    pub fn msg(message: impl Into<String>) -> Self {
        let message: String = message.into();
        Self(message.into())
    }

    pub fn into_inner(self) -> Box<dyn std::error::Error + Send + Sync + 'static> {
        self.0
    }
}

/// Handles one or more event types of `M`.
#[async_trait]
pub trait EventHandler<M>: Send + Sync {
    /// Stable handler name used in logs and dispatch reports.
    fn name(&self) -> &'static str;

    async fn handle(&self, message: &M) -> Result<(), HandlerError>;
}

/// Outcome of a single `dispatch` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub event_type: &'static str,
    pub delivered: Vec<&'static str>,
    pub failed: Vec<(&'static str, String)>,
}

impl DispatchReport {
    /// No handler was registered for the event type.
    pub fn is_unhandled(&self) -> bool {
        self.delivered.is_empty() && self.failed.is_empty()
    }

    /// Every registered handler succeeded.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Explicit registry keyed by event type.
pub struct HandlerRegistry<M> {
    handlers: HashMap<&'static str, Vec<Arc<dyn EventHandler<M>>>>,
}

impl<M> Default for HandlerRegistry<M> {
    fn default() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }
}

impl<M> core::fmt::Debug for HandlerRegistry<M> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut map = f.debug_map();
        for (event_type, handlers) in &self.handlers {
            let names: Vec<&'static str> = handlers.iter().map(|h| h.name()).collect();
            map.entry(event_type, &names);
        }
        map.finish()
    }
}

impl<M: Event> HandlerRegistry<M> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `event_type`. A handler may be registered for
    /// several types; registering it twice for the same type delivers twice.
    pub fn register(
        &mut self,
        event_type: &'static str,
        handler: Arc<dyn EventHandler<M>>,
    ) -> &mut Self {
        self.handlers.entry(event_type).or_default().push(handler);
        self
    }

    pub fn handlers_for(&self, event_type: &str) -> usize {
        self.handlers.get(event_type).map(Vec::len).unwrap_or(0)
    }

    pub fn event_types(&self) -> Vec<&'static str> {
        let mut types: Vec<&'static str> = self.handlers.keys().copied().collect();
        types.sort_unstable();
        types
    }

    /// Deliver `message` to every handler registered for its type.
    pub async fn dispatch(&self, message: &M) -> DispatchReport {
        let event_type = message.event_type();
        let mut report = DispatchReport {
            event_type,
            ..DispatchReport::default()
        };

        let Some(handlers) = self.handlers.get(event_type) else {
            debug!(event_type, "no handlers registered");
            return report;
        };

        for handler in handlers {
            match handler.handle(message).await {
                Ok(()) => report.delivered.push(handler.name()),
                Err(err) => {
                    warn!(event_type, handler = handler.name(), error = %err, "event handler failed");
                    report.failed.push((handler.name(), err.to_string()));
                }
            }
        }

        report
    }
}
