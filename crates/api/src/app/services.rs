//! Infrastructure wiring: one store, one notification bus, the ledger
//! services and the business-event registry.

use std::sync::Arc;

use anyhow::Context;

use cashbook_events::{HandlerRegistry, InMemoryEventBus};
use cashbook_infra::handlers::{BusinessEvent, register_default_handlers};
use cashbook_infra::{
    InMemoryLedgerStore, LedgerConfig, LedgerEnvelope, LedgerServices, LedgerStore,
    PostgresLedgerStore,
};

pub type DynStore = Arc<dyn LedgerStore>;
pub type NotificationBus = Arc<InMemoryEventBus<LedgerEnvelope>>;
pub type Ledger = LedgerServices<DynStore, NotificationBus>;

pub struct AppServices {
    pub ledger: Arc<Ledger>,
    pub bus: NotificationBus,
    pub registry: HandlerRegistry<BusinessEvent>,
}

impl std::fmt::Debug for AppServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppServices")
            .field("event_types", &self.registry.event_types())
            .finish_non_exhaustive()
    }
}

impl AppServices {
    pub fn new(store: DynStore, config: &LedgerConfig) -> Self {
        let bus: NotificationBus = Arc::new(InMemoryEventBus::new());
        let ledger = Arc::new(LedgerServices::new(store, bus.clone(), config));

        let mut registry = HandlerRegistry::new();
        register_default_handlers(&mut registry, ledger.clone());

        Self { ledger, bus, registry }
    }

    /// In-memory store (dev/test).
    pub fn in_memory(config: &LedgerConfig) -> Self {
        Self::new(Arc::new(InMemoryLedgerStore::new()), config)
    }
}

/// Postgres when `DATABASE_URL` is configured, in-memory otherwise.
pub async fn build_services(config: &LedgerConfig) -> anyhow::Result<AppServices> {
    let Some(url) = config.database_url.as_deref() else {
        tracing::warn!("DATABASE_URL not set; using the in-memory ledger store");
        return Ok(AppServices::in_memory(config));
    };

    let store = PostgresLedgerStore::connect(url)
        .await
        .context("failed to connect to Postgres")?;
    store.migrate().await.context("failed to apply ledger schema")?;
    tracing::info!("using the Postgres ledger store");

    Ok(AppServices::new(Arc::new(store), config))
}
