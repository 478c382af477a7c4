use anyhow::Context;

use cashbook_infra::LedgerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cashbook_observability::init();

    let config = LedgerConfig::from_env().context("invalid ledger configuration")?;
    let services = cashbook_api::app::services::build_services(&config).await?;
    let app = cashbook_api::app::build_app(services);

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!(addr = %listener.local_addr()?, prefix = %config.entry_prefix, "listening");

    axum::serve(listener, app).await?;
    Ok(())
}
