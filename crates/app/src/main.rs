mod api;
mod catalog;
mod deliveries;
mod problem;
mod router;
mod telemetry;

use std::{net::SocketAddr, sync::Arc};

use tracing::info;

use catalog_core::notifier::NotifierFactory;
use catalog_core::presenter::Presenter;
use catalog_storage::Database;
use catalog_util::{load_env_file, AppConfig};

use crate::catalog::ProductCatalog;
use crate::deliveries::DeliveryFeed;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    load_env_file();
    let config = AppConfig::from_env()?;

    telemetry::init_tracing(&config)?;
    let metrics = telemetry::init_metrics()?;

    let database = Database::connect(&config.database_url).await?;
    database.run_migrations().await?;

    let notifiers = NotifierFactory::new(config.notifier.channels.as_slice());
    info!(
        stage = "app",
        configured = ?config.notifier.channels,
        enabled = ?notifiers.channels(),
        timeout_ms = catalog::duration_millis(config.notifier.timeout),
        "notifier channels resolved"
    );

    let deliveries = DeliveryFeed::new();
    let catalog = ProductCatalog::new(
        database,
        notifiers,
        Arc::new(deliveries.clone()),
        config.notifier.timeout,
    );
    let state = router::AppState::new(
        metrics,
        catalog,
        Presenter::new(config.public_base_url.clone()),
        deliveries,
    );

    let addr: SocketAddr = config.bind_addr;
    info!(stage = "app", %addr, env = %config.environment.as_str(), "starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router::app_router(state))
        .await
        .map_err(|err| err.into())
}
