//! Read-model projector
//!
//! Consumes every `*.event` topic and keeps the customer, catalog and vendor
//! read models up to date.
//!
//! ```text
//! broker (*.event)
//!   ↓ consumer group, manual commit after dispatch
//! ConsumerPool ── retry / <topic>.DLT
//!   ↓
//! CustomerProjector, CategoryProjector, ProductProjector, VendorProjector
//!   ↓
//! DocumentStore (MongoDB or in-memory)
//! ```
//!
//! `GET /health` reports store reachability and consumer states,
//! `GET /metrics` serves Prometheus text.

pub mod config;
pub mod health;

use core_config::FromEnv;
use core_config::server::ServerConfig;
use document_store::{DocumentStore, InMemoryDocumentStore, MongoDocumentStore};
use domain_catalog::StoreCatalogRepository;
use domain_customers::{CustomerProjector, StoreCustomerRepository};
use domain_vendors::{StoreVendorRepository, VendorProjector};
use event_bus::{ConsumerPool, HandlerRegistry, connect_broker};
use eyre::{Result, WrapErr};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};

use crate::config::{ProjectorConfig, StoreBackend};
use crate::health::AppState;

/// Every projection, registered against one store
pub fn build_registry(store: Arc<dyn DocumentStore>) -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    CustomerProjector::new(StoreCustomerRepository::new(Arc::clone(&store))).register(&mut registry);
    domain_catalog::register_projections(StoreCatalogRepository::new(Arc::clone(&store)), &mut registry);
    VendorProjector::new(StoreVendorRepository::new(store)).register(&mut registry);
    registry
}

async fn connect_store(config: &ProjectorConfig) -> Result<Arc<dyn DocumentStore>> {
    match (config.store, &config.mongo) {
        (StoreBackend::Mongo, Some(mongo)) => {
            let store = MongoDocumentStore::connect(mongo)
                .await
                .wrap_err("Failed to connect to MongoDB")?;
            Ok(Arc::new(store))
        }
        (StoreBackend::Mongo, None) => Err(eyre::eyre!("MongoDB store selected without MONGO_URI")),
        (StoreBackend::Memory, _) => {
            info!("Using in-memory read-model store");
            Ok(Arc::new(InMemoryDocumentStore::new()))
        }
    }
}

async fn serve(config: ServerConfig, state: AppState, mut shutdown: watch::Receiver<bool>) -> Result<()> {
    let address = config.address();
    let listener = TcpListener::bind(&address)
        .await
        .wrap_err_with(|| format!("Failed to bind health server to {}", address))?;
    info!(%address, "Health and metrics server listening");

    axum::serve(listener, health::router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        })
        .await
        .wrap_err("Health server failed")
}

/// Run the projector until SIGINT or SIGTERM.
///
/// # Errors
///
/// Returns an error if configuration is invalid, the broker or store cannot
/// be reached, or a consumer fails fatally.
pub async fn run() -> Result<()> {
    core_config::tracing::install_color_eyre();

    let config = ProjectorConfig::from_env().wrap_err("Failed to load configuration")?;
    core_config::tracing::init_tracing(&config.environment);
    event_bus::init_metrics().wrap_err("Failed to install Prometheus recorder")?;

    info!(
        name = env!("CARGO_PKG_NAME"),
        version = env!("CARGO_PKG_VERSION"),
        environment = ?config.environment,
        "Starting read-model projector"
    );
    info!(
        group = %config.consumer.group_id,
        pattern = %config.consumer.topic_pattern,
        concurrency = config.consumer.concurrency,
        max_attempts = config.consumer.retry.max_attempts,
        broker = %config.broker.backend,
        store = %config.store,
        "Consumer configuration loaded"
    );

    let broker = connect_broker(&config.broker)
        .await
        .wrap_err("Failed to connect to broker")?;
    let store = connect_store(&config).await?;

    let registry = build_registry(Arc::clone(&store));
    info!(event_types = registry.len(), "Projections registered");

    let pool = Arc::new(ConsumerPool::new(broker, Arc::new(registry), config.consumer.clone()));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        if let Err(e) = shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        let _ = shutdown_tx.send(true);
    });

    let state = AppState {
        store,
        pool: Arc::clone(&pool),
    };
    let server_shutdown = shutdown_rx.clone();
    let server = tokio::spawn(serve(config.server.clone(), state, server_shutdown));

    pool.run(shutdown_rx)
        .await
        .wrap_err("Consumer pool failed")?;

    match server.await {
        Ok(Err(e)) => error!(error = %e, "Health server stopped with error"),
        Err(e) => error!(error = %e, "Health server task failed"),
        Ok(Ok(())) => {}
    }

    info!("Read-model projector stopped");
    Ok(())
}

/// Wait for SIGINT or SIGTERM
async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        tokio::select! {
            result = signal::ctrl_c() => {
                result?;
                info!("Received Ctrl+C, initiating shutdown...");
            }
            _ = terminate.recv() => {
                info!("Received SIGTERM, initiating shutdown...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await?;
        info!("Received Ctrl+C, initiating shutdown...");
    }

    Ok(())
}
