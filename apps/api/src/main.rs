//! Lockwarden API composition root.

#![forbid(unsafe_code)]

mod api_config;
mod api_router;
mod api_services;
mod dto;
mod error;
mod handlers;
mod middleware;
mod state;

use std::sync::Arc;

use lockwarden_application::DistributedLockClient;
use lockwarden_core::AppError;
use tracing::{error, info};

use crate::api_config::{ApiConfig, init_tracing};
use crate::api_router::build_router;
use crate::api_services::{LockStorage, build_lock_storage};
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = ApiConfig::load()?;
    let storage: LockStorage = build_lock_storage(&config.storage_backend).await?;
    let lock_client = Arc::new(DistributedLockClient::new(
        storage.nodes(),
        config.lock_configuration.clone(),
    )?);
    info!(
        nodes = lock_client.node_count(),
        majority = lock_client.majority(),
        "distributed lock client ready"
    );

    let app = build_router(AppState::new(lock_client, storage.handles()))?;

    let address = config.socket_address()?;
    let listener = tokio::net::TcpListener::bind(address)
        .await
        .map_err(|error| AppError::Internal(format!("failed to bind listener: {error}")))?;

    info!(%address, "lockwarden-api listening");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|error| AppError::Internal(format!("api server error: {error}")));

    storage.shutdown().await;
    served
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown signal received"),
        Err(error) => {
            error!(error = %error, "failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
    }
}
