// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

use anyhow::{Context, Result};
use clinical_vector_store::api::rest::{create_app, AppState};
use clinical_vector_store::config::ServiceConfig;
use clinical_vector_store::coordinator::IndexCoordinator;
use clinical_vector_store::embedding::HttpEmbedder;
use clinical_vector_store::retriever::Retriever;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "clinical_vector_store=info,tower_http=debug".into()),
        )
        .init();

    let config = ServiceConfig::from_env().context("Invalid configuration")?;
    info!(
        kind = %config.coordinator.index.kind,
        dimension = config.coordinator.index.dimension,
        "Starting vector store on {}:{}",
        config.api.host,
        config.api.port
    );

    let coordinator = Arc::new(
        IndexCoordinator::open(config.coordinator.clone(), config.paths.clone())
            .await
            .context("Failed to open index")?,
    );

    let mut retriever = Retriever::new(coordinator.clone());
    match &config.embedding_service_url {
        Some(url) => {
            let embedder = HttpEmbedder::new(url.as_str(), config.api.timeout)
                .context("Failed to create embedding client")?;
            info!(url = %url, "Text search enabled");
            retriever = retriever.with_embedder(Arc::new(embedder));
        }
        None => warn!("EMBEDDING_SERVICE_URL not set; text search is disabled"),
    }

    let checkpoints = config
        .checkpoint_interval
        .map(|interval| tokio::spawn(checkpoint_loop(coordinator.clone(), interval)));

    let state = AppState::new(retriever)
        .with_api_key(config.api.api_key.clone())
        .with_persist_on_write(config.persist_on_write);
    let app = create_app(state, &config.api);

    let addr = format!("{}:{}", config.api.host, config.api.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Server listening on {}", addr);

    // Run the server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(handle) = checkpoints {
        handle.abort();
    }
    coordinator
        .checkpoint()
        .await
        .context("Failed to persist index on shutdown")?;

    info!("Server shutdown complete");
    Ok(())
}

async fn checkpoint_loop(coordinator: Arc<IndexCoordinator>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        if let Err(e) = coordinator.checkpoint().await {
            error!(error = %e, "Periodic checkpoint failed");
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        }
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        }
    }
}
