//! Relay ingestion API binary entrypoint.

use std::sync::Arc;
use std::time::Duration;

use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use relay_common::config::AppConfig;
use relay_publisher::{BrokerProducer, KafkaProducer, PublishPolicy};

use relay_api::routes::create_router;
use relay_api::state::AppState;

/// Largest accepted request body.
const MAX_BODY_BYTES: usize = 1024 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("relay_api=debug,relay_publisher=debug,tower_http=debug")
        }))
        .init();

    tracing::info!("Starting relay ingestion API...");

    // Load configuration
    let config = AppConfig::from_env()?;

    // Create the producer
    let producer: Arc<dyn BrokerProducer> = Arc::new(KafkaProducer::new(
        &config.kafka_broker_url,
        config.publish_timeout(),
    )?);
    let policy = PublishPolicy::from_config(Arc::clone(&producer), &config);
    tracing::info!(mode = %policy.mode(), "Publish policy configured");

    // Build application state
    let addr = bind_address(&config.listen_addr_api);
    let state = AppState::new(policy, config);

    // Build router
    let app = create_router(state)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    // Start server
    tracing::info!("API server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Deliver whatever is still queued in the producer
    if let Err(e) = producer.flush(Duration::from_secs(10)).await {
        tracing::warn!(error = %e, "Producer flush incomplete");
    }

    tracing::info!("API server stopped.");
    Ok(())
}

/// Accept the bare `:port` form as well as `host:port`.
fn bind_address(raw: &str) -> String {
    match raw.strip_prefix(':') {
        Some(port) => format!("0.0.0.0:{}", port),
        None => raw.to_string(),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Received shutdown signal, stopping gracefully...");
}
