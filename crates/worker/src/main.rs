use tokio_util::sync::CancellationToken;

use relay_common::config::AppConfig;
use relay_notifier::client_from_config;
use relay_worker::{ConsumerWorker, KafkaConsumer, StopReason};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "relay_worker=info,relay_notifier=info".into()),
        )
        .json()
        .init();

    tracing::info!("Relay worker starting...");

    // Load configuration
    let config = AppConfig::from_env()?;

    // Join the consumer group; an unreachable cluster ends the process here
    let client_id = format!("relay-worker-{}", uuid::Uuid::new_v4());
    let consumer = KafkaConsumer::connect(
        &config.kafka_broker_url,
        &config.kafka_consumer_group,
        &client_id,
    )
    .await?;

    let worker = ConsumerWorker::new(
        consumer,
        client_from_config(&config)?,
        config.poll_timeout(),
        config.dispatch_queue_depth,
    );
    worker.start(&config.topics())?;

    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_signal(shutdown.clone()));

    let report = worker.run(shutdown).await;

    if report.stop_reason == StopReason::FatalBrokerError {
        anyhow::bail!("Worker stopped after an unrecoverable broker error");
    }

    tracing::info!("Relay worker stopped.");
    Ok(())
}

async fn shutdown_signal(token: CancellationToken) {
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
    token.cancel();
}
