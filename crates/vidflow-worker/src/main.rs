//! Stage worker binary.

use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vidflow_media::{check_ffmpeg, processor_for};
use vidflow_queue::{metrics, QueueConsumer, RedisBroker, ReliableConsumer};
use vidflow_status::RedisStatusStore;
use vidflow_storage::S3Store;
use vidflow_worker::{OutcomeNotifier, StageHandler, StageWorker, WorkerConfig};

#[tokio::main]
async fn main() {
    // Load environment variables
    dotenvy::dotenv().ok();

    init_tracing();

    let config = match WorkerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid worker configuration: {}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = config.validate() {
        error!("Invalid worker configuration: {}", e);
        std::process::exit(1);
    }
    info!(
        stage = %config.stage,
        queue = %config.stage_queue(),
        "Starting vidflow-worker"
    );

    if let Err(e) = check_ffmpeg() {
        error!("{}", e);
        std::process::exit(1);
    }

    match metrics::install_exporter_from_env() {
        Ok(Some(addr)) => info!("Metrics exporter listening on {}", addr),
        Ok(None) => {}
        Err(e) => {
            error!("Failed to install metrics exporter: {}", e);
            std::process::exit(1);
        }
    }

    let broker = match RedisBroker::from_config(&config.queue) {
        Ok(b) => Arc::new(b),
        Err(e) => {
            error!("Failed to create broker client: {}", e);
            std::process::exit(1);
        }
    };

    let status = match RedisStatusStore::from_env() {
        Ok(s) => Arc::new(s),
        Err(e) => {
            error!("Failed to create status store: {}", e);
            std::process::exit(1);
        }
    };

    let storage = match S3Store::from_env().await {
        Ok(s) => Arc::new(s),
        Err(e) => {
            error!("Failed to create object store: {}", e);
            std::process::exit(1);
        }
    };

    // Outcomes must respect the inbound queue's bound from the first publish
    let inbound = config.topology.orchestrator_inbound().to_string();
    if let Err(e) = broker.declare(&config.queue.channel(inbound.clone())).await {
        error!("Failed to declare {}: {}", inbound, e);
        std::process::exit(1);
    }

    let processor = processor_for(config.stage, &config.media);
    let notifier = OutcomeNotifier::new(broker.clone(), inbound);
    let worker = Arc::new(StageWorker::new(&config, processor, status, storage, notifier));

    let consumer = Arc::new(
        ReliableConsumer::new(
            broker,
            config.queue.channel(config.stage_queue()),
            Arc::new(StageHandler::new(worker)),
            config.queue.max_retries,
        )
        .with_block(config.queue.block),
    );

    let runner = consumer.clone();
    let mut run_handle = tokio::spawn(async move { runner.run().await });

    tokio::select! {
        result = &mut run_handle => {
            match result {
                Ok(Ok(())) => info!("Consumer exited"),
                Ok(Err(e)) => {
                    error!("Consumer error: {}", e);
                    std::process::exit(1);
                }
                Err(e) => {
                    error!("Consumer task failed: {}", e);
                    std::process::exit(1);
                }
            }
            return;
        }
        _ = shutdown_signal() => {
            info!("Received shutdown signal, finishing in-flight delivery");
            consumer.shutdown();
        }
    }

    match tokio::time::timeout(config.shutdown_timeout, run_handle).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => error!("Consumer error during shutdown: {}", e),
        Ok(Err(e)) => error!("Consumer task failed during shutdown: {}", e),
        Err(_) => warn!(
            "In-flight delivery did not finish within {:?}; it will be reclaimed",
            config.shutdown_timeout
        ),
    }

    info!("Worker shutdown complete");
}

/// Colored output for dev, JSON when `LOG_FORMAT=json`.
fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("vidflow=info"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(true).with_target(true))
            .with(env_filter)
            .init();
    }
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
