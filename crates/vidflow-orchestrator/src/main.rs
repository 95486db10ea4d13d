//! Pipeline orchestrator binary.

use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vidflow_orchestrator::{InboundHandler, Orchestrator, OrchestratorConfig, RedisRetryLedger};
use vidflow_queue::{metrics, QueueConsumer, RedisBroker, ReliableConsumer};
use vidflow_status::RedisStatusStore;

#[tokio::main]
async fn main() {
    // Load environment variables
    dotenvy::dotenv().ok();

    init_tracing();

    info!("Starting vidflow-orchestrator");

    let config = OrchestratorConfig::from_env();
    if let Err(e) = config.validate() {
        error!("Invalid orchestrator configuration: {}", e);
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

    let ledger = match RedisRetryLedger::new(
        &config.queue.broker_url,
        config.ledger_prefix.clone(),
        config.ledger_ttl,
    ) {
        Ok(l) => Arc::new(l),
        Err(e) => {
            error!("Failed to create retry ledger: {}", e);
            std::process::exit(1);
        }
    };

    // Declare every queue up front so stage work published before a worker
    // starts is kept and bounded
    for queue in config.topology.all_queues() {
        if let Err(e) = broker.declare(&config.queue.channel(queue)).await {
            error!("Failed to declare {}: {}", queue, e);
            std::process::exit(1);
        }
    }

    let orchestrator = Arc::new(Orchestrator::new(&config, status, broker.clone(), ledger));
    info!(
        inbound = %config.topology.orchestrator_inbound(),
        stage_max_retries = config.stage_max_retries,
        retry_delay_minutes = orchestrator.retry_delay_minutes(),
        "Orchestrator ready"
    );

    let consumer = Arc::new(
        ReliableConsumer::new(
            broker,
            config.queue.channel(config.topology.orchestrator_inbound()),
            Arc::new(InboundHandler::new(orchestrator)),
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

    info!("Orchestrator shutdown complete");
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
