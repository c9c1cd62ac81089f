use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

mod config;
mod consumers;
mod error;
mod gateway;
mod handlers;
mod producer;
mod supervisor;

use config::Config;
use consumers::{MultiConsumer, SingleConsumer};
use gateway::MessageGateway;
use handlers::{create_router, AppState};
use producer::Publisher;
use shared::messaging::PulsarBroker;
use shared::observability::init_logging;
use supervisor::{ShutdownHandle, Supervisor};

// Start the enabled consumers under the supervisor
async fn start_consumers(
    config: &Config,
    broker: &Arc<PulsarBroker>,
    settings: &Arc<shared::BrokerSettings>,
    supervisor: &mut Supervisor,
) -> Result<()> {
    if config.consumers.single_enabled {
        let consumer = SingleConsumer::new(broker.clone(), settings.clone());
        let signal = supervisor.signal();
        supervisor.spawn("single-consumer", consumer.run(signal));
    }

    if config.consumers.multi_enabled {
        let consumer = MultiConsumer::start(
            broker.as_ref(),
            &settings.fanout_topics(),
            config.consumers.error_backoff(),
        )
        .await
        .context("Failed to subscribe the fan-out consumer")?;

        info!(topics = ?consumer.topics(), "Fan-out consumer subscribed");
        let signal = supervisor.signal();
        supervisor.spawn("multi-consumer", consumer.run(signal));
    }

    Ok(())
}

// Graceful shutdown handler
async fn shutdown_signal(handle: ShutdownHandle) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
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
                error!("Failed to listen for SIGTERM: {}", e);
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

    info!("Shutdown signal received, starting graceful shutdown...");
    handle.trigger();
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;
    init_logging(&config.logging).context("Failed to initialize logging")?;

    info!(
        "Starting {} v{}",
        config.logging.service_name,
        env!("CARGO_PKG_VERSION")
    );

    let settings = Arc::new(config.pulsar.clone());
    let broker = Arc::new(
        PulsarBroker::connect(&settings)
            .await
            .context("Failed to connect to Pulsar")?,
    );

    let mut supervisor = Supervisor::new();
    start_consumers(&config, &broker, &settings, &mut supervisor).await?;

    let gateway = MessageGateway::new(Publisher::new(broker.clone()), settings.clone());
    let app = create_router(AppState {
        gateway: Arc::new(gateway),
        service_name: Arc::from(config.logging.service_name.as_str()),
    });

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    info!("HTTP server listening on http://{}", addr);

    // Start server with graceful shutdown
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(supervisor.handle()))
        .await
        .context("Server error");

    if !supervisor.shutdown(config.consumers.shutdown_grace()).await {
        error!("Some consumers had to be aborted during shutdown");
    }

    served?;
    info!("{} shut down gracefully", config.logging.service_name);
    Ok(())
}
