use std::env;
use std::error::Error;
use std::time::SystemTime;

use decisionlog_core::DecisionLogger;
use decisionlog_core::config::Settings;
use decisionlog_pb::objects::decision::Decision;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

mod setup_tracing;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    setup_tracing::register();

    if let Err(e) = run().await {
        error!("{e:?}");
        return Err(e);
    }
    info!("Exiting...");

    Ok(())
}

async fn run() -> Result<(), Box<dyn Error>> {
    let args: Vec<String> = env::args().collect();
    let settings = Settings::load(env::vars())?;
    info!(
        shipper = ?settings.shipper,
        collector = %settings.collector.address,
        queue = %settings.queue.url,
        "Starting decision logger"
    );

    let logger = DecisionLogger::start(settings, CancellationToken::new()).await?;

    // publishes one synthetic record to check the whole path end to end
    if args.iter().any(|arg| arg == "--smoke") {
        let decision = Decision {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Some(prost_types::Timestamp::from(SystemTime::now())),
            identity: "decisionlog:smoke".to_string(),
            policy_path: "/smoke".to_string(),
            outcomes: [("allowed".to_string(), true)].into_iter().collect(),
        };
        logger.log(&decision).await?;
        info!(id = %decision.id, "Published smoke decision");
    }

    shutdown_signal().await;
    info!("Shutting down decision logger");
    logger.shutdown().await?;
    Ok(())
}

// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(?e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut terminate) => {
                terminate.recv().await;
            }
            Err(e) => {
                error!(?e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
