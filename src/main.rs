use std::sync::Arc;

use fanout::broker::{BrokerCore, BrokerError};
use fanout::config::Config;
use fanout::server::{dashboard_api, network};
use fanout::utils::logging;

// ========================================
// MAIN ENTRY POINT
// ========================================

#[tokio::main]
async fn main() {
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };
    logging::init(&config.server.log_level);

    if let Err(e) = run(config).await {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

async fn run(config: Config) -> Result<(), BrokerError> {
    let core = Arc::new(BrokerCore::new(config.broker.clone()));
    core.start()?;

    let listener = match network::bind(&config.server.addr()).await {
        Ok(listener) => listener,
        Err(e) => {
            core.stop().await;
            return Err(e);
        }
    };
    tracing::info!("Fanout v{} starting", env!("CARGO_PKG_VERSION"));

    let server = tokio::spawn(network::serve_listener(
        listener,
        Arc::clone(&core),
        config.server.clone(),
    ));

    if config.server.dashboard_port != 0 {
        let core = Arc::clone(&core);
        let host = config.server.host.clone();
        let port = config.server.dashboard_port;
        tokio::spawn(async move {
            if let Err(e) = dashboard_api::start_dashboard_server(core, &host, port).await {
                tracing::error!("Dashboard failed: {}", e);
            }
        });
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Unable to listen for shutdown signal: {}", e);
    }
    tracing::info!("Shutdown signal received");

    core.stop().await;
    if let Err(e) = server.await {
        tracing::warn!("Listener task ended abnormally: {}", e);
    }
    Ok(())
}
