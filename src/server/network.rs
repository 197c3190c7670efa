//! Network Layer: TCP listener + connection handling

use std::sync::Arc;

use tokio::net::TcpListener;

use crate::broker::{BrokerCore, BrokerError};
use crate::config::ServerConfig;
use crate::server::connection_session::handle_connection;

pub async fn bind(addr: &str) -> Result<TcpListener, BrokerError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| BrokerError::Bind {
            addr: addr.to_string(),
            source,
        })
}

/// Accepts connections until the broker starts stopping.
pub async fn serve_listener(listener: TcpListener, core: Arc<BrokerCore>, config: ServerConfig) {
    let shutdown = core.shutdown_token();
    let config = Arc::new(config);

    if let Ok(addr) = listener.local_addr() {
        tracing::info!("Broker listening on {}", addr);
    }

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (socket, addr) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        tracing::warn!("Accept failed: {}", e);
                        continue;
                    }
                };
                if let Err(e) = socket.set_nodelay(true) {
                    tracing::debug!("set_nodelay failed for {}: {}", addr, e);
                }

                let core = Arc::clone(&core);
                let config = Arc::clone(&config);
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(socket, core, &config).await {
                        tracing::warn!("Connection {} ended with error: {}", addr, e);
                    }
                });
            }
            _ = shutdown.cancelled() => {
                tracing::info!("Listener closed");
                break;
            }
        }
    }
}

/// Binds `config.addr()` and serves it.
pub async fn start(core: Arc<BrokerCore>, config: ServerConfig) -> Result<(), BrokerError> {
    let listener = bind(&config.addr()).await?;
    serve_listener(listener, core, config).await;
    Ok(())
}
