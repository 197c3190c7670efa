//! Connection Session Layer: lifecycle + routing for a single client session.
//! Owns broker registration, push bridge, and request dispatch.

use std::sync::Arc;

use tokio::net::TcpStream;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::broker::{BrokerCore, BrokerError, ClientId, PubSubMessage};
use crate::config::ServerConfig;
use crate::server::protocol::{
    InboundFrame, OutboundFrame, ParseError, Response, PUSH_TYPE_PUBSUB, TYPE_REQUEST,
};
use crate::server::routing::route;
use crate::server::socket_network::run_socket;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Broker(#[from] BrokerError),
    #[error("protocol error: {0}")]
    Protocol(#[from] ParseError),
    #[error("socket task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Handle a single client connection with lifecycle orchestration.
///
/// Requests are answered strictly in arrival order, so a subscribe acknowledged
/// to the client is in effect before any later publish from the same client.
pub async fn handle_connection(
    socket: TcpStream,
    core: Arc<BrokerCore>,
    config: &ServerConfig,
) -> Result<(), SessionError> {
    let peer = socket
        .peer_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    let client_id = ClientId(format!("{}-{}", peer, Uuid::new_v4()));
    let shutdown = core.shutdown_token();

    let (reader, writer) = socket.into_split();
    let capacity = config.channel_capacity_socket_write.max(1);

    let (inbound_tx, mut inbound_rx) = mpsc::channel::<InboundFrame>(capacity);
    let (outbound_tx, outbound_rx) = mpsc::channel::<OutboundFrame>(capacity);

    let mut socket_task = tokio::spawn(run_socket(reader, writer, inbound_tx, outbound_rx));

    // Bounded: a reader that falls behind fills this up and gets evicted by the dispatcher.
    let (push_tx, mut push_rx) =
        mpsc::channel::<Arc<PubSubMessage>>(config.client_buffer_capacity.max(1));

    if let Err(e) = core.on_connect(client_id.clone(), push_tx).await {
        drop(outbound_tx);
        socket_task.abort();
        return Err(e.into());
    }
    tracing::debug!("Client {} connected", client_id);

    let outbound_bridge = outbound_tx.clone();
    let bridge_handle = tokio::spawn(async move {
        while let Some(msg) = push_rx.recv().await {
            let payload = msg.get_network_packet().clone();
            let frame = OutboundFrame::Push {
                push_type: PUSH_TYPE_PUBSUB,
                payload,
            };
            if outbound_bridge.send(frame).await.is_err() {
                break;
            }
        }
    });

    let mut outcome = Ok(());
    let mut socket_done = false;
    let mut closing = false;

    loop {
        tokio::select! {
            inbound = inbound_rx.recv() => {
                let Some(frame) = inbound else { break };
                tokio::select! {
                    answered = answer(frame, &core, &client_id, &outbound_tx) => {
                        if !answered {
                            break;
                        }
                    }
                    _ = shutdown.cancelled() => {
                        closing = true;
                        break;
                    }
                }
            }
            socket_result = &mut socket_task => {
                socket_done = true;
                match socket_result {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => outcome = Err(SessionError::Protocol(err)),
                    Err(err) => outcome = Err(SessionError::Task(err)),
                }
                break;
            }
            _ = shutdown.cancelled() => {
                closing = true;
                break;
            }
        }
    }

    if closing {
        tracing::debug!("Closing client {} for shutdown", client_id);
    }
    bridge_handle.abort();

    if let Err(e) = core.on_disconnect(&client_id).await {
        tracing::debug!("Disconnect of {} skipped: {}", client_id, e);
    }
    tracing::debug!("Client {} disconnected", client_id);

    drop(outbound_tx);
    drop(inbound_rx);
    if !socket_done {
        if closing {
            socket_task.abort();
        } else {
            // Let queued responses flush, unless the broker starts stopping meanwhile.
            tokio::select! {
                flushed = &mut socket_task => {
                    if let Ok(Err(err)) = flushed {
                        tracing::debug!("Final writes to {} failed: {}", client_id, err);
                    }
                }
                _ = shutdown.cancelled() => socket_task.abort(),
            }
        }
    }
    outcome
}

/// Routes one frame and queues its response. `false` once the writer is gone.
async fn answer(
    frame: InboundFrame,
    core: &BrokerCore,
    client_id: &ClientId,
    outbound_tx: &mpsc::Sender<OutboundFrame>,
) -> bool {
    let id = frame.header.id();
    let response = match frame.header.frame_type {
        TYPE_REQUEST => route(frame.header.meta, frame.payload, core, client_id).await,
        other => Response::Error(format!("Unsupported frame type: 0x{:02X}", other)),
    };
    outbound_tx
        .send(OutboundFrame::Response { id, response })
        .await
        .is_ok()
}
