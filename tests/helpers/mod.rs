#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use fanout::broker::{BrokerCore, BrokerSnapshot, ClientId, PubSubMessage};
use fanout::config::BrokerConfig;
use tokio::sync::mpsc;

pub type Inbox = mpsc::UnboundedReceiver<Arc<PubSubMessage>>;

pub const RECV_TIMEOUT: Duration = Duration::from_secs(2);

pub fn setup_broker() -> Arc<BrokerCore> {
    setup_broker_with(BrokerConfig::default())
}

pub fn setup_broker_with(config: BrokerConfig) -> Arc<BrokerCore> {
    let core = Arc::new(BrokerCore::new(config));
    core.start().expect("broker should start");
    core
}

pub async fn connect(core: &BrokerCore, id: &str) -> (ClientId, Inbox) {
    let client = ClientId::new(id);
    let (tx, rx) = mpsc::unbounded_channel();
    core.on_connect(client.clone(), tx)
        .await
        .expect("connect should succeed");
    (client, rx)
}

/// Waits until every command queued before this call has been dispatched.
pub async fn settle(core: &BrokerCore) -> BrokerSnapshot {
    core.snapshot().await.expect("broker should answer snapshots")
}

pub async fn recv(inbox: &mut Inbox) -> Arc<PubSubMessage> {
    tokio::time::timeout(RECV_TIMEOUT, inbox.recv())
        .await
        .expect("timed out waiting for delivery")
        .expect("delivery handle closed")
}

/// Every message already delivered, as (topic, payload) pairs.
pub fn drain(inbox: &mut Inbox) -> Vec<(String, String)> {
    let mut out = Vec::new();
    while let Ok(msg) = inbox.try_recv() {
        out.push((
            msg.topic.clone(),
            String::from_utf8_lossy(&msg.payload).into_owned(),
        ));
    }
    out
}
