//! Client directory: which clients are live and how to reach them.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::broker::errors::DeliveryError;
use crate::broker::types::{ClientId, PubSubMessage};

/// Outbound sink for one client. The actual socket write lives behind it.
pub trait DeliveryHandle: Send + 'static {
    fn deliver(&self, message: &Arc<PubSubMessage>) -> Result<(), DeliveryError>;

    /// Called once when the client is deregistered. Dropping the handle must also be enough.
    fn close(&self) {}
}

impl DeliveryHandle for mpsc::UnboundedSender<Arc<PubSubMessage>> {
    fn deliver(&self, message: &Arc<PubSubMessage>) -> Result<(), DeliveryError> {
        self.send(message.clone()).map_err(|_| DeliveryError::Closed)
    }
}

impl DeliveryHandle for mpsc::Sender<Arc<PubSubMessage>> {
    fn deliver(&self, message: &Arc<PubSubMessage>) -> Result<(), DeliveryError> {
        self.try_send(message.clone()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::Full,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }
}

struct ClientEntry {
    handle: Box<dyn DeliveryHandle>,
    consecutive_failures: u32,
}

/// Outcome of a failed write, as seen by the caller deciding on eviction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureVerdict {
    Tolerated,
    Evict,
}

pub struct ClientDirectory {
    clients: HashMap<ClientId, ClientEntry>,
    max_failures: u32,
}

impl ClientDirectory {
    pub fn new(max_failures: u32) -> Self {
        Self {
            clients: HashMap::new(),
            max_failures: max_failures.max(1),
        }
    }

    /// A second registration under the same id replaces (and closes) the previous handle.
    pub fn register(&mut self, client: ClientId, handle: Box<dyn DeliveryHandle>) {
        let entry = ClientEntry {
            handle,
            consecutive_failures: 0,
        };
        if let Some(previous) = self.clients.insert(client, entry) {
            previous.handle.close();
        }
    }

    /// Removes and closes the client's handle. Subscription cleanup is the caller's job.
    pub fn deregister(&mut self, client: &ClientId) -> bool {
        match self.clients.remove(client) {
            Some(entry) => {
                entry.handle.close();
                true
            }
            None => false,
        }
    }

    pub fn is_live(&self, client: &ClientId) -> bool {
        self.clients.contains_key(client)
    }

    pub fn delivery_handle(&self, client: &ClientId) -> Option<&dyn DeliveryHandle> {
        self.clients.get(client).map(|entry| entry.handle.as_ref())
    }

    pub fn deliver(
        &mut self,
        client: &ClientId,
        message: &Arc<PubSubMessage>,
    ) -> Option<Result<(), DeliveryError>> {
        let entry = self.clients.get_mut(client)?;
        let result = entry.handle.deliver(message);
        if result.is_ok() {
            entry.consecutive_failures = 0;
        }
        Some(result)
    }

    /// Counts a failed write against `client` and says whether it should be dropped.
    pub fn record_failure(&mut self, client: &ClientId, error: &DeliveryError) -> FailureVerdict {
        let Some(entry) = self.clients.get_mut(client) else {
            return FailureVerdict::Tolerated;
        };
        entry.consecutive_failures += 1;
        if error.is_permanent() || entry.consecutive_failures >= self.max_failures {
            FailureVerdict::Evict
        } else {
            FailureVerdict::Tolerated
        }
    }

    pub fn client_ids(&self) -> Vec<ClientId> {
        self.clients.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
