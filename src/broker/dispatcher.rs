//! Dispatcher: the single consumer of the intake queue.
//!
//! Owns the subscription registry and the client directory outright. Every
//! mutation and every fan-out runs here, one command at a time, so no locking
//! is needed and commands take effect in the order they were enqueued.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::broker::errors::BrokerError;
use crate::broker::directory::{ClientDirectory, DeliveryHandle, FailureVerdict};
use crate::broker::registry::SubscriptionRegistry;
use crate::broker::snapshot::{BrokerSnapshot, DispatchStats, FilterSnapshot, WildcardSubscription};
use crate::broker::topic::TopicFilter;
use crate::broker::types::{ClientId, PendingMessage, PubSubMessage};
use crate::config::BrokerConfig;

// ==========================================
// COMMANDS
// ==========================================

pub(crate) enum BrokerCommand {
    Connect {
        client: ClientId,
        handle: Box<dyn DeliveryHandle>,
        reply: oneshot::Sender<()>,
    },
    Subscribe {
        client: ClientId,
        filter: TopicFilter,
        reply: oneshot::Sender<Result<bool, BrokerError>>,
    },
    Unsubscribe {
        client: ClientId,
        filter: TopicFilter,
        reply: oneshot::Sender<bool>,
    },
    Publish(PendingMessage),
    Disconnect {
        client: ClientId,
        reply: oneshot::Sender<bool>,
    },
    IsLive {
        client: ClientId,
        reply: oneshot::Sender<bool>,
    },
    GetSnapshot {
        reply: oneshot::Sender<BrokerSnapshot>,
    },
}

// ==========================================
// DISPATCHER
// ==========================================

pub struct Dispatcher {
    registry: SubscriptionRegistry,
    directory: ClientDirectory,
    stats: DispatchStats,
}

impl Dispatcher {
    pub fn new(config: &BrokerConfig) -> Self {
        Self {
            registry: SubscriptionRegistry::new(config.match_strategy),
            directory: ClientDirectory::new(config.max_delivery_failures),
            stats: DispatchStats::default(),
        }
    }

    /// Drains `rx` until every sender is gone, or stops early once `abort` fires.
    /// Either way all remaining clients are deregistered before returning.
    pub(crate) async fn run(
        mut self,
        mut rx: mpsc::Receiver<BrokerCommand>,
        abort: CancellationToken,
    ) -> DispatchStats {
        tracing::debug!("Dispatcher started");

        loop {
            tokio::select! {
                biased;
                _ = abort.cancelled() => {
                    rx.close();
                    let mut discarded = 0usize;
                    while let Ok(cmd) = rx.try_recv() {
                        if matches!(cmd, BrokerCommand::Publish(_)) {
                            discarded += 1;
                        }
                    }
                    if discarded > 0 {
                        tracing::warn!("Drain timeout reached, discarded {} queued messages", discarded);
                    }
                    break;
                }
                cmd = rx.recv() => match cmd {
                    Some(cmd) => self.handle(cmd),
                    None => break,
                },
            }
        }

        self.shutdown_clients();
        tracing::debug!("Dispatcher stopped: {:?}", self.stats);
        self.stats
    }

    pub(crate) fn handle(&mut self, cmd: BrokerCommand) {
        match cmd {
            BrokerCommand::Connect { client, handle, reply } => {
                self.register(client, handle);
                let _ = reply.send(());
            }
            BrokerCommand::Subscribe { client, filter, reply } => {
                let _ = reply.send(self.subscribe(&client, filter));
            }
            BrokerCommand::Unsubscribe { client, filter, reply } => {
                let _ = reply.send(self.unsubscribe(&client, &filter));
            }
            BrokerCommand::Publish(message) => {
                self.dispatch(message);
            }
            BrokerCommand::Disconnect { client, reply } => {
                let _ = reply.send(self.deregister(&client));
            }
            BrokerCommand::IsLive { client, reply } => {
                let _ = reply.send(self.directory.is_live(&client));
            }
            BrokerCommand::GetSnapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    // --- CLIENTS ---

    pub fn register(&mut self, client: ClientId, handle: Box<dyn DeliveryHandle>) {
        tracing::debug!("Client {} registered", client);
        self.directory.register(client, handle);
    }

    /// Removes the client from the directory and drops all of its subscriptions.
    pub fn deregister(&mut self, client: &ClientId) -> bool {
        let was_live = self.directory.deregister(client);
        let dropped = self.registry.remove_client(client);
        if was_live || dropped > 0 {
            tracing::debug!("Client {} deregistered ({} subscriptions dropped)", client, dropped);
        }
        was_live
    }

    fn shutdown_clients(&mut self) {
        for client in self.directory.client_ids() {
            self.deregister(&client);
        }
    }

    // --- SUBSCRIPTIONS ---

    /// Subscriptions are only accepted from registered clients, otherwise nothing would clean them up.
    /// `Ok(false)` means the subscription already existed.
    pub fn subscribe(&mut self, client: &ClientId, filter: TopicFilter) -> Result<bool, BrokerError> {
        if !self.directory.is_live(client) {
            tracing::warn!("Rejecting subscribe to '{}' from unknown client {}", filter, client);
            return Err(BrokerError::UnknownClient(client.0.clone()));
        }
        Ok(self.registry.subscribe_filter(client, filter))
    }

    pub fn unsubscribe(&mut self, client: &ClientId, filter: &TopicFilter) -> bool {
        self.registry.unsubscribe(client, filter)
    }

    // --- FAN-OUT ---

    /// Delivers one publish to every live matching client except the publisher.
    /// Returns the number of successful deliveries.
    pub fn dispatch(&mut self, message: PendingMessage) -> usize {
        self.stats.published += 1;

        let mut recipients = self.registry.matching_subscribers(&message.topic);
        recipients.remove(&message.publisher);
        if recipients.is_empty() {
            return 0;
        }

        let packet = Arc::new(PubSubMessage::new(
            message.topic.as_str().to_string(),
            message.payload,
        ));
        let mut delivered = 0;
        let mut zombies = Vec::new();

        for client in recipients {
            match self.directory.deliver(&client, &packet) {
                Some(Ok(())) => delivered += 1,
                Some(Err(err)) => {
                    self.stats.failed += 1;
                    tracing::warn!("Delivery of '{}' to {} failed: {}", packet.topic, client, err);
                    if self.directory.record_failure(&client, &err) == FailureVerdict::Evict {
                        zombies.push(client);
                    }
                }
                // Subscribed but no longer live: nothing to write to.
                None => {}
            }
        }

        for client in zombies {
            tracing::warn!("Evicting unreachable client {}", client);
            self.stats.evicted += 1;
            self.deregister(&client);
        }

        self.stats.delivered += delivered as u64;
        delivered
    }

    // --- INTROSPECTION ---

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    pub fn directory(&self) -> &ClientDirectory {
        &self.directory
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    pub fn snapshot(&self) -> BrokerSnapshot {
        let mut filters = Vec::new();
        let mut wildcards = Vec::new();

        for (filter, subscribers) in self.registry.filters() {
            filters.push(FilterSnapshot {
                pattern: filter.to_string(),
                subscribers: subscribers.len(),
            });
            if filter.has_wildcards() {
                wildcards.extend(subscribers.iter().map(|client| WildcardSubscription {
                    pattern: filter.to_string(),
                    client_id: client.0.clone(),
                }));
            }
        }
        filters.sort_by(|a, b| a.pattern.cmp(&b.pattern));
        wildcards.sort_by(|a, b| (&a.pattern, &a.client_id).cmp(&(&b.pattern, &b.client_id)));

        BrokerSnapshot {
            active_clients: self.directory.len(),
            subscriptions: self.registry.subscription_count(),
            filters,
            wildcard_subscriptions: wildcards,
            stats: self.stats,
        }
    }
}
