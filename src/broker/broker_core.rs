//! BrokerCore: intake API and start/stop lifecycle.
//!
//! Every intake call is turned into a `BrokerCommand` on one bounded queue
//! consumed by the `Dispatcher`. Calls that change subscriptions or client
//! membership wait for the dispatcher's acknowledgement, so once they return
//! the change is visible to every publish enqueued afterwards. Publishes only
//! wait for room in the queue.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::broker::directory::DeliveryHandle;
use crate::broker::dispatcher::{BrokerCommand, Dispatcher};
use crate::broker::errors::BrokerError;
use crate::broker::snapshot::{BrokerSnapshot, DispatchStats};
use crate::broker::topic::{TopicFilter, TopicPath};
use crate::broker::types::{ClientId, PendingMessage};
use crate::config::{BackpressurePolicy, BrokerConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Stopped,
    Running,
    Stopping,
}

struct Running {
    tx: mpsc::Sender<BrokerCommand>,
    dispatch: JoinHandle<DispatchStats>,
    /// Fired when the drain timeout expires; the dispatcher discards what is left.
    abort: CancellationToken,
    /// Fired as soon as `stop()` begins; listeners and sessions watch it.
    shutdown: CancellationToken,
}

struct Inner {
    state: LifecycleState,
    running: Option<Running>,
    /// Fired once the current run reaches `Stopped`; concurrent `stop()` callers wait on it.
    stopped: CancellationToken,
}

pub struct BrokerCore {
    config: BrokerConfig,
    inner: Mutex<Inner>,
}

impl BrokerCore {
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                state: LifecycleState::Stopped,
                running: None,
                stopped: CancellationToken::new(),
            }),
        }
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    pub fn state(&self) -> LifecycleState {
        self.inner.lock().state
    }

    pub fn is_running(&self) -> bool {
        self.state() == LifecycleState::Running
    }

    // --- LIFECYCLE ---

    /// Opens the intake queue and spawns the dispatch loop with empty registries.
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) -> Result<(), BrokerError> {
        let mut inner = self.inner.lock();
        if inner.state != LifecycleState::Stopped {
            return Err(BrokerError::AlreadyRunning);
        }

        let (tx, rx) = mpsc::channel(self.config.intake_capacity.max(1));
        let abort = CancellationToken::new();
        let dispatcher = Dispatcher::new(&self.config);
        let dispatch = tokio::spawn(dispatcher.run(rx, abort.clone()));

        inner.running = Some(Running {
            tx,
            dispatch,
            abort,
            shutdown: CancellationToken::new(),
        });
        inner.state = LifecycleState::Running;
        inner.stopped = CancellationToken::new();

        tracing::info!(
            "Broker started (intake capacity {}, {:?} matching)",
            self.config.intake_capacity,
            self.config.match_strategy
        );
        Ok(())
    }

    /// Refuses new intake, drains the queue within the drain timeout, then
    /// deregisters every client. A no-op when stopped; a call made while another
    /// `stop()` is in progress returns once that one has finished.
    pub async fn stop(&self) {
        let (running, done, in_progress) = {
            let mut inner = self.inner.lock();
            let state = inner.state;
            match state {
                LifecycleState::Stopped => return,
                LifecycleState::Stopping => (None, inner.stopped.clone(), true),
                LifecycleState::Running => {
                    inner.state = LifecycleState::Stopping;
                    (inner.running.take(), inner.stopped.clone(), false)
                }
            }
        };
        if in_progress {
            done.cancelled().await;
            return;
        }
        let Some(Running {
            tx,
            mut dispatch,
            abort,
            shutdown,
        }) = running
        else {
            self.inner.lock().state = LifecycleState::Stopped;
            done.cancel();
            return;
        };

        tracing::info!("Broker stopping...");
        shutdown.cancel();
        // The dispatcher exits once the last in-flight sender is gone.
        drop(tx);

        let joined = match tokio::time::timeout(self.config.drain_timeout(), &mut dispatch).await {
            Ok(joined) => joined,
            Err(_) => {
                abort.cancel();
                dispatch.await
            }
        };

        match joined {
            Ok(stats) => tracing::info!(
                "Broker stopped (published {}, delivered {}, failed {}, evicted {})",
                stats.published,
                stats.delivered,
                stats.failed,
                stats.evicted
            ),
            Err(e) => tracing::error!("Dispatch loop ended abnormally: {}", e),
        }

        self.inner.lock().state = LifecycleState::Stopped;
        done.cancel();
    }

    /// Token cancelled when the current run starts stopping. Already cancelled if not running.
    pub fn shutdown_token(&self) -> CancellationToken {
        match &self.inner.lock().running {
            Some(running) => running.shutdown.clone(),
            None => {
                let token = CancellationToken::new();
                token.cancel();
                token
            }
        }
    }

    // --- INTAKE ---

    pub async fn on_connect(
        &self,
        client: ClientId,
        handle: impl DeliveryHandle,
    ) -> Result<(), BrokerError> {
        let handle: Box<dyn DeliveryHandle> = Box::new(handle);
        self.request(|reply| BrokerCommand::Connect {
            client,
            handle,
            reply,
        })
        .await
    }

    /// Like `on_connect`, but the returned guard disconnects the client when dropped.
    pub async fn connect(
        self: &Arc<Self>,
        client: ClientId,
        handle: impl DeliveryHandle,
    ) -> Result<ClientSession, BrokerError> {
        self.on_connect(client.clone(), handle).await?;
        Ok(ClientSession {
            client_id: client,
            core: Arc::clone(self),
        })
    }

    pub async fn on_subscribe(&self, client: &ClientId, pattern: &str) -> Result<(), BrokerError> {
        let filter = TopicFilter::parse(pattern)?;
        let client = client.clone();
        self.request(|reply| BrokerCommand::Subscribe {
            client,
            filter,
            reply,
        })
        .await?
        .map(|_| ())
    }

    /// Removing a subscription that does not exist is not an error.
    pub async fn on_unsubscribe(&self, client: &ClientId, pattern: &str) -> Result<(), BrokerError> {
        let filter = TopicFilter::parse(pattern)?;
        let client = client.clone();
        self.request(|reply| BrokerCommand::Unsubscribe {
            client,
            filter,
            reply,
        })
        .await
        .map(|_| ())
    }

    /// Validates the topic and queues the message. Returns once it is queued, not delivered.
    pub async fn on_publish(
        &self,
        client: &ClientId,
        topic: &str,
        payload: impl Into<Bytes>,
    ) -> Result<(), BrokerError> {
        let message = PendingMessage {
            publisher: client.clone(),
            topic: TopicPath::parse(topic)?,
            payload: payload.into(),
        };
        let tx = self.sender()?;
        let cmd = BrokerCommand::Publish(message);

        match self.config.backpressure {
            BackpressurePolicy::Block => tx.send(cmd).await.map_err(|_| BrokerError::NotRunning),
            BackpressurePolicy::Reject => tx.try_send(cmd).map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => BrokerError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => BrokerError::NotRunning,
            }),
        }
    }

    pub async fn on_disconnect(&self, client: &ClientId) -> Result<(), BrokerError> {
        let client = client.clone();
        self.request(|reply| BrokerCommand::Disconnect { client, reply })
            .await
            .map(|_| ())
    }

    // --- QUERIES ---

    pub async fn is_connected(&self, client: &ClientId) -> Result<bool, BrokerError> {
        let client = client.clone();
        self.request(|reply| BrokerCommand::IsLive { client, reply })
            .await
    }

    /// Answered in queue order, so it also reflects every publish enqueued before it.
    pub async fn snapshot(&self) -> Result<BrokerSnapshot, BrokerError> {
        self.request(|reply| BrokerCommand::GetSnapshot { reply }).await
    }

    // --- HELPERS ---

    fn sender(&self) -> Result<mpsc::Sender<BrokerCommand>, BrokerError> {
        let inner = self.inner.lock();
        match (&inner.state, &inner.running) {
            (LifecycleState::Running, Some(running)) => Ok(running.tx.clone()),
            _ => Err(BrokerError::NotRunning),
        }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> BrokerCommand,
    ) -> Result<T, BrokerError> {
        let (reply, rx) = oneshot::channel();
        self.sender()?
            .send(build(reply))
            .await
            .map_err(|_| BrokerError::NotRunning)?;
        rx.await.map_err(|_| BrokerError::NotRunning)
    }
}

/// Session Guard: disconnects the client when dropped.
pub struct ClientSession {
    client_id: ClientId,
    core: Arc<BrokerCore>,
}

impl ClientSession {
    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    pub fn core(&self) -> &Arc<BrokerCore> {
        &self.core
    }
}

impl Drop for ClientSession {
    fn drop(&mut self) {
        if !self.core.is_running() {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let core = Arc::clone(&self.core);
        let client = self.client_id.clone();
        runtime.spawn(async move {
            if let Err(e) = core.on_disconnect(&client).await {
                tracing::debug!("Disconnect of {} skipped: {}", client, e);
            }
        });
    }
}
