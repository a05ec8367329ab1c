use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{broadcast, oneshot, watch};

use crate::{
    ConnectionProvider, LanguageConnection, MethodTable, Notification, TransportError,
    TransportResult,
};

/// In-memory connection for tests and embedding without a real server.
///
/// Outbound notifications are recorded in order; inbound traffic is simulated
/// with [`LocalConnection::inject`].
#[derive(Debug)]
pub struct LocalConnection {
    methods: MethodTable,
    sent: Mutex<Vec<Notification>>,
    sent_count: watch::Sender<usize>,
    closed: AtomicBool,
}

impl LocalConnection {
    pub fn new() -> Self {
        Self {
            methods: MethodTable::default(),
            sent: Mutex::new(Vec::new()),
            sent_count: watch::channel(0).0,
            closed: AtomicBool::new(false),
        }
    }

    /// Deliver a notification as if the remote process had sent it.
    /// Returns the number of subscribers reached.
    pub fn inject(&self, method: &str, params: Value) -> usize {
        self.methods.dispatch(Notification::new(method, params))
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().clone()
    }

    /// Params of every notification sent on `method`, in send order.
    pub fn sent_on(&self, method: &str) -> Vec<Value> {
        self.sent
            .lock()
            .iter()
            .filter(|notification| notification.method == method)
            .map(|notification| notification.params.clone())
            .collect()
    }

    /// Resolves once at least `count` notifications have been sent.
    pub async fn wait_for_sent(&self, count: usize) {
        let mut rx = self.sent_count.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|sent| *sent >= count).await;
    }

    /// Simulate the remote process going away.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.methods.close();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Default for LocalConnection {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LanguageConnection for LocalConnection {
    fn send_notification(&self, method: &str, params: Value) -> TransportResult<()> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let count = {
            let mut sent = self.sent.lock();
            sent.push(Notification::new(method, params));
            sent.len()
        };
        self.sent_count.send_replace(count);
        Ok(())
    }

    fn subscribe(&self, method: &str) -> broadcast::Receiver<Notification> {
        if self.is_closed() {
            return broadcast::channel(1).1;
        }
        self.methods.sender_for(method).subscribe()
    }
}

/// Provider that hands out an already established connection.
#[derive(Clone)]
pub struct ReadyProvider {
    connection: Arc<dyn LanguageConnection>,
}

impl ReadyProvider {
    pub fn new(connection: Arc<dyn LanguageConnection>) -> Self {
        Self { connection }
    }
}

#[async_trait]
impl ConnectionProvider for ReadyProvider {
    async fn connect(&self) -> TransportResult<Arc<dyn LanguageConnection>> {
        Ok(Arc::clone(&self.connection))
    }
}

type PendingConnection = TransportResult<Arc<dyn LanguageConnection>>;

/// Provider whose connection is resolved later through a [`DeferredHandle`].
///
/// Models a language client that is still starting up. Only the first
/// `connect` call receives the connection.
pub struct DeferredProvider {
    pending: Mutex<Option<oneshot::Receiver<PendingConnection>>>,
}

pub struct DeferredHandle {
    sender: oneshot::Sender<PendingConnection>,
}

impl DeferredProvider {
    pub fn new() -> (Self, DeferredHandle) {
        let (sender, receiver) = oneshot::channel();
        (
            Self {
                pending: Mutex::new(Some(receiver)),
            },
            DeferredHandle { sender },
        )
    }
}

impl DeferredHandle {
    pub fn resolve(self, connection: Arc<dyn LanguageConnection>) {
        let _ = self.sender.send(Ok(connection));
    }

    pub fn fail(self, error: TransportError) {
        let _ = self.sender.send(Err(error));
    }
}

#[async_trait]
impl ConnectionProvider for DeferredProvider {
    async fn connect(&self) -> TransportResult<Arc<dyn LanguageConnection>> {
        let receiver = self
            .pending
            .lock()
            .take()
            .ok_or_else(|| TransportError::NotReady("deferred connection already taken".into()))?;
        receiver
            .await
            .map_err(|_| TransportError::Unavailable("deferred handle dropped".into()))?
    }
}

/// Provider that never produces a connection.
#[derive(Debug, Clone)]
pub struct FailingProvider {
    reason: String,
}

impl FailingProvider {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl ConnectionProvider for FailingProvider {
    async fn connect(&self) -> TransportResult<Arc<dyn LanguageConnection>> {
        Err(TransportError::Unavailable(self.reason.clone()))
    }
}
