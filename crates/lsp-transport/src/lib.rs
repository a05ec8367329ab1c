//! Notification plumbing between diagram sessions and a language server.
//!
//! The bridge only ever talks to a [`LanguageConnection`]: fire-and-forget
//! notifications out, per-method broadcast subscriptions in. How that
//! connection comes into being is a [`ConnectionProvider`] concern, which
//! may take a while (spawning a server, completing a handshake).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::broadcast;

pub mod codec;
mod local;
mod providers;
mod stream;

pub use local::{DeferredHandle, DeferredProvider, FailingProvider, LocalConnection, ReadyProvider};
pub use providers::{ProcessProvider, TcpProvider};
pub use stream::StreamConnection;

/// Default per-method buffer for inbound notifications.
pub const DEFAULT_SUBSCRIPTION_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub method: String,
    pub params: Value,
}

impl Notification {
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection not ready: {0}")]
    NotReady(String),
    #[error("connection closed")]
    Closed,
    #[error("transport io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid json-rpc payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("connection unavailable: {0}")]
    Unavailable(String),
}

pub type TransportResult<T> = Result<T, TransportError>;

/// An established link to the remote process.
#[async_trait]
pub trait LanguageConnection: Send + Sync {
    fn send_notification(&self, method: &str, params: Value) -> TransportResult<()>;

    /// Register interest in an inbound notification method. Only notifications
    /// that arrive after the call are observed.
    fn subscribe(&self, method: &str) -> broadcast::Receiver<Notification>;

    /// Resolves once everything sent before the call has been written out,
    /// or the connection has gone away.
    async fn drain(&self) {}
}

/// Resolves the shared connection, possibly after a long wait.
#[async_trait]
pub trait ConnectionProvider: Send + Sync {
    async fn connect(&self) -> TransportResult<Arc<dyn LanguageConnection>>;
}

/// Per-method fan-out of inbound notifications.
#[derive(Debug)]
pub(crate) struct MethodTable {
    senders: RwLock<HashMap<String, broadcast::Sender<Notification>>>,
    capacity: usize,
}

impl MethodTable {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            senders: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    pub(crate) fn sender_for(&self, method: &str) -> broadcast::Sender<Notification> {
        let mut guard = self.senders.write();
        guard
            .entry(method.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    /// Returns the number of subscribers that received the notification.
    pub(crate) fn dispatch(&self, notification: Notification) -> usize {
        let sender = {
            let guard = self.senders.read();
            guard.get(&notification.method).cloned()
        };
        match sender {
            Some(sender) => sender.send(notification).unwrap_or(0),
            None => 0,
        }
    }

    /// Drops every sender so subscribers observe `Closed` once drained.
    pub(crate) fn close(&self) {
        self.senders.write().clear();
    }
}

impl Default for MethodTable {
    fn default() -> Self {
        Self::new(DEFAULT_SUBSCRIPTION_CAPACITY)
    }
}
