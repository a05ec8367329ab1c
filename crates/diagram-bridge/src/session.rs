use std::sync::atomic::{AtomicBool, Ordering};

use diagram_protocol::{Action, ActionMessage, ClientId, DiagramKind, DocumentRef};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};

/// Work items for the connector's link task, processed strictly in order.
#[derive(Debug)]
pub(crate) enum Outbound {
    Accept(ActionMessage),
    DidClose(ClientId),
    Flush(oneshot::Sender<()>),
}

pub(crate) type OutboundSender = mpsc::UnboundedSender<Outbound>;

/// Registry lookup key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionKey {
    pub document: DocumentRef,
    pub kind: DiagramKind,
}

impl SessionKey {
    pub fn new(document: DocumentRef, kind: DiagramKind) -> Self {
        Self { document, kind }
    }
}

/// One addressable diagram instance on the shared connection.
///
/// The session owns its inbound queue. Its only link to the connector is a
/// clone of the outbound queue sender, present while attached.
#[derive(Debug)]
pub struct DiagramSession {
    client_id: ClientId,
    kind: DiagramKind,
    document: DocumentRef,
    outbound: Mutex<Option<OutboundSender>>,
    inbound_tx: mpsc::Sender<Action>,
    inbound_rx: Mutex<Option<mpsc::Receiver<Action>>>,
    closed: AtomicBool,
}

impl DiagramSession {
    pub(crate) fn new(
        client_id: ClientId,
        kind: DiagramKind,
        document: DocumentRef,
        inbound_capacity: usize,
    ) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(inbound_capacity.max(1));
        Self {
            client_id,
            kind,
            document,
            outbound: Mutex::new(None),
            inbound_tx,
            inbound_rx: Mutex::new(Some(inbound_rx)),
            closed: AtomicBool::new(false),
        }
    }

    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    pub fn kind(&self) -> &DiagramKind {
        &self.kind
    }

    pub fn document(&self) -> &DocumentRef {
        &self.document
    }

    pub fn key(&self) -> SessionKey {
        SessionKey::new(self.document.clone(), self.kind.clone())
    }

    pub fn is_attached(&self) -> bool {
        self.outbound.lock().is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Queue `action` for the remote process under this session's id.
    ///
    /// Returns `false` once the session has been detached.
    pub fn dispatch(&self, action: Action) -> bool {
        let guard = self.outbound.lock();
        let Some(outbound) = guard.as_ref() else {
            debug!(
                target: "diagram.connector",
                client_id = %self.client_id,
                kind = %action.kind,
                "dispatch on detached session dropped"
            );
            return false;
        };
        outbound
            .send(Outbound::Accept(ActionMessage::new(self.client_id.clone(), action)))
            .is_ok()
    }

    /// Hand out the inbound action stream. Only the first caller gets it.
    pub fn take_inbound(&self) -> Option<mpsc::Receiver<Action>> {
        self.inbound_rx.lock().take()
    }

    pub(crate) fn deliver(&self, action: Action) -> bool {
        match self.inbound_tx.try_send(action) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(action)) => {
                warn!(
                    target: "diagram.connector",
                    client_id = %self.client_id,
                    kind = %action.kind,
                    "inbound queue full; dropping action"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(action)) => {
                trace!(
                    target: "diagram.connector",
                    client_id = %self.client_id,
                    kind = %action.kind,
                    "inbound consumer gone; dropping action"
                );
                false
            }
        }
    }

    pub(crate) fn connect(&self, outbound: OutboundSender) {
        *self.outbound.lock() = Some(outbound);
    }

    pub(crate) fn disconnect(&self) {
        self.outbound.lock().take();
    }

    /// Flips the closed flag. Only the first call returns `true`.
    pub(crate) fn mark_closed(&self) -> bool {
        !self.closed.swap(true, Ordering::SeqCst)
    }
}
