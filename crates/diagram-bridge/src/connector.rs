//! Multiplexes diagram sessions over the one shared language connection.
//!
//! Outbound traffic from every session funnels into a single FIFO queue that a
//! link task drains once the connection is up, so nothing sent early is lost.
//! Inbound `diagram/accept` notifications are routed by `clientId` to the
//! attached session; `diagram/openInTextEditor` drives the editor service.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use diagram_protocol::{
    ActionMessage, ClientId, Location, METHOD_ACCEPT, METHOD_DID_CLOSE, METHOD_OPEN_IN_TEXT_EDITOR,
};
use lsp_transport::{ConnectionProvider, LanguageConnection, Notification};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::session::{Outbound, OutboundSender};
use crate::{
    ArtifactStore, BridgeError, BridgeResult, ConnectorConfig, DiagramSession, EditorService,
    ExportedArtifact,
};

/// Readiness of the shared connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connecting,
    Ready,
    Unavailable,
}

#[derive(Clone)]
pub struct Connector {
    inner: Arc<Inner>,
}

struct Inner {
    sessions: RwLock<HashMap<ClientId, Weak<DiagramSession>>>,
    outbound: OutboundSender,
    link: watch::Receiver<LinkState>,
    editor: Arc<dyn EditorService>,
    store: Arc<dyn ArtifactStore>,
    config: ConnectorConfig,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}

impl Connector {
    /// Starts resolving the connection in the background. Must be called
    /// from within a tokio runtime.
    pub fn new(
        provider: Arc<dyn ConnectionProvider>,
        editor: Arc<dyn EditorService>,
        store: Arc<dyn ArtifactStore>,
        config: ConnectorConfig,
    ) -> Self {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (link_tx, link) = watch::channel(LinkState::Connecting);
        let inner = Arc::new(Inner {
            sessions: RwLock::new(HashMap::new()),
            outbound,
            link,
            editor,
            store,
            config,
            task: Mutex::new(None),
        });

        let task = tokio::spawn(run_link(
            provider,
            outbound_rx,
            link_tx,
            Arc::downgrade(&inner),
        ));
        *inner.task.lock() = Some(task);
        Self { inner }
    }

    pub fn config(&self) -> &ConnectorConfig {
        &self.inner.config
    }

    /// Record `session` under its client id and give it the outbound queue.
    pub fn attach(&self, session: &Arc<DiagramSession>) {
        if session.is_closed() {
            warn!(
                target: "diagram.connector",
                client_id = %session.client_id(),
                "refusing to attach a closed session"
            );
            return;
        }
        session.connect(self.inner.outbound.clone());
        self.inner
            .sessions
            .write()
            .insert(session.client_id().clone(), Arc::downgrade(session));
        debug!(
            target: "diagram.connector",
            client_id = %session.client_id(),
            document = %session.document(),
            "session attached"
        );
    }

    /// Remove `session` from routing and announce its end to the remote side.
    ///
    /// Exactly one `diagram/didClose` is queued per session, on the first
    /// call, whether or not the session was ever attached.
    pub fn detach(&self, session: &DiagramSession) {
        let removed = {
            let mut sessions = self.inner.sessions.write();
            let matches = sessions
                .get(session.client_id())
                .is_some_and(|attached| std::ptr::eq(attached.as_ptr(), session));
            matches && sessions.remove(session.client_id()).is_some()
        };
        session.disconnect();

        if session.mark_closed() {
            self.enqueue(Outbound::DidClose(session.client_id().clone()));
            debug!(
                target: "diagram.connector",
                client_id = %session.client_id(),
                removed,
                "session detached"
            );
        }
    }

    /// Queue `message` for `diagram/accept`. Messages sent before the
    /// connection is ready are held and flushed in order.
    pub fn send_outbound(&self, message: ActionMessage) {
        self.enqueue(Outbound::Accept(message));
    }

    /// Deliver an inbound message to the attached session it addresses.
    /// Returns `false` when no live session matches.
    pub fn route_inbound(&self, message: ActionMessage) -> bool {
        self.inner.route(message)
    }

    pub async fn export_artifact(&self, uri: &str, artifact: ExportedArtifact) -> BridgeResult<()> {
        self.inner
            .store
            .save(uri, &artifact)
            .await
            .map_err(BridgeError::collaborator("export artifact"))?;
        debug!(
            target: "diagram.connector",
            uri,
            media_type = %artifact.media_type,
            "artifact exported"
        );
        Ok(())
    }

    /// Open the referenced document and select the location's range.
    pub async fn navigate_to_source(&self, location: Location) -> BridgeResult<()> {
        let editor = self
            .inner
            .editor
            .open(&location.uri)
            .await
            .map_err(BridgeError::collaborator("open editor"))?;
        editor.set_cursor(location.range.start);
        editor.reveal_range(location.range);
        editor.set_selection(location.range);
        debug!(
            target: "diagram.connector",
            uri = %location.uri,
            line = location.range.start.line,
            "revealed source location"
        );
        Ok(())
    }

    pub fn link_state(&self) -> LinkState {
        *self.inner.link.borrow()
    }

    /// Resolves once the connection is ready. Never resolves if it turns out
    /// to be unavailable.
    pub async fn ready(&self) {
        let mut link = self.inner.link.clone();
        if link.wait_for(|state| *state == LinkState::Ready).await.is_err() {
            std::future::pending::<()>().await;
        }
    }

    /// Resolves once everything queued before this call has been written out
    /// by the connection.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        self.enqueue(Outbound::Flush(done_tx));
        if done_rx.await.is_err() {
            std::future::pending::<()>().await;
        }
    }

    pub fn attached_count(&self) -> usize {
        self.inner
            .sessions
            .read()
            .values()
            .filter(|session| session.strong_count() > 0)
            .count()
    }

    pub fn is_attached(&self, client_id: &ClientId) -> bool {
        self.inner
            .sessions
            .read()
            .get(client_id)
            .is_some_and(|session| session.strong_count() > 0)
    }

    fn enqueue(&self, item: Outbound) {
        if self.inner.outbound.send(item).is_err() {
            warn!(target: "diagram.connector", "link task gone; outbound item dropped");
        }
    }
}

impl Inner {
    fn route(&self, message: ActionMessage) -> bool {
        let session = self
            .sessions
            .read()
            .get(&message.client_id)
            .and_then(Weak::upgrade);
        let Some(session) = session.filter(|session| !session.is_closed()) else {
            trace!(
                target: "diagram.connector",
                client_id = %message.client_id,
                kind = %message.action.kind,
                "no live session for inbound action"
            );
            return false;
        };
        if !message.action.is_known() {
            trace!(
                target: "diagram.connector",
                client_id = %message.client_id,
                kind = %message.action.kind,
                "routing unrecognized action kind"
            );
        }
        session.deliver(message.action)
    }
}

async fn run_link(
    provider: Arc<dyn ConnectionProvider>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    link: watch::Sender<LinkState>,
    inner: Weak<Inner>,
) {
    let connection = match provider.connect().await {
        Ok(connection) => connection,
        Err(err) => {
            let err = BridgeError::ConnectionUnavailable(err);
            error!(target: "diagram.connector", error = %err, "language connection failed");
            link.send_replace(LinkState::Unavailable);
            // Queued items stay in the channel until the connector is dropped.
            return std::future::pending().await;
        }
    };

    let mut accept = connection.subscribe(METHOD_ACCEPT);
    let mut open_in_editor = connection.subscribe(METHOD_OPEN_IN_TEXT_EDITOR);
    link.send_replace(LinkState::Ready);
    info!(target: "diagram.connector", "language connection ready");

    loop {
        tokio::select! {
            biased;
            item = outbound.recv() => match item {
                Some(Outbound::Flush(done)) => {
                    connection.drain().await;
                    let _ = done.send(());
                }
                Some(item) => forward(connection.as_ref(), item),
                None => break,
            },
            received = accept.recv() => match received {
                Ok(notification) => {
                    let Some(inner) = inner.upgrade() else { break };
                    handle_accept(&inner, notification);
                }
                Err(err) => {
                    if !inbound_alive(err, METHOD_ACCEPT) {
                        break;
                    }
                }
            },
            received = open_in_editor.recv() => match received {
                Ok(notification) => {
                    let Some(inner) = inner.upgrade() else { break };
                    handle_open_in_editor(inner, notification);
                }
                Err(err) => {
                    if !inbound_alive(err, METHOD_OPEN_IN_TEXT_EDITOR) {
                        break;
                    }
                }
            },
        }
    }

    if inner.strong_count() > 0 {
        link.send_replace(LinkState::Unavailable);
        error!(target: "diagram.connector", "language connection closed");
        std::future::pending::<()>().await;
    }
}

fn forward(connection: &dyn LanguageConnection, item: Outbound) {
    let result = match item {
        Outbound::Accept(message) => match serde_json::to_value(&message) {
            Ok(params) => connection.send_notification(METHOD_ACCEPT, params),
            Err(err) => {
                warn!(target: "diagram.connector", error = %err, "unencodable action message");
                return;
            }
        },
        Outbound::DidClose(client_id) => {
            connection.send_notification(METHOD_DID_CLOSE, Value::String(client_id.to_string()))
        }
        Outbound::Flush(done) => {
            let _ = done.send(());
            return;
        }
    };
    if let Err(err) = result {
        warn!(target: "diagram.connector", error = %err, "send failed");
    }
}

/// Returns `false` once the subscription has closed for good.
fn inbound_alive(err: broadcast::error::RecvError, method: &str) -> bool {
    match err {
        broadcast::error::RecvError::Lagged(skipped) => {
            warn!(target: "diagram.connector", method, skipped, "inbound notifications lagged");
            true
        }
        broadcast::error::RecvError::Closed => false,
    }
}

fn handle_accept(inner: &Inner, notification: Notification) {
    match serde_json::from_value::<ActionMessage>(notification.params) {
        Ok(message) => {
            let client_id = message.client_id.clone();
            let delivered = inner.route(message);
            debug!(target: "diagram.connector", %client_id, delivered, "inbound action routed");
        }
        Err(err) => {
            warn!(target: "diagram.connector", error = %err, "undecodable diagram/accept payload");
        }
    }
}

fn handle_open_in_editor(inner: Arc<Inner>, notification: Notification) {
    let location = match serde_json::from_value::<Location>(notification.params) {
        Ok(location) => location,
        Err(err) => {
            warn!(
                target: "diagram.connector",
                error = %err,
                "undecodable diagram/openInTextEditor payload"
            );
            return;
        }
    };
    let connector = Connector { inner };
    tokio::spawn(async move {
        if let Err(err) = connector.navigate_to_source(location).await {
            warn!(target: "diagram.connector", error = %err, "open in text editor failed");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingEditor, RecordingStore};
    use diagram_protocol::{Action, DiagramKind, DocumentRef};
    use lsp_transport::{DeferredProvider, FailingProvider, LocalConnection, ReadyProvider};
    use serde_json::json;

    fn connector(provider: Arc<dyn ConnectionProvider>) -> Connector {
        Connector::new(
            provider,
            Arc::new(RecordingEditor::default()),
            Arc::new(RecordingStore::default()),
            ConnectorConfig::default(),
        )
    }

    fn session(id: &str) -> Arc<DiagramSession> {
        Arc::new(DiagramSession::new(
            ClientId::from(id),
            DiagramKind::from("yang"),
            DocumentRef::parse(format!("doc://{id}")).unwrap(),
            8,
        ))
    }

    #[test_timeout::tokio_timeout_test]
    async fn sends_before_ready_are_flushed_in_order() {
        let (provider, handle) = DeferredProvider::new();
        let connector = connector(Arc::new(provider));
        let s1 = session("s1");
        connector.attach(&s1);

        s1.dispatch(Action::new("requestModel"));
        s1.dispatch(Action::new("fit"));
        connector.send_outbound(ActionMessage::new(ClientId::from("s1"), Action::new("center")));
        assert_eq!(connector.link_state(), LinkState::Connecting);

        let connection = Arc::new(LocalConnection::new());
        handle.resolve(connection.clone());
        connector.ready().await;
        connector.flush().await;

        let kinds: Vec<_> = connection
            .sent_on(METHOD_ACCEPT)
            .into_iter()
            .map(|params| params["action"]["kind"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(kinds, ["requestModel", "fit", "center"]);
    }

    #[test_timeout::tokio_timeout_test]
    async fn detach_emits_single_did_close() {
        let connection = Arc::new(LocalConnection::new());
        let connector = connector(Arc::new(ReadyProvider::new(connection.clone())));
        let s1 = session("s1");
        connector.attach(&s1);
        assert!(connector.is_attached(s1.client_id()));

        connector.detach(&s1);
        connector.detach(&s1);
        connector.flush().await;

        assert_eq!(connection.sent_on(METHOD_DID_CLOSE), vec![json!("s1")]);
        assert_eq!(connector.attached_count(), 0);
        assert!(!s1.dispatch(Action::new("fit")));
    }

    #[test_timeout::tokio_timeout_test]
    async fn detach_of_unattached_session_still_closes() {
        let connection = Arc::new(LocalConnection::new());
        let connector = connector(Arc::new(ReadyProvider::new(connection.clone())));
        let orphan = session("s9");

        connector.detach(&orphan);
        connector.flush().await;

        assert_eq!(connection.sent_on(METHOD_DID_CLOSE), vec![json!("s9")]);
        connector.attach(&orphan);
        assert!(!connector.is_attached(orphan.client_id()));
    }

    #[test_timeout::tokio_timeout_test]
    async fn detach_leaves_other_sessions_routable() {
        let connection = Arc::new(LocalConnection::new());
        let connector = connector(Arc::new(ReadyProvider::new(connection.clone())));
        let s1 = session("s1");
        let s2 = session("s2");
        connector.attach(&s1);
        connector.attach(&s2);
        let mut inbound = s2.take_inbound().unwrap();

        connector.detach(&s1);
        assert!(!connector.route_inbound(ActionMessage::new(
            ClientId::from("s1"),
            Action::new("setModel")
        )));
        assert!(connector.route_inbound(ActionMessage::new(
            ClientId::from("s2"),
            Action::new("setModel")
        )));
        assert_eq!(inbound.recv().await.unwrap().kind, "setModel");
        assert_eq!(connector.attached_count(), 1);
    }

    #[test_timeout::tokio_timeout_test]
    async fn inbound_notifications_are_routed_by_client_id() {
        let connection = Arc::new(LocalConnection::new());
        let connector = connector(Arc::new(ReadyProvider::new(connection.clone())));
        let s1 = session("s1");
        connector.attach(&s1);
        let mut inbound = s1.take_inbound().unwrap();
        connector.ready().await;

        connection.inject(
            METHOD_ACCEPT,
            json!({"clientId": "s1", "action": {"kind": "setModel", "newRoot": {"id": "root"}}}),
        );
        connection.inject(METHOD_ACCEPT, json!({"not": "an action message"}));
        connection.inject(
            METHOD_ACCEPT,
            json!({"clientId": "s1", "action": {"kind": "yangCollapse"}}),
        );

        let first = inbound.recv().await.unwrap();
        assert_eq!(first.kind, "setModel");
        assert_eq!(first.get("newRoot"), Some(&json!({"id": "root"})));
        assert_eq!(inbound.recv().await.unwrap().kind, "yangCollapse");
    }

    #[test_timeout::tokio_timeout_test]
    async fn unavailable_connection_keeps_sends_pending() {
        let connector = connector(Arc::new(FailingProvider::new("no server")));
        connector.send_outbound(ActionMessage::new(ClientId::from("s1"), Action::new("fit")));

        let mut link = connector.inner.link.clone();
        link.wait_for(|state| *state == LinkState::Unavailable)
            .await
            .unwrap();
        let flushed = tokio::time::timeout(std::time::Duration::from_millis(50), connector.flush()).await;
        assert!(flushed.is_err());
    }

    #[test_timeout::tokio_timeout_test]
    async fn closed_connection_moves_link_to_unavailable() {
        let connection = Arc::new(LocalConnection::new());
        let connector = connector(Arc::new(ReadyProvider::new(connection.clone())));
        let s1 = session("s1");
        connector.attach(&s1);
        let mut inbound = s1.take_inbound().unwrap();
        connector.ready().await;

        connection.close();
        // Fails inside the link task; logged, not fatal.
        assert!(s1.dispatch(Action::new("fit")));

        let mut link = connector.inner.link.clone();
        link.wait_for(|state| *state == LinkState::Unavailable)
            .await
            .unwrap();
        assert!(connection.sent().is_empty());

        connector.send_outbound(ActionMessage::new(ClientId::from("s1"), Action::new("center")));
        assert!(connector.route_inbound(ActionMessage::new(
            ClientId::from("s1"),
            Action::new("setModel")
        )));
        assert_eq!(inbound.recv().await.unwrap().kind, "setModel");
        connector.detach(&s1);
        assert_eq!(connector.attached_count(), 0);
    }

    #[test_timeout::tokio_timeout_test]
    async fn removal_before_ready_keeps_queued_actions() {
        let (provider, handle) = DeferredProvider::new();
        let connector = connector(Arc::new(provider));
        let registry = crate::SessionRegistry::new(
            connector.clone(),
            crate::RegistryConfig {
                client_id_prefix: "s".into(),
            },
        );
        let document = DocumentRef::parse("doc://a").unwrap();
        let kind = DiagramKind::from("yang");

        let s1 = registry.get_or_create(&document, &kind);
        assert!(s1.dispatch(Action::new("fit")));
        registry.remove(&document, &kind);

        let connection = Arc::new(LocalConnection::new());
        handle.resolve(connection.clone());
        connector.flush().await;

        let sent: Vec<_> = connection
            .sent()
            .into_iter()
            .map(|notification| (notification.method, notification.params))
            .collect();
        assert_eq!(
            sent,
            vec![
                (
                    METHOD_ACCEPT.to_string(),
                    json!({"clientId": "s1", "action": {"kind": "fit"}})
                ),
                (METHOD_DID_CLOSE.to_string(), json!("s1")),
            ]
        );
    }

    #[test_timeout::tokio_timeout_test]
    async fn export_failure_propagates() {
        let store = Arc::new(RecordingStore::failing());
        let connector = Connector::new(
            Arc::new(ReadyProvider::new(Arc::new(LocalConnection::new()))),
            Arc::new(RecordingEditor::default()),
            store,
            ConnectorConfig::default(),
        );
        let result = connector
            .export_artifact("file:///tmp/a.svg", ExportedArtifact::svg("<svg/>"))
            .await;
        assert!(matches!(
            result,
            Err(BridgeError::Collaborator { operation: "export artifact", .. })
        ));
    }
}
