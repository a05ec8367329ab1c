use std::sync::Arc;
use std::time::Duration;

use diagram_bridge::testing::{EditorEvent, RecordingEditor, RecordingShell, RecordingStore};
use diagram_bridge::{
    BridgeError, Connector, ConnectorConfig, DiagramConfiguration, DiagramManager, RegistryConfig,
    SessionRegistry, ViewState,
};
use diagram_protocol::{
    Action, ActionMessage, ClientId, DiagramKind, DocumentRef, Location, Position, Range,
    METHOD_ACCEPT, METHOD_DID_CLOSE, METHOD_OPEN_IN_TEXT_EDITOR,
};
use lsp_transport::{ConnectionProvider, DeferredProvider, LocalConnection, ReadyProvider};
use serde_json::json;

struct Harness {
    connection: Arc<LocalConnection>,
    connector: Connector,
    registry: Arc<SessionRegistry>,
    manager: DiagramManager,
    shell: Arc<RecordingShell>,
    editor: Arc<RecordingEditor>,
}

impl Harness {
    fn ready() -> Self {
        let connection = Arc::new(LocalConnection::new());
        Self::with_provider(
            connection.clone(),
            Arc::new(ReadyProvider::new(connection)),
            RecordingEditor::default(),
        )
    }

    fn with_provider(
        connection: Arc<LocalConnection>,
        provider: Arc<dyn ConnectionProvider>,
        editor: RecordingEditor,
    ) -> Self {
        let editor = Arc::new(editor);
        let connector = Connector::new(
            provider,
            editor.clone(),
            Arc::new(RecordingStore::default()),
            ConnectorConfig::default(),
        );
        let registry = Arc::new(SessionRegistry::new(
            connector.clone(),
            RegistryConfig {
                client_id_prefix: "s".into(),
            },
        ));
        let manager = DiagramManager::new(
            DiagramConfiguration::new("yang"),
            Arc::clone(&registry),
            connector.clone(),
        );
        let shell = Arc::new(RecordingShell::default());
        manager.on_start(shell.clone());
        Self {
            connection,
            connector,
            registry,
            manager,
            shell,
            editor,
        }
    }

    fn accepted(&self) -> Vec<serde_json::Value> {
        self.connection.sent_on(METHOD_ACCEPT)
    }

    fn closed(&self) -> Vec<serde_json::Value> {
        self.connection.sent_on(METHOD_DID_CLOSE)
    }
}

fn doc(uri: &str) -> DocumentRef {
    DocumentRef::parse(uri).unwrap()
}

fn yang() -> DiagramKind {
    DiagramKind::from("yang")
}

#[test_timeout::tokio_timeout_test]
async fn select_is_forwarded_and_close_releases_session() {
    let harness = Harness::ready();
    let view = harness.manager.open(&doc("doc://a")).await.unwrap();
    assert_eq!(view.client_id().as_str(), "s1");
    assert_eq!(harness.manager.view_state(&doc("doc://a")), ViewState::Active);

    view.dispatch(Action::new("select").with("nodeId", "X"));
    harness.connector.flush().await;
    assert_eq!(
        harness.accepted(),
        vec![json!({"clientId": "s1", "action": {"kind": "select", "nodeId": "X"}})]
    );

    assert!(harness.manager.close(&doc("doc://a")));
    harness.connector.flush().await;
    assert_eq!(harness.closed(), vec![json!("s1")]);
    assert!(harness.registry.find(&doc("doc://a"), &yang()).is_none());
    assert_eq!(harness.manager.view_state(&doc("doc://a")), ViewState::Absent);
}

#[test_timeout::tokio_timeout_test]
async fn open_in_text_editor_reveals_range() {
    let harness = Harness::ready();
    harness.connector.ready().await;

    harness.connection.inject(
        METHOD_OPEN_IN_TEXT_EDITOR,
        json!({
            "uri": "doc://a",
            "range": {"start": {"line": 3, "character": 0}, "end": {"line": 3, "character": 10}},
        }),
    );

    let range = Range::new(3, 0, 3, 10);
    let expected = vec![
        EditorEvent::Opened(doc("doc://a")),
        EditorEvent::Cursor(Position::new(3, 0)),
        EditorEvent::Revealed(range),
        EditorEvent::Selection(range),
    ];
    while harness.editor.events() != expected {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[test_timeout::tokio_timeout_test]
async fn navigate_failure_reaches_the_caller() {
    let connection = Arc::new(LocalConnection::new());
    let harness = Harness::with_provider(
        connection.clone(),
        Arc::new(ReadyProvider::new(connection)),
        RecordingEditor::default().without(doc("doc://gone")),
    );

    let result = harness
        .connector
        .navigate_to_source(Location {
            uri: doc("doc://gone"),
            range: Range::new(0, 0, 0, 1),
        })
        .await;
    assert!(matches!(
        result,
        Err(BridgeError::Collaborator { operation: "open editor", .. })
    ));
    assert!(harness.editor.events().is_empty());
}

#[test_timeout::tokio_timeout_test]
async fn reopen_activates_the_same_view() {
    let harness = Harness::ready();
    let first = harness.manager.open(&doc("doc://a")).await.unwrap();
    let second = harness.manager.open(&doc("doc://a")).await.unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(harness.registry.len(), 1);
    assert_eq!(harness.shell.added(), vec!["s1".to_string()]);
    assert_eq!(harness.shell.activated(), vec!["s1".to_string(), "s1".to_string()]);
}

#[test_timeout::tokio_timeout_test]
async fn concurrent_opens_share_one_session() {
    let harness = Harness::ready();
    let document = doc("doc://a");
    let (left, right) = tokio::join!(
        harness.manager.open(&document),
        harness.manager.open(&document),
    );
    let (left, right) = (left.unwrap(), right.unwrap());

    assert_eq!(left.client_id(), right.client_id());
    assert!(Arc::ptr_eq(&left, &right));
    assert_eq!(harness.registry.len(), 1);
    assert_eq!(harness.shell.added().len(), 1);
}

#[test_timeout::tokio_timeout_test]
async fn one_session_per_key_across_open_close_cycles() {
    let harness = Harness::ready();
    let mut issued = Vec::new();
    for _ in 0..3 {
        let view = harness.manager.open(&doc("doc://a")).await.unwrap();
        harness.manager.open(&doc("doc://b")).await.unwrap();
        assert_eq!(harness.registry.len(), 2);
        issued.push(view.client_id().clone());
        view.dispose();
        assert_eq!(harness.registry.len(), 1);
    }

    let ids: Vec<_> = issued.iter().map(ClientId::as_str).collect();
    assert_eq!(ids, ["s1", "s3", "s4"]);
    assert_eq!(harness.registry.keys().len(), 1);
}

#[test_timeout::tokio_timeout_test]
async fn removed_key_gets_a_never_issued_id() {
    let harness = Harness::ready();
    let first = harness.registry.get_or_create(&doc("doc://a"), &yang());
    harness.registry.remove(&doc("doc://a"), &yang());
    let second = harness.registry.get_or_create(&doc("doc://a"), &yang());

    assert_ne!(first.client_id(), second.client_id());
    assert!(!harness.connector.is_attached(first.client_id()));
    assert!(harness.connector.is_attached(second.client_id()));
}

#[test_timeout::tokio_timeout_test]
async fn stale_inbound_is_dropped_without_side_effects() {
    let harness = Harness::ready();
    let a = harness.manager.open(&doc("doc://a")).await.unwrap();
    let b = harness.manager.open(&doc("doc://b")).await.unwrap();
    let mut b_inbound = b.take_inbound().unwrap();
    harness.connector.ready().await;

    a.dispose();
    harness.connection.inject(
        METHOD_ACCEPT,
        json!({"clientId": a.client_id(), "action": {"kind": "setModel"}}),
    );
    harness.connection.inject(
        METHOD_ACCEPT,
        json!({"clientId": b.client_id(), "action": {"kind": "updateModel"}}),
    );

    assert_eq!(b_inbound.recv().await.unwrap().kind, "updateModel");
    assert!(!harness.connector.route_inbound(ActionMessage::new(
        a.client_id().clone(),
        Action::new("fit")
    )));
    assert_eq!(harness.connector.attached_count(), 1);
}

#[test_timeout::tokio_timeout_test]
async fn outbound_order_survives_late_connection() {
    let (provider, handle) = DeferredProvider::new();
    let connection = Arc::new(LocalConnection::new());
    let harness = Harness::with_provider(
        connection.clone(),
        Arc::new(provider),
        RecordingEditor::default(),
    );

    let a = harness.manager.open(&doc("doc://a")).await.unwrap();
    let b = harness.manager.open(&doc("doc://b")).await.unwrap();
    for n in 0..5 {
        a.dispatch(Action::new("select").with("nodeId", format!("a{n}")));
        b.dispatch(Action::new("select").with("nodeId", format!("b{n}")));
    }
    assert!(connection.sent().is_empty());

    handle.resolve(connection.clone());
    harness.connector.flush().await;

    let per_session = |client: &str| -> Vec<String> {
        harness
            .accepted()
            .into_iter()
            .filter(|params| params["clientId"] == client)
            .map(|params| params["action"]["nodeId"].as_str().unwrap().to_string())
            .collect()
    };
    assert_eq!(per_session("s1"), ["a0", "a1", "a2", "a3", "a4"]);
    assert_eq!(per_session("s2"), ["b0", "b1", "b2", "b3", "b4"]);
}

#[test_timeout::tokio_timeout_test]
async fn double_detach_emits_one_did_close() {
    let harness = Harness::ready();
    let view = harness.manager.open(&doc("doc://a")).await.unwrap();

    view.dispose();
    harness.connector.detach(view.session());
    harness.registry.remove(&doc("doc://a"), &yang());
    assert!(!harness.manager.close(&doc("doc://a")));
    harness.connector.flush().await;

    assert_eq!(harness.closed(), vec![json!("s1")]);
}

#[test_timeout::tokio_timeout_test]
async fn opened_event_follows_activation() {
    let harness = Harness::ready();
    let mut opened = harness.manager.subscribe_opened();

    harness.manager.open(&doc("doc://a")).await.unwrap();
    assert_eq!(opened.recv().await.unwrap(), doc("doc://a"));
    assert_eq!(harness.shell.activated(), vec!["s1".to_string()]);

    harness.manager.open(&doc("doc://a")).await.unwrap();
    assert_eq!(opened.recv().await.unwrap(), doc("doc://a"));
}
