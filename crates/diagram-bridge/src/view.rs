use std::fmt;
use std::sync::Arc;

use diagram_protocol::{Action, ClientId, DiagramKind, DocumentRef};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::trace;

use crate::{DiagramConfiguration, DiagramSession};

pub(crate) type Teardown = Box<dyn FnOnce() + Send>;

/// A diagram widget as seen by the application shell.
pub struct DiagramView {
    id: String,
    container_id: String,
    label: String,
    icon_class: String,
    document: DocumentRef,
    kind: DiagramKind,
    session: Arc<DiagramSession>,
    action_kinds: Vec<String>,
    teardown: Mutex<Option<Teardown>>,
}

impl DiagramView {
    pub(crate) fn new(
        configuration: &DiagramConfiguration,
        session: Arc<DiagramSession>,
        teardown: Teardown,
    ) -> Self {
        let id = session.client_id().to_string();
        Self {
            container_id: format!("{id}_sprotty"),
            id,
            label: session.document().base_name().to_string(),
            icon_class: configuration.icon_class.clone(),
            document: session.document().clone(),
            kind: session.kind().clone(),
            action_kinds: configuration.action_kinds.clone(),
            session,
            teardown: Mutex::new(Some(teardown)),
        }
    }

    /// Shell-level identifier, equal to the session's client id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Id of the element the renderer draws into.
    pub fn container_id(&self) -> &str {
        &self.container_id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn icon_class(&self) -> &str {
        &self.icon_class
    }

    pub fn is_closable(&self) -> bool {
        true
    }

    pub fn document(&self) -> &DocumentRef {
        &self.document
    }

    pub fn kind(&self) -> &DiagramKind {
        &self.kind
    }

    pub fn client_id(&self) -> &ClientId {
        self.session.client_id()
    }

    pub fn session(&self) -> &Arc<DiagramSession> {
        &self.session
    }

    /// Send an action to the remote process on behalf of this view.
    pub fn dispatch(&self, action: Action) -> bool {
        if !self.action_kinds.iter().any(|kind| *kind == action.kind) {
            trace!(
                target: "diagram.manager",
                view = %self.id,
                kind = %action.kind,
                "dispatching unrecognized action kind"
            );
        }
        self.session.dispatch(action)
    }

    pub fn take_inbound(&self) -> Option<mpsc::Receiver<Action>> {
        self.session.take_inbound()
    }

    pub fn is_disposed(&self) -> bool {
        self.teardown.lock().is_none()
    }

    /// Close the view. The teardown runs once; later calls do nothing.
    pub fn dispose(&self) {
        let teardown = self.teardown.lock().take();
        if let Some(teardown) = teardown {
            teardown();
        }
    }

    /// Consume the teardown without running it, for callers that perform
    /// the teardown steps themselves.
    pub(crate) fn disarm(&self) {
        self.teardown.lock().take();
    }
}

impl fmt::Debug for DiagramView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiagramView")
            .field("id", &self.id)
            .field("document", &self.document)
            .field("kind", &self.kind)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
