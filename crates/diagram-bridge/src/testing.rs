//! Recording collaborators for tests. Built for this crate's own tests and behind the
//! `testing` feature for downstream ones.

use std::sync::Arc;

use async_trait::async_trait;
use diagram_protocol::{DocumentRef, Position, Range};
use parking_lot::Mutex;

use crate::{
    ApplicationShell, ArtifactStore, CollaboratorError, DiagramView, EditorHandle, EditorService,
    ExportedArtifact,
};

/// Editor calls observed by a [`RecordingEditor`], in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditorEvent {
    Opened(DocumentRef),
    Cursor(Position),
    Selection(Range),
    Revealed(Range),
}

#[derive(Debug, Default)]
pub struct RecordingEditor {
    events: Arc<Mutex<Vec<EditorEvent>>>,
    missing: Mutex<Vec<DocumentRef>>,
}

impl RecordingEditor {
    /// Make `open` fail with `NotFound` for `document`.
    pub fn without(self, document: DocumentRef) -> Self {
        self.missing.lock().push(document);
        self
    }

    pub fn events(&self) -> Vec<EditorEvent> {
        self.events.lock().clone()
    }
}

#[async_trait]
impl EditorService for RecordingEditor {
    async fn open(&self, document: &DocumentRef) -> Result<Arc<dyn EditorHandle>, CollaboratorError> {
        if self.missing.lock().contains(document) {
            return Err(CollaboratorError::NotFound(document.to_string()));
        }
        self.events.lock().push(EditorEvent::Opened(document.clone()));
        Ok(Arc::new(RecordingHandle {
            events: Arc::clone(&self.events),
        }))
    }
}

struct RecordingHandle {
    events: Arc<Mutex<Vec<EditorEvent>>>,
}

impl EditorHandle for RecordingHandle {
    fn set_cursor(&self, position: Position) {
        self.events.lock().push(EditorEvent::Cursor(position));
    }

    fn set_selection(&self, range: Range) {
        self.events.lock().push(EditorEvent::Selection(range));
    }

    fn reveal_range(&self, range: Range) {
        self.events.lock().push(EditorEvent::Revealed(range));
    }
}

#[derive(Debug, Default)]
pub struct RecordingShell {
    added: Mutex<Vec<String>>,
    activated: Mutex<Vec<String>>,
}

impl RecordingShell {
    pub fn added(&self) -> Vec<String> {
        self.added.lock().clone()
    }

    pub fn activated(&self) -> Vec<String> {
        self.activated.lock().clone()
    }
}

impl ApplicationShell for RecordingShell {
    fn add_view(&self, view: Arc<DiagramView>) {
        self.added.lock().push(view.id().to_string());
    }

    fn activate(&self, view_id: &str) {
        self.activated.lock().push(view_id.to_string());
    }
}

#[derive(Debug, Default)]
pub struct RecordingStore {
    saved: Mutex<Vec<(String, ExportedArtifact)>>,
    fail: bool,
}

impl RecordingStore {
    /// A store that rejects every save.
    pub fn failing() -> Self {
        Self {
            saved: Mutex::default(),
            fail: true,
        }
    }

    pub fn saved(&self) -> Vec<(String, ExportedArtifact)> {
        self.saved.lock().clone()
    }
}

#[async_trait]
impl ArtifactStore for RecordingStore {
    async fn save(&self, uri: &str, artifact: &ExportedArtifact) -> Result<(), CollaboratorError> {
        if self.fail {
            return Err(CollaboratorError::Rejected(format!("read-only store: {uri}")));
        }
        self.saved.lock().push((uri.to_string(), artifact.clone()));
        Ok(())
    }
}
