//! Interfaces of the subsystems the bridge drives but does not own.

use std::sync::Arc;

use async_trait::async_trait;
use diagram_protocol::{DocumentRef, Position, Range};

use crate::{CollaboratorError, DiagramView};

/// Opens documents in a text editor.
#[async_trait]
pub trait EditorService: Send + Sync {
    async fn open(&self, document: &DocumentRef) -> Result<Arc<dyn EditorHandle>, CollaboratorError>;
}

/// An open text editor.
pub trait EditorHandle: Send + Sync {
    fn set_cursor(&self, position: Position);
    fn set_selection(&self, range: Range);
    fn reveal_range(&self, range: Range);
}

/// The UI container that houses diagram views.
pub trait ApplicationShell: Send + Sync {
    fn add_view(&self, view: Arc<DiagramView>);
    fn activate(&self, view_id: &str);
}

/// Persists artifacts exported from a diagram.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn save(&self, uri: &str, artifact: &ExportedArtifact) -> Result<(), CollaboratorError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedArtifact {
    pub media_type: String,
    pub content: String,
}

impl ExportedArtifact {
    pub fn svg(content: impl Into<String>) -> Self {
        Self {
            media_type: "image/svg+xml".to_string(),
            content: content.into(),
        }
    }
}
