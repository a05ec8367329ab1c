//! Collaborators for running diagram sessions without a UI: views are logged
//! instead of rendered and the editor and artifact store work on local files.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use diagram_bridge::{
    ApplicationShell, ArtifactStore, CollaboratorError, DiagramView, EditorHandle, EditorService,
    ExportedArtifact,
};
use diagram_protocol::{DocumentRef, Position, Range};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::config::absolute;

#[derive(Debug, Default)]
pub struct HeadlessShell {
    views: Mutex<Vec<Arc<DiagramView>>>,
}

impl HeadlessShell {
    /// Views added so far that have not been disposed.
    pub fn live_views(&self) -> Vec<Arc<DiagramView>> {
        let mut views = self.views.lock();
        views.retain(|view| !view.is_disposed());
        views.clone()
    }
}

impl ApplicationShell for HeadlessShell {
    fn add_view(&self, view: Arc<DiagramView>) {
        info!(
            target: "diagram.host",
            view_id = view.id(),
            label = view.label(),
            document = %view.document(),
            "diagram view added"
        );
        self.views.lock().push(view);
    }

    fn activate(&self, view_id: &str) {
        debug!(target: "diagram.host", view_id, "diagram view activated");
    }
}

fn local_path(document: &DocumentRef) -> Result<PathBuf, CollaboratorError> {
    if document.scheme() != "file" {
        return Err(CollaboratorError::Rejected(format!(
            "not a local file: {document}"
        )));
    }
    Ok(PathBuf::from(document.path()))
}

/// Opens `file://` documents after checking they exist. Editor calls are logged.
#[derive(Debug, Default)]
pub struct FsEditor;

#[async_trait]
impl EditorService for FsEditor {
    async fn open(&self, document: &DocumentRef) -> Result<Arc<dyn EditorHandle>, CollaboratorError> {
        let path = local_path(document)?;
        match tokio::fs::metadata(&path).await {
            Ok(metadata) if metadata.is_file() => {}
            Ok(_) => return Err(CollaboratorError::NotFound(path.display().to_string())),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(CollaboratorError::NotFound(path.display().to_string()))
            }
            Err(err) => return Err(err.into()),
        }
        Ok(Arc::new(LoggedEditor {
            document: document.clone(),
        }))
    }
}

struct LoggedEditor {
    document: DocumentRef,
}

impl EditorHandle for LoggedEditor {
    fn set_cursor(&self, position: Position) {
        debug!(
            target: "diagram.host",
            document = %self.document,
            line = position.line,
            character = position.character,
            "cursor moved"
        );
    }

    fn set_selection(&self, range: Range) {
        info!(
            target: "diagram.host",
            document = %self.document,
            start_line = range.start.line,
            end_line = range.end.line,
            "source range selected"
        );
    }

    fn reveal_range(&self, range: Range) {
        debug!(
            target: "diagram.host",
            document = %self.document,
            line = range.start.line,
            "range revealed"
        );
    }
}

/// Writes artifacts to `file://` targets, creating parent directories.
#[derive(Debug, Default)]
pub struct FsArtifactStore;

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn save(&self, uri: &str, artifact: &ExportedArtifact) -> Result<(), CollaboratorError> {
        let target = DocumentRef::parse(uri)
            .map_err(|err| CollaboratorError::Rejected(err.to_string()))?;
        let path = local_path(&target)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, artifact.content.as_bytes()).await?;
        Ok(())
    }
}

/// `file://` target for the SVG export of `document` inside `dir`. A relative
/// `dir` is taken from the working directory.
pub fn export_uri(dir: &Path, document: &DocumentRef) -> anyhow::Result<String> {
    let name = document.base_name();
    let stem = document
        .extension()
        .and_then(|extension| name.strip_suffix(extension))
        .unwrap_or(name);
    let target = absolute(dir)?.join(format!("{stem}.svg"));
    Ok(format!("file://{}", target.display()))
}
