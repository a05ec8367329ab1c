use diagram_protocol::{DiagramKind, DocumentRef};
use lsp_transport::TransportError;
use thiserror::Error;

/// Failure reported by an editor, shell or artifact store implementation.
#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("rejected: {0}")]
    Rejected(String),
}

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("language connection unavailable: {0}")]
    ConnectionUnavailable(#[from] TransportError),
    #[error("{operation} failed: {source}")]
    Collaborator {
        operation: &'static str,
        #[source]
        source: CollaboratorError,
    },
    #[error("unknown diagram kind {0}")]
    UnknownDiagramKind(DiagramKind),
    #[error("no diagram opener accepts {0}")]
    NoOpenHandler(DocumentRef),
    #[error("diagram for {0} was closed while opening")]
    ViewClosed(DocumentRef),
    #[error("diagram manager is shutting down")]
    ShuttingDown,
}

impl BridgeError {
    pub(crate) fn collaborator(operation: &'static str) -> impl FnOnce(CollaboratorError) -> Self {
        move |source| BridgeError::Collaborator { operation, source }
    }
}

pub type BridgeResult<T> = Result<T, BridgeError>;
