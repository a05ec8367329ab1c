//! Shared wire definitions for diagram views talking to a language server.
//! Keeping these in a dedicated crate lets the transport, the bridge and any
//! external tooling agree on envelopes without pulling in runtime code.

mod action;
mod document;
mod error;
mod location;

pub use action::{Action, ActionMessage, KnownAction};
pub use document::{ClientId, DiagramKind, DocumentRef};
pub use error::{ProtocolError, ProtocolResult};
pub use location::{Location, Position, Range};

/// Session-addressed action relay. Used in both directions.
pub const METHOD_ACCEPT: &str = "diagram/accept";
/// Outbound notice that a client id is gone and its server-side state can be released.
pub const METHOD_DID_CLOSE: &str = "diagram/didClose";
/// Inbound request to reveal a source range in the text editor.
pub const METHOD_OPEN_IN_TEXT_EDITOR: &str = "diagram/openInTextEditor";
