//! Diagram session bridge.
//!
//! Many diagram views share one connection to a language server. The
//! [`SessionRegistry`] hands out one [`DiagramSession`] per document and
//! diagram kind, the [`Connector`] multiplexes their actions over the shared
//! connection by client id, and a [`DiagramManager`] per kind drives the view
//! lifecycle from open to dispose.

mod collaborators;
mod config;
mod connector;
mod error;
mod manager;
mod managers;
mod registry;
mod session;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
mod view;

pub use collaborators::{
    ApplicationShell, ArtifactStore, EditorHandle, EditorService, ExportedArtifact,
};
pub use config::{
    ConnectorConfig, DiagramConfiguration, DiagramConfigurationRegistry, RegistryConfig,
    DEFAULT_CLIENT_ID_PREFIX, DEFAULT_ICON_CLASS, DEFAULT_INBOUND_CAPACITY, DEFAULT_OPEN_PRIORITY,
};
pub use connector::{Connector, LinkState};
pub use error::{BridgeError, BridgeResult, CollaboratorError};
pub use manager::{DiagramManager, ViewState};
pub use managers::DiagramManagers;
pub use registry::SessionRegistry;
pub use session::{DiagramSession, SessionKey};
pub use view::DiagramView;
