use std::sync::Arc;

use diagram_protocol::{DiagramKind, DocumentRef};
use tracing::debug;

use crate::{
    ApplicationShell, BridgeError, BridgeResult, Connector, DiagramConfigurationRegistry,
    DiagramManager, DiagramView, SessionRegistry,
};

/// One [`DiagramManager`] per configured kind, sharing a registry and connector.
#[derive(Clone)]
pub struct DiagramManagers {
    managers: Vec<DiagramManager>,
}

impl DiagramManagers {
    pub fn new(
        configurations: &DiagramConfigurationRegistry,
        registry: Arc<SessionRegistry>,
        connector: Connector,
    ) -> Self {
        let managers = configurations
            .iter()
            .map(|configuration| {
                DiagramManager::new(configuration.clone(), Arc::clone(&registry), connector.clone())
            })
            .collect();
        Self { managers }
    }

    pub fn on_start(&self, shell: Arc<dyn ApplicationShell>) {
        for manager in &self.managers {
            manager.on_start(Arc::clone(&shell));
        }
    }

    pub fn manager(&self, kind: &DiagramKind) -> BridgeResult<&DiagramManager> {
        self.managers
            .iter()
            .find(|manager| manager.kind() == kind)
            .ok_or_else(|| BridgeError::UnknownDiagramKind(kind.clone()))
    }

    /// The manager with the highest non-zero priority for `document`. Ties go
    /// to the kind that sorts first.
    pub fn handler_for(&self, document: &DocumentRef) -> BridgeResult<&DiagramManager> {
        let mut best: Option<(&DiagramManager, u32)> = None;
        for manager in &self.managers {
            let priority = manager.can_handle(document);
            if priority > best.map_or(0, |(_, best)| best) {
                best = Some((manager, priority));
            }
        }
        best.map(|(manager, _)| manager)
            .ok_or_else(|| BridgeError::NoOpenHandler(document.clone()))
    }

    pub async fn open(&self, document: &DocumentRef) -> BridgeResult<Arc<DiagramView>> {
        let manager = self.handler_for(document)?;
        debug!(
            target: "diagram.manager",
            opener = %manager.id(),
            document = %document,
            "selected diagram opener"
        );
        manager.open(document).await
    }

    /// Shut every manager down. Returns the number of views closed.
    pub fn close_all(&self) -> usize {
        self.managers.iter().map(DiagramManager::shutdown).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DiagramManager> {
        self.managers.iter()
    }

    pub fn len(&self) -> usize {
        self.managers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.managers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingEditor, RecordingShell, RecordingStore};
    use crate::{ConnectorConfig, DiagramConfiguration, RegistryConfig};
    use lsp_transport::{LocalConnection, ReadyProvider};

    fn managers(configurations: Vec<DiagramConfiguration>) -> (DiagramManagers, Arc<SessionRegistry>) {
        let connector = Connector::new(
            Arc::new(ReadyProvider::new(Arc::new(LocalConnection::new()))),
            Arc::new(RecordingEditor::default()),
            Arc::new(RecordingStore::default()),
            ConnectorConfig::default(),
        );
        let registry = Arc::new(SessionRegistry::new(connector.clone(), RegistryConfig::default()));
        let configurations: DiagramConfigurationRegistry = configurations.into_iter().collect();
        (
            DiagramManagers::new(&configurations, Arc::clone(&registry), connector),
            registry,
        )
    }

    fn doc(uri: &str) -> DocumentRef {
        DocumentRef::parse(uri).unwrap()
    }

    #[test_timeout::tokio_timeout_test]
    async fn open_picks_highest_priority_kind() {
        let (managers, _) = managers(vec![
            DiagramConfiguration::new("generic"),
            DiagramConfiguration::new("yang")
                .with_extension("yang")
                .with_open_priority(50),
        ]);
        managers.on_start(Arc::new(RecordingShell::default()));

        let yang = managers.open(&doc("file:///m/ietf-ip.yang")).await.unwrap();
        assert_eq!(yang.kind().as_str(), "yang");
        let other = managers.open(&doc("file:///m/notes.txt")).await.unwrap();
        assert_eq!(other.kind().as_str(), "generic");
    }

    #[test_timeout::tokio_timeout_test]
    async fn unclaimed_document_has_no_handler() {
        let (managers, _) = managers(vec![DiagramConfiguration::new("yang").with_extension("yang")]);
        assert!(matches!(
            managers.open(&doc("file:///m/notes.txt")).await,
            Err(BridgeError::NoOpenHandler(_))
        ));
        assert!(matches!(
            managers.manager(&DiagramKind::from("uml")),
            Err(BridgeError::UnknownDiagramKind(_))
        ));
    }

    #[test_timeout::tokio_timeout_test]
    async fn close_all_releases_every_session() {
        let (managers, registry) = managers(vec![
            DiagramConfiguration::new("yang"),
            DiagramConfiguration::new("uml").with_open_priority(5),
        ]);
        managers.on_start(Arc::new(RecordingShell::default()));
        managers.open(&doc("doc://a")).await.unwrap();
        managers
            .manager(&DiagramKind::from("uml"))
            .unwrap()
            .open(&doc("doc://a"))
            .await
            .unwrap();
        assert_eq!(registry.len(), 2);

        assert_eq!(managers.close_all(), 2);
        assert!(registry.is_empty());
    }
}
