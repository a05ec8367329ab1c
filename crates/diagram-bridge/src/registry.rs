use std::collections::HashMap;
use std::sync::Arc;

use diagram_protocol::{ClientId, DiagramKind, DocumentRef};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::{Connector, DiagramSession, RegistryConfig, SessionKey};

/// Owns every live session, at most one per (document, kind).
pub struct SessionRegistry {
    connector: Connector,
    config: RegistryConfig,
    state: Mutex<RegistryState>,
}

struct RegistryState {
    sessions: HashMap<SessionKey, Arc<DiagramSession>>,
    next_id: u64,
}

impl SessionRegistry {
    pub fn new(connector: Connector, config: RegistryConfig) -> Self {
        Self {
            connector,
            config,
            state: Mutex::new(RegistryState {
                sessions: HashMap::new(),
                next_id: 1,
            }),
        }
    }

    /// Returns the session for the pair, creating and attaching one if needed.
    pub fn get_or_create(&self, document: &DocumentRef, kind: &DiagramKind) -> Arc<DiagramSession> {
        let key = SessionKey::new(document.clone(), kind.clone());
        let mut state = self.state.lock();
        if let Some(existing) = state.sessions.get(&key) {
            debug!(
                target: "diagram.registry",
                client_id = %existing.client_id(),
                document = %document,
                "reusing session"
            );
            return Arc::clone(existing);
        }

        let client_id = ClientId::new(format!("{}{}", self.config.client_id_prefix, state.next_id));
        state.next_id += 1;
        let session = Arc::new(DiagramSession::new(
            client_id,
            kind.clone(),
            document.clone(),
            self.connector.config().inbound_capacity,
        ));
        self.connector.attach(&session);
        state.sessions.insert(key, Arc::clone(&session));
        info!(
            target: "diagram.registry",
            client_id = %session.client_id(),
            document = %document,
            kind = %kind,
            "session created"
        );
        session
    }

    /// Drops the mapping and detaches the session. No-op when absent.
    pub fn remove(&self, document: &DocumentRef, kind: &DiagramKind) -> Option<Arc<DiagramSession>> {
        let key = SessionKey::new(document.clone(), kind.clone());
        let removed = self.state.lock().sessions.remove(&key)?;
        self.connector.detach(&removed);
        info!(
            target: "diagram.registry",
            client_id = %removed.client_id(),
            document = %document,
            "session removed"
        );
        Some(removed)
    }

    pub fn find(&self, document: &DocumentRef, kind: &DiagramKind) -> Option<Arc<DiagramSession>> {
        let key = SessionKey::new(document.clone(), kind.clone());
        self.state.lock().sessions.get(&key).cloned()
    }

    pub fn len(&self) -> usize {
        self.state.lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().sessions.is_empty()
    }

    pub fn keys(&self) -> Vec<SessionKey> {
        let mut keys: Vec<_> = self.state.lock().sessions.keys().cloned().collect();
        keys.sort();
        keys
    }
}
