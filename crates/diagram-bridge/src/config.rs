use std::collections::BTreeMap;

use diagram_protocol::{DiagramKind, DocumentRef, KnownAction};
use serde::{Deserialize, Serialize};

use crate::{BridgeError, BridgeResult};

pub const DEFAULT_INBOUND_CAPACITY: usize = 128;
pub const DEFAULT_CLIENT_ID_PREFIX: &str = "diagram-";
pub const DEFAULT_OPEN_PRIORITY: u32 = 10;
pub const DEFAULT_ICON_CLASS: &str = "fa fa-project-diagram";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectorConfig {
    /// Per-session buffer of inbound actions awaiting the view's consumer.
    pub inbound_capacity: usize,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            inbound_capacity: DEFAULT_INBOUND_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub client_id_prefix: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            client_id_prefix: DEFAULT_CLIENT_ID_PREFIX.to_string(),
        }
    }
}

/// Everything a manager needs to know about one diagram kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagramConfiguration {
    pub kind: DiagramKind,
    #[serde(default = "default_icon_class")]
    pub icon_class: String,
    /// Extensions this kind opens, with or without the leading dot. Empty
    /// means every document.
    #[serde(default)]
    pub file_extensions: Vec<String>,
    #[serde(default = "default_open_priority")]
    pub open_priority: u32,
    #[serde(default = "default_action_kinds")]
    pub action_kinds: Vec<String>,
}

fn default_icon_class() -> String {
    DEFAULT_ICON_CLASS.to_string()
}

fn default_open_priority() -> u32 {
    DEFAULT_OPEN_PRIORITY
}

fn default_action_kinds() -> Vec<String> {
    KnownAction::KINDS.iter().map(|kind| kind.to_string()).collect()
}

impl DiagramConfiguration {
    pub fn new(kind: impl Into<DiagramKind>) -> Self {
        Self {
            kind: kind.into(),
            icon_class: default_icon_class(),
            file_extensions: Vec::new(),
            open_priority: DEFAULT_OPEN_PRIORITY,
            action_kinds: default_action_kinds(),
        }
    }

    pub fn with_icon_class(mut self, icon_class: impl Into<String>) -> Self {
        self.icon_class = icon_class.into();
        self
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.file_extensions.push(extension.into());
        self
    }

    pub fn with_open_priority(mut self, priority: u32) -> Self {
        self.open_priority = priority;
        self
    }

    pub fn with_action_kind(mut self, kind: impl Into<String>) -> Self {
        self.action_kinds.push(kind.into());
        self
    }

    pub fn claims(&self, document: &DocumentRef) -> bool {
        if self.file_extensions.is_empty() {
            return true;
        }
        let Some(extension) = document.extension().map(|ext| ext.trim_start_matches('.')) else {
            return false;
        };
        self.file_extensions
            .iter()
            .any(|claimed| claimed.trim_start_matches('.').eq_ignore_ascii_case(extension))
    }

    pub fn recognizes(&self, action_kind: &str) -> bool {
        self.action_kinds.iter().any(|kind| kind == action_kind)
    }
}

/// Diagram configurations keyed by kind.
#[derive(Debug, Clone, Default)]
pub struct DiagramConfigurationRegistry {
    configurations: BTreeMap<DiagramKind, DiagramConfiguration>,
}

impl DiagramConfigurationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `configuration`, replacing any previous one of the same kind.
    pub fn register(&mut self, configuration: DiagramConfiguration) -> Option<DiagramConfiguration> {
        self.configurations
            .insert(configuration.kind.clone(), configuration)
    }

    pub fn get(&self, kind: &DiagramKind) -> BridgeResult<&DiagramConfiguration> {
        self.configurations
            .get(kind)
            .ok_or_else(|| BridgeError::UnknownDiagramKind(kind.clone()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &DiagramConfiguration> {
        self.configurations.values()
    }

    pub fn len(&self) -> usize {
        self.configurations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.configurations.is_empty()
    }
}

impl FromIterator<DiagramConfiguration> for DiagramConfigurationRegistry {
    fn from_iter<T: IntoIterator<Item = DiagramConfiguration>>(iter: T) -> Self {
        let mut registry = Self::new();
        for configuration in iter {
            registry.register(configuration);
        }
        registry
    }
}
