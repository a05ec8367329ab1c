use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{ClientId, ProtocolError, ProtocolResult};

/// A diagram action as it travels over the wire: a `kind` tag plus arbitrary fields.
///
/// The routing layer never looks past the tag, so action kinds contributed by a
/// particular diagram configuration pass through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub kind: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Action {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            fields: Map::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn is_known(&self) -> bool {
        KnownAction::KINDS.contains(&self.kind.as_str())
    }

    /// Decode into a [`KnownAction`]. Returns `Ok(None)` for kinds outside the
    /// built-in set and an error when a known kind carries malformed fields.
    pub fn decode(&self) -> ProtocolResult<Option<KnownAction>> {
        if !self.is_known() {
            return Ok(None);
        }
        let value = serde_json::to_value(self)?;
        serde_json::from_value(value)
            .map(Some)
            .map_err(|source| ProtocolError::MalformedAction {
                kind: self.kind.clone(),
                source,
            })
    }
}

impl TryFrom<&KnownAction> for Action {
    type Error = ProtocolError;

    fn try_from(known: &KnownAction) -> Result<Self, Self::Error> {
        Ok(serde_json::from_value(serde_json::to_value(known)?)?)
    }
}

/// Action kinds the bridge and host understand natively.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum KnownAction {
    RequestModel {
        #[serde(default)]
        options: Map<String, Value>,
    },
    SetModel {
        #[serde(rename = "newRoot")]
        new_root: Value,
    },
    UpdateModel {
        #[serde(rename = "newRoot")]
        new_root: Value,
        #[serde(default)]
        animate: bool,
    },
    Select {
        #[serde(rename = "nodeId", default, skip_serializing_if = "Option::is_none")]
        node_id: Option<String>,
        #[serde(
            rename = "selectedElementsIDs",
            default,
            skip_serializing_if = "Vec::is_empty"
        )]
        selected: Vec<String>,
        #[serde(
            rename = "deselectedElementsIDs",
            default,
            skip_serializing_if = "Vec::is_empty"
        )]
        deselected: Vec<String>,
    },
    SelectAll {
        #[serde(default = "default_true")]
        select: bool,
    },
    ExportSvg {
        svg: String,
    },
    Fit {
        #[serde(rename = "elementIds", default)]
        element_ids: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        padding: Option<f64>,
    },
    Center {
        #[serde(rename = "elementIds", default)]
        element_ids: Vec<String>,
    },
}

fn default_true() -> bool {
    true
}

impl KnownAction {
    pub const KINDS: &'static [&'static str] = &[
        "requestModel",
        "setModel",
        "updateModel",
        "select",
        "selectAll",
        "exportSvg",
        "fit",
        "center",
    ];

    pub fn kind(&self) -> &'static str {
        match self {
            KnownAction::RequestModel { .. } => "requestModel",
            KnownAction::SetModel { .. } => "setModel",
            KnownAction::UpdateModel { .. } => "updateModel",
            KnownAction::Select { .. } => "select",
            KnownAction::SelectAll { .. } => "selectAll",
            KnownAction::ExportSvg { .. } => "exportSvg",
            KnownAction::Fit { .. } => "fit",
            KnownAction::Center { .. } => "center",
        }
    }
}

/// Envelope relayed on `diagram/accept`. `client_id` is the only multiplexing key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionMessage {
    pub client_id: ClientId,
    pub action: Action,
}

impl ActionMessage {
    pub fn new(client_id: ClientId, action: Action) -> Self {
        Self { client_id, action }
    }
}
