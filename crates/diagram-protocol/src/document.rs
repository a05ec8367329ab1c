use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ProtocolError;

const SCHEME_SEPARATOR: &str = "://";

/// Identifier of a source document, `scheme://authority/path`.
///
/// The raw string is kept verbatim so that references round-trip through the
/// language server unchanged. Only the `scheme://` prefix is validated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DocumentRef {
    uri: String,
}

impl DocumentRef {
    pub fn parse(raw: impl Into<String>) -> Result<Self, ProtocolError> {
        let uri = raw.into();
        match uri.find(SCHEME_SEPARATOR) {
            Some(end) if end > 0 && is_scheme(&uri[..end]) => Ok(Self { uri }),
            _ => Err(ProtocolError::InvalidDocumentRef(uri)),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.uri
    }

    pub fn scheme(&self) -> &str {
        &self.uri[..self.scheme_end()]
    }

    pub fn authority(&self) -> &str {
        let rest = self.rest();
        rest.find('/').map_or(rest, |idx| &rest[..idx])
    }

    /// Everything after the authority, starting at the first `/`. Empty when
    /// the reference has no path component (`doc://a`).
    pub fn path(&self) -> &str {
        let rest = self.rest();
        rest.find('/').map_or("", |idx| &rest[idx..])
    }

    /// Last path segment, falling back to the authority for path-less references.
    pub fn base_name(&self) -> &str {
        self.path()
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .filter(|segment| !segment.is_empty())
            .unwrap_or_else(|| self.authority())
    }

    /// Extension of [`base_name`](Self::base_name) including the leading dot.
    pub fn extension(&self) -> Option<&str> {
        let name = self.base_name();
        match name.rfind('.') {
            Some(idx) if idx > 0 => Some(&name[idx..]),
            _ => None,
        }
    }

    fn scheme_end(&self) -> usize {
        // parse() guarantees the separator exists.
        self.uri.find(SCHEME_SEPARATOR).unwrap_or(0)
    }

    fn rest(&self) -> &str {
        &self.uri[self.scheme_end() + SCHEME_SEPARATOR.len()..]
    }
}

fn is_scheme(candidate: &str) -> bool {
    let mut chars = candidate.chars();
    matches!(chars.next(), Some(first) if first.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

impl FromStr for DocumentRef {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for DocumentRef {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<DocumentRef> for String {
    fn from(value: DocumentRef) -> Self {
        value.uri
    }
}

impl fmt::Display for DocumentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.uri)
    }
}

/// Tag selecting a diagram configuration (layout, message schema, icon).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DiagramKind(String);

impl DiagramKind {
    pub fn new(kind: impl Into<String>) -> Self {
        Self(kind.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DiagramKind {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for DiagramKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Routing address of one diagram session on the shared connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ClientId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ClientId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_timeout::timeout]
    fn parses_file_uri_components() {
        let doc = DocumentRef::parse("file:///work/models/ietf-interfaces.yang").unwrap();
        assert_eq!(doc.scheme(), "file");
        assert_eq!(doc.authority(), "");
        assert_eq!(doc.path(), "/work/models/ietf-interfaces.yang");
        assert_eq!(doc.base_name(), "ietf-interfaces.yang");
        assert_eq!(doc.extension(), Some(".yang"));
    }

    #[test_timeout::timeout]
    fn pathless_reference_uses_authority_as_base_name() {
        let doc: DocumentRef = "doc://a".parse().unwrap();
        assert_eq!(doc.scheme(), "doc");
        assert_eq!(doc.path(), "");
        assert_eq!(doc.base_name(), "a");
        assert_eq!(doc.extension(), None);
    }

    #[test_timeout::timeout]
    fn rejects_references_without_scheme() {
        for raw in ["", "/tmp/a.yang", "://a", "1x://a", "no scheme://x"] {
            assert!(
                matches!(DocumentRef::parse(raw), Err(ProtocolError::InvalidDocumentRef(_))),
                "{raw} should be rejected"
            );
        }
    }

    #[test_timeout::timeout]
    fn serializes_as_plain_string() {
        let doc = DocumentRef::parse("doc://a/b.yang").unwrap();
        let json = serde_json::to_value(&doc).unwrap();
        assert_eq!(json, serde_json::json!("doc://a/b.yang"));
        let back: DocumentRef = serde_json::from_value(json).unwrap();
        assert_eq!(back, doc);
        assert!(serde_json::from_value::<DocumentRef>(serde_json::json!("nope")).is_err());
    }
}
