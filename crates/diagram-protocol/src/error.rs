use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid document reference `{0}`: expected `scheme://path`")]
    InvalidDocumentRef(String),
    #[error("malformed `{kind}` action: {source}")]
    MalformedAction {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to decode message: {0}")]
    Decode(#[from] serde_json::Error),
}

pub type ProtocolResult<T> = Result<T, ProtocolError>;
