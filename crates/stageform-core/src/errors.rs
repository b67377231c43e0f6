/// Failures of the envelope and payload codec.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("malformed transport encoding: {0}")]
    Transport(#[from] base64::DecodeError),

    #[error("invalid payload document: {0}")]
    Document(#[source] serde_json::Error),

    #[error("failed to encode payload: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("missing required field: {0}")]
    MissingField(&'static str),
}

impl CodecError {
    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport_encoding",
            Self::Document(_) => "document",
            Self::Encode(_) => "encode",
            Self::MissingField(_) => "missing_field",
        }
    }
}
