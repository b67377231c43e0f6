use stageform_core::{CodecError, Stage};

/// Admission failures, surfaced before any session exists.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum AdmissionError {
    #[error("stage cannot be created at this time: {capacity} sessions already live")]
    Rejected { capacity: usize },

    #[error("server is shutting down")]
    ShuttingDown,
}

/// Transport failures. Read-side variants end the session; `Write` aborts one envelope.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport closed")]
    Closed,

    #[error("transport read failed: {0}")]
    Read(String),

    #[error("transport write failed: {0}")]
    Write(String),

    #[error("malformed envelope: {0}")]
    Malformed(#[from] CodecError),
}

impl TransportError {
    pub fn is_clean_close(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

/// Per-envelope failures. None of these end the session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("stage not accessible at this time")]
    StageGuardRejected { attempted: String, current: Stage },

    #[error("unable to decode payload: {0}")]
    Decode(#[from] CodecError),

    #[error(transparent)]
    Write(TransportError),
}

impl SessionError {
    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::StageGuardRejected { .. } => "stage_guard_rejected",
            Self::Decode(_) => "decode",
            Self::Write(_) => "transport_write",
        }
    }
}
