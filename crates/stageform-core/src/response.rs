use serde::{Deserialize, Serialize};

pub const STATUS_OK: u16 = 200;
pub const STATUS_INTERNAL_ERROR: u16 = 500;

/// Result value written back to a session's peer.
///
/// Success: `{ status_code: 200, message }`.
/// Error: `{ status_code: 500, message, state_to_access }`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub status_code: u16,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub state_to_access: Option<String>,
}

impl Response {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            status_code: STATUS_OK,
            message: message.into(),
            state_to_access: None,
        }
    }

    /// Error result naming the stage the peer attempted.
    pub fn error(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status_code: STATUS_INTERNAL_ERROR,
            message: message.into(),
            state_to_access: Some(stage.into()),
        }
    }

    pub fn to_value(&self) -> serde_json::Value {
        serde_json::json!(self)
    }
}
