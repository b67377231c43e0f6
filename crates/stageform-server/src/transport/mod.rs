//! Duplex, message-framed transports a session reads envelopes from and
//! writes results to.
//!
//! A transport is split into a reader (owned by the session's read loop) and a
//! writer (owned by the session's mailbox consumer).

pub mod memory;
pub mod ws;

use async_trait::async_trait;
use serde_json::Value;
use stageform_core::Envelope;

use crate::error::TransportError;

pub use ws::{split_websocket, WsReader, WsWriter};

#[async_trait]
pub trait EnvelopeReader: Send + 'static {
    /// Block until the next complete envelope arrives.
    ///
    /// A clean close is reported as [`TransportError::Closed`].
    async fn read_one(&mut self) -> Result<Envelope, TransportError>;
}

#[async_trait]
pub trait EnvelopeWriter: Send + 'static {
    async fn write_one(&mut self, value: &Value) -> Result<(), TransportError>;

    /// Best-effort close once the session is done writing.
    async fn close(&mut self) {}
}
