//! In-process transport backed by channels.
//!
//! The peer half plays the remote client: it pushes envelopes (or read
//! failures) in and receives whatever the session writes back.

use async_trait::async_trait;
use serde_json::Value;
use stageform_core::Envelope;
use tokio::sync::mpsc;

use super::{EnvelopeReader, EnvelopeWriter};
use crate::error::TransportError;

pub struct MemoryReader {
    rx: mpsc::Receiver<Result<Envelope, TransportError>>,
}

pub struct MemoryWriter {
    tx: mpsc::UnboundedSender<Value>,
}

/// Remote end of a memory transport.
pub struct MemoryPeer {
    inbound: mpsc::Sender<Result<Envelope, TransportError>>,
    outbound: mpsc::UnboundedReceiver<Value>,
}

/// Create a connected reader/writer/peer triple.
pub fn pair(capacity: usize) -> (MemoryReader, MemoryWriter, MemoryPeer) {
    let (in_tx, in_rx) = mpsc::channel(capacity);
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    (
        MemoryReader { rx: in_rx },
        MemoryWriter { tx: out_tx },
        MemoryPeer {
            inbound: in_tx,
            outbound: out_rx,
        },
    )
}

impl MemoryPeer {
    /// Deliver an envelope. Returns `false` once the session stopped reading.
    pub async fn send(&self, envelope: Envelope) -> bool {
        self.inbound.send(Ok(envelope)).await.is_ok()
    }

    /// Make the session's next read fail.
    pub async fn fail(&self, error: TransportError) -> bool {
        self.inbound.send(Err(error)).await.is_ok()
    }

    /// Next value the session wrote, or `None` once the writer is gone.
    pub async fn recv(&mut self) -> Option<Value> {
        self.outbound.recv().await
    }

    /// Split into the raw inbound sender and outbound receiver.
    pub fn into_parts(
        self,
    ) -> (
        mpsc::Sender<Result<Envelope, TransportError>>,
        mpsc::UnboundedReceiver<Value>,
    ) {
        (self.inbound, self.outbound)
    }
}

#[async_trait]
impl EnvelopeReader for MemoryReader {
    async fn read_one(&mut self) -> Result<Envelope, TransportError> {
        match self.rx.recv().await {
            Some(result) => result,
            None => Err(TransportError::Closed),
        }
    }
}

#[async_trait]
impl EnvelopeWriter for MemoryWriter {
    async fn write_one(&mut self, value: &Value) -> Result<(), TransportError> {
        self.tx
            .send(value.clone())
            .map_err(|_| TransportError::Write("peer dropped".into()))
    }
}
