//! WebSocket transport over an upgraded axum socket.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use stageform_core::Envelope;
use tracing::trace;

use super::{EnvelopeReader, EnvelopeWriter};
use crate::error::TransportError;

pub struct WsReader {
    stream: SplitStream<WebSocket>,
}

pub struct WsWriter {
    sink: SplitSink<WebSocket, Message>,
}

/// Split an upgraded socket into its read and write halves.
pub fn split_websocket(socket: WebSocket) -> (WsReader, WsWriter) {
    let (sink, stream) = socket.split();
    (WsReader { stream }, WsWriter { sink })
}

#[async_trait]
impl EnvelopeReader for WsReader {
    async fn read_one(&mut self) -> Result<Envelope, TransportError> {
        loop {
            let msg = match self.stream.next().await {
                None => return Err(TransportError::Closed),
                Some(Err(e)) => return Err(TransportError::Read(e.to_string())),
                Some(Ok(msg)) => msg,
            };

            // Binary frames carrying UTF-8 JSON are treated like text frames.
            match msg {
                Message::Text(text) => return Ok(Envelope::parse(text.as_str())?),
                Message::Binary(data) => {
                    let text = std::str::from_utf8(&data).map_err(|e| {
                        TransportError::Read(format!("non-UTF8 binary frame: {e}"))
                    })?;
                    return Ok(Envelope::parse(text)?);
                }
                Message::Close(_) => return Err(TransportError::Closed),
                Message::Ping(_) | Message::Pong(_) => {
                    trace!("control frame");
                }
            }
        }
    }
}

#[async_trait]
impl EnvelopeWriter for WsWriter {
    async fn write_one(&mut self, value: &Value) -> Result<(), TransportError> {
        let json = serde_json::to_string(value)
            .map_err(|e| TransportError::Write(format!("serialize: {e}")))?;
        self.sink
            .send(Message::Text(json.into()))
            .await
            .map_err(|e| TransportError::Write(e.to_string()))
    }

    async fn close(&mut self) {
        let _ = self.sink.close().await;
    }
}
