//! Per-connection session worker.
//!
//! A session owns its stage, its accumulator and the transport writer. The
//! read loop only parses envelopes and queues them in a bounded mailbox; a
//! single consumer applies [`Session::handle`] to each one in arrival order,
//! so handling within a session never overlaps.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use stageform_core::{Envelope, EnvelopeKind, IntakePipeline, Response, SessionId, Stage};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn, Instrument};

use crate::error::SessionError;
use crate::transport::{EnvelopeReader, EnvelopeWriter};

const GUARD_MESSAGE: &str = "stage not accessible at this time";
const CONFIRMATION_MESSAGE: &str = "confirmation accepted";
const UNSUPPORTED_MESSAGE: &str = "command not supported yet";

/// Why a session's read loop stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadEnd {
    /// Peer closed the transport.
    Closed,
    /// Read or parse failure.
    Failed,
    /// Shutdown was requested.
    Cancelled,
    /// Mailbox consumer exited early.
    ConsumerGone,
}

/// Final state of a session after its worker finished.
#[derive(Clone, Debug)]
pub struct SessionReport {
    pub id: SessionId,
    pub stage: Stage,
    pub entries: usize,
    pub end: ReadEnd,
}

pub struct Session<W> {
    id: SessionId,
    created_at: DateTime<Utc>,
    stage: Stage,
    accumulator: Vec<String>,
    writer: W,
    pipeline: Arc<dyn IntakePipeline>,
}

impl<W: EnvelopeWriter> Session<W> {
    pub fn new(id: SessionId, writer: W, pipeline: Arc<dyn IntakePipeline>) -> Self {
        Self {
            id,
            created_at: Utc::now(),
            stage: Stage::default(),
            accumulator: Vec::new(),
            writer,
            pipeline,
        }
    }

    /// Override the creation timestamp, e.g. with the admission time.
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Payload renderings in receipt order.
    pub fn accumulator(&self) -> &[String] {
        &self.accumulator
    }

    /// Process one envelope and return the stage afterwards.
    ///
    /// Every outcome writes exactly one value to the peer. On error the stage
    /// and accumulator are left untouched.
    pub async fn handle(&mut self, envelope: Envelope) -> Result<Stage, SessionError> {
        let kind = envelope.kind();

        if kind.admits(self.stage) == Some(false) {
            debug!(tag = %envelope.tag, stage = %self.stage, "stage guard rejected envelope");
            self.write(&Response::error(kind.tag(), GUARD_MESSAGE).to_value())
                .await?;
            return Err(SessionError::StageGuardRejected {
                attempted: envelope.tag,
                current: self.stage,
            });
        }

        match kind {
            EnvelopeKind::Intake => self.intake(&envelope.data).await?,
            EnvelopeKind::Confirmation => {
                self.write(&Response::success(CONFIRMATION_MESSAGE).to_value())
                    .await?;
                self.advance();
            }
            EnvelopeKind::Content => {
                let entries = Value::from(self.accumulator.clone());
                self.write(&entries).await?;
            }
            EnvelopeKind::Unsupported(tag) => {
                debug!(%tag, "unsupported envelope type");
                self.write(&Response::success(UNSUPPORTED_MESSAGE).to_value())
                    .await?;
            }
        }

        Ok(self.stage)
    }

    async fn intake(&mut self, data: &Value) -> Result<(), SessionError> {
        let outcome = match self.pipeline.run(data) {
            Ok(outcome) => outcome,
            Err(codec) => {
                let err = SessionError::Decode(codec);
                warn!(error = %err, "intake payload rejected");
                self.write(&Response::error(EnvelopeKind::INTAKE, err.to_string()).to_value())
                    .await?;
                return Err(err);
            }
        };

        self.write(&outcome.result).await?;
        self.accumulator.push(outcome.rendered);
        self.advance();
        Ok(())
    }

    fn advance(&mut self) {
        let from = self.stage;
        self.stage = from.next();
        info!(%from, to = %self.stage, "stage advanced");
    }

    async fn write(&mut self, value: &Value) -> Result<(), SessionError> {
        self.writer
            .write_one(value)
            .await
            .map_err(SessionError::Write)
    }

    /// Drive the session until the transport ends or `cancel` fires.
    ///
    /// Envelopes already queued when the read loop stops are still handled,
    /// unless `cancel` fired and a write is stuck on an unresponsive peer.
    #[instrument(skip_all, fields(session_id = %self.id))]
    pub async fn run<R: EnvelopeReader>(
        self,
        mut reader: R,
        cancel: CancellationToken,
        mailbox_capacity: usize,
    ) -> SessionReport {
        let (tx, rx) = mpsc::channel(mailbox_capacity.max(1));
        let id = self.id.clone();
        let created_at = self.created_at;

        let consumer = tokio::spawn(self.consume(rx, cancel.clone()).in_current_span());
        let end = read_loop(&mut reader, tx, &cancel).await;
        debug!(?end, "read loop finished");

        let lifetime_ms = (Utc::now() - created_at).num_milliseconds();
        match consumer.await {
            Ok((stage, entries)) => {
                info!(%stage, entries, ?end, lifetime_ms, "session finished");
                SessionReport {
                    id,
                    stage,
                    entries,
                    end,
                }
            }
            Err(e) => {
                warn!(error = %e, lifetime_ms, "mailbox consumer panicked");
                SessionReport {
                    id,
                    stage: Stage::default(),
                    entries: 0,
                    end,
                }
            }
        }
    }

    async fn consume(
        mut self,
        mut mailbox: mpsc::Receiver<Envelope>,
        cancel: CancellationToken,
    ) -> (Stage, usize) {
        while let Some(envelope) = mailbox.recv().await {
            // State only changes after a write succeeds, so dropping a
            // pending `handle` leaves the session consistent.
            let outcome = tokio::select! {
                biased;
                outcome = self.handle(envelope) => outcome,
                () = cancel.cancelled() => {
                    warn!("write abandoned on shutdown");
                    break;
                }
            };
            if let Err(err) = outcome {
                debug!(kind = err.error_kind(), error = %err, "envelope aborted");
            }
        }

        tokio::select! {
            biased;
            () = self.writer.close() => {}
            () = cancel.cancelled() => debug!("close abandoned on shutdown"),
        }
        (self.stage, self.accumulator.len())
    }
}

async fn read_loop<R: EnvelopeReader>(
    reader: &mut R,
    mailbox: mpsc::Sender<Envelope>,
    cancel: &CancellationToken,
) -> ReadEnd {
    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => return ReadEnd::Cancelled,
            next = reader.read_one() => next,
        };

        match next {
            Ok(envelope) => {
                let sent = tokio::select! {
                    biased;
                    () = cancel.cancelled() => return ReadEnd::Cancelled,
                    sent = mailbox.send(envelope) => sent,
                };
                if sent.is_err() {
                    return ReadEnd::ConsumerGone;
                }
            }
            Err(e) if e.is_clean_close() => return ReadEnd::Closed,
            Err(e) => {
                warn!(error = %e, "read failed, ending session");
                return ReadEnd::Failed;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::json;
    use stageform_core::{render_payload, ProfileTransform};
    use tokio::sync::mpsc::error::TryRecvError;

    use super::*;
    use crate::error::TransportError;
    use crate::transport::memory::{self, MemoryPeer, MemoryReader, MemoryWriter};

    fn session() -> (Session<MemoryWriter>, MemoryReader, MemoryPeer) {
        let (reader, writer, peer) = memory::pair(8);
        let session = Session::new(SessionId::new(), writer, Arc::new(ProfileTransform));
        (session, reader, peer)
    }

    /// Writer whose peer never drains: every write hangs.
    struct StalledWriter;

    #[async_trait]
    impl EnvelopeWriter for StalledWriter {
        async fn write_one(&mut self, _value: &Value) -> Result<(), TransportError> {
            std::future::pending().await
        }
    }

    fn ada() -> Value {
        json!({
            "first_name": "Ada",
            "last_name": "Lovelace",
            "age": 28,
            "address": {"street": "1 Main", "city": "London", "state": "LDN", "zip_code": 11111},
            "hobbies": ["math", "engines"]
        })
    }

    fn grace() -> Value {
        json!({
            "first_name": "Grace",
            "last_name": "Hopper",
            "age": 85,
            "address": {"street": "2 Navy", "city": "Arlington", "state": "VA", "zip_code": 22201},
            "hobbies": []
        })
    }

    #[tokio::test]
    async fn new_session_starts_at_intake() {
        let (s, _reader, _peer) = session();
        assert_eq!(s.stage(), Stage::Intake);
        assert!(s.accumulator().is_empty());
        assert!(s.id().as_str().starts_with("sess_"));
    }

    #[tokio::test]
    async fn intake_writes_result_and_advances() {
        let (mut s, _reader, mut peer) = session();
        let stage = s.handle(Envelope::new("intake", ada())).await.unwrap();

        assert_eq!(stage, Stage::Confirmation);
        assert_eq!(
            peer.recv().await.unwrap(),
            json!({
                "full_name": "Ada Lovelace",
                "age": 28,
                "full_address": "1 Main London, LDN - 11111",
                "hobbies": ["math", "engines"],
                "number_of_hobbies": 2
            })
        );

        let decoded: stageform_core::transform::ProfileInput =
            serde_json::from_value(ada()).unwrap();
        assert_eq!(s.accumulator(), [render_payload(&decoded).unwrap()]);
    }

    #[tokio::test]
    async fn intake_accepts_pre_encoded_text() {
        let (mut s, _reader, mut peer) = session();
        let text = stageform_core::encode_payload(&ada()).unwrap();
        s.handle(Envelope::new("intake", Value::String(text)))
            .await
            .unwrap();
        assert_eq!(peer.recv().await.unwrap()["full_name"], "Ada Lovelace");
        assert_eq!(s.stage(), Stage::Confirmation);
    }

    #[tokio::test]
    async fn wrong_stage_is_rejected_without_mutation() {
        let (mut s, _reader, mut peer) = session();
        let err = s
            .handle(Envelope::new("confirmation", json!({})))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            SessionError::StageGuardRejected { ref attempted, current: Stage::Intake }
                if attempted == "confirmation"
        ));
        assert_eq!(
            peer.recv().await.unwrap(),
            json!({
                "status_code": 500,
                "message": "stage not accessible at this time",
                "state_to_access": "confirmation"
            })
        );
        assert_eq!(s.stage(), Stage::Intake);
    }

    #[tokio::test]
    async fn content_before_intake_is_rejected() {
        let (mut s, _reader, mut peer) = session();
        let err = s.handle(Envelope::new("content", json!({}))).await.unwrap_err();
        assert_eq!(err.error_kind(), "stage_guard_rejected");
        assert_eq!(peer.recv().await.unwrap()["state_to_access"], "content");
        assert!(s.accumulator().is_empty());
    }

    #[tokio::test]
    async fn content_after_intake_returns_accumulator() {
        let (mut s, _reader, mut peer) = session();
        s.handle(Envelope::new("intake", ada())).await.unwrap();
        let _ = peer.recv().await;

        let stage = s.handle(Envelope::new("content", json!({}))).await.unwrap();
        assert_eq!(stage, Stage::Confirmation);

        let entries = peer.recv().await.unwrap();
        let entries = entries.as_array().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0], Value::String(s.accumulator()[0].clone()));
    }

    #[tokio::test]
    async fn full_progression_reaches_terminal() {
        let (mut s, _reader, mut peer) = session();
        s.handle(Envelope::new("intake", ada())).await.unwrap();
        let _ = peer.recv().await;

        let stage = s
            .handle(Envelope::new("confirmation", json!({})))
            .await
            .unwrap();
        assert_eq!(stage, Stage::Terminal);
        assert_eq!(
            peer.recv().await.unwrap(),
            json!({"status_code": 200, "message": "confirmation accepted"})
        );

        // Terminal still serves the side channel.
        s.handle(Envelope::new("content", json!({}))).await.unwrap();
        assert_eq!(peer.recv().await.unwrap().as_array().unwrap().len(), 1);

        // Nothing re-enters earlier stages.
        assert!(s.handle(Envelope::new("intake", ada())).await.is_err());
        assert!(s.handle(Envelope::new("confirmation", json!({}))).await.is_err());
        assert_eq!(s.stage(), Stage::Terminal);
    }

    #[tokio::test]
    async fn duplicate_intake_accepts_exactly_one() {
        let (mut s, _reader, mut peer) = session();
        let first = s.handle(Envelope::new("intake", ada())).await;
        let second = s.handle(Envelope::new("intake", grace())).await;

        assert!(first.is_ok());
        assert!(matches!(second, Err(SessionError::StageGuardRejected { .. })));
        assert_eq!(s.accumulator().len(), 1);
        assert_eq!(peer.recv().await.unwrap()["full_name"], "Ada Lovelace");
        assert_eq!(peer.recv().await.unwrap()["status_code"], 500);
    }

    #[tokio::test]
    async fn unsupported_tag_is_acknowledged() {
        let (mut s, _reader, mut peer) = session();
        let stage = s.handle(Envelope::new("sad", json!(1))).await.unwrap();
        assert_eq!(stage, Stage::Intake);
        assert_eq!(
            peer.recv().await.unwrap(),
            json!({"status_code": 200, "message": "command not supported yet"})
        );
    }

    #[tokio::test]
    async fn undecodable_intake_reports_and_keeps_stage() {
        let (mut s, _reader, mut peer) = session();
        let err = s
            .handle(Envelope::new("intake", Value::String("%%% not base64".into())))
            .await
            .unwrap_err();

        assert_eq!(err.error_kind(), "decode");
        let reply = peer.recv().await.unwrap();
        assert_eq!(reply["status_code"], 500);
        assert_eq!(reply["state_to_access"], "intake");
        assert!(reply["message"]
            .as_str()
            .unwrap()
            .starts_with("unable to decode payload"));
        assert_eq!(s.stage(), Stage::Intake);
        assert!(s.accumulator().is_empty());
    }

    #[tokio::test]
    async fn schema_mismatch_keeps_stage() {
        let (mut s, _reader, _peer) = session();
        let result = s
            .handle(Envelope::new("intake", json!({"first_name": "Ada"})))
            .await;
        assert!(matches!(result, Err(SessionError::Decode(_))));
        assert_eq!(s.stage(), Stage::Intake);
    }

    #[tokio::test]
    async fn write_failure_mutates_nothing() {
        let (mut s, _reader, peer) = session();
        let (_inbound, outbound) = peer.into_parts();
        drop(outbound);

        let err = s.handle(Envelope::new("intake", ada())).await.unwrap_err();
        assert_eq!(err.error_kind(), "transport_write");
        assert_eq!(s.stage(), Stage::Intake);
        assert!(s.accumulator().is_empty());
    }

    #[tokio::test]
    async fn run_handles_in_order_and_ends_on_close() {
        let (s, reader, peer) = session();
        let (inbound, mut outbound) = peer.into_parts();

        inbound.send(Ok(Envelope::new("intake", ada()))).await.unwrap();
        inbound
            .send(Ok(Envelope::new("confirmation", json!({}))))
            .await
            .unwrap();
        inbound
            .send(Ok(Envelope::new("content", json!({}))))
            .await
            .unwrap();
        drop(inbound);

        let report = s.run(reader, CancellationToken::new(), 4).await;
        assert_eq!(report.end, ReadEnd::Closed);
        assert_eq!(report.stage, Stage::Terminal);
        assert_eq!(report.entries, 1);

        assert_eq!(outbound.recv().await.unwrap()["full_name"], "Ada Lovelace");
        assert_eq!(outbound.recv().await.unwrap()["status_code"], 200);
        assert!(outbound.recv().await.unwrap().is_array());
        assert!(matches!(outbound.try_recv(), Err(TryRecvError::Disconnected)));
    }

    #[tokio::test]
    async fn run_ends_on_read_failure() {
        let (s, reader, peer) = session();
        let (inbound, _outbound) = peer.into_parts();
        inbound
            .send(Err(TransportError::Read("connection reset".into())))
            .await
            .unwrap();
        inbound.send(Ok(Envelope::new("intake", ada()))).await.unwrap();

        let report = s.run(reader, CancellationToken::new(), 4).await;
        assert_eq!(report.end, ReadEnd::Failed);
        assert_eq!(report.stage, Stage::Intake);
    }

    #[tokio::test]
    async fn run_stops_when_cancelled() {
        let (s, reader, _peer) = session();
        let cancel = CancellationToken::new();
        let worker = tokio::spawn(s.run(reader, cancel.clone(), 4));

        cancel.cancel();
        let report = worker.await.unwrap();
        assert_eq!(report.end, ReadEnd::Cancelled);
    }

    #[tokio::test]
    async fn run_serializes_duplicate_intakes_through_small_mailbox() {
        let (s, reader, peer) = session();
        let (inbound, mut outbound) = peer.into_parts();

        for payload in [ada(), grace(), ada()] {
            inbound.send(Ok(Envelope::new("intake", payload))).await.unwrap();
        }
        inbound
            .send(Ok(Envelope::new("confirmation", json!({}))))
            .await
            .unwrap();
        drop(inbound);

        let report = s.run(reader, CancellationToken::new(), 1).await;
        assert_eq!(report.end, ReadEnd::Closed);
        assert_eq!(report.stage, Stage::Terminal);
        assert_eq!(report.entries, 1);

        assert_eq!(outbound.recv().await.unwrap()["full_name"], "Ada Lovelace");
        for _ in 0..2 {
            let rejected = outbound.recv().await.unwrap();
            assert_eq!(rejected["status_code"], 500);
            assert_eq!(rejected["state_to_access"], "intake");
        }
        assert_eq!(
            outbound.recv().await.unwrap(),
            json!({"status_code": 200, "message": "confirmation accepted"})
        );
        assert!(matches!(outbound.try_recv(), Err(TryRecvError::Disconnected)));
    }

    #[tokio::test]
    async fn cancel_ends_session_with_stalled_writer() {
        let (reader, _writer, peer) = memory::pair(8);
        let s = Session::new(SessionId::new(), StalledWriter, Arc::new(ProfileTransform));
        for _ in 0..3 {
            assert!(peer.send(Envelope::new("intake", ada())).await);
        }

        let cancel = CancellationToken::new();
        let worker = tokio::spawn(s.run(reader, cancel.clone(), 1));
        // Consumer stuck writing, mailbox full, read loop waiting to queue.
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();

        let report = tokio::time::timeout(Duration::from_secs(5), worker)
            .await
            .expect("session did not stop after cancel")
            .unwrap();
        assert_eq!(report.end, ReadEnd::Cancelled);
        assert_eq!(report.stage, Stage::Intake);
        assert_eq!(report.entries, 0);
    }
}
