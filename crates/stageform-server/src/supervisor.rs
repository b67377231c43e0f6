//! Admission control and the live-session registry.
//!
//! The capacity check and the registry insert happen under one lock, so
//! racing connections can never push the live count past the ceiling. Each
//! admitted session holds an [`AdmissionPermit`]; dropping it deregisters
//! the session and frees its slot.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use stageform_core::{IntakePipeline, SessionId};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::error::AdmissionError;
use crate::session::{Session, SessionReport};
use crate::shutdown::ShutdownCoordinator;
use crate::transport::{EnvelopeReader, EnvelopeWriter};

/// Registry entry for an admitted session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LiveSession {
    pub id: SessionId,
    pub created_at: DateTime<Utc>,
}

pub struct Supervisor {
    capacity: usize,
    mailbox_capacity: usize,
    live: Mutex<HashMap<SessionId, LiveSession>>,
    shutdown: ShutdownCoordinator,
    pipeline: Arc<dyn IntakePipeline>,
}

impl Supervisor {
    pub fn new(
        capacity: usize,
        mailbox_capacity: usize,
        pipeline: Arc<dyn IntakePipeline>,
    ) -> Arc<Self> {
        Arc::new(Self {
            capacity,
            mailbox_capacity,
            live: Mutex::new(HashMap::new()),
            shutdown: ShutdownCoordinator::new(),
            pipeline,
        })
    }

    pub fn from_config(config: &ServerConfig, pipeline: Arc<dyn IntakePipeline>) -> Arc<Self> {
        Self::new(config.max_sessions, config.mailbox_capacity, pipeline)
    }

    /// Claim a slot for a new session.
    pub fn reserve(self: &Arc<Self>) -> Result<AdmissionPermit, AdmissionError> {
        let mut live = self.live.lock();

        if self.shutdown.is_shutting_down() {
            return Err(AdmissionError::ShuttingDown);
        }
        if live.len() >= self.capacity {
            warn!(live = live.len(), capacity = self.capacity, "admission rejected");
            return Err(AdmissionError::Rejected {
                capacity: self.capacity,
            });
        }

        let entry = LiveSession {
            id: SessionId::new(),
            created_at: Utc::now(),
        };
        let _ = live.insert(entry.id.clone(), entry.clone());
        info!(
            session_id = %entry.id,
            live = live.len(),
            capacity = self.capacity,
            "session admitted"
        );

        Ok(AdmissionPermit {
            entry,
            supervisor: Arc::clone(self),
        })
    }

    /// Reserve a slot and start a session over the given transport halves.
    pub fn on_connect<R, W>(
        self: &Arc<Self>,
        reader: R,
        writer: W,
    ) -> Result<JoinHandle<SessionReport>, AdmissionError>
    where
        R: EnvelopeReader,
        W: EnvelopeWriter,
    {
        Ok(self.reserve()?.start(reader, writer))
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn live_count(&self) -> usize {
        self.live.lock().len()
    }

    /// Snapshot of live sessions, ordered by id (and so by admission time).
    pub fn live_sessions(&self) -> Vec<LiveSession> {
        let mut sessions: Vec<LiveSession> = self.live.lock().values().cloned().collect();
        sessions.sort_by(|a, b| a.id.cmp(&b.id));
        sessions
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_shutting_down()
    }

    /// Stop admitting, cancel every session and wait for them to drain.
    ///
    /// Returns `false` if the timeout elapsed first.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        {
            let _live = self.live.lock();
            self.shutdown.shutdown();
        }
        let drained = self.shutdown.graceful_shutdown(Some(timeout)).await;
        info!(drained, remaining = self.live_count(), "supervisor stopped");
        drained
    }

    fn release(&self, id: &SessionId) {
        let mut live = self.live.lock();
        if live.remove(id).is_some() {
            debug!(session_id = %id, live = live.len(), "session deregistered");
        }
    }
}

/// A reserved slot. Holds its registry entry until dropped.
pub struct AdmissionPermit {
    entry: LiveSession,
    supervisor: Arc<Supervisor>,
}

impl AdmissionPermit {
    pub fn id(&self) -> &SessionId {
        &self.entry.id
    }

    /// Spawn the session worker. The slot is released when the worker ends.
    pub fn start<R, W>(self, reader: R, writer: W) -> JoinHandle<SessionReport>
    where
        R: EnvelopeReader,
        W: EnvelopeWriter,
    {
        let supervisor = Arc::clone(&self.supervisor);
        let session = Session::new(self.entry.id.clone(), writer, Arc::clone(&supervisor.pipeline))
            .with_created_at(self.entry.created_at);
        let cancel = supervisor.shutdown.token();
        let mailbox_capacity = supervisor.mailbox_capacity;

        supervisor.shutdown.spawn(async move {
            let permit = self;
            let report = session.run(reader, cancel, mailbox_capacity).await;
            drop(permit);
            report
        })
    }
}

impl std::fmt::Debug for AdmissionPermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionPermit")
            .field("id", &self.entry.id)
            .field("created_at", &self.entry.created_at)
            .finish_non_exhaustive()
    }
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        self.supervisor.release(&self.entry.id);
    }
}
