//! Speech worker handle

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};

use super::lease::WorkerLease;
use super::state::WorkerState;
use crate::pool::PoolEvent;
use crate::reliability::{with_deadline, Failure};
use crate::transport::{EndpointLauncher, SpeechEndpoint, TransportError, HANDSHAKE_REPLY};

/// Pool-unique worker identifier, assigned in creation order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkerId(pub u64);

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

/// Worker errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkerError {
    /// The round trip did not complete
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The host answered the handshake with the wrong value
    #[error("handshake failed: expected {expected:?}, got {actual:?}")]
    HandshakeMismatch { expected: String, actual: String },

    /// The operation is not valid in the worker's current state
    #[error("{id} is {actual}, expected {expected}")]
    InvalidState {
        id: WorkerId,
        actual: WorkerState,
        expected: WorkerState,
    },
}

impl WorkerError {
    /// Transport failures may go away on retry; the rest will not
    pub fn classify(self) -> Failure<Self> {
        match self {
            Self::Transport(_) => Failure::Transient(self),
            Self::HandshakeMismatch { .. } | Self::InvalidState { .. } => Failure::Fatal(self),
        }
    }
}

/// Point-in-time view of a worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerSnapshot {
    pub id: WorkerId,
    pub port: u16,
    pub state: WorkerState,
    pub created_at: DateTime<Utc>,
    /// Successful syntheses so far
    pub completed: u64,
}

/// Handle to one remote speech-synthesis endpoint
///
/// The worker exclusively owns its endpoint. State changes happen under a
/// short lock that is never held across an await, so a worker can be
/// inspected while a synthesis is in flight.
pub struct SpeechWorker {
    id: WorkerId,
    port: u16,
    created_at: DateTime<Utc>,
    state: Mutex<WorkerState>,
    endpoint: Mutex<Option<Arc<dyn SpeechEndpoint>>>,
    completed: AtomicU64,
    request_timeout: Option<Duration>,
    events: Option<broadcast::Sender<PoolEvent>>,
}

impl SpeechWorker {
    /// Create a worker that will bind its host to `port`
    pub fn new(id: WorkerId, port: u16) -> Self {
        Self {
            id,
            port,
            created_at: Utc::now(),
            state: Mutex::new(WorkerState::Created),
            endpoint: Mutex::new(None),
            completed: AtomicU64::new(0),
            request_timeout: None,
            events: None,
        }
    }

    /// Bound each synthesis round trip
    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Publish state changes on a pool event channel
    pub fn with_events(mut self, events: broadcast::Sender<PoolEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Current lifecycle state
    pub fn state(&self) -> WorkerState {
        *self.state.lock()
    }

    /// Number of successful syntheses
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> WorkerSnapshot {
        WorkerSnapshot {
            id: self.id,
            port: self.port,
            state: self.state(),
            created_at: self.created_at,
            completed: self.completed(),
        }
    }

    /// Launch the endpoint and run the handshake
    ///
    /// Moves `Created → Initializing → Ready`. The worker is `Ready` only if
    /// the host answered exactly [`HANDSHAKE_REPLY`]. On any failure the
    /// worker is disposed before the error is returned.
    #[instrument(skip(self, launcher), fields(worker_id = %self.id, port = self.port))]
    pub async fn initialize(
        &self,
        launcher: &dyn EndpointLauncher,
        handshake_timeout: Option<Duration>,
    ) -> Result<(), WorkerError> {
        let result = self.try_initialize(launcher, handshake_timeout).await;
        if let Err(e) = &result {
            debug!(error = %e, "Initialization failed");
            self.dispose().await;
        }
        result
    }

    async fn try_initialize(
        &self,
        launcher: &dyn EndpointLauncher,
        handshake_timeout: Option<Duration>,
    ) -> Result<(), WorkerError> {
        self.transition(WorkerState::Created, WorkerState::Initializing)?;

        let endpoint = launcher.launch(self.port).await?;
        *self.endpoint.lock() = Some(Arc::clone(&endpoint));

        let reply = with_deadline(handshake_timeout, endpoint.hello())
            .await
            .map_err(TransportError::from)??;

        if reply != HANDSHAKE_REPLY {
            return Err(WorkerError::HandshakeMismatch {
                expected: HANDSHAKE_REPLY.to_string(),
                actual: reply,
            });
        }

        self.transition(WorkerState::Initializing, WorkerState::Ready)?;
        info!("Worker ready");
        Ok(())
    }

    /// Claim the worker for one caller (`Ready → Busy`)
    ///
    /// Returns None if the worker is not `Ready`.
    pub fn try_acquire(self: &Arc<Self>) -> Option<WorkerLease> {
        {
            let mut state = self.state.lock();
            if !state.is_available() {
                return None;
            }
            *state = WorkerState::Busy;
        }
        self.publish(WorkerState::Busy);
        Some(WorkerLease::new(Arc::clone(self)))
    }

    /// `Busy → Ready`; a closed worker stays closed
    pub(crate) fn release(&self) {
        let released = {
            let mut state = self.state.lock();
            if *state == WorkerState::Busy {
                *state = WorkerState::Ready;
                true
            } else {
                false
            }
        };
        if released {
            self.publish(WorkerState::Ready);
        }
    }

    /// Synthesis round trip; callers reach this only through a lease
    pub(crate) async fn speak(&self, markup: &str) -> Result<Vec<u8>, WorkerError> {
        let state = self.state();
        if state != WorkerState::Busy {
            return Err(WorkerError::InvalidState {
                id: self.id,
                actual: state,
                expected: WorkerState::Busy,
            });
        }

        let endpoint = self.endpoint.lock().clone().ok_or(TransportError::Closed)?;
        let audio = with_deadline(self.request_timeout, endpoint.speak_ssml(markup))
            .await
            .map_err(TransportError::from)??;

        self.completed.fetch_add(1, Ordering::Relaxed);
        debug!(worker_id = %self.id, bytes = audio.len(), "Synthesis completed");
        Ok(audio)
    }

    /// Release the connection and tear down the host (`* → Closed`)
    ///
    /// Idempotent.
    pub async fn dispose(&self) {
        let previous = std::mem::replace(&mut *self.state.lock(), WorkerState::Closed);
        if previous != WorkerState::Closed {
            self.publish(WorkerState::Closed);
        }

        let endpoint = self.endpoint.lock().take();
        if let Some(endpoint) = endpoint {
            if let Err(e) = endpoint.shutdown().await {
                warn!(worker_id = %self.id, error = %e, "Endpoint shutdown failed");
            }
            debug!(worker_id = %self.id, "Worker disposed");
        }
    }

    fn transition(&self, from: WorkerState, to: WorkerState) -> Result<(), WorkerError> {
        {
            let mut state = self.state.lock();
            if *state != from {
                return Err(WorkerError::InvalidState {
                    id: self.id,
                    actual: *state,
                    expected: from,
                });
            }
            *state = to;
        }
        self.publish(to);
        Ok(())
    }

    fn publish(&self, state: WorkerState) {
        if let Some(events) = &self.events {
            // No subscribers is fine
            let _ = events.send(PoolEvent::WorkerStateChanged { id: self.id, state });
        }
    }
}

impl std::fmt::Debug for SpeechWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpeechWorker")
            .field("id", &self.id)
            .field("port", &self.port)
            .field("state", &self.state())
            .field("completed", &self.completed())
            .finish()
    }
}
