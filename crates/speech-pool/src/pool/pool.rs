//! Speech worker pool
//!
//! Hands out free workers round-robin, grows on demand with at most one
//! creation in flight, and evicts workers whose round trip failed.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument, warn};

use super::config::{ConfigError, SpeechPoolConfig};
use super::events::{PoolEvent, RemovalReason};
use crate::port::allocate_ephemeral_port;
use crate::reliability::{Failure, RetryExecutor};
use crate::transport::EndpointLauncher;
use crate::worker::{SpeechWorker, WorkerError, WorkerId, WorkerLease, WorkerSnapshot};

/// Pool errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    /// Every worker was busy for the whole scan budget
    #[error("all {size} speech workers are busy")]
    AllBusy { size: usize },

    /// The pool is at its configured size limit
    #[error("speech pool is at its limit of {max} workers")]
    AtCapacity { max: usize },

    /// A worker's round trip failed; it has been evicted
    #[error("{id} failed: {source}")]
    WorkerFailed { id: WorkerId, source: WorkerError },

    /// No worker reached `Ready` within the creation retry budget
    #[error("could not create a speech worker: {0}")]
    CreationFailed(WorkerError),

    /// The pool has been shut down
    #[error("speech pool is shut down")]
    ShutDown,
}

impl PoolError {
    /// Whether the same request may succeed later without intervention
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::AllBusy { .. } | Self::AtCapacity { .. } | Self::WorkerFailed { .. }
        )
    }

    /// Tag the error for a [`RetryExecutor`]
    pub fn classify(self) -> Failure<Self> {
        if self.is_transient() {
            Failure::Transient(self)
        } else {
            Failure::Fatal(self)
        }
    }
}

type PendingCreation = Shared<BoxFuture<'static, Result<Arc<SpeechWorker>, PoolError>>>;

struct PoolState {
    /// Insertion order is creation order
    workers: Vec<Arc<SpeechWorker>>,
    /// Next index to inspect; always `< workers.len()` or 0
    cursor: usize,
}

impl PoolState {
    fn remove(&mut self, worker: &Arc<SpeechWorker>) -> bool {
        let Some(index) = self.workers.iter().position(|w| Arc::ptr_eq(w, worker)) else {
            return false;
        };
        self.workers.remove(index);
        if index < self.cursor {
            self.cursor -= 1;
        }
        if self.cursor >= self.workers.len() {
            self.cursor = 0;
        }
        true
    }
}

struct PoolInner {
    config: SpeechPoolConfig,
    launcher: Arc<dyn EndpointLauncher>,
    state: Mutex<PoolState>,
    pending: Mutex<Option<PendingCreation>>,
    next_id: AtomicU64,
    events: broadcast::Sender<PoolEvent>,
    shut_down: AtomicBool,
}

/// Pool of out-of-process speech workers
///
/// Cheap to clone; clones share the same workers. The pool runs no
/// background tasks: every step happens inside a caller's
/// [`synthesize`](Self::synthesize) or [`acquire`](Self::acquire).
///
/// # Example
///
/// ```ignore
/// use chatvoice_speech::{HostCommandConfig, ProcessLauncher, SpeechPool, SpeechPoolConfig};
///
/// let launcher = ProcessLauncher::new(HostCommandConfig::new("speech-host"));
/// let pool = SpeechPool::new(SpeechPoolConfig::default(), Arc::new(launcher))?;
///
/// let wav = pool.synthesize("<speak>hello chat</speak>").await?;
///
/// pool.shutdown().await;
/// ```
#[derive(Clone)]
pub struct SpeechPool {
    inner: Arc<PoolInner>,
}

impl SpeechPool {
    /// Create an empty pool; workers are created on first demand
    pub fn new(
        config: SpeechPoolConfig,
        launcher: Arc<dyn EndpointLauncher>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let (events, _) = broadcast::channel(config.event_capacity);

        Ok(Self {
            inner: Arc::new(PoolInner {
                config,
                launcher,
                state: Mutex::new(PoolState {
                    workers: vec![],
                    cursor: 0,
                }),
                pending: Mutex::new(None),
                next_id: AtomicU64::new(1),
                events,
                shut_down: AtomicBool::new(false),
            }),
        })
    }

    pub fn config(&self) -> &SpeechPoolConfig {
        &self.inner.config
    }

    /// Receive pool change notifications from now on
    pub fn subscribe(&self) -> broadcast::Receiver<PoolEvent> {
        self.inner.events.subscribe()
    }

    /// Number of workers currently in the pool
    pub fn len(&self) -> usize {
        self.inner.state.lock().workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::SeqCst)
    }

    /// Snapshots of all workers in creation order
    pub fn workers(&self) -> Vec<WorkerSnapshot> {
        self.inner
            .state
            .lock()
            .workers
            .iter()
            .map(|w| w.snapshot())
            .collect()
    }

    /// Synthesize audio for marked-up text
    ///
    /// Selects (or creates) a worker and runs the round trip. A worker that
    /// fails is evicted and the whole sequence retried on another one, up to
    /// `synthesize_attempts` times.
    #[instrument(skip(self, markup), fields(pool_id = %self.inner.config.pool_id, chars = markup.len()))]
    pub async fn synthesize(&self, markup: &str) -> Result<Vec<u8>, PoolError> {
        let executor = RetryExecutor::new(self.inner.config.synthesize_policy());
        executor
            .execute(|attempt| self.synthesize_once(markup, attempt))
            .await
            .map_err(Failure::into_inner)
    }

    async fn synthesize_once(&self, markup: &str, attempt: u32) -> Result<Vec<u8>, Failure<PoolError>> {
        let lease = self.acquire_classified().await?;
        let id = lease.id();

        match lease.synthesize(markup).await {
            Ok(audio) => Ok(audio),
            Err(error) => {
                warn!(worker_id = %id, attempt, %error, "Synthesis failed, evicting worker");
                self.evict(lease.worker(), RemovalReason::Failed).await;
                drop(lease);
                Err(Failure::Transient(PoolError::WorkerFailed { id, source: error }))
            }
        }
    }

    /// Lease a free worker, creating one if none is free
    pub async fn acquire(&self) -> Result<WorkerLease, PoolError> {
        self.acquire_classified().await.map_err(Failure::into_inner)
    }

    async fn acquire_classified(&self) -> Result<WorkerLease, Failure<PoolError>> {
        loop {
            self.ensure_running()?;

            match self.select_free().await {
                Ok(lease) => return Ok(lease),
                Err(Failure::Transient(PoolError::AllBusy { size })) => {
                    debug!(pool_size = size, "No free worker, falling back to creation");
                }
                Err(other) => return Err(other),
            }

            let worker = self.ensure_worker().await.map_err(PoolError::classify)?;

            // Callers that shared the creation race for the new worker. Losers
            // scan again and start or join the next creation; that costs no
            // outer attempt, and max_workers or shutdown ends the loop.
            if let Some(lease) = worker.try_acquire() {
                return Ok(lease);
            }
            debug!(worker_id = %worker.id(), "Lost the race for a new worker");
        }
    }

    /// Lease a free worker without creating one
    ///
    /// Scans the pool round-robin `scan_attempts` times and fails with
    /// [`PoolError::AllBusy`] if every worker stayed busy.
    pub async fn get_free_worker(&self) -> Result<WorkerLease, PoolError> {
        self.ensure_running().map_err(Failure::into_inner)?;
        self.select_free().await.map_err(Failure::into_inner)
    }

    async fn select_free(&self) -> Result<WorkerLease, Failure<PoolError>> {
        let executor = RetryExecutor::new(self.inner.config.scan_policy());
        executor
            .execute(|_| std::future::ready(self.scan()))
            .await
    }

    /// One pass over at most `workers.len()` workers starting at the cursor
    fn scan(&self) -> Result<WorkerLease, Failure<PoolError>> {
        let mut guard = self.inner.state.lock();
        let state = &mut *guard;
        let size = state.workers.len();

        for _ in 0..size {
            let index = state.cursor % size;
            state.cursor = (index + 1) % size;

            if let Some(lease) = state.workers[index].try_acquire() {
                debug!(worker_id = %lease.id(), index, "Leased free worker");
                return Ok(lease);
            }
        }

        Err(Failure::Transient(PoolError::AllBusy { size }))
    }

    /// Create a worker, or join the creation already in flight
    ///
    /// However many callers arrive while a creation is pending, only one
    /// launch happens and every caller receives its result. The slot clears
    /// when the creation finishes, successfully or not.
    pub async fn ensure_worker(&self) -> Result<Arc<SpeechWorker>, PoolError> {
        if self.is_shut_down() {
            return Err(PoolError::ShutDown);
        }

        let creation = {
            let mut pending = self.inner.pending.lock();
            match pending.as_ref() {
                Some(existing) => {
                    debug!("Joining in-flight worker creation");
                    existing.clone()
                }
                None => {
                    if let Some(max) = self.inner.config.max_workers {
                        if self.len() >= max {
                            return Err(PoolError::AtCapacity { max });
                        }
                    }

                    let inner = Arc::clone(&self.inner);
                    let creation = async move {
                        let result = inner.create_worker().await;
                        inner.pending.lock().take();
                        result
                    }
                    .boxed()
                    .shared();

                    *pending = Some(creation.clone());
                    creation
                }
            }
        };

        creation.await
    }

    /// Remove a worker so it is never selected again, then dispose it
    async fn evict(&self, worker: &Arc<SpeechWorker>, reason: RemovalReason) {
        let (removed, remaining) = {
            let mut state = self.inner.state.lock();
            let removed = state.remove(worker);
            (removed, state.workers.len())
        };

        worker.dispose().await;

        if removed {
            info!(worker_id = %worker.id(), pool_size = remaining, ?reason, "Worker evicted");
            self.inner.emit(PoolEvent::WorkerRemoved {
                id: worker.id(),
                reason,
            });
        }
    }

    /// Dispose every worker and refuse further requests
    #[instrument(skip(self), fields(pool_id = %self.inner.config.pool_id))]
    pub async fn shutdown(&self) {
        if self.inner.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }

        let workers = {
            let mut state = self.inner.state.lock();
            state.cursor = 0;
            std::mem::take(&mut state.workers)
        };

        info!(count = workers.len(), "Shutting down speech pool");

        for worker in workers {
            worker.dispose().await;
            self.inner.emit(PoolEvent::WorkerRemoved {
                id: worker.id(),
                reason: RemovalReason::Shutdown,
            });
        }

        info!("Speech pool stopped");
    }

    fn ensure_running(&self) -> Result<(), Failure<PoolError>> {
        if self.is_shut_down() {
            Err(Failure::Fatal(PoolError::ShutDown))
        } else {
            Ok(())
        }
    }
}

impl PoolInner {
    #[instrument(skip(self), fields(pool_id = %self.config.pool_id))]
    async fn create_worker(&self) -> Result<Arc<SpeechWorker>, PoolError> {
        let executor = RetryExecutor::new(self.config.initialize_policy());

        let worker = match executor.execute(|attempt| self.try_create(attempt)).await {
            Ok(worker) => worker,
            Err(failure) => {
                let error = failure.into_inner();
                error!(%error, "Worker creation failed");
                self.emit(PoolEvent::CreationFailed {
                    error: error.to_string(),
                });
                return Err(PoolError::CreationFailed(error));
            }
        };

        // Checked under the state lock: shutdown() sets the flag before it
        // drains the list, so a worker pushed here is always drained.
        let pool_size = {
            let mut state = self.state.lock();
            if self.shut_down.load(Ordering::SeqCst) {
                None
            } else {
                state.workers.push(Arc::clone(&worker));
                Some(state.workers.len())
            }
        };

        let Some(pool_size) = pool_size else {
            debug!(worker_id = %worker.id(), "Pool shut down during creation");
            worker.dispose().await;
            return Err(PoolError::ShutDown);
        };

        info!(worker_id = %worker.id(), port = worker.port(), pool_size, "Worker added");
        self.emit(PoolEvent::WorkerAdded {
            id: worker.id(),
            port: worker.port(),
        });

        Ok(worker)
    }

    async fn try_create(&self, attempt: u32) -> Result<Arc<SpeechWorker>, Failure<WorkerError>> {
        let port = allocate_ephemeral_port()
            .map_err(|e| Failure::Transient(WorkerError::Transport(e)))?;
        let id = WorkerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        debug!(worker_id = %id, port, attempt, "Creating worker");

        let worker = SpeechWorker::new(id, port)
            .with_request_timeout(self.config.request_timeout)
            .with_events(self.events.clone());

        worker
            .initialize(self.launcher.as_ref(), self.config.handshake_timeout)
            .await
            .map_err(WorkerError::classify)?;

        Ok(Arc::new(worker))
    }

    fn emit(&self, event: PoolEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::WorkerState;

    fn state_with(n: u64) -> PoolState {
        PoolState {
            workers: (1..=n)
                .map(|i| Arc::new(SpeechWorker::new(WorkerId(i), 40000 + i as u16)))
                .collect(),
            cursor: 0,
        }
    }

    #[test]
    fn test_remove_before_cursor_shifts_cursor() {
        let mut state = state_with(4);
        state.cursor = 2;
        let first = Arc::clone(&state.workers[0]);

        assert!(state.remove(&first));

        assert_eq!(state.cursor, 1);
        assert_eq!(state.workers[state.cursor].id(), WorkerId(3));
    }

    #[test]
    fn test_remove_last_wraps_cursor() {
        let mut state = state_with(3);
        state.cursor = 2;
        let last = Arc::clone(&state.workers[2]);

        assert!(state.remove(&last));

        assert_eq!(state.cursor, 0);
        assert_eq!(state.workers.len(), 2);
    }

    #[test]
    fn test_remove_only_worker() {
        let mut state = state_with(1);
        let only = Arc::clone(&state.workers[0]);

        assert!(state.remove(&only));
        assert!(!state.remove(&only));

        assert_eq!(state.cursor, 0);
        assert!(state.workers.is_empty());
    }

    #[test]
    fn test_error_classification() {
        assert!(PoolError::AllBusy { size: 2 }.is_transient());
        assert!(PoolError::AtCapacity { max: 2 }.is_transient());
        assert!(PoolError::WorkerFailed {
            id: WorkerId(1),
            source: WorkerError::Transport(crate::transport::TransportError::Closed),
        }
        .is_transient());
        assert!(!PoolError::ShutDown.is_transient());
        assert!(!PoolError::CreationFailed(WorkerError::HandshakeMismatch {
            expected: "World".into(),
            actual: "".into(),
        })
        .classify()
        .is_transient());
    }

    #[test]
    fn test_error_display() {
        let err = PoolError::WorkerFailed {
            id: WorkerId(2),
            source: WorkerError::Transport(crate::transport::TransportError::Closed),
        };
        assert_eq!(err.to_string(), "worker-2 failed: connection closed");
        assert_eq!(
            PoolError::AllBusy { size: 3 }.to_string(),
            "all 3 speech workers are busy"
        );
    }

    #[test]
    fn test_fresh_workers_are_not_selectable() {
        let state = state_with(2);
        assert!(state
            .workers
            .iter()
            .all(|w| w.state() == WorkerState::Created));
    }
}
