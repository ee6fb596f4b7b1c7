//! Scoped busy acquisition

use std::sync::Arc;

use super::handle::{SpeechWorker, WorkerError, WorkerId};

/// Exclusive use of one worker
///
/// Obtained from [`SpeechWorker::try_acquire`] or the pool. The worker is
/// `Busy` for as long as the lease lives and returns to `Ready` when it is
/// dropped, on every exit path.
#[derive(Debug)]
pub struct WorkerLease {
    worker: Arc<SpeechWorker>,
}

impl WorkerLease {
    pub(crate) fn new(worker: Arc<SpeechWorker>) -> Self {
        Self { worker }
    }

    pub fn id(&self) -> WorkerId {
        self.worker.id()
    }

    /// The leased worker
    pub fn worker(&self) -> &Arc<SpeechWorker> {
        &self.worker
    }

    /// Synthesize audio for marked-up text on the leased worker
    pub async fn synthesize(&self, markup: &str) -> Result<Vec<u8>, WorkerError> {
        self.worker.speak(markup).await
    }
}

impl Drop for WorkerLease {
    fn drop(&mut self) {
        self.worker.release();
    }
}
