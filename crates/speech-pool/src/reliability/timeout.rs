//! Deadlines for I/O-bound suspension points
//!
//! The pool has no cancellation of its own; a deadline makes a hung round
//! trip fail like any other transport error, so the retry policy covers it.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

/// A guarded operation did not finish in time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("operation timed out after {limit:?}")]
pub struct DeadlineExceeded {
    /// The deadline that was exceeded
    pub limit: Duration,
}

/// Run `future` with an optional deadline
///
/// `None` waits indefinitely.
pub async fn with_deadline<F, T>(limit: Option<Duration>, future: F) -> Result<T, DeadlineExceeded>
where
    F: Future<Output = T>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, future)
            .await
            .map_err(|_| DeadlineExceeded { limit }),
        None => Ok(future.await),
    }
}
