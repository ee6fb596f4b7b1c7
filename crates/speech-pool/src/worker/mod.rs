//! Handles to individual speech hosts
//!
//! This module provides:
//! - [`SpeechWorker`] - One endpoint plus its lifecycle state
//! - [`WorkerLease`] - Scoped busy acquisition; release happens on drop
//! - [`WorkerState`] - `Created → Initializing → Ready ⇄ Busy → Closed`

mod handle;
mod lease;
mod state;

pub use handle::{SpeechWorker, WorkerError, WorkerId, WorkerSnapshot};
pub use lease::WorkerLease;
pub use state::WorkerState;
