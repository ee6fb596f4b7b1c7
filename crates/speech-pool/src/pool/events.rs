//! Pool change notifications
//!
//! Subscribers (a UI list, a status line) receive these over a
//! `tokio::sync::broadcast` channel instead of observing the worker list.

use serde::Serialize;

use crate::worker::{WorkerId, WorkerState};

/// Why a worker left the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovalReason {
    /// A synthesis round trip failed
    Failed,
    /// The pool shut down
    Shutdown,
}

/// Something observable changed in the pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PoolEvent {
    /// A worker passed its handshake and joined the pool
    WorkerAdded { id: WorkerId, port: u16 },
    /// A worker was evicted or shut down
    WorkerRemoved { id: WorkerId, reason: RemovalReason },
    /// A worker changed lifecycle state
    WorkerStateChanged { id: WorkerId, state: WorkerState },
    /// A creation gave up after its retry budget
    CreationFailed { error: String },
}
