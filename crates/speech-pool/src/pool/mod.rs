//! Speech worker pool
//!
//! This module provides:
//! - [`SpeechPool`] - Selection, single-flight creation and eviction
//! - [`SpeechPoolConfig`] - Retry budgets, deadlines and size limit
//! - [`PoolEvent`] - Change notifications for observers
//!
//! # Request flow
//!
//! ```text
//! synthesize(markup)                       ── RetryExecutor(synthesize_attempts)
//!   │
//!   ├─► scan workers from cursor           ── RetryExecutor(scan_attempts)
//!   │     └─ all busy ─► ensure_worker()   ── single-flight
//!   │                      └─ port → launch → hello == "World"
//!   │                                     ── RetryExecutor(initialize_attempts)
//!   ├─► lease.synthesize(markup)
//!   │     └─ failure ─► evict + dispose ─► Transient ─► retry
//!   └─► audio bytes; worker back to Ready
//! ```

pub(crate) mod config;
mod events;
#[allow(clippy::module_inception)]
mod pool;

pub use config::{ConfigError, SpeechPoolConfig};
pub use events::{PoolEvent, RemovalReason};
pub use pool::{PoolError, SpeechPool};
