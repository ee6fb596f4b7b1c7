//! # Speech Synthesis Worker Pool
//!
//! Keeps a set of out-of-process text-to-speech hosts and turns marked-up
//! text into audio bytes for chat-driven avatars.
//!
//! ## Features
//!
//! - **Round-robin selection**: Free workers are leased fairly from a moving cursor
//! - **Single-flight growth**: Concurrent demand triggers one worker creation, shared by all waiters
//! - **Eviction**: A worker whose round trip fails is removed before anyone sees the error
//! - **Classified retries**: Transient failures are retried, fatal ones surface at once
//! - **Explicit teardown**: Disposing a worker kills the host process behind it
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        SpeechPool                            │
//! │  (scan from cursor, single-flight creation, eviction)       │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │              SpeechWorker  /  WorkerLease                    │
//! │  (Created → Initializing → Ready ⇄ Busy → Closed)           │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │          EndpointLauncher  /  SpeechEndpoint                 │
//! │  (spawn host on a fresh port, hello → "World", speak_ssml)  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use chatvoice_speech::prelude::*;
//!
//! let launcher = ProcessLauncher::new(HostCommandConfig::new("speech-host"));
//! let pool = SpeechPool::new(SpeechPoolConfig::from_env()?, Arc::new(launcher))?;
//!
//! let markup = Ssml::new("thanks for the follow!").with_voice("en-US-AriaNeural");
//! match pool.synthesize(&markup.render()).await {
//!     Ok(wav) => play(wav),
//!     Err(e) => tracing::warn!(error = %e, "Dropping speech request"),
//! }
//! ```

pub mod pool;
pub mod port;
pub mod reliability;
pub mod ssml;
pub mod testing;
pub mod transport;
pub mod worker;

/// Prelude for common imports
pub mod prelude {
    pub use crate::pool::{PoolError, PoolEvent, SpeechPool, SpeechPoolConfig};
    pub use crate::reliability::{Failure, RetryExecutor, RetryPolicy};
    pub use crate::ssml::Ssml;
    pub use crate::transport::{
        EndpointLauncher, HostCommandConfig, ProcessLauncher, SpeechEndpoint, TransportError,
    };
    pub use crate::worker::{SpeechWorker, WorkerError, WorkerLease, WorkerState};
}

// Re-export key types at crate root
pub use pool::{ConfigError, PoolError, PoolEvent, RemovalReason, SpeechPool, SpeechPoolConfig};
pub use reliability::{Failure, RetryExecutor, RetryPolicy};
pub use ssml::Ssml;
pub use transport::{
    EndpointLauncher, HostCommandConfig, ProcessLauncher, SpeechEndpoint, TcpEndpoint,
    TransportError,
};
pub use worker::{SpeechWorker, WorkerError, WorkerId, WorkerLease, WorkerSnapshot, WorkerState};

/// Serde support for Duration as milliseconds
pub(crate) mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Serde support for Option<Duration> as milliseconds
pub(crate) mod option_duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => d.as_millis().serialize(serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis: Option<u64> = Option::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}
