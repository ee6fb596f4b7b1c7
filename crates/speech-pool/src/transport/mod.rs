//! Connection to out-of-process speech hosts
//!
//! This module provides:
//! - [`SpeechEndpoint`] - The two-call request/response surface of one host
//! - [`EndpointLauncher`] - The "spawn and connect" primitive the pool uses
//! - [`TcpEndpoint`] - JSON-lines client over loopback TCP
//! - [`ProcessLauncher`] - Spawns a host command and connects to it
//!
//! # Wire protocol
//!
//! ```text
//! -> {"method":"hello"}
//! <- {"status":"ok","value":"World"}
//! -> {"method":"speak_ssml","markup":"<speak>...</speak>"}
//! <- {"status":"audio","data":"UklGRi4A..."}
//! <- {"status":"error","message":"voice not installed"}
//! ```

mod process;
mod protocol;
mod tcp;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::reliability::DeadlineExceeded;

pub use process::{HostCommandConfig, HostProcess, ProcessLauncher};
pub use protocol::{decode_line, encode_line, HostRequest, HostResponse, HANDSHAKE_REPLY};
pub use tcp::TcpEndpoint;

/// Transport-level failures talking to a speech host
///
/// All of these are transient from the pool's point of view: the round trip
/// did not complete, so the worker is evicted and the request retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The host process could not be started
    #[error("failed to start speech host: {0}")]
    Spawn(String),

    /// Nothing accepted the connection in time
    #[error("failed to connect to speech host on port {port}: {message}")]
    Connect { port: u16, message: String },

    /// Socket read/write failed
    #[error("i/o error: {0}")]
    Io(String),

    /// The host sent something that is not a valid response
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The host answered with an error message
    #[error("speech host error: {0}")]
    Remote(String),

    /// The round trip exceeded its deadline
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The connection was already released
    #[error("connection closed")]
    Closed,
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<DeadlineExceeded> for TransportError {
    fn from(err: DeadlineExceeded) -> Self {
        Self::Timeout(err.limit)
    }
}

/// One remote speech-synthesis endpoint
#[async_trait]
pub trait SpeechEndpoint: Send + Sync {
    /// Handshake round trip; a healthy host answers [`HANDSHAKE_REPLY`]
    async fn hello(&self) -> Result<String, TransportError>;

    /// Synthesize audio for marked-up text
    async fn speak_ssml(&self, markup: &str) -> Result<Vec<u8>, TransportError>;

    /// Release the connection and tear down whatever backs it
    ///
    /// Must be idempotent.
    async fn shutdown(&self) -> Result<(), TransportError>;
}

/// Starts a speech host listening on `port` and connects to it
#[async_trait]
pub trait EndpointLauncher: Send + Sync {
    /// Launch and connect; a failure here is retried with a fresh port
    async fn launch(&self, port: u16) -> Result<Arc<dyn SpeechEndpoint>, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TransportError::Connect {
            port: 50123,
            message: "refused".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "failed to connect to speech host on port 50123: refused"
        );
        assert_eq!(TransportError::Closed.to_string(), "connection closed");
    }

    #[test]
    fn test_from_deadline() {
        let err: TransportError = DeadlineExceeded {
            limit: Duration::from_secs(2),
        }
        .into();
        assert_eq!(err, TransportError::Timeout(Duration::from_secs(2)));
    }

    #[test]
    fn test_from_io() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
        let err: TransportError = io.into();
        assert_eq!(err, TransportError::Io("pipe closed".to_string()));
    }
}
