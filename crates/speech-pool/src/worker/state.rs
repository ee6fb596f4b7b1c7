//! Worker lifecycle states

use serde::{Deserialize, Serialize};

/// Lifecycle state of a speech worker
///
/// ```text
/// ┌─────────┐ initialize ┌──────────────┐ handshake ┌───────┐ lease ┌──────┐
/// │ Created │ ─────────► │ Initializing │ ────────► │ Ready │ ────► │ Busy │
/// └─────────┘            └──────────────┘           └───────┘ ◄──── └──────┘
///                                                              release
///                 any state ── dispose ──► Closed (terminal)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    /// Constructed, no endpoint yet
    Created,
    /// Endpoint launched, handshake in progress
    Initializing,
    /// Idle and selectable
    Ready,
    /// Leased to exactly one caller
    Busy,
    /// Connection released; no further operations are valid
    Closed,
}

impl WorkerState {
    /// Whether the pool may hand this worker out
    pub fn is_available(self) -> bool {
        self == Self::Ready
    }

    /// Whether the state can never change again
    pub fn is_terminal(self) -> bool {
        self == Self::Closed
    }
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Initializing => write!(f, "initializing"),
            Self::Ready => write!(f, "ready"),
            Self::Busy => write!(f, "busy"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_ready_is_available() {
        assert!(WorkerState::Ready.is_available());
        assert!(!WorkerState::Busy.is_available());
        assert!(!WorkerState::Initializing.is_available());
        assert!(!WorkerState::Closed.is_available());
    }

    #[test]
    fn test_display() {
        assert_eq!(WorkerState::Initializing.to_string(), "initializing");
        assert_eq!(WorkerState::Closed.to_string(), "closed");
    }

    #[test]
    fn test_serialization() {
        let json = serde_json::to_string(&WorkerState::Busy).unwrap();
        assert_eq!(json, "\"busy\"");
    }
}
