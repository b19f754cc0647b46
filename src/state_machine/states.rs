/// State type definitions for the recording state machine
///
/// Each state is a distinct type, making invalid states impossible to represent.
/// State-specific data is stored in each state type.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Idle state - No active recording
///
/// This is the initial state and the state after a session stops or fails.
#[derive(Debug, Clone)]
pub struct Idle;

/// Active state - The capture loop is recording segments
#[derive(Debug, Clone)]
pub struct Active {
    /// When the session started
    pub started_at: DateTime<Utc>,

    /// Index of the next segment to be recorded
    pub segment_index: u64,
}

/// Stopping state - The in-flight segment is being finalized
///
/// The capture loop has been told to stop; the final partial segment is still
/// allowed to complete and be enqueued.
#[derive(Debug, Clone)]
pub struct Stopping {
    /// When the session started
    pub started_at: DateTime<Utc>,

    /// When stopping began
    pub stopping_at: DateTime<Utc>,

    /// Index of the next segment to be recorded
    pub segment_index: u64,
}

/// Coarse session status exposed to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Idle,
    Active,
    Stopping,
}

/// Why a session was forced back to Idle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionFailure {
    pub session_id: Uuid,
    pub failed_at: DateTime<Utc>,
    pub error: String,
    /// Segment that was being recorded when the capture failed
    pub segment_index: u64,
}

impl Idle {
    /// Create a new Idle state
    pub fn new() -> Self {
        Self
    }
}

impl Default for Idle {
    fn default() -> Self {
        Self::new()
    }
}

impl Active {
    /// Create a new Active state
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            segment_index: 0,
        }
    }

    /// Get recording duration so far
    pub fn duration(&self) -> chrono::Duration {
        Utc::now() - self.started_at
    }
}

impl Default for Active {
    fn default() -> Self {
        Self::new()
    }
}

impl Stopping {
    /// Create a new Stopping state from Active
    pub fn from_active(active: Active) -> Self {
        Self {
            started_at: active.started_at,
            stopping_at: Utc::now(),
            segment_index: active.segment_index,
        }
    }

    /// Get total recording duration
    pub fn duration(&self) -> chrono::Duration {
        self.stopping_at - self.started_at
    }
}

impl SessionFailure {
    pub fn new(session_id: Uuid, error: String, segment_index: u64) -> Self {
        Self {
            session_id,
            failed_at: Utc::now(),
            error,
            segment_index,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle_creation() {
        let idle = Idle::new();
        assert!(matches!(idle, Idle));
    }

    #[test]
    fn test_active_starts_at_segment_zero() {
        let active = Active::new();
        assert_eq!(active.segment_index, 0);
        assert!(active.duration().num_milliseconds() >= 0);
    }

    #[test]
    fn test_stopping_from_active() {
        let mut active = Active::new();
        active.segment_index = 4;

        let stopping = Stopping::from_active(active);
        assert_eq!(stopping.segment_index, 4);
        assert!(stopping.stopping_at >= stopping.started_at);
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&SessionStatus::Stopping).unwrap();
        assert_eq!(json, "\"stopping\"");
    }
}
