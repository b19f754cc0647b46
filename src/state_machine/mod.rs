/// State Machine Pattern for Recording Sessions
///
/// This module implements a type-safe state machine that enforces valid state transitions
/// at compile time. Invalid states and transitions are impossible to represent.
///
/// # States
///
/// - `Idle` - No active recording
/// - `Active` - The capture loop is producing segments
/// - `Stopping` - The final segment is being flushed and enqueued
///
/// # Example
///
/// ```
/// use screenlog_lib::region::{CaptureRegion, DisplayGeometry};
/// use screenlog_lib::state_machine::RecordingSession;
///
/// let display = DisplayGeometry::default();
/// let session = RecordingSession::new(100, CaptureRegion::full(display));
/// let mut session = session.activate();
/// assert_eq!(session.complete_segment(), 0);
/// let mut session = session.stop();
/// assert_eq!(session.complete_segment(), 1);
/// let idle = session.finish();
/// ```
pub mod states;
pub mod transitions;
pub mod wrapper;

pub use states::*;
pub use wrapper::*;

use crate::region::CaptureRegion;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Recording session with type-safe state
///
/// The generic parameter `S` represents the current state of the session.
/// This ensures that only valid operations for the current state can be called.
#[derive(Debug, Clone)]
pub struct RecordingSession<S> {
    /// Unique session identifier
    pub session_id: Uuid,

    /// Current state (type parameter ensures type safety)
    pub state: S,

    /// Session metadata (available in all states)
    pub metadata: SessionMetadata,
}

/// Metadata available in all states
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMetadata {
    /// Coverage percentage the current region was computed from
    pub percentage: u32,

    /// Region used by the segment currently being written
    pub region: CaptureRegion,

    /// When the session was created
    pub created_at: DateTime<Utc>,
}

impl<S> RecordingSession<S> {
    /// Get the session ID
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Get the region of the current segment
    pub fn region(&self) -> CaptureRegion {
        self.metadata.region
    }

    /// Get session metadata
    pub fn metadata(&self) -> &SessionMetadata {
        &self.metadata
    }
}
