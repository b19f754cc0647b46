/// State transition implementations
///
/// Each transition is a method that consumes the current state and returns a new state.
/// This ensures that invalid transitions are impossible at compile time.
use super::states::*;
use super::{RecordingSession, SessionMetadata};
use crate::region::CaptureRegion;
use uuid::Uuid;

// ============================================================================
// Idle State Transitions
// ============================================================================

impl RecordingSession<Idle> {
    /// Create a new idle session with a fresh identifier
    pub fn new(percentage: u32, region: CaptureRegion) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            state: Idle::new(),
            metadata: SessionMetadata {
                percentage,
                region,
                created_at: chrono::Utc::now(),
            },
        }
    }

    /// Transition to Active state
    pub fn activate(self) -> RecordingSession<Active> {
        RecordingSession {
            session_id: self.session_id,
            state: Active::new(),
            metadata: self.metadata,
        }
    }
}

// ============================================================================
// Active State Transitions
// ============================================================================

impl RecordingSession<Active> {
    /// Switch the region used from the next segment on
    pub fn begin_segment(&mut self, percentage: u32, region: CaptureRegion) {
        self.metadata.percentage = percentage;
        self.metadata.region = region;
    }

    /// Record that a segment finished; returns the index it was assigned
    pub fn complete_segment(&mut self) -> u64 {
        let index = self.state.segment_index;
        self.state.segment_index += 1;
        index
    }

    /// Transition to Stopping state
    pub fn stop(self) -> RecordingSession<Stopping> {
        RecordingSession {
            session_id: self.session_id,
            state: Stopping::from_active(self.state),
            metadata: self.metadata,
        }
    }

    /// Fatal capture error: back to Idle, keeping what went wrong
    pub fn fail(self, error: String) -> (RecordingSession<Idle>, SessionFailure) {
        let failure = SessionFailure::new(self.session_id, error, self.state.segment_index);
        (reset(self.metadata), failure)
    }
}

// ============================================================================
// Stopping State Transitions
// ============================================================================

impl RecordingSession<Stopping> {
    /// The final segment finished; returns the index it was assigned
    pub fn complete_segment(&mut self) -> u64 {
        let index = self.state.segment_index;
        self.state.segment_index += 1;
        index
    }

    /// Transition back to Idle state once the final segment is enqueued
    pub fn finish(self) -> RecordingSession<Idle> {
        reset(self.metadata)
    }

    /// Capture failed while finalizing
    pub fn fail(self, error: String) -> (RecordingSession<Idle>, SessionFailure) {
        let failure = SessionFailure::new(self.session_id, error, self.state.segment_index);
        (reset(self.metadata), failure)
    }
}

/// A session never reuses its identifier after leaving Active
fn reset(metadata: SessionMetadata) -> RecordingSession<Idle> {
    RecordingSession::new(metadata.percentage, metadata.region)
}
