/// Type-erased wrapper for RecordingSession<S>
///
/// This enum allows storing any RecordingSession state in a single type,
/// enabling storage in shared state while maintaining type safety during transitions.
use super::states::*;
use super::RecordingSession;
use crate::error::{ScreenlogError, ScreenlogResult};
use crate::region::{CaptureRegion, DisplayGeometry};
use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

/// Wrapper enum that can hold RecordingSession in any state
#[derive(Debug, Clone)]
pub enum RecordingSessionState {
    Idle(RecordingSession<Idle>),
    Active(RecordingSession<Active>),
    Stopping(RecordingSession<Stopping>),
}

impl Default for RecordingSessionState {
    fn default() -> Self {
        Self::new(100, CaptureRegion::full(DisplayGeometry::default()))
    }
}

impl RecordingSessionState {
    /// Create a new idle session
    pub fn new(percentage: u32, region: CaptureRegion) -> Self {
        Self::Idle(RecordingSession::new(percentage, region))
    }

    /// Get the session ID
    pub fn session_id(&self) -> Uuid {
        match self {
            Self::Idle(s) => s.session_id(),
            Self::Active(s) => s.session_id(),
            Self::Stopping(s) => s.session_id(),
        }
    }

    /// Get the region of the segment currently being written
    pub fn region(&self) -> CaptureRegion {
        match self {
            Self::Idle(s) => s.region(),
            Self::Active(s) => s.region(),
            Self::Stopping(s) => s.region(),
        }
    }

    /// Get the current state as a string
    pub fn state_name(&self) -> &'static str {
        match self {
            Self::Idle(_) => "Idle",
            Self::Active(_) => "Active",
            Self::Stopping(_) => "Stopping",
        }
    }

    pub fn status(&self) -> SessionStatus {
        match self {
            Self::Idle(_) => SessionStatus::Idle,
            Self::Active(_) => SessionStatus::Active,
            Self::Stopping(_) => SessionStatus::Stopping,
        }
    }

    /// Check if a session is running (Active or Stopping)
    pub fn is_recording(&self) -> bool {
        matches!(self, Self::Active(_) | Self::Stopping(_))
    }

    /// Index of the next segment, if a session is running
    pub fn segment_index(&self) -> Option<u64> {
        match self {
            Self::Idle(_) => None,
            Self::Active(s) => Some(s.state.segment_index),
            Self::Stopping(s) => Some(s.state.segment_index),
        }
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Idle(_) => None,
            Self::Active(s) => Some(s.state.started_at),
            Self::Stopping(s) => Some(s.state.started_at),
        }
    }

    /// Transition to Active state (only from Idle)
    pub fn activate(self) -> ScreenlogResult<Self> {
        match self {
            Self::Idle(session) => {
                let session = session.activate();
                info!(
                    session_id = %session.session_id(),
                    region = %session.region(),
                    "recording session active"
                );
                Ok(Self::Active(session))
            }
            _ => Err(ScreenlogError::AlreadyRecording),
        }
    }

    /// Apply the target region at a segment boundary (only while Active)
    pub fn begin_segment(&mut self, percentage: u32, region: CaptureRegion) -> ScreenlogResult<()> {
        match self {
            Self::Active(session) => {
                session.begin_segment(percentage, region);
                Ok(())
            }
            _ => Err(ScreenlogError::InvalidStateTransition(format!(
                "Cannot begin a segment from {} state",
                self.state_name()
            ))),
        }
    }

    /// Count a finished segment and return its index
    pub fn complete_segment(&mut self) -> ScreenlogResult<u64> {
        match self {
            Self::Active(session) => Ok(session.complete_segment()),
            Self::Stopping(session) => Ok(session.complete_segment()),
            Self::Idle(_) => Err(ScreenlogError::InvalidStateTransition(
                "Cannot complete a segment from Idle state".to_string(),
            )),
        }
    }

    /// Transition to Stopping state (from Active; Stopping stays Stopping)
    pub fn stop(self) -> ScreenlogResult<Self> {
        match self {
            Self::Active(session) => {
                let session = session.stop();
                info!(session_id = %session.session_id(), "recording session stopping");
                Ok(Self::Stopping(session))
            }
            Self::Stopping(session) => Ok(Self::Stopping(session)),
            Self::Idle(_) => Err(ScreenlogError::NotRecording),
        }
    }

    /// Transition back to Idle state (only from Stopping)
    pub fn finish(self) -> ScreenlogResult<Self> {
        match self {
            Self::Stopping(session) => {
                let session_id = session.session_id();
                let segments = session.state.segment_index;
                info!(%session_id, segments, "recording session finished");
                Ok(Self::Idle(session.finish()))
            }
            _ => Err(ScreenlogError::InvalidStateTransition(format!(
                "Cannot finish from {} state",
                self.state_name()
            ))),
        }
    }

    /// Force the session back to Idle after a fatal capture error
    pub fn fail(self, error: String) -> (Self, Option<SessionFailure>) {
        let (idle, failure) = match self {
            Self::Idle(session) => return (Self::Idle(session), None),
            Self::Active(session) => session.fail(error),
            Self::Stopping(session) => session.fail(error),
        };
        warn!(
            session_id = %failure.session_id,
            error = %failure.error,
            "recording session failed"
        );
        (Self::Idle(idle), Some(failure))
    }
}
