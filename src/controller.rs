//! Session controller: owns the recording session and drives the capture loop
//!
//! All session mutation happens under one `tokio::sync::Mutex`. The lock is
//! never held across a capture or while `stop` waits for the loop to drain.

use crate::error::{ScreenlogError, ScreenlogResult};
use crate::recording_manager::SegmentRecorder;
use crate::region::{self, CaptureRegion, DisplayGeometry};
use crate::state_machine::{RecordingSessionState, SessionFailure, SessionStatus};
use crate::upload::UploadQueue;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Region the next segment will be captured with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TargetRegion {
    pub percentage: u32,
    pub region: CaptureRegion,
}

/// Point-in-time view of the controller
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    pub session_id: Option<Uuid>,
    /// Index of the segment being written, or the next one at a boundary
    pub segment_index: Option<u64>,
    pub started_at: Option<DateTime<Utc>>,
    pub current_region: Option<CaptureRegion>,
    pub target: TargetRegion,
    pub display: DisplayGeometry,
    /// Fatal capture error of the last session, cleared by the next start
    pub last_error: Option<SessionFailure>,
}

/// Result of a completed stop
#[derive(Debug, Clone, Serialize)]
pub struct StopSummary {
    pub session_id: Uuid,
    pub segments_recorded: u64,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone)]
struct LoopExit {
    session_id: Uuid,
    segments_recorded: u64,
    error: Option<String>,
}

struct RunHandle {
    cancel: CancellationToken,
    done: watch::Receiver<Option<LoopExit>>,
}

struct ControllerState {
    session: RecordingSessionState,
    target: TargetRegion,
    last_failure: Option<SessionFailure>,
    run: Option<RunHandle>,
}

impl ControllerState {
    fn snapshot(&self, display: DisplayGeometry) -> SessionSnapshot {
        let recording = self.session.is_recording();
        SessionSnapshot {
            status: self.session.status(),
            session_id: recording.then(|| self.session.session_id()),
            segment_index: self.session.segment_index(),
            started_at: self.session.started_at(),
            current_region: recording.then(|| self.session.region()),
            target: self.target,
            display,
            last_error: self.last_failure.clone(),
        }
    }
}

struct Shared {
    state: Mutex<ControllerState>,
    recorder: SegmentRecorder,
    queue: UploadQueue,
    display: DisplayGeometry,
    segment_duration: Duration,
}

/// Owner of the single recording session
#[derive(Clone)]
pub struct SessionController {
    shared: Arc<Shared>,
}

impl SessionController {
    /// Create an idle controller
    ///
    /// # Errors
    /// `InvalidConfiguration` if `initial_percentage` is out of range.
    pub async fn new(
        recorder: SegmentRecorder,
        queue: UploadQueue,
        initial_percentage: u32,
        segment_duration: Duration,
    ) -> ScreenlogResult<Self> {
        let display_geometry = recorder.display_geometry().await?;
        let percentage = i64::from(initial_percentage);
        let target = TargetRegion {
            percentage: region::validate_percentage(percentage)?,
            region: region::compute(percentage, display_geometry)?,
        };

        info!(
            display = %display_geometry,
            percentage = target.percentage,
            segment_secs = segment_duration.as_secs_f64(),
            "session controller ready"
        );

        Ok(Self {
            shared: Arc::new(Shared {
                state: Mutex::new(ControllerState {
                    session: RecordingSessionState::new(target.percentage, target.region),
                    target,
                    last_failure: None,
                    run: None,
                }),
                recorder,
                queue,
                display: display_geometry,
                segment_duration,
            }),
        })
    }

    pub fn display(&self) -> DisplayGeometry {
        self.shared.display
    }

    pub fn queue(&self) -> &UploadQueue {
        &self.shared.queue
    }

    /// Start a new session and its capture loop
    ///
    /// Without a percentage the stored target is used. Fails with
    /// `AlreadyRecording` if a session is Active or Stopping, leaving it
    /// untouched.
    pub async fn start(&self, percentage: Option<i64>) -> ScreenlogResult<SessionSnapshot> {
        let mut state = self.shared.state.lock().await;
        if state.session.is_recording() {
            return Err(ScreenlogError::AlreadyRecording);
        }

        let target = match percentage {
            Some(p) => self.target_for(p)?,
            None => state.target,
        };

        let session = RecordingSessionState::new(target.percentage, target.region).activate()?;
        let session_id = session.session_id();
        state.session = session;
        state.target = target;
        state.last_failure = None;

        let cancel = CancellationToken::new();
        let (done_tx, done_rx) = watch::channel(None);
        state.run = Some(RunHandle {
            cancel: cancel.clone(),
            done: done_rx,
        });

        tokio::spawn(capture_loop(
            self.shared.clone(),
            session_id,
            cancel,
            done_tx,
        ));

        info!(
            %session_id,
            percentage = target.percentage,
            region = %target.region,
            "recording started"
        );
        Ok(state.snapshot(self.shared.display))
    }

    /// Stop the running session
    ///
    /// The segment being written is finalized early and enqueued before this
    /// returns. A second concurrent stop waits for the same completion.
    pub async fn stop(&self) -> ScreenlogResult<StopSummary> {
        let (cancel, mut done) = {
            let mut state = self.shared.state.lock().await;
            if !state.session.is_recording() {
                return Err(ScreenlogError::NotRecording);
            }
            let session = std::mem::take(&mut state.session);
            state.session = session.stop()?;

            let run = state.run.as_ref().ok_or_else(|| {
                ScreenlogError::Internal("recording session has no capture loop".to_string())
            })?;
            (run.cancel.clone(), run.done.clone())
        };

        cancel.cancel();

        let exit = match done.wait_for(|exit| exit.is_some()).await {
            Ok(exit) => exit.clone(),
            Err(_) => None,
        };

        match exit {
            Some(exit) => {
                info!(
                    session_id = %exit.session_id,
                    segments = exit.segments_recorded,
                    "recording stopped"
                );
                Ok(StopSummary {
                    session_id: exit.session_id,
                    segments_recorded: exit.segments_recorded,
                    last_error: exit.error,
                })
            }
            None => {
                let mut state = self.shared.state.lock().await;
                let session = std::mem::take(&mut state.session);
                let (idle, failure) = session.fail("capture loop ended unexpectedly".to_string());
                state.session = idle;
                if failure.is_some() {
                    state.last_failure = failure;
                }
                Err(ScreenlogError::Internal(
                    "capture loop ended without reporting".to_string(),
                ))
            }
        }
    }

    /// Set the capture area used from the next segment boundary on
    ///
    /// Valid in any state; never interrupts the segment being written.
    pub async fn set_percentage(&self, percentage: i64) -> ScreenlogResult<TargetRegion> {
        let target = self.target_for(percentage)?;
        let mut state = self.shared.state.lock().await;
        state.target = target;
        info!(
            percentage = target.percentage,
            region = %target.region,
            recording = state.session.is_recording(),
            "capture area updated"
        );
        Ok(target)
    }

    pub async fn status(&self) -> SessionSnapshot {
        self.shared.state.lock().await.snapshot(self.shared.display)
    }

    /// Stop any running session; used on process exit
    pub async fn shutdown(&self) {
        match self.stop().await {
            Ok(summary) => info!(
                session_id = %summary.session_id,
                segments = summary.segments_recorded,
                "recording stopped for shutdown"
            ),
            Err(ScreenlogError::NotRecording) => {}
            Err(e) => warn!(error = %e, "failed to stop recording during shutdown"),
        }
    }

    fn target_for(&self, percentage: i64) -> ScreenlogResult<TargetRegion> {
        Ok(TargetRegion {
            percentage: region::validate_percentage(percentage)?,
            region: region::compute(percentage, self.shared.display)?,
        })
    }
}

/// Record segments back to back until stopped or capture fails
async fn capture_loop(
    shared: Arc<Shared>,
    session_id: Uuid,
    cancel: CancellationToken,
    done: watch::Sender<Option<LoopExit>>,
) {
    let mut segments_recorded = 0u64;

    loop {
        let (segment_index, target) = {
            let mut state = shared.state.lock().await;
            if cancel.is_cancelled() || state.session.status() != SessionStatus::Active {
                break;
            }
            let target = state.target;
            if let Err(e) = state.session.begin_segment(target.percentage, target.region) {
                warn!(%session_id, error = %e, "cannot begin segment");
                break;
            }
            let Some(index) = state.session.segment_index() else {
                break;
            };
            (index, target)
        };

        let result = shared
            .recorder
            .record(
                session_id,
                segment_index,
                target.percentage,
                target.region,
                shared.display,
                shared.segment_duration,
                &cancel,
            )
            .await;

        match result {
            Ok(segment) => {
                if let Err(e) = shared.state.lock().await.session.complete_segment() {
                    warn!(%session_id, segment_index, error = %e, "segment completed outside a session");
                }
                segments_recorded += 1;

                let finalized_early = segment.finalized_early;
                let path = segment.local_path.clone();
                if let Err(e) = shared.queue.enqueue(segment).await {
                    error!(
                        %session_id,
                        segment_index,
                        path = %path.display(),
                        error = %e,
                        "segment could not be queued for upload; file kept on disk"
                    );
                }

                if finalized_early || cancel.is_cancelled() {
                    break;
                }
            }
            Err(e) => {
                error!(%session_id, segment_index, error = %e, "capture failed, ending session");
                let mut state = shared.state.lock().await;
                let session = std::mem::take(&mut state.session);
                let (idle, failure) = session.fail(e.to_string());
                state.session = idle;
                state.last_failure = failure;
                drop(state);

                let _ = done.send(Some(LoopExit {
                    session_id,
                    segments_recorded,
                    error: Some(e.to_string()),
                }));
                return;
            }
        }
    }

    {
        let mut state = shared.state.lock().await;
        let session = std::mem::take(&mut state.session);
        let target = state.target;
        state.session = match session.stop().and_then(|s| s.finish()) {
            Ok(idle) => idle,
            Err(e) => {
                warn!(%session_id, error = %e, "session was not running at loop exit");
                RecordingSessionState::new(target.percentage, target.region)
            }
        };
    }

    let _ = done.send(Some(LoopExit {
        session_id,
        segments_recorded,
        error: None,
    }));
}
