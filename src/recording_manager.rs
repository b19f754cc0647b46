use crate::config::{CaptureBackendKind, CaptureConfig};
use crate::error::{ScreenlogError, ScreenlogResult};
use crate::region::{CaptureRegion, DisplayGeometry};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

mod builder;
mod ffmpeg;
mod scripted;

pub use builder::SegmentBuilder;
pub use ffmpeg::FfmpegCapture;
pub use scripted::ScriptedCapture;

/// One finished, closed slice of recorded screen video
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub segment_id: Uuid,
    pub session_id: Uuid,
    pub segment_index: u64,
    pub local_path: PathBuf,
    /// Wall-clock length of the capture window in seconds
    pub duration_secs: f64,
    pub region: CaptureRegion,
    pub percentage: u32,
    pub created_at: DateTime<Utc>,
    /// True when the segment was cut short by a stop request
    pub finalized_early: bool,
}

/// Naming of segment files on disk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentNaming {
    /// Filename pattern with {session}, {index} and {timestamp} placeholders
    pub filename_pattern: String,
    pub extension: String,
}

impl Default for SegmentNaming {
    fn default() -> Self {
        Self {
            filename_pattern: "screenlog_{session}_{index}_{timestamp}".to_string(),
            extension: "mp4".to_string(),
        }
    }
}

impl SegmentNaming {
    /// Generate output filename (without extension)
    pub fn generate_filename(
        &self,
        session_id: Uuid,
        segment_index: u64,
        timestamp: DateTime<Utc>,
    ) -> String {
        let timestamp_str = timestamp.format("%Y%m%d_%H%M%S").to_string();
        let session = session_id.simple().to_string();
        self.filename_pattern
            .replace("{session}", &session[..8])
            .replace("{index}", &format!("{:05}", segment_index))
            .replace("{timestamp}", &timestamp_str)
    }

    /// Get the full output path for a segment
    pub fn output_path(
        &self,
        dir: &Path,
        session_id: Uuid,
        segment_index: u64,
        timestamp: DateTime<Utc>,
    ) -> PathBuf {
        let filename = format!(
            "{}.{}",
            self.generate_filename(session_id, segment_index, timestamp),
            self.extension
        );
        dir.join(filename)
    }
}

/// Everything a capture backend needs to open one segment
#[derive(Debug, Clone)]
pub struct CaptureRequest {
    pub session_id: Uuid,
    pub segment_index: u64,
    pub region: CaptureRegion,
    pub display: DisplayGeometry,
    pub output_path: PathBuf,
}

/// The OS screen-capture primitive
#[async_trait]
pub trait CaptureBackend: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Geometry of the display being captured
    async fn display_geometry(&self) -> ScreenlogResult<DisplayGeometry>;

    /// Acquire the primitive and start writing `request.output_path`
    ///
    /// Fails with `CaptureError` when the primitive cannot be acquired.
    async fn open(&self, request: &CaptureRequest) -> ScreenlogResult<Box<dyn CaptureHandle>>;
}

/// A capture in progress
#[async_trait]
pub trait CaptureHandle: Send {
    /// Resolves only if the capture dies before it is finalized
    async fn terminated(&mut self) -> ScreenlogError;

    /// Flush buffers and close the output file
    async fn finalize(self: Box<Self>) -> ScreenlogResult<()>;
}

/// Records one bounded segment at a time through a capture backend
pub struct SegmentRecorder {
    backend: Arc<dyn CaptureBackend>,
    naming: SegmentNaming,
    output_dir: PathBuf,
}

impl SegmentRecorder {
    pub fn new(backend: Arc<dyn CaptureBackend>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            backend,
            naming: SegmentNaming::default(),
            output_dir: output_dir.into(),
        }
    }

    pub fn with_naming(mut self, naming: SegmentNaming) -> Self {
        self.naming = naming;
        self
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub async fn display_geometry(&self) -> ScreenlogResult<DisplayGeometry> {
        self.backend.display_geometry().await
    }

    /// Record a single segment
    ///
    /// Returns once `max_duration` elapses or `early_stop` fires; either way the
    /// file is finalized before the segment is returned.
    #[allow(clippy::too_many_arguments)]
    pub async fn record(
        &self,
        session_id: Uuid,
        segment_index: u64,
        percentage: u32,
        region: CaptureRegion,
        display: DisplayGeometry,
        max_duration: Duration,
        early_stop: &CancellationToken,
    ) -> ScreenlogResult<Segment> {
        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|e| {
                ScreenlogError::CaptureError(format!(
                    "cannot create output directory {}: {}",
                    self.output_dir.display(),
                    e
                ))
            })?;

        let created_at = Utc::now();
        let output_path =
            self.naming
                .output_path(&self.output_dir, session_id, segment_index, created_at);
        let request = CaptureRequest {
            session_id,
            segment_index,
            region,
            display,
            output_path: output_path.clone(),
        };

        debug!(
            %session_id,
            segment_index,
            backend = self.backend.name(),
            path = %output_path.display(),
            "opening capture"
        );

        let started = Instant::now();
        let mut handle = self.backend.open(&request).await?;

        let finalized_early = tokio::select! {
            _ = tokio::time::sleep(max_duration) => false,
            _ = early_stop.cancelled() => true,
            err = handle.terminated() => {
                warn!(%session_id, segment_index, error = %err, "capture terminated mid-segment");
                drop(handle);
                discard_partial(&output_path).await;
                return Err(err);
            }
        };

        if let Err(err) = handle.finalize().await {
            warn!(%session_id, segment_index, error = %err, "segment could not be finalized");
            discard_partial(&output_path).await;
            return Err(err);
        }
        let duration = started.elapsed();

        let segment = SegmentBuilder::new(session_id)
            .segment_index(segment_index)
            .local_path(output_path)
            .region(region)
            .percentage(percentage)
            .duration(duration)
            .created_at(created_at)
            .finalized_early(finalized_early)
            .build()?;

        info!(
            %session_id,
            segment_index,
            segment_id = %segment.segment_id,
            duration_secs = segment.duration_secs,
            early = finalized_early,
            "segment finalized"
        );

        Ok(segment)
    }
}

async fn discard_partial(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        debug!(path = %path.display(), error = %e, "no partial segment to remove");
    }
}

/// Create the capture backend selected by configuration
pub fn create_capture_backend(config: &CaptureConfig) -> Arc<dyn CaptureBackend> {
    match config.backend {
        CaptureBackendKind::Ffmpeg => Arc::new(FfmpegCapture::from_config(config)),
        CaptureBackendKind::Scripted => Arc::new(ScriptedCapture::new(config.display)),
    }
}
