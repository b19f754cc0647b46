use super::Segment;
use crate::error::{ScreenlogError, ScreenlogResult};
use crate::region::CaptureRegion;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

/// Builder for constructing Segment instances with a fluent API
///
/// `build` checks that the finalized file is actually on disk, so a segment
/// can never be handed to the upload stage without its file.
pub struct SegmentBuilder {
    session_id: Uuid,
    segment_index: Option<u64>,
    local_path: Option<PathBuf>,
    region: Option<CaptureRegion>,
    percentage: u32,
    duration: Duration,
    created_at: Option<DateTime<Utc>>,
    finalized_early: bool,
}

impl SegmentBuilder {
    /// Create a new builder for a segment of `session_id`
    pub fn new(session_id: Uuid) -> Self {
        Self {
            session_id,
            segment_index: None,
            local_path: None,
            region: None,
            percentage: 100,
            duration: Duration::ZERO,
            created_at: None,
            finalized_early: false,
        }
    }

    pub fn segment_index(mut self, index: u64) -> Self {
        self.segment_index = Some(index);
        self
    }

    pub fn local_path(mut self, path: PathBuf) -> Self {
        self.local_path = Some(path);
        self
    }

    pub fn region(mut self, region: CaptureRegion) -> Self {
        self.region = Some(region);
        self
    }

    pub fn percentage(mut self, percentage: u32) -> Self {
        self.percentage = percentage;
        self
    }

    pub fn duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    pub fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }

    pub fn finalized_early(mut self, early: bool) -> Self {
        self.finalized_early = early;
        self
    }

    /// Build the Segment instance
    ///
    /// # Errors
    /// Returns `Internal` if required fields are missing, and `CaptureError`
    /// if the finalized file does not exist.
    pub fn build(self) -> ScreenlogResult<Segment> {
        let segment_index = self
            .segment_index
            .ok_or_else(|| ScreenlogError::Internal("segment_index is required".to_string()))?;
        let local_path = self
            .local_path
            .ok_or_else(|| ScreenlogError::Internal("local_path is required".to_string()))?;
        let region = self
            .region
            .ok_or_else(|| ScreenlogError::Internal("region is required".to_string()))?;

        if !local_path.is_file() {
            return Err(ScreenlogError::CaptureError(format!(
                "segment file missing after finalize: {}",
                local_path.display()
            )));
        }

        Ok(Segment {
            segment_id: Uuid::new_v4(),
            session_id: self.session_id,
            segment_index,
            local_path,
            duration_secs: self.duration.as_secs_f64(),
            region,
            percentage: self.percentage,
            created_at: self.created_at.unwrap_or_else(Utc::now),
            finalized_early: self.finalized_early,
        })
    }
}
