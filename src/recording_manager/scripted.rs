use super::{CaptureBackend, CaptureHandle, CaptureRequest};
use crate::error::{ScreenlogError, ScreenlogResult};
use crate::region::DisplayGeometry;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

pub(crate) const HEADER: &[u8] = b"SCREENLOG-SCRIPTED-SEGMENT\n";
pub(crate) const TRAILER: &[u8] = b"\nEND\n";

/// Scripted capture backend for development and testing
///
/// Writes placeholder bytes instead of video. It can be told to refuse the
/// capture primitive, to die in the middle of a given segment or to fail
/// while finalizing one, which is how tests exercise the fatal capture paths.
pub struct ScriptedCapture {
    display: DisplayGeometry,
    fail_open: Option<String>,
    die_at: Option<(u64, String)>,
    fail_finalize: Option<(u64, String)>,
    die_after: Duration,
    counters: Arc<Counters>,
}

#[derive(Default)]
struct Counters {
    opened: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedCapture {
    pub fn new(display: DisplayGeometry) -> Self {
        Self {
            display,
            fail_open: None,
            die_at: None,
            fail_finalize: None,
            die_after: Duration::from_millis(10),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Refuse every open, as when no display or permission is available
    pub fn fail_on_open(mut self, reason: impl Into<String>) -> Self {
        self.fail_open = Some(reason.into());
        self
    }

    /// Die shortly after opening segment `index`
    pub fn die_at_segment(mut self, index: u64, reason: impl Into<String>) -> Self {
        self.die_at = Some((index, reason.into()));
        self
    }

    /// Fail the finalize of segment `index` after part of the trailer is written
    pub fn fail_finalize_at(mut self, index: u64, reason: impl Into<String>) -> Self {
        self.fail_finalize = Some((index, reason.into()));
        self
    }

    /// Number of captures opened so far
    pub fn opened(&self) -> usize {
        self.counters.opened.load(Ordering::SeqCst)
    }

    /// Highest number of captures that were open at the same time
    pub fn max_in_flight(&self) -> usize {
        self.counters.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CaptureBackend for ScriptedCapture {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn display_geometry(&self) -> ScreenlogResult<DisplayGeometry> {
        Ok(self.display)
    }

    async fn open(&self, request: &CaptureRequest) -> ScreenlogResult<Box<dyn CaptureHandle>> {
        if let Some(reason) = &self.fail_open {
            return Err(ScreenlogError::CaptureError(reason.clone()));
        }

        let mut file = File::create(&request.output_path).await.map_err(|e| {
            ScreenlogError::CaptureError(format!(
                "cannot create {}: {}",
                request.output_path.display(),
                e
            ))
        })?;
        file.write_all(HEADER).await?;
        file.write_all(request.region.to_string().as_bytes()).await?;

        self.counters.opened.fetch_add(1, Ordering::SeqCst);
        let now = self.counters.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let die = match &self.die_at {
            Some((index, reason)) if *index == request.segment_index => Some(reason.clone()),
            _ => None,
        };
        let finalize_error = match &self.fail_finalize {
            Some((index, reason)) if *index == request.segment_index => Some(reason.clone()),
            _ => None,
        };

        Ok(Box::new(ScriptedHandle {
            file: Some(file),
            die,
            finalize_error,
            die_after: self.die_after,
            counters: self.counters.clone(),
        }))
    }
}

struct ScriptedHandle {
    file: Option<File>,
    die: Option<String>,
    finalize_error: Option<String>,
    die_after: Duration,
    counters: Arc<Counters>,
}

#[async_trait]
impl CaptureHandle for ScriptedHandle {
    async fn terminated(&mut self) -> ScreenlogError {
        match &self.die {
            Some(reason) => {
                tokio::time::sleep(self.die_after).await;
                ScreenlogError::CaptureError(reason.clone())
            }
            None => std::future::pending().await,
        }
    }

    async fn finalize(mut self: Box<Self>) -> ScreenlogResult<()> {
        if let Some(mut file) = self.file.take() {
            if let Some(reason) = self.finalize_error.take() {
                file.write_all(&TRAILER[..1]).await?;
                return Err(ScreenlogError::CaptureError(reason));
            }
            file.write_all(TRAILER).await?;
            file.flush().await?;
            file.sync_all().await?;
        }
        Ok(())
    }
}

impl Drop for ScriptedHandle {
    fn drop(&mut self) {
        self.counters.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::CaptureRegion;
    use tempfile::TempDir;
    use uuid::Uuid;

    fn request(dir: &TempDir, index: u64) -> CaptureRequest {
        let display = DisplayGeometry::default();
        CaptureRequest {
            session_id: Uuid::new_v4(),
            segment_index: index,
            region: CaptureRegion::full(display),
            display,
            output_path: dir.path().join(format!("segment_{}.mp4", index)),
        }
    }

    #[tokio::test]
    async fn test_open_and_finalize_writes_file() {
        let dir = TempDir::new().unwrap();
        let backend = ScriptedCapture::new(DisplayGeometry::default());
        let req = request(&dir, 0);

        let handle = backend.open(&req).await.unwrap();
        assert_eq!(backend.opened(), 1);
        handle.finalize().await.unwrap();

        let bytes = std::fs::read(&req.output_path).unwrap();
        assert!(bytes.starts_with(HEADER));
        assert!(bytes.ends_with(TRAILER));
        assert_eq!(backend.max_in_flight(), 1);
    }

    #[tokio::test]
    async fn test_fail_on_open() {
        let dir = TempDir::new().unwrap();
        let backend = ScriptedCapture::new(DisplayGeometry::default()).fail_on_open("denied");

        let result = backend.open(&request(&dir, 0)).await;

        assert!(matches!(result, Err(ScreenlogError::CaptureError(msg)) if msg == "denied"));
        assert_eq!(backend.opened(), 0);
    }

    #[tokio::test]
    async fn test_die_only_at_scripted_segment() {
        let dir = TempDir::new().unwrap();
        let backend = ScriptedCapture::new(DisplayGeometry::default()).die_at_segment(1, "gone");

        let mut healthy = backend.open(&request(&dir, 0)).await.unwrap();
        let still_running =
            tokio::time::timeout(Duration::from_millis(30), healthy.terminated()).await;
        assert!(still_running.is_err());

        let mut dying = backend.open(&request(&dir, 1)).await.unwrap();
        let err = dying.terminated().await;
        assert!(err.to_string().contains("gone"));
    }

    #[tokio::test]
    async fn test_finalize_failure_only_at_scripted_segment() {
        let dir = TempDir::new().unwrap();
        let backend =
            ScriptedCapture::new(DisplayGeometry::default()).fail_finalize_at(1, "disk full");

        let first = request(&dir, 0);
        backend.open(&first).await.unwrap().finalize().await.unwrap();
        assert!(std::fs::read(&first.output_path).unwrap().ends_with(TRAILER));

        let second = request(&dir, 1);
        let err = backend
            .open(&second)
            .await
            .unwrap()
            .finalize()
            .await
            .unwrap_err();
        assert!(matches!(err, ScreenlogError::CaptureError(msg) if msg == "disk full"));
        assert!(!std::fs::read(&second.output_path).unwrap().ends_with(TRAILER));
    }
}
