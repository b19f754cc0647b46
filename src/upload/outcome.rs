use super::retry::FailureKind;
use crate::error::ScreenlogResult;
use crate::recording_manager::Segment;
use crate::region::CaptureRegion;
use crate::repository::OutcomeRepository;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    Pending,
    Uploaded,
    Failed,
}

/// What happened to one enqueued segment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadOutcome {
    pub segment_id: Uuid,
    pub session_id: Uuid,
    pub segment_index: u64,
    pub local_path: PathBuf,
    pub region: CaptureRegion,
    pub percentage: u32,
    pub duration_secs: f64,
    pub remote_file_id: Option<String>,
    pub status: UploadStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub failure_kind: Option<FailureKind>,
    pub enqueued_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl UploadOutcome {
    pub fn pending(segment: &Segment) -> Self {
        Self {
            segment_id: segment.segment_id,
            session_id: segment.session_id,
            segment_index: segment.segment_index,
            local_path: segment.local_path.clone(),
            region: segment.region,
            percentage: segment.percentage,
            duration_secs: segment.duration_secs,
            remote_file_id: None,
            status: UploadStatus::Pending,
            attempts: 0,
            last_error: None,
            failure_kind: None,
            enqueued_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status != UploadStatus::Pending
    }

    #[cfg(test)]
    pub(crate) fn sample(segment_index: u64) -> Self {
        use crate::region::DisplayGeometry;

        Self {
            segment_id: Uuid::new_v4(),
            session_id: Uuid::new_v4(),
            segment_index,
            local_path: PathBuf::from(format!("/tmp/segment_{}.mp4", segment_index)),
            region: CaptureRegion::full(DisplayGeometry::default()),
            percentage: 100,
            duration_secs: 60.0,
            remote_file_id: None,
            status: UploadStatus::Pending,
            attempts: 0,
            last_error: None,
            failure_kind: None,
            enqueued_at: Utc::now(),
            completed_at: None,
        }
    }
}

/// Numbered snapshots written through to a repository
///
/// Saves run on the blocking pool and may finish out of order; a snapshot
/// older than the last one written is dropped.
struct Persistence {
    repository: Arc<dyn OutcomeRepository>,
    generation: AtomicU64,
    written: Mutex<u64>,
}

impl Persistence {
    fn save(&self, generation: u64, snapshot: &[UploadOutcome]) {
        let Ok(mut written) = self.written.lock() else {
            return;
        };
        if *written >= generation {
            return;
        }
        match self.repository.save_outcomes(snapshot) {
            Ok(()) => *written = generation,
            Err(e) => warn!(error = %e, "failed to persist upload history"),
        }
    }
}

/// Bounded, enqueue-ordered history of upload outcomes
///
/// Holds at most `capacity` entries and evicts the oldest first. When a
/// repository is attached the whole log is saved whenever an entry is added
/// or changes state; a failed save is logged and otherwise ignored.
pub struct OutcomeLog {
    entries: Mutex<VecDeque<UploadOutcome>>,
    capacity: usize,
    persistence: Option<Arc<Persistence>>,
}

impl OutcomeLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            persistence: None,
        }
    }

    /// Restore history from `repository` and keep saving to it
    ///
    /// Entries still Pending were interrupted by a previous shutdown and are
    /// restored as Failed; their files are still on disk.
    pub fn with_repository(
        capacity: usize,
        repository: Arc<dyn OutcomeRepository>,
    ) -> ScreenlogResult<Self> {
        let mut restored = repository.load_outcomes()?;
        let mut interrupted = 0usize;
        for outcome in restored
            .iter_mut()
            .filter(|o| o.status == UploadStatus::Pending)
        {
            outcome.status = UploadStatus::Failed;
            outcome.last_error =
                Some("interrupted by shutdown before upload completed".to_string());
            outcome.completed_at = Some(Utc::now());
            interrupted += 1;
        }

        let mut log = Self::new(capacity);
        let skip = restored.len().saturating_sub(log.capacity);
        log.entries = Mutex::new(restored.into_iter().skip(skip).collect());
        log.persistence = Some(Arc::new(Persistence {
            repository,
            generation: AtomicU64::new(0),
            written: Mutex::new(0),
        }));

        info!(
            restored = log.len(),
            interrupted, "upload history restored"
        );
        Ok(log)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append a Pending entry for a newly enqueued segment
    pub fn push_pending(&self, segment: &Segment) -> ScreenlogResult<()> {
        {
            let mut entries = self.entries.lock()?;
            if entries.len() == self.capacity {
                entries.pop_front();
            }
            entries.push_back(UploadOutcome::pending(segment));
        }
        self.persist();
        Ok(())
    }

    /// Count a new attempt and return the running total
    pub fn record_attempt(&self, segment_id: Uuid) -> ScreenlogResult<u32> {
        Ok(self
            .update(segment_id, |o| {
                o.attempts += 1;
                o.attempts
            })?
            .unwrap_or(0))
    }

    /// Remember a failed attempt that will be retried
    pub fn record_error(
        &self,
        segment_id: Uuid,
        error: &str,
        kind: FailureKind,
    ) -> ScreenlogResult<()> {
        self.update(segment_id, |o| {
            o.last_error = Some(error.to_string());
            o.failure_kind = Some(kind);
        })?;
        Ok(())
    }

    /// Remember the remote file once the service has accepted it
    pub fn record_remote(&self, segment_id: Uuid, remote_file_id: &str) -> ScreenlogResult<()> {
        self.update(segment_id, |o| {
            o.remote_file_id = Some(remote_file_id.to_string());
        })?;
        self.persist();
        Ok(())
    }

    pub fn mark_uploaded(&self, segment_id: Uuid, remote_file_id: &str) -> ScreenlogResult<()> {
        self.update(segment_id, |o| {
            o.status = UploadStatus::Uploaded;
            o.remote_file_id = Some(remote_file_id.to_string());
            o.completed_at = Some(Utc::now());
        })?;
        self.persist();
        Ok(())
    }

    pub fn mark_failed(
        &self,
        segment_id: Uuid,
        error: &str,
        kind: FailureKind,
    ) -> ScreenlogResult<()> {
        self.update(segment_id, |o| {
            o.status = UploadStatus::Failed;
            o.last_error = Some(error.to_string());
            o.failure_kind = Some(kind);
            o.completed_at = Some(Utc::now());
        })?;
        self.persist();
        Ok(())
    }

    pub fn get(&self, segment_id: Uuid) -> Option<UploadOutcome> {
        let entries = self.entries.lock().ok()?;
        entries.iter().find(|o| o.segment_id == segment_id).cloned()
    }

    /// Up to `n` outcomes, newest enqueue first
    pub fn recent(&self, n: usize) -> Vec<UploadOutcome> {
        match self.entries.lock() {
            Ok(entries) => entries.iter().rev().take(n).cloned().collect(),
            Err(_) => Vec::new(),
        }
    }

    fn update<R>(
        &self,
        segment_id: Uuid,
        f: impl FnOnce(&mut UploadOutcome) -> R,
    ) -> ScreenlogResult<Option<R>> {
        let mut entries = self.entries.lock()?;
        // Newest entries are at the back and most likely to be updated
        Ok(entries
            .iter_mut()
            .rev()
            .find(|o| o.segment_id == segment_id)
            .map(f))
    }

    /// Write the current log and wait for it to land
    pub async fn flush(&self) {
        let Some((persistence, generation, snapshot)) = self.snapshot() else {
            return;
        };
        let result =
            tokio::task::spawn_blocking(move || persistence.save(generation, &snapshot)).await;
        if let Err(e) = result {
            warn!(error = %e, "upload history flush did not complete");
        }
    }

    fn snapshot(&self) -> Option<(Arc<Persistence>, u64, Vec<UploadOutcome>)> {
        let persistence = self.persistence.as_ref()?;
        let entries = self.entries.lock().ok()?;
        // Numbered under the entries lock so a later number never holds older data
        let generation = persistence.generation.fetch_add(1, Ordering::SeqCst) + 1;
        Some((
            persistence.clone(),
            generation,
            entries.iter().cloned().collect(),
        ))
    }

    fn persist(&self) {
        let Some((persistence, generation, snapshot)) = self.snapshot() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || persistence.save(generation, &snapshot));
            }
            Err(_) => {
                debug!("no runtime, saving upload history inline");
                persistence.save(generation, &snapshot);
            }
        }
    }
}
