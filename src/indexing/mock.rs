use super::{
    ExtractJob, ExtractRequest, FileState, IndexingClient, IndexingError, RemoteFile, RemoteVideo,
};
use crate::recording_manager::Segment;
use crate::upload::FailureKind;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use tokio::time::{sleep, Duration};
use uuid::Uuid;

/// Mock indexing service for development and testing
///
/// Nothing leaves the process. Failures can be scripted per stage, which
/// is how the retry paths are exercised without a network.
pub struct MockIndexer {
    /// Simulated network delay per file upload
    delay: Duration,

    /// Number of transient failures each segment's upload sees before succeeding
    transient_failures: u32,

    /// Fail every upload with this kind
    always_fail: Option<FailureKind>,

    /// Number of 503s each file sees when added to a collection
    add_failures: u32,

    /// Status polls answered with `Processing` before a file is ready
    processing_polls: u32,

    /// Fail every extraction with this kind
    extract_failure: Option<FailureKind>,

    state: Mutex<MockState>,
}

#[derive(Default)]
struct MockState {
    attempts: HashMap<Uuid, u32>,
    uploaded: Vec<(Uuid, String)>,
    active: HashSet<Uuid>,
    concurrent: usize,
    max_concurrent: usize,
    overlapping_uploads: usize,
    add_attempts: HashMap<String, u32>,
    polls: HashMap<String, u32>,
    collection: Vec<String>,
    extractions: Vec<String>,
}

impl MockIndexer {
    /// Create a mock indexer with a 100ms simulated delay
    pub fn new() -> Self {
        Self::with_delay(Duration::from_millis(100))
    }

    /// Create a mock indexer with instant responses (no delay)
    pub fn instant() -> Self {
        Self::with_delay(Duration::ZERO)
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            transient_failures: 0,
            always_fail: None,
            add_failures: 0,
            processing_polls: 0,
            extract_failure: None,
            state: Mutex::new(MockState::default()),
        }
    }

    /// Fail the first `n` uploads of every segment with a transient error
    pub fn fail_transiently(mut self, n: u32) -> Self {
        self.transient_failures = n;
        self
    }

    pub fn always_transient(mut self) -> Self {
        self.always_fail = Some(FailureKind::Transient);
        self
    }

    pub fn always_permanent(mut self) -> Self {
        self.always_fail = Some(FailureKind::Permanent);
        self
    }

    /// Answer the first `n` collection adds of every file with a 503
    pub fn fail_collection_add(mut self, n: u32) -> Self {
        self.add_failures = n;
        self
    }

    /// Report every file as processing for its first `n` status polls
    pub fn processing_for(mut self, n: u32) -> Self {
        self.processing_polls = n;
        self
    }

    pub fn fail_extraction(mut self, kind: FailureKind) -> Self {
        self.extract_failure = Some(kind);
        self
    }

    /// Upload attempts seen for `segment_id`
    pub fn attempts_for(&self, segment_id: Uuid) -> u32 {
        self.state
            .lock()
            .map(|s| s.attempts.get(&segment_id).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Remote files created for `segment_id`
    pub fn files_for(&self, segment_id: Uuid) -> usize {
        self.state
            .lock()
            .map(|s| s.uploaded.iter().filter(|(id, _)| *id == segment_id).count())
            .unwrap_or(0)
    }

    /// Segment ids whose file upload succeeded, in completion order
    pub fn uploaded(&self) -> Vec<Uuid> {
        self.state
            .lock()
            .map(|s| s.uploaded.iter().map(|(id, _)| *id).collect())
            .unwrap_or_default()
    }

    /// File ids added to the collection, oldest first
    pub fn collection(&self) -> Vec<String> {
        self.state
            .lock()
            .map(|s| s.collection.clone())
            .unwrap_or_default()
    }

    /// File ids an extraction was started for
    pub fn extractions(&self) -> Vec<String> {
        self.state
            .lock()
            .map(|s| s.extractions.clone())
            .unwrap_or_default()
    }

    /// Times an upload started while the same segment was already uploading
    pub fn overlapping_uploads(&self) -> usize {
        self.state.lock().map(|s| s.overlapping_uploads).unwrap_or(0)
    }

    /// Highest number of uploads in progress at once
    pub fn max_concurrent(&self) -> usize {
        self.state.lock().map(|s| s.max_concurrent).unwrap_or(0)
    }

    fn lock_state(&self) -> Result<std::sync::MutexGuard<'_, MockState>, IndexingError> {
        self.state
            .lock()
            .map_err(|_| IndexingError::permanent("mock indexer state poisoned"))
    }

    fn require_file<'a>(state: &'a MockState, file_id: &str) -> Result<&'a Uuid, IndexingError> {
        state
            .uploaded
            .iter()
            .find(|(_, id)| id == file_id)
            .map(|(segment_id, _)| segment_id)
            .ok_or_else(|| IndexingError::from_status(404, format!("unknown file {}", file_id)))
    }
}

impl Default for MockIndexer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IndexingClient for MockIndexer {
    async fn upload_file(&self, segment: &Segment) -> Result<RemoteFile, IndexingError> {
        {
            let mut state = self.lock_state()?;
            if !state.active.insert(segment.segment_id) {
                state.overlapping_uploads += 1;
            }
            state.concurrent += 1;
            state.max_concurrent = state.max_concurrent.max(state.concurrent);
        }

        // Simulate network delay
        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }

        let mut state = self.lock_state()?;
        state.active.remove(&segment.segment_id);
        state.concurrent -= 1;

        let attempt = {
            let count = state.attempts.entry(segment.segment_id).or_insert(0);
            *count += 1;
            *count
        };

        match self.always_fail {
            Some(FailureKind::Transient) => {
                return Err(IndexingError::from_status(503, "mock service unavailable"))
            }
            Some(FailureKind::Permanent) => {
                return Err(IndexingError::from_status(401, "mock credentials rejected"))
            }
            None => {}
        }
        if attempt <= self.transient_failures {
            return Err(IndexingError::transient(format!(
                "mock connection reset (attempt {})",
                attempt
            )));
        }

        let file_id = format!("mock-file-{}", state.uploaded.len() + 1);
        state.uploaded.push((segment.segment_id, file_id.clone()));

        Ok(RemoteFile {
            uri: Some(format!("mock://files/{}", file_id)),
            file_id,
        })
    }

    async fn file_state(&self, file_id: &str) -> Result<FileState, IndexingError> {
        let mut state = self.lock_state()?;
        Self::require_file(&state, file_id)?;

        let polls = state.polls.entry(file_id.to_string()).or_insert(0);
        *polls += 1;
        if *polls <= self.processing_polls {
            Ok(FileState::Processing)
        } else {
            Ok(FileState::Ready)
        }
    }

    async fn add_to_collection(
        &self,
        _collection_id: &str,
        file_id: &str,
    ) -> Result<(), IndexingError> {
        let mut state = self.lock_state()?;
        Self::require_file(&state, file_id)?;

        let attempts = state.add_attempts.entry(file_id.to_string()).or_insert(0);
        *attempts += 1;
        if *attempts <= self.add_failures {
            return Err(IndexingError::from_status(503, "mock collection busy"));
        }
        if !state.collection.iter().any(|id| id == file_id) {
            state.collection.push(file_id.to_string());
        }
        Ok(())
    }

    async fn extract(
        &self,
        file: &RemoteFile,
        _request: &ExtractRequest,
    ) -> Result<ExtractJob, IndexingError> {
        match self.extract_failure {
            Some(FailureKind::Transient) => {
                return Err(IndexingError::from_status(502, "mock extractor unavailable"))
            }
            Some(FailureKind::Permanent) => {
                return Err(IndexingError::from_status(422, "mock extraction rejected"))
            }
            None => {}
        }

        let mut state = self.lock_state()?;
        Self::require_file(&state, &file.file_id)?;
        state.extractions.push(file.file_id.clone());

        Ok(ExtractJob {
            job_id: format!("mock-job-{}", state.extractions.len()),
            status: "pending".to_string(),
        })
    }

    async fn list_videos(
        &self,
        _collection_id: &str,
        limit: usize,
    ) -> Result<Vec<RemoteVideo>, IndexingError> {
        let state = self.lock_state()?;
        Ok(state
            .collection
            .iter()
            .rev()
            .take(limit)
            .map(|file_id| RemoteVideo {
                file_id: file_id.clone(),
                status: "completed".to_string(),
            })
            .collect())
    }

    async fn get_description(
        &self,
        _collection_id: &str,
        file_id: &str,
    ) -> Result<String, IndexingError> {
        let state = self.lock_state()?;
        if state.collection.iter().any(|id| id == file_id) {
            Ok(format!("Mock description of {}", file_id))
        } else {
            Err(IndexingError::from_status(404, format!("unknown file {}", file_id)))
        }
    }
}
