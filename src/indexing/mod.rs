pub mod factory;
pub mod http;
pub mod mock;

pub use factory::IndexerFactory;
pub use http::HttpIndexingClient;
pub use mock::MockIndexer;

use crate::error::ScreenlogError;
use crate::recording_manager::Segment;
use crate::upload::FailureKind;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

/// Prompt used for the structured extraction of every segment
pub const DEFAULT_EXTRACT_PROMPT: &str = "Extract programs and websites that appear on screen";

/// A file accepted by the indexing service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFile {
    pub file_id: String,
    pub uri: Option<String>,
}

/// A video registered in a remote collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteVideo {
    pub file_id: String,
    pub status: String,
}

/// Processing state of an uploaded file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileState {
    Processing,
    Ready,
    Failed(String),
}

/// Structured extraction requested for an indexed file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractRequest {
    pub prompt: String,
    pub schema: Value,
}

impl Default for ExtractRequest {
    /// Programs and websites visible on screen
    fn default() -> Self {
        Self {
            prompt: DEFAULT_EXTRACT_PROMPT.to_string(),
            schema: json!({
                "programs": {
                    "name": "<string>",
                    "applicationType": "<string>",
                },
                "websites": {
                    "name": "<string>",
                    "url": "<string>",
                    "description": "<string>",
                },
            }),
        }
    }
}

/// An extraction job started by the service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractJob {
    pub job_id: String,
    pub status: String,
}

/// Failure reported by an indexing client, already classified
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct IndexingError {
    pub kind: FailureKind,
    /// HTTP status, when the service answered
    pub status: Option<u16>,
    pub message: String,
}

impl IndexingError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Transient,
            status: None,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Permanent,
            status: None,
            message: message.into(),
        }
    }

    /// Classify by HTTP status
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        Self {
            kind: crate::upload::classify_status(status),
            status: Some(status),
            message: format!("HTTP {}: {}", status, message.into()),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind == FailureKind::Transient
    }

    /// Prefix the message with the stage that failed
    pub fn in_stage(mut self, stage: &str) -> Self {
        self.message = format!("{}: {}", stage, self.message);
        self
    }
}

/// Errors from read-only queries against the service
impl From<IndexingError> for ScreenlogError {
    fn from(err: IndexingError) -> Self {
        match (err.status, err.kind) {
            (Some(404), _) => ScreenlogError::NotFound(err.message),
            (_, FailureKind::Transient) => ScreenlogError::IndexingUnavailable(err.message),
            (_, FailureKind::Permanent) => ScreenlogError::IndexingRejected(err.message),
        }
    }
}

/// Client for the remote video indexing service
///
/// Indexing a segment is split into stages so a retry can resume after the
/// last stage that succeeded instead of uploading the file again.
#[async_trait]
pub trait IndexingClient: Send + Sync {
    /// Upload the segment file
    async fn upload_file(&self, segment: &Segment) -> Result<RemoteFile, IndexingError>;

    /// Current processing state of an uploaded file
    async fn file_state(&self, file_id: &str) -> Result<FileState, IndexingError>;

    /// Register an uploaded file in `collection_id`
    async fn add_to_collection(
        &self,
        collection_id: &str,
        file_id: &str,
    ) -> Result<(), IndexingError>;

    /// Start a structured extraction over an uploaded file
    async fn extract(
        &self,
        file: &RemoteFile,
        request: &ExtractRequest,
    ) -> Result<ExtractJob, IndexingError>;

    /// List videos in a collection, newest first
    async fn list_videos(
        &self,
        collection_id: &str,
        limit: usize,
    ) -> Result<Vec<RemoteVideo>, IndexingError>;

    /// Fetch the generated description of an indexed video
    async fn get_description(
        &self,
        collection_id: &str,
        file_id: &str,
    ) -> Result<String, IndexingError>;

    /// Upload the segment file and add it to `collection_id` in one go
    ///
    /// Nothing is resumed on failure; the upload queue drives the stages
    /// itself.
    async fn upload_and_index(
        &self,
        segment: &Segment,
        collection_id: &str,
    ) -> Result<RemoteFile, IndexingError> {
        let remote = self.upload_file(segment).await?;
        self.add_to_collection(collection_id, &remote.file_id).await?;
        Ok(remote)
    }
}
