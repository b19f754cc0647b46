use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Central error type for screenlog
#[derive(Error, Debug)]
pub enum ScreenlogError {
    // ============================================================================
    // Configuration Errors
    // ============================================================================
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    // ============================================================================
    // Session Errors
    // ============================================================================
    #[error("A recording session is already active")]
    AlreadyRecording,

    #[error("No active recording session")]
    NotRecording,

    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),

    // ============================================================================
    // Capture Errors
    // ============================================================================
    #[error("Capture error: {0}")]
    CaptureError(String),

    // ============================================================================
    // Upload Errors
    // ============================================================================
    #[error("Segment {0} is already queued or uploading")]
    DuplicateSegment(String),

    #[error("Upload queue is closed")]
    QueueClosed,

    // ============================================================================
    // Indexing Service Errors
    // ============================================================================
    #[error("Indexing service unavailable: {0}")]
    IndexingUnavailable(String),

    #[error("Indexing service rejected the request: {0}")]
    IndexingRejected(String),

    #[error("Not found: {0}")]
    NotFound(String),

    // ============================================================================
    // Storage Errors
    // ============================================================================
    #[error("Failed to save to storage: {0}")]
    StorageSaveFailed(String),

    #[error("Failed to load from storage: {0}")]
    StorageLoadFailed(String),

    // ============================================================================
    // Generic/System Errors
    // ============================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Mutex lock error")]
    LockError,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ScreenlogError {
    /// Stable machine-readable tag reported by the control surface
    pub fn tag(&self) -> &'static str {
        match self {
            Self::InvalidConfiguration(_) => "invalid_configuration",
            Self::AlreadyRecording => "already_recording",
            Self::NotRecording => "not_recording",
            Self::InvalidStateTransition(_) => "invalid_state_transition",
            Self::CaptureError(_) => "capture_error",
            Self::DuplicateSegment(_) => "duplicate_segment",
            Self::QueueClosed => "queue_closed",
            Self::IndexingUnavailable(_) => "indexing_unavailable",
            Self::IndexingRejected(_) => "indexing_rejected",
            Self::NotFound(_) => "not_found",
            Self::StorageSaveFailed(_)
            | Self::StorageLoadFailed(_)
            | Self::Io(_)
            | Self::Json(_)
            | Self::LockError
            | Self::Internal(_) => "internal",
        }
    }

    /// HTTP status used when the error crosses the control surface
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidConfiguration(_) => StatusCode::BAD_REQUEST,
            Self::AlreadyRecording
            | Self::NotRecording
            | Self::InvalidStateTransition(_)
            | Self::DuplicateSegment(_) => StatusCode::CONFLICT,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::IndexingUnavailable(_) | Self::IndexingRejected(_) => StatusCode::BAD_GATEWAY,
            Self::QueueClosed => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

// Implement conversion from PoisonError for Mutex locks
impl<T> From<std::sync::PoisonError<T>> for ScreenlogError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        ScreenlogError::LockError
    }
}

impl IntoResponse for ScreenlogError {
    fn into_response(self) -> Response {
        let body = json!({
            "status": "error",
            "error": self.tag(),
            "message": self.to_string(),
        });
        (self.status_code(), Json(body)).into_response()
    }
}

// Helper type alias for Results
pub type ScreenlogResult<T> = Result<T, ScreenlogError>;
