use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{header, Request, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use screenlog_lib::config::UploadConfig;
use screenlog_lib::controller::SessionController;
use screenlog_lib::error::ScreenlogError;
use screenlog_lib::indexing::{
    ExtractJob, ExtractRequest, FileState, HttpIndexingClient, IndexingClient, IndexingError,
    MockIndexer, RemoteFile, RemoteVideo,
};
use screenlog_lib::recording_manager::{ScriptedCapture, Segment, SegmentRecorder};
use screenlog_lib::region::{self, CaptureRegion, DisplayGeometry};
use screenlog_lib::server::{self, AppState};
use screenlog_lib::state_machine::SessionStatus;
use screenlog_lib::upload::{OutcomeLog, UploadOutcome, UploadQueue, UploadStatus};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tower::ServiceExt;
use uuid::Uuid;

fn upload_config() -> UploadConfig {
    UploadConfig {
        max_attempts: 3,
        backoff_base_ms: 1,
        backoff_max_ms: 4,
        workers: 2,
        queue_capacity: 8,
        history_capacity: 100,
        status_poll_ms: 1,
        ..UploadConfig::default()
    }
}

struct Harness {
    _dir: TempDir,
    controller: SessionController,
    queue: UploadQueue,
    mock: Arc<MockIndexer>,
}

async fn harness(backend: ScriptedCapture, mock: MockIndexer, segment: Duration) -> Harness {
    harness_with(upload_config(), backend, mock, segment).await
}

async fn harness_with(
    config: UploadConfig,
    backend: ScriptedCapture,
    mock: MockIndexer,
    segment: Duration,
) -> Harness {
    let dir = TempDir::new().unwrap();
    let mock = Arc::new(mock);
    let recorder = SegmentRecorder::new(Arc::new(backend), dir.path());
    let queue = UploadQueue::start(
        &config,
        "test-collection",
        mock.clone(),
        Arc::new(OutcomeLog::new(100)),
    );
    let controller = SessionController::new(recorder, queue.clone(), 100, segment)
        .await
        .unwrap();

    Harness {
        _dir: dir,
        controller,
        queue,
        mock,
    }
}

fn display() -> DisplayGeometry {
    DisplayGeometry::default()
}

/// Outcomes of one session ordered by segment index
fn session_outcomes(queue: &UploadQueue, session_id: Uuid) -> Vec<UploadOutcome> {
    let mut outcomes: Vec<UploadOutcome> = queue
        .list_recent(1000)
        .into_iter()
        .filter(|o| o.session_id == session_id)
        .collect();
    outcomes.sort_by_key(|o| o.segment_index);
    outcomes
}

fn segment_file(dir: &TempDir, index: u64) -> Segment {
    let local_path = dir.path().join(format!("segment_{:05}.mp4", index));
    std::fs::write(&local_path, b"segment bytes").unwrap();
    Segment {
        segment_id: Uuid::new_v4(),
        session_id: Uuid::new_v4(),
        segment_index: index,
        local_path,
        duration_secs: 60.0,
        region: CaptureRegion::full(display()),
        percentage: 100,
        created_at: Utc::now(),
        finalized_early: false,
    }
}

// ============================================================================
// Session lifecycle
// ============================================================================

#[tokio::test]
async fn test_double_start_keeps_existing_session() {
    let h = harness(
        ScriptedCapture::new(display()),
        MockIndexer::instant(),
        Duration::from_millis(200),
    )
    .await;

    let first = h.controller.start(Some(50)).await.unwrap();
    let err = h.controller.start(Some(10)).await.unwrap_err();

    assert!(matches!(err, ScreenlogError::AlreadyRecording));
    let status = h.controller.status().await;
    assert_eq!(status.status, SessionStatus::Active);
    assert_eq!(status.session_id, first.session_id);
    assert_eq!(status.target.percentage, 50);

    h.controller.stop().await.unwrap();
}

#[tokio::test]
async fn test_stop_while_idle_is_not_recording() {
    let h = harness(
        ScriptedCapture::new(display()),
        MockIndexer::instant(),
        Duration::from_millis(200),
    )
    .await;

    let err = h.controller.stop().await.unwrap_err();

    assert!(matches!(err, ScreenlogError::NotRecording));
    assert_eq!(h.controller.status().await.status, SessionStatus::Idle);
}

#[tokio::test]
async fn test_segments_are_contiguous_with_one_partial_tail() {
    let h = harness(
        ScriptedCapture::new(display()),
        MockIndexer::instant(),
        Duration::from_millis(200),
    )
    .await;

    let session_id = h.controller.start(None).await.unwrap().session_id.unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;
    let summary = h.controller.stop().await.unwrap();
    h.queue.shutdown().await;

    assert_eq!(summary.session_id, session_id);
    assert!(summary.last_error.is_none());
    assert_eq!(h.controller.status().await.status, SessionStatus::Idle);

    let outcomes = session_outcomes(&h.queue, session_id);
    assert_eq!(outcomes.len() as u64, summary.segments_recorded);
    assert!(outcomes.len() >= 3, "expected 2 full + 1 partial segments");

    for (expected, outcome) in outcomes.iter().enumerate() {
        assert_eq!(outcome.segment_index, expected as u64);
        assert_eq!(outcome.status, UploadStatus::Uploaded);
    }

    let (last, full) = outcomes.split_last().unwrap();
    assert!(full.iter().all(|o| o.duration_secs >= 0.19));
    assert!(last.duration_secs < 0.2);
}

#[tokio::test]
async fn test_set_percentage_applies_at_next_segment() {
    let h = harness(
        ScriptedCapture::new(display()),
        MockIndexer::instant(),
        Duration::from_millis(300),
    )
    .await;

    let session_id = h.controller.start(Some(100)).await.unwrap().session_id.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let target = h.controller.set_percentage(25).await.unwrap();
    let status = h.controller.status().await;
    assert_eq!(status.current_region, Some(CaptureRegion::full(display())));
    assert_eq!(status.target.region, target.region);

    tokio::time::sleep(Duration::from_millis(350)).await;
    h.controller.stop().await.unwrap();
    h.queue.shutdown().await;

    let outcomes = session_outcomes(&h.queue, session_id);
    assert!(outcomes.len() >= 2);
    assert_eq!(outcomes[0].region, CaptureRegion::full(display()));
    assert_eq!(outcomes[0].percentage, 100);
    assert_eq!(outcomes[1].region, region::compute(25, display()).unwrap());
    assert_eq!(outcomes[1].percentage, 25);
}

#[tokio::test]
async fn test_capture_failure_returns_to_idle() {
    let backend = ScriptedCapture::new(display()).die_at_segment(1, "display disconnected");
    let h = harness(backend, MockIndexer::instant(), Duration::from_millis(50)).await;

    let session_id = h.controller.start(None).await.unwrap().session_id.unwrap();
    tokio::time::sleep(Duration::from_millis(250)).await;

    let status = h.controller.status().await;
    assert_eq!(status.status, SessionStatus::Idle);
    let failure = status.last_error.expect("failure should be reported");
    assert_eq!(failure.session_id, session_id);
    assert_eq!(failure.segment_index, 1);
    assert!(failure.error.contains("display disconnected"));

    let err = h.controller.stop().await.unwrap_err();
    assert!(matches!(err, ScreenlogError::NotRecording));

    // A new start clears the previous failure
    h.controller.start(None).await.unwrap();
    assert!(h.controller.status().await.last_error.is_none());
    tokio::time::sleep(Duration::from_millis(20)).await;
    h.controller.stop().await.unwrap();

    h.queue.shutdown().await;
    let outcomes = session_outcomes(&h.queue, session_id);
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].segment_index, 0);
}

#[tokio::test]
async fn test_slow_indexer_does_not_stall_capture() {
    let config = UploadConfig {
        workers: 1,
        queue_capacity: 1,
        ..upload_config()
    };
    let h = harness_with(
        config,
        ScriptedCapture::new(display()),
        MockIndexer::with_delay(Duration::from_secs(2)),
        Duration::from_millis(20),
    )
    .await;

    let session_id = h.controller.start(None).await.unwrap().session_id.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    let stopping = Instant::now();
    let summary = h.controller.stop().await.unwrap();
    assert!(
        stopping.elapsed() < Duration::from_millis(500),
        "stop took {:?}",
        stopping.elapsed()
    );
    assert!(summary.segments_recorded >= 5, "only {}", summary.segments_recorded);

    // Nothing has finished uploading yet, but every segment is accounted for
    let outcomes = session_outcomes(&h.queue, session_id);
    assert_eq!(outcomes.len() as u64, summary.segments_recorded);
    for (expected, outcome) in outcomes.iter().enumerate() {
        assert_eq!(outcome.segment_index, expected as u64);
    }
    assert!(h.queue.backlog() > 0);
}

// ============================================================================
// Upload queue
// ============================================================================

#[tokio::test]
async fn test_transient_failures_then_success() {
    let dir = TempDir::new().unwrap();
    let mock = Arc::new(MockIndexer::instant().fail_transiently(2));
    let queue = UploadQueue::start(
        &upload_config(),
        "c",
        mock.clone(),
        Arc::new(OutcomeLog::new(10)),
    );
    let segment = segment_file(&dir, 0);

    queue.enqueue(segment.clone()).await.unwrap();
    queue.shutdown().await;

    let outcome = queue.outcome(segment.segment_id).unwrap();
    assert_eq!(outcome.status, UploadStatus::Uploaded);
    assert_eq!(outcome.attempts, 3);
    assert_eq!(mock.attempts_for(segment.segment_id), 3);
    assert!(!segment.local_path.exists());
}

#[tokio::test]
async fn test_always_transient_gives_up_and_keeps_file() {
    let dir = TempDir::new().unwrap();
    let mock = Arc::new(MockIndexer::instant().always_transient());
    let queue = UploadQueue::start(
        &upload_config(),
        "c",
        mock.clone(),
        Arc::new(OutcomeLog::new(10)),
    );
    let segment = segment_file(&dir, 0);

    queue.enqueue(segment.clone()).await.unwrap();
    queue.shutdown().await;

    let outcome = queue.outcome(segment.segment_id).unwrap();
    assert_eq!(outcome.status, UploadStatus::Failed);
    assert_eq!(outcome.attempts, 3);
    assert!(outcome.last_error.is_some());
    assert!(outcome.remote_file_id.is_none());
    assert!(segment.local_path.exists());
}

#[tokio::test]
async fn test_recent_returns_newest_first() {
    let dir = TempDir::new().unwrap();
    let queue = UploadQueue::start(
        &upload_config(),
        "c",
        Arc::new(MockIndexer::instant()),
        Arc::new(OutcomeLog::new(10)),
    );

    for index in 0..5 {
        queue.enqueue(segment_file(&dir, index)).await.unwrap();
    }
    queue.shutdown().await;

    let recent = queue.list_recent(3);
    let indices: Vec<u64> = recent.iter().map(|o| o.segment_index).collect();
    assert_eq!(indices, vec![4, 3, 2]);
}

#[tokio::test]
async fn test_concurrent_enqueue_uploads_each_segment_once() {
    let dir = TempDir::new().unwrap();
    let mock = Arc::new(MockIndexer::with_delay(Duration::from_millis(50)));
    let queue = UploadQueue::start(
        &upload_config(),
        "c",
        mock.clone(),
        Arc::new(OutcomeLog::new(10)),
    );
    let segments: Vec<Segment> = (0..5).map(|i| segment_file(&dir, i)).collect();

    let results =
        futures::future::join_all(segments.iter().cloned().map(|s| queue.enqueue(s))).await;
    assert!(results.iter().all(|r| r.is_ok()));

    let err = queue.enqueue(segments[4].clone()).await.unwrap_err();
    assert!(matches!(err, ScreenlogError::DuplicateSegment(_)));

    queue.shutdown().await;

    assert_eq!(mock.uploaded().len(), 5);
    assert_eq!(mock.overlapping_uploads(), 0);
    assert!(mock.max_concurrent() <= 2);
    for segment in &segments {
        assert_eq!(mock.attempts_for(segment.segment_id), 1);
        assert_eq!(
            queue.outcome(segment.segment_id).unwrap().status,
            UploadStatus::Uploaded
        );
    }
}

#[derive(Clone, Default)]
struct IndexerCalls {
    uploads: Arc<AtomicUsize>,
    adds: Arc<AtomicUsize>,
    extracts: Arc<AtomicUsize>,
}

/// Local indexing service whose first collection add answers 503
async fn flaky_indexer(calls: IndexerCalls) -> String {
    let app = Router::new()
        .route(
            "/v1/files",
            post(|State(calls): State<IndexerCalls>, _body: Bytes| async move {
                let n = calls.uploads.fetch_add(1, Ordering::SeqCst) + 1;
                Json(json!({
                    "id": format!("file-{}", n),
                    "uri": format!("https://indexer.test/files/file-{}", n),
                }))
            }),
        )
        .route(
            "/v1/files/:file_id",
            get(|| async { Json(json!({ "status": "completed" })) }),
        )
        .route(
            "/v1/collections/:collection_id/videos",
            post(|State(calls): State<IndexerCalls>, _body: Bytes| async move {
                if calls.adds.fetch_add(1, Ordering::SeqCst) == 0 {
                    (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "error": "busy" })))
                } else {
                    (StatusCode::OK, Json(json!({ "status": "added" })))
                }
            }),
        )
        .route(
            "/v1/extract",
            post(|State(calls): State<IndexerCalls>, _body: Bytes| async move {
                let n = calls.extracts.fetch_add(1, Ordering::SeqCst) + 1;
                Json(json!({ "job_id": format!("job-{}", n), "status": "pending" }))
            }),
        )
        .with_state(calls);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}/v1", addr)
}

#[tokio::test]
async fn test_http_client_retries_collection_add_without_uploading_again() {
    let dir = TempDir::new().unwrap();
    let calls = IndexerCalls::default();
    let base_url = flaky_indexer(calls.clone()).await;
    let client = Arc::new(HttpIndexingClient::new(&base_url, "test-key").unwrap());
    let queue = UploadQueue::start(
        &upload_config(),
        "collection-1",
        client,
        Arc::new(OutcomeLog::new(10)),
    );
    let segment = segment_file(&dir, 0);

    queue.enqueue(segment.clone()).await.unwrap();
    queue.shutdown().await;

    let outcome = queue.outcome(segment.segment_id).unwrap();
    assert_eq!(outcome.status, UploadStatus::Uploaded, "{:?}", outcome.last_error);
    assert_eq!(outcome.attempts, 2);
    assert_eq!(outcome.remote_file_id.as_deref(), Some("file-1"));
    assert_eq!(calls.uploads.load(Ordering::SeqCst), 1);
    assert_eq!(calls.adds.load(Ordering::SeqCst), 2);
    assert_eq!(calls.extracts.load(Ordering::SeqCst), 1);
    assert!(!segment.local_path.exists());
}

// ============================================================================
// HTTP control surface
// ============================================================================

async fn call(app: &axum::Router, method: &str, uri: &str) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn test_http_control_surface() {
    let h = harness(
        ScriptedCapture::new(display()),
        MockIndexer::instant(),
        Duration::from_millis(100),
    )
    .await;
    let app = server::router(AppState::new(h.controller.clone(), h.mock.clone()));

    let (status, body) = call(&app, "GET", "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, body) = call(&app, "POST", "/stop").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["status"], "error");
    assert_eq!(body["error"], "not_recording");

    let (status, body) = call(&app, "GET", "/set_percentage/0").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_configuration");

    let (status, _) = call(&app, "GET", "/set_percentage/abc").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = call(&app, "POST", "/set_percentage/64").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert_eq!(body["message"], "Screen percentage set to 64%");

    let (status, body) = call(&app, "GET", "/start?percentage=50").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "started");
    assert_eq!(body["screen_percentage"], 50);
    assert!(body["session_id"].is_string());

    let (status, body) = call(&app, "POST", "/start").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "already_recording");

    let (status, body) = call(&app, "GET", "/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["session"]["status"], "active");

    tokio::time::sleep(Duration::from_millis(150)).await;

    let (status, body) = call(&app, "GET", "/stop").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "stopped");
    let recorded = body["recordings_count"].as_u64().unwrap();
    assert!(recorded >= 2);

    h.queue.shutdown().await;

    let (status, body) = call(&app, "GET", "/recent_recordings").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"].as_u64().unwrap(), recorded.min(3));
    let first = &body["recordings"][0];
    assert_eq!(first["status"], "uploaded");
    assert_eq!(first["segment_index"].as_u64().unwrap(), recorded - 1);

    let (status, body) = call(&app, "GET", "/recent_recordings?limit=50").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"].as_u64().unwrap(), recorded);

    let (status, body) = call(&app, "GET", "/videos?limit=1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 1);

    let (status, body) = call(&app, "GET", "/videos/mock-file-1/description").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["file_id"], "mock-file-1");
    assert_eq!(body["description"], "Mock description of mock-file-1");

    let (status, body) = call(&app, "GET", "/videos/unknown/description").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");
}

#[tokio::test]
async fn test_index_page_documents_routes() {
    let h = harness(
        ScriptedCapture::new(display()),
        MockIndexer::instant(),
        Duration::from_millis(100),
    )
    .await;
    let app = server::router(AppState::new(h.controller.clone(), h.mock.clone()));

    let request = Request::builder().uri("/").body(Body::empty()).unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap().to_string();
    assert!(content_type.starts_with("text/html"));
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let page = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(page.contains("/set_percentage/"));
    assert!(page.contains("/recent_recordings"));
}

#[tokio::test]
async fn test_http_upstream_errors_map_to_bad_gateway() {
    struct Unavailable;

    fn down() -> IndexingError {
        IndexingError::from_status(503, "down")
    }

    #[async_trait::async_trait]
    impl IndexingClient for Unavailable {
        async fn upload_file(&self, _segment: &Segment) -> Result<RemoteFile, IndexingError> {
            Err(down())
        }

        async fn file_state(&self, _file_id: &str) -> Result<FileState, IndexingError> {
            Err(down())
        }

        async fn add_to_collection(
            &self,
            _collection_id: &str,
            _file_id: &str,
        ) -> Result<(), IndexingError> {
            Err(down())
        }

        async fn extract(
            &self,
            _file: &RemoteFile,
            _request: &ExtractRequest,
        ) -> Result<ExtractJob, IndexingError> {
            Err(down())
        }

        async fn list_videos(
            &self,
            _collection_id: &str,
            _limit: usize,
        ) -> Result<Vec<RemoteVideo>, IndexingError> {
            Err(down())
        }

        async fn get_description(
            &self,
            _collection_id: &str,
            _file_id: &str,
        ) -> Result<String, IndexingError> {
            Err(down())
        }
    }

    let h = harness(
        ScriptedCapture::new(display()),
        MockIndexer::instant(),
        Duration::from_millis(100),
    )
    .await;
    let app = server::router(AppState::new(h.controller.clone(), Arc::new(Unavailable)));

    let (status, body) = call(&app, "GET", "/videos").await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"], "indexing_unavailable");

    let (status, body) = call(&app, "GET", "/videos/file-1/description").await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"], "indexing_unavailable");
}
