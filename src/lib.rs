pub mod config;
pub mod controller;
pub mod error;
pub mod indexing;
pub mod logging;
pub mod recording_manager;
pub mod region;
pub mod repository;
pub mod server;
pub mod state_machine;
pub mod upload;

use config::AppConfig;
use controller::SessionController;
use error::ScreenlogResult;
use indexing::IndexerFactory;
use recording_manager::{create_capture_backend, SegmentRecorder};
use repository::FileOutcomeRepository;
use server::AppState;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use upload::{OutcomeLog, UploadQueue};

/// Run the recorder until SIGINT or SIGTERM
///
/// On shutdown the active recording, if any, is stopped with its final
/// segment enqueued, then the upload queue is drained.
pub async fn run(config: AppConfig) -> ScreenlogResult<()> {
    info!(
        collection_id = %config.indexer.collection_id,
        indexer = ?config.indexer.kind,
        capture = ?config.capture.backend,
        output_dir = %config.capture.output_dir.display(),
        "screenlog starting"
    );

    let backend = create_capture_backend(&config.capture);
    let recorder = SegmentRecorder::new(backend, config.capture.output_dir.clone());
    let indexer = IndexerFactory::create(&config.indexer)?;

    let log = match &config.upload.outcome_log {
        Some(path) => OutcomeLog::with_repository(
            config.upload.history_capacity,
            Arc::new(FileOutcomeRepository::new(path.clone())),
        )?,
        None => OutcomeLog::new(config.upload.history_capacity),
    };
    let queue = UploadQueue::start(
        &config.upload,
        config.indexer.collection_id.clone(),
        indexer.clone(),
        Arc::new(log),
    );

    let controller = SessionController::new(
        recorder,
        queue.clone(),
        config.capture.initial_percentage,
        config.capture.segment_duration(),
    )
    .await?;

    let listener = TcpListener::bind(config.server.bind_addr().await?).await?;
    server::serve(
        listener,
        AppState::new(controller.clone(), indexer),
        shutdown_signal(),
    )
    .await?;

    controller.shutdown().await;
    queue.shutdown().await;
    info!("screenlog stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
