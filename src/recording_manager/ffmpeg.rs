use super::{CaptureBackend, CaptureHandle, CaptureRequest};
use crate::config::CaptureConfig;
use crate::error::{ScreenlogError, ScreenlogResult};
use crate::region::{CaptureRegion, DisplayGeometry};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::future::Future;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Lines of ffmpeg stderr kept for error reports
const STDERR_TAIL_LINES: usize = 40;

/// Time ffmpeg gets to write the trailer after `q`
const FINALIZE_TIMEOUT: Duration = Duration::from_secs(10);

/// Screen capture through an `ffmpeg` child process
pub struct FfmpegCapture {
    program: String,
    display: DisplayGeometry,
    framerate: u32,
    input_device: String,
    error_log_dir: Option<PathBuf>,
}

impl FfmpegCapture {
    pub fn new(display: DisplayGeometry) -> Self {
        Self {
            program: "ffmpeg".to_string(),
            display,
            framerate: 30,
            input_device: default_input_device().to_string(),
            error_log_dir: None,
        }
    }

    pub fn from_config(config: &CaptureConfig) -> Self {
        Self {
            program: config.ffmpeg_program.clone(),
            display: config.display,
            framerate: config.framerate,
            input_device: config
                .input_device
                .clone()
                .unwrap_or_else(|| default_input_device().to_string()),
            error_log_dir: Some(config.output_dir.clone()),
        }
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Full ffmpeg argument list for one segment
    pub fn build_args(&self, request: &CaptureRequest) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "-hide_banner".into(),
            "-loglevel".into(),
            "error".into(),
        ];
        args.extend(self.input_args(&request.region, request.display));
        args.extend(
            [
                "-c:v",
                "libx264",
                "-preset",
                "ultrafast",
                "-pix_fmt",
                "yuv420p",
                "-y",
            ]
            .iter()
            .map(|s| s.to_string()),
        );
        args.push(request.output_path.to_string_lossy().into_owned());
        args
    }

    /// x11grab captures the region directly
    #[cfg(target_os = "linux")]
    fn input_args(&self, region: &CaptureRegion, _display: DisplayGeometry) -> Vec<String> {
        vec![
            "-f".into(),
            "x11grab".into(),
            "-framerate".into(),
            self.framerate.to_string(),
            "-video_size".into(),
            format!("{}x{}", region.width, region.height),
            "-i".into(),
            format!("{}+{},{}", self.input_device, region.x, region.y),
        ]
    }

    /// avfoundation always grabs the whole screen; crop afterwards
    #[cfg(target_os = "macos")]
    fn input_args(&self, region: &CaptureRegion, display: DisplayGeometry) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "-f".into(),
            "avfoundation".into(),
            "-framerate".into(),
            self.framerate.to_string(),
            "-capture_cursor".into(),
            "1".into(),
            "-i".into(),
            self.input_device.clone(),
        ];
        if !region.is_full_display(display) {
            args.push("-vf".into());
            args.push(format!(
                "crop={}:{}:{}:{}",
                region.width, region.height, region.x, region.y
            ));
        }
        args
    }

    #[cfg(target_os = "windows")]
    fn input_args(&self, region: &CaptureRegion, _display: DisplayGeometry) -> Vec<String> {
        vec![
            "-f".into(),
            "gdigrab".into(),
            "-framerate".into(),
            self.framerate.to_string(),
            "-offset_x".into(),
            region.x.to_string(),
            "-offset_y".into(),
            region.y.to_string(),
            "-video_size".into(),
            format!("{}x{}", region.width, region.height),
            "-i".into(),
            self.input_device.clone(),
        ]
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    fn input_args(&self, region: &CaptureRegion, _display: DisplayGeometry) -> Vec<String> {
        vec![
            "-f".into(),
            "x11grab".into(),
            "-video_size".into(),
            format!("{}x{}", region.width, region.height),
            "-i".into(),
            format!("{}+{},{}", self.input_device, region.x, region.y),
        ]
    }
}

#[cfg(target_os = "macos")]
fn default_input_device() -> &'static str {
    "1:"
}

#[cfg(target_os = "windows")]
fn default_input_device() -> &'static str {
    "desktop"
}

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
fn default_input_device() -> &'static str {
    ":0.0"
}

#[async_trait]
impl CaptureBackend for FfmpegCapture {
    fn name(&self) -> &'static str {
        "ffmpeg"
    }

    async fn display_geometry(&self) -> ScreenlogResult<DisplayGeometry> {
        Ok(self.display)
    }

    async fn open(&self, request: &CaptureRequest) -> ScreenlogResult<Box<dyn CaptureHandle>> {
        let args = self.build_args(request);
        debug!(program = %self.program, args = ?args, "spawning ffmpeg");

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ScreenlogError::CaptureError(format!("failed to launch {}: {}", self.program, e))
            })?;

        let stdin = child.stdin.take();
        let stderr_tail = Arc::new(Mutex::new(VecDeque::with_capacity(STDERR_TAIL_LINES)));
        if let Some(stderr) = child.stderr.take() {
            let tail = stderr_tail.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if let Ok(mut tail) = tail.lock() {
                        if tail.len() == STDERR_TAIL_LINES {
                            tail.pop_front();
                        }
                        tail.push_back(line);
                    }
                }
            });
        }

        Ok(Box::new(FfmpegHandle {
            child,
            stdin,
            stderr_tail,
            session_id: request.session_id,
            output_path: request.output_path.clone(),
            error_log_dir: self.error_log_dir.clone(),
        }))
    }
}

struct FfmpegHandle {
    child: Child,
    stdin: Option<ChildStdin>,
    stderr_tail: Arc<Mutex<VecDeque<String>>>,
    session_id: Uuid,
    output_path: PathBuf,
    error_log_dir: Option<PathBuf>,
}

impl FfmpegHandle {
    fn stderr_text(&self) -> String {
        self.stderr_tail
            .lock()
            .map(|tail| tail.iter().cloned().collect::<Vec<_>>().join("\n"))
            .unwrap_or_default()
    }

    /// The returned future owns its data and does not borrow the handle
    fn failure(&self, summary: String) -> impl Future<Output = ScreenlogError> + Send + 'static {
        capture_failure(
            self.session_id,
            self.error_log_dir.clone(),
            self.stderr_text(),
            summary,
        )
    }
}

/// Build the capture error and keep ffmpeg's output next to the segments
async fn capture_failure(
    session_id: Uuid,
    error_log_dir: Option<PathBuf>,
    stderr: String,
    summary: String,
) -> ScreenlogError {
    error!(%session_id, %summary, stderr = %stderr, "ffmpeg capture failed");

    if let Some(dir) = error_log_dir {
        let log_path = dir.join(format!("capture_error_{}.log", session_id));
        let contents = format!("{}\n\n{}\n", summary, stderr);
        if let Err(e) = tokio::fs::write(&log_path, contents).await {
            warn!(path = %log_path.display(), error = %e, "could not write capture error log");
        }
    }

    let last_line = stderr.lines().last().unwrap_or("").trim();
    if last_line.is_empty() {
        ScreenlogError::CaptureError(summary)
    } else {
        ScreenlogError::CaptureError(format!("{}: {}", summary, last_line))
    }
}

#[async_trait]
impl CaptureHandle for FfmpegHandle {
    async fn terminated(&mut self) -> ScreenlogError {
        let summary = match self.child.wait().await {
            Ok(status) => format!("ffmpeg exited unexpectedly ({})", status),
            Err(e) => format!("lost track of ffmpeg: {}", e),
        };
        self.failure(summary).await
    }

    async fn finalize(mut self: Box<Self>) -> ScreenlogResult<()> {
        // `q` makes ffmpeg flush and write the container trailer
        if let Some(mut stdin) = self.stdin.take() {
            if let Err(e) = stdin.write_all(b"q").await {
                debug!(error = %e, "ffmpeg stdin already closed");
            }
        }

        match tokio::time::timeout(FINALIZE_TIMEOUT, self.child.wait()).await {
            Ok(Ok(status)) if status.success() => {}
            Ok(Ok(status)) => {
                let err = self
                    .failure(format!("ffmpeg failed to finalize ({})", status))
                    .await;
                return Err(err);
            }
            Ok(Err(e)) => {
                return Err(ScreenlogError::CaptureError(format!(
                    "failed waiting for ffmpeg: {}",
                    e
                )));
            }
            Err(_) => {
                let _ = self.child.kill().await;
                let err = self
                    .failure(format!(
                        "ffmpeg did not finalize within {}s",
                        FINALIZE_TIMEOUT.as_secs()
                    ))
                    .await;
                return Err(err);
            }
        }

        match tokio::fs::metadata(&self.output_path).await {
            Ok(meta) if meta.len() > 0 => Ok(()),
            _ => Err(ScreenlogError::CaptureError(format!(
                "ffmpeg produced no output at {}",
                self.output_path.display()
            ))),
        }
    }
}
