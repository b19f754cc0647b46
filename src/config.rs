use crate::error::{ScreenlogError, ScreenlogResult};
use crate::region::{self, DisplayGeometry};
use crate::upload::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_API_BASE_URL: &str = "https://api.cloudglue.dev/v1";
pub const MAX_UPLOAD_WORKERS: usize = 8;

/// Complete process configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub indexer: IndexerConfig,
    pub capture: CaptureConfig,
    pub upload: UploadConfig,
    pub server: ServerConfig,
}

/// Which indexing client to build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexerKind {
    Http,
    Mock,
}

impl FromStr for IndexerKind {
    type Err = ScreenlogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "http" => Ok(Self::Http),
            "mock" => Ok(Self::Mock),
            other => Err(ScreenlogError::InvalidConfiguration(format!(
                "unknown indexer '{}', expected http or mock",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerConfig {
    pub kind: IndexerKind,
    pub collection_id: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub base_url: String,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            kind: IndexerKind::Http,
            collection_id: String::new(),
            api_key: None,
            base_url: DEFAULT_API_BASE_URL.to_string(),
        }
    }
}

/// Which capture backend to build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureBackendKind {
    Ffmpeg,
    Scripted,
}

impl FromStr for CaptureBackendKind {
    type Err = ScreenlogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ffmpeg" => Ok(Self::Ffmpeg),
            "scripted" => Ok(Self::Scripted),
            other => Err(ScreenlogError::InvalidConfiguration(format!(
                "unknown capture backend '{}', expected ffmpeg or scripted",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    pub backend: CaptureBackendKind,
    pub output_dir: PathBuf,
    pub segment_duration_secs: u64,
    pub initial_percentage: u32,
    pub display: DisplayGeometry,
    pub framerate: u32,
    pub ffmpeg_program: String,
    /// Overrides the platform default capture device
    pub input_device: Option<String>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            backend: CaptureBackendKind::Ffmpeg,
            output_dir: PathBuf::from("recordings"),
            segment_duration_secs: 60,
            initial_percentage: 100,
            display: DisplayGeometry::default(),
            framerate: 30,
            ffmpeg_program: "ffmpeg".to_string(),
            input_device: None,
        }
    }
}

impl CaptureConfig {
    pub fn segment_duration(&self) -> Duration {
        Duration::from_secs(self.segment_duration_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub workers: usize,
    pub queue_capacity: usize,
    pub history_capacity: usize,
    /// JSON file the outcome log is persisted to
    pub outcome_log: Option<PathBuf>,
    /// Start a structured extraction once a segment is in the collection
    pub extract: bool,
    /// Delay between processing-status polls of an uploaded file
    pub status_poll_ms: u64,
    /// Polls per attempt before the file counts as stuck
    pub max_status_polls: u32,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_base_ms: 1000,
            backoff_max_ms: 30_000,
            workers: 2,
            queue_capacity: 16,
            history_capacity: 500,
            outcome_log: None,
            extract: true,
            status_poll_ms: 1000,
            max_status_polls: 600,
        }
    }
}

impl UploadConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.backoff_base_ms),
            max_delay: Duration::from_millis(self.backoff_max_ms),
        }
    }

    pub fn status_poll_interval(&self) -> Duration {
        Duration::from_millis(self.status_poll_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5002,
        }
    }
}

impl ServerConfig {
    /// Resolve `host:port`; host names are looked up, not only IP literals
    pub async fn bind_addr(&self) -> ScreenlogResult<SocketAddr> {
        let invalid = |reason: String| {
            ScreenlogError::InvalidConfiguration(format!(
                "invalid bind address {}:{}: {}",
                self.host, self.port, reason
            ))
        };
        tokio::net::lookup_host((self.host.as_str(), self.port))
            .await
            .map_err(|e| invalid(e.to_string()))?
            .next()
            .ok_or_else(|| invalid("host resolved to no addresses".to_string()))
    }
}

impl AppConfig {
    /// Load configuration from the process environment and command line
    ///
    /// `--percentage N` and `--port N` override their environment variables.
    pub fn from_env() -> ScreenlogResult<Self> {
        let args: Vec<String> = std::env::args().skip(1).collect();
        Self::from_sources(|key| std::env::var(key).ok(), &args)
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> ScreenlogResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        Self::from_sources(lookup, &[])
    }

    /// Load configuration from a key lookup plus command-line arguments
    pub fn from_sources<F>(lookup: F, args: &[String]) -> ScreenlogResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = AppConfig::default();

        let indexer = IndexerConfig {
            kind: parse_or(&get, "SCREENLOG_INDEXER", defaults.indexer.kind)?,
            collection_id: get("SCREENLOG_COLLECTION_ID")
                .or_else(|| get("TARGET_COLLECTION_ID"))
                .unwrap_or_default(),
            api_key: get("SCREENLOG_API_KEY").or_else(|| get("CLOUDGLUE_API_KEY")),
            base_url: get("SCREENLOG_API_BASE_URL").unwrap_or(defaults.indexer.base_url),
        };

        let capture = CaptureConfig {
            backend: parse_or(&get, "SCREENLOG_CAPTURE", defaults.capture.backend)?,
            output_dir: get("SCREENLOG_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.capture.output_dir),
            segment_duration_secs: parse_or(
                &get,
                "SCREENLOG_SEGMENT_SECS",
                defaults.capture.segment_duration_secs,
            )?,
            initial_percentage: parse_or(
                &get,
                "SCREENLOG_PERCENTAGE",
                defaults.capture.initial_percentage,
            )?,
            display: parse_or(&get, "SCREENLOG_DISPLAY_SIZE", defaults.capture.display)?,
            framerate: parse_or(&get, "SCREENLOG_FRAMERATE", defaults.capture.framerate)?,
            ffmpeg_program: get("SCREENLOG_FFMPEG").unwrap_or(defaults.capture.ffmpeg_program),
            input_device: get("SCREENLOG_INPUT_DEVICE"),
        };

        let upload = UploadConfig {
            max_attempts: parse_or(&get, "SCREENLOG_MAX_ATTEMPTS", defaults.upload.max_attempts)?,
            backoff_base_ms: parse_or(
                &get,
                "SCREENLOG_BACKOFF_BASE_MS",
                defaults.upload.backoff_base_ms,
            )?,
            backoff_max_ms: parse_or(
                &get,
                "SCREENLOG_BACKOFF_MAX_MS",
                defaults.upload.backoff_max_ms,
            )?,
            workers: parse_or(&get, "SCREENLOG_UPLOAD_WORKERS", defaults.upload.workers)?,
            queue_capacity: parse_or(
                &get,
                "SCREENLOG_QUEUE_CAPACITY",
                defaults.upload.queue_capacity,
            )?,
            history_capacity: parse_or(
                &get,
                "SCREENLOG_HISTORY_CAPACITY",
                defaults.upload.history_capacity,
            )?,
            outcome_log: get("SCREENLOG_OUTCOME_LOG").map(PathBuf::from),
            extract: parse_or(&get, "SCREENLOG_EXTRACT", defaults.upload.extract)?,
            status_poll_ms: parse_or(
                &get,
                "SCREENLOG_STATUS_POLL_MS",
                defaults.upload.status_poll_ms,
            )?,
            max_status_polls: parse_or(
                &get,
                "SCREENLOG_MAX_STATUS_POLLS",
                defaults.upload.max_status_polls,
            )?,
        };

        let server = ServerConfig {
            host: get("SCREENLOG_HOST").unwrap_or(defaults.server.host),
            port: parse_or(&get, "SCREENLOG_PORT", defaults.server.port)?,
        };

        let mut config = AppConfig {
            indexer,
            capture,
            upload,
            server,
        };
        config.apply_args(args)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `--percentage` and `--port`, as `--flag N` or `--flag=N`
    fn apply_args(&mut self, args: &[String]) -> ScreenlogResult<()> {
        let mut args = args.iter();
        while let Some(arg) = args.next() {
            let (flag, inline) = match arg.split_once('=') {
                Some((flag, value)) => (flag, Some(value.to_string())),
                None => (arg.as_str(), None),
            };
            if flag != "--percentage" && flag != "--port" {
                return Err(ScreenlogError::InvalidConfiguration(format!(
                    "unknown argument '{}', expected --percentage or --port",
                    arg
                )));
            }
            let value = inline.or_else(|| args.next().cloned()).ok_or_else(|| {
                ScreenlogError::InvalidConfiguration(format!("{} needs a value", flag))
            })?;
            let lookup = |_: &str| Some(value.clone());
            if flag == "--percentage" {
                self.capture.initial_percentage = parse_or(&lookup, flag, 0)?;
            } else {
                self.server.port = parse_or(&lookup, flag, 0)?;
            }
        }
        Ok(())
    }

    /// Fail fast on configuration the pipeline cannot run with
    pub fn validate(&self) -> ScreenlogResult<()> {
        if self.indexer.collection_id.trim().is_empty() {
            return Err(ScreenlogError::InvalidConfiguration(
                "SCREENLOG_COLLECTION_ID is not set".to_string(),
            ));
        }

        if self.indexer.kind == IndexerKind::Http {
            if self.indexer.api_key.is_none() {
                return Err(ScreenlogError::InvalidConfiguration(
                    "SCREENLOG_API_KEY is required for the http indexer".to_string(),
                ));
            }
            url::Url::parse(&self.indexer.base_url).map_err(|e| {
                ScreenlogError::InvalidConfiguration(format!(
                    "invalid api base url '{}': {}",
                    self.indexer.base_url, e
                ))
            })?;
        }

        region::validate_percentage(i64::from(self.capture.initial_percentage))?;

        if self.capture.segment_duration_secs == 0 {
            return Err(ScreenlogError::InvalidConfiguration(
                "segment duration must be at least one second".to_string(),
            ));
        }
        if self.capture.framerate == 0 {
            return Err(ScreenlogError::InvalidConfiguration(
                "framerate must be positive".to_string(),
            ));
        }
        if self.upload.max_attempts == 0 {
            return Err(ScreenlogError::InvalidConfiguration(
                "max upload attempts must be at least 1".to_string(),
            ));
        }
        if self.upload.backoff_base_ms > self.upload.backoff_max_ms {
            return Err(ScreenlogError::InvalidConfiguration(format!(
                "backoff base {}ms exceeds backoff max {}ms",
                self.upload.backoff_base_ms, self.upload.backoff_max_ms
            )));
        }
        if !(1..=MAX_UPLOAD_WORKERS).contains(&self.upload.workers) {
            return Err(ScreenlogError::InvalidConfiguration(format!(
                "upload workers must be between 1 and {}, got {}",
                MAX_UPLOAD_WORKERS, self.upload.workers
            )));
        }
        if self.upload.queue_capacity == 0 || self.upload.history_capacity == 0 {
            return Err(ScreenlogError::InvalidConfiguration(
                "queue and history capacity must be positive".to_string(),
            ));
        }

        if self.upload.max_status_polls == 0 {
            return Err(ScreenlogError::InvalidConfiguration(
                "max status polls must be at least 1".to_string(),
            ));
        }
        if self.server.host.trim().is_empty() {
            return Err(ScreenlogError::InvalidConfiguration(
                "SCREENLOG_HOST is empty".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> ScreenlogResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| {
            ScreenlogError::InvalidConfiguration(format!("{}='{}': {}", key, raw, e))
        }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_with_required_values() {
        let config = AppConfig::from_lookup(lookup(&[
            ("SCREENLOG_COLLECTION_ID", "col-1"),
            ("SCREENLOG_API_KEY", "secret"),
        ]))
        .unwrap();

        assert_eq!(config.indexer.kind, IndexerKind::Http);
        assert_eq!(config.indexer.base_url, DEFAULT_API_BASE_URL);
        assert_eq!(config.capture.segment_duration(), Duration::from_secs(60));
        assert_eq!(config.capture.initial_percentage, 100);
        assert_eq!(config.upload.workers, 2);
        assert_eq!(config.upload.max_attempts, 5);
        assert_eq!(config.server.port, 5002);
    }

    #[test]
    fn test_missing_collection_fails_fast() {
        let err = AppConfig::from_lookup(lookup(&[("SCREENLOG_API_KEY", "secret")])).unwrap_err();
        assert!(matches!(err, ScreenlogError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_legacy_variable_names() {
        let config = AppConfig::from_lookup(lookup(&[
            ("TARGET_COLLECTION_ID", "legacy"),
            ("CLOUDGLUE_API_KEY", "k"),
        ]))
        .unwrap();

        assert_eq!(config.indexer.collection_id, "legacy");
        assert_eq!(config.indexer.api_key.as_deref(), Some("k"));
    }

    #[test]
    fn test_http_indexer_requires_api_key() {
        let err = AppConfig::from_lookup(lookup(&[("SCREENLOG_COLLECTION_ID", "c")])).unwrap_err();
        assert!(err.to_string().contains("SCREENLOG_API_KEY"));

        let config = AppConfig::from_lookup(lookup(&[
            ("SCREENLOG_COLLECTION_ID", "c"),
            ("SCREENLOG_INDEXER", "mock"),
        ]))
        .unwrap();
        assert_eq!(config.indexer.kind, IndexerKind::Mock);
    }

    #[test]
    fn test_rejects_out_of_range_values() {
        let base = [
            ("SCREENLOG_COLLECTION_ID", "c"),
            ("SCREENLOG_INDEXER", "mock"),
        ];

        for bad in [
            ("SCREENLOG_PERCENTAGE", "0"),
            ("SCREENLOG_PERCENTAGE", "101"),
            ("SCREENLOG_UPLOAD_WORKERS", "9"),
            ("SCREENLOG_UPLOAD_WORKERS", "0"),
            ("SCREENLOG_SEGMENT_SECS", "0"),
            ("SCREENLOG_PORT", "not-a-port"),
            ("SCREENLOG_DISPLAY_SIZE", "wide"),
            ("SCREENLOG_CAPTURE", "vnc"),
        ] {
            let mut pairs = base.to_vec();
            pairs.push(bad);
            let result = AppConfig::from_lookup(lookup(&pairs));
            assert!(
                matches!(result, Err(ScreenlogError::InvalidConfiguration(_))),
                "{:?} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_invalid_base_url() {
        let err = AppConfig::from_lookup(lookup(&[
            ("SCREENLOG_COLLECTION_ID", "c"),
            ("SCREENLOG_API_KEY", "k"),
            ("SCREENLOG_API_BASE_URL", "not a url"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ScreenlogError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_overrides() {
        let config = AppConfig::from_lookup(lookup(&[
            ("SCREENLOG_COLLECTION_ID", "c"),
            ("SCREENLOG_INDEXER", "mock"),
            ("SCREENLOG_CAPTURE", "scripted"),
            ("SCREENLOG_DISPLAY_SIZE", "2560x1440"),
            ("SCREENLOG_SEGMENT_SECS", "5"),
            ("SCREENLOG_BACKOFF_BASE_MS", "10"),
            ("SCREENLOG_BACKOFF_MAX_MS", "40"),
            ("SCREENLOG_OUTCOME_LOG", "/tmp/outcomes.json"),
        ]))
        .unwrap();

        assert_eq!(config.capture.backend, CaptureBackendKind::Scripted);
        assert_eq!(config.capture.display.width, 2560);
        assert_eq!(config.capture.segment_duration_secs, 5);
        let policy = config.upload.retry_policy();
        assert_eq!(policy.base_delay, Duration::from_millis(10));
        assert_eq!(policy.max_delay, Duration::from_millis(40));
        assert_eq!(
            config.upload.outcome_log,
            Some(PathBuf::from("/tmp/outcomes.json"))
        );
    }

    #[test]
    fn test_command_line_overrides_environment() {
        let env = lookup(&[
            ("SCREENLOG_COLLECTION_ID", "c"),
            ("SCREENLOG_INDEXER", "mock"),
            ("SCREENLOG_PERCENTAGE", "80"),
        ]);
        let args: Vec<String> = ["--percentage", "40", "--port=6001"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let config = AppConfig::from_sources(env, &args).unwrap();

        assert_eq!(config.capture.initial_percentage, 40);
        assert_eq!(config.server.port, 6001);
    }

    #[test]
    fn test_bad_command_line() {
        let base = [("SCREENLOG_COLLECTION_ID", "c"), ("SCREENLOG_INDEXER", "mock")];
        for args in [
            vec!["--percentage", "0"],
            vec!["--percentage"],
            vec!["--port", "http"],
            vec!["--verbose"],
        ] {
            let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
            let result = AppConfig::from_sources(lookup(&base), &args);
            assert!(
                matches!(result, Err(ScreenlogError::InvalidConfiguration(_))),
                "{:?} should be rejected",
                args
            );
        }
    }

    #[test]
    fn test_extraction_settings() {
        let config = AppConfig::from_lookup(lookup(&[
            ("SCREENLOG_COLLECTION_ID", "c"),
            ("SCREENLOG_INDEXER", "mock"),
            ("SCREENLOG_EXTRACT", "false"),
            ("SCREENLOG_STATUS_POLL_MS", "250"),
        ]))
        .unwrap();

        assert!(!config.upload.extract);
        assert_eq!(config.upload.status_poll_interval(), Duration::from_millis(250));
        assert_eq!(config.upload.max_status_polls, 600);
        assert!(UploadConfig::default().extract);
    }

    #[tokio::test]
    async fn test_bind_addr_resolves_host_names() {
        let server = ServerConfig {
            host: "localhost".to_string(),
            port: 5002,
        };
        let addr = server.bind_addr().await.unwrap();
        assert!(addr.ip().is_loopback());
        assert_eq!(addr.port(), 5002);

        let server = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
        };
        assert_eq!(server.bind_addr().await.unwrap().to_string(), "127.0.0.1:0");
    }

    #[test]
    fn test_api_key_not_serialized() {
        let mut config = AppConfig::default();
        config.indexer.api_key = Some("secret".to_string());
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("secret"));
    }
}
