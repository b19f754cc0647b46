use super::{
    ExtractJob, ExtractRequest, FileState, IndexingClient, IndexingError, RemoteFile, RemoteVideo,
};
use crate::error::{ScreenlogError, ScreenlogResult};
use crate::recording_manager::Segment;
use async_trait::async_trait;
use chrono::Local;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client, Response};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tracing::{debug, info};
use url::Url;

/// Value of the `source` metadata field on every upload
pub const UPLOAD_SOURCE: &str = "screen_recorder";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Indexing service client over HTTPS with bearer authentication
pub struct HttpIndexingClient {
    client: Client,
    base_url: Url,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct FileResponse {
    id: String,
    #[serde(default)]
    uri: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FileStatusResponse {
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ExtractResponse {
    job_id: String,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VideoListResponse {
    #[serde(default)]
    data: Vec<VideoEntry>,
}

#[derive(Debug, Deserialize)]
struct VideoEntry {
    file_id: String,
    #[serde(default)]
    status: Option<String>,
}

impl HttpIndexingClient {
    pub fn new(base_url: &str, api_key: impl Into<String>) -> ScreenlogResult<Self> {
        // Without the trailing slash `join` would replace the last path segment
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{}/", base_url)
        };
        let base_url = Url::parse(&normalized).map_err(|e| {
            ScreenlogError::InvalidConfiguration(format!("invalid api base url '{}': {}", base_url, e))
        })?;

        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| ScreenlogError::Internal(format!("failed to build http client: {}", e)))?;

        Ok(Self {
            client,
            base_url,
            api_key: api_key.into(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url, IndexingError> {
        self.base_url
            .join(path)
            .map_err(|e| IndexingError::permanent(format!("invalid endpoint '{}': {}", path, e)))
    }
}

#[async_trait]
impl IndexingClient for HttpIndexingClient {
    async fn upload_file(&self, segment: &Segment) -> Result<RemoteFile, IndexingError> {
        let file = File::open(&segment.local_path).await.map_err(|e| {
            IndexingError::permanent(format!(
                "cannot open {}: {}",
                segment.local_path.display(),
                e
            ))
        })?;
        let length = file
            .metadata()
            .await
            .map_err(|e| IndexingError::permanent(format!("cannot stat segment: {}", e)))?
            .len();

        let file_name = segment
            .local_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("{}.mp4", segment.segment_id));

        let body = Body::wrap_stream(ReaderStream::new(file));
        let part = Part::stream_with_length(body, length)
            .file_name(file_name)
            .mime_str("video/mp4")
            .map_err(classify_reqwest)?;

        let metadata = json!({
            "source": UPLOAD_SOURCE,
            "recorded_at": segment.created_at.with_timezone(&Local).format("%H:%M:%S").to_string(),
            "session_id": segment.session_id,
            "segment_index": segment.segment_index,
        });
        let form = Form::new()
            .part("file", part)
            .text("metadata", metadata.to_string());

        debug!(segment_id = %segment.segment_id, bytes = length, "uploading segment file");

        let response = self
            .client
            .post(self.endpoint("files")?)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(classify_reqwest)?;
        let uploaded: FileResponse = parse_json(response).await?;

        Ok(RemoteFile {
            file_id: uploaded.id,
            uri: uploaded.uri,
        })
    }

    async fn add_to_collection(
        &self,
        collection_id: &str,
        file_id: &str,
    ) -> Result<(), IndexingError> {
        let url = self.endpoint(&format!("collections/{}/videos", collection_id))?;
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .json(&json!({ "file_id": file_id }))
            .send()
            .await
            .map_err(classify_reqwest)?;
        ensure_success(response).await.map(|_| ())
    }

    async fn file_state(&self, file_id: &str) -> Result<FileState, IndexingError> {
        let response = self
            .client
            .get(self.endpoint(&format!("files/{}", file_id))?)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(classify_reqwest)?;
        let file: FileStatusResponse = parse_json(response).await?;

        Ok(match file.status.as_deref() {
            Some("completed") | Some("ready") => FileState::Ready,
            Some(status @ ("failed" | "error")) => {
                FileState::Failed(format!("file {} processing {}", file_id, status))
            }
            _ => FileState::Processing,
        })
    }

    async fn extract(
        &self,
        file: &RemoteFile,
        request: &ExtractRequest,
    ) -> Result<ExtractJob, IndexingError> {
        let mut body = json!({
            "prompt": request.prompt,
            "schema": request.schema,
        });
        match &file.uri {
            Some(uri) => body["url"] = json!(uri),
            None => body["file_id"] = json!(file.file_id),
        }

        let response = self
            .client
            .post(self.endpoint("extract")?)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(classify_reqwest)?;
        let job: ExtractResponse = parse_json(response).await?;

        info!(file_id = %file.file_id, job_id = %job.job_id, "extraction started");
        Ok(ExtractJob {
            job_id: job.job_id,
            status: job.status.unwrap_or_else(|| "pending".to_string()),
        })
    }

    async fn list_videos(
        &self,
        collection_id: &str,
        limit: usize,
    ) -> Result<Vec<RemoteVideo>, IndexingError> {
        let url = self.endpoint(&format!("collections/{}/videos", collection_id))?;
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.api_key)
            .query(&[("limit", limit.to_string())])
            .send()
            .await
            .map_err(classify_reqwest)?;
        let list: VideoListResponse = parse_json(response).await?;

        Ok(list
            .data
            .into_iter()
            .map(|v| RemoteVideo {
                file_id: v.file_id,
                status: v.status.unwrap_or_else(|| "unknown".to_string()),
            })
            .collect())
    }

    async fn get_description(
        &self,
        collection_id: &str,
        file_id: &str,
    ) -> Result<String, IndexingError> {
        let url = self.endpoint(&format!(
            "collections/{}/videos/{}/description",
            collection_id, file_id
        ))?;
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(classify_reqwest)?;
        let value: serde_json::Value = parse_json(response).await?;

        Ok(value
            .get("content")
            .or_else(|| value.get("description"))
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| value.to_string()))
    }
}

/// Map transport errors onto retry classes
fn classify_reqwest(err: reqwest::Error) -> IndexingError {
    if let Some(status) = err.status() {
        return IndexingError::from_status(status.as_u16(), err.to_string());
    }
    if err.is_builder() {
        return IndexingError::permanent(err.to_string());
    }
    IndexingError::transient(err.to_string())
}

async fn ensure_success(response: Response) -> Result<Response, IndexingError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = if body.is_empty() {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    } else {
        body
    };
    Err(IndexingError::from_status(status.as_u16(), message))
}

async fn parse_json<T: serde::de::DeserializeOwned>(
    response: Response,
) -> Result<T, IndexingError> {
    let response = ensure_success(response).await?;
    response
        .json::<T>()
        .await
        .map_err(|e| IndexingError::permanent(format!("unexpected response body: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_keeps_version_path() {
        let client = HttpIndexingClient::new("https://api.example.com/v1", "key").unwrap();

        assert_eq!(client.base_url().as_str(), "https://api.example.com/v1/");
        assert_eq!(
            client.endpoint("files").unwrap().as_str(),
            "https://api.example.com/v1/files"
        );
        assert_eq!(
            client.endpoint("collections/abc/videos").unwrap().as_str(),
            "https://api.example.com/v1/collections/abc/videos"
        );
    }

    #[test]
    fn test_invalid_base_url() {
        let result = HttpIndexingClient::new("not a url", "key");
        assert!(matches!(
            result,
            Err(ScreenlogError::InvalidConfiguration(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_service_is_transient() {
        let client = HttpIndexingClient::new("http://127.0.0.1:9/v1", "key").unwrap();

        let err = client.list_videos("collection", 5).await.unwrap_err();

        assert!(err.is_transient());
        assert!(err.status.is_none());
    }
}
