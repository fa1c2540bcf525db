//! REST client for the analysis service job endpoints.
//!
//! [`JobApi`] is the seam between orchestration and the wire; the
//! scheduler and controller only ever talk to it. [`JobClient`] implements
//! it over [`reqwest`].

use async_trait::async_trait;
use labelcheck_core::reference::ApplicationRow;
use labelcheck_core::types::{ClientIndex, SourceFile};
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};

use crate::sse::{self, EventStream, StreamError};

/// API root used when nothing was configured at build time.
pub const DEFAULT_API_BASE: &str = "http://localhost:8000/api";

/// API root resolved once from the `LABELCHECK_API_BASE` build-time
/// variable, falling back to [`DEFAULT_API_BASE`].
pub fn build_api_base() -> &'static str {
    option_env!("LABELCHECK_API_BASE").unwrap_or(DEFAULT_API_BASE)
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct CreateJobRequest<'a> {
    total_files: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    application_data: Option<&'a [ApplicationRow]>,
}

/// Response returned by `POST /jobs`.
#[derive(Debug, Clone, Deserialize)]
pub struct JobCreated {
    /// Server-assigned job identifier.
    pub job_id: String,
    /// Reference `label_id`s that appeared more than once; only the first
    /// occurrence is used for matching.
    #[serde(default)]
    pub duplicate_label_ids: Vec<String>,
}

/// Per-file acknowledgement inside an [`UploadAck`].
#[derive(Debug, Clone, Deserialize)]
pub struct UploadedFile {
    pub file_id: i64,
    pub client_index: ClientIndex,
    pub filename: String,
}

/// Response returned by `POST /jobs/{id}/upload`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UploadAck {
    #[serde(default)]
    pub files: Vec<UploadedFile>,
}

/// Errors from the job REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum JobClientError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The service returned a non-2xx status code.
    #[error("{message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// `detail` from the response body, else the status reason text.
        message: String,
    },
}

// ---------------------------------------------------------------------------
// JobApi
// ---------------------------------------------------------------------------

/// The four wire-protocol operations plus stream subscription.
#[async_trait]
pub trait JobApi: Send + Sync + 'static {
    /// Create a job for `total_files` images.
    async fn create_job(
        &self,
        total_files: usize,
        application_data: Option<&[ApplicationRow]>,
    ) -> Result<JobCreated, JobClientError>;

    /// Push one chunk of files with their client indices.
    async fn upload_chunk(
        &self,
        job_id: &str,
        chunk: &[(SourceFile, ClientIndex)],
    ) -> Result<UploadAck, JobClientError>;

    /// Signal that no further chunks will arrive.
    async fn complete_job(&self, job_id: &str) -> Result<(), JobClientError>;

    /// Address of the job's result stream. Pure, no network access.
    fn stream_url(&self, job_id: &str) -> String;

    /// Connect to the job's result stream.
    async fn open_stream(&self, job_id: &str) -> Result<EventStream, StreamError>;
}

// ---------------------------------------------------------------------------
// JobClient
// ---------------------------------------------------------------------------

/// HTTP client for one analysis service.
#[derive(Clone)]
pub struct JobClient {
    client: reqwest::Client,
    api_base: String,
}

impl JobClient {
    /// Create a new client.
    ///
    /// * `api_base` - API root, e.g. `http://host:8000/api`.
    pub fn new(api_base: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), api_base)
    }

    /// Create a client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, api_base: impl Into<String>) -> Self {
        let api_base = api_base.into().trim_end_matches('/').to_string();
        Self { client, api_base }
    }

    /// Create a client targeting [`build_api_base`].
    pub fn from_build_config() -> Self {
        Self::new(build_api_base())
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    fn job_url(&self, job_id: &str, action: &str) -> String {
        format!("{}/jobs/{}/{}", self.api_base, job_id, action)
    }

    // ---- private helpers ----

    /// Ensure the response has a success status code, otherwise turn it
    /// into [`JobClientError::Api`].
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, JobClientError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(JobClientError::Api {
            status: status.as_u16(),
            message: error_message(status, &body),
        })
    }

    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, JobClientError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl JobApi for JobClient {
    /// Sends `POST /jobs` with `{total_files, application_data?}`.
    async fn create_job(
        &self,
        total_files: usize,
        application_data: Option<&[ApplicationRow]>,
    ) -> Result<JobCreated, JobClientError> {
        let body = CreateJobRequest {
            total_files,
            application_data,
        };

        let response = self
            .client
            .post(format!("{}/jobs", self.api_base))
            .json(&body)
            .send()
            .await?;

        let created: JobCreated = Self::parse_response(response).await?;
        tracing::info!(job_id = %created.job_id, total_files, "Job created");
        Ok(created)
    }

    /// Sends `POST /jobs/{id}/upload` as multipart: one `files` part per
    /// file and a `client_indices` JSON array in the same order.
    async fn upload_chunk(
        &self,
        job_id: &str,
        chunk: &[(SourceFile, ClientIndex)],
    ) -> Result<UploadAck, JobClientError> {
        let mut form = Form::new();
        for (file, _) in chunk {
            let body = reqwest::Body::from(file.bytes().clone());
            let part = Part::stream_with_length(body, file.size() as u64)
                .file_name(file.name().to_string())
                .mime_str(file.media_type())?;
            form = form.part("files", part);
        }
        form = form.text("client_indices", client_indices_json(chunk));

        let response = self
            .client
            .post(self.job_url(job_id, "upload"))
            .multipart(form)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Sends `POST /jobs/{id}/complete`, discarding the body.
    async fn complete_job(&self, job_id: &str) -> Result<(), JobClientError> {
        let response = self
            .client
            .post(self.job_url(job_id, "complete"))
            .send()
            .await?;

        Self::ensure_success(response).await?;
        tracing::info!(job_id, "Uploads marked complete");
        Ok(())
    }

    fn stream_url(&self, job_id: &str) -> String {
        self.job_url(job_id, "stream")
    }

    async fn open_stream(&self, job_id: &str) -> Result<EventStream, StreamError> {
        sse::connect(&self.client, &self.stream_url(job_id)).await
    }
}

/// JSON array of the chunk's client indices, in file order.
fn client_indices_json(chunk: &[(SourceFile, ClientIndex)]) -> String {
    let indices: Vec<String> = chunk.iter().map(|(_, idx)| idx.to_string()).collect();
    format!("[{}]", indices.join(","))
}

/// User-facing message for a failed response: the `detail` string from a
/// JSON error body, else the status reason text.
pub(crate) fn error_message(status: reqwest::StatusCode, body: &str) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        detail: serde_json::Value,
    }

    serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.detail.as_str().map(str::to_string))
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .map(str::to_string)
                .unwrap_or_else(|| status.as_u16().to_string())
        })
}
