//! HTTP client for the EDA server.
//!
//! [`EdaClient`] covers the one-shot endpoints (dataset upload+analyze, report
//! history, plot listing) and implements [`Transport`](edastream_stream::Transport)
//! so a [`PipelineSession`](edastream_stream::PipelineSession) can open
//! `POST /generate-eda-stream` through it.

mod stream;

use std::path::Path;
use std::time::Duration;

use edastream_shared::{
    ClientConfig, CommentAsset, CommentRecord, CsvRecord, DatasetSummary, EdaError,
    GenerateEdaRequest, PlotListing, Result,
};
use reqwest::header::CONTENT_TYPE;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, instrument};
use url::Url;

/// User-Agent string for all requests.
const USER_AGENT: &str = concat!("edastream/", env!("CARGO_PKG_VERSION"));

/// Fallback failure messages when the server gives no `detail`.
const UPLOAD_FAILED: &str = "Failed to upload and analyze file";
const GENERATE_FAILED: &str = "Failed to generate EDA";
const REQUEST_FAILED: &str = "API request failed";

// ---------------------------------------------------------------------------
// EdaClient
// ---------------------------------------------------------------------------

/// Typed client for one EDA server.
#[derive(Debug, Clone)]
pub struct EdaClient {
    http: Client,
    base: Url,
    request_timeout: Duration,
}

impl EdaClient {
    /// Build a client from runtime configuration.
    ///
    /// No overall timeout is set on the underlying client so streams can stay
    /// open indefinitely; one-shot calls get `request_timeout` per request.
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let base = config.parsed_base_url()?;

        let http = Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| EdaError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base,
            request_timeout: config.request_timeout,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// Upload a dataset and get back its summary (`POST /load`).
    #[instrument(skip_all, fields(file = %file.display(), uid = %uid))]
    pub async fn upload_and_analyze(&self, file: &Path, uid: &str) -> Result<DatasetSummary> {
        let data = tokio::fs::read(file)
            .await
            .map_err(|e| EdaError::io(file, e))?;
        let file_name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                EdaError::validation(format!("'{}' has no file name", file.display()))
            })?;

        info!(bytes = data.len(), %file_name, "uploading dataset");

        let form = Form::new()
            .part("file", Part::bytes(data).file_name(file_name))
            .text("uid", uid.to_string());

        let request = self.http.post(self.endpoint(&["load"])?).multipart(form);
        let summary: DatasetSummary = self.send_json(request, UPLOAD_FAILED).await?;

        info!(
            csv_id = summary.csv_id.as_deref().unwrap_or("-"),
            rows = summary.total_rows,
            columns = summary.total_columns,
            "dataset analyzed"
        );
        Ok(summary)
    }

    /// Run the whole analysis in one blocking call (`POST /generate-eda`).
    ///
    /// The response shape is server-defined; non-JSON bodies come back as a
    /// JSON string.
    #[instrument(skip_all, fields(csv_id = %request.csv_id))]
    pub async fn generate_eda(&self, request: &GenerateEdaRequest) -> Result<serde_json::Value> {
        let builder = self.http.post(self.endpoint(&["generate-eda"])?).json(request);
        let response = self.send(builder, GENERATE_FAILED).await?;

        let is_json = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains("application/json"));

        let body = response
            .text()
            .await
            .map_err(|e| EdaError::Network(format!("failed to read response body: {e}")))?;

        if is_json {
            serde_json::from_str(&body)
                .map_err(|e| EdaError::parse(format!("invalid JSON from /generate-eda: {e}")))
        } else {
            Ok(serde_json::Value::String(body))
        }
    }

    /// List plot files the server has written (`GET /list-plots`).
    pub async fn list_plots(&self, output_dir: &str) -> Result<PlotListing> {
        let mut url = self.endpoint(&["list-plots"])?;
        url.query_pairs_mut().append_pair("output_dir", output_dir);
        self.send_json(self.http.get(url), REQUEST_FAILED).await
    }

    /// Datasets previously uploaded by `uid`, in server order.
    pub async fn user_csvs(&self, uid: &str) -> Result<Vec<CsvRecord>> {
        #[derive(Deserialize)]
        struct Envelope {
            #[serde(default)]
            csvs: Vec<CsvRecord>,
        }

        let url = self.endpoint(&["storage", "csv", "user", uid])?;
        let envelope: Envelope = self.send_json(self.http.get(url), REQUEST_FAILED).await?;
        Ok(envelope.csvs)
    }

    /// Comments attached to a dataset.
    ///
    /// The server has answered both with a bare array and with
    /// `{ "comments": [...] }`; both are accepted.
    pub async fn csv_comments(&self, csv_id: &str) -> Result<Vec<CommentRecord>> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Comments {
            Bare(Vec<CommentRecord>),
            Wrapped {
                #[serde(default)]
                comments: Vec<CommentRecord>,
            },
        }

        let url = self.endpoint(&["storage", "csv", csv_id, "comments"])?;
        let comments: Comments = self.send_json(self.http.get(url), REQUEST_FAILED).await?;
        Ok(match comments {
            Comments::Bare(list) | Comments::Wrapped { comments: list } => list,
        })
    }

    /// Code and plot images generated for a comment.
    pub async fn comment_assets(&self, comment_id: &str) -> Result<Vec<CommentAsset>> {
        #[derive(Deserialize)]
        struct Envelope {
            #[serde(default)]
            assets: Vec<CommentAsset>,
        }

        let url = self.endpoint(&["storage", "csv", "comment", comment_id, "assets"])?;
        let envelope: Envelope = self.send_json(self.http.get(url), REQUEST_FAILED).await?;
        Ok(envelope.assets)
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    /// Append percent-encoded path segments to the base URL.
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| EdaError::config(format!("base_url '{}' cannot be a base", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Send a one-shot request; non-success statuses become [`EdaError::Http`].
    async fn send(&self, request: RequestBuilder, fallback: &str) -> Result<Response> {
        let response = request
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(network_error)?;

        let status = response.status();
        debug!(%status, url = %response.url(), "response received");

        if !status.is_success() {
            return Err(error_from_response(response, fallback).await);
        }
        Ok(response)
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        fallback: &str,
    ) -> Result<T> {
        let response = self.send(request, fallback).await?;
        let url = response.url().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| EdaError::Network(format!("{url}: failed to read body: {e}")))?;

        serde_json::from_slice(&body)
            .map_err(|e| EdaError::parse(format!("unexpected response from {}: {e}", url.path())))
    }
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

/// Error body shape used by the server (FastAPI `detail`, occasionally `message`).
#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    detail: Option<serde_json::Value>,
    #[serde(default)]
    message: Option<String>,
}

/// Turn a non-success response into [`EdaError::Http`].
///
/// Uses `detail` (validation errors carry a structured one, kept as JSON
/// text), then `message`, then `fallback`.
pub(crate) async fn error_from_response(response: Response, fallback: &str) -> EdaError {
    let status = response.status().as_u16();
    let body = response.bytes().await.unwrap_or_default();

    let detail = serde_json::from_slice::<ErrorBody>(&body)
        .ok()
        .and_then(|err| match err.detail {
            Some(serde_json::Value::String(s)) => Some(s),
            Some(serde_json::Value::Null) | None => err.message,
            Some(other) => Some(other.to_string()),
        })
        .filter(|detail| !detail.is_empty())
        .unwrap_or_else(|| fallback.to_string());

    EdaError::http(status, detail)
}

pub(crate) fn network_error(e: reqwest::Error) -> EdaError {
    match e.url() {
        Some(url) => EdaError::Network(format!("{url}: {e}")),
        None => EdaError::Network(e.to_string()),
    }
}
