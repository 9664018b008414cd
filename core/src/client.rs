//! Typed access to the agent backend's HTTP endpoints.

use std::path::Path;

use reqwest::Response;
use reqwest::StatusCode;
use reqwest::multipart;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use serde_json::json;
use studio_protocol::EagerRunRequest;
use studio_protocol::ErrorDetail;
use studio_protocol::HistorySnapshot;
use studio_protocol::RunRequest;
use studio_protocol::StateUpdate;
use studio_protocol::ThreadState;
use tracing::debug;
use tracing::trace;
use tracing::warn;

use crate::config::Config;
use crate::default_client::create_client;
use crate::error::Result;
use crate::error::StudioErr;
use crate::util::backoff;

const UNSPECIFIED_ERROR: &str = "Unspecified error.";

/// A file to be uploaded through `/ingest` before a turn starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestFile {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl IngestFile {
    pub fn new(file_name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes: bytes.into(),
        }
    }

    pub async fn from_path(path: &Path) -> Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        Ok(Self { file_name, bytes })
    }
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    request_max_retries: u64,
}

impl ApiClient {
    pub fn new(config: &Config) -> Self {
        Self {
            http: create_client(&config.originator),
            base_url: config.base_url.clone(),
            request_max_retries: config.request_max_retries,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    pub async fn get_thread_state(&self, thread_id: &str) -> Result<ThreadState> {
        self.get_json(&format!("/threads/{thread_id}/state")).await
    }

    /// The thread's checkpoint log, oldest to newest.
    pub async fn get_history(&self, thread_id: &str) -> Result<Vec<HistorySnapshot>> {
        self.get_json(&format!("/threads/{thread_id}/history")).await
    }

    pub async fn update_thread_state(&self, thread_id: &str, update: &StateUpdate) -> Result<Value> {
        let url = self.url(&format!("/threads/{thread_id}/state"));
        trace!("POST to {url}");
        let resp = self.http.post(&url).json(update).send().await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp.json().await.unwrap_or(Value::Null));
        }
        let body = resp.text().await.unwrap_or_default();
        let detail = serde_json::from_str::<ErrorDetail>(&body)
            .ok()
            .and_then(|e| e.detail)
            .unwrap_or_else(|| UNSPECIFIED_ERROR.to_string());
        Err(StudioErr::Request { status, detail })
    }

    /// Opens a run stream. The response body is the server-sent event
    /// stream; a non-2xx status is reported as an error.
    pub async fn open_run_stream<I: Serialize>(&self, request: &RunRequest<I>) -> Result<Response> {
        let url = self.url("/runs/stream");
        trace!("POST to {url}");
        let resp = self
            .http
            .post(&url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(request)
            .send()
            .await?;
        if resp.status().is_success() {
            return Ok(resp);
        }
        let status = resp.status();
        let detail = resp.text().await.unwrap_or_default();
        debug!("run stream rejected with {status}: {detail}");
        Err(StudioErr::Request { status, detail })
    }

    /// Runs to completion without streaming. A failing response's body text
    /// becomes the error detail verbatim.
    pub async fn invoke_eager(&self, request: &EagerRunRequest) -> Result<Value> {
        let url = self.url("/runs/eager");
        trace!("POST to {url}");
        let resp = self.http.post(&url).json(request).send().await?;
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(StudioErr::Request {
                status,
                detail: body,
            });
        }
        Ok(serde_json::from_str(&body).unwrap_or(Value::String(body)))
    }

    pub async fn ingest_files(&self, thread_id: &str, files: &[IngestFile]) -> Result<Value> {
        let url = self.url("/ingest");
        let config = json!({ "configurable": { "thread_id": thread_id } });
        let mut form = multipart::Form::new();
        for file in files {
            form = form.part(
                "files",
                multipart::Part::bytes(file.bytes.clone()).file_name(file.file_name.clone()),
            );
        }
        form = form.text("config", config.to_string());

        debug!("uploading {} file(s) for thread {thread_id}", files.len());
        let resp = self.http.post(&url).multipart(form).send().await?;
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(StudioErr::Request {
                status,
                detail: body,
            });
        }
        Ok(serde_json::from_str(&body).unwrap_or(Value::Null))
    }

    pub async fn config_schema(&self) -> Result<Value> {
        self.get_json("/runs/config_schema").await
    }

    pub async fn input_schema(&self) -> Result<Value> {
        self.get_json("/runs/input_schema").await
    }

    pub async fn output_schema(&self) -> Result<Value> {
        self.get_json("/runs/output_schema").await
    }

    /// GET with retries on 5xx and connection errors.
    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.url(path);
        let mut attempt = 0;
        loop {
            attempt += 1;
            trace!("GET {url} (attempt {attempt})");
            match self.try_get_json(&url).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt <= self.request_max_retries => {
                    let delay = backoff(attempt);
                    warn!("GET {url} failed ({err}); retrying in {delay:?}");
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn try_get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let resp = self.http.get(url).send().await?;
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(StudioErr::Request {
                status,
                detail: error_detail(status, &body),
            });
        }
        Ok(serde_json::from_str(&body)?)
    }
}

fn error_detail(status: StatusCode, body: &str) -> String {
    match serde_json::from_str::<ErrorDetail>(body).ok().and_then(|e| e.detail) {
        Some(detail) => detail,
        None if body.trim().is_empty() => format!("request failed with status {status}"),
        None => body.to_string(),
    }
}
