//! Commit client for the ingestion endpoint.
//!
//! `IngestApi` is the seam between the upload flow and HTTP; `HttpIngest`
//! is the real implementation, tests use mocks.

use std::future::Future;
use std::pin::Pin;

use ingest_protocol::constants::{API_KEY_HEADER, DEFAULT_ERROR_MESSAGE, FETCH_ENDPOINT};
use ingest_protocol::{CommitPayload, extract_error_message};
use ingest_transfer::endpoint_url;
use reqwest::Url;
use tracing::{debug, error, warn};

use crate::error::UploadError;

pub type IngestFuture<'a> =
    Pin<Box<dyn Future<Output = Result<serde_json::Value, UploadError>> + Send + 'a>>;

/// Backend that accepts commit payloads.
pub trait IngestApi: Send + Sync {
    /// Posts `payload` and returns the response body.
    ///
    /// Failures are [`UploadError::Commit`] carrying the server's `err_msg`
    /// or `"Request failed."`.
    fn fetch<'a>(&'a self, payload: &'a CommitPayload) -> IngestFuture<'a>;
}

/// `POST {server}/api/tools/fetch` over reqwest.
pub struct HttpIngest {
    http: reqwest::Client,
    endpoint: Url,
    api_key: Option<String>,
}

impl HttpIngest {
    pub fn new(http: reqwest::Client, server_url: &str) -> Result<Self, UploadError> {
        let endpoint = endpoint_url(server_url, FETCH_ENDPOINT)
            .map_err(|e| UploadError::Precondition(e.message))?;
        Ok(Self {
            http,
            endpoint,
            api_key: None,
        })
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }
}

impl IngestApi for HttpIngest {
    fn fetch<'a>(&'a self, payload: &'a CommitPayload) -> IngestFuture<'a> {
        Box::pin(async move {
            let mut req = self.http.post(self.endpoint.clone()).json(payload);
            if let Some(key) = &self.api_key {
                req = req.header(API_KEY_HEADER, key);
            }

            let resp = match req.send().await {
                Ok(resp) => resp,
                Err(e) => {
                    warn!(error = %e, "commit request did not reach the server");
                    return Err(UploadError::Commit(DEFAULT_ERROR_MESSAGE.into()));
                }
            };

            let status = resp.status();
            let body = resp
                .bytes()
                .await
                .map_err(|_| UploadError::Commit(DEFAULT_ERROR_MESSAGE.into()))?;

            if !status.is_success() {
                debug!(status = %status, "commit rejected");
                return Err(UploadError::Commit(extract_error_message(&body)));
            }

            if body.is_empty() {
                return Ok(serde_json::Value::Null);
            }
            Ok(serde_json::from_slice(&body)?)
        })
    }
}

/// Commits `payload` once. No retry at this layer.
pub async fn submit_payload(
    api: &dyn IngestApi,
    payload: &CommitPayload,
) -> Result<serde_json::Value, UploadError> {
    debug!(
        history_id = %payload.history_id,
        targets = payload.targets.len(),
        "submitting payload"
    );
    match api.fetch(payload).await {
        Ok(response) => Ok(response),
        Err(e) => {
            error!(history_id = %payload.history_id, error = %e, "commit failed");
            Err(e)
        }
    }
}
