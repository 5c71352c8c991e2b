//! tus 1.0.0 client over HTTP.

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::Utc;
use ingest_protocol::constants::{API_KEY_HEADER, RESUMABLE_UPLOAD_ENDPOINT, TUS_VERSION};
use reqwest::header::{CONTENT_TYPE, LOCATION};
use reqwest::{RequestBuilder, Response, StatusCode, Url};
use tracing::{debug, trace, warn};

use crate::store::{SessionStore, StoredSession};
use crate::transport::{
    NewSession, PreviousSession, ResumableTransport, TransportError, TransportFuture,
};

const TUS_RESUMABLE: &str = "Tus-Resumable";
const UPLOAD_LENGTH: &str = "Upload-Length";
const UPLOAD_OFFSET: &str = "Upload-Offset";
const UPLOAD_METADATA: &str = "Upload-Metadata";
const OFFSET_OCTET_STREAM: &str = "application/offset+octet-stream";

/// Resumable transport speaking the tus core protocol.
///
/// Created sessions are recorded in a [`SessionStore`] under their
/// fingerprint; discovery is a store lookup followed by a `HEAD` on the
/// remembered URL.
pub struct TusClient {
    http: reqwest::Client,
    endpoint: Url,
    api_key: Option<String>,
    store: Arc<SessionStore>,
}

impl TusClient {
    /// Creates a client for the resumable endpoint under `server_url`.
    pub fn new(
        http: reqwest::Client,
        server_url: &str,
        store: Arc<SessionStore>,
    ) -> Result<Self, TransportError> {
        Ok(Self {
            http,
            endpoint: endpoint_url(server_url, RESUMABLE_UPLOAD_ENDPOINT)?,
            api_key: None,
            store,
        })
    }

    /// Sends `x-api-key` with every request.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// The session collection URL.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    async fn send(&self, req: RequestBuilder) -> Result<Response, TransportError> {
        let req = req.header(TUS_RESUMABLE, TUS_VERSION);
        let req = match &self.api_key {
            Some(key) => req.header(API_KEY_HEADER, key),
            None => req,
        };
        let resp = req
            .send()
            .await
            .map_err(|e| TransportError::network(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let message = if body.trim().is_empty() {
                format!("unexpected status {status}")
            } else {
                format!("unexpected status {status}: {}", body.trim())
            };
            return Err(TransportError::http(status.as_u16(), message));
        }
        Ok(resp)
    }
}

impl ResumableTransport for TusClient {
    fn find_previous<'a>(
        &'a self,
        fingerprint: &'a str,
    ) -> TransportFuture<'a, Vec<PreviousSession>> {
        Box::pin(async move {
            Ok(self
                .store
                .find(fingerprint)
                .into_iter()
                .map(|s| PreviousSession {
                    url: s.url,
                    created_at: s.created_at,
                })
                .collect())
        })
    }

    fn create_session<'a>(&'a self, session: &'a NewSession) -> TransportFuture<'a, String> {
        Box::pin(async move {
            let mut req = self
                .http
                .post(self.endpoint.clone())
                .header(UPLOAD_LENGTH, session.length.to_string())
                .body(Vec::new());
            if !session.metadata.is_empty() {
                req = req.header(UPLOAD_METADATA, encode_metadata(&session.metadata));
            }

            let resp = self.send(req).await?;
            if resp.status() != StatusCode::CREATED {
                warn!(status = %resp.status(), "session created with unexpected status");
            }
            let location = resp
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| {
                    TransportError::http(resp.status().as_u16(), "missing Location header")
                })?;
            let url = self
                .endpoint
                .join(location)
                .map_err(|e| TransportError::network(format!("invalid Location {location}: {e}")))?
                .to_string();

            debug!(url = %url, length = session.length, "tus session created");

            let stored = StoredSession {
                url: url.clone(),
                size: session.length,
                created_at: Utc::now(),
            };
            if let Err(e) = self.store.record(&session.fingerprint, stored) {
                warn!(error = %e, "failed to remember upload session");
            }
            Ok(url)
        })
    }

    fn query_offset<'a>(&'a self, url: &'a str) -> TransportFuture<'a, u64> {
        Box::pin(async move {
            let resp = self.send(self.http.head(url)).await?;
            let offset = header_u64(&resp, UPLOAD_OFFSET)?;
            trace!(url = %url, offset, "queried upload offset");
            Ok(offset)
        })
    }

    fn push_chunk<'a>(
        &'a self,
        url: &'a str,
        offset: u64,
        data: Vec<u8>,
    ) -> TransportFuture<'a, u64> {
        Box::pin(async move {
            let len = data.len();
            let req = self
                .http
                .patch(url)
                .header(CONTENT_TYPE, OFFSET_OCTET_STREAM)
                .header(UPLOAD_OFFSET, offset.to_string())
                .body(data);
            let resp = self.send(req).await?;
            let new_offset = header_u64(&resp, UPLOAD_OFFSET)?;
            trace!(url = %url, offset, len, new_offset, "chunk accepted");
            Ok(new_offset)
        })
    }

    fn forget<'a>(&'a self, fingerprint: &'a str) -> TransportFuture<'a, ()> {
        Box::pin(async move {
            self.store
                .remove(fingerprint)
                .map_err(|e| TransportError::network(format!("session store: {e}")))
        })
    }
}

/// Joins `path` onto `server_url`, treating the server URL as a directory.
pub fn endpoint_url(server_url: &str, path: &str) -> Result<Url, TransportError> {
    let mut base = server_url.trim().to_string();
    if !base.ends_with('/') {
        base.push('/');
    }
    Url::parse(&base)
        .and_then(|u| u.join(path))
        .map_err(|e| TransportError::network(format!("invalid server URL {server_url}: {e}")))
}

/// Encodes `Upload-Metadata`: comma-separated `key base64(value)` pairs.
fn encode_metadata(metadata: &[(String, String)]) -> String {
    metadata
        .iter()
        .map(|(k, v)| format!("{k} {}", STANDARD.encode(v.as_bytes())))
        .collect::<Vec<_>>()
        .join(",")
}

fn header_u64(resp: &Response, name: &str) -> Result<u64, TransportError> {
    resp.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
        .ok_or_else(|| TransportError::network(format!("missing or invalid {name} header")))
}
