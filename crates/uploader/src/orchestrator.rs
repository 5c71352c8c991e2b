//! Per-item upload flow.
//!
//! Picks one of three paths for a request:
//!
//! 1. **Transfer**: binary sources (or a composite item) are pushed through
//!    the chunked engine one after another, their references are attached
//!    to the payload, then the payload is committed.
//! 2. **Direct**: URL and server-staged elements are committed as-is; the
//!    backend fetches the data itself.
//! 3. **Paste**: pasted text is wrapped in a blob and takes the transfer path.

use std::sync::Arc;

use ingest_protocol::constants::{DEFAULT_PASTE_NAME, ERROR_FILE_NOT_PROVIDED};
use ingest_protocol::{Blob, ElementSource};
use ingest_transfer::{ChunkedTransfer, ResumableTransport, RetryPolicy, TransferEvent};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::builder::UploadRequest;
use crate::config::UploadConfig;
use crate::error::UploadError;
use crate::submitter::{IngestApi, submit_payload};

/// Non-terminal notification for one item.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemEvent {
    /// Whole-number percent of the current source.
    Progress(u8),
    /// Informational, e.g. a transient failure that will be retried.
    Warning(String),
}

/// Uploads and commits single requests.
pub struct Orchestrator {
    transport: Arc<dyn ResumableTransport>,
    api: Arc<dyn IngestApi>,
    chunk_size: u64,
    policy: RetryPolicy,
}

impl Orchestrator {
    pub fn new(
        transport: Arc<dyn ResumableTransport>,
        api: Arc<dyn IngestApi>,
        config: &UploadConfig,
    ) -> Self {
        Self {
            transport,
            api,
            chunk_size: config.chunk_size,
            policy: config.retry_policy(),
        }
    }

    pub fn api(&self) -> &dyn IngestApi {
        self.api.as_ref()
    }

    /// Runs `request` to a terminal outcome and returns the commit response.
    ///
    /// Cancelling `cancel` interrupts a transfer that is waiting to retry.
    pub async fn submit_upload(
        &self,
        request: UploadRequest,
        cancel: &CancellationToken,
        on_event: &(dyn Fn(ItemEvent) + Send + Sync),
    ) -> Result<serde_json::Value, UploadError> {
        let UploadRequest {
            mut payload,
            mut files,
            error_message,
            composite,
        } = request;

        if let Some(message) = error_message {
            return Err(UploadError::Precondition(message));
        }

        if files.is_empty() && !composite {
            let Some(element) = payload.first_element() else {
                return Err(UploadError::Precondition(ERROR_FILE_NOT_PROVIDED.into()));
            };
            match element.src {
                ElementSource::Url | ElementSource::FtpImport => {
                    debug!(src = ?element.src, "committing without transfer");
                    return submit_payload(self.api.as_ref(), &payload).await;
                }
                ElementSource::Pasted => {
                    let name = element
                        .name
                        .clone()
                        .filter(|n| !n.is_empty())
                        .unwrap_or_else(|| DEFAULT_PASTE_NAME.to_string());
                    let content = element.paste_content.clone().unwrap_or_default();
                    files.push(Blob::from_bytes(name, content.into_bytes()));
                }
                ElementSource::Files | ElementSource::Composite => {
                    return Err(UploadError::Precondition(ERROR_FILE_NOT_PROVIDED.into()));
                }
            }
        }

        let engine = ChunkedTransfer::new(
            self.transport.as_ref(),
            self.chunk_size,
            self.policy.clone(),
            cancel.clone(),
        );
        let forward = |event: TransferEvent| match event {
            TransferEvent::Progress { percent, .. } => on_event(ItemEvent::Progress(percent)),
            TransferEvent::Retrying {
                attempt,
                delay,
                reason,
            } => on_event(ItemEvent::Warning(format!(
                "Upload interrupted ({reason}), retry {attempt} in {}s.",
                delay.as_secs()
            ))),
        };

        for (i, blob) in files.iter().enumerate() {
            let reference = engine.transfer(blob, &payload.history_id, &forward).await?;
            payload.attach_reference(i, &reference);
        }

        info!(
            history_id = %payload.history_id,
            files = files.len(),
            "all sources transferred"
        );
        submit_payload(self.api.as_ref(), &payload).await
    }
}
