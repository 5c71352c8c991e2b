//! Upload configuration.

use std::time::Duration;

use ingest_protocol::constants::DEFAULT_CHUNK_SIZE;
use ingest_transfer::RetryPolicy;

/// Settings shared by the orchestrator and the queue.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadConfig {
    /// Bytes per chunk push.
    pub chunk_size: u64,
    /// Retry cap for transient transfer failures; `None` retries forever.
    pub attempts: Option<u32>,
    /// Per-request HTTP timeout; `None` waits indefinitely.
    pub timeout: Option<Duration>,
    /// When `false` the queue holds at most one entry.
    pub multiple: bool,
    /// Backoff schedule; the last delay repeats.
    pub retry_delays: Vec<Duration>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            attempts: None,
            timeout: None,
            multiple: true,
            retry_delays: RetryPolicy::default().delays,
        }
    }
}

impl UploadConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            delays: self.retry_delays.clone(),
            max_attempts: self.attempts,
        }
    }

    /// Builds the HTTP client used by both the tus transport and the
    /// commit client.
    pub fn http_client(&self) -> Result<reqwest::Client, reqwest::Error> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }
        builder.build()
    }
}
