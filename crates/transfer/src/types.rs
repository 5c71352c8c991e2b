use std::time::{Duration, Instant};

/// Engine-side state of one in-flight chunked transfer.
#[derive(Debug, Clone)]
pub struct TransferSession {
    fingerprint: String,
    url: Option<String>,
    bytes_accepted: u64,
    bytes_total: u64,
    chunk_size: u64,
    /// Transient failures seen so far.
    attempts: u32,
    started_at: Instant,
}

impl TransferSession {
    /// Creates a session that has not yet been negotiated with the server.
    pub fn new(fingerprint: String, bytes_total: u64, chunk_size: u64) -> Self {
        Self {
            fingerprint,
            url: None,
            bytes_accepted: 0,
            bytes_total,
            chunk_size,
            attempts: 0,
            started_at: Instant::now(),
        }
    }

    /// Binds the session to a remote URL at the given accepted offset.
    pub fn bind(&mut self, url: String, bytes_accepted: u64) {
        self.url = Some(url);
        self.bytes_accepted = bytes_accepted.min(self.bytes_total);
    }

    /// Forgets the remote URL so the next attempt negotiates a new session.
    pub fn unbind(&mut self) {
        self.url = None;
        self.bytes_accepted = 0;
    }

    /// Records a server-acknowledged offset.
    pub fn accept(&mut self, offset: u64) {
        self.bytes_accepted = offset.min(self.bytes_total);
    }

    /// Counts a transient failure and returns the 1-based retry number.
    pub fn record_failure(&mut self) -> u32 {
        self.attempts = self.attempts.saturating_add(1);
        self.attempts
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn bytes_accepted(&self) -> u64 {
        self.bytes_accepted
    }

    pub fn bytes_total(&self) -> u64 {
        self.bytes_total
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Returns `true` once every byte has been accepted.
    pub fn is_complete(&self) -> bool {
        self.url.is_some() && self.bytes_accepted >= self.bytes_total
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}
