//! Contract between the transfer engine and a resumable upload protocol.

use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};

/// Boxed future returned by [`ResumableTransport`] methods.
pub type TransportFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, TransportError>> + Send + 'a>>;

/// A failed protocol call.
///
/// `status` is the HTTP status when the server answered, `None` for
/// connectivity failures and timeouts.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct TransportError {
    pub status: Option<u16>,
    pub message: String,
}

impl TransportError {
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
        }
    }

    /// Explicit authorization refusal; never retried.
    pub fn is_forbidden(&self) -> bool {
        self.status == Some(403)
    }

    /// The session no longer exists server-side.
    pub fn is_gone(&self) -> bool {
        matches!(self.status, Some(404) | Some(410))
    }
}

/// Parameters for creating a new resumable session.
#[derive(Debug, Clone)]
pub struct NewSession {
    pub fingerprint: String,
    pub length: u64,
    /// Key/value pairs sent as upload metadata.
    pub metadata: Vec<(String, String)>,
}

/// A previously created session discovered by fingerprint.
#[derive(Debug, Clone, PartialEq)]
pub struct PreviousSession {
    pub url: String,
    pub created_at: DateTime<Utc>,
}

/// A resumable upload protocol.
///
/// Implemented over HTTP by [`TusClient`](crate::TusClient) and in process
/// by [`MemoryTransport`](crate::MemoryTransport).
pub trait ResumableTransport: Send + Sync {
    /// Sessions previously created for `fingerprint`, most recent first.
    fn find_previous<'a>(&'a self, fingerprint: &'a str)
    -> TransportFuture<'a, Vec<PreviousSession>>;

    /// Creates a session and returns its URL.
    fn create_session<'a>(&'a self, session: &'a NewSession) -> TransportFuture<'a, String>;

    /// Number of bytes the server has accepted for `url`.
    fn query_offset<'a>(&'a self, url: &'a str) -> TransportFuture<'a, u64>;

    /// Appends `data` at `offset` and returns the new accepted offset.
    fn push_chunk<'a>(&'a self, url: &'a str, offset: u64, data: Vec<u8>)
    -> TransportFuture<'a, u64>;

    /// Drops any stored session for `fingerprint`.
    fn forget<'a>(&'a self, fingerprint: &'a str) -> TransportFuture<'a, ()>;
}
