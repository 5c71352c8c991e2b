//! Resumable chunked transfer with fingerprint-based resume.
//!
//! The [`ChunkedTransfer`] engine pushes one [`Blob`](ingest_protocol::Blob)
//! through a [`ResumableTransport`] in ordered chunks. Transports:
//!
//! - [`TusClient`]: tus 1.0.0 over HTTP, remembering sessions in a
//!   [`SessionStore`] so they can be rediscovered after a restart.
//! - [`MemoryTransport`]: in-process sessions, for tests and dry runs.

mod chunked;
mod engine;
mod fingerprint;
mod memory;
mod retry;
mod store;
mod transport;
mod tus;
mod types;

pub use chunked::{Chunk, ChunkReader};
pub use engine::{ChunkedTransfer, TransferEvent, percent_complete, session_id_from_url};
pub use fingerprint::fingerprint;
pub use memory::MemoryTransport;
pub use retry::RetryPolicy;
pub use store::{SessionStore, StoreError, StoredSession, default_store_path};
pub use transport::{
    NewSession, PreviousSession, ResumableTransport, TransportError, TransportFuture,
};
pub use tus::{TusClient, endpoint_url};
pub use types::TransferSession;

pub use ingest_protocol::constants::DEFAULT_CHUNK_SIZE;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("upload not authorized: {0}")]
    Forbidden(String),

    #[error("cancelled")]
    Cancelled,

    #[error("Maximum number of attempts reached.")]
    AttemptsExhausted,

    #[error("invalid session URL: {0}")]
    InvalidSessionUrl(String),
}
