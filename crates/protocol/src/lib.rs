//! Data and wire types for the ingest uploader.
//!
//! Everything that crosses a crate boundary or the network lives here:
//! the caller-facing [`UploadItem`] model, the [`CommitPayload`] sent to the
//! ingestion endpoint, and the endpoint constants both HTTP clients use.

pub mod constants;
pub mod payload;
pub mod types;

pub use payload::{
    CommitPayload, Destination, ElementSource, SessionReference, Target, TargetElement,
    extract_error_message,
};
pub use types::{Blob, BlobData, Origin, UploadItem, UploadSource};

/// Errors produced while building protocol values.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid source: {0}")]
    InvalidSource(String),
}
