//! Upload error types.

use ingest_transfer::TransferError;

/// Errors produced while uploading one item.
///
/// `Display` is the message shown to the user for a failed item.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    /// Item data was missing or invalid; nothing was sent.
    #[error("{0}")]
    Precondition(String),

    #[error(transparent)]
    Transfer(#[from] TransferError),

    /// The ingestion endpoint rejected the commit.
    #[error("{0}")]
    Commit(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl UploadError {
    /// Whether the failure came from an authorization rejection.
    pub fn is_forbidden(&self) -> bool {
        matches!(self, UploadError::Transfer(TransferError::Forbidden(_)))
    }
}
