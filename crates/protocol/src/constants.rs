//! Endpoint paths, protocol versions and user-facing default messages.

/// Ingestion commit endpoint, relative to the server root.
pub const FETCH_ENDPOINT: &str = "api/tools/fetch";

/// Resumable upload (tus) collection endpoint, relative to the server root.
pub const RESUMABLE_UPLOAD_ENDPOINT: &str = "api/upload/resumable_upload/";

/// tus protocol version sent in every `Tus-Resumable` header.
pub const TUS_VERSION: &str = "1.0.0";

/// Header carrying the caller's API key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Default chunk size: 10 MiB.
pub const DEFAULT_CHUNK_SIZE: u64 = 10_485_760;

/// Prefix of every transfer fingerprint.
pub const FINGERPRINT_PREFIX: &str = "tus-br";

/// Name given to pasted content that has no explicit name.
pub const DEFAULT_PASTE_NAME: &str = "default";

/// Message reported when a commit fails without a server-provided reason.
pub const DEFAULT_ERROR_MESSAGE: &str = "Request failed.";

/// Message reported for an item that carries nothing to upload.
pub const ERROR_FILE_NOT_PROVIDED: &str = "File not provided.";

/// Message reported when a capped retry budget runs out.
pub const ERROR_ATTEMPTS_EXHAUSTED: &str = "Maximum number of attempts reached.";

/// Destination type for new history datasets.
pub const DESTINATION_HDAS: &str = "hdas";
