use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};

use crate::ProtocolError;

/// How an item entered the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Origin {
    /// Explicitly (re-)added by the caller; never deduplicated.
    New,
    /// Picked from the local filesystem.
    Local,
    /// Already staged server-side (FTP import directory).
    FtpStaged,
    /// Pasted text.
    Pasted,
    /// Remote URL fetched by the backend.
    Url,
}

/// Where a blob's bytes come from.
#[derive(Debug, Clone)]
pub enum BlobData {
    Memory(Arc<[u8]>),
    File(PathBuf),
}

/// A binary source with the identity attributes used for fingerprinting.
#[derive(Debug, Clone)]
pub struct Blob {
    pub name: String,
    /// MIME type; empty when unknown.
    pub content_type: String,
    pub size: u64,
    /// Milliseconds since the Unix epoch (0 for in-memory blobs).
    pub last_modified: i64,
    pub data: BlobData,
}

impl Blob {
    /// Creates an in-memory blob.
    pub fn from_bytes(name: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        let bytes: Arc<[u8]> = bytes.into();
        Self {
            name: name.into(),
            content_type: String::new(),
            size: bytes.len() as u64,
            last_modified: 0,
            data: BlobData::Memory(bytes),
        }
    }

    /// Creates a blob backed by a file on disk, reading size and mtime.
    pub fn from_path(path: &Path) -> Result<Self, ProtocolError> {
        let meta = std::fs::metadata(path)?;
        if !meta.is_file() {
            return Err(ProtocolError::InvalidSource(format!(
                "not a regular file: {}",
                path.display()
            )));
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| ProtocolError::InvalidSource(format!("no file name: {}", path.display())))?;
        let last_modified = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);

        Ok(Self {
            name,
            content_type: String::new(),
            size: meta.len(),
            last_modified,
            data: BlobData::File(path.to_path_buf()),
        })
    }

    /// Sets the MIME type.
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }
}

/// One source belonging to an [`UploadItem`].
#[derive(Debug, Clone)]
pub enum UploadSource {
    /// Local file or in-memory bytes; needs a chunked transfer.
    Blob(Blob),
    /// Remote URL; the backend fetches it itself.
    Url { url: String, name: Option<String> },
    /// Inline pasted text.
    Pasted {
        content: String,
        name: Option<String>,
    },
    /// File already present in the server-side staging area.
    Staged { path: String },
}

impl UploadSource {
    /// Display name used for dedup and logging.
    pub fn name(&self) -> &str {
        match self {
            UploadSource::Blob(blob) => &blob.name,
            UploadSource::Url { url, name } => name.as_deref().unwrap_or(url),
            UploadSource::Pasted { name, .. } => name.as_deref().unwrap_or(""),
            UploadSource::Staged { path } => path,
        }
    }

    /// Size in bytes as far as it is known locally.
    pub fn size(&self) -> u64 {
        match self {
            UploadSource::Blob(blob) => blob.size,
            UploadSource::Pasted { content, .. } => content.len() as u64,
            UploadSource::Url { .. } | UploadSource::Staged { .. } => 0,
        }
    }
}

/// One logical upload requested by the caller.
#[derive(Debug, Clone)]
pub struct UploadItem {
    /// Opaque caller-defined identity.
    pub id: String,
    pub sources: Vec<UploadSource>,
    /// Destination container (history) id.
    pub container_id: String,
    /// Extra fields merged into each commit element (`ext`, `dbkey`, ...).
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub origin: Origin,
    /// Multi-file dataset assembled server-side.
    pub composite: bool,
}

impl UploadItem {
    pub fn new(id: impl Into<String>, container_id: impl Into<String>, origin: Origin) -> Self {
        Self {
            id: id.into(),
            sources: Vec::new(),
            container_id: container_id.into(),
            metadata: serde_json::Map::new(),
            origin,
            composite: false,
        }
    }

    pub fn with_source(mut self, source: UploadSource) -> Self {
        self.sources.push(source);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Name of the first source, or the empty string.
    pub fn name(&self) -> &str {
        self.sources.first().map(UploadSource::name).unwrap_or("")
    }

    /// Total locally known size of all sources.
    pub fn size(&self) -> u64 {
        self.sources.iter().map(UploadSource::size).sum()
    }

    /// `name + size`, the key used to reject resubmission of the same file.
    pub fn dedup_key(&self) -> String {
        format!("{}{}", self.name(), self.size())
    }

    /// Whether every source is already staged server-side.
    pub fn is_staged(&self) -> bool {
        self.origin == Origin::FtpStaged
    }
}
