//! Commit payload sent to the ingestion endpoint.

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_ERROR_MESSAGE, DESTINATION_HDAS};

/// Reference to a completed resumable transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionReference {
    pub session_id: String,
    pub name: String,
}

/// Kind of a target element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementSource {
    /// Bytes delivered through a resumable transfer.
    Files,
    Url,
    Pasted,
    FtpImport,
    Composite,
}

/// Where the committed datasets land.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Destination {
    #[serde(rename = "type")]
    pub kind: String,
}

impl Default for Destination {
    fn default() -> Self {
        Self {
            kind: DESTINATION_HDAS.into(),
        }
    }
}

/// One dataset to create.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetElement {
    pub src: ElementSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paste_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ftp_path: Option<String>,
    /// Caller metadata (`ext`, `dbkey`, ...).
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl TargetElement {
    pub fn new(src: ElementSource) -> Self {
        Self {
            src,
            name: None,
            url: None,
            paste_content: None,
            ftp_path: None,
            extra: serde_json::Map::new(),
        }
    }
}

/// A group of elements sharing one destination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    #[serde(default)]
    pub destination: Destination,
    pub elements: Vec<TargetElement>,
}

/// Request body for `POST /api/tools/fetch`.
///
/// Transferred sources are attached as `"files_{i}|file_data"` entries in
/// `extra`, in place of the raw bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitPayload {
    pub history_id: String,
    #[serde(default)]
    pub targets: Vec<Target>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl CommitPayload {
    pub fn new(history_id: impl Into<String>) -> Self {
        Self {
            history_id: history_id.into(),
            targets: Vec::new(),
            extra: serde_json::Map::new(),
        }
    }

    /// Key under which the reference for transferred source `index` is stored.
    pub fn reference_key(index: usize) -> String {
        format!("files_{index}|file_data")
    }

    /// Attaches the reference for transferred source `index`.
    pub fn attach_reference(&mut self, index: usize, reference: &SessionReference) {
        let value = serde_json::json!({
            "session_id": reference.session_id,
            "name": reference.name,
        });
        self.extra.insert(Self::reference_key(index), value);
    }

    /// Returns the reference attached for source `index`, if any.
    pub fn reference(&self, index: usize) -> Option<SessionReference> {
        self.extra
            .get(&Self::reference_key(index))
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// First element of the first target.
    pub fn first_element(&self) -> Option<&TargetElement> {
        self.targets.first().and_then(|t| t.elements.first())
    }

    /// Appends all targets of `other`; used to aggregate staged items.
    pub fn merge(&mut self, other: CommitPayload) {
        self.targets.extend(other.targets);
        for (key, value) in other.extra {
            self.extra.entry(key).or_insert(value);
        }
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    err_msg: Option<String>,
}

/// Extracts `err_msg` from an error response body, falling back to
/// `"Request failed."` when the body is not JSON or has no message.
pub fn extract_error_message(body: &[u8]) -> String {
    serde_json::from_slice::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.err_msg)
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| DEFAULT_ERROR_MESSAGE.to_string())
}
