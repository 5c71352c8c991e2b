//! Turns queued items into commit requests.

use ingest_protocol::constants::ERROR_FILE_NOT_PROVIDED;
use ingest_protocol::{
    Blob, CommitPayload, Destination, ElementSource, Target, TargetElement, UploadItem,
    UploadSource,
};

/// Everything the orchestrator needs to upload and commit one or more items.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub payload: CommitPayload,
    /// Binary sources still to be transferred, in reference order.
    pub files: Vec<Blob>,
    /// Set when the items cannot be uploaded; nothing will be sent.
    pub error_message: Option<String>,
    /// Multi-file dataset assembled server-side.
    pub composite: bool,
}

/// Builds the commit payload skeleton for a list of items.
pub trait PayloadBuilder: Send + Sync {
    fn build(&self, items: &[UploadItem], container_id: &str) -> UploadRequest;
}

/// One target into the container's dataset collection, one element per
/// source. Composite items collapse into a single `composite` element whose
/// parts are listed under `composite.items`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultPayloadBuilder;

impl PayloadBuilder for DefaultPayloadBuilder {
    fn build(&self, items: &[UploadItem], container_id: &str) -> UploadRequest {
        let mut request = UploadRequest {
            payload: CommitPayload::new(container_id),
            files: Vec::new(),
            error_message: None,
            composite: false,
        };

        if items.is_empty() || items.iter().any(|item| item.sources.is_empty()) {
            request.error_message = Some(ERROR_FILE_NOT_PROVIDED.into());
            return request;
        }

        let mut elements = Vec::new();
        for item in items {
            let parts: Vec<TargetElement> = item
                .sources
                .iter()
                .map(|source| element_for(source, item, &mut request.files))
                .collect();

            if item.composite {
                request.composite = true;
                let mut element = TargetElement::new(ElementSource::Composite);
                element.name = Some(item.name().to_string());
                element.extra = item.metadata.clone();
                element.extra.insert(
                    "composite".into(),
                    serde_json::json!({ "items": parts }),
                );
                elements.push(element);
            } else {
                elements.extend(parts);
            }
        }

        request.payload.targets.push(Target {
            destination: Destination::default(),
            elements,
        });
        request
    }
}

fn element_for(source: &UploadSource, item: &UploadItem, files: &mut Vec<Blob>) -> TargetElement {
    let mut element = match source {
        UploadSource::Blob(blob) => {
            files.push(blob.clone());
            let mut e = TargetElement::new(ElementSource::Files);
            e.name = Some(blob.name.clone());
            e
        }
        UploadSource::Url { url, name } => {
            let mut e = TargetElement::new(ElementSource::Url);
            e.url = Some(url.clone());
            e.name = name.clone();
            e
        }
        UploadSource::Pasted { content, name } => {
            let mut e = TargetElement::new(ElementSource::Pasted);
            e.paste_content = Some(content.clone());
            e.name = name.clone();
            e
        }
        UploadSource::Staged { path } => {
            let mut e = TargetElement::new(ElementSource::FtpImport);
            e.ftp_path = Some(path.clone());
            e
        }
    };
    if !item.composite {
        element.extra = item.metadata.clone();
    }
    element
}
