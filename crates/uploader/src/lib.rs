//! Upload queue and commit flow for the ingestion API.
//!
//! # Pipeline
//!
//! 1. **Admit**: [`UploadQueue::add`] dedups items and assigns indices
//! 2. **Build**: a [`PayloadBuilder`] turns an item into an [`UploadRequest`]
//! 3. **Transfer**: the [`Orchestrator`] pushes binary sources through the
//!    resumable chunked engine
//! 4. **Commit**: the payload, with session references attached, is posted
//!    to `api/tools/fetch`

pub mod builder;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod queue;
pub mod submitter;
pub mod types;

pub use builder::{DefaultPayloadBuilder, PayloadBuilder, UploadRequest};
pub use config::UploadConfig;
pub use error::UploadError;
pub use orchestrator::{ItemEvent, Orchestrator};
pub use queue::UploadQueue;
pub use submitter::{HttpIngest, IngestApi, IngestFuture, submit_payload};
pub use types::{EntryStatus, QueueEntry, QueueEvent, QueueIndex, QueueState};
