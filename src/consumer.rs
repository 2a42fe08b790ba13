//! Consumer boundary
//!
//! Interfaces to the document side: handing off accepted attachments,
//! asking which content types can be ingested, and resolving correspondents.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Maximum length of a task label, in characters
pub const TASK_NAME_MAX_CHARS: usize = 100;

/// Everything the consumer needs to ingest one attachment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumeRequest {
    pub path: PathBuf,
    pub override_filename: String,
    pub override_title: String,
    pub override_correspondent_id: Option<i64>,
    pub override_document_type_id: Option<i64>,
    pub override_tag_ids: Vec<i64>,
    pub task_name: String,
}

/// A request with the id it was queued under
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumeTask {
    pub id: Uuid,
    pub request: ConsumeRequest,
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Consume queue is closed")]
    Closed,
}

/// Fire-and-forget hand-off to the ingestion pipeline
pub trait ConsumeDispatcher: Send + Sync {
    fn dispatch(&self, request: ConsumeRequest) -> Result<Uuid, DispatchError>;
}

/// Dispatcher that queues tasks on an unbounded tokio channel
#[derive(Clone)]
pub struct ChannelDispatcher {
    tx: mpsc::UnboundedSender<ConsumeTask>,
}

impl ChannelDispatcher {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ConsumeTask>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ConsumeDispatcher for ChannelDispatcher {
    fn dispatch(&self, request: ConsumeRequest) -> Result<Uuid, DispatchError> {
        let id = Uuid::new_v4();
        self.tx
            .send(ConsumeTask { id, request })
            .map_err(|_| DispatchError::Closed)?;
        Ok(id)
    }
}

/// "Can this sniffed content type be ingested?"
pub trait MimeSupport: Send + Sync {
    fn is_supported(&self, mime_type: &str) -> bool;
}

/// Fixed allowlist of ingestible content types
#[derive(Debug, Clone)]
pub struct SupportedMimeTypes {
    types: HashSet<String>,
}

impl Default for SupportedMimeTypes {
    fn default() -> Self {
        let types = [
            mime::APPLICATION_PDF.essence_str(),
            mime::IMAGE_PNG.essence_str(),
            mime::IMAGE_JPEG.essence_str(),
            mime::IMAGE_GIF.essence_str(),
            "image/tiff",
            "image/webp",
            mime::TEXT_PLAIN.essence_str(),
            mime::TEXT_CSV.essence_str(),
        ]
        .iter()
        .map(|t| t.to_string())
        .collect();

        Self { types }
    }
}

impl SupportedMimeTypes {
    /// Default allowlist plus `extra` entries
    pub fn with_extra<I, S>(extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut supported = Self::default();
        supported.types.extend(
            extra
                .into_iter()
                .map(|t| t.as_ref().trim().to_ascii_lowercase())
                .filter(|t| !t.is_empty()),
        );
        supported
    }
}

impl MimeSupport for SupportedMimeTypes {
    fn is_supported(&self, mime_type: &str) -> bool {
        self.types.contains(&mime_type.to_ascii_lowercase())
    }
}

/// Correspondent lookup, backed by persistent storage
pub trait CorrespondentDirectory: Send + Sync {
    /// Return the id of the correspondent called `name`, creating it if needed
    fn get_or_create(&self, name: &str) -> Result<i64, Box<dyn std::error::Error + Send + Sync>>;
}
