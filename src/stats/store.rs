//! Remote message-store contract and the fixed-shape records the pipeline works on.
use async_trait::async_trait;
use log::{debug, warn};

use crate::error::{ItemFailure, StoreError};
use crate::stats::request_tracker::RequestTracker;

/// Endpoint name used when counting per-message fetches.
pub const GET_ENDPOINT: &str = "users.messages.get";

pub type MessageId = String;

/// How much of each message to request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetailLevel {
    /// Sender header only.
    Minimal,
    /// All headers plus the MIME part tree (needed for attachment detection).
    Full,
}

/// One page of identifiers returned by the list operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    pub ids: Vec<MessageId>,
    pub next_page_token: Option<String>,
}

/// Node of a message's MIME structure, reduced to what attachment detection needs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessagePart {
    pub mime_type: Option<String>,
    pub filename: Option<String>,
    pub attachment_id: Option<String>,
    pub parts: Vec<MessagePart>,
}

impl MessagePart {
    /// True if this part or any nested part carries a filename or an external attachment reference.
    pub fn has_attachment(&self) -> bool {
        let named = self.filename.as_deref().is_some_and(|f| !f.trim().is_empty());
        let referenced = self.attachment_id.as_deref().is_some_and(|a| !a.is_empty());

        named || referenced || self.parts.iter().any(MessagePart::has_attachment)
    }
}

/// Result of a single metadata fetch, validated at the ingestion boundary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageMetadata {
    pub id: MessageId,
    pub internal_timestamp_ms: i64,
    pub size_estimate_bytes: u64,
    pub sender_header: Option<String>,
    pub raw_headers: Vec<(String, String)>,
    pub has_parts: bool,
    pub part_tree: Option<MessagePart>,
}

impl MessageMetadata {
    /// First header with the given name (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.raw_headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Per-item outcome inside a successful composite request.
pub type BatchItem = Result<MessageMetadata, ItemFailure>;

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// List message identifiers matching `query`, one page at a time.
    async fn list_ids(
        &self,
        query: &str,
        labels: Option<&[String]>,
        page_size: u32,
        page_token: Option<&str>,
    ) -> Result<ListPage, StoreError>;

    /// Fetch metadata for a single message.
    async fn get_metadata(&self, id: &str, detail: DetailLevel) -> Result<MessageMetadata, StoreError>;

    /// Execute one composite request for a group of identifiers.
    ///
    /// An `Err` is a group-level failure. Items that fail on their own are
    /// returned as `ItemFailure`s next to the successful ones. Every
    /// sub-request actually sent is recorded on `tracker`.
    async fn batch_get(
        &self,
        ids: &[MessageId],
        detail: DetailLevel,
        tracker: &mut RequestTracker,
    ) -> Result<Vec<BatchItem>, StoreError> {
        let mut items = Vec::with_capacity(ids.len());

        for id in ids {
            tracker.record(GET_ENDPOINT);
            match self.get_metadata(id, detail).await {
                Ok(metadata) => items.push(Ok(metadata)),
                Err(e) if e.fails_group() => {
                    debug!("Item {} failed the whole group: {}", id, e);
                    return Err(e);
                }
                Err(e) => {
                    warn!("Message {} could not be fetched: {}", id, e);
                    items.push(Err(ItemFailure::new(id.as_str(), e.to_string())));
                }
            }
        }

        Ok(items)
    }
}
