//! Backend Collaborators
//!
//! The knowledge-base backend is consumed through these traits: bulk and
//! paged tree fetch, document content, keyword search and cloud export.
//! [`HttpWikiBackend`] implements all of them over HTTP; tests plug in
//! scripted fakes.

pub mod http;

use async_trait::async_trait;
use serde::Deserialize;
use wiki_lens_core::NavigationNode;
use wiki_lens_llm::{ByteStream, TransportResult};

use crate::models::export::{ExportRequest, ExportedDocument};

pub use http::HttpWikiBackend;

/// One page of a node's children.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct NodePage {
    #[serde(default)]
    pub items: Vec<NavigationNode>,
    #[serde(default)]
    pub has_more: bool,
    #[serde(default)]
    pub page_token: Option<String>,
}

/// Source of knowledge-base trees.
#[async_trait]
pub trait TreeSource: Send + Sync {
    /// Progress-reporting pull of the whole forest.
    async fn open_bulk_fetch(&self, space_id: &str) -> TransportResult<ByteStream>;

    /// One page of the children of `parent` (the top level when `None`).
    async fn fetch_children(
        &self,
        space_id: &str,
        parent: Option<&str>,
        page_token: Option<&str>,
    ) -> TransportResult<NodePage>;
}

/// Source of document bodies.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    async fn fetch_document(&self, doc_id: &str) -> TransportResult<String>;
}

/// Streaming keyword search.
#[async_trait]
pub trait SearchTransport: Send + Sync {
    async fn open_search(
        &self,
        query: &str,
        page_size: u32,
        page_token: Option<&str>,
    ) -> TransportResult<ByteStream>;
}

/// Publishes markdown reports as cloud documents.
#[async_trait]
pub trait CloudExporter: Send + Sync {
    async fn export_markdown(&self, request: &ExportRequest) -> TransportResult<ExportedDocument>;
}
