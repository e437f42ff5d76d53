//! In-memory collaborators shared by the integration tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{stream, StreamExt};

use wiki_lens::models::export::{ExportRequest, ExportedDocument};
use wiki_lens::services::backend::{
    CloudExporter, DocumentSource, NodePage, SearchTransport, TreeSource,
};
use wiki_lens::{AppConfig, Collaborators, SpaceViewState};
use wiki_lens_core::NavigationNode;
use wiki_lens_llm::{AnalysisRequest, AnalysisTransport, ByteStream, TransportError, TransportResult};

/// Scripted reply of one streamed call.
#[derive(Clone)]
pub enum Reply {
    /// Complete SSE body
    Body(String),
    /// These records, then the connection drops
    BrokenAfter(String),
    /// These records, then silence until cancelled
    Stalled(String),
    /// The call is refused before any data
    Refused(TransportError),
}

impl Reply {
    fn into_stream(self) -> TransportResult<ByteStream> {
        match self {
            Reply::Body(body) => Ok(stream::iter(vec![Ok(Bytes::from(body))]).boxed()),
            Reply::BrokenAfter(body) => Ok(stream::iter(vec![
                Ok(Bytes::from(body)),
                Err(TransportError::network("connection reset by peer")),
            ])
            .boxed()),
            Reply::Stalled(body) => Ok(stream::iter(vec![Ok(Bytes::from(body))])
                .chain(stream::pending())
                .boxed()),
            Reply::Refused(err) => Err(err),
        }
    }
}

/// An answer-only analysis stream.
pub fn answer(text: &str) -> Reply {
    Reply::Body(format!(
        "data: {{\"type\":\"reasoning\",\"content\":\"thinking\"}}\n\n\
         data: {{\"type\":\"content\",\"content\":{}}}\n\n\
         data: [DONE]\n\n",
        serde_json::to_string(text).unwrap()
    ))
}

pub fn detail(space_id: &str, title: &str, fetched_count: u64) -> String {
    format!(
        "data: {{\"type\":\"detail\",\"item\":{{\"space_id\":\"{space_id}\",\"title\":\"{title}\"}},\"fetched_count\":{fetched_count}}}\n\n"
    )
}

/// A root with `size - 1` direct children.
pub fn wide_root(id: &str, title: &str, size: usize) -> NavigationNode {
    let children = (1..size)
        .map(|i| NavigationNode::new(format!("{id}-{i}"), format!("{title} page {i}")))
        .collect();
    NavigationNode::new(id, title).with_children(children)
}

#[derive(Default)]
pub struct Backend {
    pub forest: Mutex<Vec<NavigationNode>>,
    pub tree_calls: Mutex<usize>,
    pub analysis_replies: Mutex<VecDeque<Reply>>,
    pub analysis_requests: Mutex<Vec<AnalysisRequest>>,
    pub search_replies: Mutex<VecDeque<Reply>>,
    /// (query, page_size, page_token) per search call
    pub search_calls: Mutex<Vec<(String, u32, Option<String>)>>,
    pub exported: Mutex<Vec<ExportRequest>>,
}

impl Backend {
    pub fn with_forest(forest: Vec<NavigationNode>) -> Arc<Self> {
        let backend = Self::default();
        *backend.forest.lock().unwrap() = forest;
        Arc::new(backend)
    }

    pub fn script_analysis(&self, replies: impl IntoIterator<Item = Reply>) {
        self.analysis_replies.lock().unwrap().extend(replies);
    }

    pub fn script_search(&self, replies: impl IntoIterator<Item = Reply>) {
        self.search_replies.lock().unwrap().extend(replies);
    }

    pub fn tree_calls(&self) -> usize {
        *self.tree_calls.lock().unwrap()
    }

    pub fn analysis_requests(&self) -> Vec<AnalysisRequest> {
        self.analysis_requests.lock().unwrap().clone()
    }

    pub fn view(self: &Arc<Self>, config: &AppConfig) -> SpaceViewState {
        SpaceViewState::with_collaborators(
            config,
            Collaborators {
                tree: self.clone(),
                documents: self.clone(),
                search: self.clone(),
                exporter: self.clone(),
                analysis: self.clone(),
            },
        )
    }
}

#[async_trait]
impl TreeSource for Backend {
    async fn open_bulk_fetch(&self, _space_id: &str) -> TransportResult<ByteStream> {
        *self.tree_calls.lock().unwrap() += 1;
        let forest = self.forest.lock().unwrap().clone();
        let count: usize = forest.iter().map(NavigationNode::subtree_size).sum();
        let body = format!(
            "data: {{\"type\":\"progress\",\"count\":{count}}}\n\n\
             data: {{\"type\":\"result\",\"data\":{}}}\n\n",
            serde_json::to_string(&forest).unwrap()
        );
        Reply::Body(body).into_stream()
    }

    async fn fetch_children(
        &self,
        _space_id: &str,
        _parent: Option<&str>,
        _page_token: Option<&str>,
    ) -> TransportResult<NodePage> {
        Ok(NodePage::default())
    }
}

#[async_trait]
impl DocumentSource for Backend {
    async fn fetch_document(&self, doc_id: &str) -> TransportResult<String> {
        Ok(format!("# Document {doc_id}\n\nOnboarding checklist."))
    }
}

#[async_trait]
impl SearchTransport for Backend {
    async fn open_search(
        &self,
        query: &str,
        page_size: u32,
        page_token: Option<&str>,
    ) -> TransportResult<ByteStream> {
        self.search_calls.lock().unwrap().push((
            query.to_string(),
            page_size,
            page_token.map(str::to_string),
        ));
        let reply = self
            .search_replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Reply::Body("data: [DONE]\n\n".into()));
        reply.into_stream()
    }
}

#[async_trait]
impl CloudExporter for Backend {
    async fn export_markdown(&self, request: &ExportRequest) -> TransportResult<ExportedDocument> {
        self.exported.lock().unwrap().push(request.clone());
        Ok(ExportedDocument {
            document_id: "doxcnReport".into(),
            document_url: "https://example.feishu.cn/docx/doxcnReport".into(),
            title: Some(request.title.clone()),
        })
    }
}

#[async_trait]
impl AnalysisTransport for Backend {
    async fn open_analysis(&self, request: &AnalysisRequest) -> TransportResult<ByteStream> {
        self.analysis_requests.lock().unwrap().push(request.clone());
        let reply = self
            .analysis_replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| answer("unscripted"));
        reply.into_stream()
    }
}
