//! HTTP implementation of the backend collaborators.

use std::time::Duration;

use async_trait::async_trait;
use mini_moka::sync::Cache;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;
use wiki_lens_llm::{
    fetch_json, open_stream, with_retry, ByteStream, RetryPolicy, TransportError,
    TransportResult,
};

use super::{CloudExporter, DocumentSource, NodePage, SearchTransport, TreeSource};
use crate::models::export::{ExportRequest, ExportResponse, ExportedDocument};
use crate::utils::error::{AppError, AppResult};

/// Document bodies change rarely within a session.
const DOCUMENT_CACHE_TTL: Duration = Duration::from_secs(300);
const DOCUMENT_CACHE_CAPACITY: u64 = 64;

/// Knowledge-base backend reached over HTTP.
pub struct HttpWikiBackend {
    client: reqwest::Client,
    base_url: Url,
    access_token: String,
    open_timeout: Duration,
    retry: RetryPolicy,
    documents: Cache<String, String>,
}

#[derive(Debug, Deserialize)]
struct DocumentBody {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Serialize)]
struct SearchBody<'a> {
    query: &'a str,
    page_size: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    page_token: Option<&'a str>,
}

impl HttpWikiBackend {
    pub fn new(
        client: reqwest::Client,
        base_url: &str,
        access_token: impl Into<String>,
        open_timeout: Duration,
        retry: RetryPolicy,
    ) -> AppResult<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| AppError::config(format!("invalid backend url {}: {}", base_url, e)))?;
        Ok(Self {
            client,
            base_url,
            access_token: access_token.into(),
            open_timeout,
            retry,
            documents: Cache::builder()
                .max_capacity(DOCUMENT_CACHE_CAPACITY)
                .time_to_live(DOCUMENT_CACHE_TTL)
                .build(),
        })
    }

    fn url(&self, segments: &[&str]) -> TransportResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| TransportError::InvalidRequest {
                message: format!("backend url cannot be a base: {}", self.base_url),
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn get(&self, url: Url) -> reqwest::RequestBuilder {
        self.client.get(url).bearer_auth(&self.access_token)
    }

    fn post(&self, url: Url) -> reqwest::RequestBuilder {
        self.client.post(url).bearer_auth(&self.access_token)
    }
}

#[async_trait]
impl TreeSource for HttpWikiBackend {
    async fn open_bulk_fetch(&self, space_id: &str) -> TransportResult<ByteStream> {
        let url = self.url(&["api", "wiki", space_id, "nodes", "all", "stream"])?;
        info!(%space_id, "opening bulk tree fetch");
        open_stream(self.get(url), self.open_timeout).await
    }

    async fn fetch_children(
        &self,
        space_id: &str,
        parent: Option<&str>,
        page_token: Option<&str>,
    ) -> TransportResult<NodePage> {
        let url = self.url(&["api", "wiki", space_id, "nodes"])?;
        let mut query: Vec<(&str, &str)> = Vec::new();
        if let Some(parent) = parent {
            query.push(("parent_node_token", parent));
        }
        if let Some(token) = page_token {
            query.push(("page_token", token));
        }
        debug!(%space_id, ?parent, ?page_token, "fetching node page");
        fetch_json(self.get(url).query(&query), self.open_timeout).await
    }
}

#[async_trait]
impl DocumentSource for HttpWikiBackend {
    async fn fetch_document(&self, doc_id: &str) -> TransportResult<String> {
        if let Some(content) = self.documents.get(&doc_id.to_string()) {
            debug!(%doc_id, "document cache hit");
            return Ok(content);
        }

        let url = self.url(&["api", "wiki", "doc", doc_id])?;
        let body: DocumentBody = with_retry(self.retry, "document fetch", || {
            fetch_json(self.get(url.clone()), self.open_timeout)
        })
        .await?;

        self.documents
            .insert(doc_id.to_string(), body.content.clone());
        Ok(body.content)
    }
}

#[async_trait]
impl SearchTransport for HttpWikiBackend {
    async fn open_search(
        &self,
        query: &str,
        page_size: u32,
        page_token: Option<&str>,
    ) -> TransportResult<ByteStream> {
        let url = self.url(&["api", "wiki", "search"])?;
        let body = SearchBody {
            query,
            page_size,
            page_token,
        };
        info!(%query, page_size, ?page_token, "opening search stream");
        open_stream(self.post(url).json(&body), self.open_timeout).await
    }
}

#[async_trait]
impl CloudExporter for HttpWikiBackend {
    async fn export_markdown(&self, request: &ExportRequest) -> TransportResult<ExportedDocument> {
        let url = self.url(&["api", "feishu", "documents", "export-markdown"])?;
        let response: ExportResponse = with_retry(self.retry, "cloud export", || {
            fetch_json(self.post(url.clone()).json(request), self.open_timeout)
        })
        .await?;

        match (response.data, response.error) {
            (Some(document), None) => Ok(document),
            (_, Some(error)) => Err(TransportError::ServerError {
                message: match response.code {
                    Some(code) => format!("{} (code: {})", error, code),
                    None => error,
                },
                status: None,
            }),
            (None, None) => Err(TransportError::parse(
                "export response carried no document",
            )),
        }
    }
}
