//! Streaming Analysis Client
//!
//! Requests to the analysis service carry a prompt template plus the values
//! for its `{PLACEHOLDER}` slots; the service fills the template and streams
//! the model's answer back as reasoning/content records.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::error::{TransportError, TransportResult};
use crate::http_client::open_stream;
use crate::stream_reader::ByteStream;

/// Placeholder names understood by the analysis prompts.
pub mod placeholders {
    pub const KNOWLEDGE_BASE_STRUCTURE: &str = "KNOWLEDGE_BASE_STRUCTURE";
    pub const WIKI_TITLE: &str = "WIKI_TITLE";
    pub const CURRENT_DOCUMENT: &str = "CURRENT_DOCUMENT";
    pub const KNOWLEDGE_BASE_NODE: &str = "KNOWLEDGE_BASE_NODE";
    pub const IMPORTED_DOCUMENT_CONTENT: &str = "IMPORTED_DOCUMENT_CONTENT";
    pub const BATCH_RESULTS: &str = "BATCH_RESULTS";
    pub const ROOT_NODES: &str = "ROOT_NODES";
}

/// Model credentials and limits shared by every call of one flow.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelSettings {
    pub api_key: String,
    pub model: String,
    pub max_tokens: u32,
}

/// The document being evaluated for import into the knowledge base.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImportTarget {
    #[serde(rename = "doc_token")]
    pub doc_id: String,
    #[serde(rename = "doc_type")]
    pub doc_kind: String,
    /// Rendered knowledge-base tree (or one batch of it)
    pub wiki_node_md: String,
    pub wiki_title: String,
}

/// One streaming analysis call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AnalysisRequest {
    pub api_key: String,
    pub model: String,
    pub max_tokens: u32,
    pub prompt_template: String,
    pub placeholders: BTreeMap<String, String>,
    #[serde(flatten)]
    pub import: Option<ImportTarget>,
}

impl AnalysisRequest {
    pub fn new(settings: &ModelSettings, prompt_template: impl Into<String>) -> Self {
        Self {
            api_key: settings.api_key.clone(),
            model: settings.model.clone(),
            max_tokens: settings.max_tokens,
            prompt_template: prompt_template.into(),
            placeholders: BTreeMap::new(),
            import: None,
        }
    }

    /// Set a placeholder; `None` fills the slot with an empty string.
    pub fn placeholder(mut self, name: &str, value: Option<impl Into<String>>) -> Self {
        self.placeholders.insert(
            name.to_string(),
            value.map(Into::into).unwrap_or_default(),
        );
        self
    }

    pub fn with_import(mut self, target: ImportTarget) -> Self {
        self.import = Some(target);
        self
    }

    /// Service path for this request.
    pub fn endpoint(&self) -> &'static str {
        if self.import.is_some() {
            "/api/llm/doc_import_analysis"
        } else {
            "/api/llm/stream_analysis"
        }
    }

    /// `{NAME}` slots in the template with no supplied value.
    pub fn unfilled_placeholders(&self) -> Vec<String> {
        let mut missing = Vec::new();
        let mut rest = self.prompt_template.as_str();
        while let Some(start) = rest.find('{') {
            let after = &rest[start + 1..];
            let Some(len) = after.find('}') else { break };
            let name = &after[..len];
            let is_slot = !name.is_empty()
                && name
                    .chars()
                    .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_');
            let server_filled =
                self.import.is_some() && name == placeholders::IMPORTED_DOCUMENT_CONTENT;
            if is_slot
                && !server_filled
                && !self.placeholders.contains_key(name)
                && !missing.iter().any(|m| m == name)
            {
                missing.push(name.to_string());
            }
            rest = &after[len + 1..];
        }
        missing
    }

    /// Fill the template locally, the way the service does.
    pub fn render_prompt(&self) -> String {
        self.placeholders
            .iter()
            .fold(self.prompt_template.clone(), |prompt, (name, value)| {
                prompt.replace(&format!("{{{name}}}"), value)
            })
    }
}

/// Opens analysis streams. The HTTP implementation talks to the analysis
/// service; tests substitute scripted bodies.
#[async_trait]
pub trait AnalysisTransport: Send + Sync {
    async fn open_analysis(&self, request: &AnalysisRequest) -> TransportResult<ByteStream>;
}

/// Analysis service reached over HTTP.
pub struct HttpAnalysisTransport {
    client: reqwest::Client,
    base_url: Url,
    open_timeout: Duration,
    access_token: Option<String>,
}

impl HttpAnalysisTransport {
    pub fn new(client: reqwest::Client, base_url: &str, open_timeout: Duration) -> TransportResult<Self> {
        let base_url = Url::parse(base_url).map_err(|e| TransportError::InvalidRequest {
            message: format!("invalid backend url {}: {}", base_url, e),
        })?;
        Ok(Self {
            client,
            base_url,
            open_timeout,
            access_token: None,
        })
    }

    /// User token sent as a bearer token. The import endpoint reads the
    /// document with it.
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        let token = token.into();
        self.access_token = (!token.trim().is_empty()).then_some(token);
        self
    }
}

#[async_trait]
impl AnalysisTransport for HttpAnalysisTransport {
    async fn open_analysis(&self, request: &AnalysisRequest) -> TransportResult<ByteStream> {
        if request.api_key.trim().is_empty() {
            return Err(TransportError::AuthenticationFailed {
                message: "analysis API key is not configured".to_string(),
            });
        }
        let missing = request.unfilled_placeholders();
        if !missing.is_empty() {
            warn!(?missing, "prompt template has unfilled placeholders");
        }

        let url = self
            .base_url
            .join(request.endpoint())
            .map_err(|e| TransportError::InvalidRequest {
                message: e.to_string(),
            })?;
        debug!(%url, model = %request.model, "opening analysis stream");

        let mut builder = self.client.post(url).json(request);
        if let Some(token) = &self.access_token {
            builder = builder.bearer_auth(token);
        }
        open_stream(builder, self.open_timeout).await
    }
}
