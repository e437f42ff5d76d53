//! Settings Models
//!
//! Application configuration stored in config.toml.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use wiki_lens_core::ProxyConfig;
use wiki_lens_llm::{ModelSettings, RetryPolicy};

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// Base URL of the knowledge-base backend
    pub backend_url: String,
    /// User access token sent as a bearer token to the backend
    pub access_token: String,
    /// Navigation cache lifetime in seconds
    pub cache_ttl_secs: u64,
    /// Bound on waiting for a response to start
    pub request_timeout_secs: u64,
    /// Bound on silence within an open stream
    pub stream_idle_timeout_secs: u64,
    /// Search results requested per page (1..=50)
    pub search_page_size: u32,
    /// Retries for rate-limited or dropped plain calls
    pub max_retries: u32,
    /// Model used for analysis calls
    pub llm: LlmSettings,
    /// Prompt templates with `{PLACEHOLDER}` slots
    pub prompts: PromptTemplates,
    /// Batching thresholds
    pub analysis: AnalysisSettings,
    /// Outbound proxy, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy: Option<ProxyConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LlmSettings {
    pub api_key: String,
    pub model: String,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AnalysisSettings {
    /// Trees with more nodes than this are split into batches
    pub batch_threshold: usize,
    /// Root nodes per batch
    pub batch_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PromptTemplates {
    pub wiki_analysis: String,
    pub doc_analysis: String,
    pub doc_import_analysis: String,
    pub batch_summary: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            backend_url: "http://127.0.0.1:5000".to_string(),
            access_token: String::new(),
            cache_ttl_secs: 300,
            request_timeout_secs: 30,
            stream_idle_timeout_secs: 120,
            search_page_size: 10,
            max_retries: 3,
            llm: LlmSettings::default(),
            prompts: PromptTemplates::default(),
            analysis: AnalysisSettings::default(),
            proxy: None,
        }
    }
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: "deepseek-reasoner".to_string(),
            max_tokens: 8192,
        }
    }
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            batch_threshold: 2500,
            batch_size: 1,
        }
    }
}

impl Default for PromptTemplates {
    fn default() -> Self {
        Self {
            wiki_analysis: DEFAULT_WIKI_ANALYSIS_PROMPT.to_string(),
            doc_analysis: DEFAULT_DOC_ANALYSIS_PROMPT.to_string(),
            doc_import_analysis: DEFAULT_DOC_IMPORT_PROMPT.to_string(),
            batch_summary: DEFAULT_BATCH_SUMMARY_PROMPT.to_string(),
        }
    }
}

impl AppConfig {
    pub fn model_settings(&self) -> ModelSettings {
        ModelSettings {
            api_key: self.llm.api_key.clone(),
            model: self.llm.model.clone(),
            max_tokens: self.llm.max_tokens,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn stream_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.stream_idle_timeout_secs)
    }

    /// Page size as sent to the search endpoint; the server caps it at 50.
    pub fn effective_page_size(&self) -> u32 {
        self.search_page_size.clamp(1, 50)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if url::Url::parse(&self.backend_url).is_err() {
            return Err(format!("backend_url is not a valid URL: {}", self.backend_url));
        }
        if self.request_timeout_secs == 0 || self.stream_idle_timeout_secs == 0 {
            return Err("timeouts must be at least one second".to_string());
        }
        if self.llm.model.trim().is_empty() {
            return Err("llm.model must not be empty".to_string());
        }
        if self.llm.max_tokens == 0 {
            return Err("llm.max_tokens must be positive".to_string());
        }
        if self.analysis.batch_threshold == 0 || self.analysis.batch_size == 0 {
            return Err("analysis.batch_threshold and analysis.batch_size must be positive".to_string());
        }
        let prompts = [
            ("wiki_analysis", &self.prompts.wiki_analysis),
            ("doc_analysis", &self.prompts.doc_analysis),
            ("doc_import_analysis", &self.prompts.doc_import_analysis),
            ("batch_summary", &self.prompts.batch_summary),
        ];
        if let Some((name, _)) = prompts.iter().find(|(_, t)| t.trim().is_empty()) {
            return Err(format!("prompts.{} must not be empty", name));
        }
        Ok(())
    }

    /// Apply a partial update to the configuration
    pub fn apply_update(&mut self, update: SettingsUpdate) {
        if let Some(url) = update.backend_url {
            self.backend_url = url;
        }
        if let Some(token) = update.access_token {
            self.access_token = token;
        }
        if let Some(key) = update.api_key {
            self.llm.api_key = key;
        }
        if let Some(model) = update.model {
            self.llm.model = model;
        }
        if let Some(max_tokens) = update.max_tokens {
            self.llm.max_tokens = max_tokens;
        }
        if let Some(threshold) = update.batch_threshold {
            self.analysis.batch_threshold = threshold;
        }
        if let Some(size) = update.batch_size {
            self.analysis.batch_size = size;
        }
    }
}

/// Settings update request (partial update)
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SettingsUpdate {
    pub backend_url: Option<String>,
    pub access_token: Option<String>,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub batch_threshold: Option<usize>,
    pub batch_size: Option<usize>,
}

const DEFAULT_WIKI_ANALYSIS_PROMPT: &str = "\
You are a knowledge management expert. Evaluate the structure of the knowledge base below.

## Material
**Knowledge base title**:
{WIKI_TITLE}

**Knowledge base nodes**:
{KNOWLEDGE_BASE_STRUCTURE}

## Criteria (30 points total)
Score each criterion from 1 to 10 and explain the score.

### 1. Logic (1-10)
Are the relationships between nodes clear, and is knowledge easy to find?

### 2. Completeness (1-10)
Does the knowledge base cover the main knowledge of its domain? Is anything important missing?

### 3. Extensibility (1-10)
Is it easy to add new nodes as knowledge grows?

## Total
**Total** (out of 30)

## Suggestions
- **Node name (https://feishu.cn/wiki/<token> as a markdown link)**: concrete suggestion
";

const DEFAULT_DOC_ANALYSIS_PROMPT: &str = "\
You are a document quality expert. Evaluate the document below in the context of its knowledge base.

- **Knowledge base title**:
{WIKI_TITLE}

- **Current document**:
{CURRENT_DOCUMENT}

- **Knowledge base nodes**:
{KNOWLEDGE_BASE_NODE}

## Dimensions (40 points total)
Score each dimension from 1 to 10 and explain the score.

### 1. Placement (1-10)
Does the document sit in the right place of the tree for readers to find it?

### 2. Structure and sufficiency (1-10)
Is the document well organized and complete?

### 3. Value to readers (1-10)
Does the content solve real problems for its audience?

### 4. Reference value for question answering (1-10)
Is the content accurate and rich enough to ground model answers?

## Total
**Total** (out of 40)

## Summary
- **Strengths**
- **Weaknesses**
- **Improvements**
";

const DEFAULT_DOC_IMPORT_PROMPT: &str = "\
You are a knowledge management expert. A document is about to be imported into the knowledge base below.

**Knowledge base title**:
{WIKI_TITLE}

**Knowledge base nodes**:
{KNOWLEDGE_BASE_STRUCTURE}

**Document to import**:
{IMPORTED_DOCUMENT_CONTENT}

Recommend the best parent node for the document (name it with its token), explain why, \
and list any nodes whose content overlaps with the document.
";

const DEFAULT_BATCH_SUMMARY_PROMPT: &str = "\
The knowledge base was too large for one analysis, so it was analyzed in batches, one per group of root nodes.
Root nodes covered: {ROOT_NODES}

Batch results:
{BATCH_RESULTS}

Write a summary across all batches. For each batch, name its root nodes and restate its key findings, \
then give overall conclusions and the most important suggestions for the whole knowledge base.
";
