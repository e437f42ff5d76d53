//! Cloud Export Models

use serde::{Deserialize, Serialize};

/// A markdown report to publish as a cloud document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExportRequest {
    pub title: String,
    #[serde(rename = "content")]
    pub markdown_content: String,
}

/// The document created by an export.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExportedDocument {
    pub document_id: String,
    pub document_url: String,
    #[serde(default)]
    pub title: Option<String>,
}

/// Response body of the export endpoint: `{data}` or `{error, code}`.
#[derive(Debug, Clone, Deserialize)]
pub struct ExportResponse {
    #[serde(default)]
    pub data: Option<ExportedDocument>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub code: Option<serde_json::Value>,
}
