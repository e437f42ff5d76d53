//! Request Lifecycle Models

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// What a tracked request is doing. Cancellation can target one kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    WikiAnalysis,
    WikiAnalysisBatch,
    DocAnalysis,
    DocImportAnalysis,
    DocImportAnalysisBatch,
    BatchSummary,
    NavigationFetch,
    Search,
}

impl RequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::WikiAnalysis => "wiki_analysis",
            RequestKind::WikiAnalysisBatch => "wiki_analysis_batch",
            RequestKind::DocAnalysis => "doc_analysis",
            RequestKind::DocImportAnalysis => "doc_import_analysis",
            RequestKind::DocImportAnalysisBatch => "doc_import_analysis_batch",
            RequestKind::BatchSummary => "batch_summary",
            RequestKind::NavigationFetch => "navigation_fetch",
            RequestKind::Search => "search",
        }
    }

    /// Kinds that issue model calls.
    pub fn is_analysis(&self) -> bool {
        !matches!(self, RequestKind::NavigationFetch | RequestKind::Search)
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which live requests a cancellation applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KindFilter {
    All,
    /// Every kind that issues model calls
    Analysis,
    Kind(RequestKind),
}

impl KindFilter {
    pub fn matches(&self, kind: RequestKind) -> bool {
        match self {
            KindFilter::All => true,
            KindFilter::Analysis => kind.is_analysis(),
            KindFilter::Kind(k) => *k == kind,
        }
    }
}

impl From<RequestKind> for KindFilter {
    fn from(kind: RequestKind) -> Self {
        KindFilter::Kind(kind)
    }
}

/// Live request counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestStats {
    pub total: usize,
    pub by_kind: BTreeMap<RequestKind, usize>,
}
