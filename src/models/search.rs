//! Search Session Models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use wiki_lens_core::SearchResultItem;

/// Lifecycle of a search session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchStatus {
    Initializing,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

/// Inputs that move a session between states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchSignal {
    StreamOpened,
    Finished,
    Failed,
    Cancelled,
}

impl SearchStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SearchStatus::Completed | SearchStatus::Failed | SearchStatus::Cancelled
        )
    }

    /// The transition function; `None` when the signal does not apply.
    pub fn next(self, signal: SearchSignal) -> Option<SearchStatus> {
        use SearchSignal as S;
        use SearchStatus::*;
        match (self, signal) {
            (Initializing, S::StreamOpened) => Some(Processing),
            (Processing, S::Finished) => Some(Completed),
            (Initializing | Processing, S::Failed) => Some(Failed),
            (Initializing | Processing, S::Cancelled) => Some(Cancelled),
            _ => None,
        }
    }
}

/// One keyword search and its accumulated results.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SearchSession {
    pub id: String,
    pub keyword: String,
    /// Page token the stream was opened with
    pub opened_with: Option<String>,
    /// Next-page token from the latest `initial` record
    pub page_token: Option<String>,
    pub status: SearchStatus,
    pub results: Vec<SearchResultItem>,
    pub has_more: bool,
    pub fetched_count: u64,
    pub total_unique_spaces: Option<u64>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl SearchSession {
    pub fn new(id: String, keyword: String, page_token: Option<String>) -> Self {
        Self {
            id,
            keyword,
            opened_with: page_token,
            page_token: None,
            status: SearchStatus::Initializing,
            results: Vec::new(),
            has_more: false,
            fetched_count: 0,
            total_unique_spaces: None,
            error: None,
            created_at: Utc::now(),
        }
    }

    /// Apply a signal; ignored once the session is terminal.
    pub fn apply(&mut self, signal: SearchSignal) -> bool {
        match self.status.next(signal) {
            Some(next) => {
                self.status = next;
                true
            }
            None => false,
        }
    }

    pub fn is_loading(&self) -> bool {
        !self.status.is_terminal()
    }
}

/// Progress reported upward by a running search.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SearchUpdate {
    Started {
        session_id: String,
    },
    Initial {
        session_id: String,
        has_more: bool,
        total_unique_spaces: Option<u64>,
    },
    Item {
        session_id: String,
        item: SearchResultItem,
        fetched_count: u64,
    },
    Completed {
        session_id: String,
        total: usize,
        has_more: bool,
    },
    Failed {
        session_id: String,
        message: String,
    },
}
