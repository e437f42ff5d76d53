//! Navigation Cache Models

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use wiki_lens_core::NavigationNode;

/// State of the cached forest for one knowledge base.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationCacheEntry {
    /// Last successfully fetched forest; kept through later failures
    pub data: Option<Arc<Vec<NavigationNode>>>,
    pub fetched_at: Option<DateTime<Utc>>,
    /// Nodes counted by the current or last fetch
    pub node_count: u64,
    pub loading: bool,
    pub error: Option<String>,
}

impl NavigationCacheEntry {
    /// Whether `data` can be served without a fetch at `now`.
    pub fn is_fresh(&self, now: DateTime<Utc>, ttl: chrono::Duration) -> bool {
        match (&self.data, self.fetched_at) {
            (Some(_), Some(fetched_at)) => !self.loading && now - fetched_at < ttl,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_freshness() {
        let now = Utc::now();
        let ttl = chrono::Duration::seconds(300);
        let mut entry = NavigationCacheEntry {
            data: Some(Arc::new(vec![NavigationNode::new("n1", "Root")])),
            fetched_at: Some(now - chrono::Duration::seconds(299)),
            ..Default::default()
        };
        assert!(entry.is_fresh(now, ttl));

        entry.fetched_at = Some(now - chrono::Duration::seconds(300));
        assert!(!entry.is_fresh(now, ttl));

        entry.fetched_at = Some(now);
        entry.loading = true;
        assert!(!entry.is_fresh(now, ttl));

        assert!(!NavigationCacheEntry::default().is_fresh(now, ttl));
    }
}
