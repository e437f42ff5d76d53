//! Request Lifecycle Manager
//!
//! Every flow that starts network work tied to a view registers a handle
//! here. The handle carries the cancellation token that flow must observe at
//! each await point; the manager is the one place that can stop all work of
//! a kind (restarting an analysis, closing a dialog) or all work at once
//! (tearing down the view).

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::models::requests::{KindFilter, RequestKind, RequestStats};

/// A registered, cancellable reference to one in-flight request.
#[derive(Debug, Clone)]
pub struct RequestHandle {
    id: String,
    kind: RequestKind,
    token: CancellationToken,
    started_at: DateTime<Utc>,
}

impl RequestHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Registry of live request handles.
#[derive(Debug)]
pub struct RequestLifecycleManager {
    root: CancellationToken,
    handles: Mutex<HashMap<String, RequestHandle>>,
}

impl Default for RequestLifecycleManager {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestLifecycleManager {
    pub fn new() -> Self {
        Self {
            root: CancellationToken::new(),
            handles: Mutex::new(HashMap::new()),
        }
    }

    fn handles(&self) -> MutexGuard<'_, HashMap<String, RequestHandle>> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocate and register a handle. After [`shutdown`](Self::shutdown)
    /// the handle is born cancelled.
    pub fn begin(&self, kind: RequestKind) -> RequestHandle {
        let handle = RequestHandle {
            id: generate_request_id(kind),
            kind,
            token: self.root.child_token(),
            started_at: Utc::now(),
        };
        debug!(request_id = %handle.id, %kind, "request registered");
        self.handles().insert(handle.id.clone(), handle.clone());
        handle
    }

    /// Signal cancellation to every matching live handle and deregister
    /// them. Returns how many were cancelled.
    pub fn cancel(&self, filter: impl Into<KindFilter>) -> usize {
        let filter = filter.into();
        let cancelled: Vec<RequestHandle> = {
            let mut handles = self.handles();
            let ids: Vec<String> = handles
                .values()
                .filter(|h| filter.matches(h.kind))
                .map(|h| h.id.clone())
                .collect();
            ids.iter().filter_map(|id| handles.remove(id)).collect()
        };

        for handle in &cancelled {
            handle.token.cancel();
        }
        if !cancelled.is_empty() {
            info!(?filter, count = cancelled.len(), "requests cancelled");
        }
        cancelled.len()
    }

    /// Cancel every live handle.
    pub fn cancel_all(&self) -> usize {
        self.cancel(KindFilter::All)
    }

    /// Deregister a finished handle. Completing a handle that is already
    /// gone is a no-op; returns whether it was still registered.
    pub fn complete(&self, id: &str) -> bool {
        let removed = self.handles().remove(id).is_some();
        if removed {
            debug!(request_id = %id, "request completed");
        }
        removed
    }

    pub fn is_live(&self, id: &str) -> bool {
        self.handles().contains_key(id)
    }

    pub fn stats(&self) -> RequestStats {
        let handles = self.handles();
        let mut stats = RequestStats {
            total: handles.len(),
            ..Default::default()
        };
        for handle in handles.values() {
            *stats.by_kind.entry(handle.kind).or_insert(0) += 1;
        }
        stats
    }

    /// Cancel everything, including handles created afterwards.
    pub fn shutdown(&self) -> usize {
        self.root.cancel();
        self.cancel_all()
    }

    pub fn is_shut_down(&self) -> bool {
        self.root.is_cancelled()
    }
}

/// `{kind}_{millis}_{random}`
fn generate_request_id(kind: RequestKind) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "{}_{}_{}",
        kind,
        Utc::now().timestamp_millis(),
        &suffix[..9]
    )
}
