//! Navigation Cache
//!
//! Holds the full forest of each knowledge base for a bounded time. A fetch
//! is a progress-reporting streaming pull; while one is in flight for a
//! knowledge base, later callers attach to it through a `watch` channel
//! instead of issuing a second pull, and each caller gets its own progress
//! callbacks.
//!
//! Every state write after an await re-checks that the slot still exists,
//! so nothing is written once the owning view has been torn down.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use wiki_lens_core::{count_forest, NavigationNode, StreamEvent};
use wiki_lens_llm::{
    rate_limit_delay, with_retry, EventStream, RetryPolicy, StreamOutcome, TransportError,
};

use crate::models::navigation::NavigationCacheEntry;
use crate::models::requests::RequestKind;
use crate::services::backend::TreeSource;
use crate::services::request_lifecycle::RequestLifecycleManager;
use crate::utils::error::{AppError, AppResult};

const DEFAULT_TTL_SECS: i64 = 300;

/// Wait used when a rate-limited pull carries no suggested delay.
const DEFAULT_RATE_LIMIT_DELAY: Duration = Duration::from_secs(60);

/// Source of "now" for TTL checks.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Options for [`NavigationCache::fetch_all`].
#[derive(Debug, Clone, Copy, Default)]
pub struct FetchOptions {
    /// Ignore a fresh entry and pull again
    pub force_refresh: bool,
}

#[derive(Debug, Clone)]
enum FetchState {
    Loading { node_count: u64 },
    Ready(Arc<Vec<NavigationNode>>),
    Failed(TransportError),
    Cancelled,
}

#[derive(Default)]
struct Slot {
    entry: NavigationCacheEntry,
    inflight: Option<watch::Receiver<FetchState>>,
}

struct CacheInner {
    source: Arc<dyn TreeSource>,
    lifecycle: Arc<RequestLifecycleManager>,
    clock: Arc<dyn Clock>,
    ttl: chrono::Duration,
    retry: RetryPolicy,
    idle_timeout: Option<Duration>,
    torn_down: AtomicBool,
    slots: Mutex<HashMap<String, Slot>>,
}

/// Time-bounded cache of knowledge-base forests, keyed by knowledge-base id.
#[derive(Clone)]
pub struct NavigationCache {
    inner: Arc<CacheInner>,
}

/// Configures a [`NavigationCache`].
pub struct NavigationCacheBuilder {
    source: Arc<dyn TreeSource>,
    lifecycle: Arc<RequestLifecycleManager>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    retry: RetryPolicy,
    idle_timeout: Option<Duration>,
}

impl NavigationCacheBuilder {
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    pub fn build(self) -> NavigationCache {
        NavigationCache {
            inner: Arc::new(CacheInner {
                source: self.source,
                lifecycle: self.lifecycle,
                clock: self.clock,
                ttl: chrono::Duration::from_std(self.ttl)
                    .unwrap_or_else(|_| chrono::Duration::seconds(DEFAULT_TTL_SECS)),
                retry: self.retry,
                idle_timeout: self.idle_timeout,
                torn_down: AtomicBool::new(false),
                slots: Mutex::new(HashMap::new()),
            }),
        }
    }
}

impl NavigationCache {
    pub fn builder(
        source: Arc<dyn TreeSource>,
        lifecycle: Arc<RequestLifecycleManager>,
    ) -> NavigationCacheBuilder {
        NavigationCacheBuilder {
            source,
            lifecycle,
            clock: Arc::new(SystemClock),
            ttl: Duration::from_secs(DEFAULT_TTL_SECS as u64),
            retry: RetryPolicy::default(),
            idle_timeout: None,
        }
    }

    /// Return the forest for `space_id`, from cache when fresh.
    ///
    /// `on_progress` receives the running node count while this caller
    /// waits on a pull, whether it started the pull or joined it.
    pub async fn fetch_all<F>(
        &self,
        space_id: &str,
        options: FetchOptions,
        mut on_progress: F,
    ) -> AppResult<Arc<Vec<NavigationNode>>>
    where
        F: FnMut(u64) + Send,
    {
        if self.inner.torn_down.load(Ordering::SeqCst) {
            return Err(AppError::Cancelled);
        }

        let mut rx = {
            let now = self.inner.clock.now();
            let mut slots = self.inner.slots();
            let slot = slots.entry(space_id.to_string()).or_default();

            if let Some(rx) = &slot.inflight {
                debug!(%space_id, "joining in-flight navigation fetch");
                rx.clone()
            } else if !options.force_refresh && slot.entry.is_fresh(now, self.inner.ttl) {
                debug!(%space_id, "navigation cache hit");
                if let Some(data) = &slot.entry.data {
                    return Ok(data.clone());
                }
                self.start_fetch(space_id, slot)
            } else {
                self.start_fetch(space_id, slot)
            }
        };

        loop {
            let state = rx.borrow_and_update().clone();
            match state {
                FetchState::Loading { node_count } => {
                    if node_count > 0 {
                        on_progress(node_count);
                    }
                }
                FetchState::Ready(data) => return Ok(data),
                FetchState::Failed(err) => return Err(err.into()),
                FetchState::Cancelled => return Err(AppError::Cancelled),
            }
            if rx.changed().await.is_err() {
                return Err(AppError::Cancelled);
            }
        }
    }

    fn start_fetch(&self, space_id: &str, slot: &mut Slot) -> watch::Receiver<FetchState> {
        let (tx, rx) = watch::channel(FetchState::Loading { node_count: 0 });
        slot.inflight = Some(rx.clone());
        slot.entry.loading = true;
        slot.entry.error = None;
        slot.entry.node_count = 0;

        info!(%space_id, "starting navigation fetch");
        let inner = self.inner.clone();
        let space_id = space_id.to_string();
        tokio::spawn(async move { inner.run_fetch(space_id, tx).await });
        rx
    }

    /// Current entry for display; `None` when nothing was ever requested.
    pub fn snapshot(&self, space_id: &str) -> Option<NavigationCacheEntry> {
        self.inner.slots().get(space_id).map(|s| s.entry.clone())
    }

    /// Drop cached data so the next call pulls again. An in-flight pull is
    /// left running and its result is cached when it lands.
    pub fn invalidate(&self, space_id: &str) {
        if let Some(slot) = self.inner.slots().get_mut(space_id) {
            slot.entry.data = None;
            slot.entry.fetched_at = None;
            debug!(%space_id, "navigation cache invalidated");
        }
    }

    /// Stop all pulls and forget every entry. Later calls fail as cancelled.
    pub fn teardown(&self) {
        self.inner.torn_down.store(true, Ordering::SeqCst);
        self.inner.slots().clear();
        self.inner
            .lifecycle
            .cancel(RequestKind::NavigationFetch);
    }
}

impl CacheInner {
    fn slots(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply `update` to the slot if it is still relevant.
    fn update_slot(&self, space_id: &str, update: impl FnOnce(&mut Slot)) {
        if self.torn_down.load(Ordering::SeqCst) {
            return;
        }
        if let Some(slot) = self.slots().get_mut(space_id) {
            update(slot);
        }
    }

    async fn run_fetch(self: Arc<Self>, space_id: String, tx: watch::Sender<FetchState>) {
        let handle = self.lifecycle.begin(RequestKind::NavigationFetch);
        let token = handle.token().clone();

        let result = self.fetch_with_retry(&space_id, &token, &tx).await;
        self.lifecycle.complete(handle.id());

        let final_state = match result {
            Ok(forest) => {
                let node_count = count_forest(&forest) as u64;
                let data = Arc::new(forest);
                let now = self.clock.now();
                info!(%space_id, node_count, "navigation fetch complete");
                self.update_slot(&space_id, |slot| {
                    slot.entry.data = Some(data.clone());
                    slot.entry.fetched_at = Some(now);
                    if slot.entry.node_count == 0 {
                        slot.entry.node_count = node_count;
                    }
                    slot.entry.loading = false;
                    slot.entry.error = None;
                    slot.inflight = None;
                });
                FetchState::Ready(data)
            }
            Err(AppError::Cancelled) => {
                debug!(%space_id, "navigation fetch cancelled");
                self.update_slot(&space_id, |slot| {
                    slot.entry.loading = false;
                    slot.inflight = None;
                });
                FetchState::Cancelled
            }
            Err(err) => {
                warn!(%space_id, error = %err, "navigation fetch failed");
                let message = err.to_string();
                self.update_slot(&space_id, |slot| {
                    slot.entry.loading = false;
                    slot.entry.error = Some(message);
                    slot.inflight = None;
                });
                FetchState::Failed(match err {
                    AppError::Transport(t) => t,
                    other => TransportError::Other {
                        message: other.to_string(),
                    },
                })
            }
        };
        let _ = tx.send(final_state);
    }

    async fn fetch_with_retry(
        &self,
        space_id: &str,
        token: &CancellationToken,
        tx: &watch::Sender<FetchState>,
    ) -> AppResult<Vec<NavigationNode>> {
        let mut attempt = 0;
        loop {
            let err = match self.fetch_once(space_id, token, tx).await {
                Ok(forest) => return Ok(forest),
                Err(err) => err,
            };
            let delay = match &err {
                AppError::Transport(t) if attempt < self.retry.max_retries => {
                    rate_limit_delay(t, DEFAULT_RATE_LIMIT_DELAY)
                }
                _ => None,
            };
            let Some(delay) = delay else {
                return Err(err);
            };

            attempt += 1;
            warn!(
                %space_id,
                attempt,
                delay_secs = delay.as_secs(),
                "navigation fetch rate limited, retrying"
            );
            if token
                .run_until_cancelled(tokio::time::sleep(delay))
                .await
                .is_none()
            {
                return Err(AppError::Cancelled);
            }
        }
    }

    async fn fetch_once(
        &self,
        space_id: &str,
        token: &CancellationToken,
        tx: &watch::Sender<FetchState>,
    ) -> AppResult<Vec<NavigationNode>> {
        let mut node_count: u64 = 0;
        self.report_progress(space_id, tx, node_count);

        let opened = token
            .run_until_cancelled(self.source.open_bulk_fetch(space_id))
            .await
            .ok_or(AppError::Cancelled)?;
        let body = match opened {
            Ok(body) => body,
            Err(TransportError::NotFound { .. }) => {
                info!(%space_id, "bulk fetch unavailable, falling back to paged fetch");
                return self.fetch_paged(space_id, token, tx).await;
            }
            Err(err) => return Err(err.into()),
        };

        let mut events = EventStream::new(body, token.clone());
        if let Some(limit) = self.idle_timeout {
            events = events.with_idle_timeout(limit);
        }

        while let Some(event) = events.next_event().await {
            match event {
                StreamEvent::Progress { count } => {
                    node_count += count;
                    self.report_progress(space_id, tx, node_count);
                }
                StreamEvent::Result { data } => return Ok(data),
                StreamEvent::Error { .. } | StreamEvent::Done => break,
                other => debug!(?other, "ignoring record in tree stream"),
            }
        }

        match events.outcome() {
            Some(StreamOutcome::Cancelled) => Err(AppError::Cancelled),
            Some(outcome) => Err(outcome
                .failure()
                .unwrap_or_else(|| TransportError::StreamFailed {
                    message: "tree stream ended without a result".to_string(),
                })
                .into()),
            None => Err(AppError::internal("tree stream stopped early")),
        }
    }

    /// Walk the tree one page at a time when the bulk pull is unavailable.
    async fn fetch_paged(
        &self,
        space_id: &str,
        token: &CancellationToken,
        tx: &watch::Sender<FetchState>,
    ) -> AppResult<Vec<NavigationNode>> {
        let counted = AtomicU64::new(0);
        let on_page = |items: usize| {
            let total = counted.fetch_add(items as u64, Ordering::SeqCst) + items as u64;
            self.report_progress(space_id, tx, total);
        };
        let walk = PagedWalk {
            source: self.source.as_ref(),
            space_id,
            token,
            retry: self.retry,
            on_page: &on_page,
        };
        walk.level(None).await
    }

    fn report_progress(&self, space_id: &str, tx: &watch::Sender<FetchState>, node_count: u64) {
        self.update_slot(space_id, |slot| slot.entry.node_count = node_count);
        tx.send_replace(FetchState::Loading { node_count });
    }
}

struct PagedWalk<'a> {
    source: &'a dyn TreeSource,
    space_id: &'a str,
    token: &'a CancellationToken,
    retry: RetryPolicy,
    on_page: &'a (dyn Fn(usize) + Send + Sync),
}

impl<'a> PagedWalk<'a> {
    fn level(&'a self, parent: Option<String>) -> BoxFuture<'a, AppResult<Vec<NavigationNode>>> {
        Box::pin(async move {
            let mut nodes = Vec::new();
            let mut page_token: Option<String> = None;
            loop {
                let fetch = with_retry(self.retry, "paged tree fetch", || {
                    self.source
                        .fetch_children(self.space_id, parent.as_deref(), page_token.as_deref())
                });
                let page = self
                    .token
                    .run_until_cancelled(fetch)
                    .await
                    .ok_or(AppError::Cancelled)??;

                (self.on_page)(page.items.len());
                nodes.extend(page.items);
                match page.page_token {
                    Some(next) if page.has_more => page_token = Some(next),
                    _ => break,
                }
            }

            // Id-less nodes stay as leaves; their children cannot be addressed.
            for node in nodes.iter_mut().filter(|n| n.has_children && !n.id.is_empty()) {
                node.children = self.level(Some(node.id.clone())).await?;
            }
            Ok(nodes)
        })
    }
}
