//! Search Session Manager
//!
//! Keyword search runs as sessions. At most one session is active: creating
//! a new one cancels and forgets the previous one. A session streams its
//! results from the search service until a `complete` record or the
//! sentinel, and `load_more` continues the active session from its stored
//! page token.
//!
//! Each session owns a lifecycle handle, and its id is the handle id. The
//! driver re-checks after every await that its session is still registered
//! and live, so a cancelled or replaced session never receives writes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use wiki_lens_core::StreamEvent;
use wiki_lens_llm::{EventStream, StreamOutcome};

use crate::models::requests::RequestKind;
use crate::models::search::{SearchSession, SearchSignal, SearchUpdate};
use crate::services::backend::SearchTransport;
use crate::services::request_lifecycle::{RequestHandle, RequestLifecycleManager};
use crate::utils::error::{AppError, AppResult};

/// Results requested per page when none is configured.
pub const DEFAULT_PAGE_SIZE: u32 = 10;

struct SessionSlot {
    session: SearchSession,
    handle: RequestHandle,
}

#[derive(Default)]
struct SearchState {
    sessions: HashMap<String, SessionSlot>,
    active: Option<String>,
}

struct SearchInner {
    transport: Arc<dyn SearchTransport>,
    lifecycle: Arc<RequestLifecycleManager>,
    page_size: u32,
    idle_timeout: Option<Duration>,
    state: Mutex<SearchState>,
}

/// Paging and liveness settings for search streams.
#[derive(Debug, Clone, Copy)]
pub struct SearchOptions {
    /// Clamped to 1..=50
    pub page_size: u32,
    pub idle_timeout: Option<Duration>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            idle_timeout: None,
        }
    }
}

/// A started search.
pub struct SearchTicket {
    pub session_id: String,
    task: JoinHandle<Option<SearchSession>>,
}

impl SearchTicket {
    /// Wait for the session to end. `None` when it was cancelled and
    /// cleaned up before finishing.
    pub async fn finished(self) -> Option<SearchSession> {
        self.task.await.ok().flatten()
    }
}

/// Owns the search sessions of one view.
#[derive(Clone)]
pub struct SearchSessionManager {
    inner: Arc<SearchInner>,
}

impl SearchSessionManager {
    pub fn new(
        transport: Arc<dyn SearchTransport>,
        lifecycle: Arc<RequestLifecycleManager>,
        options: SearchOptions,
    ) -> Self {
        Self {
            inner: Arc::new(SearchInner {
                transport,
                lifecycle,
                page_size: options.page_size.clamp(1, 50),
                idle_timeout: options.idle_timeout,
                state: Mutex::new(SearchState::default()),
            }),
        }
    }

    /// Register a new active session, cancelling the previous one.
    pub fn create_session(&self, keyword: &str, page_token: Option<String>) -> AppResult<String> {
        let keyword = keyword.trim();
        if keyword.is_empty() {
            return Err(AppError::validation("search keyword must not be empty"));
        }
        self.cancel_active();

        let handle = self.inner.lifecycle.begin(RequestKind::Search);
        let id = handle.id().to_string();
        let session = SearchSession::new(id.clone(), keyword.to_string(), page_token);

        let mut state = self.inner.state();
        state.sessions.insert(id.clone(), SessionSlot { session, handle });
        state.active = Some(id.clone());
        info!(session_id = %id, %keyword, "search session created");
        Ok(id)
    }

    /// Create a session for `keyword` and start streaming its results.
    pub fn search(
        &self,
        keyword: &str,
        page_token: Option<String>,
        updates: Option<mpsc::Sender<SearchUpdate>>,
    ) -> AppResult<SearchTicket> {
        let id = self.create_session(keyword, page_token)?;
        Ok(self.start(id, updates))
    }

    /// Continue the active session from its page token. Results of the
    /// earlier pages are carried into the new session.
    pub fn load_more(&self, updates: Option<mpsc::Sender<SearchUpdate>>) -> AppResult<SearchTicket> {
        let previous = self
            .active_session()
            .ok_or_else(|| AppError::not_found("no active search session"))?;
        if previous.is_loading() {
            return Err(AppError::validation("the current page is still loading"));
        }
        if !previous.has_more {
            return Err(AppError::validation("there are no more results"));
        }
        let Some(page_token) = previous.page_token.clone() else {
            return Err(AppError::validation("the search service sent no page token"));
        };

        let id = self.create_session(&previous.keyword, Some(page_token))?;
        if let Some(slot) = self.inner.state().sessions.get_mut(&id) {
            slot.session.results = previous.results;
            slot.session.fetched_count = previous.fetched_count;
            slot.session.total_unique_spaces = previous.total_unique_spaces;
        }
        debug!(session_id = %id, "loading next search page");
        Ok(self.start(id, updates))
    }

    fn start(&self, id: String, updates: Option<mpsc::Sender<SearchUpdate>>) -> SearchTicket {
        let inner = self.inner.clone();
        let session_id = id.clone();
        let task = tokio::spawn(async move { inner.drive(id, updates).await });
        SearchTicket { session_id, task }
    }

    pub fn get_session(&self, id: &str) -> Option<SearchSession> {
        self.inner.state().sessions.get(id).map(|s| s.session.clone())
    }

    pub fn active_session(&self) -> Option<SearchSession> {
        let state = self.inner.state();
        state
            .active
            .as_ref()
            .and_then(|id| state.sessions.get(id))
            .map(|s| s.session.clone())
    }

    /// Cancel session `id`, close its stream and forget it.
    pub fn cancel_session(&self, id: &str) -> bool {
        let slot = {
            let mut state = self.inner.state();
            if state.active.as_deref() == Some(id) {
                state.active = None;
            }
            state.sessions.remove(id)
        };
        let Some(mut slot) = slot else {
            return false;
        };
        let was_live = slot.session.apply(SearchSignal::Cancelled);
        slot.handle.token().cancel();
        self.inner.lifecycle.complete(slot.handle.id());
        if was_live {
            info!(session_id = %id, "search session cancelled");
        }
        true
    }

    /// Cancel whatever session is active.
    pub fn cancel_active(&self) -> bool {
        let active = self.inner.state().active.clone();
        match active {
            Some(id) => self.cancel_session(&id),
            None => false,
        }
    }

    /// Forget a finished session. A live session is cancelled first.
    pub fn cleanup_session(&self, id: &str) -> bool {
        self.cancel_session(id)
    }

    /// Cancel every session.
    pub fn cancel_all(&self) -> usize {
        let ids: Vec<String> = self.inner.state().sessions.keys().cloned().collect();
        ids.iter().filter(|id| self.cancel_session(id)).count()
    }
}

impl SearchInner {
    fn state(&self) -> MutexGuard<'_, SearchState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` on session `id` if it is still registered and live.
    fn with_live<R>(&self, id: &str, f: impl FnOnce(&mut SearchSession) -> R) -> Option<R> {
        let mut state = self.state();
        let slot = state.sessions.get_mut(id)?;
        if !slot.session.is_loading() || slot.handle.is_cancelled() {
            return None;
        }
        Some(f(&mut slot.session))
    }

    fn snapshot(&self, id: &str) -> Option<SearchSession> {
        self.state().sessions.get(id).map(|s| s.session.clone())
    }

    async fn drive(
        self: Arc<Self>,
        id: String,
        updates: Option<mpsc::Sender<SearchUpdate>>,
    ) -> Option<SearchSession> {
        let (keyword, page_token, handle) = {
            let state = self.state();
            let slot = state.sessions.get(&id)?;
            (
                slot.session.keyword.clone(),
                slot.session.opened_with.clone(),
                slot.handle.clone(),
            )
        };
        let notify = Notifier {
            updates,
            token: handle.token().clone(),
        };

        self.stream_results(&id, &keyword, page_token.as_deref(), &handle, &notify)
            .await;

        if handle.is_cancelled() {
            if let Some(slot) = self.state().sessions.get_mut(&id) {
                slot.session.apply(SearchSignal::Cancelled);
            }
        }
        self.snapshot(&id)
    }

    /// Stream one page into session `id`. Returns early, without touching
    /// the session, once it is no longer live.
    async fn stream_results(
        &self,
        id: &str,
        keyword: &str,
        page_token: Option<&str>,
        handle: &RequestHandle,
        notify: &Notifier,
    ) -> Option<()> {
        let token = handle.token();
        notify
            .send(SearchUpdate::Started {
                session_id: id.to_string(),
            })
            .await;

        let opened = token
            .run_until_cancelled(self.transport.open_search(keyword, self.page_size, page_token))
            .await?;
        let body = match opened {
            Ok(body) => body,
            Err(err) => {
                self.fail(id, handle, err.to_string(), notify).await;
                return None;
            }
        };
        self.with_live(id, |s| s.apply(SearchSignal::StreamOpened))?;

        let mut events = EventStream::new(body, token.clone());
        if let Some(limit) = self.idle_timeout {
            events = events.with_idle_timeout(limit);
        }

        while let Some(event) = events.next_event().await {
            match event {
                StreamEvent::Initial {
                    has_more,
                    page_token,
                    total_unique_spaces,
                } => {
                    self.with_live(id, |s| {
                        s.has_more = has_more;
                        s.page_token = page_token;
                        s.total_unique_spaces = total_unique_spaces;
                    })?;
                    notify
                        .send(SearchUpdate::Initial {
                            session_id: id.to_string(),
                            has_more,
                            total_unique_spaces,
                        })
                        .await;
                }
                StreamEvent::Detail {
                    item,
                    fetched_count,
                } => {
                    let total = self.with_live(id, |s| {
                        s.results.push(item.clone());
                        s.fetched_count = s.fetched_count.max(fetched_count);
                        s.fetched_count
                    })?;
                    notify
                        .send(SearchUpdate::Item {
                            session_id: id.to_string(),
                            item,
                            fetched_count: total,
                        })
                        .await;
                }
                StreamEvent::Complete { fetched_count } => {
                    self.with_live(id, |s| {
                        s.fetched_count = s.fetched_count.max(fetched_count);
                    })?;
                    break;
                }
                StreamEvent::Done | StreamEvent::Error { .. } => {}
                other => debug!(?other, "ignoring record in search stream"),
            }
        }

        match events.outcome() {
            Some(StreamOutcome::Cancelled) => {}
            Some(StreamOutcome::Failed { message, .. }) => {
                let message = message.clone();
                self.fail(id, handle, message, notify).await;
            }
            _ => self.complete(id, handle, notify).await,
        }
        Some(())
    }

    async fn complete(&self, id: &str, handle: &RequestHandle, notify: &Notifier) {
        let finished = self.with_live(id, |s| {
            s.apply(SearchSignal::Finished);
            (s.results.len(), s.has_more)
        });
        self.lifecycle.complete(handle.id());
        if let Some((total, has_more)) = finished {
            info!(session_id = %id, total, has_more, "search session completed");
            notify
                .send(SearchUpdate::Completed {
                    session_id: id.to_string(),
                    total,
                    has_more,
                })
                .await;
        }
    }

    async fn fail(&self, id: &str, handle: &RequestHandle, message: String, notify: &Notifier) {
        let failed = self.with_live(id, |s| {
            s.apply(SearchSignal::Failed);
            s.error = Some(message.clone());
        });
        if failed.is_some() {
            warn!(session_id = %id, error = %message, "search session failed");
            notify
                .send(SearchUpdate::Failed {
                    session_id: id.to_string(),
                    message,
                })
                .await;
        }
        handle.token().cancel();
        self.lifecycle.complete(handle.id());
    }
}

/// Sends [`SearchUpdate`]s until the session is cancelled.
struct Notifier {
    updates: Option<mpsc::Sender<SearchUpdate>>,
    token: CancellationToken,
}

impl Notifier {
    async fn send(&self, update: SearchUpdate) {
        if self.token.is_cancelled() {
            return;
        }
        if let Some(tx) = &self.updates {
            let _ = tx.send(update).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::search::SearchStatus;
    use async_trait::async_trait;
    use bytes::Bytes;
    use futures_util::{stream, StreamExt};
    use std::collections::VecDeque;
    use tokio::sync::Notify;
    use wiki_lens_llm::{ByteStream, TransportError, TransportResult};

    #[derive(Debug, Clone, PartialEq)]
    struct Call {
        query: String,
        page_size: u32,
        page_token: Option<String>,
    }

    enum Reply {
        Body(String),
        /// Never finishes until released
        Held(Arc<Notify>),
        Fail(TransportError),
    }

    #[derive(Default)]
    struct FakeSearch {
        replies: Mutex<VecDeque<Reply>>,
        calls: Mutex<Vec<Call>>,
    }

    impl FakeSearch {
        fn new(replies: Vec<Reply>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                calls: Mutex::default(),
            })
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SearchTransport for FakeSearch {
        async fn open_search(
            &self,
            query: &str,
            page_size: u32,
            page_token: Option<&str>,
        ) -> TransportResult<ByteStream> {
            self.calls.lock().unwrap().push(Call {
                query: query.to_string(),
                page_size,
                page_token: page_token.map(str::to_string),
            });
            let reply = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Reply::Body("data: [DONE]\n\n".into()));
            match reply {
                Reply::Body(body) => Ok(stream::iter(vec![Ok(Bytes::from(body))]).boxed()),
                Reply::Held(gate) => Ok(stream::once(async move {
                    gate.notified().await;
                    Ok(Bytes::from_static(b"data: [DONE]\n\n"))
                })
                .boxed()),
                Reply::Fail(err) => Err(err),
            }
        }
    }

    fn detail(title: &str, n: u64) -> String {
        format!(
            "data: {{\"type\":\"detail\",\"item\":{{\"space_id\":\"sp{n}\",\"title\":\"{title}\"}},\"fetched_count\":{n}}}\n\n"
        )
    }

    fn first_page() -> String {
        format!(
            "data: {{\"type\":\"initial\",\"has_more\":true,\"page_token\":\"p1\",\"total_unique_spaces\":5}}\n\n{}{}{}data: [DONE]\n\n",
            detail("Budget 2024", 1),
            detail("Budget process", 2),
            detail("Travel budget", 3),
        )
    }

    fn manager(transport: Arc<FakeSearch>) -> (SearchSessionManager, Arc<RequestLifecycleManager>) {
        let lifecycle = Arc::new(RequestLifecycleManager::new());
        (
            SearchSessionManager::new(transport, lifecycle.clone(), SearchOptions::default()),
            lifecycle,
        )
    }

    #[tokio::test]
    async fn test_results_arrive_in_order_and_load_more_continues() {
        let transport = FakeSearch::new(vec![
            Reply::Body(first_page()),
            Reply::Body(format!(
                "data: {{\"type\":\"initial\",\"has_more\":false}}\n\n{}data: {{\"type\":\"complete\",\"fetched_count\":4}}\n\n",
                detail("Budget archive", 4)
            )),
        ]);
        let (manager, lifecycle) = manager(transport.clone());

        let session = manager.search("budget", None, None).unwrap().finished().await.unwrap();
        assert_eq!(session.status, SearchStatus::Completed);
        let titles: Vec<_> = session.results.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, vec!["Budget 2024", "Budget process", "Travel budget"]);
        assert!(session.has_more);
        assert_eq!(session.page_token.as_deref(), Some("p1"));
        assert_eq!(session.total_unique_spaces, Some(5));
        assert_eq!(lifecycle.stats().total, 0);

        let next = manager.load_more(None).unwrap().finished().await.unwrap();
        assert_eq!(
            transport.calls()[1],
            Call {
                query: "budget".into(),
                page_size: DEFAULT_PAGE_SIZE,
                page_token: Some("p1".into()),
            }
        );
        assert_eq!(next.results.len(), 4);
        assert_eq!(next.fetched_count, 4);
        assert!(!next.has_more);
        assert!(manager.get_session(&session.id).is_none());
        assert!(manager.load_more(None).is_err());
    }

    #[tokio::test]
    async fn test_load_more_refused_without_fresh_page_token() {
        let transport = FakeSearch::new(vec![
            Reply::Body(first_page()),
            Reply::Body(format!(
                "data: {{\"type\":\"initial\",\"has_more\":true}}\n\n{}data: [DONE]\n\n",
                detail("Budget archive", 4)
            )),
        ]);
        let (manager, _) = manager(transport.clone());

        manager.search("budget", None, None).unwrap().finished().await.unwrap();
        let next = manager.load_more(None).unwrap().finished().await.unwrap();

        assert_eq!(next.opened_with.as_deref(), Some("p1"));
        assert!(next.has_more);
        assert!(next.page_token.is_none());
        assert!(manager.load_more(None).is_err());
        let tokens: Vec<_> = transport.calls().into_iter().map(|c| c.page_token).collect();
        assert_eq!(tokens, vec![None, Some("p1".to_string())]);
    }

    #[tokio::test]
    async fn test_new_session_cancels_active_one() {
        let gate = Arc::new(Notify::new());
        let transport = FakeSearch::new(vec![Reply::Held(gate), Reply::Body(first_page())]);
        let (manager, lifecycle) = manager(transport);

        let first = manager.search("budget", None, None).unwrap();
        tokio::task::yield_now().await;
        assert!(manager.load_more(None).is_err());

        let second = manager.search("travel", None, None).unwrap();
        assert!(first.finished().await.is_none());
        let done = second.finished().await.unwrap();
        assert_eq!(done.keyword, "travel");
        assert_eq!(manager.active_session().unwrap().id, done.id);
        assert_eq!(lifecycle.stats().total, 0);
    }

    #[tokio::test]
    async fn test_transport_error_fails_session() {
        let transport = FakeSearch::new(vec![Reply::Body(format!(
            "{}data: {{\"type\":\"error\",\"message\":\"search quota exceeded\"}}\n\n",
            detail("Budget 2024", 1)
        ))]);
        let (manager, lifecycle) = manager(transport);
        let (tx, mut rx) = mpsc::channel(16);

        let session = manager.search("budget", None, Some(tx)).unwrap().finished().await.unwrap();

        assert_eq!(session.status, SearchStatus::Failed);
        assert_eq!(session.results.len(), 1);
        assert!(session.error.unwrap().contains("search quota exceeded"));
        assert_eq!(lifecycle.stats().total, 0);

        let mut last = None;
        while let Some(update) = rx.recv().await {
            last = Some(update);
        }
        assert!(matches!(last, Some(SearchUpdate::Failed { .. })));
    }

    #[tokio::test]
    async fn test_open_failure_fails_session() {
        let transport = FakeSearch::new(vec![Reply::Fail(TransportError::AuthenticationFailed {
            message: "Unauthorized".into(),
        })]);
        let (manager, _) = manager(transport);

        let session = manager.search("budget", None, None).unwrap().finished().await.unwrap();
        assert_eq!(session.status, SearchStatus::Failed);
    }

    #[tokio::test]
    async fn test_cancel_session_stops_updates() {
        let gate = Arc::new(Notify::new());
        let transport = FakeSearch::new(vec![Reply::Held(gate.clone())]);
        let (manager, lifecycle) = manager(transport);
        let (tx, mut rx) = mpsc::channel(16);

        let ticket = manager.search("budget", None, Some(tx)).unwrap();
        assert_eq!(
            rx.recv().await,
            Some(SearchUpdate::Started {
                session_id: ticket.session_id.clone()
            })
        );

        assert!(manager.cancel_session(&ticket.session_id));
        gate.notify_one();
        assert!(ticket.finished().await.is_none());
        assert!(rx.recv().await.is_none());
        assert!(manager.active_session().is_none());
        assert!(!manager.cancel_active());
        assert_eq!(lifecycle.stats().total, 0);
    }

    #[test]
    fn test_empty_keyword_is_rejected() {
        let (manager, _) = manager(FakeSearch::new(vec![]));
        assert!(matches!(
            manager.create_session("   ", None),
            Err(AppError::Validation(_))
        ));
    }
}
