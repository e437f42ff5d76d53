//! Keyword search sessions through a wired view.

use tokio::sync::mpsc;

use wiki_lens::models::requests::RequestKind;
use wiki_lens::models::search::{SearchStatus, SearchUpdate};
use wiki_lens::AppConfig;
use wiki_lens_llm::TransportError;

use crate::support::{detail, Backend, Reply};

#[tokio::test]
async fn test_search_collects_results_and_continues_from_page_token() {
    let backend = Backend::with_forest(Vec::new());
    backend.script_search([
        Reply::Body(format!(
            "data: {{\"type\":\"initial\",\"has_more\":true,\"page_token\":\"p1\"}}\n\n{}{}{}data: [DONE]\n\n",
            detail("sp1", "Budget 2024", 1),
            detail("sp2", "Budget review", 2),
            detail("sp3", "Travel budget", 3),
        )),
        Reply::Body(format!(
            "data: {{\"type\":\"initial\",\"has_more\":false}}\n\n{}data: {{\"type\":\"complete\",\"fetched_count\":4}}\n\n",
            detail("sp4", "Budget archive", 4),
        )),
    ]);
    let mut config = AppConfig::default();
    config.search_page_size = 20;
    let view = backend.view(&config);

    let session = view
        .search()
        .search("budget", None, None)
        .unwrap()
        .finished()
        .await
        .unwrap();

    assert_eq!(session.status, SearchStatus::Completed);
    let titles: Vec<&str> = session.results.iter().map(|r| r.title.as_str()).collect();
    assert_eq!(titles, vec!["Budget 2024", "Budget review", "Travel budget"]);
    assert!(session.has_more);
    assert_eq!(session.page_token.as_deref(), Some("p1"));

    let (tx, mut rx) = mpsc::channel(64);
    let next = view.search().load_more(Some(tx)).unwrap();
    assert_ne!(next.session_id, session.id);
    let next = next.finished().await.unwrap();

    assert_eq!(next.results.len(), 4);
    assert!(!next.has_more);
    assert!(view.search().load_more(None).is_err());

    let calls = backend.search_calls.lock().unwrap().clone();
    assert_eq!(
        calls,
        vec![
            ("budget".to_string(), 20, None),
            ("budget".to_string(), 20, Some("p1".to_string())),
        ]
    );

    let mut items = Vec::new();
    while let Some(update) = rx.recv().await {
        if let SearchUpdate::Item { item, .. } = update {
            items.push(item.title);
        }
    }
    assert_eq!(items, vec!["Budget archive"]);
    assert_eq!(view.lifecycle().stats().total, 0);
}

#[tokio::test]
async fn test_new_search_replaces_running_one() {
    let backend = Backend::with_forest(Vec::new());
    backend.script_search([
        Reply::Stalled(detail("sp1", "Budget 2024", 1)),
        Reply::Body(format!("{}data: [DONE]\n\n", detail("sp9", "Roadmap", 1))),
    ]);
    let view = backend.view(&AppConfig::default());
    let (tx, mut rx) = mpsc::channel(64);

    let first = view.search().search("budget", None, Some(tx)).unwrap();
    while let Some(update) = rx.recv().await {
        if matches!(update, SearchUpdate::Item { .. }) {
            break;
        }
    }
    let second = view.search().search("roadmap", None, None).unwrap();

    assert!(first.finished().await.is_none());
    let second = second.finished().await.unwrap();
    assert_eq!(second.keyword, "roadmap");
    assert_eq!(second.results.len(), 1);
    assert_eq!(view.search().active_session().unwrap().id, second.id);
    assert_eq!(view.lifecycle().stats().total, 0);
}

#[tokio::test]
async fn test_teardown_counts_live_search() {
    let backend = Backend::with_forest(Vec::new());
    backend.script_search([Reply::Stalled(detail("sp1", "Budget 2024", 1))]);
    let view = backend.view(&AppConfig::default());
    let (tx, mut rx) = mpsc::channel(64);

    let ticket = view.search().search("budget", None, Some(tx)).unwrap();
    while let Some(update) = rx.recv().await {
        if matches!(update, SearchUpdate::Item { .. }) {
            break;
        }
    }
    assert_eq!(view.lifecycle().stats().by_kind.get(&RequestKind::Search), Some(&1));

    assert_eq!(view.teardown(), 1);
    assert!(ticket.finished().await.is_none());
    assert!(view.search().active_session().is_none());
    assert_eq!(view.lifecycle().stats().total, 0);
}

#[tokio::test]
async fn test_refused_search_fails_session() {
    let backend = Backend::with_forest(Vec::new());
    backend.script_search([Reply::Refused(TransportError::AuthenticationFailed {
        message: "Unauthorized".into(),
    })]);
    let view = backend.view(&AppConfig::default());

    let session = view
        .search()
        .search("budget", None, None)
        .unwrap()
        .finished()
        .await
        .unwrap();

    assert_eq!(session.status, SearchStatus::Failed);
    assert!(session.error.unwrap().contains("Unauthorized"));
    assert!(view.search().load_more(None).is_err());
    assert_eq!(view.lifecycle().stats().total, 0);
}
