//! Navigation fetching shared by concurrent callers.

use std::sync::Arc;

use wiki_lens::services::navigation_cache::FetchOptions;
use wiki_lens::services::tree_batch::render_forest;
use wiki_lens::{AppConfig, AppError};
use wiki_lens_core::NavigationNode;

use crate::support::{wide_root, Backend};

#[tokio::test]
async fn test_concurrent_fetches_share_one_pull() {
    let backend = Backend::with_forest(vec![wide_root("a", "Alpha", 3)]);
    let view = backend.view(&AppConfig::default());
    let cache = view.navigation();

    let (first, second) = tokio::join!(
        cache.fetch_all("kb", FetchOptions::default(), |_| {}),
        cache.fetch_all("kb", FetchOptions::default(), |_| {}),
    );
    let (first, second) = (first.unwrap(), second.unwrap());

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(backend.tree_calls(), 1);

    let cached = cache.fetch_all("kb", FetchOptions::default(), |_| {}).await.unwrap();
    assert!(Arc::ptr_eq(&first, &cached));
    assert_eq!(backend.tree_calls(), 1);

    let snapshot = cache.snapshot("kb").unwrap();
    assert_eq!(snapshot.node_count, 3);
    assert!(!snapshot.loading);
}

#[tokio::test]
async fn test_forced_refresh_sees_new_tree() {
    let backend = Backend::with_forest(vec![NavigationNode::new("a", "Alpha")]);
    let view = backend.view(&AppConfig::default());
    let cache = view.navigation();
    cache.fetch_all("kb", FetchOptions::default(), |_| {}).await.unwrap();

    backend
        .forest
        .lock()
        .unwrap()
        .push(NavigationNode::new("b", "Beta"));
    let refreshed = cache
        .fetch_all("kb", FetchOptions { force_refresh: true }, |_| {})
        .await
        .unwrap();

    assert_eq!(backend.tree_calls(), 2);
    assert_eq!(
        render_forest(&refreshed),
        "- Alpha (token: a)\n- Beta (token: b)\n"
    );
}

#[tokio::test]
async fn test_teardown_refuses_later_fetches() {
    let backend = Backend::with_forest(vec![NavigationNode::new("a", "Alpha")]);
    let view = backend.view(&AppConfig::default());
    view.navigation()
        .fetch_all("kb", FetchOptions::default(), |_| {})
        .await
        .unwrap();

    assert_eq!(view.teardown(), 0);

    let err = view
        .navigation()
        .fetch_all("kb", FetchOptions::default(), |_| {})
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Cancelled));
    assert!(view.lifecycle().is_shut_down());
}
