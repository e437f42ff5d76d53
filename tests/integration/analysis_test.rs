//! Knowledge-base analysis flows driven through a wired view.

use std::collections::HashSet;

use tokio::sync::mpsc;

use wiki_lens::models::analysis::{AnalysisReport, AnalysisUpdate, BatchPhase};
use wiki_lens::models::requests::RequestKind;
use wiki_lens::services::analysis::ImportCandidate;
use wiki_lens::services::navigation_cache::FetchOptions;
use wiki_lens::AppConfig;
use wiki_lens_core::NavigationNode;
use wiki_lens_llm::placeholders;

use crate::support::{answer, wide_root, Backend, Reply};

fn large_forest() -> Vec<NavigationNode> {
    vec![wide_root("a", "Alpha", 1500), wide_root("b", "Beta", 1500)]
}

#[tokio::test]
async fn test_large_knowledge_base_is_batched_then_summarized() {
    let backend = Backend::with_forest(large_forest());
    backend.script_analysis([
        answer("Alpha is well organized."),
        answer("Beta lacks an index page."),
        answer("Both roots need a glossary."),
    ]);
    let view = backend.view(&AppConfig::default());

    let report = view
        .analysis()
        .analyze_knowledge_base("kb", "Handbook", FetchOptions::default(), None)
        .await
        .unwrap();

    let AnalysisReport::Completed { result, run, .. } = report else {
        panic!("expected a completed report, got {:?}", report);
    };
    assert!(result.starts_with(
        "## Batch 1 analysis (root nodes: Alpha)\n\nAlpha is well organized."
    ));
    assert!(result.contains(
        "\n\n---\n\n## Batch 2 analysis (root nodes: Beta)\n\nBeta lacks an index page."
    ));
    assert!(result.ends_with(
        "## Final summary (covering root nodes: Alpha, Beta)\n\nBoth roots need a glossary."
    ));
    let run = run.unwrap();
    assert_eq!(run.phase, BatchPhase::Done);
    assert_eq!(run.completed_batches, 2);

    let requests = backend.analysis_requests();
    assert_eq!(requests.len(), 3);
    assert!(requests[0].placeholders[placeholders::KNOWLEDGE_BASE_STRUCTURE]
        .starts_with("- Alpha (token: a)"));
    assert!(requests[1].placeholders[placeholders::KNOWLEDGE_BASE_STRUCTURE]
        .starts_with("- Beta (token: b)"));
    assert!(requests[2].placeholders[placeholders::BATCH_RESULTS].contains("Beta lacks an index page."));
    assert_eq!(requests[2].placeholders[placeholders::ROOT_NODES], "Alpha, Beta");

    assert_eq!(view.lifecycle().stats().total, 0);
}

#[tokio::test]
async fn test_failed_batch_stops_the_run_without_summary() {
    let backend = Backend::with_forest(large_forest());
    backend.script_analysis([
        answer("Alpha is well organized."),
        Reply::BrokenAfter("data: {\"type\":\"content\",\"content\":\"Beta has\"}\n\n".into()),
    ]);
    let view = backend.view(&AppConfig::default());
    let (tx, mut rx) = mpsc::channel(256);

    let report = view
        .analysis()
        .analyze_knowledge_base("kb", "Handbook", FetchOptions::default(), Some(tx))
        .await
        .unwrap();

    let AnalysisReport::Failed { partial, run, .. } = report else {
        panic!("expected a failed report, got {:?}", report);
    };
    let run = run.unwrap();
    assert_eq!(run.phase, BatchPhase::Failed);
    assert_eq!(
        run.batch_outputs,
        vec!["## Batch 1 analysis (root nodes: Alpha)\n\nAlpha is well organized.".to_string()]
    );
    assert_eq!(partial, run.batch_outputs[0]);
    assert_eq!(run.failure.unwrap().batch_index, 1);
    assert_eq!(backend.analysis_requests().len(), 2);

    let mut saw_summary = false;
    let mut last = None;
    while let Some(update) = rx.recv().await {
        saw_summary |= matches!(update, AnalysisUpdate::Summarizing);
        last = Some(update);
    }
    assert!(!saw_summary);
    assert!(matches!(last, Some(AnalysisUpdate::Failed { .. })));
}

#[tokio::test]
async fn test_teardown_mid_batch_cancels_flow_and_call() {
    let backend = Backend::with_forest(large_forest());
    backend.script_analysis([
        answer("Alpha is well organized."),
        Reply::Stalled("data: {\"type\":\"content\",\"content\":\"Beta\"}\n\n".into()),
    ]);
    let view = backend.view(&AppConfig::default());
    let (tx, mut rx) = mpsc::channel(256);

    let watcher = async {
        let mut second_batch = false;
        while let Some(update) = rx.recv().await {
            match update {
                AnalysisUpdate::BatchStarted { index: 1, .. } => second_batch = true,
                AnalysisUpdate::Content { .. } if second_batch => {
                    let stats = view.lifecycle().stats();
                    assert_eq!(stats.by_kind.get(&RequestKind::WikiAnalysis), Some(&1));
                    assert_eq!(stats.by_kind.get(&RequestKind::WikiAnalysisBatch), Some(&1));
                    return view.teardown();
                }
                _ => {}
            }
        }
        0
    };
    let flow = view
        .analysis()
        .analyze_knowledge_base("kb", "Handbook", FetchOptions::default(), Some(tx));

    let (report, cancelled) = tokio::join!(flow, watcher);

    assert_eq!(cancelled, 2);
    let report = report.unwrap();
    let AnalysisReport::Cancelled { run: Some(run) } = report else {
        panic!("expected a cancelled run, got {:?}", report);
    };
    assert_eq!(run.phase, BatchPhase::Cancelled);
    assert_eq!(run.batch_outputs.len(), 1);
    assert_eq!(backend.analysis_requests().len(), 2);
    assert_eq!(view.lifecycle().stats().total, 0);
}

#[tokio::test]
async fn test_cached_tree_still_reports_node_count() {
    let backend = Backend::with_forest(vec![wide_root("a", "Alpha", 12)]);
    backend.script_analysis([answer("first"), answer("second")]);
    let view = backend.view(&AppConfig::default());
    view.analysis()
        .analyze_knowledge_base("kb", "Handbook", FetchOptions::default(), None)
        .await
        .unwrap();

    let (tx, mut rx) = mpsc::channel(1);
    let flow = view
        .analysis()
        .analyze_knowledge_base("kb", "Handbook", FetchOptions::default(), Some(tx));
    let counts = async {
        let mut counts = Vec::new();
        while let Some(update) = rx.recv().await {
            if let AnalysisUpdate::NavigationProgress { node_count } = update {
                counts.push(node_count);
            }
        }
        counts
    };

    let (report, counts) = tokio::join!(flow, counts);

    assert_eq!(report.unwrap().result(), Some("second"));
    assert_eq!(counts, vec![12]);
    assert_eq!(backend.tree_calls(), 1);
}

#[tokio::test]
async fn test_restarting_analysis_cancels_the_previous_run() {
    let backend = Backend::with_forest(vec![wide_root("a", "Alpha", 3)]);
    backend.script_analysis([
        Reply::Stalled("data: {\"type\":\"content\",\"content\":\"first\"}\n\n".into()),
        answer("second run"),
    ]);
    let view = backend.view(&AppConfig::default());
    let (tx, mut rx) = mpsc::channel(64);

    let first = view
        .analysis()
        .analyze_knowledge_base("kb", "Handbook", FetchOptions::default(), Some(tx));
    let second = async {
        while let Some(update) = rx.recv().await {
            if matches!(update, AnalysisUpdate::Content { .. }) {
                break;
            }
        }
        view.analysis()
            .analyze_knowledge_base("kb", "Handbook", FetchOptions::default(), None)
            .await
    };

    let (first, second) = tokio::join!(first, second);

    assert!(matches!(first.unwrap(), AnalysisReport::Cancelled { .. }));
    assert_eq!(second.unwrap().result(), Some("second run"));
    assert_eq!(backend.tree_calls(), 1);
}

#[tokio::test]
async fn test_document_analysis_sends_opened_path() {
    let backend = Backend::with_forest(Vec::new());
    backend.script_analysis([answer("Placement 8/10")]);
    let view = backend.view(&AppConfig::default());

    let context = vec![
        NavigationNode::new("a", "Alpha").with_children(vec![
            NavigationNode::new("a1", "Guides")
                .with_children(vec![NavigationNode::new("a1x", "Setup")]),
        ]),
        NavigationNode::new("b", "Beta").with_children(vec![NavigationNode::new("b1", "Hidden")]),
    ];
    let expanded: HashSet<String> = ["a".to_string()].into_iter().collect();

    let report = view
        .analysis()
        .analyze_document("doc1", "Handbook", &context, &expanded, None)
        .await
        .unwrap();

    assert_eq!(report.result(), Some("Placement 8/10"));
    let request = &backend.analysis_requests()[0];
    assert_eq!(
        request.placeholders[placeholders::KNOWLEDGE_BASE_NODE],
        "- Alpha\n  - Guides\n- Beta\n"
    );
    assert!(request.placeholders[placeholders::CURRENT_DOCUMENT].contains("# Document doc1"));
}

#[tokio::test]
async fn test_import_evaluation_uses_import_endpoint() {
    let backend = Backend::with_forest(vec![wide_root("a", "Alpha", 4)]);
    backend.script_analysis([answer("Put it under Alpha (token: a).")]);
    let view = backend.view(&AppConfig::default());
    let candidate = ImportCandidate {
        doc_id: "doxcnNew".into(),
        doc_kind: "docx".into(),
    };

    let report = view
        .analysis()
        .evaluate_import("kb", "Handbook", &candidate, FetchOptions::default(), None)
        .await
        .unwrap();

    assert_eq!(report.result(), Some("Put it under Alpha (token: a)."));
    let request = &backend.analysis_requests()[0];
    assert_eq!(request.endpoint(), "/api/llm/doc_import_analysis");
    let target = request.import.as_ref().unwrap();
    assert_eq!(target.doc_id, "doxcnNew");
    assert!(target.wiki_node_md.starts_with("- Alpha (token: a)"));
}

#[tokio::test]
async fn test_export_publishes_report() {
    let backend = Backend::with_forest(Vec::new());
    let view = backend.view(&AppConfig::default());

    assert!(view.analysis().export_report("Review", "  ").await.is_err());
    let document = view
        .analysis()
        .export_report("Review", "## Total\n27/30")
        .await
        .unwrap();

    assert_eq!(document.document_id, "doxcnReport");
    let exported = backend.exported.lock().unwrap().clone();
    assert_eq!(exported.len(), 1);
    assert_eq!(exported[0].markdown_content, "## Total\n27/30");
}
