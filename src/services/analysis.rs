//! Analysis Service
//!
//! The user-facing analysis flows of a knowledge-base view:
//! - `analyze_knowledge_base` - structure review of a whole knowledge base
//! - `analyze_document` - review of one document in its tree context
//! - `evaluate_import` - where a document should be imported
//! - `export_report` - publish a finished report as a cloud document
//!
//! Starting a flow cancels the previous run of the same flow. Every flow is
//! registered with the lifecycle manager for its whole duration, and the
//! calls it issues are registered under their own kinds.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use wiki_lens_core::{count_forest, NavigationNode};
use wiki_lens_llm::{placeholders, AnalysisRequest, AnalysisTransport, ImportTarget, ModelSettings};

use crate::models::analysis::{AnalysisReport, AnalysisUpdate, BatchPhase, BatchPlan, BatchRunState};
use crate::models::export::{ExportRequest, ExportedDocument};
use crate::models::requests::RequestKind;
use crate::models::settings::PromptTemplates;
use crate::services::analysis_stream::{run_call, CallEnd, ProgressSink};
use crate::services::backend::{CloudExporter, DocumentSource};
use crate::services::batch_analysis::{BatchAnalysisOrchestrator, BatchJob};
use crate::services::navigation_cache::{FetchOptions, NavigationCache};
use crate::services::request_lifecycle::RequestLifecycleManager;
use crate::services::tree_batch::{render_expanded_path, TreeBatchPlanner};
use crate::utils::error::{AppError, AppResult};

/// Settings the analysis flows read.
#[derive(Debug, Clone)]
pub struct AnalysisOptions {
    pub model: ModelSettings,
    pub prompts: PromptTemplates,
    pub planner: TreeBatchPlanner,
    pub idle_timeout: Option<Duration>,
}

/// Collaborators of [`AnalysisService`].
#[derive(Clone)]
pub struct AnalysisDeps {
    pub cache: NavigationCache,
    pub documents: Arc<dyn DocumentSource>,
    pub exporter: Arc<dyn CloudExporter>,
    pub transport: Arc<dyn AnalysisTransport>,
    pub lifecycle: Arc<RequestLifecycleManager>,
}

/// What an import is evaluated for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportCandidate {
    pub doc_id: String,
    /// `docx`, `doc` or `wiki`
    pub doc_kind: String,
}

pub struct AnalysisService {
    deps: AnalysisDeps,
    orchestrator: BatchAnalysisOrchestrator,
    options: AnalysisOptions,
}

impl AnalysisService {
    pub fn new(deps: AnalysisDeps, options: AnalysisOptions) -> Self {
        let mut orchestrator =
            BatchAnalysisOrchestrator::new(deps.transport.clone(), deps.lifecycle.clone());
        if let Some(limit) = options.idle_timeout {
            orchestrator = orchestrator.with_idle_timeout(limit);
        }
        Self {
            deps,
            orchestrator,
            options,
        }
    }

    pub fn orchestrator(&self) -> &BatchAnalysisOrchestrator {
        &self.orchestrator
    }

    /// Review the structure of knowledge base `space_id`.
    ///
    /// Large multi-root knowledge bases are analyzed batch by batch and then
    /// summarized; everything else is one call.
    pub async fn analyze_knowledge_base(
        &self,
        space_id: &str,
        wiki_title: &str,
        fetch: FetchOptions,
        updates: Option<mpsc::Sender<AnalysisUpdate>>,
    ) -> AppResult<AnalysisReport> {
        self.restart(&[RequestKind::WikiAnalysis, RequestKind::WikiAnalysisBatch]);
        let handle = self.deps.lifecycle.begin(RequestKind::WikiAnalysis);
        info!(%space_id, request_id = %handle.id(), "knowledge base analysis started");

        let sink = ProgressSink::new(updates.clone(), handle.token().clone());
        let report = self
            .tree_flow(space_id, wiki_title, fetch, None, handle.token(), &sink, updates)
            .await;
        self.deps.lifecycle.complete(handle.id());
        report
    }

    /// Evaluate where document `candidate` belongs in knowledge base `space_id`.
    pub async fn evaluate_import(
        &self,
        space_id: &str,
        wiki_title: &str,
        candidate: &ImportCandidate,
        fetch: FetchOptions,
        updates: Option<mpsc::Sender<AnalysisUpdate>>,
    ) -> AppResult<AnalysisReport> {
        self.restart(&[RequestKind::DocImportAnalysis, RequestKind::DocImportAnalysisBatch]);
        let handle = self.deps.lifecycle.begin(RequestKind::DocImportAnalysis);
        info!(%space_id, doc_id = %candidate.doc_id, "import evaluation started");

        let sink = ProgressSink::new(updates.clone(), handle.token().clone());
        let report = self
            .tree_flow(
                space_id,
                wiki_title,
                fetch,
                Some(candidate),
                handle.token(),
                &sink,
                updates,
            )
            .await;
        self.deps.lifecycle.complete(handle.id());
        report
    }

    /// Review document `doc_id`. The reader's opened path through `context`
    /// is sent as the surrounding tree.
    pub async fn analyze_document(
        &self,
        doc_id: &str,
        wiki_title: &str,
        context: &[NavigationNode],
        expanded_ids: &HashSet<String>,
        updates: Option<mpsc::Sender<AnalysisUpdate>>,
    ) -> AppResult<AnalysisReport> {
        self.restart(&[RequestKind::DocAnalysis]);
        let handle = self.deps.lifecycle.begin(RequestKind::DocAnalysis);
        let token = handle.token().clone();
        let sink = ProgressSink::new(updates, token.clone());
        info!(%doc_id, "document analysis started");

        let report = match token
            .run_until_cancelled(self.deps.documents.fetch_document(doc_id))
            .await
        {
            None => AnalysisReport::Cancelled { run: None },
            Some(Err(err)) => self.failed_before_analysis(&sink, err.into()).await,
            Some(Ok(content)) => {
                let request =
                    AnalysisRequest::new(&self.options.model, self.options.prompts.doc_analysis.clone())
                        .placeholder(placeholders::CURRENT_DOCUMENT, Some(content))
                        .placeholder(
                            placeholders::KNOWLEDGE_BASE_NODE,
                            Some(render_expanded_path(context, expanded_ids)),
                        )
                        .placeholder(placeholders::WIKI_TITLE, Some(wiki_title));
                self.single_shot(&request, &token, &sink).await
            }
        };
        self.deps.lifecycle.complete(handle.id());
        Ok(report)
    }

    /// Publish `markdown` as a cloud document titled `title`.
    pub async fn export_report(&self, title: &str, markdown: &str) -> AppResult<ExportedDocument> {
        if title.trim().is_empty() {
            return Err(AppError::validation("export title must not be empty"));
        }
        if markdown.trim().is_empty() {
            return Err(AppError::validation("there is no report to export"));
        }
        let request = ExportRequest {
            title: title.to_string(),
            markdown_content: markdown.to_string(),
        };
        let document = self.deps.exporter.export_markdown(&request).await?;
        info!(document_id = %document.document_id, "report exported");
        Ok(document)
    }

    fn restart(&self, kinds: &[RequestKind]) {
        for kind in kinds {
            let cancelled = self.deps.lifecycle.cancel(*kind);
            if cancelled > 0 {
                info!(%kind, cancelled, "previous analysis cancelled");
            }
        }
    }

    /// Fetch, plan and analyze a knowledge base tree, as a plain review or
    /// as an import evaluation.
    #[allow(clippy::too_many_arguments)]
    async fn tree_flow(
        &self,
        space_id: &str,
        wiki_title: &str,
        fetch: FetchOptions,
        candidate: Option<&ImportCandidate>,
        token: &CancellationToken,
        sink: &ProgressSink,
        updates: Option<mpsc::Sender<AnalysisUpdate>>,
    ) -> AppResult<AnalysisReport> {
        let progress = updates.clone();
        let progress_token = token.clone();
        let fetched = token
            .run_until_cancelled(self.deps.cache.fetch_all(space_id, fetch, move |node_count| {
                if progress_token.is_cancelled() {
                    return;
                }
                // Best effort while pulling; the final count is sent below.
                if let Some(tx) = &progress {
                    let _ = tx.try_send(AnalysisUpdate::NavigationProgress { node_count });
                }
            }))
            .await;
        let forest = match fetched {
            None | Some(Err(AppError::Cancelled)) => {
                return Ok(AnalysisReport::Cancelled { run: None })
            }
            Some(Err(err)) => return Ok(self.failed_before_analysis(sink, err).await),
            Some(Ok(forest)) => forest,
        };
        sink.send(AnalysisUpdate::NavigationProgress {
            node_count: count_forest(&forest) as u64,
        })
        .await;

        let plan = match self.options.planner.plan(&forest) {
            Ok(plan) => plan,
            Err(err) => return Ok(self.failed_before_analysis(sink, err).await),
        };

        let template = match candidate {
            Some(_) => &self.options.prompts.doc_import_analysis,
            None => &self.options.prompts.wiki_analysis,
        };
        let target = candidate.map(|c| ImportTarget {
            doc_id: c.doc_id.clone(),
            doc_kind: c.doc_kind.clone(),
            wiki_node_md: String::new(),
            wiki_title: wiki_title.to_string(),
        });

        match plan {
            BatchPlan::Whole {
                rendered_text,
                node_count,
            } => {
                info!(%space_id, node_count, "analyzing knowledge base in one call");
                let mut request = AnalysisRequest::new(&self.options.model, template.clone())
                    .placeholder(
                        placeholders::KNOWLEDGE_BASE_STRUCTURE,
                        Some(rendered_text.clone()),
                    )
                    .placeholder(placeholders::WIKI_TITLE, Some(wiki_title));
                if let Some(target) = target {
                    request = request.with_import(ImportTarget {
                        wiki_node_md: rendered_text,
                        ..target
                    });
                }
                Ok(self.single_shot(&request, token, sink).await)
            }
            BatchPlan::Batched {
                batches,
                node_count,
            } => {
                info!(
                    %space_id,
                    node_count,
                    batches = batches.len(),
                    "knowledge base too large for one call, analyzing in batches"
                );
                let job = BatchJob {
                    batches,
                    settings: self.options.model.clone(),
                    batch_template: template.clone(),
                    summary_template: self.options.prompts.batch_summary.clone(),
                    wiki_title: wiki_title.to_string(),
                    import: target,
                };
                let run = self.orchestrator.run(&job, token, updates).await?;
                Ok(report_for_run(run))
            }
        }
    }

    async fn single_shot(
        &self,
        request: &AnalysisRequest,
        token: &CancellationToken,
        sink: &ProgressSink,
    ) -> AnalysisReport {
        let mut reasoning = String::new();
        let end = run_call(
            self.deps.transport.as_ref(),
            request,
            token,
            self.options.idle_timeout,
            sink,
            &mut reasoning,
        )
        .await;

        match end {
            CallEnd::Completed(result) => {
                sink.send(AnalysisUpdate::Completed {
                    result: result.clone(),
                })
                .await;
                AnalysisReport::Completed {
                    result,
                    reasoning,
                    run: None,
                }
            }
            CallEnd::Failed { error, partial } => {
                warn!(error = %error, "analysis failed");
                let message = error.to_string();
                sink.send(AnalysisUpdate::Failed {
                    message: message.clone(),
                    partial: partial.clone(),
                })
                .await;
                AnalysisReport::Failed {
                    message,
                    partial,
                    reasoning,
                    run: None,
                }
            }
            CallEnd::Cancelled => AnalysisReport::Cancelled { run: None },
        }
    }

    async fn failed_before_analysis(&self, sink: &ProgressSink, err: AppError) -> AnalysisReport {
        warn!(error = %err, "analysis could not start");
        let message = err.to_string();
        sink.send(AnalysisUpdate::Failed {
            message: message.clone(),
            partial: String::new(),
        })
        .await;
        AnalysisReport::Failed {
            message,
            partial: String::new(),
            reasoning: String::new(),
            run: None,
        }
    }
}

fn report_for_run(run: BatchRunState) -> AnalysisReport {
    match run.phase {
        BatchPhase::Done => AnalysisReport::Completed {
            result: run.result().unwrap_or_default(),
            reasoning: run.reasoning_text.clone(),
            run: Some(run),
        },
        BatchPhase::Failed => AnalysisReport::Failed {
            message: run
                .failure
                .as_ref()
                .map(|f| f.message.clone())
                .unwrap_or_default(),
            partial: run.combined_outputs(),
            reasoning: run.reasoning_text.clone(),
            run: Some(run),
        },
        _ => AnalysisReport::Cancelled { run: Some(run) },
    }
}
