//! Batch Analysis Orchestrator
//!
//! Analyzes an oversized knowledge base one batch of root subtrees at a
//! time, then asks for one summary across all batch outputs.
//!
//! Batches run strictly in order: batch N+1 is not opened until batch N's
//! stream has ended, so at most one model call is outstanding per run. The
//! first failing batch stops the run; outputs already collected are kept.
//! A failed summary does not fail the run.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use wiki_lens_llm::{placeholders, AnalysisRequest, AnalysisTransport, ImportTarget, ModelSettings};

use crate::models::analysis::{
    AnalysisUpdate, Batch, BatchFailure, BatchPhase, BatchRunState,
};
use crate::models::requests::RequestKind;
use crate::services::analysis_stream::{run_call, CallEnd, ProgressSink};
use crate::services::request_lifecycle::RequestLifecycleManager;
use crate::utils::error::AppResult;

/// Everything one batched run needs besides the transport.
#[derive(Debug, Clone)]
pub struct BatchJob {
    pub batches: Vec<Batch>,
    pub settings: ModelSettings,
    /// Template for each batch call
    pub batch_template: String,
    /// Template for the closing summary call
    pub summary_template: String,
    pub wiki_title: String,
    /// Set for import evaluation; each batch's outline is sent as `wiki_node_md`
    pub import: Option<ImportTarget>,
}

impl BatchJob {
    fn batch_kind(&self) -> RequestKind {
        if self.import.is_some() {
            RequestKind::DocImportAnalysisBatch
        } else {
            RequestKind::WikiAnalysisBatch
        }
    }

    fn all_root_titles(&self) -> String {
        self.batches
            .iter()
            .flat_map(|b| b.root_titles())
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn batch_request(&self, batch: &Batch) -> AnalysisRequest {
        let request = AnalysisRequest::new(&self.settings, self.batch_template.clone())
            .placeholder(
                placeholders::KNOWLEDGE_BASE_STRUCTURE,
                Some(batch.rendered_text.clone()),
            )
            .placeholder(placeholders::WIKI_TITLE, Some(self.wiki_title.clone()));
        match &self.import {
            Some(target) => request.with_import(ImportTarget {
                wiki_node_md: batch.rendered_text.clone(),
                wiki_title: self.wiki_title.clone(),
                ..target.clone()
            }),
            None => request,
        }
    }

    fn summary_request(&self, run: &BatchRunState) -> AnalysisRequest {
        AnalysisRequest::new(&self.settings, self.summary_template.clone())
            .placeholder(placeholders::BATCH_RESULTS, Some(run.combined_outputs()))
            .placeholder(placeholders::ROOT_NODES, Some(self.all_root_titles()))
            .placeholder(placeholders::WIKI_TITLE, Some(self.wiki_title.clone()))
    }
}

/// `## Batch {n} analysis (root nodes: {titles})` followed by the answer.
pub fn batch_header(batch: &Batch) -> String {
    format!(
        "## Batch {} analysis (root nodes: {})",
        batch.index + 1,
        batch.root_titles().join(", ")
    )
}

pub fn summary_header(root_titles: &str) -> String {
    format!("## Final summary (covering root nodes: {})", root_titles)
}

/// Runs batched analyses. Each call is registered with the lifecycle
/// manager, so cancelling its kind stops the run mid-batch.
#[derive(Clone)]
pub struct BatchAnalysisOrchestrator {
    transport: Arc<dyn AnalysisTransport>,
    lifecycle: Arc<RequestLifecycleManager>,
    idle_timeout: Option<Duration>,
}

impl BatchAnalysisOrchestrator {
    pub fn new(
        transport: Arc<dyn AnalysisTransport>,
        lifecycle: Arc<RequestLifecycleManager>,
    ) -> Self {
        Self {
            transport,
            lifecycle,
            idle_timeout: None,
        }
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    /// Run `job` to a terminal phase.
    ///
    /// `cancel` stops the whole run; cancelling a batch or summary handle
    /// through the lifecycle manager has the same effect. After cancellation
    /// no further update is sent and the summary is not attempted.
    pub async fn run(
        &self,
        job: &BatchJob,
        cancel: &CancellationToken,
        updates: Option<mpsc::Sender<AnalysisUpdate>>,
    ) -> AppResult<BatchRunState> {
        let sink = ProgressSink::new(updates, cancel.clone());
        let total = job.batches.len();
        let mut run = BatchRunState::new(total);
        run.transition(BatchPhase::Running)?;
        info!(batches = total, title = %job.wiki_title, "batch analysis started");

        for batch in &job.batches {
            if cancel.is_cancelled() {
                return self.cancelled(run);
            }

            sink.send(AnalysisUpdate::BatchStarted {
                index: batch.index,
                total,
                root_titles: batch.root_titles().iter().map(|t| t.to_string()).collect(),
            })
            .await;

            let request = job.batch_request(batch);
            let end = self
                .call(job.batch_kind(), &request, cancel, &sink, &mut run.reasoning_text)
                .await;

            match end {
                CallEnd::Completed(answer) => {
                    run.complete_batch(format!("{}\n\n{}", batch_header(batch), answer));
                    info!(
                        batch = batch.index,
                        completed = run.completed_batches,
                        total,
                        "batch analysis finished"
                    );
                    sink.send(AnalysisUpdate::BatchProgress {
                        completed: run.completed_batches,
                        total,
                        progress: run.progress(),
                    })
                    .await;
                }
                CallEnd::Cancelled => return self.cancelled(run),
                CallEnd::Failed { error, .. } => {
                    warn!(batch = batch.index, error = %error, "batch analysis failed");
                    let message = error.to_string();
                    run.failure = Some(BatchFailure {
                        batch_index: batch.index,
                        completed_batches: run.completed_batches,
                        message: message.clone(),
                    });
                    run.transition(BatchPhase::Failed)?;
                    sink.send(AnalysisUpdate::Failed {
                        message,
                        partial: run.combined_outputs(),
                    })
                    .await;
                    return Ok(run);
                }
            }
        }

        if cancel.is_cancelled() {
            return self.cancelled(run);
        }
        run.transition(BatchPhase::Summarizing)?;
        sink.send(AnalysisUpdate::Summarizing).await;

        let root_titles = job.all_root_titles();
        let request = job.summary_request(&run);
        let end = self
            .call(RequestKind::BatchSummary, &request, cancel, &sink, &mut run.reasoning_text)
            .await;

        match end {
            CallEnd::Completed(answer) => {
                run.final_summary = format!("{}\n\n{}", summary_header(&root_titles), answer);
            }
            CallEnd::Cancelled => return self.cancelled(run),
            CallEnd::Failed { error, .. } => {
                warn!(error = %error, "summary analysis failed");
                run.final_summary = format!("Summary analysis failed: {}", error);
                run.summary_error = Some(error.to_string());
            }
        }

        run.transition(BatchPhase::Done)?;
        info!(batches = total, "batch analysis complete");
        if let Some(result) = run.result() {
            sink.send(AnalysisUpdate::Completed { result }).await;
        }
        Ok(run)
    }

    /// One registered call. The handle is removed however the call ends.
    async fn call(
        &self,
        kind: RequestKind,
        request: &AnalysisRequest,
        cancel: &CancellationToken,
        sink: &ProgressSink,
        reasoning: &mut String,
    ) -> CallEnd {
        let handle = self.lifecycle.begin(kind);
        let end = handle
            .token()
            .run_until_cancelled(run_call(
                self.transport.as_ref(),
                request,
                cancel,
                self.idle_timeout,
                sink,
                reasoning,
            ))
            .await
            .unwrap_or(CallEnd::Cancelled);
        self.lifecycle.complete(handle.id());
        end
    }

    fn cancelled(&self, mut run: BatchRunState) -> AppResult<BatchRunState> {
        info!(
            completed = run.completed_batches,
            total = run.total_batches,
            "batch analysis cancelled"
        );
        run.transition(BatchPhase::Cancelled)?;
        Ok(run)
    }
}
