//! Analysis Models
//!
//! Batches, the batch-run state machine, and the progress updates every
//! analysis flow reports upward.

use serde::{Deserialize, Serialize};
use wiki_lens_core::NavigationNode;

use crate::utils::error::{AppError, AppResult};

/// Separator between batch outputs in the combined result.
pub const BATCH_SEPARATOR: &str = "\n\n---\n\n";

// ============================================================================
// Planning
// ============================================================================

/// One group of root subtrees submitted as a single analysis call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Batch {
    /// Batch index (0-based)
    pub index: usize,
    pub root_nodes: Vec<NavigationNode>,
    pub rendered_text: String,
    pub node_count: usize,
}

impl Batch {
    pub fn root_titles(&self) -> Vec<&str> {
        self.root_nodes.iter().map(|n| n.title.as_str()).collect()
    }
}

/// Result of planning a forest for analysis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchPlan {
    /// Analyze in one call
    Whole {
        rendered_text: String,
        node_count: usize,
    },
    /// Analyze one batch at a time, then summarize
    Batched {
        batches: Vec<Batch>,
        node_count: usize,
    },
}

impl BatchPlan {
    pub fn is_batched(&self) -> bool {
        matches!(self, BatchPlan::Batched { .. })
    }

    pub fn node_count(&self) -> usize {
        match self {
            BatchPlan::Whole { node_count, .. } | BatchPlan::Batched { node_count, .. } => {
                *node_count
            }
        }
    }
}

// ============================================================================
// Batch run state machine
// ============================================================================

/// Phase of one orchestration run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchPhase {
    Idle,
    Running,
    Summarizing,
    Done,
    Failed,
    Cancelled,
}

impl BatchPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BatchPhase::Done | BatchPhase::Failed | BatchPhase::Cancelled
        )
    }

    pub fn can_transition_to(&self, next: BatchPhase) -> bool {
        use BatchPhase::*;
        matches!(
            (self, next),
            (Idle, Running)
                | (Running, Summarizing)
                | (Running, Failed)
                | (Running, Cancelled)
                | (Summarizing, Done)
                | (Summarizing, Failed)
                | (Summarizing, Cancelled)
        )
    }
}

/// Where a run stopped after a batch failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchFailure {
    /// Index of the batch whose call failed
    pub batch_index: usize,
    /// Batches completed before the failure
    pub completed_batches: usize,
    pub message: String,
}

/// State of one orchestration run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRunState {
    pub total_batches: usize,
    pub completed_batches: usize,
    pub batch_outputs: Vec<String>,
    pub reasoning_text: String,
    pub final_summary: String,
    pub phase: BatchPhase,
    pub failure: Option<BatchFailure>,
    /// Set when the summary call failed; the run still completes
    pub summary_error: Option<String>,
}

impl BatchRunState {
    pub fn new(total_batches: usize) -> Self {
        Self {
            total_batches,
            completed_batches: 0,
            batch_outputs: Vec::new(),
            reasoning_text: String::new(),
            final_summary: String::new(),
            phase: BatchPhase::Idle,
            failure: None,
            summary_error: None,
        }
    }

    /// The single place the phase changes.
    pub fn transition(&mut self, next: BatchPhase) -> AppResult<()> {
        if !self.phase.can_transition_to(next) {
            return Err(AppError::internal(format!(
                "invalid batch phase transition {:?} -> {:?}",
                self.phase, next
            )));
        }
        self.phase = next;
        Ok(())
    }

    /// Record a finished batch output.
    pub fn complete_batch(&mut self, output: String) {
        self.batch_outputs.push(output);
        self.completed_batches += 1;
    }

    pub fn progress(&self) -> f64 {
        if self.total_batches == 0 {
            return 0.0;
        }
        self.completed_batches as f64 / self.total_batches as f64
    }

    /// Batch outputs joined by the separator.
    pub fn combined_outputs(&self) -> String {
        self.batch_outputs.join(BATCH_SEPARATOR)
    }

    /// The externally visible result; only a finished run has one.
    pub fn result(&self) -> Option<String> {
        (self.phase == BatchPhase::Done)
            .then(|| format!("{}\n\n{}", self.combined_outputs(), self.final_summary))
    }
}

// ============================================================================
// Updates and reports
// ============================================================================

/// Progress reported by an analysis flow while it runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnalysisUpdate {
    /// Nodes fetched so far by the navigation pull
    NavigationProgress { node_count: u64 },
    Reasoning { content: String },
    /// The first answer text arrived; reasoning is over
    ReasoningDone,
    Content { content: String },
    BatchStarted {
        index: usize,
        total: usize,
        root_titles: Vec<String>,
    },
    BatchProgress {
        completed: usize,
        total: usize,
        progress: f64,
    },
    Summarizing,
    Completed { result: String },
    Failed {
        message: String,
        /// Output gathered before the failure
        partial: String,
    },
}

/// How a finished analysis flow ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AnalysisReport {
    Completed {
        result: String,
        reasoning: String,
        /// Present for batched runs
        #[serde(skip_serializing_if = "Option::is_none")]
        run: Option<BatchRunState>,
    },
    Failed {
        message: String,
        partial: String,
        reasoning: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        run: Option<BatchRunState>,
    },
    Cancelled {
        #[serde(skip_serializing_if = "Option::is_none")]
        run: Option<BatchRunState>,
    },
}

impl AnalysisReport {
    pub fn result(&self) -> Option<&str> {
        match self {
            AnalysisReport::Completed { result, .. } => Some(result),
            _ => None,
        }
    }
}
