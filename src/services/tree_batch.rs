//! Tree Batch Planner
//!
//! Decides whether a knowledge-base forest is analyzed in one call or split
//! into batches of root subtrees, and renders forests as the indented bullet
//! outline the analysis prompts embed.
//!
//! The bulk fetch may deliver a flattened forest in which some top-level
//! entries also appear nested under another entry. Roots are the top-level
//! entries that no other top-level entry contains; everything is counted and
//! rendered from those roots only.

use std::collections::HashSet;

use tracing::debug;
use wiki_lens_core::NavigationNode;

use crate::models::analysis::{Batch, BatchPlan};
use crate::utils::error::{AppError, AppResult};

/// Node count above which a multi-root forest is batched.
pub const DEFAULT_BATCH_THRESHOLD: usize = 2500;

/// Root subtrees per batch.
pub const DEFAULT_BATCH_SIZE: usize = 1;

/// Splits forests into analysis batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeBatchPlanner {
    threshold: usize,
    batch_size: usize,
}

impl Default for TreeBatchPlanner {
    fn default() -> Self {
        Self::new(DEFAULT_BATCH_THRESHOLD, DEFAULT_BATCH_SIZE)
    }
}

impl TreeBatchPlanner {
    /// A `batch_size` of zero is treated as one.
    pub fn new(threshold: usize, batch_size: usize) -> Self {
        Self {
            threshold,
            batch_size: batch_size.max(1),
        }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Plan the analysis of `forest`.
    ///
    /// # Returns
    /// * `Ok(BatchPlan::Whole)` - at most `threshold` nodes, or fewer than two roots
    /// * `Ok(BatchPlan::Batched)` - root subtrees grouped `batch_size` at a time
    /// * `Err(AppError::Validation)` - the forest contains a cycle
    pub fn plan(&self, forest: &[NavigationNode]) -> AppResult<BatchPlan> {
        let roots = identify_roots(forest)?;
        let node_count: usize = roots.iter().map(|r| r.subtree_size()).sum();

        if node_count <= self.threshold || roots.len() < 2 {
            debug!(
                node_count,
                roots = roots.len(),
                threshold = self.threshold,
                "analyzing forest in one call"
            );
            return Ok(BatchPlan::Whole {
                rendered_text: render_roots(&roots),
                node_count,
            });
        }

        let batches: Vec<Batch> = roots
            .chunks(self.batch_size)
            .enumerate()
            .map(|(index, group)| Batch {
                index,
                root_nodes: group.iter().map(|n| (*n).clone()).collect(),
                rendered_text: render_roots(group),
                node_count: group.iter().map(|n| n.subtree_size()).sum(),
            })
            .collect();

        debug!(
            node_count,
            roots = roots.len(),
            batches = batches.len(),
            "forest split into batches"
        );
        Ok(BatchPlan::Batched {
            batches,
            node_count,
        })
    }
}

/// Top-level entries not contained in any other top-level entry.
///
/// Fails when an id recurs on its own ancestor path, or when a non-empty
/// forest has no root at all (entries containing each other).
pub fn identify_roots(forest: &[NavigationNode]) -> AppResult<Vec<&NavigationNode>> {
    for entry in forest {
        check_ancestry(entry, &mut Vec::new())?;
    }

    let descendant_sets: Vec<HashSet<&str>> = forest
        .iter()
        .map(|entry| {
            let mut ids = HashSet::new();
            collect_descendant_ids(entry, &mut ids);
            ids
        })
        .collect();

    let mut seen = HashSet::new();
    let mut roots = Vec::new();
    for (i, entry) in forest.iter().enumerate() {
        let id = entry.id.as_str();
        if !id.is_empty() {
            let nested = descendant_sets
                .iter()
                .enumerate()
                .any(|(j, ids)| j != i && ids.contains(id));
            if nested || !seen.insert(id) {
                continue;
            }
        }
        roots.push(entry);
    }

    if roots.is_empty() && !forest.is_empty() {
        return Err(AppError::validation(
            "navigation forest has no root: every top-level entry is nested in another",
        ));
    }
    Ok(roots)
}

fn check_ancestry<'a>(node: &'a NavigationNode, path: &mut Vec<&'a str>) -> AppResult<()> {
    let id = node.id.as_str();
    if !id.is_empty() {
        if path.contains(&id) {
            return Err(AppError::validation(format!(
                "navigation forest has a cycle at node {}",
                id
            )));
        }
        path.push(id);
    }
    for child in &node.children {
        check_ancestry(child, path)?;
    }
    if !id.is_empty() {
        path.pop();
    }
    Ok(())
}

fn collect_descendant_ids<'a>(node: &'a NavigationNode, ids: &mut HashSet<&'a str>) {
    for child in &node.children {
        if !child.id.is_empty() {
            ids.insert(child.id.as_str());
        }
        collect_descendant_ids(child, ids);
    }
}

/// Whole-forest outline: one `- title (token: id)` line per node, pre-order,
/// indented two spaces per level.
pub fn render_forest(forest: &[NavigationNode]) -> String {
    let mut output = String::new();
    for node in forest {
        render_node(&mut output, node, 0);
    }
    output
}

fn render_roots(roots: &[&NavigationNode]) -> String {
    let mut output = String::new();
    for node in roots {
        render_node(&mut output, node, 0);
    }
    output
}

fn render_node(output: &mut String, node: &NavigationNode, depth: usize) {
    output.push_str(&format!(
        "{}- {} (token: {})\n",
        "  ".repeat(depth),
        node.title,
        node.display_id()
    ));
    for child in &node.children {
        render_node(output, child, depth + 1);
    }
}

/// Outline of the nodes a reader has opened: titles only, descending only
/// into nodes whose id is in `expanded_ids`.
pub fn render_expanded_path(forest: &[NavigationNode], expanded_ids: &HashSet<String>) -> String {
    fn walk(output: &mut String, node: &NavigationNode, depth: usize, expanded: &HashSet<String>) {
        output.push_str(&format!("{}- {}\n", "  ".repeat(depth), node.title));
        if expanded.contains(&node.id) {
            for child in &node.children {
                walk(output, child, depth + 1, expanded);
            }
        }
    }

    let mut output = String::new();
    for node in forest {
        walk(&mut output, node, 0, expanded_ids);
    }
    output
}
