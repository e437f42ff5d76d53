//! Navigation Forest
//!
//! A knowledge base is a forest of `NavigationNode`s as delivered by the bulk
//! tree fetch. Field names on the wire follow the tree-storage service
//! (`node_token`, `has_child`); nodes are immutable once cached.

use serde::{Deserialize, Deserializer, Serialize};

/// Rendered in place of an id that the service did not supply.
pub const MISSING_TOKEN_PLACEHOLDER: &str = "[NODE TOKEN MISSING]";

/// One node of a knowledge-base forest.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct NavigationNode {
    #[serde(rename = "node_token", alias = "id", default)]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub children: Vec<NavigationNode>,
    #[serde(rename = "has_child", alias = "hasChildren", default)]
    pub has_children: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub obj_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub obj_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_node_token: Option<String>,
}

impl NavigationNode {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            ..Default::default()
        }
    }

    /// Attach children, keeping `has_children` consistent.
    pub fn with_children(mut self, children: Vec<NavigationNode>) -> Self {
        self.has_children = !children.is_empty();
        self.children = children;
        self
    }

    /// The id to print, or the placeholder when the service sent none.
    pub fn display_id(&self) -> &str {
        if self.id.trim().is_empty() {
            MISSING_TOKEN_PLACEHOLDER
        } else {
            &self.id
        }
    }

    /// Number of nodes in this subtree, including `self`.
    pub fn subtree_size(&self) -> usize {
        let mut count = 0;
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            count += 1;
            stack.extend(node.children.iter());
        }
        count
    }
}

/// Total node count of a forest; every node is visited exactly once.
pub fn count_forest(forest: &[NavigationNode]) -> usize {
    forest.iter().map(NavigationNode::subtree_size).sum()
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}
