//! In-place access to a blueprint tree.
//!
//! These functions hand out `&mut` to the very node stored in the tree, so any later
//! lookup on the same tree sees the change. Used for incremental building where a
//! fresh root per inserted child would be wasteful.
//!
//! Descending goes through `Arc::make_mut`: nodes owned only by this tree are edited
//! where they live, while nodes still shared with an older snapshot are copied first,
//! so snapshots taken through `update_by_id` or `BlueprintStore::snapshot` stay frozen.

use std::sync::Arc;
use crate::blueprint::{Node, ScalarMap};
use crate::blueprint::search::index_path;

/// 节点的部分更新 (未设置的字段保持不变)
/// `id` is deliberately absent: renaming a node would silently break lookups.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodePatch {
    pub kind: Option<String>,
    pub description: Option<String>,
    pub attributes: Option<ScalarMap>,
    pub style: Option<ScalarMap>,
    pub children: Option<Vec<Node>>,
}

impl NodePatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn attributes(mut self, attributes: ScalarMap) -> Self {
        self.attributes = Some(attributes);
        self
    }

    pub fn style(mut self, style: ScalarMap) -> Self {
        self.style = Some(style);
        self
    }

    pub fn children(mut self, children: Vec<Node>) -> Self {
        self.children = Some(children);
        self
    }

    pub fn is_empty(&self) -> bool {
        self == &NodePatch::default()
    }

    /// Field-wise assignment; each present field replaces the old value wholesale.
    pub fn apply(self, node: &mut Node) {
        if let Some(kind) = self.kind {
            node.kind = kind;
        }
        if let Some(description) = self.description {
            node.description = Some(description);
        }
        if let Some(attributes) = self.attributes {
            node.attributes = attributes;
        }
        if let Some(style) = self.style {
            node.style = style;
        }
        if let Some(children) = self.children {
            node.children = children.into_iter().map(Arc::new).collect();
        }
    }
}

/// Mutable handle to the node with `id`, or `None`.
pub fn get_reference<'a>(tree: &'a mut Node, id: &str) -> Option<&'a mut Node> {
    let path = index_path(tree, id)?;
    let mut node = tree;
    for index in path {
        node = Arc::make_mut(&mut node.children[index]);
    }
    Some(node)
}

pub fn modify_directly<'a>(tree: &'a mut Node, id: &str, patch: NodePatch) -> Option<&'a mut Node> {
    let node = get_reference(tree, id)?;
    patch.apply(node);
    Some(node)
}

pub fn replace_children<'a>(tree: &'a mut Node, id: &str, children: Vec<Node>) -> Option<&'a mut Node> {
    let node = get_reference(tree, id)?;
    node.children = children.into_iter().map(Arc::new).collect();
    Some(node)
}
