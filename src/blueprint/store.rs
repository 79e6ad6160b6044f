use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use anyhow::{Context as _, Result};
use thiserror::Error;
use tracing::debug;
use crate::blueprint::{live, search, update, Located, Node, NodePatch};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("node not found: {0}")]
    NotFound(String),
    #[error("duplicate node id: {0}")]
    DuplicateId(String),
}

/// 应用层持有的蓝图树
/// All mutation goes through these methods, which keep node ids unique across the tree.
#[derive(Debug, Clone)]
pub struct BlueprintStore {
    root: Arc<Node>,
}

impl BlueprintStore {
    pub fn new(root: Node) -> Result<Self, StoreError> {
        if let Some(dup) = first_duplicate(root.ids()) {
            return Err(StoreError::DuplicateId(dup.to_string()));
        }
        Ok(Self { root: Arc::new(root) })
    }

    /// Loads a tree from a `.json`, `.yaml` or `.yml` file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read blueprint file {}", path.display()))?;
        let root: Node = match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content)?,
            _ => serde_json::from_str(&content)?,
        };
        Ok(Self::new(root)?)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self.root.as_ref())?)
    }

    pub fn root(&self) -> &Node {
        &self.root
    }

    /// Cheap frozen view of the current tree. Later mutations through the store
    /// copy the shared path instead of touching the snapshot.
    pub fn snapshot(&self) -> Arc<Node> {
        self.root.clone()
    }

    pub fn len(&self) -> usize {
        self.root.subtree_len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn contains(&self, id: &str) -> bool {
        search::find_by_id(&self.root, id).is_some()
    }

    pub fn find(&self, id: &str) -> Option<&Node> {
        search::find_by_id(&self.root, id)
    }

    pub fn find_bfs(&self, id: &str) -> Option<&Node> {
        search::find_by_id_bfs(&self.root, id)
    }

    pub fn find_with_path(&self, id: &str) -> Option<Located<'_>> {
        search::find_with_path(&self.root, id)
    }

    /// Copy-on-write replacement of one node; returns the previous root.
    /// The new tree is rejected if the updater introduced a duplicate id.
    pub fn update<F>(&mut self, id: &str, updater: F) -> Result<Arc<Node>, StoreError>
    where
        F: FnOnce(&Node) -> Node,
    {
        if !self.contains(id) {
            return Err(StoreError::NotFound(id.to_string()));
        }
        let next = update::update_by_id(&self.root, id, updater);
        if let Some(dup) = first_duplicate(next.ids()) {
            return Err(StoreError::DuplicateId(dup.to_string()));
        }
        debug!(node_id = %id, "Blueprint updated (copy-on-write)");
        Ok(std::mem::replace(&mut self.root, next))
    }

    /// In-place patch. The patch's children are checked against the rest of the tree.
    pub fn modify(&mut self, id: &str, patch: NodePatch) -> Result<&Node, StoreError> {
        if let Some(children) = &patch.children {
            self.check_new_children(id, children)?;
        } else if !self.contains(id) {
            return Err(StoreError::NotFound(id.to_string()));
        }
        let root = Arc::make_mut(&mut self.root);
        live::modify_directly(root, id, patch)
            .map(|n| &*n)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    pub fn replace_children(&mut self, id: &str, children: Vec<Node>) -> Result<&Node, StoreError> {
        self.check_new_children(id, &children)?;
        let root = Arc::make_mut(&mut self.root);
        live::replace_children(root, id, children)
            .map(|n| &*n)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    /// Appends `child` under `parent_id` in place.
    pub fn append_child(&mut self, parent_id: &str, child: Node) -> Result<&Node, StoreError> {
        let parent = self.find(parent_id).ok_or_else(|| StoreError::NotFound(parent_id.to_string()))?;
        let mut incoming: Vec<&Node> = parent.children.iter().map(|c| c.as_ref()).collect();
        incoming.push(&child);
        self.check_ids_against_tree(parent_id, &incoming)?;

        let root = Arc::make_mut(&mut self.root);
        let parent = live::get_reference(root, parent_id)
            .ok_or_else(|| StoreError::NotFound(parent_id.to_string()))?;
        parent.children.push(Arc::new(child));
        debug!(parent_id = %parent_id, "Blueprint child appended");
        Ok(parent)
    }

    fn check_new_children(&self, id: &str, children: &[Node]) -> Result<(), StoreError> {
        let incoming: Vec<&Node> = children.iter().collect();
        self.check_ids_against_tree(id, &incoming)
    }

    /// Ids in `incoming` (whole subtrees) must be unique among themselves and must not
    /// collide with any id outside the current subtree of `id`'s children.
    fn check_ids_against_tree(&self, id: &str, incoming: &[&Node]) -> Result<(), StoreError> {
        let target = self.find(id).ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        let replaced: HashSet<&str> = target
            .children
            .iter()
            .flat_map(|c| c.ids())
            .collect();
        let kept: HashSet<&str> = self
            .root
            .ids()
            .into_iter()
            .filter(|i| !replaced.contains(i))
            .collect();

        let mut seen = HashSet::new();
        for node in incoming {
            for new_id in node.ids() {
                if kept.contains(new_id) || !seen.insert(new_id) {
                    return Err(StoreError::DuplicateId(new_id.to_string()));
                }
            }
        }
        Ok(())
    }
}

fn first_duplicate<'a>(ids: impl IntoIterator<Item = &'a str>) -> Option<&'a str> {
    let mut seen = HashSet::new();
    ids.into_iter().find(|id| !seen.insert(*id))
}
