use std::sync::Arc;
use crate::blueprint::Node;
use crate::blueprint::search::index_path;

/// Copy-on-write update.
///
/// Returns a new root. Only the nodes on the root-to-target path are rebuilt; every
/// other subtree is the same `Arc` as in `tree`, and `tree` itself is left untouched.
/// `updater` gets the current node and returns its replacement.
///
/// With an unknown id the result is a fresh root with identical content.
pub fn update_by_id<F>(tree: &Arc<Node>, id: &str, updater: F) -> Arc<Node>
where
    F: FnOnce(&Node) -> Node,
{
    match index_path(tree, id) {
        Some(path) => rebuild(tree, &path, updater),
        None => Arc::new(Node::clone(tree)),
    }
}

fn rebuild<F>(node: &Arc<Node>, path: &[usize], updater: F) -> Arc<Node>
where
    F: FnOnce(&Node) -> Node,
{
    match path.split_first() {
        None => Arc::new(updater(node)),
        Some((&index, rest)) => {
            // shallow copy: the children vector holds the same Arcs
            let mut copy = Node::clone(node);
            copy.children[index] = rebuild(&node.children[index], rest, updater);
            Arc::new(copy)
        }
    }
}
