use std::collections::VecDeque;
use crate::blueprint::Node;

/// 查找结果：节点本身以及从根到该节点 (含) 的 id 路径
#[derive(Debug, Clone, PartialEq)]
pub struct Located<'a> {
    pub node: &'a Node,
    pub path: Vec<String>,
}

/// Depth-first, pre-order. Returns the first node whose id matches.
/// Uses an explicit stack so tree depth is not bounded by the call stack.
pub fn find_by_id<'a>(tree: &'a Node, id: &str) -> Option<&'a Node> {
    let mut stack = vec![tree];
    while let Some(node) = stack.pop() {
        if node.id == id {
            return Some(node);
        }
        // reversed so the leftmost child is visited first
        stack.extend(node.children.iter().rev().map(|c| c.as_ref()));
    }
    None
}

/// Level-order search. Same contract as `find_by_id`, but with duplicated ids the
/// shallowest match wins.
pub fn find_by_id_bfs<'a>(tree: &'a Node, id: &str) -> Option<&'a Node> {
    let mut queue = VecDeque::from([tree]);
    while let Some(node) = queue.pop_front() {
        if node.id == id {
            return Some(node);
        }
        queue.extend(node.children.iter().map(|c| c.as_ref()));
    }
    None
}

/// Depth-first search that also reports the ancestor chain, root first, match last.
pub fn find_with_path<'a>(tree: &'a Node, id: &str) -> Option<Located<'a>> {
    let mut stack = vec![(tree, 0usize)];
    let mut path: Vec<&str> = Vec::new();

    while let Some((node, depth)) = stack.pop() {
        // drop the ids of the branch we just backtracked out of
        path.truncate(depth);
        path.push(&node.id);

        if node.id == id {
            return Some(Located {
                node,
                path: path.iter().map(|s| s.to_string()).collect(),
            });
        }

        for child in node.children.iter().rev() {
            stack.push((child.as_ref(), depth + 1));
        }
    }
    None
}

/// Child indices leading from `tree` to the first pre-order match.
/// An empty vector means the root itself matched.
pub(crate) fn index_path(tree: &Node, id: &str) -> Option<Vec<usize>> {
    let mut stack: Vec<(&Node, usize, usize)> = vec![(tree, 0, 0)];
    let mut path: Vec<usize> = Vec::new();

    while let Some((node, depth, index)) = stack.pop() {
        if depth > 0 {
            path.truncate(depth - 1);
            path.push(index);
        }

        if node.id == id {
            return Some(path);
        }

        for (i, child) in node.children.iter().enumerate().rev() {
            stack.push((child.as_ref(), depth + 1, i));
        }
    }
    None
}
