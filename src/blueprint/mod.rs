//! 蓝图树 (Blueprint tree)
//!
//! A document tree addressed by node id. Two update disciplines live side by side:
//! `update` builds a new root and shares every untouched subtree, while `live`
//! mutates the node in place so other lookups on the same tree see the change.

pub mod search;
pub mod update;
pub mod live;
pub mod store;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use serde::{Serialize, Deserialize, Deserializer};
use serde_json::Number;

pub use live::{get_reference, modify_directly, replace_children, NodePatch};
pub use search::{find_by_id, find_by_id_bfs, find_with_path, Located};
pub use store::{BlueprintStore, StoreError};
pub use update::update_by_id;

/// 属性/样式的标量值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Number(Number),
    Text(String),
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Bool(b) => write!(f, "{}", b),
            Scalar::Number(n) => write!(f, "{}", n),
            Scalar::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Scalar::Text(value.to_string())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Scalar::Text(value)
    }
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Scalar::Bool(value)
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Scalar::Number(Number::from(value))
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        // NaN and infinities have no JSON number form
        Number::from_f64(value)
            .map(Scalar::Number)
            .unwrap_or_else(|| Scalar::Text(value.to_string()))
    }
}

pub type ScalarMap = BTreeMap<String, Scalar>;

/// 文档节点
/// `children` is always a list; legacy documents with a single `child` object are
/// accepted on load and normalised into a one-element list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    #[serde(alias = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: ScalarMap,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub style: ScalarMap,
    #[serde(default, alias = "child", deserialize_with = "one_or_many")]
    pub children: Vec<Arc<Node>>,
}

impl Node {
    pub fn new(id: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            description: None,
            attributes: BTreeMap::new(),
            style: BTreeMap::new(),
            children: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Scalar>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn with_style(mut self, key: impl Into<String>, value: impl Into<Scalar>) -> Self {
        self.style.insert(key.into(), value.into());
        self
    }

    pub fn with_child(mut self, child: Node) -> Self {
        self.children.push(Arc::new(child));
        self
    }

    pub fn with_children(mut self, children: impl IntoIterator<Item = Node>) -> Self {
        self.children.extend(children.into_iter().map(Arc::new));
        self
    }

    /// Number of nodes in this subtree, including `self`.
    pub fn subtree_len(&self) -> usize {
        let mut count = 0;
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            count += 1;
            stack.extend(node.children.iter().map(|c| c.as_ref()));
        }
        count
    }

    /// All ids in this subtree, pre-order.
    pub fn ids(&self) -> Vec<&str> {
        let mut ids = Vec::new();
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            ids.push(node.id.as_str());
            stack.extend(node.children.iter().rev().map(|c| c.as_ref()));
        }
        ids
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    Many(Vec<Arc<Node>>),
    One(Arc<Node>),
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<Arc<Node>>, D::Error>
where
    D: Deserializer<'de>,
{
    let children = Option::<OneOrMany>::deserialize(deserializer)?;
    Ok(match children {
        Some(OneOrMany::Many(list)) => list,
        Some(OneOrMany::One(node)) => vec![node],
        None => Vec::new(),
    })
}
