//! 片段编译器
//!
//! Turns a fragment's source into something renderable. The shipped compiler reads a
//! declarative element descriptor (JSON) instead of evaluating generated code, so a
//! malicious or broken fragment can at worst fail to compile.

use std::fmt::Debug;
use serde::{Serialize, Deserialize};
use tracing::debug;
use crate::blueprint::Node;

/// Compilation failures are reported as `None`; the caller picks the fallback.
pub trait FragmentCompiler: Send + Sync + Debug {
    fn compile(&self, source: &str, component_name: &str, imports: &[String]) -> Option<Renderable>;
}

/// 可描述的元素种类
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Element {
    Wrapper {
        #[serde(default)]
        children: Vec<Element>,
    },
    Horizontal {
        #[serde(default)]
        children: Vec<Element>,
    },
    Vertical {
        #[serde(default)]
        children: Vec<Element>,
    },
    Text {
        text: String,
    },
    Input {
        #[serde(default)]
        label: Option<String>,
        #[serde(default)]
        placeholder: Option<String>,
    },
    Button {
        label: String,
        #[serde(default)]
        disabled: bool,
    },
    Dropdown {
        #[serde(default)]
        label: Option<String>,
        #[serde(default)]
        options: Vec<String>,
    },
    Radio {
        name: String,
        #[serde(default)]
        options: Vec<String>,
        #[serde(default)]
        vertical: bool,
    },
}

impl Element {
    pub fn kind(&self) -> &'static str {
        match self {
            Element::Wrapper { .. } => "wrapper",
            Element::Horizontal { .. } => "horizontal",
            Element::Vertical { .. } => "vertical",
            Element::Text { .. } => "text",
            Element::Input { .. } => "input",
            Element::Button { .. } => "button",
            Element::Dropdown { .. } => "dropdown",
            Element::Radio { .. } => "radio",
        }
    }

    /// Builds the blueprint subtree for this element. The root takes `id`, each
    /// child gets `{parent}-{index}`.
    pub fn to_node(&self, id: &str) -> Node {
        let node = Node::new(id, self.kind());
        let (node, children) = match self {
            Element::Wrapper { children } => (node, children.as_slice()),
            Element::Horizontal { children } => (
                node.with_style("display", "flex").with_style("flexDirection", "row"),
                children.as_slice(),
            ),
            Element::Vertical { children } => (
                node.with_style("display", "flex").with_style("flexDirection", "column"),
                children.as_slice(),
            ),
            Element::Text { text } => (node.with_attribute("text", text.as_str()), &[][..]),
            Element::Input { label, placeholder } => {
                let mut node = node;
                if let Some(label) = label {
                    node = node.with_attribute("label", label.as_str());
                }
                if let Some(placeholder) = placeholder {
                    node = node.with_attribute("placeholder", placeholder.as_str());
                }
                (node, &[][..])
            }
            Element::Button { label, disabled } => (
                node.with_attribute("label", label.as_str()).with_attribute("disabled", *disabled),
                &[][..],
            ),
            Element::Dropdown { label, options } => {
                let mut node = node.with_attribute("options", options.join(","));
                if let Some(label) = label {
                    node = node.with_attribute("label", label.as_str());
                }
                (node, &[][..])
            }
            Element::Radio { name, options, vertical } => (
                node.with_attribute("name", name.as_str())
                    .with_attribute("options", options.join(","))
                    .with_style("flexDirection", if *vertical { "column" } else { "row" }),
                &[][..],
            ),
        };

        node.with_children(
            children
                .iter()
                .enumerate()
                .map(|(i, child)| child.to_node(&format!("{}-{}", id, i))),
        )
    }
}

/// 编译后的可渲染句柄
#[derive(Debug, Clone, PartialEq)]
pub struct Renderable {
    pub component_name: String,
    pub imports: Vec<String>,
    pub root: Element,
}

impl Renderable {
    pub fn to_node(&self, id: &str) -> Node {
        self.root
            .to_node(id)
            .with_attribute("component", self.component_name.as_str())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DeclarativeCompiler;

impl DeclarativeCompiler {
    pub fn new() -> Self {
        Self
    }
}

impl FragmentCompiler for DeclarativeCompiler {
    fn compile(&self, source: &str, component_name: &str, imports: &[String]) -> Option<Renderable> {
        if !is_component_name(component_name) {
            debug!(component_name, "Rejected fragment: invalid component name");
            return None;
        }

        match serde_json::from_str::<Element>(source) {
            Ok(root) => Some(Renderable {
                component_name: component_name.to_string(),
                imports: imports.to_vec(),
                root,
            }),
            Err(e) => {
                debug!(component_name, error = %e, "Fragment source is not a valid element descriptor");
                None
            }
        }
    }
}

/// PascalCase identifier, the only shape a component may be registered under.
fn is_component_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_uppercase() => chars.all(|c| c.is_ascii_alphanumeric() || c == '_'),
        _ => false,
    }
}
