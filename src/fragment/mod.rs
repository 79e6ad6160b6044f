pub mod compiler;

use serde::{Serialize, Deserialize};
use crate::blueprint::{Node, ScalarMap};

pub use compiler::{DeclarativeCompiler, Element, FragmentCompiler, Renderable};

/// 生成服务返回的片段
/// The scheduler never looks inside; it is passed through to the caller as-is.
/// Field aliases accept the snake_case keys the generation backend replies with.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fragment {
    #[serde(default, alias = "jsx_code", alias = "jsx", alias = "html")]
    pub source: String,
    #[serde(default, alias = "component_name")]
    pub component_name: String,
    #[serde(default)]
    pub imports: Vec<String>,
    #[serde(default, skip_serializing_if = "ScalarMap::is_empty")]
    pub attributes: ScalarMap,
    #[serde(default, alias = "styles", skip_serializing_if = "ScalarMap::is_empty")]
    pub style: ScalarMap,
}

impl Fragment {
    /// Runs the fragment through `compiler`; `None` means it could not be compiled.
    pub fn compile(&self, compiler: &dyn FragmentCompiler) -> Option<Renderable> {
        compiler.compile(&self.source, &self.component_name, &self.imports)
    }

    /// Compiles and turns the result into a blueprint subtree rooted at `id`.
    /// Fragment-level attributes and style are layered over the compiled root.
    pub fn materialize(&self, compiler: &dyn FragmentCompiler, id: &str) -> Option<Node> {
        let mut node = self.compile(compiler)?.to_node(id);
        node.attributes.extend(self.attributes.clone());
        node.style.extend(self.style.clone());
        Some(node)
    }
}
