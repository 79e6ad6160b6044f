use async_trait::async_trait;
use std::fmt::Debug;
use std::time::Duration;
use tracing::info;
use crate::fragment::{Element, Fragment};
use crate::generator::{CodeGenerator, ElementParams, GenerationError};
use crate::runtime::request::Parameters;

/// 离线生成器
/// Builds a declarative fragment straight from the element parameters, no network.
#[derive(Debug, Clone, Default)]
pub struct TemplateGenerator {
    latency: Option<Duration>,
}

impl TemplateGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulated service latency before each reply.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn element_for(params: &ElementParams) -> Result<Element, GenerationError> {
        let label = params.label.clone();
        let element = match params.kind.as_str() {
            "defaultwrapper" | "wrapper" => Element::Wrapper { children: Vec::new() },
            "horizontal" => Element::Horizontal { children: Vec::new() },
            "vertical" => Element::Vertical { children: Vec::new() },
            "text" | "label" => Element::Text {
                text: label.or_else(|| params.description.clone()).unwrap_or_default(),
            },
            "input" => Element::Input {
                label,
                placeholder: params.description.clone(),
            },
            "button" => Element::Button {
                label: label.unwrap_or_else(|| "Button".to_string()),
                disabled: false,
            },
            "dropdown" => Element::Dropdown {
                label,
                options: Vec::new(),
            },
            "radio" => Element::Radio {
                name: label.unwrap_or_else(|| "radio".to_string()),
                options: Vec::new(),
                vertical: params.radio_type.as_deref() == Some("vertical"),
            },
            other => {
                return Err(GenerationError::InvalidParameters(format!("unsupported element type: {}", other)));
            }
        };
        Ok(element)
    }
}

#[async_trait]
impl CodeGenerator for TemplateGenerator {
    fn name(&self) -> &str {
        "template"
    }

    async fn generate(&self, target_node_id: &str, parameters: &Parameters) -> Result<Fragment, GenerationError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let params = ElementParams::from_parameters(parameters)?;
        let element = Self::element_for(&params)?;
        let source = serde_json::to_string(&element).map_err(|e| GenerationError::Decode(e.to_string()))?;
        info!(target_node_id, kind = %params.kind, "[TEMPLATE] fragment generated");

        Ok(Fragment {
            source,
            component_name: component_name(&params.kind),
            imports: Vec::new(),
            attributes: Default::default(),
            style: Default::default(),
        })
    }
}

/// "dropdown" -> "GeneratedDropdown"
fn component_name(kind: &str) -> String {
    let mut name = String::from("Generated");
    let mut upper = true;
    for c in kind.chars().filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-') {
        if c == '_' || c == '-' {
            upper = true;
            continue;
        }
        if upper {
            name.push(c.to_ascii_uppercase());
            upper = false;
        } else {
            name.push(c);
        }
    }
    name
}
