use async_trait::async_trait;
use serde::{Serialize, Deserialize};
use serde_json::Value;
use std::fmt::Debug;
use thiserror::Error;
use crate::fragment::Fragment;
use crate::runtime::protocol::ErrorPayload;
use crate::runtime::request::Parameters;

pub mod http;
pub mod template;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationError {
    /// 网络/连接层失败
    #[error("transport error: {0}")]
    Transport(String),
    /// 服务端返回了非成功状态
    #[error("server error ({status}): {message}")]
    Server { status: u16, message: String },
    #[error("invalid response: {0}")]
    Decode(String),
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),
    /// 生成器自身崩溃 (panic)
    #[error("generator crashed: {0}")]
    Internal(String),
}

impl GenerationError {
    pub fn kind(&self) -> &'static str {
        match self {
            GenerationError::Transport(_) => "transport",
            GenerationError::Server { .. } => "server",
            GenerationError::Decode(_) => "decode",
            GenerationError::InvalidParameters(_) => "invalid_parameters",
            GenerationError::Internal(_) => "internal",
        }
    }
}

impl From<&GenerationError> for ErrorPayload {
    fn from(error: &GenerationError) -> Self {
        ErrorPayload {
            message: error.to_string(),
            kind: error.kind().to_string(),
        }
    }
}

/// 代码生成服务接口
/// Implementations bound their own latency; the scheduler never times them out.
#[async_trait]
pub trait CodeGenerator: Send + Sync + Debug {
    fn name(&self) -> &str;
    async fn generate(&self, target_node_id: &str, parameters: &Parameters) -> Result<Fragment, GenerationError>;
}

/// 用户在界面上描述的元素
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementParams {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub radio_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_el_id: Option<String>,
}

impl ElementParams {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            ..Default::default()
        }
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn into_parameters(self) -> Parameters {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Parameters::new(),
        }
    }

    pub fn from_parameters(parameters: &Parameters) -> Result<Self, GenerationError> {
        serde_json::from_value(Value::Object(parameters.clone()))
            .map_err(|e| GenerationError::InvalidParameters(e.to_string()))
    }
}
