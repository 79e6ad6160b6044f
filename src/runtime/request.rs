use std::fmt;
use serde::{Serialize, Deserialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// 生成参数 (对调度器不透明，原样传给生成服务)
pub type Parameters = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for RequestId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// 请求生命周期
/// Pending -> InFlight -> {Completed | Failed}; Pending -> Cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestStatus {
    Pending,
    InFlight,
    Completed,
    Failed,
    Cancelled,
}

impl RequestStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RequestStatus::Completed | RequestStatus::Failed | RequestStatus::Cancelled)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub id: RequestId,
    pub target_node_id: String,
    pub parameters: Parameters,
    /// milliseconds since the unix epoch
    pub submitted_at: i64,
    pub status: RequestStatus,
}

impl Request {
    pub fn new(id: RequestId, target_node_id: impl Into<String>, parameters: Parameters) -> Self {
        Self {
            id,
            target_node_id: target_node_id.into(),
            parameters,
            submitted_at: chrono::Utc::now().timestamp_millis(),
            status: RequestStatus::Pending,
        }
    }
}
