//! 隔离边界上的消息协议
//! 两侧之间只传递 JSON 帧 (serde_json::Value)，不共享内存。

use serde::{Serialize, Deserialize};
use serde_json::Value;
use thiserror::Error;
use crate::fragment::Fragment;
use crate::runtime::request::{Parameters, Request, RequestId, RequestStatus};

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unknown message type: {0}")]
    UnknownType(String),
    #[error("malformed {kind} frame: {source}")]
    Malformed {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// ADD_REQUEST 的负载
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddRequest {
    pub id: RequestId,
    pub target_node_id: String,
    #[serde(default)]
    pub parameters: Parameters,
    pub timestamp: i64,
}

impl From<AddRequest> for Request {
    fn from(add: AddRequest) -> Self {
        Request {
            id: add.id,
            target_node_id: add.target_node_id,
            parameters: add.parameters,
            submitted_at: add.timestamp,
            status: RequestStatus::Pending,
        }
    }
}

/// Manager -> Worker
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerMessage {
    AddRequest(AddRequest),
    CancelRequest(RequestId),
}

#[derive(Serialize, Deserialize)]
struct RawMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Value,
}

impl WorkerMessage {
    pub const ADD_REQUEST: &'static str = "ADD_REQUEST";
    pub const CANCEL_REQUEST: &'static str = "CANCEL_REQUEST";

    pub fn encode(&self) -> Result<Value, ProtocolError> {
        let raw = match self {
            WorkerMessage::AddRequest(add) => RawMessage {
                kind: Self::ADD_REQUEST.to_string(),
                payload: serde_json::to_value(add).map_err(|e| malformed(Self::ADD_REQUEST, e))?,
            },
            WorkerMessage::CancelRequest(id) => RawMessage {
                kind: Self::CANCEL_REQUEST.to_string(),
                payload: Value::String(id.to_string()),
            },
        };
        serde_json::to_value(raw).map_err(|e| malformed("message", e))
    }

    pub fn decode(frame: Value) -> Result<Self, ProtocolError> {
        let raw: RawMessage = serde_json::from_value(frame).map_err(|e| malformed("message", e))?;
        match raw.kind.as_str() {
            Self::ADD_REQUEST => {
                let add = serde_json::from_value(raw.payload).map_err(|e| malformed(Self::ADD_REQUEST, e))?;
                Ok(WorkerMessage::AddRequest(add))
            }
            Self::CANCEL_REQUEST => {
                let id = serde_json::from_value(raw.payload).map_err(|e| malformed(Self::CANCEL_REQUEST, e))?;
                Ok(WorkerMessage::CancelRequest(id))
            }
            _ => Err(ProtocolError::UnknownType(raw.kind)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressInfo {
    pub status: String,
    pub message: String,
    pub progress: u8,
}

impl ProgressInfo {
    pub fn processing() -> Self {
        Self {
            status: "processing".to_string(),
            message: "Generating code...".to_string(),
            progress: 0,
        }
    }
}

/// ERROR 事件的负载，保留原始失败信息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    Progress(ProgressInfo),
    Result(Fragment),
    Error(ErrorPayload),
}

/// Worker -> Manager
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerResponse {
    pub request_id: RequestId,
    pub event: WorkerEvent,
}

#[derive(Serialize, Deserialize)]
struct RawResponse {
    #[serde(rename = "type")]
    kind: String,
    #[serde(rename = "requestId")]
    request_id: RequestId,
    #[serde(default)]
    payload: Value,
}

impl WorkerResponse {
    pub const PROGRESS: &'static str = "PROGRESS";
    pub const RESULT: &'static str = "RESULT";
    pub const ERROR: &'static str = "ERROR";

    pub fn progress(request_id: RequestId, info: ProgressInfo) -> Self {
        Self { request_id, event: WorkerEvent::Progress(info) }
    }

    pub fn result(request_id: RequestId, fragment: Fragment) -> Self {
        Self { request_id, event: WorkerEvent::Result(fragment) }
    }

    pub fn error(request_id: RequestId, payload: ErrorPayload) -> Self {
        Self { request_id, event: WorkerEvent::Error(payload) }
    }

    pub fn kind(&self) -> &'static str {
        match self.event {
            WorkerEvent::Progress(_) => Self::PROGRESS,
            WorkerEvent::Result(_) => Self::RESULT,
            WorkerEvent::Error(_) => Self::ERROR,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self.event, WorkerEvent::Progress(_))
    }

    pub fn encode(&self) -> Result<Value, ProtocolError> {
        let kind = self.kind();
        let payload = match &self.event {
            WorkerEvent::Progress(info) => serde_json::to_value(info),
            WorkerEvent::Result(fragment) => serde_json::to_value(fragment),
            WorkerEvent::Error(error) => serde_json::to_value(error),
        }
        .map_err(|e| malformed(kind, e))?;

        let raw = RawResponse {
            kind: kind.to_string(),
            request_id: self.request_id.clone(),
            payload,
        };
        serde_json::to_value(raw).map_err(|e| malformed("response", e))
    }

    pub fn decode(frame: Value) -> Result<Self, ProtocolError> {
        let raw: RawResponse = serde_json::from_value(frame).map_err(|e| malformed("response", e))?;
        let event = match raw.kind.as_str() {
            Self::PROGRESS => WorkerEvent::Progress(
                serde_json::from_value(raw.payload).map_err(|e| malformed(Self::PROGRESS, e))?,
            ),
            Self::RESULT => WorkerEvent::Result(
                serde_json::from_value(raw.payload).map_err(|e| malformed(Self::RESULT, e))?,
            ),
            Self::ERROR => WorkerEvent::Error(
                serde_json::from_value(raw.payload).map_err(|e| malformed(Self::ERROR, e))?,
            ),
            _ => return Err(ProtocolError::UnknownType(raw.kind)),
        };
        Ok(Self { request_id: raw.request_id, event })
    }
}

fn malformed(kind: &'static str, source: serde_json::Error) -> ProtocolError {
    ProtocolError::Malformed { kind, source }
}
