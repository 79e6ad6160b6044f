use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use std::fmt::Debug;
use std::time::Duration;
use reqwest::Client;
use tracing::debug;
use uuid::Uuid;
use crate::config::GeneratorConfig;
use crate::fragment::Fragment;
use crate::generator::{CodeGenerator, GenerationError};
use crate::runtime::request::Parameters;

/// 通过 HTTP 调用远端生成服务
#[derive(Debug, Clone)]
pub struct HttpGenerator {
    client: Client,
    endpoint: String,
}

/// Backend reply: `{ "status": "Success", "message": { ... } }`.
/// Some deployments wrap the fragment in `data` instead.
#[derive(Debug, Deserialize)]
struct Envelope {
    status: Option<String>,
    message: Option<Value>,
    data: Option<Value>,
}

impl HttpGenerator {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, GenerationError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GenerationError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    pub fn from_config(config: &GeneratorConfig) -> Result<Self, GenerationError> {
        Self::new(config.endpoint.clone(), Duration::from_secs(config.timeout_secs))
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl CodeGenerator for HttpGenerator {
    fn name(&self) -> &str {
        "http"
    }

    async fn generate(&self, target_node_id: &str, parameters: &Parameters) -> Result<Fragment, GenerationError> {
        // { newId, targetId, ...parameters }
        let mut body = json!({
            "newId": Uuid::new_v4().simple().to_string(),
            "targetId": target_node_id,
        });
        if let Some(obj) = body.as_object_mut() {
            for (k, v) in parameters {
                obj.insert(k.clone(), v.clone());
            }
        }

        let response = self.client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| GenerationError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(GenerationError::Server {
                status: status.as_u16(),
                message,
            });
        }

        let envelope: Envelope = response
            .json()
            .await
            .map_err(|e| GenerationError::Decode(e.to_string()))?;
        debug!(target_node_id, status = ?envelope.status, "Generation service replied");

        if let Some(s) = envelope.status.as_deref() {
            if s != "Success" {
                return Err(GenerationError::Server {
                    status: status.as_u16(),
                    message: envelope.message.map(|m| m.to_string()).unwrap_or_else(|| s.to_string()),
                });
            }
        }

        let payload = envelope
            .message
            .or(envelope.data)
            .ok_or_else(|| GenerationError::Decode("response carries no fragment".to_string()))?;

        serde_json::from_value(payload).map_err(|e| GenerationError::Decode(e.to_string()))
    }
}
