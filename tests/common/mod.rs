#![allow(dead_code)]

use archgen::fragment::Fragment;
use archgen::generator::{CodeGenerator, GenerationError};
use archgen::runtime::request::{Parameters, Request};
use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

pub type Gate = oneshot::Sender<Result<Fragment, GenerationError>>;

/// Generator whose calls block until the test opens their gate.
/// Calls are keyed by the `label` parameter; a call without a registered gate
/// returns immediately.
#[derive(Debug)]
pub struct GatedGenerator {
    gates: parking_lot::Mutex<HashMap<String, oneshot::Receiver<Result<Fragment, GenerationError>>>>,
    started: mpsc::UnboundedSender<String>,
    running: AtomicUsize,
    max_running: AtomicUsize,
    finished: AtomicUsize,
}

impl GatedGenerator {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let generator = Arc::new(Self {
            gates: parking_lot::Mutex::new(HashMap::new()),
            started: tx,
            running: AtomicUsize::new(0),
            max_running: AtomicUsize::new(0),
            finished: AtomicUsize::new(0),
        });
        (generator, rx)
    }

    pub fn gate(&self, label: &str) -> Gate {
        let (tx, rx) = oneshot::channel();
        self.gates.lock().insert(label.to_string(), rx);
        tx
    }

    pub fn max_running(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }

    pub fn finished(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CodeGenerator for GatedGenerator {
    fn name(&self) -> &str {
        "gated"
    }

    async fn generate(&self, _target_node_id: &str, parameters: &Parameters) -> Result<Fragment, GenerationError> {
        let label = parameters.get("label").and_then(|v| v.as_str()).unwrap_or_default().to_string();
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);
        let _ = self.started.send(label.clone());

        let gate = self.gates.lock().remove(&label);
        let outcome = match gate {
            Some(rx) => rx.await.unwrap_or_else(|_| Err(GenerationError::Transport("gate dropped".to_string()))),
            None => Ok(fragment(&label)),
        };

        self.running.fetch_sub(1, Ordering::SeqCst);
        self.finished.fetch_add(1, Ordering::SeqCst);
        outcome
    }
}

pub fn fragment(name: &str) -> Fragment {
    Fragment {
        source: json!({ "kind": "text", "text": name }).to_string(),
        component_name: "Generated".to_string(),
        ..Default::default()
    }
}

pub fn labeled(label: &str) -> Parameters {
    let mut params = Parameters::new();
    params.insert("type".to_string(), json!("text"));
    params.insert("label".to_string(), json!(label));
    params
}

/// Request whose id doubles as its gate label.
pub fn request(id: &str, target: &str) -> Request {
    Request::new(id.into(), target, labeled(id))
}

/// Polls `cond` every 5ms for up to one second.
pub async fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cond()
}
