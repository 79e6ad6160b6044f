//! 生成请求管理器
//!
//! Caller-facing side of the worker boundary. Each `generate` call registers a set
//! of callbacks under a fresh request id; a router task decodes the worker's events
//! and fires the matching callback.
//!
//! ```text
//! caller ── generate() ──► ADD_REQUEST ──► worker (Scheduler)
//!   ▲                                          │
//!   └── on_progress / on_success / on_error ◄──┘ PROGRESS / RESULT / ERROR
//! ```

use std::sync::Arc;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use crate::config::SchedulerConfig;
use crate::fragment::Fragment;
use crate::generator::CodeGenerator;
use crate::runtime::protocol::{AddRequest, ErrorPayload, ProgressInfo, ProtocolError, WorkerEvent, WorkerMessage, WorkerResponse};
use crate::runtime::request::{Parameters, RequestId};
use crate::runtime::worker::spawn_worker;

pub type ProgressCallback = Arc<dyn Fn(&ProgressInfo) + Send + Sync>;
pub type SuccessCallback = Box<dyn FnOnce(Fragment) + Send + Sync>;
pub type ErrorCallback = Box<dyn FnOnce(ErrorPayload) + Send + Sync>;

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("architecture worker is not running")]
    Terminated,
    #[error("invalid scheduler config: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// 回调集合，均为可选
#[derive(Default)]
pub struct Callbacks {
    on_progress: Option<ProgressCallback>,
    on_success: Option<SuccessCallback>,
    on_error: Option<ErrorCallback>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// May fire any number of times before the terminal callback.
    pub fn on_progress(mut self, f: impl Fn(&ProgressInfo) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Arc::new(f));
        self
    }

    pub fn on_success(mut self, f: impl FnOnce(Fragment) + Send + Sync + 'static) -> Self {
        self.on_success = Some(Box::new(f));
        self
    }

    pub fn on_error(mut self, f: impl FnOnce(ErrorPayload) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }
}

struct PendingRequest {
    target_node_id: String,
    callbacks: Callbacks,
}

type PendingMap = DashMap<RequestId, PendingRequest>;

pub struct Manager {
    inbound: Mutex<Option<mpsc::Sender<Value>>>,
    pending: Arc<PendingMap>,
    worker: Mutex<Option<JoinHandle<()>>>,
    router: Mutex<Option<JoinHandle<()>>>,
}

impl Manager {
    /// Spawns the worker context and the event router. Must run inside a tokio runtime.
    pub fn new(config: &SchedulerConfig, generator: Arc<dyn CodeGenerator>) -> Result<Self, ManagerError> {
        let handle = spawn_worker(config, generator).map_err(|e| ManagerError::InvalidConfig(e.to_string()))?;
        let pending = Arc::new(PendingMap::new());
        let router = tokio::spawn(route_events(pending.clone(), handle.outbound));
        info!(max_permits = config.max_permits, "Architecture worker initialized");

        Ok(Self {
            inbound: Mutex::new(Some(handle.inbound)),
            pending,
            worker: Mutex::new(Some(handle.join)),
            router: Mutex::new(Some(router)),
        })
    }

    /// Registers `callbacks` under a fresh id and posts `ADD_REQUEST` to the worker.
    pub async fn generate(
        &self,
        target_node_id: impl Into<String>,
        parameters: Parameters,
        callbacks: Callbacks,
    ) -> Result<RequestId, ManagerError> {
        let sender = self.sender().ok_or(ManagerError::Terminated)?;
        let target_node_id = target_node_id.into();
        let id = RequestId::new();

        let frame = WorkerMessage::AddRequest(AddRequest {
            id: id.clone(),
            target_node_id: target_node_id.clone(),
            parameters,
            timestamp: chrono::Utc::now().timestamp_millis(),
        })
        .encode()?;

        // registered before posting so an immediate reply can be correlated
        self.pending.insert(id.clone(), PendingRequest { target_node_id, callbacks });

        if sender.send(frame).await.is_err() {
            self.pending.remove(&id);
            return Err(ManagerError::Terminated);
        }

        debug!(request_id = %id, "Generation request posted");
        Ok(id)
    }

    /// Forgets the request locally and asks the worker to drop it. Events that still
    /// arrive for `id` find no entry and are discarded.
    pub async fn cancel(&self, id: &RequestId) -> bool {
        let Some(sender) = self.sender() else {
            return false;
        };
        if self.pending.remove(id).is_none() {
            return false;
        }

        let frame = match WorkerMessage::CancelRequest(id.clone()).encode() {
            Ok(frame) => frame,
            Err(e) => {
                warn!(request_id = %id, error = %e, "Failed to encode cancel");
                return true;
            }
        };
        if sender.send(frame).await.is_err() {
            debug!(request_id = %id, "Worker gone while cancelling");
        }
        true
    }

    /// Stops the worker, drops every pending entry and the router. Later calls to
    /// `generate` fail with `ManagerError::Terminated`.
    pub async fn shutdown(&self) {
        let Some(sender) = self.inbound.lock().take() else {
            return;
        };
        // closing the inbound channel ends the worker loop
        drop(sender);

        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                warn!(error = %e, "Architecture worker ended abnormally");
            }
        }

        self.pending.clear();
        if let Some(router) = self.router.lock().take() {
            router.abort();
        }
        info!("Architecture worker terminated");
    }

    pub fn is_running(&self) -> bool {
        self.inbound.lock().is_some()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn target_of(&self, id: &RequestId) -> Option<String> {
        self.pending.get(id).map(|p| p.target_node_id.clone())
    }

    fn sender(&self) -> Option<mpsc::Sender<Value>> {
        self.inbound.lock().clone()
    }
}

async fn route_events(pending: Arc<PendingMap>, mut outbound: mpsc::Receiver<Value>) {
    while let Some(frame) = outbound.recv().await {
        match WorkerResponse::decode(frame) {
            Ok(response) => deliver(&pending, response),
            Err(e) => warn!(error = %e, "Ignoring worker frame"),
        }
    }
    debug!("Event router stopped");
}

fn deliver(pending: &PendingMap, response: WorkerResponse) {
    let id = response.request_id;
    match response.event {
        WorkerEvent::Progress(info) => {
            // clone the callback out so no map lock is held while it runs
            let callback = match pending.get(&id) {
                Some(entry) => entry.callbacks.on_progress.clone(),
                None => return correlation_miss(&id, WorkerResponse::PROGRESS),
            };
            if let Some(callback) = callback {
                callback(&info);
            }
        }
        WorkerEvent::Result(fragment) => match pending.remove(&id) {
            Some((_, entry)) => {
                if let Some(callback) = entry.callbacks.on_success {
                    callback(fragment);
                }
            }
            None => correlation_miss(&id, WorkerResponse::RESULT),
        },
        WorkerEvent::Error(payload) => match pending.remove(&id) {
            Some((_, entry)) => {
                if let Some(callback) = entry.callbacks.on_error {
                    callback(payload);
                }
            }
            None => correlation_miss(&id, WorkerResponse::ERROR),
        },
    }
}

fn correlation_miss(id: &RequestId, kind: &str) {
    warn!(request_id = %id, kind, "No pending request found, event discarded");
}
