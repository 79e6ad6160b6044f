use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinSet};
use tracing::{debug, error, info, warn};
use crate::fragment::Fragment;
use crate::generator::{CodeGenerator, GenerationError};
use crate::runtime::protocol::{ErrorPayload, ProgressInfo, WorkerResponse};
use crate::runtime::request::{Parameters, Request, RequestId, RequestStatus};
use crate::runtime::semaphore::{Acquire, Semaphore};

struct PendingEntry {
    request: Request,
    /// Distinguishes a resubmitted id from an older in-flight call with the same id.
    ticket: u64,
    abort: Option<AbortHandle>,
}

struct Inner {
    semaphore: Arc<Semaphore>,
    pending: DashMap<RequestId, PendingEntry>,
    generator: Arc<dyn CodeGenerator>,
    events: mpsc::Sender<WorkerResponse>,
    tasks: Mutex<JoinSet<()>>,
    next_ticket: AtomicU64,
}

/// 请求调度器
/// 独占信号量和待处理请求表；准入、派发生成请求并发出 PROGRESS/RESULT/ERROR 事件。
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

/// Removes the bookkeeping entry on every exit path of a dispatch, panics included.
struct Tracked<'a> {
    pending: &'a DashMap<RequestId, PendingEntry>,
    id: &'a RequestId,
    ticket: u64,
}

impl Drop for Tracked<'_> {
    fn drop(&mut self) {
        self.pending.remove_if(self.id, |_, entry| entry.ticket == self.ticket);
    }
}

struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(message) => *message,
        Err(payload) => payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .unwrap_or_else(|| "unknown panic".to_string()),
    }
}

impl Scheduler {
    /// A `max_permits` of 0 would never admit anything; it is raised to 1.
    pub fn new(max_permits: usize, generator: Arc<dyn CodeGenerator>, events: mpsc::Sender<WorkerResponse>) -> Self {
        let max_permits = if max_permits == 0 {
            warn!("max_permits of 0 admits no request, using 1");
            1
        } else {
            max_permits
        };

        Self {
            inner: Arc::new(Inner {
                semaphore: Arc::new(Semaphore::new(max_permits)),
                pending: DashMap::new(),
                generator,
                events,
                tasks: Mutex::new(JoinSet::new()),
                next_ticket: AtomicU64::new(0),
            }),
        }
    }

    /// Queues `request` as `Pending` and starts its dispatch.
    /// Returns `false` if the id is already pending or the scheduler is shut down.
    pub fn submit(&self, mut request: Request) -> bool {
        if self.inner.semaphore.is_closed() {
            warn!(request_id = %request.id, "Scheduler is shut down, request dropped");
            return false;
        }

        let id = request.id.clone();
        let ticket = self.inner.next_ticket.fetch_add(1, Ordering::Relaxed);
        request.status = RequestStatus::Pending;

        match self.inner.pending.entry(id.clone()) {
            Entry::Occupied(_) => {
                warn!(request_id = %id, "Duplicate request id, ignoring submission");
                return false;
            }
            Entry::Vacant(slot) => {
                slot.insert(PendingEntry { request, ticket, abort: None });
            }
        }

        // The FIFO slot is taken now, in submission order, not when the task first runs.
        let acquire = self.inner.semaphore.acquire();
        let inner = self.inner.clone();
        let abort = {
            let mut tasks = self.inner.tasks.lock();
            while tasks.try_join_next().is_some() {}
            tasks.spawn(inner.dispatch(id.clone(), ticket, acquire))
        };

        if let Some(mut entry) = self.inner.pending.get_mut(&id) {
            if entry.ticket == ticket {
                entry.abort = Some(abort);
            }
        }

        debug!(request_id = %id, queued = self.inner.semaphore.queue_length(), "Request submitted");
        true
    }

    /// Pending requests are withdrawn and never produce an event. In-flight requests
    /// only lose their bookkeeping: the call finishes and its outcome is dropped.
    pub fn cancel(&self, id: &RequestId) -> bool {
        let Some((_, entry)) = self.inner.pending.remove(id) else {
            debug!(request_id = %id, "Cancel for unknown request");
            return false;
        };

        match entry.request.status {
            RequestStatus::Pending => {
                if let Some(abort) = entry.abort {
                    abort.abort();
                }
                info!(request_id = %id, status = ?RequestStatus::Cancelled, "Pending request cancelled");
            }
            status => {
                info!(request_id = %id, ?status, "Request already dispatched; its result will be dropped");
            }
        }
        true
    }

    pub fn status(&self, id: &RequestId) -> Option<RequestStatus> {
        self.inner.pending.get(id).map(|e| e.request.status)
    }

    pub fn requests(&self) -> Vec<Request> {
        self.inner.pending.iter().map(|e| e.request.clone()).collect()
    }

    pub fn pending_len(&self) -> usize {
        self.inner.pending.len()
    }

    pub fn in_flight_len(&self) -> usize {
        self.inner
            .pending
            .iter()
            .filter(|e| e.request.status == RequestStatus::InFlight)
            .count()
    }

    pub fn available_permits(&self) -> usize {
        self.inner.semaphore.available_permits()
    }

    pub fn queue_length(&self) -> usize {
        self.inner.semaphore.queue_length()
    }

    /// Closes the semaphore, aborts every dispatch and forgets all pending requests.
    pub fn shutdown(&self) {
        self.inner.semaphore.close();
        self.inner.tasks.lock().abort_all();
        let dropped = self.inner.pending.len();
        self.inner.pending.clear();
        info!(dropped, "Scheduler shut down");
    }
}

impl Inner {
    async fn dispatch(self: Arc<Self>, id: RequestId, ticket: u64, acquire: Acquire) {
        // 1. Wait for a permit
        let _permit = match acquire.await {
            Ok(permit) => permit,
            Err(e) => {
                debug!(request_id = %id, error = %e, "Dispatch abandoned");
                self.pending.remove_if(&id, |_, entry| entry.ticket == ticket);
                return;
            }
        };
        // dropped before `_permit`: bookkeeping goes first, then the permit is released
        let _tracked = Tracked { pending: &self.pending, id: &id, ticket };

        // 2. Mark in flight, unless cancelled while waiting
        let claimed = match self.pending.get_mut(&id) {
            Some(mut entry) if entry.ticket == ticket => {
                entry.request.status = RequestStatus::InFlight;
                Some((entry.request.target_node_id.clone(), entry.request.parameters.clone()))
            }
            _ => None,
        };
        let Some((target_node_id, parameters)) = claimed else {
            debug!(request_id = %id, "Request cancelled before dispatch");
            return;
        };

        info!(request_id = %id, target_node_id = %target_node_id, generator = self.generator.name(), "Dispatching generation request");
        if self.is_tracked(&id, ticket) {
            self.emit(WorkerResponse::progress(id.clone(), ProgressInfo::processing())).await;
        }

        // 3. Call the generation service
        let (status, response) = match self.call_generator(&id, &target_node_id, parameters).await {
            Ok(fragment) => (RequestStatus::Completed, WorkerResponse::result(id.clone(), fragment)),
            Err(e) => {
                warn!(request_id = %id, error = %e, "Generation failed");
                (RequestStatus::Failed, WorkerResponse::error(id.clone(), ErrorPayload::from(&e)))
            }
        };

        // 4. Report, unless the request was cancelled while in flight
        if self.mark(&id, ticket, status) {
            self.emit(response).await;
        } else {
            debug!(request_id = %id, ?status, "No bookkeeping left, dropping outcome");
        }
    }

    /// Runs the call in its own task so a panicking generator surfaces as an error
    /// instead of unwinding through the dispatch.
    async fn call_generator(&self, id: &RequestId, target_node_id: &str, parameters: Parameters) -> Result<Fragment, GenerationError> {
        let generator = self.generator.clone();
        let target = target_node_id.to_string();
        let call = tokio::spawn(async move { generator.generate(&target, &parameters).await });
        // the call dies with the dispatch on abort
        let _abort = AbortOnDrop(call.abort_handle());

        match call.await {
            Ok(outcome) => outcome,
            Err(e) if e.is_panic() => {
                let message = panic_message(e.into_panic());
                error!(request_id = %id, panic = %message, "Generator panicked");
                Err(GenerationError::Internal(message))
            }
            Err(e) => Err(GenerationError::Internal(e.to_string())),
        }
    }

    fn is_tracked(&self, id: &RequestId, ticket: u64) -> bool {
        self.pending.get(id).is_some_and(|e| e.ticket == ticket)
    }

    fn mark(&self, id: &RequestId, ticket: u64, status: RequestStatus) -> bool {
        match self.pending.get_mut(id) {
            Some(mut entry) if entry.ticket == ticket => {
                entry.request.status = status;
                true
            }
            _ => false,
        }
    }

    async fn emit(&self, response: WorkerResponse) {
        let kind = response.kind();
        let request_id = response.request_id.clone();
        if self.events.send(response).await.is_err() {
            debug!(request_id = %request_id, kind, "Event channel closed");
        }
    }
}
