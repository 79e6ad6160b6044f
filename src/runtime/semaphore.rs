use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AcquireError {
    #[error("semaphore closed")]
    Closed,
}

struct Waiter {
    ticket: u64,
    tx: oneshot::Sender<()>,
}

struct State {
    permits: usize,
    /// 当前被持有的许可数 (permits + held == max_permits)
    held: usize,
    waiters: VecDeque<Waiter>,
    next_ticket: u64,
    closed: bool,
}

/// 计数信号量
/// 限制同时运行的生成请求数量，等待者严格按照到达顺序 (FIFO) 被唤醒。
pub struct Semaphore {
    max_permits: usize,
    state: Mutex<State>,
}

impl Semaphore {
    pub fn new(max_permits: usize) -> Self {
        Self {
            max_permits,
            state: Mutex::new(State {
                permits: max_permits,
                held: 0,
                waiters: VecDeque::new(),
                next_ticket: 0,
                closed: false,
            }),
        }
    }

    /// Reserves a place immediately: either takes a free permit or joins the
    /// waiter queue right now. The returned future only waits for the hand-off,
    /// so FIFO order follows call order, not first-poll order.
    pub fn acquire(self: &Arc<Self>) -> Acquire {
        let mut state = self.state.lock();
        let next = if state.closed {
            AcquireState::Closed
        } else if state.permits > 0 {
            state.permits -= 1;
            state.held += 1;
            AcquireState::Ready
        } else {
            let (tx, rx) = oneshot::channel();
            let ticket = state.next_ticket;
            state.next_ticket += 1;
            state.waiters.push_back(Waiter { ticket, tx });
            AcquireState::Waiting { ticket, rx }
        };
        drop(state);

        Acquire {
            semaphore: self.clone(),
            state: next,
        }
    }

    /// Hands the permit to the oldest live waiter, or returns it to the pool.
    /// A release with nothing held is ignored so `permits` never exceeds the maximum.
    pub fn release(&self) {
        let mut state = self.state.lock();
        if state.held == 0 {
            warn!(max_permits = self.max_permits, "Semaphore released without a matching acquire, ignoring");
            return;
        }

        while let Some(waiter) = state.waiters.pop_front() {
            // Receiver gone means the waiter was dropped mid-wait; try the next one.
            if waiter.tx.send(()).is_ok() {
                return;
            }
        }

        state.held -= 1;
        state.permits += 1;
    }

    /// Wakes every waiter with `AcquireError::Closed` and refuses new acquisitions.
    /// Permits already held are still returned normally.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        state.waiters.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn available_permits(&self) -> usize {
        self.state.lock().permits
    }

    pub fn queue_length(&self) -> usize {
        self.state.lock().waiters.len()
    }

    pub fn max_permits(&self) -> usize {
        self.max_permits
    }

    fn remove_waiter(&self, ticket: u64) {
        self.state.lock().waiters.retain(|w| w.ticket != ticket);
    }
}

impl fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Semaphore")
            .field("max_permits", &self.max_permits)
            .field("permits", &state.permits)
            .field("held", &state.held)
            .field("waiters", &state.waiters.len())
            .field("closed", &state.closed)
            .finish()
    }
}

enum AcquireState {
    Ready,
    Waiting {
        ticket: u64,
        rx: oneshot::Receiver<()>,
    },
    Closed,
    Done,
}

/// `Semaphore::acquire` 返回的 Future
/// 在等待期间被丢弃时会退出等待队列；如果许可已经转交过来，则继续转交给下一个等待者。
pub struct Acquire {
    semaphore: Arc<Semaphore>,
    state: AcquireState,
}

impl Future for Acquire {
    type Output = Result<Permit, AcquireError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        match &mut this.state {
            AcquireState::Ready => {
                this.state = AcquireState::Done;
                Poll::Ready(Ok(Permit::new(this.semaphore.clone())))
            }
            AcquireState::Waiting { rx, .. } => match Pin::new(rx).poll(cx) {
                Poll::Pending => Poll::Pending,
                Poll::Ready(Ok(())) => {
                    this.state = AcquireState::Done;
                    Poll::Ready(Ok(Permit::new(this.semaphore.clone())))
                }
                Poll::Ready(Err(_)) => {
                    this.state = AcquireState::Done;
                    Poll::Ready(Err(AcquireError::Closed))
                }
            },
            AcquireState::Closed | AcquireState::Done => {
                this.state = AcquireState::Done;
                Poll::Ready(Err(AcquireError::Closed))
            }
        }
    }
}

impl Drop for Acquire {
    fn drop(&mut self) {
        match std::mem::replace(&mut self.state, AcquireState::Done) {
            AcquireState::Ready => self.semaphore.release(),
            AcquireState::Waiting { ticket, mut rx } => {
                self.semaphore.remove_waiter(ticket);
                rx.close();
                // A release may have handed us the permit before we left the queue.
                if rx.try_recv().is_ok() {
                    self.semaphore.release();
                }
            }
            AcquireState::Closed | AcquireState::Done => {}
        }
    }
}

impl fmt::Debug for Acquire {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.state {
            AcquireState::Ready => "ready",
            AcquireState::Waiting { .. } => "waiting",
            AcquireState::Closed => "closed",
            AcquireState::Done => "done",
        };
        f.debug_struct("Acquire").field("state", &state).finish()
    }
}

/// 持有中的许可，Drop 时自动归还 (finally 语义)
#[derive(Debug)]
pub struct Permit {
    semaphore: Option<Arc<Semaphore>>,
}

impl Permit {
    fn new(semaphore: Arc<Semaphore>) -> Self {
        Self {
            semaphore: Some(semaphore),
        }
    }

    /// Keeps the permit held without releasing it; pair with `Semaphore::release`.
    pub fn forget(mut self) {
        self.semaphore.take();
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        if let Some(semaphore) = self.semaphore.take() {
            semaphore.release();
        }
    }
}
