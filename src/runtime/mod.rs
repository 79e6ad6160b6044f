pub mod semaphore;
pub mod request;
pub mod protocol;
pub mod scheduler;
pub mod worker;
pub mod manager;

pub use manager::{Callbacks, Manager, ManagerError};
pub use request::{Parameters, Request, RequestId, RequestStatus};
pub use scheduler::Scheduler;
pub use semaphore::{AcquireError, Permit, Semaphore};
