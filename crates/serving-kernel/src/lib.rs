mod driver;
mod error;
mod export_databases;
mod listing;
mod lock;
mod orchestrator;
mod reconciler;
mod retry;
mod saga;
mod scheduler;

pub use driver::{Driver, DriverError, FilterTopicDriver};
pub use error::{BatchDeleteOutcome, BatchStatus, DeleteOutcome, ServingError};
pub use lock::CoordinationLock;
pub use orchestrator::{Caller, Orchestrator, OrchestratorConfig};
pub use reconciler::{ReconcileReport, Reconciler};
pub use retry::{RetryPolicy, Sleeper, ThreadSleeper};
pub use saga::Saga;
pub use scheduler::{parse_schedule, ReconcileScheduler};
