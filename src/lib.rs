//! tend - durable periodic background tasks.
//!
//! Register recurring tasks by name, let the scheduler start them inside
//! their flex window, and retry failures a bounded number of times per
//! period before moving on to the next one.

pub mod boot;
pub mod config;
pub mod core;
pub mod events;
pub mod execution;
pub mod scheduler;
pub mod storage;
pub mod testing;

pub use boot::{BootListener, RestartSignal};
pub use config::{ConfigError, StorageConfig, TaskConfig, TendConfig, YamlLoader};
pub use core::clock::{Clock, SystemClock};
pub use core::context::TaskContext;
pub use core::definition::{
    DefinitionError, ExistingPolicy, MIN_PERIODIC_INTERVAL, TaskDefinition,
};
pub use core::retry::{
    BackoffPolicy, MAX_ATTEMPTS, RetryController, RetryDecision, RetryPolicy, RetryState,
};
pub use core::run::{Outcome, TaskRun};
pub use core::task::{Task, TaskError};
pub use core::types::{RunId, TaskName};
pub use events::{Event, EventBus, EventHandler};
pub use execution::{CommandTask, CommandTaskBuilder, Executor, ExecutorError};
pub use scheduler::{
    EnqueueOutcome, Registrar, Scheduler, SchedulerError, SchedulerHandle, SchedulerState,
};
#[cfg(feature = "sqlite")]
pub use storage::SqliteStorage;
pub use storage::{EntryStatus, InMemoryStorage, Registry, RegistryEntry, StorageError};
