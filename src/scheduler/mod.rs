//! Scheduler for periodic tasks.
//!
//! This module provides registration of periodic schedules, the loop that
//! starts due invocations, and recovery from interruptions.

mod engine;
mod handle;
pub(crate) mod locks;
mod registrar;
mod types;

pub use engine::Scheduler;
pub use handle::SchedulerHandle;
pub use registrar::Registrar;
pub use types::{EnqueueOutcome, SchedulerError, SchedulerState};
