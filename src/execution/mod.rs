//! Task execution engine.
//!
//! This module provides the executor that runs one invocation of a periodic
//! task, and the external command task body.

mod command;
mod executor;

pub use command::{CommandTask, CommandTaskBuilder};
pub use executor::{Executor, ExecutorError};
