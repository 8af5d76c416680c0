//! Core domain types: task definitions, retry policy, task bodies and runs.

pub mod clock;
pub mod context;
pub mod definition;
pub mod retry;
pub mod run;
pub mod task;
pub mod types;
