//! Lifecycle events and event handling.
//!
//! This module provides event emission for registration and invocation
//! lifecycle events, so diagnostics can observe a background task without
//! it having any user-facing surface.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::core::types::{RunId, TaskName};

/// Lifecycle events emitted by the scheduler and executor.
#[derive(Debug, Clone)]
pub enum Event {
    /// A schedule was created or replaced.
    TaskEnqueued {
        name: TaskName,
        next_fire_at: DateTime<Utc>,
        replaced: bool,
        timestamp: Instant,
    },

    /// An invocation has started.
    TaskStarted {
        name: TaskName,
        run_id: RunId,
        /// Failures already recorded this period.
        attempt: u32,
        timestamp: Instant,
    },

    /// An invocation succeeded.
    TaskSucceeded {
        name: TaskName,
        run_id: RunId,
        duration: Duration,
        timestamp: Instant,
    },

    /// An invocation failed inside the retry budget.
    TaskRetrying {
        name: TaskName,
        run_id: RunId,
        /// Failures recorded this period, including this one.
        attempt: u32,
        max_attempts: u32,
        delay: Duration,
        error: String,
        timestamp: Instant,
    },

    /// An invocation failed and the period's budget is spent.
    TaskFailed {
        name: TaskName,
        run_id: RunId,
        attempts: u32,
        error: String,
        timestamp: Instant,
    },

    /// A schedule was cancelled.
    TaskCancelled { name: TaskName, timestamp: Instant },
}

impl Event {
    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> Instant {
        match self {
            Event::TaskEnqueued { timestamp, .. } => *timestamp,
            Event::TaskStarted { timestamp, .. } => *timestamp,
            Event::TaskSucceeded { timestamp, .. } => *timestamp,
            Event::TaskRetrying { timestamp, .. } => *timestamp,
            Event::TaskFailed { timestamp, .. } => *timestamp,
            Event::TaskCancelled { timestamp, .. } => *timestamp,
        }
    }

    /// Name of the task the event is about.
    pub fn task_name(&self) -> &TaskName {
        match self {
            Event::TaskEnqueued { name, .. }
            | Event::TaskStarted { name, .. }
            | Event::TaskSucceeded { name, .. }
            | Event::TaskRetrying { name, .. }
            | Event::TaskFailed { name, .. }
            | Event::TaskCancelled { name, .. } => name,
        }
    }

    /// Create a TaskEnqueued event.
    pub fn task_enqueued(name: TaskName, next_fire_at: DateTime<Utc>, replaced: bool) -> Self {
        Event::TaskEnqueued {
            name,
            next_fire_at,
            replaced,
            timestamp: Instant::now(),
        }
    }

    /// Create a TaskStarted event.
    pub fn task_started(name: TaskName, run_id: RunId, attempt: u32) -> Self {
        Event::TaskStarted {
            name,
            run_id,
            attempt,
            timestamp: Instant::now(),
        }
    }

    /// Create a TaskSucceeded event.
    pub fn task_succeeded(name: TaskName, run_id: RunId, duration: Duration) -> Self {
        Event::TaskSucceeded {
            name,
            run_id,
            duration,
            timestamp: Instant::now(),
        }
    }

    /// Create a TaskRetrying event.
    pub fn task_retrying(
        name: TaskName,
        run_id: RunId,
        attempt: u32,
        max_attempts: u32,
        delay: Duration,
        error: String,
    ) -> Self {
        Event::TaskRetrying {
            name,
            run_id,
            attempt,
            max_attempts,
            delay,
            error,
            timestamp: Instant::now(),
        }
    }

    /// Create a TaskFailed event.
    pub fn task_failed(name: TaskName, run_id: RunId, attempts: u32, error: String) -> Self {
        Event::TaskFailed {
            name,
            run_id,
            attempts,
            error,
            timestamp: Instant::now(),
        }
    }

    /// Create a TaskCancelled event.
    pub fn task_cancelled(name: TaskName) -> Self {
        Event::TaskCancelled {
            name,
            timestamp: Instant::now(),
        }
    }
}

/// Handler for receiving lifecycle events.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle an event.
    async fn handle(&self, event: &Event);
}

/// Event bus for distributing events to registered handlers.
pub struct EventBus {
    handlers: RwLock<Vec<Arc<dyn EventHandler>>>,
}

impl EventBus {
    /// Create a new event bus with no handlers.
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
        }
    }

    /// Register an event handler.
    pub async fn register(&self, handler: Arc<dyn EventHandler>) {
        let mut handlers = self.handlers.write().await;
        handlers.push(handler);
    }

    /// Emit an event to all registered handlers.
    pub async fn emit(&self, event: Event) {
        let handlers = self.handlers.read().await;
        for handler in handlers.iter() {
            handler.handle(&event).await;
        }
    }

    /// Get the number of registered handlers.
    pub async fn handler_count(&self) -> usize {
        self.handlers.read().await.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
