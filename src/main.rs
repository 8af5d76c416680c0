//! tend - durable periodic background tasks.
//!
//! Usage:
//!   tend run <config>              Run the scheduler
//!   tend validate <config>         Validate the configuration without running
//!   tend list <config>             Show configured tasks and their registry state
//!   tend boot <config> [signal]    Re-register tasks after a restart signal
//!   tend register <config> [task]  Apply the configured registration policy
//!   tend trigger <config> <task>   Run one task now and wait for the outcome
//!   tend cancel <config> <task>    Cancel a task's schedule

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tend::{
    BootListener, Event, EventBus, EventHandler, ExistingPolicy, InMemoryStorage, Outcome,
    Registry, RestartSignal, Scheduler, StorageConfig, TaskName, TendConfig, YamlLoader,
};
use tracing::{error, info, warn};

/// tend - durable periodic background tasks
#[derive(Parser)]
#[command(name = "tend")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler
    Run {
        /// Path to the configuration file
        #[arg(value_name = "CONFIG")]
        config: PathBuf,
    },

    /// Validate the configuration without running
    Validate {
        /// Path to the configuration file
        #[arg(value_name = "CONFIG")]
        config: PathBuf,
    },

    /// Show configured tasks and their registry state
    List {
        /// Path to the configuration file
        #[arg(value_name = "CONFIG")]
        config: PathBuf,

        /// Number of recent runs to show per task
        #[arg(short = 'r', long, default_value = "0")]
        runs: usize,
    },

    /// Re-register configured tasks after a restart signal
    Boot {
        /// Path to the configuration file
        #[arg(value_name = "CONFIG")]
        config: PathBuf,

        /// Signal name (boot_completed, process_started)
        #[arg(value_name = "SIGNAL", default_value = "boot_completed")]
        signal: String,
    },

    /// Register tasks with their configured policy (replace updates a schedule)
    Register {
        /// Path to the configuration file
        #[arg(value_name = "CONFIG")]
        config: PathBuf,

        /// Only register this task
        #[arg(value_name = "TASK")]
        task: Option<String>,
    },

    /// Run one task now and wait for the outcome
    Trigger {
        /// Path to the configuration file
        #[arg(value_name = "CONFIG")]
        config: PathBuf,

        /// Task name
        #[arg(value_name = "TASK")]
        task: String,
    },

    /// Cancel a task's schedule
    Cancel {
        /// Path to the configuration file
        #[arg(value_name = "CONFIG")]
        config: PathBuf,

        /// Task name
        #[arg(value_name = "TASK")]
        task: String,
    },
}

/// Event handler that logs task lifecycle events.
struct LoggingHandler;

#[async_trait::async_trait]
impl EventHandler for LoggingHandler {
    async fn handle(&self, event: &Event) {
        match event {
            Event::TaskEnqueued {
                name,
                next_fire_at,
                replaced,
                ..
            } => {
                let verb = if *replaced { "replaced" } else { "scheduled" };
                info!("Task '{}' {} (next fire: {})", name, verb, next_fire_at);
            }
            Event::TaskStarted {
                name,
                run_id,
                attempt,
                ..
            } => {
                info!("Task '{}' started (run: {}, attempt: {})", name, run_id, attempt);
            }
            Event::TaskSucceeded { name, duration, .. } => {
                info!("Task '{}' succeeded in {:?}", name, duration);
            }
            Event::TaskRetrying {
                name,
                attempt,
                max_attempts,
                delay,
                error,
                ..
            } => {
                warn!(
                    "Task '{}' failed (attempt {}/{}), retrying in {:?}: {}",
                    name, attempt, max_attempts, delay, error
                );
            }
            Event::TaskFailed {
                name,
                attempts,
                error,
                ..
            } => {
                error!(
                    "Task '{}' failed after {} attempt(s), waiting for next period: {}",
                    name, attempts, error
                );
            }
            Event::TaskCancelled { name, .. } => {
                info!("Task '{}' cancelled", name);
            }
        }
    }
}

/// Subcommands that need an open registry.
enum Action {
    Run,
    List { runs: usize },
    Boot { signal: RestartSignal },
    Register { task: Option<String> },
    Trigger { task: String },
    Cancel { task: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    let (config_path, action) = match cli.command {
        Commands::Validate { config } => return validate_config(config),
        Commands::Run { config } => (config, Action::Run),
        Commands::List { config, runs } => (config, Action::List { runs }),
        Commands::Boot { config, signal } => (
            config,
            Action::Boot {
                signal: RestartSignal::parse(&signal),
            },
        ),
        Commands::Register { config, task } => (config, Action::Register { task }),
        Commands::Trigger { config, task } => (config, Action::Trigger { task }),
        Commands::Cancel { config, task } => (config, Action::Cancel { task }),
    };

    let config = YamlLoader::load_config(&config_path)?;

    match config.storage.clone() {
        StorageConfig::Memory => execute(InMemoryStorage::new(), config, action).await,
        #[cfg(feature = "sqlite")]
        StorageConfig::Sqlite { path } => {
            let storage = tend::SqliteStorage::new(path).await?;
            execute(storage, config, action).await
        }
        #[cfg(not(feature = "sqlite"))]
        StorageConfig::Sqlite { .. } => {
            Err("sqlite storage requires the 'sqlite' feature".into())
        }
    }
}

/// Build a scheduler over the given registry and run the action.
async fn execute<S: Registry + 'static>(
    storage: S,
    config: TendConfig,
    action: Action,
) -> Result<(), Box<dyn std::error::Error>> {
    let event_bus = EventBus::new();
    event_bus.register(Arc::new(LoggingHandler)).await;

    let mut scheduler = Scheduler::new(storage)
        .with_event_bus(event_bus)
        .with_retry_policy(config.retry_policy())
        .with_tick_interval(config.tick_interval)
        .with_shutdown_timeout(config.shutdown_timeout);

    for task in config.build_tasks() {
        scheduler.register(task);
    }

    match action {
        Action::Run => run_scheduler(scheduler, &config).await,
        Action::List { runs } => list_tasks(&scheduler, &config, runs).await,
        Action::Boot { signal } => {
            let listener =
                BootListener::new(scheduler.registrar().clone(), config.definitions());
            let applied = listener.handle(&signal).await?;
            if applied.is_empty() {
                info!("Signal '{}' is not a restart signal, nothing to do", signal);
            }
            for (name, outcome) in applied {
                println!("{}: {:?}", name, outcome);
            }
            Ok(())
        }
        Action::Register { task } => register_tasks(&scheduler, &config, task).await,
        Action::Trigger { task } => trigger_task(scheduler, &config, task).await,
        Action::Cancel { task } => {
            let name = TaskName::new(task);
            if scheduler.registrar().cancel(&name).await? {
                println!("Cancelled '{}'", name);
            } else {
                println!("'{}' was already cancelled", name);
            }
            Ok(())
        }
    }
}

/// Restore the configured schedules and run until Ctrl+C.
///
/// Surviving entries keep their schedule and retry progress; use
/// `register` to apply a configured `replace` policy.
async fn run_scheduler<S: Registry + 'static>(
    scheduler: Scheduler<S>,
    config: &TendConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let recovered = scheduler.recover().await?;
    if !recovered.is_empty() {
        warn!(
            "Recovered {} interrupted task(s): {}",
            recovered.len(),
            recovered
                .iter()
                .map(TaskName::as_str)
                .collect::<Vec<_>>()
                .join(", ")
        );
    }

    let listener = BootListener::new(scheduler.registrar().clone(), config.definitions());
    let applied = listener.handle(&RestartSignal::ProcessStarted).await?;
    info!("Restored {} task(s):", applied.len());
    for (name, outcome) in &applied {
        let body = match config.task(name.as_str()) {
            Some(task) if task.command.is_some() => "command",
            _ => "unbound",
        };
        info!("  - {} ({}): {:?}", name, body, outcome);
    }

    info!(
        "Starting scheduler (tick interval: {:?})...",
        config.tick_interval
    );
    info!("Press Ctrl+C to stop");

    let (handle, scheduler_task) = scheduler.start().await;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down...");
            handle.shutdown().await?;
        }
        _ = scheduler_task => {
            info!("Scheduler stopped");
        }
    }

    info!("Goodbye!");
    Ok(())
}

/// Apply each task's configured policy to the registry.
async fn register_tasks<S: Registry + 'static>(
    scheduler: &Scheduler<S>,
    config: &TendConfig,
    only: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let selected: Vec<_> = match &only {
        Some(name) => match config.task(name) {
            Some(task) => vec![task],
            None => return Err(format!("Task '{}' not found", name).into()),
        },
        None => config.tasks.iter().collect(),
    };

    for task in selected {
        let outcome = scheduler
            .enqueue_periodic(&task.definition(), task.policy)
            .await?;
        println!(
            "{} (every {}, flex {}): {:?}",
            task.name,
            tend::config::format_duration(task.interval),
            tend::config::format_duration(task.flex),
            outcome
        );
    }

    Ok(())
}

/// Validate the configuration without running.
fn validate_config(path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    info!("Validating configuration: {}", path.display());

    match YamlLoader::load_config(&path) {
        Ok(config) => {
            info!("All {} task(s) are valid:", config.tasks.len());
            for task in &config.tasks {
                info!("  - {}: OK", task.name);
            }
            Ok(())
        }
        Err(e) => {
            error!("Validation failed: {}", e);
            Err(e.into())
        }
    }
}

/// Print configured tasks with their registry state.
async fn list_tasks<S: Registry + 'static>(
    scheduler: &Scheduler<S>,
    config: &TendConfig,
    runs: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let registrar = scheduler.registrar();

    for task in &config.tasks {
        let name = TaskName::new(task.name.as_str());
        println!("Task: {}", name);
        println!(
            "  Interval: {} (flex {})",
            tend::config::format_duration(task.interval),
            tend::config::format_duration(task.flex)
        );
        match &task.command {
            Some(command) => println!("  Command: {} {}", command.program, command.args.join(" ")),
            None => println!("  Command: none (bound in code)"),
        }

        match registrar.entry(&name).await? {
            Some(entry) => {
                println!("  Status: {}", entry.status.as_str());
                println!(
                    "  Retry: {} (attempts: {})",
                    entry.retry_state.as_str(),
                    entry.attempt_count
                );
                println!("  Next fire: {}", entry.next_fire_at);
                if let Some(outcome) = entry.last_outcome {
                    println!("  Last outcome: {}", outcome.as_str());
                }
                if let Some(at) = entry.last_success_at {
                    println!("  Last success: {}", at);
                }
            }
            None => println!("  Status: not registered"),
        }

        if runs > 0 {
            for run in registrar.history(&name, runs).await? {
                let detail = run.error.as_deref().unwrap_or("");
                println!(
                    "    {} {} attempt={} {}",
                    run.finished_at,
                    run.outcome.as_str(),
                    run.attempt,
                    detail
                );
            }
        }

        println!();
    }

    Ok(())
}

/// Run a single task now and report its outcome.
async fn trigger_task<S: Registry + 'static>(
    scheduler: Scheduler<S>,
    config: &TendConfig,
    task: String,
) -> Result<(), Box<dyn std::error::Error>> {
    let Some(task_config) = config.task(&task) else {
        error!("Task '{}' not found", task);
        error!(
            "Available tasks: {}",
            config
                .tasks
                .iter()
                .map(|t| t.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
        return Err(format!("Task '{}' not found", task).into());
    };

    scheduler
        .enqueue_periodic(&task_config.definition(), ExistingPolicy::KeepExisting)
        .await?;

    let (handle, _scheduler_task) = scheduler.start().await;

    info!("Triggering task '{}'...", task);
    let result = handle.trigger(task.as_str()).await;
    handle.shutdown().await?;

    let run = result?;
    match run.outcome {
        Outcome::Success => {
            info!("Task '{}' succeeded (run: {})", task, run.id);
            Ok(())
        }
        outcome => Err(format!(
            "Task '{}' finished with {}: {}",
            task,
            outcome.as_str(),
            run.error.unwrap_or_default()
        )
        .into()),
    }
}
