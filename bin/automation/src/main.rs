//! The automation daemon.
//!
//! Wires the execution engine to NATS: one dispatch loop consuming task
//! events, one scheduler loop driving the time-based sweeps.

mod config;
mod error;

use config::AutomationConfig;
use error::StartupError;
use std::sync::Arc;
use tidemark_scheduler::{NatsTaskQuery, Scheduler};
use tidemark_workflow::EventDispatcher;
use tidemark_workflow::engine::ExecutionEngine;
use tidemark_workflow::nats::{NatsActionExecutor, NatsAgentAdvisor, NatsEventSource};
use tidemark_workflow::store::{InMemoryExecutionStore, InMemoryWorkflowStore};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> tidemark_core::Result<(), StartupError> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration from environment
    let config = AutomationConfig::from_env().map_err(|e| StartupError::Config {
        details: e.to_string(),
    })?;
    tracing::info!("Loaded configuration");

    let nats_config = config.nats_config();
    let client = async_nats::connect(&nats_config.url)
        .await
        .map_err(|e| StartupError::NatsConnection {
            url: nats_config.url.clone(),
            details: e.to_string(),
        })?;
    tracing::info!(url = %nats_config.url, "Connected to NATS");

    let workflows = Arc::new(InMemoryWorkflowStore::new());
    let executions = Arc::new(InMemoryExecutionStore::new());
    let executor = Arc::new(NatsActionExecutor::new(client.clone(), &nats_config));
    let advisor = Arc::new(NatsAgentAdvisor::new(client.clone(), &nats_config));
    let engine = Arc::new(ExecutionEngine::new(
        workflows.clone(),
        executions.clone(),
        executor,
        advisor,
    ));

    // Event dispatch loop
    let source = NatsEventSource::subscribe(&client, &nats_config)
        .await
        .map_err(|e| StartupError::EventSubscription {
            details: e.to_string(),
        })?;
    let dispatcher = EventDispatcher::new(workflows.clone(), engine.clone());
    let dispatch_handle = tokio::spawn(async move {
        match dispatcher.run(source).await {
            Ok(()) => tracing::info!("event dispatch loop stopped: stream closed"),
            Err(e) => tracing::error!(error = %e, "event dispatch loop stopped"),
        }
    });

    // Scheduler loop (per-minute schedule sweep, daily due-date sweep)
    let mut tasks = NatsTaskQuery::new(client.clone());
    if let Some(subject) = &config.nats.task_query_subject {
        tasks = tasks.with_subject(subject.clone());
    }
    let scheduler = Scheduler::new(workflows, Arc::new(tasks), engine);
    let due_sweep_hour = config.scheduler.due_sweep_hour;
    let scheduler_handle = tokio::spawn(async move {
        scheduler.run(due_sweep_hour).await;
    });

    tracing::info!(due_sweep_hour, "automation daemon running");

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| StartupError::SignalHandler {
            details: e.to_string(),
        })?;
    tracing::info!("shutting down");

    dispatch_handle.abort();
    scheduler_handle.abort();
    Ok(())
}
