//! Runs the subtasks of a chained task one after another.
//!
//! Each subtask is executed by the regular runner as a disposable task with the id
//! `{parent}_sub{index}`. Once it finished, its outcome is copied onto the parent's subtask
//! and the disposable task is deleted again.
use chrono::Local;
use pilot_lib::{Task, TaskStatus};
use serde_json::Value;
use tokio::time::sleep;

use super::runner;
use crate::daemon::context::Context;
use crate::internal_prelude::*;

/// What happened to a subtask, as seen from the parent.
struct SubtaskOutcome {
    status: TaskStatus,
    error: Option<String>,
    parent_running: bool,
}

/// Run the chain `parent_id`, starting with the subtask at `start_index`.
///
/// The chain is aborted on the first failing subtask. The parent only completes once every
/// subtask completed, its result is the list of all subtask results.
pub async fn run_chain(ctx: &Context, parent_id: &str, start_index: usize) -> Result<()> {
    let started = ctx.store.update(parent_id, |parent| {
        if !parent.is_pending() {
            return false;
        }
        parent.start();
        parent.current_index = start_index;
        true
    })?;
    if !started {
        debug!("Chain {parent_id} isn't pending anymore, not starting it");
        return Ok(());
    }

    let result = run_subtasks(ctx, parent_id, start_index).await;
    ctx.store.evict(parent_id);
    result
}

async fn run_subtasks(ctx: &Context, parent_id: &str, start_index: usize) -> Result<()> {
    let count = ctx
        .store
        .get(parent_id)?
        .map(|parent| parent.subtasks.len())
        .unwrap_or_default();
    let delay = ctx.settings.runner.chain_delay();

    for index in start_index..count {
        if index > start_index {
            sleep(delay).await;
        }

        let subtask = ctx.store.update(parent_id, |parent| {
            if !parent.is_running() {
                return None;
            }
            parent.current_index = index;
            parent.stage = format!("subtask {index}");
            let subtask = parent.subtasks.get_mut(index)?;
            subtask.reset();
            subtask.status = TaskStatus::Running;
            subtask.start_time = Some(Local::now());
            let subtask = subtask.clone();
            parent.log(format!("Starting subtask {index} ({})", subtask.kind));
            Some(subtask)
        })?;
        let Some(subtask) = subtask else {
            info!("Chain {parent_id} isn't running anymore. Halting before subtask {index}");
            return Ok(());
        };

        let run = Task::from_subtask(parent_id, index, &subtask);
        let run_id = run.id.clone();
        ctx.store.insert(run)?;
        if let Err(error) = runner::run(ctx, &run_id).await {
            warn!("Subtask {index} of chain {parent_id} failed:\n{error:?}");
        }

        let outcome = collect(ctx, parent_id, index, &run_id)?;
        ctx.store.delete(&run_id)?;

        if outcome.status == TaskStatus::Completed {
            continue;
        }
        if !outcome.parent_running {
            info!("Chain {parent_id} has been stopped during subtask {index}");
            return Ok(());
        }

        let message = outcome
            .error
            .unwrap_or_else(|| format!("finished with status {}", outcome.status));
        ctx.store.update(parent_id, |parent| {
            parent.fail(format!("Subtask {index} failed: {message}"))
        })?;
        return Ok(());
    }

    ctx.store.update(parent_id, |parent| {
        let results = parent
            .subtasks
            .iter()
            .map(|subtask| subtask.result.clone().unwrap_or(Value::Null))
            .collect();
        parent.complete(Value::Array(results))
    })?;

    Ok(())
}

/// Copy the outcome of a subtask run onto the parent's subtask.
/// The run's screenshots are moved to the parent, where they get new indices.
fn collect(ctx: &Context, parent_id: &str, index: usize, run_id: &str) -> Result<SubtaskOutcome> {
    let run = ctx.store.get(run_id)?;

    let mut screenshots = Vec::new();
    for screenshot in ctx.store.screenshots(run_id)? {
        let label = format!("subtask {index}: {}", screenshot.label);
        screenshots.push(ctx.store.add_screenshot(parent_id, &label, screenshot.image)?);
    }

    let outcome = ctx.store.update(parent_id, |parent| {
        let parent_running = parent.is_running();
        let Some(subtask) = parent.subtasks.get_mut(index) else {
            return SubtaskOutcome {
                status: TaskStatus::Error,
                error: Some(format!("Subtask {index} vanished")),
                parent_running,
            };
        };

        match run {
            Some(run) => {
                subtask.status = run.status;
                subtask.logs = run.logs;
                subtask.error = run.error;
                subtask.result = run.result;
                subtask.end_time = run.end_time;
            }
            None => {
                subtask.status = TaskStatus::Error;
                subtask.error = Some("The subtask run vanished".into());
            }
        }
        subtask.screenshots = screenshots;

        if !subtask.status.is_terminal() {
            subtask.status = if parent_running {
                TaskStatus::Error
            } else {
                TaskStatus::Stopped
            };
            subtask.end_time = Some(Local::now());
        }

        SubtaskOutcome {
            status: subtask.status,
            error: subtask.error.clone(),
            parent_running,
        }
    })?;

    Ok(outcome)
}
