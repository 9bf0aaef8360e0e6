//! Everything that drives tasks: spawning runners, stopping them and shutting down.
use std::collections::BTreeSet;

use pilot_lib::task::{parse_subtask_id, subtask_id};
use pilot_lib::Task;

use crate::daemon::context::Context;
use crate::daemon::internal_state::lock;
use crate::daemon::pool::terminate;
use crate::internal_prelude::*;

pub mod chain;
pub mod cleanup;
pub mod runner;

/// Hand a pending task to a new runner in the background.
///
/// Chained tasks are run by the chain orchestrator, starting at `start_index`.
pub fn spawn(ctx: &Context, task: &Task, start_index: usize) {
    let ctx = ctx.clone();
    let task_id = task.id.clone();
    let chained = task.is_chained();
    lock(&ctx.state).runners.insert(task_id.clone());

    tokio::spawn(async move {
        let result = if chained {
            chain::run_chain(&ctx, &task_id, start_index).await
        } else {
            runner::run(&ctx, &task_id).await
        };

        if let Err(error) = result {
            error!("Runner of task {task_id} failed:\n{error:?}");
        }
        lock(&ctx.state).runners.remove(&task_id);
    });
}

/// Stop a task that hasn't finished yet.
///
/// The browsers attributed to the task and its subtask runs are torn down first, then the
/// task is marked as stopped. Returns `false` if the task already reached a terminal status.
pub async fn stop_task(ctx: &Context, task_id: &str) -> Result<bool> {
    let Some(task) = ctx.store.get(task_id)? else {
        bail!("Task {task_id} doesn't exist");
    };
    if task.is_terminal() {
        return Ok(false);
    }

    let affected = lock(&ctx.state).request_stop(task_id);
    for (id, resource) in affected.iter() {
        info!("Closing browser {:?} of task {id}", resource.process_id);
        if let Some(process_id) = resource.process_id {
            ctx.pool.invalidate(process_id);
        }
        terminate(&resource.handle, resource.process_id).await;
    }

    ctx.store.update(task_id, Task::stop)?;

    // Subtask runs that didn't get a browser yet aren't in the registry.
    let mut runs: BTreeSet<String> = affected
        .into_iter()
        .map(|(id, _)| id)
        .filter(|id| id != task_id)
        .collect();
    if task.is_chained() {
        runs.insert(subtask_id(task_id, task.current_index));
    }
    for run_id in runs {
        if ctx.store.get(&run_id)?.is_some() {
            ctx.store.update(&run_id, Task::stop)?;
        }
    }

    ctx.store.evict(task_id);
    Ok(true)
}

/// Stop every task that currently holds a browser.
/// Returns the ids of the stopped tasks.
pub async fn kill_all(ctx: &Context) -> Result<Vec<String>> {
    let task_ids: BTreeSet<String> = lock(&ctx.state)
        .resources
        .keys()
        .map(|id| match parse_subtask_id(id) {
            Some((parent_id, _)) => parent_id.to_string(),
            None => id.clone(),
        })
        .collect();

    let mut stopped = Vec::new();
    for task_id in task_ids {
        if stop_task(ctx, &task_id).await? {
            stopped.push(task_id);
        }
    }

    Ok(stopped)
}

/// Stop all running tasks and close the pool.
///
/// No new runs are started once this has been called. Pending tasks stay pending and are
/// picked up by the next daemon.
pub async fn shutdown(ctx: &Context) {
    let running: Vec<String> = {
        let mut state = lock(&ctx.state);
        state.shutting_down = true;
        state
            .tasks
            .values()
            .filter(|task| task.is_running() && parse_subtask_id(&task.id).is_none())
            .map(|task| task.id.clone())
            .collect()
    };

    for task_id in running {
        info!("Stopping task {task_id} due to shutdown");
        if let Err(error) = stop_task(ctx, &task_id).await {
            warn!("Failed to stop task {task_id} during shutdown: {error:?}");
        }
    }

    ctx.pool.close().await;
}
