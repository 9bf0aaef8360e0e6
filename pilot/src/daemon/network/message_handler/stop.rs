use pilot_lib::network::message::*;
use pilot_lib::{failure_msg, success_msg};

use crate::daemon::context::Context;
use crate::daemon::task_handler;

/// Invoked when calling `pilot stop`.
/// Close the task's browser and mark it as stopped.
pub async fn stop(ctx: &Context, task_id: &str) -> Response {
    match task_handler::stop_task(ctx, task_id).await {
        Ok(true) => success_msg!("Task {task_id} has been stopped"),
        Ok(false) => failure_msg!("Task {task_id} already finished"),
        Err(error) => failure_msg!("Failed to stop task {task_id}: {error:#}"),
    }
}

/// Invoked when calling `pilot kill-all`.
pub async fn kill_all(ctx: &Context) -> Response {
    let stopped = ok_or_failure!(task_handler::kill_all(ctx).await, "stop tasks");
    if stopped.is_empty() {
        return success_msg!("No task holds a browser");
    }

    success_msg!("Tasks have been stopped: {}", stopped.join(", "))
}
