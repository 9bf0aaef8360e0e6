use pilot_lib::network::message::*;
use pilot_lib::{failure_msg, success_msg};

use crate::daemon::context::Context;
use crate::daemon::internal_state::lock;
use crate::internal_prelude::*;

/// Invoked when calling `pilot remove`.
/// Remove a finished task and its screenshots for good.
pub fn remove(ctx: &Context, task_id: &str) -> Response {
    let task = match ok_or_failure!(ctx.store.get(task_id), "read task") {
        Some(task) => task,
        None => return failure_msg!("Task {task_id} doesn't exist"),
    };
    if !task.is_terminal() {
        return failure_msg!(
            "Task {task_id} is {}. Only finished tasks can be removed",
            task.status
        );
    }

    if lock(&ctx.state).runners.contains(task_id) {
        return failure_msg!("Task {task_id} is still being wound down");
    }

    ok_or_failure!(ctx.store.delete(task_id), "remove task");
    info!("Removed task {task_id}");

    success_msg!("Task {task_id} has been removed")
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::*;
    use super::*;

    #[test]
    fn remove_finished_task() {
        let test = get_context();
        let task = stub_task(&test, TaskStatus::Completed);

        let response = remove(&test.ctx, &task.id);
        assert!(matches!(response, Response::Success(_)));
        assert_eq!(test.ctx.store.get(&task.id).unwrap(), None);
    }

    #[test]
    fn running_tasks_stay() {
        let test = get_context();
        let pending = stub_task(&test, TaskStatus::Pending);
        let running = stub_task(&test, TaskStatus::Running);

        for task in [pending, running] {
            let response = remove(&test.ctx, &task.id);
            assert!(matches!(response, Response::Failure(_)));
            assert!(test.ctx.store.get(&task.id).unwrap().is_some());
        }
    }

    #[test]
    fn unknown_task() {
        let test = get_context();
        let response = remove(&test.ctx, "does-not-exist");
        assert!(matches!(response, Response::Failure(_)));
    }
}
