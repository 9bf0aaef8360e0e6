use pilot_lib::network::message::*;
use pilot_lib::{failure_msg, Task, TaskStatus};

use crate::daemon::context::Context;
use crate::daemon::internal_state::lock;
use crate::daemon::task_handler;
use crate::internal_prelude::*;

/// Check whether a task may be run again. Returns the task if it may.
fn restartable(ctx: &Context, task_id: &str) -> Result<Task, Response> {
    let task = match super::or_failure(ctx.store.get(task_id), "read task")? {
        Some(task) => task,
        None => return Err(failure_msg!("Task {task_id} doesn't exist")),
    };
    if !task.is_terminal() {
        return Err(failure_msg!(
            "Task {task_id} is {}. Only finished tasks can be run again",
            task.status
        ));
    }
    if lock(&ctx.state).runners.contains(task_id) {
        return Err(failure_msg!("Task {task_id} is still being wound down"));
    }

    Ok(task)
}

/// Invoked when calling `pilot restart`.
/// Reset a finished task and run it again from the start, under the same id.
pub fn restart(ctx: &Context, task_id: &str) -> Response {
    if let Err(response) = restartable(ctx, task_id) {
        return response;
    }

    let task = ok_or_failure!(
        ctx.store.update(task_id, |task| {
            task.reset();
            task.log("Task restarted");
            task.clone()
        }),
        "reset task"
    );
    info!("Restarting task {task_id}");
    task_handler::spawn(ctx, &task, 0);

    Response::AddedTask(task.id)
}

/// Invoked when calling `pilot resume`.
/// Run a failed or stopped chain again, starting with the subtask it stopped at.
/// Subtasks that already completed aren't run again.
pub fn resume(ctx: &Context, task_id: &str) -> Response {
    let task = match restartable(ctx, task_id) {
        Ok(task) => task,
        Err(response) => return response,
    };
    if !task.is_chained() {
        return failure_msg!("Task {task_id} isn't a chain. Use restart instead");
    }
    if !matches!(task.status, TaskStatus::Error | TaskStatus::Stopped) {
        return failure_msg!("Only failed or stopped chains can be resumed");
    }

    let task = ok_or_failure!(
        ctx.store.update(task_id, |task| {
            for subtask in task.subtasks.iter_mut().skip(task.current_index) {
                subtask.reset();
            }
            task.status = TaskStatus::Pending;
            task.end_time = None;
            task.error = None;
            task.result = None;
            task.log(format!("Resuming at subtask {}", task.current_index));
            task.clone()
        }),
        "resume task"
    );
    info!("Resuming chain {task_id} at subtask {}", task.current_index);
    task_handler::spawn(ctx, &task, task.current_index);

    Response::AddedTask(task.id)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::super::fixtures::*;
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn restart_resets_the_task() {
        let test = get_context();
        let mut task = stub_task(&test, TaskStatus::Pending);
        task.start();
        task.fail("broken");
        test.ctx.store.insert(task.clone()).unwrap();

        let response = restart(&test.ctx, &task.id);
        assert_eq!(response, Response::AddedTask(task.id.clone()));

        let task = test.ctx.store.get(&task.id).unwrap().unwrap();
        assert_eq!(task.error, None);
        assert!(!task.is_terminal());
    }

    #[test]
    fn unfinished_tasks_cant_be_restarted() {
        let test = get_context();
        let task = stub_task(&test, TaskStatus::Running);

        let response = restart(&test.ctx, &task.id);
        assert!(matches!(response, Response::Failure(_)));
    }

    #[test]
    fn only_chains_can_be_resumed() {
        let test = get_context();
        let task = stub_task(&test, TaskStatus::Error);

        let response = resume(&test.ctx, &task.id);
        assert!(matches!(response, Response::Failure(text) if text.contains("isn't a chain")));
    }

    #[tokio::test(start_paused = true)]
    async fn resume_keeps_finished_subtasks() {
        let test = get_context();
        let mut chain = Task::new_chain(
            TaskInput::default(),
            vec![
                Subtask::new("hanging", TaskInput::default()),
                Subtask::new("hanging", TaskInput::default()),
            ],
        );
        chain.status = TaskStatus::Error;
        chain.current_index = 1;
        chain.subtasks[0].status = TaskStatus::Completed;
        chain.subtasks[1].status = TaskStatus::Error;
        test.ctx.store.insert(chain.clone()).unwrap();

        let response = resume(&test.ctx, &chain.id);
        assert_eq!(response, Response::AddedTask(chain.id.clone()));

        let chain = test.ctx.store.get(&chain.id).unwrap().unwrap();
        assert_eq!(chain.subtasks[0].status, TaskStatus::Completed);
        assert_eq!(chain.subtasks[1].status, TaskStatus::Pending);
        assert_eq!(chain.current_index, 1);
    }
}
