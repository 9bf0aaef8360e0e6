use pilot_lib::network::message::*;
use pilot_lib::{failure_msg, Task};

use crate::daemon::context::Context;
use crate::daemon::internal_state::lock;
use crate::daemon::task_handler;
use crate::internal_prelude::*;

/// Invoked when calling `pilot add`.
/// Create a new task and hand it to a runner right away.
pub fn add_task(ctx: &Context, message: AddMessage) -> Response {
    let task = if message.subtasks.is_empty() {
        if ctx.automations.get(&message.kind).is_none() {
            return unknown_kind(ctx, &message.kind);
        }
        Task::new(&message.kind, message.input)
    } else {
        if let Some(subtask) = message
            .subtasks
            .iter()
            .find(|subtask| ctx.automations.get(&subtask.kind).is_none())
        {
            return unknown_kind(ctx, &subtask.kind);
        }
        Task::new_chain(message.input, message.subtasks)
    };

    if lock(&ctx.state).shutting_down {
        return failure_msg!("The daemon is shutting down");
    }

    ok_or_failure!(ctx.store.insert(task.clone()), "save new task");
    info!("Added task {} ({})", task.id, task.kind);
    task_handler::spawn(ctx, &task, 0);

    Response::AddedTask(task.id)
}

fn unknown_kind(ctx: &Context, kind: &str) -> Response {
    failure_msg!(
        "Unknown task type '{kind}'. Known types: {}",
        ctx.automations.kinds().join(", ")
    )
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::super::fixtures::*;
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn add_and_spawn() {
        let test = get_context();
        let message = AddMessage {
            kind: "hanging".into(),
            ..Default::default()
        };

        let Response::AddedTask(id) = add_task(&test.ctx, message) else {
            panic!("Expected the task to be added");
        };
        let task = test.ctx.store.get(&id).unwrap().unwrap();
        assert_eq!(task.kind, "hanging");
    }

    #[test]
    fn unknown_kinds_are_refused() {
        let test = get_context();
        let message = AddMessage {
            kind: "hanging".into(),
            subtasks: vec![
                Subtask::new("hanging", TaskInput::default()),
                Subtask::new("nope", TaskInput::default()),
            ],
            ..Default::default()
        };

        let response = add_task(&test.ctx, message);
        assert!(matches!(response, Response::Failure(text) if text.contains("'nope'")));
        assert!(test.ctx.store.list().unwrap().tasks.is_empty());
    }
}
