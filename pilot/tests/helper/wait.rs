//! The daemon runs tasks in the background, so their effects can't be checked right away.
//!
//! These helpers check in short intervals, whether a condition is met. That allows long waiting
//! times, while still keeping tests fast.
use pilot_lib::settings::Shared;
use pilot_lib::{Task, TaskStatus};

use super::{get_task, sleep_ms, TIMEOUT};
use crate::internal_prelude::*;

pub async fn wait_for_task_condition<F>(shared: &Shared, task_id: &str, condition: F) -> Result<Task>
where
    F: Fn(&Task) -> bool,
{
    let sleep = 20;
    let tries = TIMEOUT / sleep;
    for _ in 0..tries {
        let task = get_task(shared, task_id).await?;
        if condition(&task) {
            return Ok(task);
        }
        sleep_ms(sleep).await;
    }

    let task = get_task(shared, task_id).await?;
    bail!("Task {task_id} didn't fulfill condition after {TIMEOUT}ms. Last state: {task:?}")
}

pub async fn wait_for_status(shared: &Shared, task_id: &str, status: TaskStatus) -> Result<Task> {
    wait_for_task_condition(shared, task_id, |task| task.status == status)
        .await
        .wrap_err_with(|| format!("Waiting for status {status}"))
}

/// Wait for a condition that isn't visible through the daemon's socket, e.g. the state of a fake.
pub async fn wait_until<F>(description: &str, condition: F) -> Result<()>
where
    F: Fn() -> bool,
{
    let sleep = 20;
    let tries = TIMEOUT / sleep;
    for _ in 0..tries {
        if condition() {
            return Ok(());
        }
        sleep_ms(sleep).await;
    }

    Err(eyre!("Condition '{description}' wasn't met after {TIMEOUT}ms"))
}
