use pilot_lib::network::message::Request;
use pilot_lib::{TaskInput, TaskStatus};
use pretty_assertions::assert_eq;

use crate::helper::*;
use crate::internal_prelude::*;

/// Add a blocking task and wait until its automation runs.
async fn blocking_task(daemon: &PilotDaemon) -> Result<String> {
    let shared = &daemon.settings.shared;
    let task_id = add_task(shared, "block", TaskInput::default()).await?;
    wait_for_task_condition(shared, &task_id, |task| task.stage == "blocking").await?;

    Ok(task_id)
}

/// Stopping a running task closes its browser.
#[tokio::test]
async fn test_stop_running_task() -> Result<()> {
    let daemon = daemon().await?;
    let shared = &daemon.settings.shared;
    let task_id = blocking_task(&daemon).await?;

    assert_success(send_request(shared, Request::Stop(task_id.clone())).await?);

    let task = wait_for_status(shared, &task_id, TaskStatus::Stopped).await?;
    assert!(task.end_time.is_some());
    assert!(daemon.fakes.launcher.browser(0).is_closed());

    // Stopping it again isn't possible.
    assert_failure(send_request(shared, Request::Stop(task_id)).await?);

    Ok(())
}

/// Kill-all stops every task that holds a browser.
#[tokio::test]
async fn test_kill_all() -> Result<()> {
    let daemon = daemon().await?;
    let shared = &daemon.settings.shared;
    let task_id = blocking_task(&daemon).await?;

    assert_success(send_request(shared, Request::KillAll).await?);

    wait_for_status(shared, &task_id, TaskStatus::Stopped).await?;
    assert!(daemon.fakes.launcher.browser(0).is_closed());

    // The next task gets a new browser.
    let next = add_task(shared, "succeed", TaskInput::default()).await?;
    wait_for_status(shared, &next, TaskStatus::Completed).await?;
    assert_eq!(daemon.fakes.launcher.launch_count(), 2);

    Ok(())
}

/// Only finished tasks can be removed.
#[tokio::test]
async fn test_remove() -> Result<()> {
    let daemon = daemon().await?;
    let shared = &daemon.settings.shared;
    let task_id = blocking_task(&daemon).await?;

    assert_failure(send_request(shared, Request::Delete(task_id.clone())).await?);

    assert_success(send_request(shared, Request::Stop(task_id.clone())).await?);
    let response = send_after_wind_down(shared, Request::Delete(task_id.clone())).await?;
    assert_success(response);

    assert_failure(send_request(shared, Request::Get(task_id)).await?);
    assert!(get_state(shared).await?.tasks.is_empty());

    Ok(())
}
