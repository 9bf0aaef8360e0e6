use pilot_lib::{TaskInput, TaskStatus};
use pretty_assertions::assert_eq;
use serde_json::json;

use crate::helper::*;
use crate::internal_prelude::*;

/// A task runs right after it has been added and ends up completed.
#[tokio::test]
async fn test_add_and_complete() -> Result<()> {
    let daemon = daemon().await?;
    let shared = &daemon.settings.shared;

    let input = TaskInput {
        label: Some("front page".into()),
        target_url: Some("https://example.org".into()),
        ..Default::default()
    };
    let task_id = add_task(shared, "succeed", input).await?;

    let task = wait_for_status(shared, &task_id, TaskStatus::Completed).await?;
    assert_eq!(
        task.result,
        Some(json!({"label": "front page", "url": "https://example.org"}))
    );
    assert_eq!(task.stage, "working");
    assert!(task.start_time.is_some());
    assert!(task.end_time.is_some());
    assert_eq!(task.next_screenshot, 1);

    // The task shows up in the list of all tasks.
    let state = get_state(shared).await?;
    assert!(state.tasks.contains_key(&task_id));

    Ok(())
}

/// Tasks of an unknown type are refused right away.
#[tokio::test]
async fn test_unknown_type_is_refused() -> Result<()> {
    let daemon = daemon().await?;
    let shared = &daemon.settings.shared;

    assert!(add_task(shared, "unknown", TaskInput::default()).await.is_err());
    assert!(get_state(shared).await?.tasks.is_empty());

    Ok(())
}

/// A failing automation fails its task and its browser is closed.
#[tokio::test]
async fn test_failure_closes_the_browser() -> Result<()> {
    let daemon = daemon().await?;
    let shared = &daemon.settings.shared;

    let task_id = add_task(shared, "fail", TaskInput::default()).await?;

    let task = wait_for_status(shared, &task_id, TaskStatus::Error).await?;
    assert_eq!(task.error.as_deref(), Some("The page exploded"));
    // The error screenshot has been taken before the browser has been closed.
    assert_eq!(task.next_screenshot, 1);
    let launcher = daemon.fakes.launcher.clone();
    wait_until("browser is closed", || launcher.browser(0).is_closed()).await?;

    Ok(())
}

/// Successive tasks share a single browser.
#[tokio::test]
async fn test_browser_is_reused() -> Result<()> {
    let daemon = daemon().await?;
    let shared = &daemon.settings.shared;

    let first = add_task(shared, "succeed", TaskInput::default()).await?;
    wait_for_status(shared, &first, TaskStatus::Completed).await?;
    let second = add_task(shared, "succeed", TaskInput::default()).await?;
    wait_for_status(shared, &second, TaskStatus::Completed).await?;

    assert_eq!(daemon.fakes.launcher.launch_count(), 1);

    Ok(())
}
