use std::sync::atomic::Ordering;

use pilot_lib::network::message::{Request, Response};
use pilot_lib::{Subtask, TaskInput, TaskStatus};
use pretty_assertions::assert_eq;
use serde_json::json;

use crate::helper::*;
use crate::internal_prelude::*;

fn step(kind: &str, label: &str) -> Subtask {
    let input = TaskInput {
        label: Some(label.to_string()),
        ..Default::default()
    };
    Subtask::new(kind, input)
}

/// All subtasks of a chain run in order, the chain's result contains all of their results.
#[tokio::test]
async fn test_chain_completes() -> Result<()> {
    let daemon = daemon().await?;
    let shared = &daemon.settings.shared;

    let chain_id = add_chain(shared, vec![step("succeed", "one"), step("succeed", "two")]).await?;

    let chain = wait_for_status(shared, &chain_id, TaskStatus::Completed).await?;
    assert_eq!(
        chain.result,
        Some(json!([
            {"label": "one", "url": null},
            {"label": "two", "url": null},
        ]))
    );
    assert_eq!(chain.current_index, 1);
    for subtask in &chain.subtasks {
        assert_eq!(subtask.status, TaskStatus::Completed);
    }
    // The screenshots of the subtasks belong to the chain.
    assert_eq!(chain.subtasks[0].screenshots, vec![0]);
    assert_eq!(chain.subtasks[1].screenshots, vec![1]);

    // The disposable subtask runs never show up.
    assert_eq!(get_state(shared).await?.tasks.len(), 1);

    Ok(())
}

/// A chain stops at its first failing subtask.
#[tokio::test]
async fn test_chain_aborts_on_failure() -> Result<()> {
    let daemon = daemon().await?;
    let shared = &daemon.settings.shared;

    let subtasks = vec![
        step("succeed", "one"),
        step("fail", "two"),
        step("succeed", "three"),
    ];
    let chain_id = add_chain(shared, subtasks).await?;

    let chain = wait_for_status(shared, &chain_id, TaskStatus::Error).await?;
    assert_eq!(chain.current_index, 1);
    assert_eq!(
        chain.error.as_deref(),
        Some("Subtask 1 failed: The page exploded")
    );
    assert_eq!(chain.subtasks[1].status, TaskStatus::Error);
    assert_eq!(chain.subtasks[2].status, TaskStatus::Pending);
    assert_eq!(daemon.fakes.succeed.calls.load(Ordering::SeqCst), 1);

    Ok(())
}

/// Resuming a chain skips the subtasks that already completed.
#[tokio::test]
async fn test_resume_skips_completed_subtasks() -> Result<()> {
    let daemon = daemon().await?;
    let shared = &daemon.settings.shared;

    let chain_id = add_chain(shared, vec![step("succeed", "one"), step("fail", "two")]).await?;
    wait_for_status(shared, &chain_id, TaskStatus::Error).await?;

    let response = send_after_wind_down(shared, Request::Resume(chain_id.clone())).await?;
    assert_eq!(response, Response::AddedTask(chain_id.clone()));

    // Wait until the resumed run failed again.
    let chain = wait_for_task_condition(shared, &chain_id, |chain| {
        chain.status == TaskStatus::Error
            && chain.logs.iter().any(|line| line.message.starts_with("Resuming"))
    })
    .await?;
    assert_eq!(chain.subtasks[0].status, TaskStatus::Completed);
    assert_eq!(chain.current_index, 1);
    assert_eq!(daemon.fakes.succeed.calls.load(Ordering::SeqCst), 1);

    Ok(())
}

/// Restarting a finished chain runs every subtask again and leads to the same outcome.
#[tokio::test]
async fn test_restart_chain() -> Result<()> {
    let daemon = daemon().await?;
    let shared = &daemon.settings.shared;

    let chain_id = add_chain(shared, vec![step("succeed", "one"), step("succeed", "two")]).await?;
    let first = wait_for_status(shared, &chain_id, TaskStatus::Completed).await?;

    // Completed chains can't be resumed.
    let response = send_after_wind_down(shared, Request::Resume(chain_id.clone())).await?;
    assert_failure(response);

    let response = send_after_wind_down(shared, Request::Restart(chain_id.clone())).await?;
    assert_eq!(response, Response::AddedTask(chain_id.clone()));

    let second = wait_for_task_condition(shared, &chain_id, |chain| {
        chain.status == TaskStatus::Completed
            && chain.subtasks.iter().any(|subtask| subtask.screenshots == vec![2])
    })
    .await?;
    assert_eq!(first.result, second.result);
    assert_eq!(first.current_index, second.current_index);
    assert_eq!(daemon.fakes.succeed.calls.load(Ordering::SeqCst), 4);

    Ok(())
}
