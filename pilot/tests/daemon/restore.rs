use std::sync::atomic::Ordering;

use pilot::daemon::persistence::{FileStore, Persistence};
use pilot_lib::network::message::Request;
use pilot_lib::{Subtask, Task, TaskInput, TaskStatus};
use pretty_assertions::assert_eq;

use crate::helper::*;
use crate::internal_prelude::*;

/// Tasks that were running when the previous daemon went away fail on the next start.
/// Pending tasks are picked up.
#[tokio::test]
async fn test_restore_previous_session() -> Result<()> {
    let (settings, tempdir) = daemon_base_setup()?;
    let store = FileStore::new(
        settings.shared.tasks_directory(),
        settings.shared.screenshots_directory(),
    )?;

    // A chain that got interrupted during its second subtask.
    let mut chain = Task::new_chain(
        TaskInput::default(),
        vec![
            Subtask::new("succeed", TaskInput::default()),
            Subtask::new("succeed", TaskInput::default()),
        ],
    );
    chain.start();
    chain.current_index = 1;
    chain.subtasks[0].status = TaskStatus::Completed;
    chain.subtasks[0].result = Some(serde_json::json!("first"));
    chain.subtasks[1].status = TaskStatus::Running;
    store.save_task(&chain)?;

    // A task that never got a runner.
    let pending = Task::new("succeed", TaskInput::default());
    store.save_task(&pending)?;

    let daemon = daemon_with_settings(settings, tempdir).await?;
    let shared = &daemon.settings.shared;

    let restored = get_task(shared, &chain.id).await?;
    assert_eq!(restored.status, TaskStatus::Error);
    assert_eq!(restored.current_index, 1);
    assert_eq!(restored.subtasks[0].status, TaskStatus::Completed);
    assert_eq!(restored.subtasks[1].status, TaskStatus::Error);

    wait_for_status(shared, &pending.id, TaskStatus::Completed).await?;

    // The interrupted chain continues at its second subtask.
    send_after_wind_down(shared, Request::Resume(chain.id.clone())).await?;
    let resumed = wait_for_status(shared, &chain.id, TaskStatus::Completed).await?;
    let results = resumed.result.unwrap();
    assert_eq!(results[0], serde_json::json!("first"));
    // Only the pending task and the second subtask have been run.
    assert_eq!(daemon.fakes.succeed.calls.load(Ordering::SeqCst), 2);

    Ok(())
}

/// Tasks survive a restart of the daemon.
#[tokio::test]
async fn test_tasks_are_persisted() -> Result<()> {
    let (settings, tempdir) = daemon_base_setup()?;
    let daemon = daemon_with_settings(settings, tempdir).await?;
    let shared = daemon.settings.shared.clone();

    let task_id = add_task(&shared, "succeed", TaskInput::default()).await?;
    let finished = wait_for_status(&shared, &task_id, TaskStatus::Completed).await?;

    assert_success(send_request(&shared, Request::Shutdown).await?);
    daemon.join_handle.await??;

    let daemon = daemon_with_settings(daemon.settings, daemon.tempdir).await?;
    let restored = get_task(&shared, &task_id).await?;
    assert_eq!(restored, finished);
    assert_eq!(daemon.fakes.succeed.calls.load(Ordering::SeqCst), 0);

    Ok(())
}
