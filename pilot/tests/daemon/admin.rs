use assert_matches::assert_matches;
use pilot::daemon::persistence::{FileStore, Persistence};
use pilot_lib::network::message::{Request, Response};
use pilot_lib::route::TunnelEndpoint;
use pilot_lib::{RouteTable, TaskInput, TaskStatus};
use pretty_assertions::assert_eq;

use crate::helper::*;
use crate::internal_prelude::*;

/// The proxy's routes can be read and replaced at runtime.
#[tokio::test]
async fn test_update_routes() -> Result<()> {
    let daemon = daemon().await?;
    let shared = &daemon.settings.shared;

    let response = send_request(shared, Request::GetRoutes).await?;
    assert_eq!(response, Response::Routes(RouteTable::default()));

    let table = RouteTable {
        enabled: true,
        tunnel: Some(TunnelEndpoint {
            host: "10.0.0.1".into(),
            port: 3128,
        }),
        domains: vec!["internal.example".into()],
    };
    assert_success(send_request(shared, Request::UpdateRoutes(table.clone())).await?);

    let response = send_request(shared, Request::GetRoutes).await?;
    assert_eq!(response, Response::Routes(table));

    Ok(())
}

/// The pool reports its browser and the tasks that used it.
#[tokio::test]
async fn test_pool_status() -> Result<()> {
    let daemon = daemon().await?;
    let shared = &daemon.settings.shared;

    let status = assert_matches!(
        send_request(shared, Request::PoolStatus).await?,
        Response::Pool(status) => status
    );
    assert!(!status.has_instance);

    let task_id = add_task(shared, "succeed", TaskInput::default()).await?;
    wait_for_status(shared, &task_id, TaskStatus::Completed).await?;

    // The browser is released right after the task completed.
    let mut status = None;
    for _ in 0..(TIMEOUT / 20) {
        if let Response::Pool(current) = send_request(shared, Request::PoolStatus).await? {
            if !current.in_use {
                status = Some(current);
                break;
            }
        }
        sleep_ms(20).await;
    }
    let status = status.ok_or_else(|| eyre!("The browser hasn't been released"))?;
    assert!(status.has_instance);
    assert_eq!(status.recent_tasks, vec![task_id]);

    Ok(())
}

/// A shutdown stops running tasks and removes the socket and the pid file.
#[tokio::test]
async fn test_shutdown() -> Result<()> {
    let daemon = daemon().await?;
    let shared = daemon.settings.shared.clone();

    let task_id = add_task(&shared, "block", TaskInput::default()).await?;
    wait_for_task_condition(&shared, &task_id, |task| task.stage == "blocking").await?;
    // This one waits for the browser.
    let waiting = add_task(&shared, "succeed", TaskInput::default()).await?;
    wait_for_status(&shared, &waiting, TaskStatus::Running).await?;

    assert_success(send_request(&shared, Request::Shutdown).await?);
    daemon.join_handle.await??;

    assert!(!shared.unix_socket_path().exists());
    assert!(!shared.pid_path().exists());
    assert!(daemon.fakes.launcher.browser(0).is_closed());

    let store = FileStore::new(shared.tasks_directory(), shared.screenshots_directory())?;
    let stopped = store.load_task(&task_id)?.unwrap();
    assert_eq!(stopped.status, TaskStatus::Stopped);
    let waiting = store.load_task(&waiting)?.unwrap();
    assert_eq!(waiting.status, TaskStatus::Stopped);

    Ok(())
}
