use std::time::Duration;

use tokio::time::timeout;

use crate::daemon::context::Context;
use crate::daemon::internal_state::lock;
use crate::daemon::pool::{is_disconnected, terminate, Acquired};
use crate::internal_prelude::*;

/// How long the final screenshot and the text preview may take.
const CAPTURE_TIMEOUT: Duration = Duration::from_secs(10);
/// The number of characters of the page's text that end up in the task log.
const PREVIEW_LENGTH: usize = 500;

/// Handle a failed automation run.
///
/// Tries to capture what the page looked like, fails the task and tears its browser down.
/// Capturing is best effort, its errors are only logged.
pub async fn handle(ctx: &Context, task_id: &str, error: &str, acquired: &Acquired) {
    if !is_disconnected(&acquired.handle) {
        capture(ctx, task_id, acquired).await;
    }

    if let Err(error) = ctx.store.update(task_id, |task| task.fail(error)) {
        error!("Failed to persist the failure of task {task_id}: {error:?}");
    }

    lock(&ctx.state).detach(task_id);
    if let Some(process_id) = acquired.process_id {
        ctx.pool.invalidate(process_id);
    }
    terminate(&acquired.handle, acquired.process_id).await;
}

async fn capture(ctx: &Context, task_id: &str, acquired: &Acquired) {
    match timeout(CAPTURE_TIMEOUT, acquired.handle.screenshot()).await {
        Ok(Ok(image)) => {
            if let Err(error) = ctx.store.add_screenshot(task_id, "error", image) {
                warn!("Failed to store error screenshot of task {task_id}: {error:?}");
            }
        }
        Ok(Err(error)) => debug!("No error screenshot for task {task_id}: {error}"),
        Err(_) => debug!("Error screenshot of task {task_id} timed out"),
    }

    let text = match timeout(CAPTURE_TIMEOUT, acquired.handle.page_text()).await {
        Ok(Ok(text)) => text,
        Ok(Err(error)) => {
            debug!("No page text for task {task_id}: {error}");
            return;
        }
        Err(_) => {
            debug!("Reading the page text of task {task_id} timed out");
            return;
        }
    };

    let preview: String = text.chars().take(PREVIEW_LENGTH).collect();
    let result = ctx
        .store
        .update(task_id, |task| task.log(format!("Page text at failure: {preview}")));
    if let Err(error) = result {
        warn!("Failed to log page text of task {task_id}: {error:?}");
    }
}
