//! Executes a single, non-chained task.
use pilot_lib::Task;
use serde_json::Value;
use tokio::time::sleep;

use super::cleanup;
use crate::daemon::automation::{Automation, AutomationError, Session};
use crate::daemon::context::Context;
use crate::daemon::internal_state::lock;
use crate::daemon::pool::{wait_for_disconnect, Acquired, BrowserError};
use crate::internal_prelude::*;

/// The task parameter that contains additional browser arguments, separated by whitespace.
pub const BROWSER_ARGS_PARAM: &str = "browser_args";

/// Run a pending task to completion.
///
/// Transient navigation errors are retried up to `runner.max_retries` times, so a task gets at
/// most `max_retries + 1` attempts. Errors are only returned, if the task store or the pool
/// fails. The task itself always ends up in a terminal status in that case as well.
pub async fn run(ctx: &Context, task_id: &str) -> Result<()> {
    if lock(&ctx.state).shutting_down {
        debug!("Not starting task {task_id}, the daemon is shutting down");
        return Ok(());
    }

    let Some(task) = ctx.store.get(task_id)? else {
        bail!("Task {task_id} doesn't exist");
    };
    let started = ctx.store.update(task_id, |task| {
        if !task.is_pending() {
            return false;
        }
        task.start();
        true
    })?;
    if !started {
        debug!("Task {task_id} isn't pending anymore, not starting it");
        return Ok(());
    }

    let Some(automation) = ctx.automations.get(&task.kind) else {
        let known = ctx.automations.kinds().join(", ");
        ctx.store.update(task_id, |task| {
            task.fail(format!("Unknown task type '{}'. Known types: {known}", task.kind))
        })?;
        ctx.store.evict(task_id);
        return Ok(());
    };

    let result = run_attempts(ctx, &task, automation.as_ref()).await;
    ctx.store.evict(task_id);
    result
}

async fn run_attempts(ctx: &Context, task: &Task, automation: &dyn Automation) -> Result<()> {
    let task_id = task.id.as_str();
    let credentials = match ctx.credentials.load_credentials() {
        Ok(credentials) => credentials,
        Err(error) => {
            ctx.store.update(task_id, |task| {
                task.fail(format!("Failed to load credentials: {error}"))
            })?;
            return Ok(());
        }
    };

    let extra_args: Vec<String> = task
        .input
        .params
        .get(BROWSER_ARGS_PARAM)
        .map(|args| args.split_whitespace().map(ToString::to_string).collect())
        .unwrap_or_default();
    let max_retries = ctx.settings.runner.max_retries;

    let mut attempt = 0;
    loop {
        let acquired = match ctx.pool.acquire(task_id, &extra_args).await {
            Ok(acquired) => acquired,
            Err(error) => {
                ctx.store.update(task_id, |task| {
                    task.fail(format!("Failed to get a browser: {error}"))
                })?;
                return Err(error).wrap_err_with(|| format!("Task {task_id} couldn't start"));
            }
        };

        // The task might have been stopped, while we were waiting for the pool.
        let attributed = {
            let mut state = lock(&ctx.state);
            let running = state.tasks.get(task_id).is_some_and(Task::is_running);
            if running {
                state.attribute(task_id, acquired.handle.clone(), acquired.process_id);
            }
            running
        };
        if !attributed {
            info!("Task {task_id} has been stopped before it got a browser");
            ctx.pool.release();
            return Ok(());
        }

        if attempt > 0 {
            log(ctx, task_id, format!("Attempt {} of {}", attempt + 1, max_retries + 1));
        }
        if acquired.was_cached {
            log(ctx, task_id, "Reusing running browser");
        }

        let session = Session::new(
            task_id,
            task.input.clone(),
            acquired.handle.clone(),
            credentials.clone(),
            attempt,
            ctx.store.clone(),
            ctx.pool.clone(),
        );
        let outcome = execute(automation, &session, &acquired).await;

        // The browser is never left attributed to a finished task.
        let stop_requested = lock(&ctx.state)
            .detach(task_id)
            .is_some_and(|resource| resource.stop_requested);
        if stop_requested {
            info!("Task {task_id} has been stopped");
            ctx.pool.release();
            return Ok(());
        }

        match outcome {
            Ok(result) => {
                ctx.store.update(task_id, |task| task.complete(result))?;
                ctx.pool.release();
                return Ok(());
            }
            Err(error @ AutomationError::Credential(_)) => {
                ctx.store.update(task_id, |task| task.fail(error.to_string()))?;
                ctx.pool.release();
                return Ok(());
            }
            Err(AutomationError::TransientNavigation(message)) => {
                warn!("Attempt {attempt} of task {task_id} failed: {message}");
                ctx.pool.discard().await;

                if attempt >= max_retries {
                    ctx.store.update(task_id, |task| {
                        task.fail(format!(
                            "Navigation failed after {max_retries} retries: {message}"
                        ))
                    })?;
                    return Ok(());
                }

                let backoff = ctx.settings.runner.retry_backoff();
                log(
                    ctx,
                    task_id,
                    format!("Navigation failed: {message}. Retrying in {backoff:?}"),
                );
                sleep(backoff).await;
                attempt += 1;
            }
            Err(AutomationError::Other(message)) => {
                cleanup::handle(ctx, task_id, &message, &acquired).await;
                ctx.pool.release();
                return Ok(());
            }
        }
    }
}

/// Run the automation, but give up as soon as the browser goes away.
async fn execute(
    automation: &dyn Automation,
    session: &Session,
    acquired: &Acquired,
) -> Result<Value, AutomationError> {
    tokio::select! {
        result = automation.run(session) => result,
        _ = wait_for_disconnect(&acquired.handle) => {
            let error = BrowserError::Disconnected("the browser went away during the run".into());
            Err(AutomationError::Other(error.to_string()))
        }
    }
}

fn log<T: ToString>(ctx: &Context, task_id: &str, message: T) {
    if let Err(error) = ctx.store.update(task_id, |task| task.log(message)) {
        warn!("Failed to append log of task {task_id}: {error:?}");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use pilot_lib::{TaskInput, TaskStatus};
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::daemon::automation::AutomationRegistry;
    use crate::daemon::task_handler::tests::{context_with, wait_until, TestContext};

    /// Fails with the given error a number of times, then succeeds.
    struct Flaky {
        calls: AtomicUsize,
        failures: usize,
        error: AutomationError,
    }

    #[async_trait]
    impl Automation for Flaky {
        async fn run(&self, _session: &Session) -> Result<Value, AutomationError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(self.error.clone());
            }
            Ok(serde_json::json!({ "call": call }))
        }
    }

    /// Runs into a navigation race on its first run.
    #[derive(Default)]
    struct Racy {
        calls: AtomicUsize,
    }

    impl Racy {
        fn page_text(&self, call: usize) -> Result<String, BrowserError> {
            if call == 0 {
                return Err(BrowserError::from_protocol(
                    "Execution context was destroyed, most likely because of a navigation.",
                ));
            }
            Ok("loaded".into())
        }
    }

    #[async_trait]
    impl Automation for Racy {
        async fn run(&self, _session: &Session) -> Result<Value, AutomationError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let text = self.page_text(call)?;
            Ok(serde_json::json!({ "text": text }))
        }
    }

    fn flaky(failures: usize, error: AutomationError) -> (Arc<Flaky>, TestContext) {
        let automation = Arc::new(Flaky {
            calls: AtomicUsize::new(0),
            failures,
            error,
        });
        let mut registry = AutomationRegistry::new();
        registry.register("flaky", automation.clone());

        (automation, context_with(registry))
    }

    fn add_task(test: &TestContext) -> String {
        let task = Task::new("flaky", TaskInput::default());
        let id = task.id.clone();
        test.ctx.store.insert(task).unwrap();
        id
    }

    #[tokio::test(start_paused = true)]
    async fn retries_are_bounded() {
        let error = AutomationError::TransientNavigation("dns".into());
        let (automation, test) = flaky(usize::MAX, error);
        let id = add_task(&test);

        run(&test.ctx, &id).await.unwrap();

        let task = test.ctx.store.get(&id).unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Error);
        assert_eq!(automation.calls.load(Ordering::SeqCst), 4);
        assert!(task.error.unwrap().contains("after 3 retries"));
        // Every failed attempt closes its browser.
        assert_eq!(test.launcher.launch_count(), 4);
        assert!(lock(&test.ctx.state).resources.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_are_retried() {
        let (automation, test) = flaky(2, AutomationError::TransientNavigation("reset".into()));
        let id = add_task(&test);

        run(&test.ctx, &id).await.unwrap();

        let task = test.ctx.store.get(&id).unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.result, Some(serde_json::json!({ "call": 2 })));
        assert_eq!(automation.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn destroyed_page_contexts_are_retried() {
        let automation = Arc::new(Racy::default());
        let mut registry = AutomationRegistry::new();
        registry.register("racy", automation.clone());
        let test = context_with(registry);
        let task = Task::new("racy", TaskInput::default());
        let id = task.id.clone();
        test.ctx.store.insert(task).unwrap();

        run(&test.ctx, &id).await.unwrap();

        let task = test.ctx.store.get(&id).unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.result, Some(serde_json::json!({ "text": "loaded" })));
        assert_eq!(automation.calls.load(Ordering::SeqCst), 2);
        // The browser of the failed attempt has been replaced.
        assert_eq!(test.launcher.launch_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn credential_errors_are_not_retried() {
        let (automation, test) = flaky(1, AutomationError::Credential("expired".into()));
        let id = add_task(&test);

        run(&test.ctx, &id).await.unwrap();

        let task = test.ctx.store.get(&id).unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Error);
        assert_eq!(automation.calls.load(Ordering::SeqCst), 1);
        // The browser is fine, it stays in the pool.
        let status = test.ctx.pool.status();
        assert!(status.has_instance);
        assert!(!status.in_use);
    }

    #[tokio::test(start_paused = true)]
    async fn other_errors_are_cleaned_up() {
        let (_automation, test) = flaky(1, AutomationError::Other("boom".into()));
        let id = add_task(&test);

        run(&test.ctx, &id).await.unwrap();

        let task = test.ctx.store.get(&id).unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Error);
        assert_eq!(task.error.as_deref(), Some("boom"));
        // A final screenshot has been taken and the browser has been closed.
        assert_eq!(test.ctx.store.screenshots(&id).unwrap().len(), 1);
        assert!(test.launcher.browser(0).is_closed());
        assert!(!test.ctx.pool.status().has_instance);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failed_runs_kill_browsers_that_refuse_to_close() {
        let (_automation, test) = flaky(1, AutomationError::Other("boom".into()));
        test.launcher.stubborn.store(true, Ordering::SeqCst);
        let id = add_task(&test);

        run(&test.ctx, &id).await.unwrap();

        let task = test.ctx.store.get(&id).unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Error);
        let browser = test.launcher.browser(0);
        wait_until(|| browser.was_killed()).await;
        assert!(!browser.is_closed());
        assert!(!test.ctx.pool.status().has_instance);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_kinds_fail() {
        let test = context_with(AutomationRegistry::new());
        let task = Task::new("unknown", TaskInput::default());
        let id = task.id.clone();
        test.ctx.store.insert(task).unwrap();

        run(&test.ctx, &id).await.unwrap();

        let task = test.ctx.store.get(&id).unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Error);
        assert_eq!(test.launcher.launch_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn launch_failures_fail_the_task() {
        let (_automation, test) = flaky(0, AutomationError::Other(String::new()));
        test.launcher.fail.store(true, Ordering::SeqCst);
        let id = add_task(&test);

        assert!(run(&test.ctx, &id).await.is_err());

        let task = test.ctx.store.get(&id).unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Error);
        assert!(!test.ctx.pool.status().in_use);
    }
}
