//! The page automation boundary.
//!
//! An [Automation] drives the browser for one kind of task. The daemon doesn't know anything
//! about the pages that are automated, it only interprets the [AutomationError] that comes back.
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pilot_lib::TaskInput;
use serde_json::Value;

use crate::daemon::credentials::Credential;
use crate::daemon::internal_state::store::TaskStore;
use crate::daemon::poll::{poll, CheckError, PollOutcome};
use crate::daemon::pool::{BrowserError, BrowserHandle, ResourcePool};
use crate::internal_prelude::*;

mod snapshot;

pub use snapshot::Snapshot;

/// How an automation run failed. This decides what the runner does next.
#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq)]
pub enum AutomationError {
    /// The page rejected our credentials. A human has to act, retrying won't help.
    #[error("Credentials were rejected: {0}")]
    Credential(String),

    /// Loading a page failed in a way that might go away on the next attempt.
    #[error("Navigation failed: {0}")]
    TransientNavigation(String),

    #[error("{0}")]
    Other(String),
}

impl From<BrowserError> for AutomationError {
    fn from(error: BrowserError) -> Self {
        match error {
            BrowserError::Navigation(_, _) | BrowserError::ContextDestroyed(_) => {
                AutomationError::TransientNavigation(error.to_string())
            }
            other => AutomationError::Other(other.to_string()),
        }
    }
}

#[async_trait]
pub trait Automation: Send + Sync {
    async fn run(&self, session: &Session) -> Result<Value, AutomationError>;
}

/// All known automations, by task kind.
#[derive(Clone, Default)]
pub struct AutomationRegistry {
    automations: HashMap<String, Arc<dyn Automation>>,
}

impl AutomationRegistry {
    pub fn new() -> Self {
        AutomationRegistry::default()
    }

    /// A registry with all automations that ship with the daemon.
    pub fn with_builtin() -> Self {
        let mut registry = AutomationRegistry::new();
        registry.register(snapshot::KIND, Arc::new(Snapshot::default()));
        registry
    }

    pub fn register<T: ToString>(&mut self, kind: T, automation: Arc<dyn Automation>) {
        self.automations.insert(kind.to_string(), automation);
    }

    pub fn get(&self, kind: &str) -> Option<Arc<dyn Automation>> {
        self.automations.get(kind).cloned()
    }

    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.automations.keys().cloned().collect();
        kinds.sort();
        kinds
    }
}

/// Everything an automation gets to work with during a single attempt.
pub struct Session {
    pub task_id: String,
    pub input: TaskInput,
    pub browser: BrowserHandle,
    pub credentials: Vec<Credential>,
    /// The number of the current attempt, starting at 0.
    pub attempt: u32,
    store: TaskStore,
    pool: ResourcePool,
}

impl Session {
    pub fn new(
        task_id: &str,
        input: TaskInput,
        browser: BrowserHandle,
        credentials: Vec<Credential>,
        attempt: u32,
        store: TaskStore,
        pool: ResourcePool,
    ) -> Self {
        Session {
            task_id: task_id.to_string(),
            input,
            browser,
            credentials,
            attempt,
            store,
            pool,
        }
    }

    /// Update the task's free-text progress label.
    pub fn stage(&self, stage: &str) {
        let result = self.store.update(&self.task_id, |task| {
            task.stage = stage.to_string();
            task.log(format!("Stage: {stage}"));
        });
        if let Err(error) = result {
            warn!("Failed to update stage of task {}: {error:?}", self.task_id);
        }
    }

    pub fn log(&self, message: &str) {
        if let Err(error) = self.store.update(&self.task_id, |task| task.log(message)) {
            warn!("Failed to append log of task {}: {error:?}", self.task_id);
        }
    }

    /// Take a screenshot of the active page and store it with the task.
    pub async fn screenshot(&self, label: &str) -> Result<usize, AutomationError> {
        let image = self.browser.screenshot().await?;
        self.store
            .add_screenshot(&self.task_id, label, image)
            .map_err(|error| AutomationError::Other(format!("{error:#}")))
    }

    /// Remember a destination in the pool's history.
    pub fn record_visit(&self, destination: &str) {
        self.pool.record_visit(destination);
    }

    /// Navigate the active page and record the visit.
    pub async fn navigate(&self, url: &str) -> Result<(), AutomationError> {
        self.record_visit(url);
        self.browser.navigate(url).await?;
        Ok(())
    }

    /// Wait for a condition on the page. See [poll].
    pub async fn poll<T, F, Fut>(
        &self,
        label: &str,
        timeout: Duration,
        interval: Duration,
        check: F,
    ) -> PollOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<T>, CheckError>>,
    {
        poll(label, timeout, interval, check).await
    }
}
