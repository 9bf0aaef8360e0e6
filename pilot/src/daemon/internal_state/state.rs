use std::collections::{BTreeMap, BTreeSet};

use pilot_lib::Task;

use crate::daemon::pool::BrowserHandle;

/// A browser that's currently attributed to a running task.
#[derive(Clone)]
pub struct Attributed {
    pub handle: BrowserHandle,
    pub process_id: Option<u32>,
    /// Somebody is tearing this browser down on purpose.
    /// The task's runner must not treat the disconnect as a failure.
    pub stop_requested: bool,
}

/// This is the daemon's internal state, which isn't exposed to clients.
#[derive(Default)]
pub struct InternalState {
    /// The in-memory copies of all tasks that are currently worked on.
    /// Finished tasks are evicted and only live in the persistence layer.
    pub tasks: BTreeMap<String, Task>,
    /// The running-resource registry. Maps task ids to their browser.
    pub resources: BTreeMap<String, Attributed>,
    /// Tasks that are currently driven by a runner or a chain orchestrator.
    /// They can't be restarted or removed, until their runner is done.
    pub runners: BTreeSet<String>,
    /// Set once the daemon shuts down. No new runs are started afterwards.
    pub shutting_down: bool,
}

impl InternalState {
    pub fn new() -> InternalState {
        InternalState::default()
    }

    pub fn attribute(&mut self, task_id: &str, handle: BrowserHandle, process_id: Option<u32>) {
        self.resources.insert(
            task_id.to_string(),
            Attributed {
                handle,
                process_id,
                stop_requested: false,
            },
        );
    }

    /// Remove a task's browser from the registry.
    pub fn detach(&mut self, task_id: &str) -> Option<Attributed> {
        self.resources.remove(task_id)
    }

    pub fn stop_requested(&self, task_id: &str) -> bool {
        self.resources
            .get(task_id)
            .is_some_and(|resource| resource.stop_requested)
    }

    /// Flag the browsers of a task and all of its subtask runs for an intentional teardown.
    /// Returns the affected task ids with their browsers.
    pub fn request_stop(&mut self, task_id: &str) -> Vec<(String, Attributed)> {
        let mut affected = Vec::new();
        for (id, resource) in self.resources.iter_mut() {
            let is_subtask_run = pilot_lib::task::parse_subtask_id(id)
                .is_some_and(|(parent_id, _)| parent_id == task_id);
            if id == task_id || is_subtask_run {
                resource.stop_requested = true;
                affected.push((id.clone(), resource.clone()));
            }
        }

        affected
    }
}
