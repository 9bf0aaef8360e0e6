use std::sync::Arc;

use pilot_lib::task::parse_subtask_id;
use pilot_lib::{Screenshot, State, Task};

use super::{lock, SharedState};
use crate::daemon::persistence::Persistence;
use crate::internal_prelude::*;

/// The task store.
///
/// Tasks that are worked on live in memory and every change is written through to the
/// persistence layer right away. Finished tasks are evicted from memory and read from
/// the persistence layer on demand.
#[derive(Clone)]
pub struct TaskStore {
    state: SharedState,
    persistence: Arc<dyn Persistence>,
}

impl TaskStore {
    pub fn new(state: SharedState, persistence: Arc<dyn Persistence>) -> Self {
        TaskStore { state, persistence }
    }

    /// Persist a new task and keep it in memory.
    pub fn insert(&self, task: Task) -> Result<()> {
        let mut state = lock(&self.state);
        self.persistence
            .save_task(&task)
            .wrap_err_with(|| format!("Failed to save task {}", task.id))?;
        state.tasks.insert(task.id.clone(), task);

        Ok(())
    }

    pub fn get(&self, task_id: &str) -> Result<Option<Task>> {
        if let Some(task) = lock(&self.state).tasks.get(task_id) {
            return Ok(Some(task.clone()));
        }

        self.persistence
            .load_task(task_id)
            .wrap_err_with(|| format!("Failed to load task {task_id}"))
    }

    /// Modify a task and persist the result.
    ///
    /// Evicted tasks are loaded back into memory first.
    pub fn update<F, R>(&self, task_id: &str, modify: F) -> Result<R>
    where
        F: FnOnce(&mut Task) -> R,
    {
        let mut state = lock(&self.state);
        if !state.tasks.contains_key(task_id) {
            let Some(task) = self.persistence.load_task(task_id)? else {
                bail!("Task {task_id} doesn't exist");
            };
            state.tasks.insert(task_id.to_string(), task);
        }
        let Some(task) = state.tasks.get_mut(task_id) else {
            bail!("Task {task_id} doesn't exist");
        };

        let result = modify(task);
        self.persistence
            .save_task(task)
            .wrap_err_with(|| format!("Failed to save task {task_id}"))?;

        Ok(result)
    }

    /// Drop a finished task from memory. It stays available through the persistence layer.
    pub fn evict(&self, task_id: &str) {
        let mut state = lock(&self.state);
        if state.tasks.get(task_id).is_some_and(Task::is_terminal) {
            debug!("Evicting finished task {task_id} from memory");
            state.tasks.remove(task_id);
        }
    }

    /// Remove a task, including its screenshots, for good.
    pub fn delete(&self, task_id: &str) -> Result<()> {
        let mut state = lock(&self.state);
        self.persistence
            .delete_task(task_id)
            .wrap_err_with(|| format!("Failed to delete task {task_id}"))?;
        state.tasks.remove(task_id);

        Ok(())
    }

    /// A snapshot of all tasks. In-memory copies take precedence over persisted ones.
    /// Disposable subtask runs aren't included.
    pub fn list(&self) -> Result<State> {
        let persisted = self
            .persistence
            .list_tasks()
            .wrap_err("Failed to list tasks")?;

        let mut snapshot = State::new();
        for task in persisted {
            snapshot.tasks.insert(task.id.clone(), task);
        }
        for (id, task) in lock(&self.state).tasks.iter() {
            snapshot.tasks.insert(id.clone(), task.clone());
        }
        snapshot
            .tasks
            .retain(|id, _| parse_subtask_id(id).is_none());

        Ok(snapshot)
    }

    /// Store a screenshot under the task's next screenshot index.
    pub fn add_screenshot(&self, task_id: &str, label: &str, image: Vec<u8>) -> Result<usize> {
        let index = self.update(task_id, |task| {
            let index = task.take_screenshot_index();
            task.log(format!("Screenshot {index}: {label}"));
            index
        })?;

        let screenshot = Screenshot::new(task_id, index, label, image);
        self.persistence
            .save_screenshot(&screenshot)
            .wrap_err_with(|| format!("Failed to save screenshot {index} of task {task_id}"))?;

        Ok(index)
    }

    pub fn screenshots(&self, task_id: &str) -> Result<Vec<Screenshot>> {
        self.persistence
            .load_screenshots(task_id)
            .wrap_err_with(|| format!("Failed to load screenshots of task {task_id}"))
    }

    /// Bring the persisted tasks into a consistent state after a daemon (re)start.
    ///
    /// Tasks that were running when the previous daemon went away can't be continued.
    /// They're marked as failed, but keep their `current_index`, so chains can be resumed.
    /// Leftover subtask runs are removed.
    pub fn restore(&self) -> Result<()> {
        let tasks = self
            .persistence
            .list_tasks()
            .wrap_err("Failed to read tasks of the previous session")?;

        for mut task in tasks {
            if parse_subtask_id(&task.id).is_some() {
                info!("Removing leftover subtask run {}", task.id);
                self.persistence.delete_task(&task.id)?;
                continue;
            }

            if !task.is_running() {
                continue;
            }

            info!("Task {} was interrupted by the previous daemon", task.id);
            let message = "Interrupted by daemon shutdown";
            if let Some(subtask) = task.subtasks.get_mut(task.current_index) {
                if subtask.status == pilot_lib::TaskStatus::Running {
                    subtask.status = pilot_lib::TaskStatus::Error;
                    subtask.error = Some(message.to_string());
                    subtask.end_time = Some(chrono::Local::now());
                }
            }
            task.fail(message);
            self.persistence.save_task(&task)?;
        }

        Ok(())
    }
}
