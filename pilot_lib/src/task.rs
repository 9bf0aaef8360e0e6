use std::collections::BTreeMap;

use chrono::prelude::*;
use serde::{Deserialize, Serialize};
use strum::Display;

/// The task kind used for composite tasks that run their [Subtask]s in order.
pub const CHAINED_KIND: &str = "chained";

/// The current version of the [TaskInput] record.
/// Bump this whenever a field is added that older daemons can't interpret.
pub const TASK_INPUT_VERSION: u32 = 1;

/// This enum represents the status of a task or of a single subtask of a chain.
/// They basically represent the task life-cycle:
///
/// `Pending -> Running -> {Completed | Error | Stopped}`
///
/// The last three are terminal. A task only leaves them through an explicit restart.
#[derive(PartialEq, Eq, Clone, Copy, Debug, Default, Display, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TaskStatus {
    /// The task has been created or restarted and waits for a runner.
    #[default]
    Pending,
    /// A runner currently holds the task and drives a browser for it.
    Running,
    Completed,
    /// The task failed. The reason is stored in the `error` field.
    Error,
    /// The task has been cancelled by a user.
    Stopped,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Error | TaskStatus::Stopped
        )
    }
}

/// A single timestamped line of a task's log.
#[derive(PartialEq, Eq, Clone, Debug, Deserialize, Serialize)]
pub struct LogLine {
    pub time: DateTime<Local>,
    pub message: String,
}

impl LogLine {
    pub fn new<T: ToString>(message: T) -> Self {
        LogLine {
            time: Local::now(),
            message: message.to_string(),
        }
    }
}

/// The explicitly typed request record of a task.
///
/// New attributes are added as new fields with a `serde(default)` and a bump of
/// [TASK_INPUT_VERSION], never through an untyped side-channel.
#[derive(PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct TaskInput {
    #[serde(default = "default_input_version")]
    pub schema_version: u32,
    /// The page the automation should start on.
    #[serde(default)]
    pub target_url: Option<String>,
    /// A human readable name for this task.
    #[serde(default)]
    pub label: Option<String>,
    /// Automation specific parameters.
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

fn default_input_version() -> u32 {
    TASK_INPUT_VERSION
}

impl Default for TaskInput {
    fn default() -> Self {
        TaskInput {
            schema_version: TASK_INPUT_VERSION,
            target_url: None,
            label: None,
            params: BTreeMap::new(),
        }
    }
}

/// We use a custom `Debug` implementation for [TaskInput], as the parameters might contain
/// secrets, which would otherwise leak into the daemon's log output.
impl std::fmt::Debug for TaskInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskInput")
            .field("schema_version", &self.schema_version)
            .field("target_url", &self.target_url)
            .field("label", &self.label)
            .field("params", &self.params.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// One step of a chained task.
///
/// It mirrors the lifecycle fields of [Task], but has no id of its own.
#[derive(PartialEq, Eq, Clone, Debug, Deserialize, Serialize)]
pub struct Subtask {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub input: TaskInput,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub logs: Vec<LogLine>,
    pub start_time: Option<DateTime<Local>>,
    pub end_time: Option<DateTime<Local>>,
    pub error: Option<String>,
    pub result: Option<serde_json::Value>,
    /// Indices of the parent's screenshots that were taken while this subtask ran.
    #[serde(default)]
    pub screenshots: Vec<usize>,
}

impl Subtask {
    pub fn new<T: ToString>(kind: T, input: TaskInput) -> Self {
        Subtask {
            kind: kind.to_string(),
            input,
            status: TaskStatus::Pending,
            logs: Vec::new(),
            start_time: None,
            end_time: None,
            error: None,
            result: None,
            screenshots: Vec::new(),
        }
    }

    /// Drop everything from a previous run.
    pub fn reset(&mut self) {
        self.status = TaskStatus::Pending;
        self.logs.clear();
        self.start_time = None;
        self.end_time = None;
        self.error = None;
        self.result = None;
        self.screenshots.clear();
    }
}

/// Representation of a task.
///
/// `start_time` will be set the second the task starts running.
/// `result`, `error` and `end_time` won't be initialized, until the task reached a terminal status.
#[derive(PartialEq, Eq, Clone, Debug, Deserialize, Serialize)]
pub struct Task {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub created_at: DateTime<Local>,
    #[serde(default)]
    pub input: TaskInput,
    pub status: TaskStatus,
    /// Free-text progress label. Advisory only.
    #[serde(default)]
    pub stage: String,
    #[serde(default)]
    pub logs: Vec<LogLine>,
    #[serde(default)]
    pub subtasks: Vec<Subtask>,
    #[serde(default)]
    pub current_index: usize,
    pub start_time: Option<DateTime<Local>>,
    pub end_time: Option<DateTime<Local>>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    /// The index the next screenshot of this task will get.
    #[serde(default)]
    pub next_screenshot: usize,
}

impl Task {
    pub fn new<T: ToString>(kind: T, input: TaskInput) -> Task {
        Task {
            id: uuid::Uuid::new_v4().to_string(),
            kind: kind.to_string(),
            created_at: Local::now(),
            input,
            status: TaskStatus::Pending,
            stage: String::new(),
            logs: Vec::new(),
            subtasks: Vec::new(),
            current_index: 0,
            start_time: None,
            end_time: None,
            result: None,
            error: None,
            next_screenshot: 0,
        }
    }

    /// Create a composite task, which runs the given subtasks in order.
    pub fn new_chain(input: TaskInput, subtasks: Vec<Subtask>) -> Task {
        let mut task = Task::new(CHAINED_KIND, input);
        task.subtasks = subtasks;
        task
    }

    /// Create the disposable task that's used to execute a single subtask of a chain.
    pub fn from_subtask(parent_id: &str, index: usize, subtask: &Subtask) -> Task {
        let mut task = Task::new(&subtask.kind, subtask.input.clone());
        task.id = subtask_id(parent_id, index);
        task
    }

    pub fn is_chained(&self) -> bool {
        self.kind == CHAINED_KIND
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.status, TaskStatus::Pending)
    }

    pub fn is_running(&self) -> bool {
        matches!(self.status, TaskStatus::Running)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn failed(&self) -> bool {
        matches!(self.status, TaskStatus::Error)
    }

    /// Append a line to the task's log.
    pub fn log<T: ToString>(&mut self, message: T) {
        self.logs.push(LogLine::new(message));
    }

    /// `* -> Running`
    pub fn start(&mut self) {
        self.status = TaskStatus::Running;
        self.start_time = Some(Local::now());
        self.end_time = None;
        self.error = None;
        self.log("Task started");
    }

    /// `Running -> Completed`
    ///
    /// Returns `false` if the task wasn't running. In that case nothing is changed, as some
    /// other party already moved the task into a terminal status.
    pub fn complete(&mut self, result: serde_json::Value) -> bool {
        if !self.is_running() {
            return false;
        }
        self.status = TaskStatus::Completed;
        self.result = Some(result);
        self.end_time = Some(Local::now());
        self.log("Task completed");
        true
    }

    /// `Running -> Error`
    ///
    /// Returns `false` if the task wasn't running.
    pub fn fail<T: ToString>(&mut self, error: T) -> bool {
        if !self.is_running() {
            return false;
        }
        let error = error.to_string();
        self.status = TaskStatus::Error;
        self.log(format!("Task failed: {error}"));
        self.error = Some(error);
        self.end_time = Some(Local::now());
        true
    }

    /// `{Pending | Running} -> Stopped`
    ///
    /// Returns `false` if the task already reached a terminal status.
    pub fn stop(&mut self) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.status = TaskStatus::Stopped;
        self.end_time = Some(Local::now());
        self.log("Task stopped");
        true
    }

    /// Reset the task for a fresh run under the same id.
    ///
    /// Screenshot indices aren't reset, as they must never be reused.
    pub fn reset(&mut self) {
        self.status = TaskStatus::Pending;
        self.stage.clear();
        self.logs.clear();
        self.current_index = 0;
        self.start_time = None;
        self.end_time = None;
        self.result = None;
        self.error = None;
        for subtask in self.subtasks.iter_mut() {
            subtask.reset();
        }
    }

    /// Hand out the next screenshot index of this task.
    pub fn take_screenshot_index(&mut self) -> usize {
        let index = self.next_screenshot;
        self.next_screenshot += 1;
        index
    }
}

/// The id of the disposable task that executes subtask `index` of the chain `parent_id`.
pub fn subtask_id(parent_id: &str, index: usize) -> String {
    format!("{parent_id}_sub{index}")
}

/// Split the id of a disposable subtask run into its parent id and subtask index.
pub fn parse_subtask_id(task_id: &str) -> Option<(&str, usize)> {
    let (parent_id, index) = task_id.rsplit_once("_sub")?;
    if parent_id.is_empty() {
        return None;
    }
    index.parse().ok().map(|index| (parent_id, index))
}
