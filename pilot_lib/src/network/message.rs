//! This contains the [`Request`] and [`Response`] enums and
//! all their structs used to communicate with the daemon or client.
use serde::{Deserialize, Serialize};

use crate::route::RouteTable;
use crate::state::State;
use crate::task::{Subtask, Task, TaskInput};

/// Macro to simplify creating [From] implementations for each variant-contained
/// Request; e.g. `impl_into_request!(AddMessage, Request::Add)` to make it possible
/// to use `AddMessage { }.into()` and get a `Request::Add()` value.
macro_rules! impl_into_request {
    ($inner:ty, $variant:expr) => {
        impl From<$inner> for Request {
            fn from(message: $inner) -> Self {
                $variant(message)
            }
        }
    };
}

/// Macro to simplify creating success_messages
#[macro_export]
macro_rules! success_msg {
    ($($arg:tt)*) => {{
        $crate::network::message::create_success_response(format!($($arg)*))
    }}
}

/// Macro to simplify creating failure_messages
#[macro_export]
macro_rules! failure_msg {
    ($($arg:tt)*) => {{
        $crate::network::message::create_failure_response(format!($($arg)*))
    }}
}

/// This is the message for messages sent **to** the daemon. \
/// Everything that's send by the client is represented using by this enum.
#[derive(PartialEq, Eq, Clone, Debug, Deserialize, Serialize)]
pub enum Request {
    /// Create a new task and hand it to a runner.
    Add(AddMessage),
    /// Get a snapshot of all known tasks.
    List,
    Get(String),
    /// Remove a task that isn't running. This also removes its screenshots.
    Delete(String),
    /// Reset a finished task and run it again from the start.
    Restart(String),
    /// Run a failed or stopped chain again, starting at its last recorded subtask.
    Resume(String),
    /// Stop a running task by closing its browser.
    Stop(String),
    /// Close every browser that's currently attributed to a task.
    KillAll,
    GetRoutes,
    UpdateRoutes(RouteTable),
    PoolStatus,
    Shutdown,
}

#[derive(PartialEq, Eq, Clone, Debug, Default, Deserialize, Serialize)]
pub struct AddMessage {
    #[serde(rename = "type")]
    pub kind: String,
    pub input: TaskInput,
    /// If this isn't empty, a chained task is created and `kind` is ignored.
    pub subtasks: Vec<Subtask>,
}
impl_into_request!(AddMessage, Request::Add);

/// A diagnostic snapshot of the browser pool.
#[derive(PartialEq, Eq, Clone, Debug, Default, Deserialize, Serialize)]
pub struct PoolStatus {
    pub has_instance: bool,
    pub in_use: bool,
    pub process_id: Option<u32>,
    /// Age of the current browser in milliseconds.
    pub age_ms: Option<u64>,
    /// Time since the browser was last acquired or released, in milliseconds.
    pub idle_ms: Option<u64>,
    /// The most recently visited destinations, oldest first.
    pub recent_destinations: Vec<String>,
    /// The ids of the most recent tasks that used the pool, oldest first.
    pub recent_tasks: Vec<String>,
}

/// This is the message for messages sent **from** the daemon. \
#[derive(PartialEq, Eq, Clone, Debug, Deserialize, Serialize)]
pub enum Response {
    AddedTask(String),
    Status(Box<State>),
    Task(Box<Task>),
    Routes(RouteTable),
    Pool(PoolStatus),
    Success(String),
    Failure(String),
    /// Simply notify the client that the connection is now closed.
    Close,
}

impl Response {
    pub fn success(&self) -> bool {
        !matches!(&self, Self::Failure(_))
    }
}

pub fn create_success_response<T: ToString>(text: T) -> Response {
    Response::Success(text.to_string())
}

pub fn create_failure_response<T: ToString>(text: T) -> Response {
    Response::Failure(text.to_string())
}
