//! Shared types of the pilot daemon and its client.
//!
//! This crate contains everything both sides have to agree on: the [`Task`] record and its
//! lifecycle, the serializable [`State`] snapshot, the proxy [`RouteTable`], the daemon
//! [`Settings`] and the framed socket protocol used by the administrative surface.

pub(crate) mod internal_prelude {
    #![allow(unused_imports)]
    pub use tracing::{debug, error, info, trace, warn};
}

pub mod error;
pub mod network;
pub mod route;
pub mod screenshot;
mod setting_defaults;
pub mod settings;
pub mod state;
pub mod task;

pub const PROTOCOL_VERSION: &str = env!("CARGO_PKG_VERSION");

pub use error::Error;
pub use network::message::{Request, Response};
pub use route::RouteTable;
pub use screenshot::Screenshot;
pub use settings::Settings;
pub use state::State;
pub use task::{LogLine, Subtask, Task, TaskInput, TaskStatus, CHAINED_KIND};

pub mod prelude {
    pub use super::error::Error;
    pub use super::network::message::{Request, Response};
    pub use super::network::protocol::{
        receive_request, receive_response, send_request, send_response,
    };
    pub use super::route::RouteTable;
    pub use super::settings::Settings;
    pub use super::state::State;
    pub use super::task::{Subtask, Task, TaskInput, TaskStatus};
}
