//! This module contains helper functions, which are used by all daemon tests.
mod fakes;
mod fixtures;
mod network;
mod wait;

pub use fakes::*;
pub use fixtures::*;
pub use network::*;
pub use wait::*;

/// The time in milliseconds any waiting helper gives the daemon before it gives up.
pub const TIMEOUT: u64 = 5000;

/// A helper function to sleep for ms time.
/// Only used to avoid the boilerplate of importing the same stuff all over the place.
pub async fn sleep_ms(ms: u64) {
    tokio::time::sleep(std::time::Duration::from_millis(ms)).await;
}
