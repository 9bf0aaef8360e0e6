//! Browser processes are torn down by pid, when they don't react to a graceful shutdown.
//!
//! Process handling is platform specific.
//! Depending on the target, the respective implementation is loaded into this scope.

#[cfg(unix)]
mod unix;
#[cfg(unix)]
pub use self::unix::*;

#[cfg(not(unix))]
mod fallback;
#[cfg(not(unix))]
pub use self::fallback::*;
