//! The condition poller.
//!
//! Pretty much everything the daemon waits for is an asynchronous and unreliable state change
//! in some external process. All of those waits go through [poll].
use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, Instant};

use crate::daemon::pool::BrowserError;
use crate::internal_prelude::*;

/// This many transient errors in a row abort the poll.
pub const MAX_CONSECUTIVE_ERRORS: usize = 5;

/// Progress of long polls is logged at most this often.
const PROGRESS_INTERVAL: Duration = Duration::from_secs(3);

/// The outcome of a [poll].
#[derive(Debug, PartialEq, Eq)]
pub enum PollOutcome<T> {
    Ready(T),
    TimedOut,
    /// The check hit an error that can't go away by waiting, e.g. the browser disconnected.
    Fatal(String),
    /// The check failed [MAX_CONSECUTIVE_ERRORS] times in a row.
    TooManyErrors(String),
}

impl<T> PollOutcome<T> {
    pub fn is_ready(&self) -> bool {
        matches!(self, PollOutcome::Ready(_))
    }
}

/// An error raised by a single check of a [poll].
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum CheckError {
    #[error("{0}")]
    Fatal(String),
    #[error("{0}")]
    Transient(String),
}

impl CheckError {
    /// Classify an arbitrary error message.
    ///
    /// Messages that indicate a gone process, session or target are fatal.
    pub fn from_message<T: ToString>(message: T) -> Self {
        let message = message.to_string();
        let lowercase = message.to_lowercase();
        let fatal = [
            "disconnected",
            "session closed",
            "target closed",
            "connection closed",
            "browser closed",
        ]
        .iter()
        .any(|marker| lowercase.contains(marker));

        if fatal {
            CheckError::Fatal(message)
        } else {
            CheckError::Transient(message)
        }
    }
}

impl From<BrowserError> for CheckError {
    fn from(error: BrowserError) -> Self {
        match error {
            BrowserError::Disconnected(_) => CheckError::Fatal(error.to_string()),
            other => CheckError::from_message(other),
        }
    }
}

/// Invoke `check` every `interval`, until it returns a value or `timeout` elapsed.
///
/// - `Ok(Some(value))` finishes the poll.
/// - `Ok(None)` means "not yet" and resets the error counter.
/// - A [CheckError::Fatal] aborts the poll right away.
/// - [CheckError::Transient]s are counted, see [MAX_CONSECUTIVE_ERRORS].
///
/// The first check is executed immediately.
pub async fn poll<T, F, Fut>(
    label: &str,
    timeout: Duration,
    interval: Duration,
    mut check: F,
) -> PollOutcome<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, CheckError>>,
{
    let start = Instant::now();
    let mut last_progress = start;
    let mut consecutive_errors = 0;

    loop {
        match check().await {
            Ok(Some(value)) => {
                trace!("Poll '{label}' ready after {:?}", start.elapsed());
                return PollOutcome::Ready(value);
            }
            Ok(None) => consecutive_errors = 0,
            Err(CheckError::Fatal(message)) => {
                warn!("Poll '{label}' hit a fatal error: {message}");
                return PollOutcome::Fatal(message);
            }
            Err(CheckError::Transient(message)) => {
                consecutive_errors += 1;
                debug!(
                    "Poll '{label}' check failed ({consecutive_errors}/{MAX_CONSECUTIVE_ERRORS}): \
                    {message}"
                );
                if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                    return PollOutcome::TooManyErrors(message);
                }
            }
        }

        let elapsed = start.elapsed();
        if elapsed >= timeout {
            info!("Poll '{label}' timed out after {elapsed:?}");
            return PollOutcome::TimedOut;
        }

        if last_progress.elapsed() >= PROGRESS_INTERVAL {
            info!("Still waiting for '{label}' ({:?} of {timeout:?})", elapsed);
            last_progress = Instant::now();
        }

        // Don't oversleep the deadline.
        sleep(interval.min(timeout - elapsed)).await;
    }
}
