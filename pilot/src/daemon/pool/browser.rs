use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::daemon::credentials::Credential;
use crate::internal_prelude::*;
use crate::process_helper::kill_process;

/// How long a browser gets to shut down gracefully, before it's killed by pid.
pub const GRACEFUL_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(thiserror::Error, Debug)]
pub enum BrowserError {
    #[error("Failed to launch browser: {0}")]
    Launch(String),

    #[error("Browser disconnected: {0}")]
    Disconnected(String),

    #[error("Navigation to {0} failed: {1}")]
    Navigation(String, String),

    /// The page's javascript context went away underneath a call, usually due to a navigation.
    #[error("Page context was destroyed: {0}")]
    ContextDestroyed(String),

    #[error("Browser protocol error: {0}")]
    Protocol(String),
}

impl BrowserError {
    /// Classify an error message of the devtools protocol.
    pub fn from_protocol<T: ToString>(message: T) -> Self {
        let message = message.to_string();
        let lowercase = message.to_lowercase();
        let navigated = [
            "execution context was destroyed",
            "cannot find context with specified id",
        ]
        .iter()
        .any(|marker| lowercase.contains(marker));

        if navigated {
            BrowserError::ContextDestroyed(message)
        } else {
            BrowserError::Protocol(message)
        }
    }
}

/// A running, remote controlled browser process.
///
/// All methods operate on the browser's single active page.
#[async_trait]
pub trait Browser: Send + Sync {
    fn process_id(&self) -> Option<u32>;

    /// A cheap round trip to check whether the browser still answers.
    async fn probe(&self) -> Result<(), BrowserError>;

    async fn navigate(&self, url: &str) -> Result<(), BrowserError>;

    /// Evaluate a javascript expression on the active page and return its value.
    async fn evaluate(&self, expression: &str) -> Result<serde_json::Value, BrowserError>;

    /// The visible text of the active page.
    async fn page_text(&self) -> Result<String, BrowserError>;

    /// A png screenshot of the active page.
    async fn screenshot(&self) -> Result<Vec<u8>, BrowserError>;

    async fn set_cookies(&self, cookies: &[Credential]) -> Result<(), BrowserError>;

    /// Shut the browser down gracefully.
    async fn close(&self) -> Result<(), BrowserError>;

    /// A receiver that flips to `true` as soon as the connection to the browser is gone.
    fn disconnected(&self) -> watch::Receiver<bool>;
}

pub type BrowserHandle = Arc<dyn Browser>;

/// Starts new browser processes for the pool.
#[async_trait]
pub trait Launcher: Send + Sync {
    async fn launch(&self, args: &[String]) -> Result<BrowserHandle, BrowserError>;
}

/// Resolves as soon as the browser is disconnected.
pub async fn wait_for_disconnect(handle: &BrowserHandle) {
    let mut receiver = handle.disconnected();
    // An error means the sender is gone, which means the connection is gone as well.
    let _ = receiver.wait_for(|disconnected| *disconnected).await;
}

pub fn is_disconnected(handle: &BrowserHandle) -> bool {
    *handle.disconnected().borrow()
}

/// Close a browser gracefully and kill it by pid, if that doesn't work out.
pub async fn terminate(handle: &BrowserHandle, process_id: Option<u32>) {
    let result = tokio::time::timeout(GRACEFUL_CLOSE_TIMEOUT, handle.close()).await;
    let error = match result {
        Ok(Ok(())) => return,
        Ok(Err(error)) => error.to_string(),
        Err(_) => "timed out".to_string(),
    };

    let Some(pid) = process_id else {
        warn!("Failed to close browser gracefully ({error}) and there's no pid to kill.");
        return;
    };

    info!("Failed to close browser {pid} gracefully ({error}). Killing it.");
    if let Err(error) = kill_process(pid) {
        error!("Failed to kill browser process {pid}: {error}");
    }
}

/// Merge the pool's baseline arguments with the arguments of a single acquire.
///
/// Duplicates are removed, the first occurrence wins and the order is preserved.
pub fn merge_args(baseline: &[String], extra: &[String]) -> Vec<String> {
    let mut merged: Vec<String> = Vec::with_capacity(baseline.len() + extra.len());
    for arg in baseline.iter().chain(extra.iter()) {
        if !merged.contains(arg) {
            merged.push(arg.clone());
        }
    }

    merged
}
