use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{Automation, AutomationError, Session};
use crate::daemon::poll::{CheckError, PollOutcome};

pub const KIND: &str = "snapshot";

/// Opens `target_url`, waits for the page to finish loading and captures it.
///
/// Recognized parameters:
/// - `login_marker`: if the loaded page contains this text, the credentials are considered
///   expired.
/// - `wait_for`: only finish once the page contains this text.
pub struct Snapshot {
    pub load_timeout: Duration,
    pub interval: Duration,
}

impl Default for Snapshot {
    fn default() -> Self {
        Snapshot {
            load_timeout: Duration::from_secs(30),
            interval: Duration::from_millis(500),
        }
    }
}

#[async_trait]
impl Automation for Snapshot {
    async fn run(&self, session: &Session) -> Result<Value, AutomationError> {
        let Some(url) = session.input.target_url.clone() else {
            return Err(AutomationError::Other("The task has no target url".into()));
        };

        if !session.credentials.is_empty() {
            session.stage("applying credentials");
            session.browser.set_cookies(&session.credentials).await?;
        }

        session.stage("loading page");
        session.navigate(&url).await?;

        let browser = session.browser.clone();
        let loaded = session
            .poll("page load", self.load_timeout, self.interval, || {
                let browser = browser.clone();
                async move {
                    let state = browser
                        .evaluate("document.readyState")
                        .await
                        .map_err(CheckError::from)?;
                    Ok((state.as_str() == Some("complete")).then_some(()))
                }
            })
            .await;
        match loaded {
            PollOutcome::Ready(()) => (),
            PollOutcome::TimedOut => {
                return Err(AutomationError::TransientNavigation(format!(
                    "{url} didn't finish loading within {:?}",
                    self.load_timeout
                )))
            }
            PollOutcome::Fatal(message) | PollOutcome::TooManyErrors(message) => {
                return Err(AutomationError::Other(message))
            }
        }

        let mut text = session.browser.page_text().await?;
        if let Some(marker) = session.input.params.get("login_marker") {
            if text.contains(marker.as_str()) {
                session.screenshot("login page").await?;
                return Err(AutomationError::Credential(format!(
                    "{url} shows the login page"
                )));
            }
        }

        if let Some(expected) = session.input.params.get("wait_for").cloned() {
            session.stage("waiting for content");
            let browser = session.browser.clone();
            let found = session
                .poll("expected content", self.load_timeout, self.interval, || {
                    let browser = browser.clone();
                    let expected = expected.clone();
                    async move {
                        let text = browser.page_text().await.map_err(CheckError::from)?;
                        Ok(text.contains(expected.as_str()).then_some(text))
                    }
                })
                .await;
            text = match found {
                PollOutcome::Ready(text) => text,
                PollOutcome::TimedOut => {
                    return Err(AutomationError::Other(format!(
                        "'{expected}' never showed up on {url}"
                    )))
                }
                PollOutcome::Fatal(message) | PollOutcome::TooManyErrors(message) => {
                    return Err(AutomationError::Other(message))
                }
            };
        }

        session.stage("capturing");
        let screenshot = session.screenshot("loaded").await?;
        let title = session
            .browser
            .evaluate("document.title")
            .await
            .ok()
            .and_then(|title| title.as_str().map(ToString::to_string))
            .unwrap_or_default();

        Ok(json!({
            "url": url,
            "title": title,
            "text_length": text.chars().count(),
            "screenshot": screenshot,
        }))
    }
}
