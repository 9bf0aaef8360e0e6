//! The real browser: a chrome/chromium process driven via the devtools protocol.
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::network::{CookieParam, TimeSinceEpoch};
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::{Browser as CdpBrowser, Page};
use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{ChildStderr, Command};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use super::browser::{Browser, BrowserError, BrowserHandle, Launcher};
use crate::daemon::credentials::Credential;
use crate::internal_prelude::*;
use crate::process_helper::process_exists;

/// Launches chrome processes and connects to them.
pub struct ChromeLauncher {
    pub executable: String,
    pub user_data_dir: PathBuf,
    pub launch_timeout: Duration,
}

#[async_trait]
impl Launcher for ChromeLauncher {
    async fn launch(&self, args: &[String]) -> Result<BrowserHandle, BrowserError> {
        let mut command = Command::new(&self.executable);
        command
            .args(args)
            .arg("--remote-debugging-port=0")
            .arg(format!("--user-data-dir={}", self.user_data_dir.display()))
            .arg("about:blank")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Make the browser the leader of its own process group.
        // That way all of its helper processes can be killed at once.
        #[cfg(unix)]
        command.process_group(0);

        debug!("Starting browser: {} {args:?}", self.executable);
        let mut child = command
            .spawn()
            .map_err(|err| BrowserError::Launch(format!("{}: {err}", self.executable)))?;
        let pid = child.id();

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| BrowserError::Launch("browser process has no stderr".into()))?;
        let ws_url = tokio::time::timeout(self.launch_timeout, read_ws_url(stderr))
            .await
            .map_err(|_| {
                BrowserError::Launch("timed out waiting for the devtools websocket url".into())
            })??;
        debug!("Browser {pid:?} exposes devtools at {ws_url}");

        let (browser, mut handler) = CdpBrowser::connect(ws_url)
            .await
            .map_err(|err| BrowserError::Launch(format!("connecting to devtools: {err}")))?;

        let (sender, receiver) = watch::channel(false);
        let sender = Arc::new(sender);

        // The handler drives the devtools connection. Once it ends, the browser is gone.
        let handler_sender = sender.clone();
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(error) = event {
                    debug!("Devtools connection error: {error}");
                }
            }
            handler_sender.send_replace(true);
        });

        // Reap the process and flag the disconnect, if it dies on its own.
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => debug!("Browser {pid:?} exited with {status}"),
                Err(error) => warn!("Failed to wait for browser {pid:?}: {error}"),
            }
            sender.send_replace(true);
        });

        Ok(Arc::new(ChromeBrowser {
            browser: Mutex::new(browser),
            page: Mutex::new(None),
            pid,
            disconnected: receiver,
            handler_task,
        }))
    }
}

/// Read the browser's stderr until it announces its devtools endpoint.
/// The rest of stderr is drained in the background, so the pipe never fills up.
async fn read_ws_url(stderr: ChildStderr) -> Result<String, BrowserError> {
    let mut lines = BufReader::new(stderr).lines();
    let mut captured = Vec::new();

    loop {
        let line = lines
            .next_line()
            .await
            .map_err(|err| BrowserError::Launch(format!("reading browser output: {err}")))?;
        let Some(line) = line else {
            return Err(BrowserError::Launch(format!(
                "browser exited before exposing its devtools url. Output: {}",
                captured.join(" | ")
            )));
        };

        if let Some((_, url)) = line.rsplit_once("listening on ") {
            let url = url.trim();
            if url.starts_with("ws") {
                let url = url.to_string();
                tokio::spawn(async move {
                    while let Ok(Some(line)) = lines.next_line().await {
                        trace!("browser: {line}");
                    }
                });
                return Ok(url);
            }
        }

        if captured.len() < 8 {
            captured.push(line);
        }
    }
}

pub struct ChromeBrowser {
    browser: Mutex<CdpBrowser>,
    page: Mutex<Option<Page>>,
    pid: Option<u32>,
    disconnected: watch::Receiver<bool>,
    handler_task: JoinHandle<()>,
}

impl ChromeBrowser {
    fn protocol_error<E: std::fmt::Display>(&self, error: E) -> BrowserError {
        if *self.disconnected.borrow() {
            BrowserError::Disconnected(error.to_string())
        } else {
            BrowserError::from_protocol(error)
        }
    }

    /// Get the active page. A new one is opened, if there's none yet.
    async fn page(&self) -> Result<Page, BrowserError> {
        let mut page = self.page.lock().await;
        if let Some(page) = page.as_ref() {
            return Ok(page.clone());
        }

        let browser = self.browser.lock().await;
        let pages = browser.pages().await.map_err(|err| self.protocol_error(err))?;
        let active = match pages.into_iter().next() {
            Some(existing) => existing,
            None => browser
                .new_page("about:blank")
                .await
                .map_err(|err| self.protocol_error(err))?,
        };
        *page = Some(active.clone());

        Ok(active)
    }
}

#[async_trait]
impl Browser for ChromeBrowser {
    fn process_id(&self) -> Option<u32> {
        self.pid
    }

    async fn probe(&self) -> Result<(), BrowserError> {
        if *self.disconnected.borrow() {
            return Err(BrowserError::Disconnected("connection is gone".into()));
        }
        let browser = self.browser.lock().await;
        browser
            .version()
            .await
            .map_err(|err| self.protocol_error(err))?;

        Ok(())
    }

    async fn navigate(&self, url: &str) -> Result<(), BrowserError> {
        let page = self.page().await?;
        page.goto(url).await.map_err(|err| {
            if *self.disconnected.borrow() {
                BrowserError::Disconnected(err.to_string())
            } else {
                BrowserError::Navigation(url.to_string(), err.to_string())
            }
        })?;

        Ok(())
    }

    async fn evaluate(&self, expression: &str) -> Result<serde_json::Value, BrowserError> {
        let page = self.page().await?;
        let result = page
            .evaluate(expression)
            .await
            .map_err(|err| self.protocol_error(err))?;

        result
            .into_value::<serde_json::Value>()
            .map_err(|err| BrowserError::Protocol(format!("unexpected evaluation result: {err}")))
    }

    async fn page_text(&self) -> Result<String, BrowserError> {
        let value = self
            .evaluate("document.body ? document.body.innerText : ''")
            .await?;

        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn screenshot(&self) -> Result<Vec<u8>, BrowserError> {
        let page = self.page().await?;
        let params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .full_page(true)
            .build();

        page.screenshot(params)
            .await
            .map_err(|err| self.protocol_error(err))
    }

    async fn set_cookies(&self, cookies: &[Credential]) -> Result<(), BrowserError> {
        let mut params = Vec::with_capacity(cookies.len());
        for cookie in cookies {
            let mut builder = CookieParam::builder()
                .name(cookie.name.clone())
                .value(cookie.value.clone())
                .domain(cookie.domain.clone())
                .path(cookie.path.clone())
                .secure(cookie.secure)
                .http_only(cookie.http_only);
            if let Some(expiry) = cookie.expiry {
                builder = builder.expires(TimeSinceEpoch::new(expiry));
            }
            let param = builder.build().map_err(|err| {
                BrowserError::Protocol(format!("invalid cookie {}: {err}", cookie.name))
            })?;
            params.push(param);
        }

        let page = self.page().await?;
        page.set_cookies(params)
            .await
            .map_err(|err| self.protocol_error(err))?;

        Ok(())
    }

    async fn close(&self) -> Result<(), BrowserError> {
        if *self.disconnected.borrow() {
            return check_process_gone(self.pid);
        }

        let mut browser = self.browser.lock().await;
        browser
            .close()
            .await
            .map_err(|err| self.protocol_error(err))?;

        Ok(())
    }

    fn disconnected(&self) -> watch::Receiver<bool> {
        self.disconnected.clone()
    }
}

/// The devtools connection is gone, so there's nothing left to close gracefully.
/// That's only fine, if the process is gone as well. Otherwise it has to be killed.
fn check_process_gone(pid: Option<u32>) -> Result<(), BrowserError> {
    match pid {
        Some(pid) if process_exists(pid) => Err(BrowserError::Disconnected(format!(
            "devtools connection is gone, but process {pid} is still running"
        ))),
        _ => Ok(()),
    }
}

impl Drop for ChromeBrowser {
    fn drop(&mut self) {
        self.handler_task.abort();
    }
}
