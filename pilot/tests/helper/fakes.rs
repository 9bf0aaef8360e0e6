//! Stand-ins for the browser and for real page automations.
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use pilot::daemon::automation::{Automation, AutomationError, AutomationRegistry, Session};
use pilot::daemon::credentials::Credential;
use pilot::daemon::pool::{Browser, BrowserError, BrowserHandle, Launcher};
use serde_json::{json, Value};
use tokio::sync::watch;

pub struct FakeBrowser {
    closed: AtomicBool,
    sender: watch::Sender<bool>,
}

impl FakeBrowser {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Browser for FakeBrowser {
    /// There's no real process behind this browser, so there's nothing to kill either.
    fn process_id(&self) -> Option<u32> {
        None
    }

    async fn probe(&self) -> Result<(), BrowserError> {
        if self.is_closed() {
            return Err(BrowserError::Disconnected("fake browser is closed".into()));
        }
        Ok(())
    }

    async fn navigate(&self, _url: &str) -> Result<(), BrowserError> {
        Ok(())
    }

    async fn evaluate(&self, _expression: &str) -> Result<Value, BrowserError> {
        Ok(Value::String("complete".into()))
    }

    async fn page_text(&self) -> Result<String, BrowserError> {
        Ok("A fake page".into())
    }

    async fn screenshot(&self) -> Result<Vec<u8>, BrowserError> {
        Ok(vec![0x89, b'P', b'N', b'G'])
    }

    async fn set_cookies(&self, _cookies: &[Credential]) -> Result<(), BrowserError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), BrowserError> {
        self.closed.store(true, Ordering::SeqCst);
        self.sender.send_replace(true);
        Ok(())
    }

    fn disconnected(&self) -> watch::Receiver<bool> {
        self.sender.subscribe()
    }
}

/// Hands out [FakeBrowser]s and remembers all of them.
#[derive(Default)]
pub struct FakeLauncher {
    launched: Mutex<Vec<Arc<FakeBrowser>>>,
}

impl FakeLauncher {
    pub fn launch_count(&self) -> usize {
        self.launched.lock().unwrap().len()
    }

    pub fn browser(&self, index: usize) -> Arc<FakeBrowser> {
        self.launched.lock().unwrap()[index].clone()
    }
}

#[async_trait]
impl Launcher for FakeLauncher {
    async fn launch(&self, _args: &[String]) -> Result<BrowserHandle, BrowserError> {
        let (sender, _) = watch::channel(false);
        let browser = Arc::new(FakeBrowser {
            closed: AtomicBool::new(false),
            sender,
        });
        self.launched.lock().unwrap().push(browser.clone());

        Ok(browser)
    }
}

/// Takes a screenshot and returns its input.
#[derive(Default)]
pub struct Succeed {
    pub calls: AtomicUsize,
}

#[async_trait]
impl Automation for Succeed {
    async fn run(&self, session: &Session) -> Result<Value, AutomationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        session.stage("working");
        session.screenshot("done").await?;

        Ok(json!({
            "label": session.input.label,
            "url": session.input.target_url,
        }))
    }
}

/// Fails with a generic error.
pub struct Fail;

#[async_trait]
impl Automation for Fail {
    async fn run(&self, _session: &Session) -> Result<Value, AutomationError> {
        Err(AutomationError::Other("The page exploded".into()))
    }
}

/// Never finishes on its own. Only a stop gets rid of it.
pub struct Block;

#[async_trait]
impl Automation for Block {
    async fn run(&self, session: &Session) -> Result<Value, AutomationError> {
        session.stage("blocking");
        std::future::pending().await
    }
}

/// All fakes a test daemon might need.
pub struct Fakes {
    pub launcher: Arc<FakeLauncher>,
    pub succeed: Arc<Succeed>,
}

impl Fakes {
    pub fn new() -> Self {
        Fakes {
            launcher: Arc::new(FakeLauncher::default()),
            succeed: Arc::new(Succeed::default()),
        }
    }

    /// The automations of a test daemon: `succeed`, `fail` and `block`.
    pub fn registry(&self) -> AutomationRegistry {
        let mut registry = AutomationRegistry::new();
        registry.register("succeed", self.succeed.clone());
        registry.register("fail", Arc::new(Fail));
        registry.register("block", Arc::new(Block));
        registry
    }
}
