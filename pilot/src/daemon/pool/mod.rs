//! The resource pool.
//!
//! Starting a browser is expensive, so the daemon keeps exactly one around and hands it to
//! one task at a time. A released browser is kept warm until it's been idle for too long or
//! until it reached its maximum age.
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use pilot_lib::network::message::PoolStatus;
use pilot_lib::Settings;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};

use crate::daemon::poll::{poll, CheckError, PollOutcome};
use crate::internal_prelude::*;

mod browser;
pub mod chrome;

pub use browser::*;

/// The pool remembers this many visited destinations for diagnostics.
const VISITED_HISTORY: usize = 50;
/// The pool remembers the ids of this many tasks for diagnostics.
const TASK_HISTORY: usize = 20;
/// A cached browser has to answer a probe within this time to be reused.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(thiserror::Error, Debug)]
pub enum PoolError {
    #[error("Timed out after {0:?} while waiting for the browser to become available")]
    Busy(Duration),

    #[error(transparent)]
    Browser(#[from] BrowserError),
}

#[derive(Clone, Debug)]
pub struct PoolConfig {
    /// Arguments every browser is started with.
    pub baseline_args: Vec<String>,
    pub idle_timeout: Duration,
    pub max_age: Duration,
    /// How long `acquire` waits for an occupied pool.
    pub acquire_timeout: Duration,
    /// How often an occupied pool is checked while waiting.
    pub wait_interval: Duration,
}

impl PoolConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        let mut baseline_args = settings.pool.baseline_args.clone();
        if settings.pool.headless {
            baseline_args.push("--headless=new".to_string());
        }
        if settings.proxy.enabled {
            baseline_args.push(format!("--proxy-server=http://{}", settings.proxy.listen));
        }

        PoolConfig {
            baseline_args,
            idle_timeout: settings.pool.idle_timeout(),
            max_age: settings.pool.max_age(),
            acquire_timeout: settings.pool.acquire_timeout(),
            wait_interval: Duration::from_millis(250),
        }
    }
}

/// A browser that has been handed out by [ResourcePool::acquire].
#[derive(Clone)]
pub struct Acquired {
    pub handle: BrowserHandle,
    pub process_id: Option<u32>,
    /// Whether an already running browser has been reused.
    pub was_cached: bool,
}

struct Entry {
    handle: BrowserHandle,
    process_id: Option<u32>,
    created_at: Instant,
    last_used_at: Instant,
    in_use: bool,
    /// Used to tell whether an async callback still refers to the tracked browser.
    generation: u64,
}

/// The bits of an [Entry] that are needed outside of the lock.
struct Snapshot {
    handle: BrowserHandle,
    process_id: Option<u32>,
    created_at: Instant,
    generation: u64,
}

#[derive(Default)]
struct PoolState {
    entry: Option<Entry>,
    /// Some task holds the slot. It might still be constructing its browser.
    claimed: bool,
    idle_timer: Option<JoinHandle<()>>,
    next_generation: u64,
    visited: VecDeque<String>,
    recent_tasks: VecDeque<String>,
}

impl PoolState {
    fn cancel_idle_timer(&mut self) {
        if let Some(timer) = self.idle_timer.take() {
            timer.abort();
        }
    }
}

/// A single slot pool of browser instances.
///
/// The pool is cheap to clone. All clones share the same slot.
#[derive(Clone)]
pub struct ResourcePool {
    launcher: Arc<dyn Launcher>,
    config: Arc<PoolConfig>,
    state: Arc<Mutex<PoolState>>,
}

impl ResourcePool {
    pub fn new(launcher: Arc<dyn Launcher>, config: PoolConfig) -> Self {
        ResourcePool {
            launcher,
            config: Arc::new(config),
            state: Arc::new(Mutex::new(PoolState::default())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get exclusive access to the pool's browser.
    ///
    /// If another task holds the browser, this waits until it has been released.
    /// A cached browser is reused, if it's younger than the max age and answers a probe.
    /// Otherwise a new one is started with the baseline arguments and `extra_args`.
    pub async fn acquire(
        &self,
        task_id: &str,
        extra_args: &[String],
    ) -> Result<Acquired, PoolError> {
        let outcome = poll(
            "browser pool slot",
            self.config.acquire_timeout,
            self.config.wait_interval,
            || {
                let claimed = self.try_claim();
                async move { Ok::<_, CheckError>(claimed) }
            },
        )
        .await;
        let cached = match outcome {
            PollOutcome::Ready(cached) => cached,
            _ => return Err(PoolError::Busy(self.config.acquire_timeout)),
        };

        self.record_task(task_id);

        if let Some(snapshot) = cached {
            if snapshot.created_at.elapsed() >= self.config.max_age {
                info!(
                    "Browser {:?} exceeded its max age of {:?}. Replacing it.",
                    snapshot.process_id, self.config.max_age
                );
                self.discard_entry(snapshot.generation).await;
            } else {
                match timeout(PROBE_TIMEOUT, snapshot.handle.probe()).await {
                    Ok(Ok(())) => {
                        if self.touch(snapshot.generation) {
                            debug!("Reusing browser {:?} for {task_id}", snapshot.process_id);
                            return Ok(Acquired {
                                handle: snapshot.handle,
                                process_id: snapshot.process_id,
                                was_cached: true,
                            });
                        }
                    }
                    Ok(Err(error)) => info!("Cached browser failed its probe: {error}"),
                    Err(_) => info!("Cached browser didn't answer its probe in time"),
                }
                self.discard_entry(snapshot.generation).await;
            }
        }

        self.construct(extra_args).await
    }

    /// Claim the slot, if it's free.
    /// Returns a snapshot of the cached browser, if there's one.
    fn try_claim(&self) -> Option<Option<Snapshot>> {
        let mut state = self.lock();
        if state.claimed {
            return None;
        }
        state.claimed = true;
        state.cancel_idle_timer();

        let snapshot = state.entry.as_mut().map(|entry| {
            entry.in_use = true;
            Snapshot {
                handle: entry.handle.clone(),
                process_id: entry.process_id,
                created_at: entry.created_at,
                generation: entry.generation,
            }
        });

        Some(snapshot)
    }

    /// Mark the tracked browser as used right now.
    /// Returns `false` if the browser is no longer tracked.
    fn touch(&self, generation: u64) -> bool {
        let mut state = self.lock();
        match state.entry.as_mut() {
            Some(entry) if entry.generation == generation => {
                entry.last_used_at = Instant::now();
                true
            }
            _ => false,
        }
    }

    async fn construct(&self, extra_args: &[String]) -> Result<Acquired, PoolError> {
        let args = merge_args(&self.config.baseline_args, extra_args);
        let handle = match self.launcher.launch(&args).await {
            Ok(handle) => handle,
            Err(error) => {
                error!("Failed to start browser: {error}");
                self.lock().claimed = false;
                return Err(error.into());
            }
        };
        let process_id = handle.process_id();
        info!("Started new browser {process_id:?}");

        let generation = {
            let mut state = self.lock();
            let generation = state.next_generation;
            state.next_generation += 1;
            let now = Instant::now();
            state.entry = Some(Entry {
                handle: handle.clone(),
                process_id,
                created_at: now,
                last_used_at: now,
                in_use: true,
                generation,
            });
            generation
        };
        self.observe_disconnect(handle.clone(), generation);

        Ok(Acquired {
            handle,
            process_id,
            was_cached: false,
        })
    }

    /// Drop the entry from the pool as soon as its browser goes away.
    fn observe_disconnect(&self, handle: BrowserHandle, generation: u64) {
        let state = self.state.clone();
        tokio::spawn(async move {
            wait_for_disconnect(&handle).await;
            let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
            if matches!(&state.entry, Some(entry) if entry.generation == generation) {
                info!("Browser {:?} disconnected. Dropping it.", handle.process_id());
                state.entry = None;
                state.cancel_idle_timer();
            }
        });
    }

    /// Remove the entry with the given generation from the pool and shut it down.
    async fn discard_entry(&self, generation: u64) {
        let entry = {
            let mut state = self.lock();
            match &state.entry {
                Some(entry) if entry.generation == generation => state.entry.take(),
                _ => None,
            }
        };

        if let Some(entry) = entry {
            terminate(&entry.handle, entry.process_id).await;
        }
    }

    /// Give the browser back to the pool.
    ///
    /// The browser is closed, once it's been idle for the configured timeout.
    /// Releasing rearms that timer.
    pub fn release(&self) {
        let mut state = self.lock();
        state.claimed = false;
        state.cancel_idle_timer();

        let Some(entry) = state.entry.as_mut() else {
            return;
        };
        entry.in_use = false;
        entry.last_used_at = Instant::now();
        let generation = entry.generation;

        let pool = self.clone();
        let idle_timeout = self.config.idle_timeout;
        state.idle_timer = Some(tokio::spawn(async move {
            sleep(idle_timeout).await;
            pool.evict_idle(generation).await;
        }));
    }

    async fn evict_idle(&self, generation: u64) {
        let entry = {
            let mut state = self.lock();
            match &state.entry {
                Some(entry) if entry.generation == generation && !state.claimed => {
                    // We are the timer, there's nothing to abort.
                    state.idle_timer = None;
                    state.entry.take()
                }
                _ => None,
            }
        };

        if let Some(entry) = entry {
            info!("Browser {:?} has been idle for too long. Closing it.", entry.process_id);
            terminate(&entry.handle, entry.process_id).await;
        }
    }

    /// Shut down the current browser and free the slot, but keep the history.
    ///
    /// Used by a slot holder that's done with a broken browser.
    pub async fn discard(&self) {
        let entry = {
            let mut state = self.lock();
            state.claimed = false;
            state.cancel_idle_timer();
            state.entry.take()
        };

        if let Some(entry) = entry {
            terminate(&entry.handle, entry.process_id).await;
        }
    }

    /// Shut down the browser, free the slot and forget all history.
    pub async fn close(&self) {
        let entry = {
            let mut state = self.lock();
            state.claimed = false;
            state.cancel_idle_timer();
            state.visited.clear();
            state.recent_tasks.clear();
            state.entry.take()
        };

        if let Some(entry) = entry {
            info!("Closing browser {:?}", entry.process_id);
            terminate(&entry.handle, entry.process_id).await;
        }
    }

    /// Stop tracking the browser with the given process id.
    ///
    /// This is called when somebody else tears down that browser, so it's never handed out
    /// again. The slot itself stays claimed until its holder releases it.
    pub fn invalidate(&self, process_id: u32) -> bool {
        let mut state = self.lock();
        if !matches!(&state.entry, Some(entry) if entry.process_id == Some(process_id)) {
            return false;
        }
        debug!("Invalidating browser {process_id}");
        state.entry = None;
        state.cancel_idle_timer();

        true
    }

    /// Remember a destination that has been visited with the pool's browser.
    pub fn record_visit(&self, destination: &str) {
        let mut state = self.lock();
        state.visited.push_back(destination.to_string());
        while state.visited.len() > VISITED_HISTORY {
            state.visited.pop_front();
        }
    }

    fn record_task(&self, task_id: &str) {
        let mut state = self.lock();
        state.recent_tasks.push_back(task_id.to_string());
        while state.recent_tasks.len() > TASK_HISTORY {
            state.recent_tasks.pop_front();
        }
    }

    pub fn status(&self) -> PoolStatus {
        let state = self.lock();
        let entry = state.entry.as_ref();

        PoolStatus {
            has_instance: entry.is_some(),
            in_use: state.claimed,
            process_id: entry.and_then(|entry| entry.process_id),
            age_ms: entry.map(|entry| entry.created_at.elapsed().as_millis() as u64),
            idle_ms: entry
                .filter(|entry| !entry.in_use)
                .map(|entry| entry.last_used_at.elapsed().as_millis() as u64),
            recent_destinations: state.visited.iter().cloned().collect(),
            recent_tasks: state.recent_tasks.iter().cloned().collect(),
        }
    }
}
