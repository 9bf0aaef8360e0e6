use std::fs::create_dir_all;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use pilot_lib::network::socket::{get_listener, socket_cleanup};
use pilot_lib::settings::expand_home;
use pilot_lib::{Error, Settings, TaskStatus};
use tokio::sync::Notify;

use crate::daemon::automation::AutomationRegistry;
use crate::daemon::context::Context;
use crate::daemon::credentials::{CredentialSource, JsonCredentials, NoCredentials};
use crate::daemon::internal_state::state::InternalState;
use crate::daemon::internal_state::store::TaskStore;
use crate::daemon::network::socket::accept_incoming;
use crate::daemon::persistence::{FileStore, Persistence};
use crate::daemon::pool::chrome::ChromeLauncher;
use crate::daemon::pool::{Launcher, PoolConfig, ResourcePool};
use crate::internal_prelude::*;

pub mod automation;
pub mod cli;
pub mod context;
pub mod credentials;
/// The daemon's state representation that contains data not exposed to clients.
pub mod internal_state;
mod network;
pub mod persistence;
mod pid;
pub mod poll;
pub mod pool;
pub mod proxy;
pub mod task_handler;

/// The external collaborators of the daemon.
/// Integration tests swap them out for fakes.
pub struct Collaborators {
    pub launcher: Arc<dyn Launcher>,
    pub persistence: Arc<dyn Persistence>,
    pub credentials: Arc<dyn CredentialSource>,
    pub automations: AutomationRegistry,
}

/// The main entry point for the daemon logic.
/// It's basically the `main`, but publicly exported as a library.
/// That way we can properly do integration testing for the daemon.
///
/// For the purpose of testing, some things shouldn't be run during tests.
/// There are some global operations that crash during tests, such as the ctrlc handler.
/// This is due to the fact, that tests in the same file are executed in multiple threads.
/// Since the threads own the same global space, this would crash.
pub async fn run(config_path: Option<PathBuf>, profile: Option<String>, test: bool) -> Result<()> {
    // Try to read settings from the configuration file.
    let (mut settings, config_found) =
        Settings::read(&config_path).wrap_err("Error while reading configuration.")?;

    // We couldn't find a configuration file.
    // This probably means that pilot has been started for the first time and we have to create a
    // default config file once.
    if !config_found {
        if let Err(error) = settings.save(&config_path) {
            bail!("Failed saving config file: {error:?}.");
        }
    };

    // Load any requested profile.
    if let Some(profile) = &profile {
        settings.load_profile(profile)?;
    }

    init_directories(&settings)?;

    let persistence = FileStore::new(
        settings.shared.tasks_directory(),
        settings.shared.screenshots_directory(),
    )
    .wrap_err("Failed to initialize task storage.")?;
    let credentials: Arc<dyn CredentialSource> = match &settings.runner.credentials_file {
        Some(path) => Arc::new(JsonCredentials {
            path: expand_home(path),
        }),
        None => Arc::new(NoCredentials),
    };
    let launcher = ChromeLauncher {
        executable: settings.pool.executable.clone(),
        user_data_dir: settings.pool.user_data_dir(&settings.shared),
        launch_timeout: settings.pool.launch_timeout(),
    };

    let collaborators = Collaborators {
        launcher: Arc::new(launcher),
        persistence: Arc::new(persistence),
        credentials,
        automations: AutomationRegistry::with_builtin(),
    };

    run_with(settings, collaborators, test).await
}

/// Run the daemon with the given settings and collaborators until it's told to shut down.
pub async fn run_with(settings: Settings, collaborators: Collaborators, test: bool) -> Result<()> {
    init_directories(&settings)?;
    pid::create_pid_file(&settings.shared.pid_path()).wrap_err("Failed to create pid file.")?;

    let listener = match get_listener(&settings.shared).await {
        Ok(listener) => listener,
        Err(error) => {
            // The socket might belong to another daemon, so only our pid file is removed.
            pid::cleanup_pid_file(&settings.shared.pid_path())?;
            return Err(error).wrap_err("Failed to listen on the daemon socket.");
        }
    };

    // Tasks that were running when the previous daemon went away can't be continued.
    let state = Arc::new(Mutex::new(InternalState::new()));
    let store = TaskStore::new(state.clone(), collaborators.persistence);
    if let Err(error) = store.restore() {
        warn!("Failed to restore previous state:\n {error:?}");
    }

    let routes = Arc::new(RwLock::new(settings.proxy.route_table()));
    let proxy = if settings.proxy.enabled {
        proxy::start(
            &settings.proxy.listen,
            routes.clone(),
            settings.proxy.connect_timeout(),
        )
        .await?
    } else {
        None
    };

    let ctx = Context {
        pool: ResourcePool::new(collaborators.launcher, PoolConfig::from_settings(&settings)),
        settings: settings.clone(),
        state,
        store,
        credentials: collaborators.credentials,
        automations: Arc::new(collaborators.automations),
        routes,
        shutdown: Arc::new(Notify::new()),
    };

    // Don't set ctrlc and panic handlers during testing.
    // This is necessary for multithreaded integration testing, since multiple listener per process
    // aren't allowed. On top of this, ctrlc also somehow breaks test error output.
    if !test {
        setup_signal_panic_handling(&settings, ctx.shutdown.clone())?;
    }

    spawn_pending_tasks(&ctx)?;

    let result = tokio::select! {
        result = accept_incoming(listener, ctx.clone()) => result,
        _ = ctx.shutdown.notified() => Ok(()),
    };

    info!("Shutting down");
    task_handler::shutdown(&ctx).await;
    if let Some(proxy) = proxy {
        proxy.shutdown();
    }
    cleanup(&settings);

    result
}

/// Hand all tasks that are still pending from a previous session to new runners.
fn spawn_pending_tasks(ctx: &Context) -> Result<()> {
    let state = ctx.store.list()?;
    let pending = state.filter_tasks(|task| task.status == TaskStatus::Pending, None);
    for task_id in pending.matching_ids {
        let Some(task) = state.tasks.get(&task_id) else {
            continue;
        };
        info!("Picking up pending task {task_id}");
        task_handler::spawn(ctx, task, task.current_index);
    }

    Ok(())
}

/// Initialize all directories needed for normal operation.
fn init_directories(settings: &Settings) -> Result<()> {
    for (directory, purpose) in [
        (settings.shared.pilot_directory(), "creating main directory"),
        (
            settings.shared.runtime_directory(),
            "creating runtime directory",
        ),
    ] {
        create_directory(&directory, purpose)?;
    }

    Ok(())
}

fn create_directory(directory: &Path, purpose: &'static str) -> Result<(), Error> {
    if !directory.exists() {
        create_dir_all(directory)
            .map_err(|err| Error::IoPathError(directory.to_path_buf(), purpose, err))?;
    }

    Ok(())
}

/// Remove the unix socket and the pid file.
fn cleanup(settings: &Settings) {
    if let Err(error) = socket_cleanup(&settings.shared) {
        error!("Failed to cleanup socket during shutdown: {error}");
    }

    if let Err(error) = pid::cleanup_pid_file(&settings.shared.pid_path()) {
        error!("Failed to cleanup pid during shutdown: {error}");
    }
}

/// Setup signal handling and panic handling.
///
/// On SIGINT and SIGTERM, we exit gracefully by notifying the main loop, which stops all running
/// tasks and closes the browser pool. This is to prevent dangling browser processes.
///
/// On panic, we want to cleanup existing unix sockets and the pid file.
fn setup_signal_panic_handling(settings: &Settings, shutdown: Arc<Notify>) -> Result<()> {
    ctrlc::set_handler(move || {
        shutdown.notify_one();
    })?;

    // Try to do some final cleanup, even if we panic.
    let settings_clone = settings.clone();
    let orig_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        // invoke the default handler and exit the process
        orig_hook(panic_info);

        // Cleanup the pid file
        if let Err(error) = pid::cleanup_pid_file(&settings_clone.shared.pid_path()) {
            eprintln!("Failed to cleanup pid after panic.");
            eprintln!("{error}");
        }

        // Remove the unix socket.
        if let Err(error) = socket_cleanup(&settings_clone.shared) {
            eprintln!("Failed to cleanup socket after panic.");
            eprintln!("{error}");
        }

        std::process::exit(1);
    }));

    Ok(())
}
