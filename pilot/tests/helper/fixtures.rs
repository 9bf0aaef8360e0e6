use std::env::temp_dir;
use std::fs::canonicalize;
use std::sync::Arc;

use pilot::daemon::credentials::NoCredentials;
use pilot::daemon::persistence::FileStore;
use pilot::daemon::{run_with, Collaborators};
use pilot_lib::settings::*;
use tempfile::{Builder, TempDir};
use tokio::task::JoinHandle;

use super::*;
use crate::internal_prelude::*;

/// All info about a booted test daemon.
/// This daemon is executed in the same async environment as the rest of the test.
pub struct PilotDaemon {
    pub settings: Settings,
    pub tempdir: TempDir,
    pub fakes: Fakes,
    // The async join handle of the daemon function.
    pub join_handle: JoinHandle<Result<()>>,
}

/// A helper function which creates some test config, sets up a temporary directory and spawns
/// a daemon into the async tokio runtime.
pub async fn daemon() -> Result<PilotDaemon> {
    let (settings, tempdir) = daemon_base_setup()?;
    daemon_with_settings(settings, tempdir).await
}

/// Spawn a daemon with fake collaborators and wait until its socket shows up.
pub async fn daemon_with_settings(settings: Settings, tempdir: TempDir) -> Result<PilotDaemon> {
    let fakes = Fakes::new();
    let persistence = FileStore::new(
        settings.shared.tasks_directory(),
        settings.shared.screenshots_directory(),
    )?;
    let collaborators = Collaborators {
        launcher: fakes.launcher.clone(),
        persistence: Arc::new(persistence),
        credentials: Arc::new(NoCredentials),
        automations: fakes.registry(),
    };

    let join_handle = tokio::spawn(run_with(settings.clone(), collaborators, true));

    let sleep = 50;
    let tries = TIMEOUT / sleep;
    let socket_path = settings.shared.unix_socket_path();
    for _ in 0..tries {
        sleep_ms(sleep).await;
        if join_handle.is_finished() {
            bail!("Daemon stopped while booting");
        }
        if socket_path.exists() {
            return Ok(PilotDaemon {
                settings,
                tempdir,
                fakes,
                join_handle,
            });
        }
    }

    bail!("Daemon didn't boot after {TIMEOUT}ms")
}

/// This is the base setup for all daemon test setups.
///
/// Everything lives in a fresh temporary directory. The proxy is disabled and all delays are
/// short, so tests don't have to wait for long.
pub fn daemon_base_setup() -> Result<(Settings, TempDir)> {
    // The path is canonicalized to ensure test consistency across platforms.
    let tempdir = Builder::new()
        .prefix("pilot-")
        .tempdir_in(canonicalize(temp_dir())?)?;
    let tempdir_path = tempdir.path();

    let shared = Shared {
        pilot_directory: Some(tempdir_path.to_path_buf()),
        runtime_directory: Some(tempdir_path.to_path_buf()),
        ..Default::default()
    };
    let proxy = Proxy {
        enabled: false,
        ..Default::default()
    };
    let runner = Runner {
        retry_backoff: 10,
        chain_delay: 0,
        ..Default::default()
    };

    let settings = Settings {
        shared,
        proxy,
        runner,
        ..Default::default()
    };

    settings
        .save(&Some(tempdir_path.join("pilot.yml")))
        .context("Couldn't write pilot config to temporary directory")?;

    Ok((settings, tempdir))
}
