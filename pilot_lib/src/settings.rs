use std::collections::HashMap;
use std::fs::{create_dir_all, File};
use std::io::{prelude::*, BufReader};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use shellexpand::tilde;

use crate::error::Error;
use crate::internal_prelude::*;
use crate::route::{RouteTable, TunnelEndpoint};
use crate::setting_defaults::*;

/// The environment variable that can be set to overwrite pilot's config path.
pub const PILOT_CONFIG_PATH_ENV: &str = "PILOT_CONFIG_PATH";

/// All settings which are used by both, the client and the daemon
#[derive(PartialEq, Eq, Clone, Debug, Deserialize, Serialize)]
pub struct Shared {
    /// Don't access this property directly, but rather use the getter with the same name.
    /// It's only public to allow proper integration testing.
    ///
    /// The directory that is used for all of pilot's state. \
    /// I.e. task records, screenshots, browser profiles.
    pub pilot_directory: Option<PathBuf>,
    /// Don't access this property directly, but rather use the getter with the same name.
    /// It's only public to allow proper integration testing.
    ///
    /// The location where runtime related files will be placed.
    /// Defaults to `pilot_directory` unless `$XDG_RUNTIME_DIR` is set.
    pub runtime_directory: Option<PathBuf>,

    /// If this is set to true, unix sockets will be used.
    /// Otherwise we listen on a local TCP port.
    #[cfg(not(target_os = "windows"))]
    #[serde(default = "default_true")]
    pub use_unix_socket: bool,
    /// Don't access this property directly, but rather use the getter with the same name.
    ///
    /// The path to the unix socket.
    #[cfg(not(target_os = "windows"))]
    pub unix_socket_path: Option<PathBuf>,

    /// The TCP hostname/ip address.
    #[serde(default = "default_host")]
    pub host: String,
    /// The TCP port.
    #[serde(default = "default_port")]
    pub port: String,

    /// The path where the daemon's PID is located.
    /// This is by default in `runtime_directory/pilot.pid`.
    pub pid_path: Option<PathBuf>,
}

/// All settings of the browser pool.
/// Durations are given in milliseconds.
#[derive(PartialEq, Eq, Clone, Debug, Deserialize, Serialize)]
pub struct Pool {
    /// The chrome/chromium binary that's started for each browser instance.
    #[serde(default = "default_executable")]
    pub executable: String,
    #[serde(default = "default_true")]
    pub headless: bool,
    /// Flags every browser instance is started with.
    #[serde(default = "default_baseline_args")]
    pub baseline_args: Vec<String>,
    /// A released browser is closed after being idle for this long.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout: u64,
    /// A browser older than this is never handed out again.
    #[serde(default = "default_max_age")]
    pub max_age: u64,
    /// How long `acquire` waits for an occupied pool to be released.
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout: u64,
    /// How long the browser may take to expose its devtools endpoint.
    #[serde(default = "default_launch_timeout")]
    pub launch_timeout: u64,
    /// Don't access this property directly, but rather use the getter on [Shared].
    pub user_data_dir: Option<PathBuf>,
}

/// All settings of the selective proxy.
#[derive(PartialEq, Eq, Clone, Debug, Deserialize, Serialize)]
pub struct Proxy {
    /// Whether the daemon starts the proxy and points its browsers at it.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// The local address the proxy listens on.
    #[serde(default = "default_proxy_listen")]
    pub listen: String,
    /// Whether the tunnel is used at all.
    #[serde(default = "Default::default")]
    pub tunnel_enabled: bool,
    pub tunnel_host: Option<String>,
    pub tunnel_port: Option<u16>,
    /// Domain substrings whose traffic has to go through the tunnel.
    #[serde(default = "Default::default")]
    pub tunnel_domains: Vec<String>,
    /// Timeout for establishing any outbound connection, in milliseconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,
}

/// All settings of the task runner.
#[derive(PartialEq, Eq, Clone, Debug, Deserialize, Serialize)]
pub struct Runner {
    /// How often a task is retried after a transient navigation failure.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Delay before a retry, in milliseconds.
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff: u64,
    /// Delay between two successful subtasks of a chain, in milliseconds.
    #[serde(default = "default_chain_delay")]
    pub chain_delay: u64,
    /// A JSON file with the credentials (cookies) handed to every automation.
    pub credentials_file: Option<PathBuf>,
}

impl Default for Shared {
    fn default() -> Self {
        Shared {
            pilot_directory: None,
            runtime_directory: None,

            #[cfg(not(target_os = "windows"))]
            unix_socket_path: None,
            #[cfg(not(target_os = "windows"))]
            use_unix_socket: true,
            host: default_host(),
            port: default_port(),

            pid_path: None,
        }
    }
}

impl Default for Pool {
    fn default() -> Self {
        Pool {
            executable: default_executable(),
            headless: true,
            baseline_args: default_baseline_args(),
            idle_timeout: default_idle_timeout(),
            max_age: default_max_age(),
            acquire_timeout: default_acquire_timeout(),
            launch_timeout: default_launch_timeout(),
            user_data_dir: None,
        }
    }
}

impl Default for Proxy {
    fn default() -> Self {
        Proxy {
            enabled: true,
            listen: default_proxy_listen(),
            tunnel_enabled: false,
            tunnel_host: None,
            tunnel_port: None,
            tunnel_domains: Vec::new(),
            connect_timeout: default_connect_timeout(),
        }
    }
}

impl Default for Runner {
    fn default() -> Self {
        Runner {
            max_retries: default_max_retries(),
            retry_backoff: default_retry_backoff(),
            chain_delay: default_chain_delay(),
            credentials_file: None,
        }
    }
}

/// The parent settings struct. \
/// This contains all other setting structs.
#[derive(PartialEq, Eq, Clone, Default, Debug, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default = "Default::default")]
    pub shared: Shared,
    #[serde(default = "Default::default")]
    pub pool: Pool,
    #[serde(default = "Default::default")]
    pub proxy: Proxy,
    #[serde(default = "Default::default")]
    pub runner: Runner,
    #[serde(default = "HashMap::new")]
    pub profiles: HashMap<String, NestedSettings>,
}

/// The nested settings struct for profiles. \
/// In contrast to the normal `Settings` struct, this struct doesn't allow profiles.
/// That way we prevent nested profiles and problems with self-referencing structs.
#[derive(PartialEq, Eq, Clone, Debug, Deserialize, Serialize)]
pub struct NestedSettings {
    #[serde(default = "Default::default")]
    pub shared: Shared,
    #[serde(default = "Default::default")]
    pub pool: Pool,
    #[serde(default = "Default::default")]
    pub proxy: Proxy,
    #[serde(default = "Default::default")]
    pub runner: Runner,
}

pub fn default_configuration_directory() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("pilot"))
}

/// Get the default config directory.
/// If no config can be found, fallback to the current directory.
pub fn configuration_directories() -> Vec<PathBuf> {
    if let Some(config_dir) = default_configuration_directory() {
        vec![config_dir, PathBuf::from(".")]
    } else {
        vec![PathBuf::from(".")]
    }
}

/// Little helper which expands a given path's `~` characters to a fully qualified path.
pub fn expand_home(old_path: &Path) -> PathBuf {
    PathBuf::from(tilde(&old_path.to_string_lossy()).into_owned())
}

impl Shared {
    pub fn pilot_directory(&self) -> PathBuf {
        if let Some(path) = &self.pilot_directory {
            expand_home(path)
        } else if let Some(path) = dirs::data_local_dir() {
            path.join("pilot")
        } else {
            PathBuf::from("./pilot")
        }
    }

    /// Get the current runtime directory in the following precedence.
    /// 1. Config value
    /// 2. Environment configuration
    /// 3. Pilot directory
    pub fn runtime_directory(&self) -> PathBuf {
        if let Some(path) = &self.runtime_directory {
            expand_home(path)
        } else if let Some(path) = dirs::runtime_dir() {
            path
        } else {
            self.pilot_directory()
        }
    }

    /// The unix socket path can either be explicitly specified or it's simply placed in the
    /// current runtime directory.
    #[cfg(not(target_os = "windows"))]
    pub fn unix_socket_path(&self) -> PathBuf {
        if let Some(path) = &self.unix_socket_path {
            expand_home(path)
        } else {
            self.runtime_directory()
                .join(format!("pilot_{}.socket", whoami::username()))
        }
    }

    /// The daemon's pid path can either be explicitly specified or it's simply placed in the
    /// current runtime directory.
    pub fn pid_path(&self) -> PathBuf {
        if let Some(path) = &self.pid_path {
            expand_home(path)
        } else {
            self.runtime_directory().join("pilot.pid")
        }
    }

    /// Persisted task records live here.
    pub fn tasks_directory(&self) -> PathBuf {
        self.pilot_directory().join("tasks")
    }

    /// Screenshots are stored in one sub-directory per task.
    pub fn screenshots_directory(&self) -> PathBuf {
        self.pilot_directory().join("screenshots")
    }
}

impl Pool {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout)
    }

    pub fn max_age(&self) -> Duration {
        Duration::from_millis(self.max_age)
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout)
    }

    pub fn launch_timeout(&self) -> Duration {
        Duration::from_millis(self.launch_timeout)
    }

    /// The browser profile directory. Defaults to `pilot_directory/profile`.
    pub fn user_data_dir(&self, shared: &Shared) -> PathBuf {
        if let Some(path) = &self.user_data_dir {
            expand_home(path)
        } else {
            shared.pilot_directory().join("profile")
        }
    }
}

impl Proxy {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout)
    }

    /// Build the initial route table from the configuration file.
    pub fn route_table(&self) -> RouteTable {
        let tunnel = match (&self.tunnel_host, self.tunnel_port) {
            (Some(host), Some(port)) => Some(TunnelEndpoint {
                host: host.clone(),
                port,
            }),
            _ => None,
        };

        RouteTable {
            enabled: self.tunnel_enabled,
            tunnel,
            domains: self.tunnel_domains.clone(),
        }
    }
}

impl Runner {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff)
    }

    pub fn chain_delay(&self) -> Duration {
        Duration::from_millis(self.chain_delay)
    }
}

impl Settings {
    /// Try to read existing config files, while using default values for non-existing fields.
    /// If successful, this will return a full config as well as a boolean on whether we found an
    /// existing configuration file or not.
    pub fn read(from_file: &Option<PathBuf>) -> Result<(Settings, bool), Error> {
        // If no explicit path is provided, we look for the PILOT_CONFIG_PATH env variable.
        let from_file = from_file
            .clone()
            .or_else(|| std::env::var(PILOT_CONFIG_PATH_ENV).map(PathBuf::from).ok());

        // Load the config from a very specific file path
        if let Some(path) = &from_file {
            if !path.exists() {
                info!("Config file at {path:?} doesn't exist yet. Use default config.");
                return Ok((Settings::default(), false));
            }
            return Ok((read_settings_file(path)?, true));
        };

        info!("Parsing config files");
        for directory in configuration_directories().into_iter() {
            let path = directory.join("pilot.yml");
            info!("Checking path: {path:?}");

            // Check if the file exists and parse it.
            if path.exists() && path.is_file() {
                info!("Found config file at: {path:?}");
                return Ok((read_settings_file(&path)?, true));
            }
        }

        info!("No config file found. Use default config.");
        // Return a default configuration if we couldn't find a file.
        Ok((Settings::default(), false))
    }

    /// Save the current configuration as a file to the given path. \
    /// If no path is given, the default configuration path will be used. \
    /// The file is then written to the main configuration directory of the respective OS.
    pub fn save(&self, path: &Option<PathBuf>) -> Result<(), Error> {
        let config_path = if let Some(path) = path {
            path.clone()
        } else if let Ok(path) = std::env::var(PILOT_CONFIG_PATH_ENV) {
            PathBuf::from(path)
        } else if let Some(path) = default_configuration_directory() {
            path.join("pilot.yml")
        } else {
            return Err(Error::Generic(
                "Failed to resolve default config directory. User home cannot be determined."
                    .into(),
            ));
        };
        let config_dir = config_path
            .parent()
            .ok_or_else(|| Error::InvalidPath("Couldn't resolve config directory".into()))?;

        // Create the config dir, if it doesn't exist yet
        if !config_dir.exists() {
            create_dir_all(config_dir).map_err(|err| {
                Error::IoPathError(config_dir.to_path_buf(), "creating config dir", err)
            })?;
        }

        let content = serde_yaml::to_string(self).map_err(|err| {
            Error::Generic(format!("Configuration file serialization failed:\n{err}"))
        })?;
        let mut file = File::create(&config_path).map_err(|err| {
            Error::IoPathError(config_dir.to_path_buf(), "creating settings file", err)
        })?;
        file.write_all(content.as_bytes()).map_err(|err| {
            Error::IoPathError(config_dir.to_path_buf(), "writing settings file", err)
        })?;

        Ok(())
    }

    /// Try to load a profile. Error if it doesn't exist.
    pub fn load_profile(&mut self, profile: &str) -> Result<(), Error> {
        let profile = self.profiles.remove(profile).ok_or_else(|| {
            Error::ConfigDeserialization(format!("Couldn't find profile with name \"{profile}\""))
        })?;

        self.shared = profile.shared;
        self.pool = profile.pool;
        self.proxy = profile.proxy;
        self.runner = profile.runner;

        Ok(())
    }
}

fn read_settings_file(path: &Path) -> Result<Settings, Error> {
    // Open the file in read-only mode with buffer.
    let file = File::open(path)
        .map_err(|err| Error::IoPathError(path.to_path_buf(), "opening config file", err))?;
    let reader = BufReader::new(file);

    serde_yaml::from_reader(reader).map_err(|err| Error::ConfigDeserialization(err.to_string()))
}
