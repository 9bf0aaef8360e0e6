//! Credentials (cookies) that are handed to every automation run.
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use pilot_lib::Error;
use serde::{Deserialize, Serialize};

fn default_path() -> String {
    "/".to_string()
}

/// A single cookie.
#[derive(PartialEq, Clone, Deserialize, Serialize)]
pub struct Credential {
    pub name: String,
    pub value: String,
    pub domain: String,
    #[serde(default = "default_path")]
    pub path: String,
    /// Seconds since the epoch.
    #[serde(default)]
    pub expiry: Option<f64>,
    #[serde(default)]
    pub secure: bool,
    #[serde(default, rename = "httpOnly", alias = "http_only")]
    pub http_only: bool,
}

/// Never print cookie values.
impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("name", &self.name)
            .field("domain", &self.domain)
            .field("path", &self.path)
            .field("expiry", &self.expiry)
            .finish_non_exhaustive()
    }
}

pub trait CredentialSource: Send + Sync {
    fn load_credentials(&self) -> Result<Vec<Credential>, Error>;
}

/// Credentials that are read from a JSON file containing a list of cookies.
///
/// The file is read on every call, so it can be replaced while the daemon is running.
pub struct JsonCredentials {
    pub path: PathBuf,
}

impl CredentialSource for JsonCredentials {
    fn load_credentials(&self) -> Result<Vec<Credential>, Error> {
        let file = File::open(&self.path)
            .map_err(|err| Error::IoPathError(self.path.clone(), "opening credentials", err))?;

        serde_json::from_reader(BufReader::new(file)).map_err(|err| {
            Error::ConfigDeserialization(format!("credentials at {:?}: {err}", self.path))
        })
    }
}

/// Used if no credentials file is configured.
pub struct NoCredentials;

impl CredentialSource for NoCredentials {
    fn load_credentials(&self) -> Result<Vec<Credential>, Error> {
        Ok(Vec::new())
    }
}
