use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::model::DEFAULT_HOST;
use crate::protocol::{DEFAULT_HTTP_TIMEOUT, DEFAULT_USER_AGENT};
use crate::schedule::WeekSchedule;

/// Worker configuration, read from a TOML file
///
/// ```toml
/// database = "/var/lib/gitarchive/index.db"
/// blobs = "/var/lib/gitarchive/packs"
/// host = "https://github.com/"
/// http_timeout_secs = 60
/// schedule = ["mon-fri 22-6", "sat-sun 0-24"]
/// ```
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub database: PathBuf,
    pub blobs: PathBuf,
    pub host: String,
    pub user_agent: String,
    /// Connect and read timeout for the remote, in seconds
    pub http_timeout_secs: u64,
    /// Weekly windows in which fetching is allowed; empty means always
    pub schedule: Vec<String>,
}

fn data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("gitarchive")
}

impl Default for Config {
    fn default() -> Self {
        let dir = data_dir();
        Self {
            database: dir.join("index.db"),
            blobs: dir.join("packs"),
            host: DEFAULT_HOST.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT.as_secs(),
            schedule: Vec::new(),
        }
    }
}

impl Config {
    pub fn from_toml(toml_string: &str) -> Result<Self> {
        let config: Config = toml::from_str(toml_string)?;
        Ok(config)
    }

    /// Read `path`, or fall back to defaults when no path is given
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let toml_string = std::fs::read_to_string(path)
            .with_context(|| format!("Could not read config file {}", path.display()))?;
        Self::from_toml(&toml_string)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn week_schedule(&self) -> Result<WeekSchedule> {
        WeekSchedule::parse(self.schedule.as_slice()).context("Invalid schedule in config")
    }
}
