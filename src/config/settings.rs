use super::ConfigError;
use crate::engine::DEFAULT_STAGE_COUNT;
use crate::geocode::{GeocodeClient, DEFAULT_GEOCODE_BASE, DEFAULT_GEOCODE_TIMEOUT_SECS};
use crate::runtime::default_state_root_path;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const MAX_STAGE_COUNT: u32 = 99;
const MAX_GEOCODE_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    pub roster_path: PathBuf,
    #[serde(default)]
    pub state_root: Option<PathBuf>,
    #[serde(default)]
    pub worklog_db_path: Option<PathBuf>,
    #[serde(default = "default_stage_count")]
    pub stage_count: u32,
    #[serde(default)]
    pub geocoding: GeocodingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GeocodingConfig {
    #[serde(default = "default_geocode_base")]
    pub base_url: String,
    #[serde(default = "default_geocode_language")]
    pub language: String,
    #[serde(default = "default_geocode_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_geocode_timeout")]
    pub timeout_seconds: u64,
}

impl Default for GeocodingConfig {
    fn default() -> Self {
        Self {
            base_url: default_geocode_base(),
            language: default_geocode_language(),
            user_agent: default_geocode_user_agent(),
            timeout_seconds: default_geocode_timeout(),
        }
    }
}

fn default_stage_count() -> u32 {
    DEFAULT_STAGE_COUNT
}

fn default_geocode_base() -> String {
    DEFAULT_GEOCODE_BASE.to_string()
}

fn default_geocode_language() -> String {
    "en".to_string()
}

fn default_geocode_user_agent() -> String {
    format!("sitelog/{}", env!("CARGO_PKG_VERSION"))
}

fn default_geocode_timeout() -> u64 {
    DEFAULT_GEOCODE_TIMEOUT_SECS
}

impl Settings {
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn with_defaults(config_dir: &Path) -> Self {
        Self {
            roster_path: config_dir.join(super::paths::DEFAULT_ROSTER_FILE_NAME),
            state_root: None,
            worklog_db_path: None,
            stage_count: DEFAULT_STAGE_COUNT,
            geocoding: GeocodingConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.roster_path.as_os_str().is_empty() {
            return Err(ConfigError::Settings(
                "roster_path must be non-empty".to_string(),
            ));
        }
        if self.stage_count == 0 || self.stage_count > MAX_STAGE_COUNT {
            return Err(ConfigError::Settings(format!(
                "stage_count must be between 1 and {MAX_STAGE_COUNT}"
            )));
        }
        if self.geocoding.base_url.trim().is_empty() {
            return Err(ConfigError::Settings(
                "geocoding.base_url must be non-empty".to_string(),
            ));
        }
        // Nominatim's usage policy wants a client-identifying agent.
        if self.geocoding.user_agent.trim().is_empty() {
            return Err(ConfigError::Settings(
                "geocoding.user_agent must be non-empty".to_string(),
            ));
        }
        if self.geocoding.language.trim().is_empty() {
            return Err(ConfigError::Settings(
                "geocoding.language must be non-empty".to_string(),
            ));
        }
        if self.geocoding.timeout_seconds == 0
            || self.geocoding.timeout_seconds > MAX_GEOCODE_TIMEOUT_SECS
        {
            return Err(ConfigError::Settings(format!(
                "geocoding.timeout_seconds must be between 1 and {MAX_GEOCODE_TIMEOUT_SECS}"
            )));
        }
        Ok(())
    }

    pub fn resolve_state_root(&self) -> Result<PathBuf, ConfigError> {
        match &self.state_root {
            Some(root) => Ok(root.clone()),
            None => default_state_root_path()
                .map_err(|err| ConfigError::Settings(err.to_string())),
        }
    }

    pub fn resolve_worklog_db_path(&self) -> Result<PathBuf, ConfigError> {
        match &self.worklog_db_path {
            Some(path) => Ok(path.clone()),
            None => Ok(self.resolve_state_root()?.join("worklog.sqlite")),
        }
    }

    pub fn geocode_client(&self) -> GeocodeClient {
        GeocodeClient::new(
            &self.geocoding.base_url,
            &self.geocoding.language,
            &self.geocoding.user_agent,
            Duration::from_secs(self.geocoding.timeout_seconds),
        )
    }
}
