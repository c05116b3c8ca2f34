//! Dashboard configuration.
//!
//! Loaded from `dashboard_config.json`; `DASHBOARD_CONFIG_PATH` points at an
//! override file.

use std::{
    env, fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};

use serde::Deserialize;
use thiserror::Error;

use telemetry_runtime::{Command, ParameterError, StartDefaults};

use crate::connection::ReconnectPolicy;
use crate::diagnostics::DEFAULT_DIAGNOSTIC_CAPACITY;

pub const BUILTIN_DASHBOARD_CONFIG: &str = include_str!("data/dashboard_config.json");
pub const DEFAULT_ENDPOINT: &str = "ws://localhost:8080/ExperimentData";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DashboardConfig {
    pub endpoint: String,
    pub default_steps: u32,
    pub default_agents: u32,
    /// Drop-oldest cap on retained snapshots. `None` keeps the whole session.
    pub history_limit: Option<usize>,
    pub reconnect: ReconnectPolicy,
    /// Queue depth of each diagnostics listener.
    pub diagnostics_capacity: usize,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        let defaults = StartDefaults::default();
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            default_steps: defaults.steps,
            default_agents: defaults.agents,
            history_limit: None,
            reconnect: ReconnectPolicy::default(),
            diagnostics_capacity: DEFAULT_DIAGNOSTIC_CAPACITY,
        }
    }
}

impl DashboardConfig {
    pub fn builtin() -> Arc<Self> {
        Arc::new(
            DashboardConfig::from_json_str(BUILTIN_DASHBOARD_CONFIG)
                .expect("builtin dashboard config should parse"),
        )
    }

    pub fn from_json_str(json: &str) -> Result<Self, DashboardConfigError> {
        let config: DashboardConfig = serde_json::from_str(json)?;
        Command::start(config.default_steps, config.default_agents)?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, DashboardConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| DashboardConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        DashboardConfig::from_json_str(&contents)
    }

    pub fn start_defaults(&self) -> StartDefaults {
        StartDefaults {
            steps: self.default_steps,
            agents: self.default_agents,
        }
    }
}

#[derive(Debug, Error)]
pub enum DashboardConfigError {
    #[error("failed to parse dashboard config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid default start parameters: {0}")]
    Invalid(#[from] ParameterError),
    #[error("failed to read dashboard config from {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Where the active configuration came from; `None` means the builtin copy.
#[derive(Debug, Clone, Default)]
pub struct DashboardConfigMetadata {
    path: Option<PathBuf>,
}

impl DashboardConfigMetadata {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }

    pub fn path(&self) -> Option<&PathBuf> {
        self.path.as_ref()
    }
}

/// Load the dashboard configuration from `DASHBOARD_CONFIG_PATH`, falling
/// back to the builtin copy when unset or unreadable.
pub fn load_dashboard_config_from_env() -> (Arc<DashboardConfig>, DashboardConfigMetadata) {
    let Some(path) = env::var("DASHBOARD_CONFIG_PATH").ok().map(PathBuf::from) else {
        tracing::info!(target: "dooders::config", "dashboard_config.loaded=builtin");
        return (DashboardConfig::builtin(), DashboardConfigMetadata::new(None));
    };

    match DashboardConfig::from_file(&path) {
        Ok(config) => {
            tracing::info!(
                target: "dooders::config",
                path = %path.display(),
                "dashboard_config.loaded=file"
            );
            (Arc::new(config), DashboardConfigMetadata::new(Some(path)))
        }
        Err(err) => {
            tracing::warn!(
                target: "dooders::config",
                path = %path.display(),
                error = %err,
                "dashboard_config.load_failed"
            );
            (DashboardConfig::builtin(), DashboardConfigMetadata::new(None))
        }
    }
}
