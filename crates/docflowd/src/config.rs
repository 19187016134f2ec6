//! Daemon configuration.
//!
//! Loaded from `$XDG_CONFIG_HOME/docflow/config.toml` (or `DOCFLOW_CONFIG`).
//! A missing file means defaults; every field has one.
//!
//! ```toml
//! project_root = "."
//! socket_path = "/tmp/docflow.sock"
//! theme = "dark"
//!
//! [bridge]
//! program = "claude"
//! launcher = "tmux"
//! completion = "timeout"
//! timeout_secs = 30
//!
//! [init]
//! timeout_secs = 300
//! poll_interval_ms = 2000
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use docflow_core::ThemeKind;
use docflow_term::{LauncherKind, ShellLauncher, TerminalLauncher, TmuxLauncher};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::bridge::{
    BridgeConfig, CompletionDetector, CompletionKind, ExitMarkerDetector, SentinelFileDetector,
    TimeoutHeuristic,
};
use crate::server::DEFAULT_SOCKET_PATH;
use crate::state::{DEFAULT_INIT_TIMEOUT, DEFAULT_POLL_INTERVAL};

/// Overrides the config file location.
pub const CONFIG_ENV: &str = "DOCFLOW_CONFIG";

/// Overrides `socket_path`.
pub const SOCKET_ENV: &str = "DOCFLOW_SOCKET";

const SENTINEL_POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub project_root: PathBuf,
    pub socket_path: PathBuf,
    pub theme: ThemeKind,
    pub bridge: BridgeSettings,
    pub init: InitSettings,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            project_root: PathBuf::from("."),
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            theme: ThemeKind::default(),
            bridge: BridgeSettings::default(),
            init: InitSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BridgeSettings {
    pub program: String,
    pub session_name: String,
    pub launcher: LauncherKind,
    pub completion: CompletionKind,
    /// Heuristic timeout, or the give-up time for the other detectors.
    pub timeout_secs: u64,
    /// Relative paths resolve against the project root.
    pub sentinel_path: PathBuf,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            program: "claude".to_string(),
            session_name: "docflow".to_string(),
            launcher: LauncherKind::default(),
            completion: CompletionKind::default(),
            timeout_secs: 30,
            sentinel_path: PathBuf::from(".docflow/last-exit"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct InitSettings {
    pub timeout_secs: u64,
    pub poll_interval_ms: u64,
}

impl Default for InitSettings {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_INIT_TIMEOUT.as_secs(),
            poll_interval_ms: u64::try_from(DEFAULT_POLL_INTERVAL.as_millis()).unwrap_or(2000),
        }
    }
}

impl InitSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl DaemonConfig {
    /// Default location, honouring `DOCFLOW_CONFIG`.
    pub fn config_path() -> PathBuf {
        std::env::var_os(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                dirs::config_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("docflow")
                    .join("config.toml")
            })
    }

    /// Loads the default config file, then applies environment overrides.
    ///
    /// # Errors
    ///
    /// Fails if the file exists but cannot be read or parsed.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_from(&Self::config_path())?;
        if let Some(socket) = std::env::var_os(SOCKET_ENV) {
            config.socket_path = PathBuf::from(socket);
        }
        Ok(config)
    }

    /// Loads `path`; a missing file yields defaults.
    ///
    /// # Errors
    ///
    /// Fails if the file exists but cannot be read or parsed.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No config file, using defaults");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        Self::parse(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// The project root made absolute against the current directory.
    pub fn resolved_root(&self) -> PathBuf {
        if self.project_root.is_absolute() {
            return self.project_root.clone();
        }
        std::env::current_dir()
            .map(|cwd| cwd.join(&self.project_root))
            .unwrap_or_else(|_| self.project_root.clone())
    }

    pub fn bridge_config(&self) -> BridgeConfig {
        BridgeConfig {
            program: self.bridge.program.clone(),
            session_name: self.bridge.session_name.clone(),
            cwd: self.resolved_root(),
        }
    }

    pub fn launcher(&self) -> Arc<dyn TerminalLauncher> {
        match self.bridge.launcher {
            LauncherKind::Tmux => Arc::new(TmuxLauncher::default()),
            LauncherKind::Shell => Arc::new(ShellLauncher::default()),
        }
    }

    pub fn completion_detector(&self) -> Arc<dyn CompletionDetector> {
        let timeout = Duration::from_secs(self.bridge.timeout_secs);
        match self.bridge.completion {
            CompletionKind::Timeout => Arc::new(TimeoutHeuristic::new(timeout)),
            CompletionKind::ExitMarker => Arc::new(ExitMarkerDetector::new(timeout)),
            CompletionKind::Sentinel => {
                let path = if self.bridge.sentinel_path.is_absolute() {
                    self.bridge.sentinel_path.clone()
                } else {
                    self.resolved_root().join(&self.bridge.sentinel_path)
                };
                Arc::new(SentinelFileDetector::new(path, SENTINEL_POLL_INTERVAL, timeout))
            }
        }
    }
}
