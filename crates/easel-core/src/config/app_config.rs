use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::defaults;
use crate::error::{AppError, Result};

/// Application configuration
///
/// Provides centralized configuration management with:
/// - Serde support for loading from files
/// - Builder pattern for customization
/// - Sensible defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Messaging settings
    pub ipc: IpcConfig,

    /// Package discovery and build settings
    pub packages: PackageConfig,

    /// Undo history settings
    pub undo: UndoConfig,

    /// UI language code
    pub lang: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IpcConfig {
    /// Timeout applied to requests that don't specify one (milliseconds)
    pub default_timeout_ms: u64,

    /// First session id handed out
    pub session_seed: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PackageConfig {
    /// Directories scanned (one level deep) for package manifests
    pub search_paths: Vec<PathBuf>,

    /// Where build output for `build: true` packages is written
    pub build_root: PathBuf,

    /// Hosts packages may declare under `hosts`, name to version
    pub hosts: BTreeMap<String, String>,

    /// Rebuild on every load regardless of the recorded version
    pub force_build: bool,

    /// External build command; empty means copy sources into the build root
    pub build_command: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UndoConfig {
    /// Oldest groups are dropped past this many
    pub max_groups: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            ipc: IpcConfig::default(),
            packages: PackageConfig::default(),
            undo: UndoConfig::default(),
            lang: defaults::DEFAULT_LANG.to_string(),
        }
    }
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: defaults::DEFAULT_REPLY_TIMEOUT_MS,
            session_seed: defaults::DEFAULT_SESSION_SEED,
        }
    }
}

impl IpcConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}

impl Default for PackageConfig {
    fn default() -> Self {
        let mut hosts = BTreeMap::new();
        hosts.insert(
            defaults::DEFAULT_HOST_NAME.to_string(),
            defaults::DEFAULT_HOST_VERSION.to_string(),
        );

        Self {
            search_paths: Vec::new(),
            build_root: AppConfig::default_build_root(),
            hosts,
            force_build: false,
            build_command: Vec::new(),
        }
    }
}

impl Default for UndoConfig {
    fn default() -> Self {
        Self {
            max_groups: defaults::DEFAULT_MAX_UNDO_GROUPS,
        }
    }
}

impl AppConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a JSON file; missing keys fall back to defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            AppError::ConfigError(format!("Failed to read {}: {e}", path.display()))
        })?;
        serde_json::from_str(&raw).map_err(|e| {
            AppError::ConfigError(format!("Failed to parse {}: {e}", path.display()))
        })
    }

    /// Get the default build output directory
    pub fn default_build_root() -> PathBuf {
        let mut path = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push("easel");
        path.push("builds");
        path
    }

    pub fn with_search_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.packages.search_paths.push(path.into());
        self
    }

    pub fn with_build_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.packages.build_root = path.into();
        self
    }

    pub fn with_host(mut self, name: &str, version: &str) -> Self {
        self.packages
            .hosts
            .insert(name.to_string(), version.to_string());
        self
    }

    pub fn with_default_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.ipc.default_timeout_ms = timeout_ms;
        self
    }

    pub fn with_lang(mut self, lang: &str) -> Self {
        self.lang = lang.to_string();
        self
    }
}
