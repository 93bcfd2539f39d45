//! Configuration Management
//!
//! This module holds the explicit settings the library is constructed with and
//! the file registry the CLI reads them from.
//!
//! # Configuration Locations
//! - Local: `.nlquery/config.json` (team-shareable, per-project)
//! - Global: `<config_dir>/nlquery/config.json` (per-user)
//!
//! # Resolution Precedence
//! 1. Explicit CLI flags and their environment variables (highest priority)
//! 2. Local config file (`.nlquery/config.json`)
//! 3. Global config file (`<config_dir>/nlquery/config.json`)
//!
//! Nothing in the orchestrator reads the process environment. Environment
//! references stored in the files (`password_env`, `api_key_env`) are
//! resolved here, at the caller boundary.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::engine::ConnectionConfig;
use crate::error::{NlQueryError, Result};

/// Completion endpoint used when neither a flag nor a file names one
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Model used when neither a flag nor a file names one
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Per-request timeout for completion calls
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Settings for the HTTP completion engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionSettings {
    /// Base URL of an OpenAI-compatible API (without `/chat/completions`)
    pub base_url: String,

    /// Bearer token
    /// WARNING: Sensitive data, do not log or include in error messages
    pub api_key: String,

    /// Model identifier
    pub model: String,

    /// Per-request timeout in seconds
    pub timeout_secs: u64,
}

impl CompletionSettings {
    #[must_use]
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

/// Completion settings as stored in a config file
///
/// The API key itself is never stored; only the name of the environment
/// variable holding it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCompletion {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Environment variable name for the API key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl StoredCompletion {
    /// Overlay `other` on top of `self`, field by field
    fn overlay(&mut self, other: Self) {
        if other.base_url.is_some() {
            self.base_url = other.base_url;
        }
        if other.model.is_some() {
            self.model = other.model;
        }
        if other.api_key_env.is_some() {
            self.api_key_env = other.api_key_env;
        }
        if other.timeout_secs.is_some() {
            self.timeout_secs = other.timeout_secs;
        }
    }

    /// Combine stored values with explicit overrides into usable settings
    ///
    /// An explicit API key wins; otherwise `api_key_env` must name a set
    /// environment variable.
    pub fn resolve(&self, overrides: CompletionOverrides) -> Result<CompletionSettings> {
        let api_key = match (overrides.api_key, &self.api_key_env) {
            (Some(key), _) => key,
            (None, Some(env_var)) => std::env::var(env_var).map_err(|_| {
                NlQueryError::config_error(format!("Environment variable {env_var} not found for API key"))
            })?,
            (None, None) => {
                return Err(NlQueryError::config_error(
                    "No API key configured. Pass --api-key or set completion.api_key_env in the config file.",
                ));
            }
        };

        Ok(CompletionSettings {
            base_url: overrides
                .base_url
                .or_else(|| self.base_url.clone())
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_key,
            model: overrides.model.or_else(|| self.model.clone()).unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            timeout_secs: self.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS),
        })
    }
}

/// Values given explicitly by the caller (CLI flags)
#[derive(Debug, Clone, Default)]
pub struct CompletionOverrides {
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub api_key: Option<String>,
}

/// Stored connection configuration
///
/// Similar to `ConnectionConfig` but supports environment variable references
/// for the password.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredConnection {
    /// Connection configuration
    #[serde(flatten)]
    pub config: ConnectionConfig,

    /// Environment variable name for password (if not storing password directly)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_env: Option<String>,
}

impl StoredConnection {
    /// Resolve environment variables and return a `ConnectionConfig`
    pub fn resolve(&self) -> Result<ConnectionConfig> {
        let mut config = self.config.clone();

        if let Some(env_var) = &self.password_env {
            let password = std::env::var(env_var).map_err(|_| {
                NlQueryError::config_error(format!("Environment variable {env_var} not found for password"))
            })?;
            config.password = Some(password);
        }

        Ok(config)
    }
}

/// Contents of one config file
///
/// ```json
/// {
///   "completion": { "base_url": "https://openrouter.ai/api/v1", "api_key_env": "OPENROUTER_API_KEY" },
///   "connections": {
///     "analytics": { "engine": "postgres", "host": "localhost", "database": "shop", "password_env": "PGPASS" }
///   },
///   "default": "analytics"
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub completion: StoredCompletion,

    /// Named connections
    #[serde(default)]
    pub connections: BTreeMap<String, StoredConnection>,

    /// Name of the default connection (must exist in connections map)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

impl AppConfig {
    /// Overlay a higher-precedence config on this one
    ///
    /// Connections are merged by name; `other` wins on conflicts, as do its
    /// completion fields and default pointer when set.
    #[must_use]
    pub fn merged_with(mut self, other: Self) -> Self {
        self.completion.overlay(other.completion);
        self.connections.extend(other.connections);
        if other.default.is_some() {
            self.default = other.default;
        }
        self
    }

    /// Look up a connection by name (or the default) and resolve its password
    pub fn connection(&self, name: Option<&str>) -> Result<ConnectionConfig> {
        let name = match name {
            Some(n) => n,
            None => self.default.as_deref().ok_or_else(|| {
                NlQueryError::config_error(format!(
                    "No default connection set. Available connections: {:?}. \
                     Specify one with --connection or set a default in the config.",
                    self.connection_names()
                ))
            })?,
        };

        let stored = self.connections.get(name).ok_or_else(|| {
            NlQueryError::config_error(format!(
                "Connection '{name}' not found. Available connections: {:?}",
                self.connection_names()
            ))
        })?;

        stored.resolve()
    }

    /// Names of all stored connections, sorted
    #[must_use]
    pub fn connection_names(&self) -> Vec<&str> {
        self.connections.keys().map(String::as_str).collect()
    }
}

/// Get path to local config file (`.nlquery/config.json`)
pub fn local_config_path() -> Result<PathBuf> {
    let current_dir = std::env::current_dir().map_err(|e| {
        NlQueryError::config_error(format!("Could not determine current directory: {e}"))
    })?;

    Ok(current_dir.join(".nlquery").join("config.json"))
}

/// Get path to global config file (`<config_dir>/nlquery/config.json`)
pub fn global_config_path() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| NlQueryError::config_error("Could not determine user config directory"))?;

    Ok(config_dir.join("nlquery").join("config.json"))
}

/// Load one config file; a missing file is an empty config
pub fn load_config(path: &Path) -> Result<AppConfig> {
    if !path.exists() {
        return Ok(AppConfig::default());
    }

    let contents = fs::read_to_string(path)
        .map_err(|e| NlQueryError::config_error(format!("Could not read config file {}: {e}", path.display())))?;

    serde_json::from_str(&contents)
        .map_err(|e| NlQueryError::config_error(format!("Invalid config file {}: {e}", path.display())))
}

/// Load the global config with the local one layered on top
pub fn load_with_precedence() -> Result<AppConfig> {
    let global = load_config(&global_config_path()?)?;
    let local = load_config(&local_config_path()?)?;
    Ok(global.merged_with(local))
}
