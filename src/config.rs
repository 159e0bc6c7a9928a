//! Application configuration.
//!
//! Resolution order:
//! 1. YAML file at `$CASS_DOCTOR_CONFIG`, or `./cass-doctor.yaml` if present.
//!    String values may reference `${VAR}` or `${VAR:-default}`.
//! 2. Otherwise plain environment variables (`OPENAI_API_KEY`, `MCP_URL`, ...).
//!
//! A `.env` file in the working directory is loaded into the process
//! environment first (see [`load_dotenv`]); variables already set win.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::agent_core::AgentConfig;
use crate::inference::BackendConfig;
use crate::mcp_client::{NetworkTransport, ProviderConfig};

/// Env var naming an explicit config file.
pub const CONFIG_PATH_ENV: &str = "CASS_DOCTOR_CONFIG";

/// Config file picked up from the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "cass-doctor.yaml";

/// Dotenv file picked up from the working directory.
pub const DOTENV_FILE: &str = ".env";

pub const DEFAULT_BIND: &str = "127.0.0.1:8000";

fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}

// ─── Errors ─────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("failed to parse config: {reason}")]
    Parse { reason: String },

    #[error("invalid config: {reason}")]
    Invalid { reason: String },
}

// ─── Sections ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfig {
    /// Directory for `cass-doctor.log`; stderr when unset.
    #[serde(default)]
    pub dir: Option<String>,
    /// `EnvFilter` directives; `RUST_LOG` wins when set.
    #[serde(default)]
    pub filter: Option<String>,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

// ─── Loading ────────────────────────────────────────────────────────────────

impl AppConfig {
    /// Resolve configuration from the process environment.
    pub fn resolve() -> Result<Self, ConfigError> {
        let lookup = |name: &str| std::env::var(name).ok();

        if let Some(path) = lookup(CONFIG_PATH_ENV).filter(|p| !p.trim().is_empty()) {
            return Self::load(Path::new(&path));
        }

        let local = PathBuf::from(DEFAULT_CONFIG_FILE);
        if local.exists() {
            return Self::load(&local);
        }

        let config = Self::from_env_with(&lookup);
        config.validate()?;
        Ok(config)
    }

    /// Load a YAML config file, interpolating from the process environment.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        Self::load_with(path, &|name: &str| std::env::var(name).ok())
    }

    fn load_with(path: &Path, lookup: &dyn Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let config = Self::parse_with(&raw, lookup)?;
        tracing::debug!(path = %path.display(), "config file loaded");
        Ok(config)
    }

    fn parse_with(raw: &str, lookup: &dyn Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let interpolated = interpolate_env_vars(raw, lookup);
        let mut config: AppConfig =
            serde_yaml::from_str(&interpolated).map_err(|e| ConfigError::Parse {
                reason: e.to_string(),
            })?;
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    /// Build the config from environment variables alone.
    pub fn from_env_with(lookup: &dyn Fn(&str) -> Option<String>) -> Self {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let mut config = AppConfig::default();

        config.backend.api_key = var("OPENAI_API_KEY");
        if let Some(model) = var("OPENAI_MODEL") {
            config.backend.model = model;
        }
        if let Some(base_url) = var("OPENAI_BASE_URL") {
            config.backend.base_url = base_url;
        }

        config.provider.url = var("MCP_URL");
        if let Some(transport) = var("MCP_TRANSPORT") {
            config.provider.transport = NetworkTransport::from_name(&transport);
        }
        if let Some(command) = var("PYTHON_BIN") {
            config.provider.command = command;
        }
        if let Some(entry) = var("MCP_ENTRY") {
            config.provider.entry = entry;
        }

        if let Some(bind) = var("CASS_DOCTOR_BIND") {
            config.server.bind = bind;
        }
        config.logging.dir = var("CASS_DOCTOR_LOG_DIR");

        config.normalize();
        config
    }

    /// Expand `~` in path-valued settings.
    fn normalize(&mut self) {
        self.logging.dir = self.logging.dir.take().map(|d| expand_tilde(&d));
        self.provider.cwd = self.provider.cwd.take().map(|d| expand_tilde(&d));
        self.provider.entry = expand_tilde(&self.provider.entry);
    }

    /// Reject settings that would make every request fail.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.bind_addr()?;
        self.backend.validate().map_err(|e| ConfigError::Invalid {
            reason: e.to_string(),
        })?;
        if self.agent.max_rounds == 0 {
            return Err(ConfigError::Invalid {
                reason: "agent.max_rounds must be at least 1".into(),
            });
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.server.bind.parse().map_err(|e| ConfigError::Invalid {
            reason: format!("server.bind '{}': {e}", self.server.bind),
        })
    }
}

// ─── Dotenv ──────────────────────────────────────────────────────────────────

/// Load `dir/.env` into the process environment without overriding
/// variables that are already set.
///
/// Returns the file path when one was loaded.
pub fn load_dotenv(dir: &Path) -> Result<Option<PathBuf>, ConfigError> {
    let path = dir.join(DOTENV_FILE);
    if !path.is_file() {
        return Ok(None);
    }
    dotenvy::from_path(&path).map_err(|e| ConfigError::Read {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    Ok(Some(path))
}

// ─── Env-var interpolation ───────────────────────────────────────────────────

/// Replace `${VAR}` and `${VAR:-default}` in a string.
fn interpolate_env_vars(input: &str, lookup: &dyn Fn(&str) -> Option<String>) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_expr = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_expr.push(c);
            }
            result.push_str(&resolve_var_expr(&var_expr, lookup));
        } else {
            result.push(ch);
        }
    }

    result
}

/// Resolve `VAR` or `VAR:-default`.
fn resolve_var_expr(expr: &str, lookup: &dyn Fn(&str) -> Option<String>) -> String {
    match expr.split_once(":-") {
        Some((name, default)) => lookup(name).unwrap_or_else(|| default.to_string()),
        None => lookup(expr).unwrap_or_default(),
    }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            return format!("{}{rest}", home.display());
        }
    }
    path.to_string()
}

// ─── Tests ───────────────────────────────────────────────────────────────────
