//! Model backend configuration.
//!
//! Loaded as the `backend` section of the application config (see
//! [`crate::config`]).

use serde::Deserialize;

use super::errors::InferenceError;

// ─── Defaults ────────────────────────────────────────────────────────────────

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}
fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}
fn default_temperature() -> f32 {
    0.2
}
fn default_request_timeout_secs() -> u64 {
    60
}

// ─── BackendConfig ───────────────────────────────────────────────────────────

/// Connection settings for the OpenAI-compatible chat completions endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    /// Bearer token. Requests are rejected up front when this is missing.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    /// HTTP-level timeout for a single completion request.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: default_model(),
            base_url: default_base_url(),
            temperature: default_temperature(),
            max_tokens: None,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl BackendConfig {
    /// The API key, if one is configured and non-blank.
    pub fn api_key(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
    }

    /// Whether credentials are present.
    pub fn has_credentials(&self) -> bool {
        self.api_key().is_some()
    }

    /// Full URL of the completions endpoint.
    pub fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    /// Check the settings that would make every request fail.
    pub fn validate(&self) -> Result<(), InferenceError> {
        if self.model.trim().is_empty() {
            return Err(InferenceError::ConfigError {
                reason: "backend model name is empty".into(),
            });
        }
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(InferenceError::ConfigError {
                reason: format!("backend base_url must be http(s): '{}'", self.base_url),
            });
        }
        Ok(())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_yaml() {
        let config: BackendConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert!((config.temperature - 0.2).abs() < f32::EPSILON);
        assert!(!config.has_credentials());
    }

    #[test]
    fn test_blank_api_key_is_not_a_credential() {
        let config = BackendConfig {
            api_key: Some("   ".to_string()),
            ..BackendConfig::default()
        };
        assert!(!config.has_credentials());
    }

    #[test]
    fn test_completions_url_trims_trailing_slash() {
        let config = BackendConfig {
            base_url: "http://localhost:11434/v1/".to_string(),
            ..BackendConfig::default()
        };
        assert_eq!(
            config.completions_url(),
            "http://localhost:11434/v1/chat/completions"
        );
    }

    #[test]
    fn test_validate_rejects_non_http_base_url() {
        let config = BackendConfig {
            base_url: "ftp://example.com".to_string(),
            ..BackendConfig::default()
        };
        assert!(config.validate().is_err());
        assert!(BackendConfig::default().validate().is_ok());
    }
}
