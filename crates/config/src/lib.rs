//! Configuration loading, validation, and management for ragstream.
//!
//! Loads configuration from `~/.ragstream/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use ragstream_core::allocation::Binding;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.ragstream/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Where the chat backend lives
    #[serde(default)]
    pub transport: TransportConfig,

    /// Chat session settings
    #[serde(default)]
    pub chat: ChatConfig,

    /// Retrieval budget and source bindings
    #[serde(default)]
    pub allocation: AllocationConfig,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Bearer token sent with every request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Whole-request timeout; unset means streams may run indefinitely
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout_secs: Option<u64>,
}

fn default_base_url() -> String {
    "http://127.0.0.1:8000".into()
}
fn default_connect_timeout() -> u64 {
    10
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            connect_timeout_secs: default_connect_timeout(),
            request_timeout_secs: None,
        }
    }
}

/// Redact a secret for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for TransportConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &redact(&self.api_key))
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Public model id of the RAG app to talk to
    #[serde(default = "default_model")]
    pub model: String,

    /// Where the conversation id is persisted (default: `~/.ragstream/state.json`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_path: Option<String>,
}

fn default_model() -> String {
    "docs".into()
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            store_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationConfig {
    /// Total retrieval budget per request
    #[serde(default = "default_top_k")]
    pub top_k: u32,

    /// Reject malformed bindings instead of silently dropping them
    #[serde(default)]
    pub strict: bool,

    /// Source used when no binding is enabled with a positive weight
    #[serde(default = "default_fallback_source")]
    pub fallback_source: String,

    #[serde(default)]
    pub bindings: Vec<BindingConfig>,
}

fn default_top_k() -> u32 {
    8
}
fn default_fallback_source() -> String {
    "default".into()
}
fn default_true() -> bool {
    true
}
fn default_weight() -> f64 {
    1.0
}

impl Default for AllocationConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            strict: false,
            fallback_source: default_fallback_source(),
            bindings: vec![],
        }
    }
}

impl AllocationConfig {
    /// The enabled bindings, in file order.
    pub fn enabled_bindings(&self) -> Vec<Binding> {
        self.bindings
            .iter()
            .filter(|b| b.enabled)
            .map(BindingConfig::to_binding)
            .collect()
    }
}

/// One `[[allocation.bindings]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BindingConfig {
    pub source_id: String,

    #[serde(default = "default_weight")]
    pub weight: f64,

    #[serde(default)]
    pub priority: i64,

    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl BindingConfig {
    pub fn to_binding(&self) -> Binding {
        Binding::new(self.source_id.clone(), self.weight, self.priority)
    }
}

impl ClientConfig {
    /// Load configuration from the default path (~/.ragstream/config.toml).
    ///
    /// Environment variables take precedence over the file:
    /// - `RAGSTREAM_BASE_URL`
    /// - `RAGSTREAM_API_KEY`
    /// - `RAGSTREAM_MODEL`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("RAGSTREAM_BASE_URL") {
            self.transport.base_url = url;
        }
        if let Some(key) = lookup("RAGSTREAM_API_KEY") {
            self.transport.api_key = Some(key);
        }
        if let Some(model) = lookup("RAGSTREAM_MODEL") {
            self.chat.model = model;
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".ragstream")
    }

    /// Where the conversation state file lives.
    pub fn store_path(&self) -> PathBuf {
        self.chat
            .store_path
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| Self::config_dir().join("state.json"))
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = self.transport.base_url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::ValidationError(format!(
                "transport.base_url must be an http(s) URL, got '{url}'"
            )));
        }

        if self.transport.connect_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "transport.connect_timeout_secs must be > 0".into(),
            ));
        }

        if self.chat.model.trim().is_empty() {
            return Err(ConfigError::ValidationError("chat.model must not be empty".into()));
        }

        // Lenient allocation clamps bad weights to 0 instead.
        if self.allocation.strict {
            if let Some(b) = self
                .allocation
                .bindings
                .iter()
                .find(|b| !b.weight.is_finite() || b.weight < 0.0)
            {
                return Err(ConfigError::ValidationError(format!(
                    "binding '{}' has invalid weight {}",
                    b.source_id, b.weight
                )));
            }
        }

        Ok(())
    }

    /// Generate a default config TOML string (for `config init`).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = ClientConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.allocation.top_k, 8);
        assert_eq!(config.chat.model, "docs");
        assert!(!config.allocation.strict);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = ClientConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: ClientConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.transport.base_url, config.transport.base_url);
        assert_eq!(parsed.allocation.top_k, config.allocation.top_k);
    }

    #[test]
    fn bindings_parse_with_defaults() {
        let toml_str = r#"
[allocation]
top_k = 12
strict = true

[[allocation.bindings]]
source_id = "sdk-docs"
weight = 2.0

[[allocation.bindings]]
source_id = "forum"
priority = 3
enabled = false
"#;
        let config: ClientConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.allocation.top_k, 12);
        assert!(config.allocation.strict);
        assert_eq!(config.allocation.bindings.len(), 2);
        assert_eq!(config.allocation.bindings[1].weight, 1.0);

        let enabled = config.allocation.enabled_bindings();
        assert_eq!(enabled, vec![Binding::new("sdk-docs", 2.0, 0)]);
    }

    #[test]
    fn negative_weight_rejected_in_strict_mode() {
        let mut config = ClientConfig::default();
        config.allocation.strict = true;
        config.allocation.bindings.push(BindingConfig {
            source_id: "x".into(),
            weight: -1.0,
            priority: 0,
            enabled: true,
        });
        assert!(matches!(config.validate(), Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn negative_weight_loads_in_lenient_mode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[[allocation.bindings]]
source_id = "stale"
weight = -1.0

[[allocation.bindings]]
source_id = "docs"
weight = 1.0
"#,
        )
        .unwrap();
        let config = ClientConfig::load_from(&path).unwrap();
        assert!(!config.allocation.strict);

        let out = ragstream_core::allocate(&config.allocation.enabled_bindings(), 4);
        let quota = |id: &str| out.iter().find(|a| a.source_id == id).map(|a| a.quota);
        assert_eq!(quota("stale"), Some(1));
        assert_eq!(quota("docs"), Some(3));
    }

    #[test]
    fn non_http_base_url_rejected() {
        let mut config = ClientConfig::default();
        config.transport.base_url = "ftp://example.com".into();
        assert!(matches!(config.validate(), Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = ClientConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.chat.model, "docs");
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[transport]\nbase_url = \"https://rag.example.com\"\napi_key = \"secret\"\n",
        )
        .unwrap();
        let config = ClientConfig::load_from(&path).unwrap();
        assert_eq!(config.transport.base_url, "https://rag.example.com");
        assert!(!format!("{config:?}").contains("secret"));
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[transport\n").unwrap();
        assert!(matches!(
            ClientConfig::load_from(&path),
            Err(ConfigError::ParseError { .. })
        ));
    }

    #[test]
    fn env_overrides_win() {
        let mut config = ClientConfig::default();
        config.apply_env_overrides(|key| match key {
            "RAGSTREAM_MODEL" => Some("support".into()),
            "RAGSTREAM_API_KEY" => Some("k".into()),
            _ => None,
        });
        assert_eq!(config.chat.model, "support");
        assert_eq!(config.transport.api_key.as_deref(), Some("k"));
        assert_eq!(config.transport.base_url, default_base_url());
    }

    #[test]
    fn store_path_defaults_under_config_dir() {
        let config = ClientConfig::default();
        assert!(config.store_path().ends_with("state.json"));

        let mut custom = ClientConfig::default();
        custom.chat.store_path = Some("/tmp/x.json".into());
        assert_eq!(custom.store_path(), PathBuf::from("/tmp/x.json"));
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = ClientConfig::default_toml();
        assert!(toml_str.contains("base_url"));
        assert!(toml_str.contains("top_k = 8"));
    }
}
