//! Configuration
//!
//! Centralized configuration loading, from a TOML file at
//! `~/.config/exam-buddy/buddy.toml`.
//!
//! # Configuration Priority
//!
//! Values are applied with the following priority (highest first):
//! 1. CLI arguments ([`ConfigOverrides`])
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [sessions]
//! max_sessions_per_caller = 4
//! idle_timeout_secs = 60
//! sweep_interval_ms = 1000
//! terminal_retention_secs = 300
//! channel_capacity = 100
//!
//! [backend]
//! host = "localhost"
//! port = 11434
//! chat_model = "llama3.2"
//! summarizer_model = "llama3.2"
//! question_model = "llama3.2"
//! request_timeout_secs = 120
//! temperature = 0.7
//!
//! [knowledge]
//! documents_dir = "uploaded_docs"
//!
//! [transcript]
//! context_messages = 6
//! ```

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dispatch::DispatcherConfig;
use crate::registry::RegistryConfig;

const DEFAULT_MODEL: &str = "llama3.2";

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Where the effective configuration came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Command-line argument
    Cli,
    /// Environment variable
    Env,
    /// TOML configuration file
    File,
    /// Built-in default
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Structures
// =============================================================================

/// `[sessions]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionsToml {
    /// Open sessions allowed per caller
    pub max_sessions_per_caller: Option<usize>,
    /// Producer silence before a session is failed, in seconds
    pub idle_timeout_secs: Option<u64>,
    /// Sweep period in milliseconds
    pub sweep_interval_ms: Option<u64>,
    /// How long unobserved terminal sessions are kept, in seconds
    pub terminal_retention_secs: Option<u64>,
    /// Generator event channel capacity
    pub channel_capacity: Option<usize>,
}

/// `[backend]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendToml {
    /// Model server host
    pub host: Option<String>,
    /// Model server port
    pub port: Option<u16>,
    /// Model for the chat agent
    pub chat_model: Option<String>,
    /// Model for the video summarizer agent
    pub summarizer_model: Option<String>,
    /// Model for the question generator agent
    pub question_model: Option<String>,
    /// Single-shot request timeout in seconds
    pub request_timeout_secs: Option<u64>,
    /// Sampling temperature (0.0-1.0)
    pub temperature: Option<f32>,
}

/// `[knowledge]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KnowledgeToml {
    /// Upload directory for study materials
    pub documents_dir: Option<PathBuf>,
}

/// `[transcript]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptToml {
    /// Transcript entries attached to chat turns as context
    pub context_messages: Option<usize>,
}

/// Top-level TOML document
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BuddyToml {
    /// Session limits and timers
    pub sessions: SessionsToml,
    /// Model server
    pub backend: BackendToml,
    /// Study materials
    pub knowledge: KnowledgeToml,
    /// Transcript
    pub transcript: TranscriptToml,
}

// =============================================================================
// Effective Configuration
// =============================================================================

/// Model server settings
#[derive(Clone, Debug, PartialEq)]
pub struct BackendSettings {
    /// Model server host
    pub host: String,
    /// Model server port
    pub port: u16,
    /// Model for the chat agent
    pub chat_model: String,
    /// Model for the video summarizer agent
    pub summarizer_model: String,
    /// Model for the question generator agent
    pub question_model: String,
    /// Cap on a single-shot request; streamed output is bounded by the
    /// registry idle timeout instead
    pub request_timeout: Duration,
    /// Generator event channel capacity
    pub channel_capacity: usize,
    /// Sampling temperature
    pub temperature: f32,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 11434,
            chat_model: DEFAULT_MODEL.to_string(),
            summarizer_model: DEFAULT_MODEL.to_string(),
            question_model: DEFAULT_MODEL.to_string(),
            request_timeout: Duration::from_secs(120),
            channel_capacity: 100,
            temperature: 0.7,
        }
    }
}

/// Effective configuration after all sources are applied
#[derive(Clone, Debug)]
pub struct BuddyConfig {
    /// Session registry limits and timers
    pub registry: RegistryConfig,
    /// Model server
    pub backend: BackendSettings,
    /// Upload directory for study materials
    pub documents_dir: PathBuf,
    /// Transcript entries attached to chat turns as context
    pub context_messages: usize,
    /// Path of the file that was loaded, if any
    pub config_file_path: Option<PathBuf>,
    source: ConfigSource,
}

impl Default for BuddyConfig {
    fn default() -> Self {
        Self {
            registry: RegistryConfig::default(),
            backend: BackendSettings::default(),
            documents_dir: PathBuf::from("uploaded_docs"),
            context_messages: 6,
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl BuddyConfig {
    /// Configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Highest-priority source that changed a value
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Reject values the runtime cannot work with
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] naming the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.registry.max_sessions_per_caller == 0 {
            return Err(ConfigError::ValidationError(
                "max_sessions_per_caller must be at least 1".to_string(),
            ));
        }
        if self.registry.idle_timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "idle_timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.registry.sweep_interval.is_zero() {
            return Err(ConfigError::ValidationError(
                "sweep_interval_ms must be at least 1".to_string(),
            ));
        }
        if self.backend.request_timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "request_timeout_secs must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.backend.temperature) {
            return Err(ConfigError::ValidationError(format!(
                "temperature must be between 0.0 and 1.0, got {}",
                self.backend.temperature
            )));
        }
        if self.backend.channel_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "channel_capacity must be at least 1".to_string(),
            ));
        }
        if self.backend.host.trim().is_empty() {
            return Err(ConfigError::ValidationError("backend host is empty".to_string()));
        }
        Ok(())
    }

    /// Settings for the dispatcher
    #[must_use]
    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            context_messages: self.context_messages,
            chat_model: self.backend.chat_model.clone(),
            summarizer_model: self.backend.summarizer_model.clone(),
            question_model: self.backend.question_model.clone(),
            temperature: self.backend.temperature,
        }
    }
}

// =============================================================================
// Loading
// =============================================================================

/// Default configuration file path
///
/// `$XDG_CONFIG_HOME/exam-buddy/buddy.toml`, typically
/// `~/.config/exam-buddy/buddy.toml`.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("exam-buddy").join("buddy.toml"))
}

/// Load configuration from the default path, then the environment
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed, or the
/// result fails validation. A missing file is not an error.
pub fn load_config() -> Result<BuddyConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path, then the environment
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed, or the result
/// fails validation.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<BuddyConfig, ConfigError> {
    let mut config = BuddyConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: BuddyToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config);
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(path = %config_path.display(), "Loaded configuration from file");
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_config(&mut config, |key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
}

fn apply_toml_config(config: &mut BuddyConfig, toml: &BuddyToml) {
    let sessions = &toml.sessions;
    if let Some(limit) = sessions.max_sessions_per_caller {
        config.registry.max_sessions_per_caller = limit;
    }
    if let Some(secs) = sessions.idle_timeout_secs {
        config.registry.idle_timeout = Duration::from_secs(secs);
    }
    if let Some(ms) = sessions.sweep_interval_ms {
        config.registry.sweep_interval = Duration::from_millis(ms);
    }
    if let Some(secs) = sessions.terminal_retention_secs {
        config.registry.terminal_retention = Duration::from_secs(secs);
    }
    if let Some(capacity) = sessions.channel_capacity {
        config.backend.channel_capacity = capacity;
    }

    let backend = &toml.backend;
    if let Some(ref host) = backend.host {
        config.backend.host.clone_from(host);
    }
    if let Some(port) = backend.port {
        config.backend.port = port;
    }
    if let Some(ref model) = backend.chat_model {
        config.backend.chat_model.clone_from(model);
    }
    if let Some(ref model) = backend.summarizer_model {
        config.backend.summarizer_model.clone_from(model);
    }
    if let Some(ref model) = backend.question_model {
        config.backend.question_model.clone_from(model);
    }
    if let Some(secs) = backend.request_timeout_secs {
        config.backend.request_timeout = Duration::from_secs(secs);
    }
    if let Some(temperature) = backend.temperature {
        config.backend.temperature = temperature;
    }

    if let Some(ref dir) = toml.knowledge.documents_dir {
        config.documents_dir.clone_from(dir);
    }
    if let Some(n) = toml.transcript.context_messages {
        config.context_messages = n;
    }
}

/// Apply environment overrides read through `lookup`
fn apply_env_config(config: &mut BuddyConfig, lookup: impl Fn(&str) -> Option<String>) {
    let mut touched = false;

    if let Some(n) = parse_env::<usize>(&lookup, "BUDDY_MAX_SESSIONS") {
        config.registry.max_sessions_per_caller = n;
        touched = true;
    }
    if let Some(secs) = parse_env::<u64>(&lookup, "BUDDY_IDLE_TIMEOUT") {
        config.registry.idle_timeout = Duration::from_secs(secs);
        touched = true;
    }
    if let Some(ms) = parse_env::<u64>(&lookup, "BUDDY_SWEEP_INTERVAL_MS") {
        config.registry.sweep_interval = Duration::from_millis(ms);
        touched = true;
    }
    if let Some(dir) = lookup("BUDDY_DOCUMENTS_DIR") {
        config.documents_dir = PathBuf::from(dir);
        touched = true;
    }
    if let Some(host) = lookup("OLLAMA_HOST") {
        config.backend.host = host;
        touched = true;
    }
    if let Some(port) = parse_env::<u16>(&lookup, "OLLAMA_PORT") {
        config.backend.port = port;
        touched = true;
    }
    if let Some(model) = lookup("BUDDY_CHAT_MODEL") {
        config.backend.chat_model = model;
        touched = true;
    }
    if let Some(model) = lookup("BUDDY_SUMMARIZER_MODEL") {
        config.backend.summarizer_model = model;
        touched = true;
    }
    if let Some(model) = lookup("BUDDY_QUESTION_MODEL") {
        config.backend.question_model = model;
        touched = true;
    }
    if let Some(temperature) = parse_env::<f32>(&lookup, "BUDDY_TEMPERATURE") {
        config.backend.temperature = temperature;
        touched = true;
    }

    if touched {
        config.source = ConfigSource::Env;
    }
}

/// Parse one environment override; unparseable values are logged and skipped
fn parse_env<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    if let Ok(value) = raw.trim().parse::<T>() {
        Some(value)
    } else {
        tracing::warn!(key, value = %raw, "Ignoring unparseable environment override");
        None
    }
}

// =============================================================================
// CLI Overrides
// =============================================================================

/// Command-line overrides, applied after [`load_config`]
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Per-caller session limit
    pub max_sessions_per_caller: Option<usize>,
    /// Upload directory
    pub documents_dir: Option<PathBuf>,
    /// Model server host
    pub host: Option<String>,
    /// Model server port
    pub port: Option<u16>,
    /// Model for every agent
    pub model: Option<String>,
}

impl ConfigOverrides {
    /// Empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the per-caller session limit
    #[must_use]
    pub fn with_max_sessions(mut self, limit: usize) -> Self {
        self.max_sessions_per_caller = Some(limit);
        self
    }

    /// Override the upload directory
    #[must_use]
    pub fn with_documents_dir(mut self, dir: PathBuf) -> Self {
        self.documents_dir = Some(dir);
        self
    }

    /// Use one model for every agent
    #[must_use]
    pub fn with_model(mut self, model: String) -> Self {
        self.model = Some(model);
        self
    }

    /// Apply overrides, then re-validate
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] if an override is invalid.
    pub fn apply(&self, config: &mut BuddyConfig) -> Result<(), ConfigError> {
        if self.max_sessions_per_caller.is_some()
            || self.documents_dir.is_some()
            || self.host.is_some()
            || self.port.is_some()
            || self.model.is_some()
        {
            config.source = ConfigSource::Cli;
        }

        if let Some(limit) = self.max_sessions_per_caller {
            config.registry.max_sessions_per_caller = limit;
        }
        if let Some(ref dir) = self.documents_dir {
            config.documents_dir.clone_from(dir);
        }
        if let Some(ref host) = self.host {
            config.backend.host.clone_from(host);
        }
        if let Some(port) = self.port {
            config.backend.port = port;
        }
        if let Some(ref model) = self.model {
            config.backend.chat_model.clone_from(model);
            config.backend.summarizer_model.clone_from(model);
            config.backend.question_model.clone_from(model);
        }

        config.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_toml(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = BuddyConfig::default();

        assert_eq!(config.registry.max_sessions_per_caller, 4);
        assert_eq!(config.registry.idle_timeout, Duration::from_secs(60));
        assert_eq!(config.registry.sweep_interval, Duration::from_millis(1000));
        assert_eq!(config.registry.terminal_retention, Duration::from_secs(300));
        assert_eq!(config.backend.port, 11434);
        assert_eq!(config.backend.channel_capacity, 100);
        assert_eq!(config.documents_dir, PathBuf::from("uploaded_docs"));
        assert_eq!(config.context_messages, 6);
        assert_eq!(config.source(), ConfigSource::Default);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_config_path() {
        if let Some(p) = default_config_path() {
            assert!(p.ends_with("exam-buddy/buddy.toml"));
        }
    }

    #[test]
    fn test_parse_partial_toml() {
        let file = write_toml(
            r#"
[sessions]
max_sessions_per_caller = 2
sweep_interval_ms = 250

[backend]
question_model = "qwen2.5"

[knowledge]
documents_dir = "/srv/docs"
"#,
        );

        let mut config = BuddyConfig::default();
        let parsed: BuddyToml = toml::from_str(&std::fs::read_to_string(file.path()).unwrap()).unwrap();
        apply_toml_config(&mut config, &parsed);

        assert_eq!(config.registry.max_sessions_per_caller, 2);
        assert_eq!(config.registry.sweep_interval, Duration::from_millis(250));
        assert_eq!(config.registry.idle_timeout, Duration::from_secs(60));
        assert_eq!(config.backend.question_model, "qwen2.5");
        assert_eq!(config.backend.chat_model, DEFAULT_MODEL);
        assert_eq!(config.documents_dir, PathBuf::from("/srv/docs"));
    }

    #[test]
    fn test_empty_toml_keeps_defaults() {
        let parsed: BuddyToml = toml::from_str("").unwrap();
        let mut config = BuddyConfig::default();
        apply_toml_config(&mut config, &parsed);
        assert_eq!(config.registry, RegistryConfig::default());
        assert_eq!(config.backend, BackendSettings::default());
    }

    #[test]
    fn test_missing_file_graceful() {
        let path = PathBuf::from("/nonexistent/exam-buddy/buddy.toml");
        let config = load_config_from_path(Some(path)).unwrap();
        assert!(config.config_file_path.is_none());
    }

    #[test]
    fn test_load_records_file_path() {
        let file = write_toml("[transcript]\ncontext_messages = 2\n");
        let config = load_config_from_path(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(config.context_messages, 2);
        assert_eq!(config.config_file_path.as_deref(), Some(file.path()));
    }

    #[test]
    fn test_malformed_toml_error() {
        let file = write_toml("[sessions\nmax_sessions_per_caller = \"four\"\n");
        let result = load_config_from_path(Some(file.path().to_path_buf()));
        assert!(matches!(result.unwrap_err(), ConfigError::ParseError(_)));
    }

    #[test]
    fn test_zero_values_rejected() {
        let file = write_toml("[sessions]\nmax_sessions_per_caller = 0\n");
        let result = load_config_from_path(Some(file.path().to_path_buf()));
        assert!(matches!(result.unwrap_err(), ConfigError::ValidationError(_)));

        let mut config = BuddyConfig::default();
        config.registry.sweep_interval = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_overrides_file() {
        let mut config = BuddyConfig::default();
        let parsed: BuddyToml =
            toml::from_str("[backend]\nchat_model = \"file-model\"\nport = 9000\n").unwrap();
        apply_toml_config(&mut config, &parsed);

        apply_env_config(
            &mut config,
            env(&[
                ("BUDDY_CHAT_MODEL", "env-model"),
                ("BUDDY_MAX_SESSIONS", "7"),
                ("OLLAMA_PORT", "not-a-port"),
            ]),
        );

        assert_eq!(config.backend.chat_model, "env-model");
        assert_eq!(config.registry.max_sessions_per_caller, 7);
        assert_eq!(config.backend.port, 9000);
        assert_eq!(config.source(), ConfigSource::Env);
    }

    #[test]
    fn test_unparseable_env_values_skipped() {
        let mut config = BuddyConfig::default();
        apply_env_config(
            &mut config,
            env(&[
                ("BUDDY_IDLE_TIMEOUT", "soon"),
                ("BUDDY_SWEEP_INTERVAL_MS", "-5"),
                ("BUDDY_TEMPERATURE", "warm"),
            ]),
        );

        assert_eq!(config.registry.idle_timeout, Duration::from_secs(60));
        assert_eq!(config.registry.sweep_interval, Duration::from_millis(1000));
        assert!((config.backend.temperature - 0.7).abs() < f32::EPSILON);
        assert_eq!(config.source(), ConfigSource::Default);

        apply_env_config(&mut config, env(&[("BUDDY_MAX_SESSIONS", " 3 ")]));
        assert_eq!(config.registry.max_sessions_per_caller, 3);
    }

    #[test]
    fn test_zero_request_timeout_rejected() {
        let file = write_toml("[backend]\nrequest_timeout_secs = 0\n");
        let result = load_config_from_path(Some(file.path().to_path_buf()));
        assert!(matches!(result.unwrap_err(), ConfigError::ValidationError(_)));
    }

    #[test]
    fn test_temperature_from_file_and_range() {
        let file = write_toml("[backend]\ntemperature = 0.2\n");
        let config = load_config_from_path(Some(file.path().to_path_buf())).unwrap();
        assert!((config.backend.temperature - 0.2).abs() < f32::EPSILON);
        assert!((config.dispatcher_config().temperature - 0.2).abs() < f32::EPSILON);

        let file = write_toml("[backend]\ntemperature = 1.5\n");
        let result = load_config_from_path(Some(file.path().to_path_buf()));
        assert!(matches!(result.unwrap_err(), ConfigError::ValidationError(_)));
    }

    #[test]
    fn test_no_env_keeps_source() {
        let mut config = BuddyConfig::default();
        apply_env_config(&mut config, env(&[]));
        assert_eq!(config.source(), ConfigSource::Default);
    }

    #[test]
    fn test_cli_overrides_env() {
        let mut config = BuddyConfig::default();
        apply_env_config(&mut config, env(&[("BUDDY_DOCUMENTS_DIR", "/env/docs")]));

        ConfigOverrides::new()
            .with_documents_dir(PathBuf::from("/cli/docs"))
            .with_model("mistral".to_string())
            .apply(&mut config)
            .unwrap();

        assert_eq!(config.documents_dir, PathBuf::from("/cli/docs"));
        assert_eq!(config.backend.summarizer_model, "mistral");
        assert_eq!(config.source(), ConfigSource::Cli);
    }

    #[test]
    fn test_cli_override_validated() {
        let mut config = BuddyConfig::default();
        let result = ConfigOverrides::new().with_max_sessions(0).apply(&mut config);
        assert!(result.is_err());
    }

    #[test]
    fn test_dispatcher_config_uses_models() {
        let mut config = BuddyConfig::default();
        config.backend.summarizer_model = "gemma2".to_string();
        let dispatcher = config.dispatcher_config();
        assert_eq!(dispatcher.summarizer_model, "gemma2");
        assert_eq!(dispatcher.context_messages, 6);
    }

    #[test]
    fn test_config_source_display() {
        assert_eq!(ConfigSource::Cli.to_string(), "CLI");
        assert_eq!(ConfigSource::Env.to_string(), "environment");
        assert_eq!(ConfigSource::File.to_string(), "config file");
        assert_eq!(ConfigSource::Default.to_string(), "default");
    }
}
