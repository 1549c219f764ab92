//! TOML Configuration File Support
//!
//! Centralized configuration loading for the relay, supporting a TOML file at
//! `~/.config/chat-relay/relay.toml`.
//!
//! # Configuration Priority
//!
//! Values are resolved with the following priority (highest first):
//! 1. CLI arguments (applied through [`ConfigOverrides`])
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Environment Variables
//!
//! | Variable | Field |
//! |---|---|
//! | `OLLAMA_BASE_URL` | backend host |
//! | `OLLAMA_PORT` | backend port |
//! | `TIMEOUT` | generation timeout in seconds |
//! | `INITMODEL` | default model |
//! | `DEFAULT_TEMPERATURE` | default sampling temperature |
//! | `SYSTEM_PROMPT` | system prompt installed on first start |
//! | `RELAY_DATABASE` | SQLite database path |
//!
//! # Example Configuration
//!
//! ```toml
//! [backend]
//! host = "localhost"
//! port = 11434
//! timeout_secs = 3000
//!
//! [conversation]
//! default_model = "llama3.2"
//! default_temperature = 0.7
//! speaker_label = "Marvin"
//! page_limit = 4096
//! max_thread_depth = 20
//! stream_previews = false
//!
//! [group]
//! bot_mention = "@marvin_bot"
//! trigger_word = "marv"
//! random_reply_rate = 0.1
//!
//! [storage]
//! database_path = "/var/lib/chat-relay/users.db"
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backend::BackendConfig;
use crate::markup::DEFAULT_PAGE_LIMIT;

/// Smallest page limit that still leaves room for a footer and some text
pub const MIN_PAGE_LIMIT: usize = 64;

// =============================================================================
// Error Types
// =============================================================================

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

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where a configuration value came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
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
// TOML Configuration Structures
// =============================================================================

/// Backend section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendToml {
    /// Generation server host
    pub host: Option<String>,

    /// Generation server port
    pub port: Option<u16>,

    /// Generation request timeout in seconds
    pub timeout_secs: Option<u64>,
}

/// Conversation section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationToml {
    /// Model used until an operator switches
    pub default_model: Option<String>,

    /// Temperature for new sessions
    pub default_temperature: Option<f32>,

    /// System prompt installed on first start
    pub system_prompt: Option<String>,

    /// Name the model prefixes its replies with
    pub speaker_label: Option<String>,

    /// Maximum characters per delivered page
    pub page_limit: Option<usize>,

    /// Maximum messages collected from a reply thread
    pub max_thread_depth: Option<usize>,

    /// Send partial replies at sentence boundaries
    pub stream_previews: Option<bool>,
}

/// Group chat section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupToml {
    /// Mention that addresses the bot
    pub bot_mention: Option<String>,

    /// Word that makes the bot answer anywhere in a message
    pub trigger_word: Option<String>,

    /// Chance of answering an unaddressed message
    pub random_reply_rate: Option<f64>,
}

/// Storage section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageToml {
    /// SQLite database file
    pub database_path: Option<PathBuf>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayToml {
    /// Backend configuration section
    pub backend: BackendToml,

    /// Conversation configuration section
    pub conversation: ConversationToml,

    /// Group chat configuration section
    pub group: GroupToml,

    /// Storage configuration section
    pub storage: StorageToml,
}

// =============================================================================
// Main Configuration Struct
// =============================================================================

/// Centralized configuration for the relay
///
/// Use [`load_config`] to load it with proper priority handling, then
/// [`ConfigOverrides::apply`] for CLI values and [`RelayConfig::validate`]
/// before use.
#[derive(Clone, Debug, PartialEq)]
pub struct RelayConfig {
    /// Generation backend connection
    pub backend: BackendConfig,

    /// Model used until an operator switches
    pub default_model: String,

    /// Temperature for new sessions
    pub default_temperature: f32,

    /// System prompt installed on first start
    pub system_prompt: Option<String>,

    /// Name the model prefixes its replies with
    pub speaker_label: String,

    /// Maximum characters per delivered page
    pub page_limit: usize,

    /// Maximum messages collected from a reply thread
    pub max_thread_depth: usize,

    /// Send partial replies at sentence boundaries
    pub stream_previews: bool,

    /// Mention that addresses the bot in groups
    pub bot_mention: String,

    /// Word that makes the bot answer anywhere in a group message
    pub trigger_word: String,

    /// Chance of answering an unaddressed group message
    pub random_reply_rate: f64,

    /// SQLite database file, `None` for in-memory storage
    pub database_path: Option<PathBuf>,

    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,

    /// Source of configuration values
    source: ConfigSource,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig::default(),
            default_model: "llama3.2".to_string(),
            default_temperature: 0.7,
            system_prompt: None,
            speaker_label: "Marvin".to_string(),
            page_limit: DEFAULT_PAGE_LIMIT,
            max_thread_depth: 20,
            stream_previews: false,
            bot_mention: String::new(),
            trigger_word: "marv".to_string(),
            random_reply_rate: 0.1,
            database_path: None,
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl RelayConfig {
    /// Create a new configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the primary source of this configuration
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Set the configuration source
    pub fn set_source(&mut self, source: ConfigSource) {
        self.source = source;
    }

    /// Check value ranges
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] naming the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.default_temperature) {
            return Err(ConfigError::ValidationError(format!(
                "default_temperature must be between 0.0 and 1.0, got {}",
                self.default_temperature
            )));
        }
        if self.page_limit < MIN_PAGE_LIMIT {
            return Err(ConfigError::ValidationError(format!(
                "page_limit must be at least {MIN_PAGE_LIMIT}, got {}",
                self.page_limit
            )));
        }
        if !(0.0..=1.0).contains(&self.random_reply_rate) {
            return Err(ConfigError::ValidationError(format!(
                "random_reply_rate must be between 0.0 and 1.0, got {}",
                self.random_reply_rate
            )));
        }
        if self.max_thread_depth == 0 {
            return Err(ConfigError::ValidationError(
                "max_thread_depth must be at least 1".to_string(),
            ));
        }
        if self.backend.host.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "backend host must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/chat-relay/relay.toml` or
/// `~/.config/chat-relay/relay.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("chat-relay").join("relay.toml"))
}

/// Load configuration from all sources with proper priority
///
/// CLI arguments are not handled here; apply [`ConfigOverrides`] afterwards.
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed.
/// A missing config file is not an error (defaults are used).
pub async fn load_config() -> Result<RelayConfig, ConfigError> {
    load_config_from_path(default_config_path()).await
}

/// Load configuration from a specific path
///
/// # Arguments
///
/// * `path` - Optional path to the configuration file. If `None`, only defaults
///   and environment variables are used.
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed.
pub async fn load_config_from_path(path: Option<PathBuf>) -> Result<RelayConfig, ConfigError> {
    let mut config = RelayConfig::default();

    if let Some(ref config_path) = path {
        if tokio::fs::try_exists(config_path).await.unwrap_or(false) {
            let toml_content = tokio::fs::read_to_string(config_path)
                .await
                .map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: RelayToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config);
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_config(&mut config, |name| std::env::var(name).ok());

    Ok(config)
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut RelayConfig, toml: &RelayToml) {
    // Backend
    if let Some(ref host) = toml.backend.host {
        config.backend.host.clone_from(host);
    }
    if let Some(port) = toml.backend.port {
        config.backend.port = port;
    }
    if let Some(secs) = toml.backend.timeout_secs {
        config.backend.timeout = Duration::from_secs(secs);
    }

    // Conversation
    let conversation = &toml.conversation;
    if let Some(ref model) = conversation.default_model {
        config.default_model.clone_from(model);
    }
    if let Some(temperature) = conversation.default_temperature {
        config.default_temperature = temperature;
    }
    if conversation.system_prompt.is_some() {
        config.system_prompt.clone_from(&conversation.system_prompt);
    }
    if let Some(ref label) = conversation.speaker_label {
        config.speaker_label.clone_from(label);
    }
    if let Some(limit) = conversation.page_limit {
        config.page_limit = limit;
    }
    if let Some(depth) = conversation.max_thread_depth {
        config.max_thread_depth = depth;
    }
    if let Some(previews) = conversation.stream_previews {
        config.stream_previews = previews;
    }

    // Group
    if let Some(ref mention) = toml.group.bot_mention {
        config.bot_mention.clone_from(mention);
    }
    if let Some(ref word) = toml.group.trigger_word {
        config.trigger_word.clone_from(word);
    }
    if let Some(rate) = toml.group.random_reply_rate {
        config.random_reply_rate = rate;
    }

    // Storage
    if toml.storage.database_path.is_some() {
        config.database_path.clone_from(&toml.storage.database_path);
    }
}

/// Apply environment variable overrides to the config
///
/// `lookup` resolves a variable name; unparsable numbers are ignored with a
/// warning and leave the previous value in place.
fn apply_env_config<F>(config: &mut RelayConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(host) = lookup("OLLAMA_BASE_URL") {
        config.backend.host = host;
        config.source = ConfigSource::Env;
    }
    if let Some(port) = parse_env(&lookup, "OLLAMA_PORT") {
        config.backend.port = port;
        config.source = ConfigSource::Env;
    }
    if let Some(secs) = parse_env::<u64, _>(&lookup, "TIMEOUT") {
        config.backend.timeout = Duration::from_secs(secs);
        config.source = ConfigSource::Env;
    }
    if let Some(model) = lookup("INITMODEL") {
        config.default_model = model;
        config.source = ConfigSource::Env;
    }
    if let Some(temperature) = parse_env(&lookup, "DEFAULT_TEMPERATURE") {
        config.default_temperature = temperature;
        config.source = ConfigSource::Env;
    }
    if let Some(prompt) = lookup("SYSTEM_PROMPT") {
        config.system_prompt = Some(prompt).filter(|p| !p.trim().is_empty());
        config.source = ConfigSource::Env;
    }
    if let Some(path) = lookup("RELAY_DATABASE") {
        config.database_path = Some(PathBuf::from(path));
        config.source = ConfigSource::Env;
    }
}

fn parse_env<T, F>(lookup: &F, name: &str) -> Option<T>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(name)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(variable = name, value = %raw, "Ignoring unparsable environment value");
            None
        }
    }
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Builder for applying CLI overrides to configuration
///
/// Use this after [`load_config`] to apply command-line argument overrides.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Backend host override
    pub host: Option<String>,

    /// Backend port override
    pub port: Option<u16>,

    /// Default model override
    pub default_model: Option<String>,

    /// Database path override
    pub database_path: Option<PathBuf>,

    /// Preview streaming override
    pub stream_previews: Option<bool>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set backend host override
    #[must_use]
    pub fn with_host(mut self, host: String) -> Self {
        self.host = Some(host);
        self
    }

    /// Set backend port override
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Set default model override
    #[must_use]
    pub fn with_default_model(mut self, model: String) -> Self {
        self.default_model = Some(model);
        self
    }

    /// Set database path override
    #[must_use]
    pub fn with_database_path(mut self, path: PathBuf) -> Self {
        self.database_path = Some(path);
        self
    }

    /// Set preview streaming override
    #[must_use]
    pub fn with_stream_previews(mut self, enabled: bool) -> Self {
        self.stream_previews = Some(enabled);
        self
    }

    fn is_empty(&self) -> bool {
        self.host.is_none()
            && self.port.is_none()
            && self.default_model.is_none()
            && self.database_path.is_none()
            && self.stream_previews.is_none()
    }

    /// Apply overrides to a configuration
    pub fn apply(&self, config: &mut RelayConfig) {
        if self.is_empty() {
            return;
        }
        config.source = ConfigSource::Cli;

        if let Some(ref host) = self.host {
            config.backend.host.clone_from(host);
        }
        if let Some(port) = self.port {
            config.backend.port = port;
        }
        if let Some(ref model) = self.default_model {
            config.default_model.clone_from(model);
        }
        if self.database_path.is_some() {
            config.database_path.clone_from(&self.database_path);
        }
        if let Some(enabled) = self.stream_previews {
            config.stream_previews = enabled;
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
