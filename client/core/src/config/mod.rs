//! Client Configuration
//!
//! Loads [`ClientConfig`] from a TOML file at
//! `$XDG_CONFIG_HOME/read-until/client.toml` (typically
//! `~/.config/read-until/client.toml`).
//!
//! # Configuration Priority
//!
//! Values are applied in this order (highest first):
//! 1. CLI arguments, via [`ConfigOverrides`]
//! 2. `READ_UNTIL_*` environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [cache]
//! size = 512
//! policy = "replace"          # or "accumulate"
//!
//! [filter]
//! strands = true
//! one_chunk = true
//! classes = ["strand", "adapter"]
//!
//! [stream]
//! first_channel = 1
//! last_channel = 512
//! min_chunk_size = 0
//! action_batch = 1000
//! action_throttle_ms = 1
//! raw_data_type = "calibrated" # or "uncalibrated"
//!
//! [client]
//! reset_timeout_ms = 5000
//! unblock_duration_ms = 100
//! ```

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::action_queue::DEFAULT_UNBLOCK_DURATION;
use crate::cache::{SameReadPolicy, DEFAULT_CACHE_SIZE};
use crate::chunk::{ClassificationMap, DEFAULT_PREFILTER_CLASSES};
use crate::messages::RawDataType;
use crate::session::SessionOptions;

/// Default time `reset()` waits for the session to wind down
pub const DEFAULT_RESET_TIMEOUT: Duration = Duration::from_secs(5);

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

/// Cache section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheToml {
    /// Maximum channels cached
    pub size: Option<usize>,

    /// Same-read policy
    pub policy: Option<SameReadPolicy>,
}

/// Filter section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterToml {
    /// Cache only strand-like chunks
    pub strands: Option<bool>,

    /// Stop every read after its first chunk
    pub one_chunk: Option<bool>,

    /// Class names accepted by the prefilter
    pub classes: Option<Vec<String>>,
}

/// Stream section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamToml {
    /// Lowest channel streamed
    pub first_channel: Option<u32>,

    /// Highest channel streamed
    pub last_channel: Option<u32>,

    /// Requested minimum chunk size in samples
    pub min_chunk_size: Option<u64>,

    /// Maximum actions per outbound message
    pub action_batch: Option<usize>,

    /// Pause between send-path polls in milliseconds
    pub action_throttle_ms: Option<u64>,

    /// Calibrated or raw signal
    pub raw_data_type: Option<RawDataType>,
}

/// Client section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientToml {
    /// How long `reset()` waits, in milliseconds
    pub reset_timeout_ms: Option<u64>,

    /// Default unblock duration, in milliseconds
    pub unblock_duration_ms: Option<u64>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadUntilToml {
    /// Cache section
    pub cache: CacheToml,

    /// Filter section
    pub filter: FilterToml,

    /// Stream section
    pub stream: StreamToml,

    /// Client section
    pub client: ClientToml,
}

// =============================================================================
// Main Configuration Struct
// =============================================================================

/// Configuration for a [`ReadUntilClient`](crate::ReadUntilClient)
#[derive(Clone, Debug, PartialEq)]
pub struct ClientConfig {
    /// Maximum channels cached
    pub cache_size: usize,

    /// What the cache does with a second chunk of the same read
    pub same_read_policy: SameReadPolicy,

    /// Cache only chunks carrying one of `prefilter_classes`
    pub filter_strands: bool,

    /// Stop every read after its first chunk
    pub one_chunk: bool,

    /// Class names accepted by the prefilter
    pub prefilter_classes: BTreeSet<String>,

    /// How long `reset()` waits for the session to wind down
    pub reset_timeout: Duration,

    /// Unblock duration used when the caller has no preference
    pub unblock_duration: Duration,

    /// Options for `run()` when the caller has no preference
    pub session: SessionOptions,

    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,

    source: ConfigSource,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            cache_size: DEFAULT_CACHE_SIZE,
            same_read_policy: SameReadPolicy::Replace,
            filter_strands: true,
            one_chunk: true,
            prefilter_classes: DEFAULT_PREFILTER_CLASSES
                .iter()
                .map(ToString::to_string)
                .collect(),
            reset_timeout: DEFAULT_RESET_TIMEOUT,
            unblock_duration: DEFAULT_UNBLOCK_DURATION,
            session: SessionOptions::default(),
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl ClientConfig {
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

    /// Set the maximum number of cached channels
    #[must_use]
    pub fn with_cache_size(mut self, cache_size: usize) -> Self {
        self.cache_size = cache_size;
        self
    }

    /// Set what the cache does with a second chunk of the same read
    #[must_use]
    pub fn with_same_read_policy(mut self, policy: SameReadPolicy) -> Self {
        self.same_read_policy = policy;
        self
    }

    /// Enable or disable the classification prefilter
    #[must_use]
    pub fn with_filter_strands(mut self, filter_strands: bool) -> Self {
        self.filter_strands = filter_strands;
        self
    }

    /// Enable or disable one-chunk mode
    #[must_use]
    pub fn with_one_chunk(mut self, one_chunk: bool) -> Self {
        self.one_chunk = one_chunk;
        self
    }

    /// Check the configuration against the default classification map
    ///
    /// # Errors
    ///
    /// See [`ClientConfig::validate_with`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_with(&ClassificationMap::default())
    }

    /// Check the configuration against `classes`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] for a zero cache size, a
    /// prefilter with no class (or none `classes` knows), or unusable
    /// session options.
    pub fn validate_with(&self, classes: &ClassificationMap) -> Result<(), ConfigError> {
        if self.cache_size < 1 {
            return Err(ConfigError::ValidationError(
                "cache_size must be at least 1".to_string(),
            ));
        }
        if self.filter_strands {
            if self.prefilter_classes.is_empty() {
                return Err(ConfigError::ValidationError(
                    "filter_strands is enabled but no prefilter classes are set".to_string(),
                ));
            }
            if self.prefilter_codes(classes).is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "none of the prefilter classes {:?} are known",
                    self.prefilter_classes
                )));
            }
        }
        self.session.validate().map_err(ConfigError::ValidationError)
    }

    /// Classification codes accepted by the prefilter
    #[must_use]
    pub fn prefilter_codes(&self, classes: &ClassificationMap) -> BTreeSet<i32> {
        classes.codes_for(self.prefilter_classes.iter().map(String::as_str))
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/read-until/client.toml` or
/// `~/.config/read-until/client.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("read-until").join("client.toml"))
}

/// Load configuration from all sources with proper priority
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed.
/// A missing config file is not an error (defaults are used).
pub fn load_config() -> Result<ClientConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path and the process environment
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<ClientConfig, ConfigError> {
    load_config_with_env(path, |key| std::env::var(key).ok())
}

/// Load configuration, reading environment values through `env`
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed.
pub fn load_config_with_env<F>(path: Option<PathBuf>, env: F) -> Result<ClientConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = ClientConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: ReadUntilToml = toml::from_str(&toml_content)?;
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

    apply_env_config(&mut config, env);

    Ok(config)
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut ClientConfig, toml: &ReadUntilToml) {
    if let Some(size) = toml.cache.size {
        config.cache_size = size;
    }
    if let Some(policy) = toml.cache.policy {
        config.same_read_policy = policy;
    }

    if let Some(strands) = toml.filter.strands {
        config.filter_strands = strands;
    }
    if let Some(one_chunk) = toml.filter.one_chunk {
        config.one_chunk = one_chunk;
    }
    if let Some(ref classes) = toml.filter.classes {
        config.prefilter_classes = classes.iter().cloned().collect();
    }

    let stream = &toml.stream;
    if let Some(first) = stream.first_channel {
        config.session.first_channel = first;
    }
    if let Some(last) = stream.last_channel {
        config.session.last_channel = last;
    }
    if let Some(min_chunk_size) = stream.min_chunk_size {
        config.session.min_chunk_size = min_chunk_size;
    }
    if let Some(batch) = stream.action_batch {
        config.session.action_batch = batch;
    }
    if let Some(throttle) = stream.action_throttle_ms {
        config.session.action_throttle = Duration::from_millis(throttle);
    }
    if let Some(raw_data_type) = stream.raw_data_type {
        config.session.raw_data_type = raw_data_type;
    }

    if let Some(timeout) = toml.client.reset_timeout_ms {
        config.reset_timeout = Duration::from_millis(timeout);
    }
    if let Some(duration) = toml.client.unblock_duration_ms {
        config.unblock_duration = Duration::from_millis(duration);
    }
}

fn parse_flag(value: &str) -> bool {
    value != "0" && value.to_lowercase() != "false"
}

/// Apply environment variable overrides to the config
fn apply_env_config<F>(config: &mut ClientConfig, env: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(size) = env("READ_UNTIL_CACHE_SIZE") {
        if let Ok(size) = size.parse::<usize>() {
            config.cache_size = size;
            config.source = ConfigSource::Env;
        }
    }
    if let Some(policy) = env("READ_UNTIL_CACHE_POLICY") {
        let policy = match policy.to_lowercase().as_str() {
            "replace" => Some(SameReadPolicy::Replace),
            "accumulate" => Some(SameReadPolicy::Accumulate),
            _ => None,
        };
        if let Some(policy) = policy {
            config.same_read_policy = policy;
            config.source = ConfigSource::Env;
        }
    }

    if let Some(strands) = env("READ_UNTIL_FILTER_STRANDS") {
        config.filter_strands = parse_flag(&strands);
        config.source = ConfigSource::Env;
    }
    if let Some(one_chunk) = env("READ_UNTIL_ONE_CHUNK") {
        config.one_chunk = parse_flag(&one_chunk);
        config.source = ConfigSource::Env;
    }
    if let Some(classes) = env("READ_UNTIL_PREFILTER_CLASSES") {
        config.prefilter_classes = classes
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(ToString::to_string)
            .collect();
        config.source = ConfigSource::Env;
    }

    if let Some(first) = env("READ_UNTIL_FIRST_CHANNEL") {
        if let Ok(first) = first.parse::<u32>() {
            config.session.first_channel = first;
            config.source = ConfigSource::Env;
        }
    }
    if let Some(last) = env("READ_UNTIL_LAST_CHANNEL") {
        if let Ok(last) = last.parse::<u32>() {
            config.session.last_channel = last;
            config.source = ConfigSource::Env;
        }
    }
    if let Some(min_chunk_size) = env("READ_UNTIL_MIN_CHUNK_SIZE") {
        if let Ok(samples) = min_chunk_size.parse::<u64>() {
            config.session.min_chunk_size = samples;
            config.source = ConfigSource::Env;
        }
    }
    if let Some(batch) = env("READ_UNTIL_ACTION_BATCH") {
        if let Ok(batch) = batch.parse::<usize>() {
            config.session.action_batch = batch;
            config.source = ConfigSource::Env;
        }
    }

    if let Some(timeout) = env("READ_UNTIL_RESET_TIMEOUT_MS") {
        if let Ok(ms) = timeout.parse::<u64>() {
            config.reset_timeout = Duration::from_millis(ms);
            config.source = ConfigSource::Env;
        }
    }
    if let Some(duration) = env("READ_UNTIL_UNBLOCK_DURATION_MS") {
        if let Ok(ms) = duration.parse::<u64>() {
            config.unblock_duration = Duration::from_millis(ms);
            config.source = ConfigSource::Env;
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
    /// Cache size override
    pub cache_size: Option<usize>,

    /// One-chunk policy override
    pub one_chunk: Option<bool>,

    /// Channel range override
    pub channels: Option<(u32, u32)>,

    /// Minimum chunk size override (samples)
    pub min_chunk_size: Option<u64>,

    /// Action batch override
    pub action_batch: Option<usize>,

    /// Unblock duration override
    pub unblock_duration: Option<Duration>,
}

impl ConfigOverrides {
    /// Create empty overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set cache size override
    #[must_use]
    pub fn with_cache_size(mut self, size: usize) -> Self {
        self.cache_size = Some(size);
        self
    }

    /// Set one-chunk override
    #[must_use]
    pub fn with_one_chunk(mut self, enabled: bool) -> Self {
        self.one_chunk = Some(enabled);
        self
    }

    /// Set channel range override
    #[must_use]
    pub fn with_channels(mut self, first: u32, last: u32) -> Self {
        self.channels = Some((first, last));
        self
    }

    /// Set minimum chunk size override
    #[must_use]
    pub fn with_min_chunk_size(mut self, samples: u64) -> Self {
        self.min_chunk_size = Some(samples);
        self
    }

    /// Set action batch override
    #[must_use]
    pub fn with_action_batch(mut self, batch: usize) -> Self {
        self.action_batch = Some(batch);
        self
    }

    /// Set unblock duration override
    #[must_use]
    pub fn with_unblock_duration(mut self, duration: Duration) -> Self {
        self.unblock_duration = Some(duration);
        self
    }

    /// Apply overrides to a configuration
    pub fn apply(&self, config: &mut ClientConfig) {
        let mut applied = false;

        if let Some(size) = self.cache_size {
            config.cache_size = size;
            applied = true;
        }
        if let Some(one_chunk) = self.one_chunk {
            config.one_chunk = one_chunk;
            applied = true;
        }
        if let Some((first, last)) = self.channels {
            config.session.first_channel = first;
            config.session.last_channel = last;
            applied = true;
        }
        if let Some(samples) = self.min_chunk_size {
            config.session.min_chunk_size = samples;
            applied = true;
        }
        if let Some(batch) = self.action_batch {
            config.session.action_batch = batch;
            applied = true;
        }
        if let Some(duration) = self.unblock_duration {
            config.unblock_duration = duration;
            applied = true;
        }

        if applied {
            config.source = ConfigSource::Cli;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    fn write_toml(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.cache_size, 512);
        assert_eq!(config.same_read_policy, SameReadPolicy::Replace);
        assert!(config.filter_strands);
        assert!(config.one_chunk);
        assert_eq!(
            config.prefilter_classes,
            BTreeSet::from(["adapter".to_string(), "strand".to_string()])
        );
        assert_eq!(config.reset_timeout, Duration::from_secs(5));
        assert_eq!(config.unblock_duration, Duration::from_millis(100));
        assert_eq!(config.session, SessionOptions::default());
        assert_eq!(config.source(), ConfigSource::Default);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_config_path() {
        if let Some(path) = default_config_path() {
            assert!(path.ends_with("read-until/client.toml"));
        }
    }

    #[test]
    fn test_parse_valid_toml() {
        let file = write_toml(
            r#"
[cache]
size = 64
policy = "accumulate"

[filter]
strands = false
one_chunk = false
classes = ["strand"]

[stream]
first_channel = 10
last_channel = 20
min_chunk_size = 2000
action_batch = 50
action_throttle_ms = 5
raw_data_type = "uncalibrated"

[client]
reset_timeout_ms = 1500
unblock_duration_ms = 250
"#,
        );

        let config = load_config_with_env(Some(file.path().to_path_buf()), no_env).unwrap();
        assert_eq!(config.cache_size, 64);
        assert_eq!(config.same_read_policy, SameReadPolicy::Accumulate);
        assert!(!config.filter_strands);
        assert!(!config.one_chunk);
        assert_eq!(config.prefilter_classes, BTreeSet::from(["strand".to_string()]));
        assert_eq!(
            config.session,
            SessionOptions {
                first_channel: 10,
                last_channel: 20,
                min_chunk_size: 2000,
                action_batch: 50,
                action_throttle: Duration::from_millis(5),
                raw_data_type: RawDataType::Uncalibrated,
            }
        );
        assert_eq!(config.reset_timeout, Duration::from_millis(1500));
        assert_eq!(config.unblock_duration, Duration::from_millis(250));
        assert_eq!(config.source(), ConfigSource::File);
        assert_eq!(config.config_file_path.as_deref(), Some(file.path()));
    }

    #[test]
    fn test_parse_partial_toml() {
        let file = write_toml("[cache]\nsize = 8\n");
        let config = load_config_with_env(Some(file.path().to_path_buf()), no_env).unwrap();
        assert_eq!(config.cache_size, 8);
        assert!(config.one_chunk);
        assert_eq!(config.session.last_channel, 512);
    }

    #[test]
    fn test_missing_file_graceful() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let config = load_config_with_env(Some(path), no_env).unwrap();
        assert_eq!(config.source(), ConfigSource::Default);
        assert!(config.config_file_path.is_none());
    }

    #[test]
    fn test_malformed_toml_error() {
        let file = write_toml("[cache\nsize = ");
        let result = load_config_with_env(Some(file.path().to_path_buf()), no_env);
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_env_overrides_file() {
        let file = write_toml("[cache]\nsize = 8\n[filter]\none_chunk = true\n");
        let env = env_from(&[
            ("READ_UNTIL_CACHE_SIZE", "32"),
            ("READ_UNTIL_ONE_CHUNK", "false"),
            ("READ_UNTIL_CACHE_POLICY", "Accumulate"),
            ("READ_UNTIL_PREFILTER_CLASSES", "strand, pore,"),
            ("READ_UNTIL_LAST_CHANNEL", "126"),
            ("READ_UNTIL_RESET_TIMEOUT_MS", "not-a-number"),
        ]);

        let config = load_config_with_env(Some(file.path().to_path_buf()), env).unwrap();
        assert_eq!(config.cache_size, 32);
        assert!(!config.one_chunk);
        assert_eq!(config.same_read_policy, SameReadPolicy::Accumulate);
        assert_eq!(
            config.prefilter_classes,
            BTreeSet::from(["pore".to_string(), "strand".to_string()])
        );
        assert_eq!(config.session.last_channel, 126);
        assert_eq!(config.reset_timeout, DEFAULT_RESET_TIMEOUT);
        assert_eq!(config.source(), ConfigSource::Env);
    }

    #[test]
    fn test_cli_overrides_env() {
        let env = env_from(&[("READ_UNTIL_CACHE_SIZE", "32")]);
        let mut config = load_config_with_env(None, env).unwrap();
        ConfigOverrides::new()
            .with_cache_size(4)
            .with_channels(1, 2)
            .with_unblock_duration(Duration::from_millis(50))
            .apply(&mut config);

        assert_eq!(config.cache_size, 4);
        assert_eq!((config.session.first_channel, config.session.last_channel), (1, 2));
        assert_eq!(config.unblock_duration, Duration::from_millis(50));
        assert_eq!(config.source(), ConfigSource::Cli);
    }

    #[test]
    fn test_config_overrides_empty_no_change() {
        let mut config = ClientConfig::default();
        ConfigOverrides::new().apply(&mut config);
        assert_eq!(config, ClientConfig::default());
    }

    #[test]
    fn test_validation_failures() {
        let zero = ClientConfig {
            cache_size: 0,
            ..ClientConfig::default()
        };
        assert!(matches!(zero.validate(), Err(ConfigError::ValidationError(_))));

        let no_classes = ClientConfig {
            prefilter_classes: BTreeSet::new(),
            ..ClientConfig::default()
        };
        assert!(no_classes.validate().is_err());

        let unfiltered = ClientConfig {
            filter_strands: false,
            ..no_classes
        };
        assert!(unfiltered.validate().is_ok());

        let unknown = ClientConfig {
            prefilter_classes: BTreeSet::from(["nonsense".to_string()]),
            ..ClientConfig::default()
        };
        assert!(unknown.validate().is_err());

        let custom = ClassificationMap::from_pairs([(1, "nonsense")]);
        assert!(unknown.validate_with(&custom).is_ok());

        let mut inverted = ClientConfig::default();
        inverted.session = inverted.session.with_channels(9, 3);
        assert!(inverted.validate().is_err());
    }

    #[test]
    fn test_prefilter_codes() {
        let config = ClientConfig::default();
        assert_eq!(
            config.prefilter_codes(&ClassificationMap::default()),
            BTreeSet::from([65, 83])
        );
    }

    #[test]
    fn test_config_source_display() {
        assert_eq!(ConfigSource::Cli.to_string(), "CLI");
        assert_eq!(ConfigSource::Env.to_string(), "environment");
        assert_eq!(ConfigSource::File.to_string(), "config file");
        assert_eq!(ConfigSource::Default.to_string(), "default");
    }

    #[test]
    fn test_toml_round_trip() {
        let toml = ReadUntilToml {
            cache: CacheToml {
                size: Some(16),
                policy: Some(SameReadPolicy::Replace),
            },
            ..ReadUntilToml::default()
        };
        let text = toml::to_string(&toml).unwrap();
        let parsed: ReadUntilToml = toml::from_str(&text).unwrap();
        assert_eq!(parsed.cache.size, Some(16));
        assert_eq!(parsed.cache.policy, Some(SameReadPolicy::Replace));
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::ValidationError("bad".to_string());
        assert_eq!(err.to_string(), "Invalid configuration: bad");
    }
}
