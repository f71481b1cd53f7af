use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::{env, fmt};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Directory searched for the configuration files when `CONFIGS_LOCATION` is not set.
pub const DEFAULT_CONFIG_DIR: &str = ".platform";
/// Non-secret settings.
pub const CONFIG_FILE_NAME: &str = "config.json";
/// Credentials and API keys.
pub const SECRETS_FILE_NAME: &str = "secrets.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read configuration file {file}: {reason}")]
    Provider { file: String, reason: String },

    #[error("Missing configuration value '{key}' (looked up: {})", .tried.join(", "))]
    Missing { key: String, tried: Vec<String> },

    #[error("Invalid configuration value for '{key}': {reason}")]
    Invalid { key: String, reason: String },
}

/// Where a configuration value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderKind {
    Environment,
    SecretsFile,
    ConfigFile,
    Defaults,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProviderKind::Environment => "environment",
            ProviderKind::SecretsFile => "secrets file",
            ProviderKind::ConfigFile => "config file",
            ProviderKind::Defaults => "defaults",
        };
        f.write_str(name)
    }
}

/// One provider's flattened key/value pairs. Keys are normalized (see [`normalize_key`]).
#[derive(Debug, Clone)]
pub struct ProviderLayer {
    pub kind: ProviderKind,
    pub values: BTreeMap<String, String>,
}

impl ProviderLayer {
    pub fn new<K, V>(kind: ProviderKind, values: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: AsRef<str>,
        V: Into<String>,
    {
        Self {
            kind,
            values: values
                .into_iter()
                .map(|(k, v)| (normalize_key(k.as_ref()), v.into()))
                .collect(),
        }
    }
}

/// Layered configuration: environment variables, then the secrets file, then
/// the config file, then defaults. The first provider holding a key wins.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub config_dir: PathBuf,
    layers: Vec<ProviderLayer>,
}

impl RuntimeConfig {
    /// Builds a configuration from explicit layers, highest precedence first.
    pub fn from_layers(config_dir: PathBuf, mut layers: Vec<ProviderLayer>) -> Self {
        layers.sort_by_key(|layer| provider_rank(layer.kind));
        Self { config_dir, layers }
    }

    /// Adds (or extends) the defaults layer. Existing default keys are kept.
    pub fn with_defaults<'a>(mut self, defaults: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let extra = ProviderLayer::new(ProviderKind::Defaults, defaults);
        match self
            .layers
            .iter_mut()
            .find(|layer| layer.kind == ProviderKind::Defaults)
        {
            Some(layer) => {
                for (k, v) in extra.values {
                    layer.values.entry(k).or_insert(v);
                }
            }
            None => self.layers.push(extra),
        }
        self
    }

    /// Looks up one exact key across all providers.
    pub fn get(&self, key: &str) -> Option<&str> {
        let key = normalize_key(key);
        self.layers
            .iter()
            .find_map(|layer| layer.values.get(&key).map(String::as_str))
    }

    /// Tries every candidate key in each provider before moving to the next provider,
    /// so a generic environment variable still beats a specific file entry.
    pub fn lookup(&self, candidates: &[String]) -> Option<(&str, ProviderKind)> {
        self.layers.iter().find_map(|layer| {
            candidates
                .iter()
                .find_map(|key| layer.values.get(&normalize_key(key)))
                .map(|value| (value.as_str(), layer.kind))
        })
    }

    /// Resolves a source argument such as `thinkific_api_key`.
    ///
    /// Section paths are tried from most to least specific:
    /// `<pipeline>:sources:<source>:<key>`, `sources:<source>:<key>`, `sources:<key>`, `<key>`.
    pub fn resolve_source_value(&self, pipeline: &str, source: &str, key: &str) -> Option<String> {
        let candidates = source_candidates(pipeline, source, key);
        self.lookup(&candidates).map(|(value, kind)| {
            debug!(key, provider = %kind, "resolved source value");
            value.to_string()
        })
    }

    /// Like [`RuntimeConfig::resolve_source_value`], but a missing value is an error.
    pub fn require_source_value(
        &self,
        pipeline: &str,
        source: &str,
        key: &str,
    ) -> Result<String, ConfigError> {
        self.resolve_source_value(pipeline, source, key)
            .ok_or_else(|| ConfigError::Missing {
                key: key.to_string(),
                tried: source_candidates(pipeline, source, key),
            })
    }

    /// Resolves a destination credential, either the whole value (`field == None`,
    /// typically a connection string) or one named field such as `password`.
    pub fn resolve_destination_credential(
        &self,
        pipeline: &str,
        destination: &str,
        field: Option<&str>,
    ) -> Option<String> {
        let candidates = destination_candidates(pipeline, destination, field);
        self.lookup(&candidates).map(|(value, _)| value.to_string())
    }

    /// The keys tried by [`RuntimeConfig::resolve_destination_credential`], for error messages.
    pub fn destination_candidates(pipeline: &str, destination: &str, field: Option<&str>) -> Vec<String> {
        destination_candidates(pipeline, destination, field)
    }
}

impl fmt::Display for RuntimeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "RuntimeConfig")?;
        writeln!(f, "    Config dir: {}", self.config_dir.display())?;
        for layer in &self.layers {
            // Values are never printed: the secrets layer would leak.
            writeln!(f, "    {}: {} keys", layer.kind, layer.values.len())?;
        }
        Ok(())
    }
}

/// Loads the provider hierarchy from the process environment and the files in
/// `$CONFIGS_LOCATION` (default [`DEFAULT_CONFIG_DIR`]). Missing files are skipped.
pub fn get_runtime_config() -> Result<RuntimeConfig, ConfigError> {
    let config_dir = env::var("CONFIGS_LOCATION")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_DIR));
    load_runtime_config(&config_dir, env_vars_layer()?)
}

/// Same as [`get_runtime_config`] with an explicit directory and environment layer.
pub fn load_runtime_config(config_dir: &Path, environment: ProviderLayer) -> Result<RuntimeConfig, ConfigError> {
    let mut layers = vec![environment];

    for (kind, name) in [
        (ProviderKind::SecretsFile, SECRETS_FILE_NAME),
        (ProviderKind::ConfigFile, CONFIG_FILE_NAME),
    ] {
        let file = config_dir.join(name);
        if file.is_file() {
            layers.push(json_file_layer(kind, &file)?);
        } else {
            debug!(file = %file.display(), "configuration file not present");
        }
    }

    Ok(RuntimeConfig::from_layers(config_dir.to_path_buf(), layers))
}

/// Reads a JSON file through `more-config` and flattens it into a layer.
fn json_file_layer(kind: ProviderKind, file: &Path) -> Result<ProviderLayer, ConfigError> {
    use config::{ext::*, *};

    let file_name: String = file.to_string_lossy().to_string();
    let root: Box<dyn ConfigurationRoot> = DefaultConfigurationBuilder::new()
        .add_json_file(&file_name.is().optional())
        .build()
        .map_err(|e| ConfigError::Provider {
            file: file_name.clone(),
            reason: format!("{:?}", e),
        })?;
    Ok(flatten(kind, root))
}

/// Reads the process environment through `more-config`, which maps the `__`
/// separator onto `:` (`DESTINATION__SQLITE__CREDENTIALS` becomes
/// `destination:sqlite:credentials`).
pub fn env_vars_layer() -> Result<ProviderLayer, ConfigError> {
    use config::{ext::*, *};

    let root: Box<dyn ConfigurationRoot> = DefaultConfigurationBuilder::new()
        .add_env_vars()
        .build()
        .map_err(|e| ConfigError::Provider {
            file: "environment".to_string(),
            reason: format!("{:?}", e),
        })?;
    Ok(flatten(ProviderKind::Environment, root))
}

fn flatten(kind: ProviderKind, root: Box<dyn config::ConfigurationRoot>) -> ProviderLayer {
    use config::{ext::*, *};

    let mut values: Vec<(String, String)> = Vec::new();
    for (key, value) in root.iter(None) {
        values.push((key.to_string(), value.to_string()));
    }
    ProviderLayer::new(kind, values)
}

/// Lower-cases a key and maps `.` (and `__`, for hand-built layers) onto `:`.
///
/// Provider keys are case-insensitive, so `Thinkific:Destination:Postgres:Credentials`,
/// `thinkific.destination.postgres.credentials` and
/// `THINKIFIC__DESTINATION__POSTGRES__CREDENTIALS` all match the same lookup.
pub fn normalize_key(raw: &str) -> String {
    raw.trim().to_lowercase().replace("__", ":").replace('.', ":")
}

fn provider_rank(kind: ProviderKind) -> u8 {
    match kind {
        ProviderKind::Environment => 0,
        ProviderKind::SecretsFile => 1,
        ProviderKind::ConfigFile => 2,
        ProviderKind::Defaults => 3,
    }
}

fn source_candidates(pipeline: &str, source: &str, key: &str) -> Vec<String> {
    vec![
        format!("{}:sources:{}:{}", pipeline, source, key),
        format!("sources:{}:{}", source, key),
        format!("sources:{}", key),
        key.to_string(),
    ]
}

fn destination_candidates(pipeline: &str, destination: &str, field: Option<&str>) -> Vec<String> {
    let suffix = match field {
        Some(field) => format!("destination:{}:credentials:{}", destination, field),
        None => format!("destination:{}:credentials", destination),
    };
    vec![format!("{}:{}", pipeline, suffix), suffix]
}
