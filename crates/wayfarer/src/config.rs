use config::{Config, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::conversation::SummaryMethod;
use crate::providers::configs::{AzureProviderConfig, OpenAiProviderConfig, ProviderConfig};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required configuration value, set {env_var}{}", or_legacy(.legacy))]
    MissingEnvVar {
        env_var: String,
        /// The compatible `OPENAI_*` name for the same value, when there is one
        legacy: Option<String>,
    },
    #[error("Configuration error: {0}")]
    Other(#[from] config::ConfigError),
}

fn settings_key(field: &str) -> String {
    if field.contains('.') {
        field.to_string()
    } else {
        // serde only reports the leaf name; every leaf without a default lives in the provider
        format!("provider.{}", field)
    }
}

/// Map a settings key such as `provider.api_key` to its environment variable
pub fn to_env_var(field: &str) -> String {
    format!("WAYFARER_{}", settings_key(field).replace('.', "__").to_uppercase())
}

/// The legacy variable that also sets a settings key, if any
pub fn legacy_env_var(field: &str) -> Option<&'static str> {
    let key = settings_key(field);
    LEGACY_ENV
        .iter()
        .find(|(_, k)| *k == key)
        .map(|(var, _)| *var)
}

fn missing(field: &str) -> ConfigError {
    ConfigError::MissingEnvVar {
        env_var: to_env_var(field),
        legacy: legacy_env_var(field).map(str::to_string),
    }
}

fn or_legacy(legacy: &Option<String>) -> String {
    legacy
        .as_ref()
        .map(|var| format!(" (or {})", var))
        .unwrap_or_default()
}

/// Environment variables read for compatibility, mapped to their settings keys
const LEGACY_ENV: &[(&str, &str)] = &[
    ("OPENAI_API_KEY", "provider.api_key"),
    ("OPENAI_ENDPOINT", "provider.endpoint"),
    ("OPENAI_DEPLOYMENT_NAME", "provider.deployment"),
    ("OPENAI_API_VERSION", "provider.api_version"),
    ("OPENAI_EMBEDDING_DEPLOYMENT", "provider.embedding_deployment"),
    ("BING_API_KEY", "tools.bing_api_key"),
];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase", tag = "type")]
pub enum ProviderSettings {
    Azure {
        endpoint: String,
        api_key: String,
        deployment: String,
        #[serde(default = "default_api_version")]
        api_version: String,
        #[serde(default)]
        temperature: Option<f32>,
        #[serde(default)]
        max_tokens: Option<i32>,
        #[serde(default)]
        embedding_deployment: Option<String>,
    },
    OpenAi {
        #[serde(default = "default_openai_host")]
        host: String,
        api_key: String,
        #[serde(default = "default_model")]
        model: String,
        #[serde(default)]
        temperature: Option<f32>,
        #[serde(default)]
        max_tokens: Option<i32>,
        #[serde(default)]
        embedding_model: Option<String>,
    },
}

impl ProviderSettings {
    // Convert to the provider config
    pub fn into_config(self) -> ProviderConfig {
        match self {
            ProviderSettings::Azure {
                endpoint,
                api_key,
                deployment,
                api_version,
                temperature,
                max_tokens,
                embedding_deployment,
            } => ProviderConfig::Azure(AzureProviderConfig {
                endpoint,
                api_key,
                deployment,
                api_version,
                temperature,
                max_tokens,
                embedding_deployment,
            }),
            ProviderSettings::OpenAi {
                host,
                api_key,
                model,
                temperature,
                max_tokens,
                embedding_model,
            } => ProviderConfig::OpenAi(OpenAiProviderConfig {
                host,
                api_key,
                model,
                temperature,
                max_tokens,
                embedding_model,
            }),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConversationSettings {
    pub max_turns: usize,
    pub summary_method: SummaryMethod,
    /// What the executor answers when the requester neither calls a tool nor sends code
    #[serde(default)]
    pub default_auto_reply: String,
    #[serde(default)]
    pub cache_seed: Option<u64>,
    pub cache_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolSettings {
    pub index_dir: PathBuf,
    pub collection: String,
    pub n_results: usize,
    pub chunk_tokens: usize,
    #[serde(default)]
    pub bing_api_key: Option<String>,
    pub forecast_url: String,
    pub geocode_url: String,
    pub bing_url: String,
    pub duckduckgo_url: String,
    pub search_max_turns: usize,
    #[serde(default)]
    pub corpus_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutorSettings {
    pub enabled: bool,
    pub work_dir: PathBuf,
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub provider: ProviderSettings,
    pub conversation: ConversationSettings,
    pub tools: ToolSettings,
    pub executor: ExecutorSettings,
}

impl Settings {
    /// Load from `wayfarer.toml` (if present) and the environment
    pub fn new() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    pub fn load(config_file: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .set_default("provider.type", "azure")?
            .set_default("provider.temperature", 0.5)?
            .set_default("conversation.max_turns", 10)?
            .set_default("conversation.summary_method", "reflection_with_llm")?
            .set_default("conversation.cache_seed", 43)?
            .set_default("conversation.cache_dir", ".cache")?
            .set_default("tools.index_dir", "./tmp/index")?
            .set_default("tools.collection", "tourist_places")?
            .set_default("tools.n_results", 2)?
            .set_default("tools.chunk_tokens", 1000)?
            .set_default("tools.forecast_url", "https://api.open-meteo.com")?
            .set_default("tools.geocode_url", "https://nominatim.openstreetmap.org")?
            .set_default("tools.bing_url", "https://api.bing.microsoft.com")?
            .set_default("tools.duckduckgo_url", "https://html.duckduckgo.com")?
            .set_default("tools.search_max_turns", 2)?
            .set_default("executor.enabled", true)?
            .set_default("executor.work_dir", "coding")?
            .set_default("executor.timeout_secs", 60)?;

        // Legacy OPENAI_* and BING_API_KEY variables sit just above the defaults
        for (var, key) in LEGACY_ENV {
            if let Ok(value) = env::var(var) {
                builder = builder.set_default(*key, value)?;
            }
        }

        let file = config_file
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("wayfarer.toml"));
        let config = builder
            .add_source(File::from(file).required(config_file.is_some()))
            .add_source(
                Environment::with_prefix("WAYFARER")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let result: Result<Self, config::ConfigError> = config.try_deserialize();

        match result {
            Ok(settings) => Ok(settings),
            Err(err) => {
                tracing::debug!("Configuration error: {:?}", &err);

                // Handle both NotFound and missing field message variants
                let error_str = err.to_string();
                if let Some(field) = missing_field(&error_str) {
                    Err(missing(field))
                } else if let config::ConfigError::NotFound(field) = &err {
                    Err(missing(field))
                } else {
                    Err(ConfigError::Other(err))
                }
            }
        }
    }
}

// Extract the field name from "missing field `api_key`", which config may prefix with a key path
fn missing_field(error: &str) -> Option<&str> {
    let start = error.find("missing field `")? + "missing field `".len();
    let rest = &error[start..];
    let end = rest.find('`')?;
    Some(&rest[..end])
}

fn default_api_version() -> String {
    "2024-02-01".to_string()
}

fn default_model() -> String {
    "gpt-4o".to_string()
}

fn default_openai_host() -> String {
    "https://api.openai.com".to_string()
}
