//! Bootstrap configuration
//!
//! Loaded once at startup from a TOML file. Every section has built-in
//! defaults, so a missing default-location file is not an error.
//!
//! # File location priority
//!
//! 1. Command-line argument (`--config`)
//! 2. `EXPENSE_CONFIG` environment variable
//! 3. `<config_dir>/expense-pipeline/config.toml`
//! 4. Built-in defaults
//!
//! Secrets can additionally be supplied through environment variables, which
//! take precedence over values in the file.

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "EXPENSE_CONFIG";

pub const DOCU_INTEL_KEY_ENV: &str = "EXPENSE_DOCU_INTEL_KEY";
pub const DOCUMENT_AI_TOKEN_ENV: &str = "EXPENSE_DOCUMENT_AI_TOKEN";
pub const CURRENCY_KEY_ENV: &str = "EXPENSE_CURRENCY_KEY";
pub const TRANSLATE_KEY_ENV: &str = "EXPENSE_TRANSLATE_KEY";
pub const DATABASE_PASSWORD_ENV: &str = "EXPENSE_DATABASE_PASSWORD";
pub const GCS_TOKEN_ENV: &str = "EXPENSE_GCS_TOKEN";

/// Top-level bootstrap configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub store: StoreConfig,

    /// Extraction provider; required to run the pipeline
    #[serde(default)]
    pub processor: Option<ProcessorConfig>,

    /// Currency conversion; conversion is skipped when absent
    #[serde(default)]
    pub currency: Option<CurrencyConfig>,

    /// Translation; translation is skipped when absent
    #[serde(default)]
    pub translation: Option<TranslationConfig>,

    #[serde(default)]
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Largest accepted upload body
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error); `RUST_LOG` overrides it
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Record Store backend
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "driver", rename_all = "lowercase")]
pub enum DatabaseConfig {
    Sqlite {
        #[serde(default = "default_database_path")]
        path: PathBuf,
    },
    Postgres(PostgresConfig),
    Memory,
}

/// PostgreSQL connection; `url` wins over the individual fields
#[derive(Debug, Clone, Deserialize)]
pub struct PostgresConfig {
    #[serde(default)]
    pub url: Option<String>,

    #[serde(default = "default_postgres_host")]
    pub host: String,

    #[serde(default = "default_postgres_port")]
    pub port: u16,

    #[serde(default = "default_postgres_user")]
    pub user: String,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default = "default_postgres_name")]
    pub name: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig::Sqlite {
            path: default_database_path(),
        }
    }
}

/// Blob Store backend
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "driver", rename_all = "lowercase")]
pub enum StoreConfig {
    Filesystem {
        #[serde(default = "default_store_location")]
        location: PathBuf,
        /// Base URL under which `location` is served, for URL-fetching providers
        #[serde(default)]
        public_base_url: Option<String>,
    },
    /// Google Cloud Storage bucket with publicly readable objects
    Gcloud {
        bucket: String,
        #[serde(default = "default_gcs_endpoint")]
        endpoint: String,
        /// OAuth bearer token
        #[serde(default)]
        access_token: Option<String>,
        /// Defaults to `https://storage.googleapis.com/<bucket>`
        #[serde(default)]
        public_base_url: Option<String>,
    },
    Memory {
        #[serde(default)]
        public_base_url: Option<String>,
    },
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig::Filesystem {
            location: default_store_location(),
            public_base_url: None,
        }
    }
}

/// Extraction provider, chosen once at startup
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "driver", rename_all = "kebab-case")]
pub enum ProcessorConfig {
    /// Azure Document Intelligence (asynchronous job)
    DocuIntel(DocuIntelConfig),
    /// Google Document AI (synchronous call)
    DocumentAi(DocumentAiConfig),
}

#[derive(Debug, Clone, Deserialize)]
pub struct DocuIntelConfig {
    pub endpoint: String,

    #[serde(default = "default_docu_intel_model")]
    pub model_id: String,

    #[serde(default = "default_docu_intel_api_version")]
    pub api_version: String,

    #[serde(default)]
    pub key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DocumentAiConfig {
    #[serde(default = "default_document_ai_endpoint")]
    pub endpoint: String,

    pub project_id: String,

    #[serde(default = "default_document_ai_location")]
    pub location: String,

    pub processor_id: String,

    /// OAuth bearer token
    #[serde(default)]
    pub access_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "service", rename_all = "lowercase")]
pub enum CurrencyConfig {
    CurrencyApi {
        #[serde(default = "default_currency_endpoint")]
        endpoint: String,
        #[serde(default)]
        auth_key: Option<String>,
        #[serde(default = "default_target_currency")]
        target: String,
    },
}

impl CurrencyConfig {
    pub fn target(&self) -> &str {
        match self {
            CurrencyConfig::CurrencyApi { target, .. } => target,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "service", rename_all = "lowercase")]
pub enum TranslationConfig {
    Google {
        #[serde(default = "default_translate_endpoint")]
        endpoint: String,
        #[serde(default)]
        api_key: Option<String>,
        #[serde(default = "default_target_language")]
        target: String,
    },
}

impl TranslationConfig {
    pub fn target(&self) -> &str {
        match self {
            TranslationConfig::Google { target, .. } => target,
        }
    }
}

/// Dispatcher and poller tuning
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Result Poller attempt budget
    #[serde(default = "default_max_poll_attempts")]
    pub max_poll_attempts: u32,

    /// Backoff time unit in milliseconds; the n-th wait lasts n units
    #[serde(default = "default_poll_unit_ms")]
    pub poll_unit_ms: u64,

    /// How long shutdown waits for in-flight Records to settle
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_poll_attempts: default_max_poll_attempts(),
            poll_unit_ms: default_poll_unit_ms(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_max_upload_bytes() -> usize {
    20 * 1024 * 1024
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("expense-pipeline"))
        .unwrap_or_else(|| PathBuf::from("./expense_data"))
}

fn default_database_path() -> PathBuf {
    default_data_dir().join("records.db")
}

fn default_store_location() -> PathBuf {
    default_data_dir().join("blobs")
}

fn default_postgres_host() -> String {
    "localhost".to_string()
}

fn default_postgres_port() -> u16 {
    5432
}

fn default_postgres_user() -> String {
    "postgres".to_string()
}

fn default_postgres_name() -> String {
    "expenses".to_string()
}

fn default_gcs_endpoint() -> String {
    crate::blob::DEFAULT_GCS_ENDPOINT.to_string()
}

fn default_docu_intel_model() -> String {
    "prebuilt-receipt".to_string()
}

fn default_docu_intel_api_version() -> String {
    "2023-07-31".to_string()
}

fn default_document_ai_endpoint() -> String {
    "https://us-documentai.googleapis.com".to_string()
}

fn default_document_ai_location() -> String {
    "us".to_string()
}

fn default_currency_endpoint() -> String {
    "https://api.currencyapi.com".to_string()
}

fn default_target_currency() -> String {
    "EUR".to_string()
}

fn default_translate_endpoint() -> String {
    "https://translation.googleapis.com".to_string()
}

fn default_target_language() -> String {
    "en".to_string()
}

fn default_max_poll_attempts() -> u32 {
    5
}

fn default_poll_unit_ms() -> u64 {
    1000
}

fn default_shutdown_timeout_ms() -> u64 {
    30_000
}

/// Where the loaded configuration came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    File(PathBuf),
    Defaults,
}

impl TomlConfig {
    /// Parse configuration text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Invalid TOML: {}", e)))
    }

    /// Read and parse a configuration file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Cannot read config file {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Locate and load the configuration, then apply environment overrides.
    ///
    /// An explicitly named file (CLI or env) must exist; the platform default
    /// location is optional.
    pub fn load(cli_path: Option<&Path>) -> Result<(Self, ConfigSource)> {
        let explicit = cli_path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var(CONFIG_ENV_VAR).ok().map(PathBuf::from));

        let (mut config, source) = match explicit {
            Some(path) => (Self::from_file(&path)?, ConfigSource::File(path)),
            None => match default_config_path().filter(|p| p.exists()) {
                Some(path) => (Self::from_file(&path)?, ConfigSource::File(path)),
                None => (Self::default(), ConfigSource::Defaults),
            },
        };

        config.apply_env_overrides();
        Ok((config, source))
    }

    /// Replace secrets with their environment variable values when set
    pub fn apply_env_overrides(&mut self) {
        match &mut self.processor {
            Some(ProcessorConfig::DocuIntel(c)) => {
                c.key = resolve_secret(DOCU_INTEL_KEY_ENV, c.key.take());
            }
            Some(ProcessorConfig::DocumentAi(c)) => {
                c.access_token = resolve_secret(DOCUMENT_AI_TOKEN_ENV, c.access_token.take());
            }
            None => {}
        }
        if let Some(CurrencyConfig::CurrencyApi { auth_key, .. }) = &mut self.currency {
            *auth_key = resolve_secret(CURRENCY_KEY_ENV, auth_key.take());
        }
        if let Some(TranslationConfig::Google { api_key, .. }) = &mut self.translation {
            *api_key = resolve_secret(TRANSLATE_KEY_ENV, api_key.take());
        }
        if let DatabaseConfig::Postgres(pg) = &mut self.database {
            pg.password = resolve_secret(DATABASE_PASSWORD_ENV, pg.password.take());
        }
        if let StoreConfig::Gcloud { access_token, .. } = &mut self.store {
            *access_token = resolve_secret(GCS_TOKEN_ENV, access_token.take());
        }
    }
}

/// Environment variable (if set and non-empty) beats the file value
pub fn resolve_secret(env_var_name: &str, file_value: Option<String>) -> Option<String> {
    match std::env::var(env_var_name) {
        Ok(value) if !value.trim().is_empty() => Some(value),
        _ => file_value.filter(|v| !v.trim().is_empty()),
    }
}

/// Platform config file location
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("expense-pipeline").join("config.toml"))
}
