//! Typed application configuration.
//!
//! # Responsibility
//! - Load configuration from an optional TOML file.
//! - Apply `LAYERKIT_*` environment overrides on top of file values.
//! - Validate the result once at startup.
//!
//! # Invariants
//! - Unknown keys are rejected; every known key has a default.
//! - A config returned by `load` has passed `validate()`.
//!
//! # Example
//!
//! ```toml
//! name = "todo-service"
//! env = "production"
//!
//! [database]
//! url = "sqlite:///var/lib/todo/app.db"
//! pool_size = 8
//!
//! [features]
//! cache_enabled = true
//!
//! [logging]
//! level = "info"
//! dir = "/var/log/todo"
//! ```

use crate::db::DatabaseLocation;
use crate::logging::normalize_level;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Prefix shared by every environment override.
pub const ENV_PREFIX: &str = "LAYERKIT_";

const DEFAULT_DB_URL: &str = "sqlite://./app.db";
const DEFAULT_POOL_SIZE: u32 = 5;
const DEFAULT_CONNECTION_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug)]
pub enum ConfigError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse(toml::de::Error),
    InvalidValue {
        key: &'static str,
        message: String,
    },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "failed to read config `{}`: {source}", path.display())
            }
            Self::Parse(err) => write!(f, "invalid config file: {err}"),
            Self::InvalidValue { key, message } => write!(f, "invalid `{key}`: {message}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Parse(err) => Some(err),
            Self::InvalidValue { .. } => None,
        }
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(value: toml::de::Error) -> Self {
        Self::Parse(value)
    }
}

/// Deployment environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppEnv {
    #[default]
    Development,
    Testing,
    Staging,
    Production,
}

impl FromStr for AppEnv {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "testing" | "test" => Ok(Self::Testing),
            "staging" => Ok(Self::Staging),
            "production" | "prod" => Ok(Self::Production),
            other => Err(format!(
                "unsupported environment `{other}`; expected development|testing|staging|production"
            )),
        }
    }
}

/// Root configuration consumed once at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub name: String,
    pub env: AppEnv,
    pub database: DatabaseConfig,
    pub features: FeatureToggles,
    pub logging: LoggingConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: "layerkit".to_string(),
            env: AppEnv::default(),
            database: DatabaseConfig::default(),
            features: FeatureToggles::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Connection pool settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    /// `:memory:`, `sqlite::memory:`, `sqlite://<path>` or a bare file path.
    pub url: String,
    /// Upper bound of pooled connections. Ignored for in-memory databases.
    pub pool_size: u32,
    /// How long `begin()` waits for a free connection before failing.
    pub connection_timeout_ms: u64,
    /// SQLite busy handler timeout applied to every connection.
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_DB_URL.to_string(),
            pool_size: DEFAULT_POOL_SIZE,
            connection_timeout_ms: DEFAULT_CONNECTION_TIMEOUT_MS,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
        }
    }
}

/// Optional add-ons. Carried as plain switches for the outer layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FeatureToggles {
    pub cache_enabled: bool,
    pub rate_limit_enabled: bool,
}

/// Logging settings. Without `dir`, logs go to stderr.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    pub level: String,
    pub dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: crate::logging::default_log_level().to_string(),
            dir: None,
        }
    }
}

impl AppConfig {
    /// Loads configuration from `path` (or defaults), applies process
    /// environment overrides and validates the result.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a TOML file without applying overrides.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Parses TOML text; missing keys fall back to defaults.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Applies `LAYERKIT_*` overrides resolved through `lookup`.
    ///
    /// `lookup` receives the full variable name and returns its value when set.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |suffix: &str| lookup(&format!("{ENV_PREFIX}{suffix}"));

        if let Some(value) = var("APP_NAME") {
            self.name = value;
        }
        if let Some(value) = var("APP_ENV") {
            self.env = value.parse().map_err(|message| ConfigError::InvalidValue {
                key: "env",
                message,
            })?;
        }
        if let Some(value) = var("DB_URL") {
            self.database.url = value;
        }
        if let Some(value) = var("DB_POOL_SIZE") {
            self.database.pool_size = parse_number("database.pool_size", &value)?;
        }
        if let Some(value) = var("DB_CONNECTION_TIMEOUT_MS") {
            self.database.connection_timeout_ms =
                parse_number("database.connection_timeout_ms", &value)?;
        }
        if let Some(value) = var("DB_BUSY_TIMEOUT_MS") {
            self.database.busy_timeout_ms = parse_number("database.busy_timeout_ms", &value)?;
        }
        if let Some(value) = var("CACHE_ENABLED") {
            self.features.cache_enabled = parse_flag("features.cache_enabled", &value)?;
        }
        if let Some(value) = var("RATE_LIMIT_ENABLED") {
            self.features.rate_limit_enabled = parse_flag("features.rate_limit_enabled", &value)?;
        }
        if let Some(value) = var("LOG_LEVEL") {
            self.logging.level = value;
        }
        if let Some(value) = var("LOG_DIR") {
            let trimmed = value.trim();
            self.logging.dir = (!trimmed.is_empty()).then(|| PathBuf::from(trimmed));
        }
        Ok(())
    }

    /// Checks cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(invalid("name", "must not be empty"));
        }
        DatabaseLocation::parse(&self.database.url)
            .map_err(|err| invalid("database.url", err.to_string()))?;
        if self.database.pool_size == 0 {
            return Err(invalid("database.pool_size", "must be at least 1"));
        }
        if self.database.connection_timeout_ms == 0 {
            return Err(invalid("database.connection_timeout_ms", "must be positive"));
        }
        if self.database.busy_timeout_ms == 0 {
            return Err(invalid("database.busy_timeout_ms", "must be positive"));
        }
        normalize_level(&self.logging.level).map_err(|message| invalid("logging.level", message))?;
        if let Some(dir) = &self.logging.dir {
            if !dir.is_absolute() {
                return Err(invalid(
                    "logging.dir",
                    format!("must be an absolute path, got `{}`", dir.display()),
                ));
            }
        }
        Ok(())
    }

    pub fn is_development(&self) -> bool {
        self.env == AppEnv::Development
    }

    pub fn is_production(&self) -> bool {
        self.env == AppEnv::Production
    }
}

fn invalid(key: &'static str, message: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        key,
        message: message.into(),
    }
}

fn parse_number<T: FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| invalid(key, format!("expected an unsigned integer, got `{value}`")))
}

fn parse_flag(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid(key, format!("expected a boolean, got `{value}`"))),
    }
}

#[cfg(test)]
mod tests {
    use super::{AppConfig, AppEnv, ConfigError};
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn empty_toml_yields_valid_defaults() {
        let config = AppConfig::from_toml_str("").unwrap();
        assert_eq!(config, AppConfig::default());
        config.validate().unwrap();
        assert!(config.is_development());
    }

    #[test]
    fn toml_sections_override_defaults() {
        let config = AppConfig::from_toml_str(
            r#"
            name = "todo-service"
            env = "production"

            [database]
            url = ":memory:"
            pool_size = 2

            [features]
            rate_limit_enabled = true
            "#,
        )
        .unwrap();

        assert_eq!(config.name, "todo-service");
        assert!(config.is_production());
        assert_eq!(config.database.url, ":memory:");
        assert_eq!(config.database.pool_size, 2);
        assert!(config.features.rate_limit_enabled);
        assert!(!config.features.cache_enabled);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = AppConfig::from_toml_str("[database]\nmax_overflow = 10\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn env_overrides_take_precedence() {
        let mut config = AppConfig::default();
        config
            .apply_overrides(lookup_from(&[
                ("LAYERKIT_APP_ENV", "staging"),
                ("LAYERKIT_DB_URL", "sqlite::memory:"),
                ("LAYERKIT_DB_POOL_SIZE", "12"),
                ("LAYERKIT_CACHE_ENABLED", "on"),
                ("LAYERKIT_LOG_LEVEL", "warn"),
            ]))
            .unwrap();

        assert_eq!(config.env, AppEnv::Staging);
        assert_eq!(config.database.url, "sqlite::memory:");
        assert_eq!(config.database.pool_size, 12);
        assert!(config.features.cache_enabled);
        assert_eq!(config.logging.level, "warn");
        config.validate().unwrap();
    }

    #[test]
    fn malformed_env_values_are_reported_with_key() {
        let mut config = AppConfig::default();
        let err = config
            .apply_overrides(lookup_from(&[("LAYERKIT_DB_POOL_SIZE", "many")]))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { key: "database.pool_size", .. }
        ));
    }

    #[test]
    fn validate_rejects_out_of_range_values() {
        let mut config = AppConfig::default();
        config.database.pool_size = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.database.url = "mysql://localhost/app".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.logging.level = "verbose".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.logging.dir = Some("relative/logs".into());
        assert!(config.validate().is_err());
    }
}
