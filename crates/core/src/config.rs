//! Application configuration layered from defaults, a TOML file and the environment.

use std::{
    fs,
    path::{Path, PathBuf},
};

use ::config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::sort::{SortDescriptor, SortParseError};

/// Directory under the platform config dir holding `config.toml`.
pub const CONFIG_DIR_NAME: &str = "resync";

const DEFAULT_CONFIG: &str = r#"# resync configuration
#
# Every key may also be set through the environment, e.g. RESYNC_API_BASE_URL.

# Root of the REST API the cache synchronises with.
api_base_url = "http://localhost:8000/api"

# Per-request timeout in milliseconds.
request_timeout_ms = 10000

# Bearer token attached to every request.
# auth_token = ""

# Sort order for cached collections; prefix a field with '-' for descending.
sort = ["-population", "name"]
"#;

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// No platform configuration directory could be determined.
    #[error("unable to determine configuration directory")]
    MissingConfigDir,
    /// Reading or writing the configuration file failed.
    #[error("failed to access {path}: {source}")]
    Io {
        /// File that could not be accessed.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
    /// The merged configuration sources were invalid.
    #[error(transparent)]
    Load(#[from] ::config::ConfigError),
    /// A `sort` entry could not be parsed.
    #[error(transparent)]
    Sort(#[from] SortParseError),
    /// A value was present but unusable.
    #[error("invalid config value for {field}: {reason}")]
    InvalidValue {
        /// Offending key.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },
}

/// Runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// Root of the REST API.
    pub api_base_url: String,
    /// Per-request timeout in milliseconds.
    pub request_timeout_ms: u64,
    /// Optional bearer token.
    pub auth_token: Option<String>,
    /// Sort shorthand entries, e.g. `-population`.
    pub sort: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8000/api".to_string(),
            request_timeout_ms: 10_000,
            auth_token: None,
            sort: vec!["-population".to_string(), "name".to_string()],
        }
    }
}

impl AppConfig {
    /// Load configuration from the default file location and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&config_file_path()?)
    }

    /// Load configuration from `path` (optional) layered under `RESYNC_*` variables.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(File::from(path.to_path_buf()).required(false))
            .add_source(
                Environment::with_prefix("RESYNC")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("sort"),
            )
            .build()?;
        let config: AppConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that cannot work at runtime.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_base_url.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "api_base_url",
                reason: "must not be empty".to_string(),
            });
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "request_timeout_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        self.sort_descriptors()?;
        Ok(())
    }

    /// Parsed `sort` entries.
    pub fn sort_descriptors(&self) -> Result<Vec<SortDescriptor>, SortParseError> {
        self.sort.iter().map(|entry| entry.parse()).collect()
    }
}

/// Location of the user's configuration file.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    let dir = dirs::config_dir().ok_or(ConfigError::MissingConfigDir)?;
    Ok(dir.join(CONFIG_DIR_NAME).join("config.toml"))
}

/// Write the commented default configuration unless a file already exists.
pub fn ensure_default_config() -> Result<PathBuf, ConfigError> {
    let path = config_file_path()?;
    write_default_config(&path)?;
    Ok(path)
}

fn write_default_config(path: &Path) -> Result<(), ConfigError> {
    if path.exists() {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    fs::write(path, DEFAULT_CONFIG).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    info!("wrote default configuration to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn default_file_round_trips_to_defaults() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("nested").join("config.toml");
        write_default_config(&path)?;
        assert!(path.exists());

        let config = AppConfig::load_from(&path)?;
        assert_eq!(config, AppConfig::default());
        assert_eq!(
            config.sort_descriptors()?,
            vec![
                SortDescriptor::descending("population"),
                SortDescriptor::ascending("name")
            ]
        );
        Ok(())
    }

    #[test]
    fn file_values_override_defaults() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "api_base_url = \"https://cities.example\"\nsort = [\"founded\"]\n",
        )?;

        let config = AppConfig::load_from(&path)?;
        assert_eq!(config.api_base_url, "https://cities.example");
        assert_eq!(config.request_timeout_ms, 10_000);
        assert_eq!(config.sort, vec!["founded".to_string()]);
        Ok(())
    }

    #[test]
    fn missing_file_falls_back_to_defaults() -> Result<()> {
        let dir = tempdir()?;
        let config = AppConfig::load_from(&dir.path().join("absent.toml"))?;
        assert_eq!(config.request_timeout_ms, 10_000);
        Ok(())
    }

    #[test]
    fn rejects_bad_values() {
        let config = AppConfig {
            request_timeout_ms: 0,
            ..AppConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue {
                field: "request_timeout_ms",
                ..
            })
        ));

        let config = AppConfig {
            sort: vec!["-".to_string()],
            ..AppConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Sort(_))));
    }
}
