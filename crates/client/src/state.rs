use std::str::FromStr;
use std::{fs, path::PathBuf};

use common::cursor::CURSOR_FILE_NAME;
use common::reconcile::DEFAULT_FETCH_LIMIT;
use serde::{Deserialize, Serialize};

use crate::config::{ServiceConfig, KEYS_DIR_NAME};

pub const APP_NAME: &str = "courier";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const DB_FILE_NAME: &str = "db.sqlite";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Transactions requested per directory page
    #[serde(default = "default_fetch_limit")]
    pub fetch_limit: usize,
    /// Default tracing level, overridden by RUST_LOG
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Directory for daily log files
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

fn default_fetch_limit() -> usize {
    DEFAULT_FETCH_LIMIT
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            fetch_limit: default_fetch_limit(),
            log_level: default_log_level(),
            log_dir: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppState {
    /// Path to the courier directory (~/.courier)
    pub data_dir: PathBuf,
    /// Path to the SQLite database
    pub db_path: PathBuf,
    /// Root of the file secret store
    pub keys_path: PathBuf,
    /// Path to the persisted change cursor
    pub cursor_path: PathBuf,
    /// Path to the config file
    pub config_path: PathBuf,
    /// Loaded configuration
    pub config: AppConfig,
}

impl AppState {
    /// Get the courier directory path (custom or default ~/.courier)
    pub fn data_dir(custom_path: Option<PathBuf>) -> Result<PathBuf, StateError> {
        if let Some(path) = custom_path {
            return Ok(path);
        }

        let home = dirs::home_dir().ok_or(StateError::NoHomeDirectory)?;
        Ok(home.join(format!(".{}", APP_NAME)))
    }

    pub fn exists(custom_path: Option<PathBuf>) -> Result<bool, StateError> {
        Ok(Self::data_dir(custom_path)?.exists())
    }

    /// Initialize a new courier state directory
    pub fn init(
        custom_path: Option<PathBuf>,
        config: Option<AppConfig>,
    ) -> Result<Self, StateError> {
        let data_dir = Self::data_dir(custom_path)?;

        if data_dir.exists() {
            return Err(StateError::AlreadyInitialized);
        }

        fs::create_dir_all(&data_dir)?;

        let keys_path = data_dir.join(KEYS_DIR_NAME);
        fs::create_dir_all(&keys_path)?;

        let config = config.unwrap_or_default();
        let config_path = data_dir.join(CONFIG_FILE_NAME);
        let config_toml = toml::to_string_pretty(&config)?;
        fs::write(&config_path, config_toml)?;

        // Create empty database (just touch the file, migrations run on connect)
        let db_path = data_dir.join(DB_FILE_NAME);
        fs::write(&db_path, "")?;

        // no cursor yet: the first reconcile starts from the beginning
        let cursor_path = data_dir.join(CURSOR_FILE_NAME);

        Ok(Self {
            data_dir,
            db_path,
            keys_path,
            cursor_path,
            config_path,
            config,
        })
    }

    /// Load existing state from the courier directory
    pub fn load(custom_path: Option<PathBuf>) -> Result<Self, StateError> {
        let data_dir = Self::data_dir(custom_path)?;

        if !data_dir.exists() {
            return Err(StateError::NotInitialized);
        }

        let db_path = data_dir.join(DB_FILE_NAME);
        let keys_path = data_dir.join(KEYS_DIR_NAME);
        let cursor_path = data_dir.join(CURSOR_FILE_NAME);
        let config_path = data_dir.join(CONFIG_FILE_NAME);

        if !db_path.exists() {
            return Err(StateError::MissingFile(DB_FILE_NAME.to_string()));
        }
        if !keys_path.exists() {
            return Err(StateError::MissingFile(format!("{}/", KEYS_DIR_NAME)));
        }
        if !config_path.exists() {
            return Err(StateError::MissingFile(CONFIG_FILE_NAME.to_string()));
        }

        let config_toml = fs::read_to_string(&config_path)?;
        let config: AppConfig = toml::from_str(&config_toml)?;

        Ok(Self {
            data_dir,
            db_path,
            keys_path,
            cursor_path,
            config_path,
            config,
        })
    }

    /// Runtime configuration for a client backed by this directory
    pub fn service_config(&self) -> Result<ServiceConfig, StateError> {
        let log_level = tracing::Level::from_str(&self.config.log_level)
            .map_err(|_| StateError::InvalidLogLevel(self.config.log_level.clone()))?;

        Ok(ServiceConfig {
            data_dir: self.data_dir.clone(),
            sqlite_path: Some(self.db_path.clone()),
            fetch_limit: self.config.fetch_limit,
            log_level,
            log_dir: self.config.log_dir.clone(),
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("courier directory not initialized")]
    NotInitialized,

    #[error("courier directory already initialized")]
    AlreadyInitialized,

    #[error("no home directory found")]
    NoHomeDirectory,

    #[error("missing required file: {0}")]
    MissingFile(String),

    #[error("invalid log level: {0}")]
    InvalidLogLevel(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("TOML deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),
}

#[cfg(test)]
mod test {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_init_then_load() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("courier");

        let config = AppConfig {
            fetch_limit: 25,
            ..AppConfig::default()
        };
        let created = AppState::init(Some(dir.clone()), Some(config.clone())).unwrap();
        assert!(created.keys_path.is_dir());
        assert_eq!(created.cursor_path, dir.join(CURSOR_FILE_NAME));

        let loaded = AppState::load(Some(dir.clone())).unwrap();
        assert_eq!(loaded.config, config);

        let service = loaded.service_config().unwrap();
        assert_eq!(service.fetch_limit, 25);
        assert_eq!(service.log_level, tracing::Level::INFO);
        assert_eq!(service.sqlite_path, Some(dir.join(DB_FILE_NAME)));
        assert_eq!(service.keys_dir(), created.keys_path);
    }

    #[test]
    fn test_init_twice_fails() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("courier");
        AppState::init(Some(dir.clone()), None).unwrap();
        assert!(matches!(
            AppState::init(Some(dir), None),
            Err(StateError::AlreadyInitialized)
        ));
    }

    #[test]
    fn test_load_uninitialized() {
        let temp = TempDir::new().unwrap();
        assert!(matches!(
            AppState::load(Some(temp.path().join("missing"))),
            Err(StateError::NotInitialized)
        ));
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let config: AppConfig = toml::from_str("log_level = \"debug\"").unwrap();
        assert_eq!(config.fetch_limit, DEFAULT_FETCH_LIMIT);
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.log_dir, None);
    }
}
