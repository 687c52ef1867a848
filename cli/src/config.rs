// Configuration management for the contact book CLI
//
// Cross-platform config stored in:
// - macOS: ~/Library/Application Support/contactbook/config.json
// - Linux: ~/.config/contactbook/config.json
// - Windows: %APPDATA%\contactbook\config.json

use anyhow::{Context, Result};
use contactbook_core::DEFAULT_DATABASE_NAME;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding the contact database (defaults to the data dir)
    pub storage_path: Option<String>,

    /// Database directory name inside the storage path
    pub database_name: String,

    /// Default log filter when RUST_LOG is unset
    pub log_level: String,

    /// Also write logs to a daily-rolling file in the data dir
    pub log_to_file: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_path: None,
            database_name: DEFAULT_DATABASE_NAME.to_string(),
            log_level: "warn".to_string(),
            log_to_file: false,
        }
    }
}

impl Config {
    /// Get the config directory path (cross-platform)
    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to determine config directory")?
            .join("contactbook");

        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;

        Ok(config_dir)
    }

    /// Get the data directory path (cross-platform)
    pub fn data_dir() -> Result<PathBuf> {
        let data_dir = dirs::data_local_dir()
            .context("Failed to determine data directory")?
            .join("contactbook");

        std::fs::create_dir_all(&data_dir).context("Failed to create data directory")?;

        Ok(data_dir)
    }

    pub fn config_file() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    /// Load config from file, or create default if not exists
    pub fn load() -> Result<Self> {
        let config_file = Self::config_file()?;

        if config_file.exists() {
            let contents =
                std::fs::read_to_string(&config_file).context("Failed to read config file")?;
            let config: Config =
                serde_json::from_str(&contents).context("Failed to parse config file")?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save()?;
            Ok(config)
        }
    }

    pub fn save(&self) -> Result<()> {
        let config_file = Self::config_file()?;
        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(&config_file, contents).context("Failed to write config file")?;
        Ok(())
    }

    /// Where the contact database lives
    pub fn storage_dir(&self) -> Result<PathBuf> {
        match &self.storage_path {
            Some(path) => Ok(PathBuf::from(path)),
            None => Self::data_dir(),
        }
    }

    /// Update a value in memory. Call `save` to persist it.
    pub fn apply(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "storage_path" => {
                self.storage_path = if value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                };
            }
            "database_name" => {
                if value.trim().is_empty() {
                    anyhow::bail!("database_name cannot be empty");
                }
                self.database_name = value.to_string();
            }
            "log_level" => {
                self.log_level = value.to_string();
            }
            "log_to_file" => {
                self.log_to_file = value.parse().context("Invalid boolean value")?;
            }
            _ => anyhow::bail!("Unknown config key: {}", key),
        }
        Ok(())
    }

    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.apply(key, value)?;
        self.save()
    }

    pub fn get(&self, key: &str) -> Option<String> {
        match key {
            "storage_path" => self.storage_path.clone(),
            "database_name" => Some(self.database_name.clone()),
            "log_level" => Some(self.log_level.clone()),
            "log_to_file" => Some(self.log_to_file.to_string()),
            _ => None,
        }
    }

    pub fn list(&self) -> Vec<(String, String)> {
        vec![
            (
                "storage_path".to_string(),
                self.storage_path
                    .clone()
                    .unwrap_or_else(|| "(auto)".to_string()),
            ),
            ("database_name".to_string(), self.database_name.clone()),
            ("log_level".to_string(), self.log_level.clone()),
            ("log_to_file".to_string(), self.log_to_file.to_string()),
        ]
    }
}
