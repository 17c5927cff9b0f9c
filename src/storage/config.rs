//! JSON Configuration Management
//!
//! Handles reading and writing the remote control configuration file.

use std::fs;
use std::path::{Path, PathBuf};

use crate::models::settings::{RemoteControlConfig, RemoteControlSettingsUpdate};
use crate::utils::error::{AppError, AppResult};
use crate::utils::paths::{config_path, ensure_companion_dir, ensure_dir};

/// Configuration service for managing remote control settings
#[derive(Debug)]
pub struct ConfigService {
    config_path: PathBuf,
    config: RemoteControlConfig,
}

impl ConfigService {
    /// Create a new config service at the default location, loading existing
    /// config or creating defaults
    pub fn new() -> AppResult<Self> {
        ensure_companion_dir()?;
        Self::with_path(config_path()?)
    }

    /// Create a config service backed by an explicit file
    pub fn with_path(config_path: PathBuf) -> AppResult<Self> {
        if let Some(parent) = config_path.parent() {
            ensure_dir(parent)?;
        }

        let config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            let default_config = RemoteControlConfig::default();
            Self::save_to_file(&config_path, &default_config)?;
            default_config
        };

        Ok(Self {
            config_path,
            config,
        })
    }

    /// Load configuration from a file
    fn load_from_file(path: &Path) -> AppResult<RemoteControlConfig> {
        let content = fs::read_to_string(path)?;
        let config: RemoteControlConfig = serde_json::from_str(&content)?;
        config.validate().map_err(AppError::validation)?;
        Ok(config)
    }

    /// Save configuration to a file with pretty formatting
    fn save_to_file(path: &Path, config: &RemoteControlConfig) -> AppResult<()> {
        config.validate().map_err(AppError::validation)?;
        let content = serde_json::to_string_pretty(config)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Get the current configuration
    pub fn get_config(&self) -> &RemoteControlConfig {
        &self.config
    }

    /// Get a clone of the current configuration
    pub fn get_config_clone(&self) -> RemoteControlConfig {
        self.config.clone()
    }

    /// Update the configuration with a partial update.
    ///
    /// Invalid updates are rejected and leave both memory and disk unchanged.
    pub fn update_config(
        &mut self,
        update: RemoteControlSettingsUpdate,
    ) -> AppResult<RemoteControlConfig> {
        let mut next = self.config.clone();
        next.apply_update(update);
        Self::save_to_file(&self.config_path, &next)?;
        self.config = next;
        Ok(self.config.clone())
    }

    /// Save the current configuration to disk
    pub fn save(&self) -> AppResult<()> {
        Self::save_to_file(&self.config_path, &self.config)
    }

    /// Reload configuration from disk
    pub fn reload(&mut self) -> AppResult<()> {
        self.config = Self::load_from_file(&self.config_path)?;
        Ok(())
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.config_path
    }
}
