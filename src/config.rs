//! Configuration management for chromacal

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::calibration::CalibrationSettings;
use crate::correction::VOXEL_SIZE_TOLERANCE_NM;
use crate::store::CalibrationStore;

/// Where calibrations live
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Folder holding index.json and the calibration files
    pub folder: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            folder: PathBuf::from("calibrations"),
        }
    }
}

/// Spot correction settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrectionConfig {
    /// Largest per-axis voxel size difference (nm) still treated as equal
    pub voxel_tolerance_nm: f64,
}

impl Default for CorrectionConfig {
    fn default() -> Self {
        Self {
            voxel_tolerance_nm: VOXEL_SIZE_TOLERANCE_NM,
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub calibration: CalibrationSettings,

    #[serde(default)]
    pub correction: CorrectionConfig,
}

impl Config {
    /// Load configuration from a file, or create default if it doesn't exist
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {:?}", path))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config from {:?}", path))?;
            tracing::info!("Loaded configuration from {:?}", path);
            Ok(config)
        } else {
            let config = Config::default();
            config.save(path)?;
            tracing::info!("Created default configuration at {:?}", path);
            Ok(config)
        }
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .context("Failed to serialize configuration")?;

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory {:?}", parent))?;
        }

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config to {:?}", path))?;

        tracing::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Calibration store rooted at the configured folder
    pub fn store(&self) -> CalibrationStore {
        CalibrationStore::new(&self.store.folder)
    }
}
