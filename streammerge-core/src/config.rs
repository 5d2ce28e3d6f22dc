//! Merger configuration

use crate::error::{MergerError, Result};
use config::{Config as ConfigBuilder, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Frames between full-surface clears when no value is configured
pub const DEFAULT_CLEAR_THRESHOLD: u64 = 200;

/// Merger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MergerConfig {
    /// The surface is cleared once the frame counter exceeds this value
    pub clear_threshold: u64,
    /// Frame rate of the default interval scheduler
    pub frame_rate: u32,
    /// Maximum surface width (0 = unlimited)
    pub max_surface_width: u32,
    /// Maximum surface height (0 = unlimited)
    pub max_surface_height: u32,
    pub logging: LoggingConfig,
}

impl Default for MergerConfig {
    fn default() -> Self {
        Self {
            clear_threshold: DEFAULT_CLEAR_THRESHOLD,
            frame_rate: 60,
            max_surface_width: 0,
            max_surface_height: 0,
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

impl MergerConfig {
    /// Load configuration from an optional file, overridden by
    /// `STREAMMERGE_*` environment variables.
    pub fn load(config_file: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        // STREAMMERGE_FRAME_RATE, STREAMMERGE_LOGGING__LEVEL, ...
        builder = builder.add_source(
            Environment::with_prefix("STREAMMERGE")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        Ok(config.try_deserialize()?)
    }

    /// Collect every configuration problem instead of failing on the first
    pub fn validate(&self) -> std::result::Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.frame_rate == 0 {
            errors.push("frame_rate must be greater than 0".to_string());
        }
        if self.clear_threshold == 0 {
            errors.push("clear_threshold must be greater than 0".to_string());
        }
        if !matches!(self.logging.format.as_str(), "json" | "pretty") {
            errors.push(format!(
                "logging.format must be \"json\" or \"pretty\", got {:?}",
                self.logging.format
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// [`validate`](Self::validate) folded into a single error
    pub fn ensure_valid(&self) -> Result<()> {
        self.validate()
            .map_err(|errors| MergerError::InvalidConfig(errors.join("; ")))
    }
}
