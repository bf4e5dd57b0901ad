use crate::error::{Error, Result};
use log::{error, info};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Thresholds for title and heading detection.
///
/// Every field has a default, so a partial YAML file only overrides the keys
/// it names and unknown keys are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Spans at or below this size never become the title.
    pub min_font_size_threshold: f64,
    /// Multiplier on the font size standard deviation for the large-font signal.
    pub font_size_variance_threshold: f64,
    /// Recognized for compatibility with existing config files. No scoring
    /// rule reads it.
    pub position_threshold: f64,
    /// Upper bound of the reasonable-length scoring contribution.
    pub max_heading_length: usize,
    /// Spans must be longer than this to be scored; cleaned entries shorter
    /// than this are dropped.
    pub min_heading_length: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            min_font_size_threshold: 10.0,
            font_size_variance_threshold: 2.0,
            position_threshold: 0.7,
            max_heading_length: 200,
            min_heading_length: 3,
        }
    }
}

impl Config {
    pub fn from_yaml_str(source: &str) -> Result<Self> {
        // An empty document deserializes to unit, not a map.
        if source.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(source)?)
    }

    /// Load configuration from `path`, falling back to the defaults when the
    /// file is missing, unreadable, or malformed.
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            info!("No config at {}, using defaults", path.display());
            return Self::default();
        }

        let parsed = fs::read_to_string(path)
            .map_err(Error::from)
            .and_then(|source| Self::from_yaml_str(&source));

        match parsed {
            Ok(config) => config,
            Err(e) => {
                error!("Error loading config {}: {}", path.display(), e);
                Self::default()
            }
        }
    }
}
