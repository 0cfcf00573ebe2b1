//! Run configuration, stored as TOML.
//!
//! Every key is optional; missing keys take the defaults below.
//!
//! ```toml
//! label_rule = "proxy-agreement"
//! singularity_tolerance = 1e-10
//! imaginary_tolerance = 1e-9
//!
//! [fields]
//! treatment = "X"
//! outcome = "Y"
//! row_proxy = "Z"
//! column_proxy = "W"
//!
//! [bootstrap]
//! num_bootstraps = 200
//! alpha = 0.05
//! seed = 42
//! ```

use crate::bootstrap::BootstrapConfig;
use crate::two_proxy::{EstimatorOptions, LabelRule};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read or write configuration file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML configuration: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize configuration to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: &'static str, message: String },
}

/// Column names of the four roles of a two-proxy problem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldNames {
    pub treatment: String,
    pub outcome: String,
    pub row_proxy: String,
    pub column_proxy: String,
}

impl Default for FieldNames {
    fn default() -> Self {
        Self {
            treatment: "X".to_string(),
            outcome: "Y".to_string(),
            row_proxy: "Z".to_string(),
            column_proxy: "W".to_string(),
        }
    }
}

impl FieldNames {
    pub fn as_slice(&self) -> [&str; 4] {
        [
            &self.treatment,
            &self.outcome,
            &self.row_proxy,
            &self.column_proxy,
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestorationConfig {
    pub label_rule: LabelRule,
    pub singularity_tolerance: f64,
    pub imaginary_tolerance: f64,
    pub fields: FieldNames,
    pub bootstrap: BootstrapConfig,
}

impl Default for RestorationConfig {
    fn default() -> Self {
        let options = EstimatorOptions::default();
        Self {
            label_rule: options.label_rule,
            singularity_tolerance: options.singularity_tolerance,
            imaginary_tolerance: options.imaginary_tolerance,
            fields: FieldNames::default(),
            bootstrap: BootstrapConfig::default(),
        }
    }
}

impl RestorationConfig {
    /// Loads and validates a configuration file.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let toml_string = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&toml_string)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &str) -> Result<(), ConfigError> {
        let toml_string = toml::to_string_pretty(self)?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(toml_string.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (key, value) in [
            ("singularity_tolerance", self.singularity_tolerance),
            ("imaginary_tolerance", self.imaginary_tolerance),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(ConfigError::InvalidValue {
                    key,
                    message: format!("expected a non-negative number, got {value}"),
                });
            }
        }
        if self.bootstrap.num_bootstraps == 0 {
            return Err(ConfigError::InvalidValue {
                key: "bootstrap.num_bootstraps",
                message: "at least one resample is required".to_string(),
            });
        }
        if !(self.bootstrap.alpha > 0.0 && self.bootstrap.alpha < 1.0) {
            return Err(ConfigError::InvalidValue {
                key: "bootstrap.alpha",
                message: format!("must lie strictly between 0 and 1, got {}", self.bootstrap.alpha),
            });
        }

        let names = self.fields.as_slice();
        for (i, name) in names.iter().enumerate() {
            if name.is_empty() {
                return Err(ConfigError::InvalidValue {
                    key: "fields",
                    message: "field names must not be empty".to_string(),
                });
            }
            if names[..i].contains(name) {
                return Err(ConfigError::InvalidValue {
                    key: "fields",
                    message: format!("'{name}' is assigned to more than one role"),
                });
            }
        }
        Ok(())
    }

    pub fn estimator_options(&self) -> EstimatorOptions {
        EstimatorOptions {
            label_rule: self.label_rule,
            singularity_tolerance: self.singularity_tolerance,
            imaginary_tolerance: self.imaginary_tolerance,
        }
    }
}
