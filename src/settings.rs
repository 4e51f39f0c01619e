//! Layered application settings using Figment.
//!
//! Settings are read from a TOML file and then overridden by environment
//! variables prefixed with `ADC_SAMPLER_`, using `__` between table and key:
//!
//! ```text
//! ADC_SAMPLER_SAMPLER__PIN=36
//! ADC_SAMPLER_SAMPLER__MODE=ac
//! ADC_SAMPLER_LOGGING__LEVEL=debug
//! ```
//!
//! # Example File
//!
//! ```toml
//! [sampler]
//! pin = 34
//! voltage_ceiling = 1.1
//! sample_frequency = 8000
//! output_samples = 256
//! mode = "ac"
//!
//! [logging]
//! level = "info"
//! format = "compact"
//! ```

use std::path::Path;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::config::SamplerConfig;
use crate::error::Result;
use crate::logging::{parse_log_level, OutputFormat};

/// Default settings file location.
pub const DEFAULT_SETTINGS_PATH: &str = "config/adc_sampler.toml";

/// Prefix of overriding environment variables.
pub const ENV_PREFIX: &str = "ADC_SAMPLER_";

/// Top-level settings.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Acquisition parameters
    #[serde(default)]
    pub sampler: SamplerConfig,
    /// Log output
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// `[logging]` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// trace, debug, info, warn or error
    #[serde(default = "default_log_level")]
    pub level: String,
    /// pretty, compact or json
    #[serde(default)]
    pub format: OutputFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: OutputFormat::default(),
        }
    }
}

impl Settings {
    /// Load from [`DEFAULT_SETTINGS_PATH`] and the environment.
    pub fn load() -> Result<Self> {
        Self::load_from(DEFAULT_SETTINGS_PATH)
    }

    /// Load from a specific file and the environment.
    ///
    /// A missing file is not an error; defaults and environment apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let settings: Self = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Parse settings from TOML text without consulting the environment.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let settings: Self = Figment::new().merge(Toml::string(s)).extract()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Check the sampler parameters and log level.
    pub fn validate(&self) -> Result<()> {
        self.sampler.validate()?;
        parse_log_level(&self.logging.level)?;
        Ok(())
    }
}
