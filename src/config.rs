//! Sampler configuration model.
//!
//! [`SamplerConfig`] is a plain value type. It is copied into the sampler on
//! [`Sampler::set_config`](crate::Sampler::set_config) and copied back out by
//! [`Sampler::config`](crate::Sampler::config), so callers never hold a
//! reference into sampler state.
//!
//! # Example Configuration
//!
//! ```toml
//! pin = 34
//! voltage_ceiling = 3.3
//! sample_frequency = 44100
//! output_samples = 1024
//! mode = "ac"
//! multisample = 2
//! ```

use serde::{Deserialize, Serialize};

use crate::channel::resolve_channel;
use crate::error::{Result, SamplerError};

/// Default input pin (GPIO 34, ADC1 channel 6).
pub const DEFAULT_PIN: u8 = 34;
/// Default expected maximum input amplitude in volts.
pub const DEFAULT_VOLTAGE_CEILING: f32 = 3.3;
/// Default output sample rate in Hz.
pub const DEFAULT_SAMPLE_FREQUENCY: u32 = 44_100;
/// Default number of output samples per collection.
pub const DEFAULT_OUTPUT_SAMPLES: usize = 1024;
/// Default number of raw readings averaged per output sample.
pub const DEFAULT_MULTISAMPLE: u32 = 2;

/// How collected samples are referenced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalMode {
    /// Absolute calibrated millivolts
    #[default]
    Dc,
    /// Millivolts relative to the batch mean
    Ac,
}

/// Acquisition parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplerConfig {
    /// GPIO number of the analog input
    #[serde(default = "default_pin")]
    pub pin: u8,

    /// Expected maximum input amplitude in volts (selects attenuation)
    #[serde(default = "default_voltage_ceiling")]
    pub voltage_ceiling: f32,

    /// Output sample rate in Hz
    #[serde(default = "default_sample_frequency")]
    pub sample_frequency: u32,

    /// Number of calibrated samples produced per collection
    #[serde(default = "default_output_samples")]
    pub output_samples: usize,

    /// DC (absolute) or AC (batch-centered) output
    #[serde(default)]
    pub mode: SignalMode,

    /// Raw readings averaged into one output sample
    #[serde(default = "default_multisample")]
    pub multisample: u32,

    /// Raw buffers to allocate beyond the computed minimum (0 = auto)
    #[serde(default)]
    pub extra_buffers: u32,
}

fn default_pin() -> u8 {
    DEFAULT_PIN
}

fn default_voltage_ceiling() -> f32 {
    DEFAULT_VOLTAGE_CEILING
}

fn default_sample_frequency() -> u32 {
    DEFAULT_SAMPLE_FREQUENCY
}

fn default_output_samples() -> usize {
    DEFAULT_OUTPUT_SAMPLES
}

fn default_multisample() -> u32 {
    DEFAULT_MULTISAMPLE
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            pin: DEFAULT_PIN,
            voltage_ceiling: DEFAULT_VOLTAGE_CEILING,
            sample_frequency: DEFAULT_SAMPLE_FREQUENCY,
            output_samples: DEFAULT_OUTPUT_SAMPLES,
            mode: SignalMode::Dc,
            multisample: DEFAULT_MULTISAMPLE,
            extra_buffers: 0,
        }
    }
}

impl SamplerConfig {
    /// Parse a configuration from TOML, filling omitted fields with defaults.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s)?;
        Ok(config)
    }

    /// Validate the configuration on its own.
    ///
    /// Limits that depend on the raw source (maximum sample rate, transfer
    /// size) are checked by the sampler, which knows its source.
    pub fn validate(&self) -> Result<()> {
        resolve_channel(self.pin)?;

        if !self.voltage_ceiling.is_finite() || self.voltage_ceiling <= 0.0 {
            return Err(SamplerError::invalid_config(format!(
                "Voltage ceiling must be positive, got {}",
                self.voltage_ceiling
            )));
        }

        if self.sample_frequency == 0 {
            return Err(SamplerError::invalid_config(
                "Sample frequency must be greater than 0",
            ));
        }

        if self.output_samples == 0 {
            return Err(SamplerError::invalid_config(
                "Output sample count must be greater than 0",
            ));
        }

        if self.multisample == 0 {
            return Err(SamplerError::invalid_config(
                "Multisample factor must be at least 1",
            ));
        }

        self.raw_sample_rate().ok_or_else(|| {
            SamplerError::invalid_config(format!(
                "Raw sample rate {} Hz x {} overflows",
                self.sample_frequency, self.multisample
            ))
        })?;

        Ok(())
    }

    /// Hardware sampling rate needed to feed the decimator.
    pub fn raw_sample_rate(&self) -> Option<u32> {
        self.sample_frequency.checked_mul(self.multisample)
    }
}
