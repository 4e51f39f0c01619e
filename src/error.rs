//! Error types for sampler operations.
//!
//! Configuration and hardware-initialization failures are reported
//! synchronously from [`Sampler::begin`](crate::Sampler::begin),
//! [`Sampler::set_config`](crate::Sampler::set_config) and
//! [`Sampler::measure`](crate::Sampler::measure). Missing factory calibration is
//! not an error: the calibration unit falls back to default coefficients.

use thiserror::Error;

/// Result type alias for sampler operations.
pub type Result<T> = std::result::Result<T, SamplerError>;

/// Errors that can occur while configuring or running the sampler.
#[derive(Error, Debug)]
pub enum SamplerError {
    /// Pin is not part of the ADC1 channel table
    #[error("GPIO {pin} is not an ADC1 input (valid pins: 32-39)")]
    InvalidPin { pin: u8 },

    /// Configuration value out of range
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// Raw source or front end rejected the start parameters
    #[error("Hardware initialization failed: {message}")]
    HardwareInit { message: String },

    /// One-shot measurement requested while streaming
    #[error("Cannot run one-shot measurement: streaming acquisition is running")]
    ConcurrentAccess,

    /// Operation requires the session to be idle
    #[error("Acquisition session is already running")]
    SessionActive,

    /// Collection requested without a running session
    #[error("Acquisition session is not running")]
    NotRunning,

    /// Raw source failed while delivering data
    #[error("Raw sample source error: {message}")]
    Source { message: String },

    /// Collector thread could not be managed
    #[error("Collector error: {message}")]
    Collector { message: String },

    /// Settings file or environment could not be parsed
    #[error("Settings error: {0}")]
    Settings(#[from] Box<figment::Error>),

    /// TOML parse error for inline configuration
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl SamplerError {
    /// Check if this error stems from an invalid configuration.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::InvalidPin { .. }
                | Self::InvalidConfig { .. }
                | Self::Settings(_)
                | Self::Toml(_)
        )
    }

    /// Check if this error was reported by hardware collaborators.
    pub fn is_hardware(&self) -> bool {
        matches!(self, Self::HardwareInit { .. } | Self::Source { .. })
    }

    /// Check if this error is a session-state conflict.
    pub fn is_state_conflict(&self) -> bool {
        matches!(
            self,
            Self::ConcurrentAccess | Self::SessionActive | Self::NotRunning
        )
    }

    pub(crate) fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }
}

impl From<figment::Error> for SamplerError {
    fn from(err: figment::Error) -> Self {
        Self::Settings(Box::new(err))
    }
}
