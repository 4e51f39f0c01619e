//! Hardware collaborator traits.
//!
//! The sampler never touches registers or DMA descriptors itself. Two seams
//! isolate the hardware:
//!
//! - [`RawSampleSource`] - the hardware-clocked conversion stream (I2S/DMA on
//!   the ESP32) that fills rotating fixed-size byte buffers;
//! - [`AnalogFrontEnd`] - the ADC unit: channel attenuation, eFuse
//!   calibration data, one-shot conversions and reference routing.
//!
//! Test doubles for both live in [`crate::mock`].

use crate::calibration::{AttenuationRange, CalibrationMapping, FactoryCalibration};
use crate::channel::AdcChannel;
use crate::error::Result;

/// Default highest raw conversion rate of the I2S-driven ADC.
pub const DEFAULT_MAX_SAMPLE_RATE: u32 = 2_000_000;

/// Default largest DMA transfer, in bytes.
pub const DEFAULT_MAX_TRANSFER_BYTES: usize = 1024;

/// Limits of a raw sample source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceCapabilities {
    /// Highest raw sampling rate in Hz
    pub max_sample_rate: u32,
    /// Largest chunk the source can deliver per read, in bytes
    pub max_transfer_bytes: usize,
}

impl Default for SourceCapabilities {
    fn default() -> Self {
        Self {
            max_sample_rate: DEFAULT_MAX_SAMPLE_RATE,
            max_transfer_bytes: DEFAULT_MAX_TRANSFER_BYTES,
        }
    }
}

/// Start parameters handed to a raw sample source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawSourceConfig {
    /// Number of interleaved channels (always 1)
    pub channel_count: u16,
    /// Size of each rotating buffer in bytes
    pub buffer_bytes: usize,
    /// Number of rotating buffers
    pub buffer_count: usize,
    /// Conversion rate in Hz
    pub sample_rate_hz: u32,
    /// GPIO number of the input
    pub input_pin: u8,
}

/// Continuous hardware-clocked conversion stream.
///
/// Cells are little-endian `u16`; the upper four bits may carry a channel id
/// or flags and are masked off by the sampler.
pub trait RawSampleSource {
    /// Limits used to validate configurations and plan buffers.
    fn capabilities(&self) -> SourceCapabilities {
        SourceCapabilities::default()
    }

    /// Begin continuous conversion into rotating buffers.
    ///
    /// Returns [`SamplerError::HardwareInit`](crate::SamplerError::HardwareInit)
    /// when the channel, rate or buffer geometry is unsupported.
    fn start(&mut self, config: &RawSourceConfig) -> Result<()>;

    /// Block until one buffer is filled and copy it into `buf`.
    ///
    /// Returns the number of bytes written, which is `buf.len()` for a
    /// well-behaved source.
    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Halt conversion. Calling it while stopped is a no-op.
    fn stop(&mut self) -> Result<()>;
}

/// The ADC unit behind the raw source.
pub trait AnalogFrontEnd {
    /// Factory calibration burned into eFuse, if any.
    fn factory_calibration(&self) -> FactoryCalibration;

    /// Set 12-bit width and attenuation for `channel`.
    fn configure_channel(&mut self, channel: AdcChannel, range: AttenuationRange) -> Result<()>;

    /// Perform one software-triggered conversion.
    fn read_raw(&mut self, channel: AdcChannel) -> Result<u16>;

    /// Yield the calling task for one scheduler tick.
    fn wait_tick(&mut self);

    /// Route the internal reference voltage to an output pin.
    fn route_reference(&mut self, pin: u8) -> Result<()>;

    /// Calibration coefficients for `range`.
    fn characterize(&self, range: AttenuationRange) -> CalibrationMapping {
        CalibrationMapping::characterize(range, self.factory_calibration())
    }
}
