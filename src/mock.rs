//! Simulated hardware for testing without an ESP32.
//!
//! - [`SyntheticSource`] - raw sample stream generating a [`Waveform`] with
//!   optional seeded noise and failure injection
//! - [`MockFrontEnd`] - ADC unit returning scripted one-shot codes and
//!   recording every call
//!
//! Both are deterministic unless noise is enabled, and even then the
//! ChaCha8 generator is seeded so runs are reproducible.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::calibration::{
    AttenuationRange, CalibrationMapping, FactoryCalibration, MAX_RAW_CODE, RAW_CODE_MASK,
};
use crate::channel::AdcChannel;
use crate::error::{Result, SamplerError};
use crate::source::{AnalogFrontEnd, RawSampleSource, RawSourceConfig, SourceCapabilities};
use crate::timing::RAW_SAMPLE_BYTES;

/// Raw code pattern produced by [`SyntheticSource`], indexed by raw cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Waveform {
    /// Same code for every cell
    Constant(u16),
    /// Alternates between two codes on every cell
    Alternating(u16, u16),
    /// Square wave holding each level for `half_period` cells
    Square {
        /// Code of the first half period
        low: u16,
        /// Code of the second half period
        high: u16,
        /// Cells per level
        half_period: usize,
    },
    /// Sine around `center` with `amplitude` codes and `period` cells per cycle
    Sine {
        /// Mid-scale code
        center: u16,
        /// Peak deviation in codes
        amplitude: u16,
        /// Cells per cycle
        period: usize,
    },
    /// Repeats the given codes
    Sequence(Vec<u16>),
}

impl Waveform {
    /// Code of raw cell `index`, before noise.
    pub fn code_at(&self, index: u64) -> u16 {
        match self {
            Self::Constant(code) => *code,
            Self::Alternating(even, odd) => {
                if index % 2 == 0 {
                    *even
                } else {
                    *odd
                }
            }
            Self::Square {
                low,
                high,
                half_period,
            } => {
                let half = (*half_period).max(1) as u64;
                if (index / half) % 2 == 0 {
                    *low
                } else {
                    *high
                }
            }
            Self::Sine {
                center,
                amplitude,
                period,
            } => {
                let period = (*period).max(1) as u64;
                let phase = (index % period) as f64 / period as f64;
                let value = f64::from(*center)
                    + f64::from(*amplitude) * (2.0 * std::f64::consts::PI * phase).sin();
                value.round().clamp(0.0, f64::from(MAX_RAW_CODE)) as u16
            }
            Self::Sequence(codes) => {
                if codes.is_empty() {
                    0
                } else {
                    codes[(index % codes.len() as u64) as usize]
                }
            }
        }
    }
}

/// Call counters of a [`SyntheticSource`], shareable after the source is moved.
#[derive(Debug, Default)]
pub struct SourceCounters {
    start_calls: AtomicU64,
    stop_calls: AtomicU64,
    chunks_read: AtomicU64,
}

impl SourceCounters {
    /// Number of `start` calls.
    pub fn start_calls(&self) -> u64 {
        self.start_calls.load(Ordering::Relaxed)
    }

    /// Number of `stop` calls, including no-op ones.
    pub fn stop_calls(&self) -> u64 {
        self.stop_calls.load(Ordering::Relaxed)
    }

    /// Number of chunks delivered since construction.
    pub fn chunks_read(&self) -> u64 {
        self.chunks_read.load(Ordering::Relaxed)
    }
}

/// Simulated continuous conversion stream.
///
/// # Example
///
/// ```
/// use adc_sampler::mock::{SyntheticSource, Waveform};
///
/// let source = SyntheticSource::new(Waveform::Alternating(1000, 3000))
///     .with_noise(8, 42)
///     .with_channel_tag(6);
/// ```
#[derive(Debug)]
pub struct SyntheticSource {
    waveform: Waveform,
    capabilities: SourceCapabilities,
    noise: Option<(u16, ChaCha8Rng)>,
    channel_tag: u8,
    chunk_delay: Option<Duration>,
    fail_start: bool,
    fail_after_chunks: Option<u64>,
    short_read: Option<usize>,
    started: Option<RawSourceConfig>,
    position: u64,
    counters: Arc<SourceCounters>,
}

impl SyntheticSource {
    /// Create a source with default capabilities.
    pub fn new(waveform: Waveform) -> Self {
        Self {
            waveform,
            capabilities: SourceCapabilities::default(),
            noise: None,
            channel_tag: 0,
            chunk_delay: None,
            fail_start: false,
            fail_after_chunks: None,
            short_read: None,
            started: None,
            position: 0,
            counters: Arc::new(SourceCounters::default()),
        }
    }

    /// Add uniform noise of +/- `amplitude` codes from a seeded generator.
    pub fn with_noise(mut self, amplitude: u16, seed: u64) -> Self {
        self.noise = Some((amplitude, ChaCha8Rng::seed_from_u64(seed)));
        self
    }

    /// Set the upper four bits of every cell, as the I2S peripheral does.
    pub fn with_channel_tag(mut self, tag: u8) -> Self {
        self.channel_tag = tag & 0x0F;
        self
    }

    /// Limit the raw sampling rate.
    pub fn with_max_sample_rate(mut self, hz: u32) -> Self {
        self.capabilities.max_sample_rate = hz;
        self
    }

    /// Limit the transfer size per chunk.
    pub fn with_max_transfer_bytes(mut self, bytes: usize) -> Self {
        self.capabilities.max_transfer_bytes = bytes;
        self
    }

    /// Sleep for `delay` before delivering each chunk.
    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = Some(delay);
        self
    }

    /// Make `start` fail with a hardware error.
    pub fn fail_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    /// Make reads fail once `chunks` chunks have been delivered.
    pub fn fail_after(mut self, chunks: u64) -> Self {
        self.fail_after_chunks = Some(chunks);
        self
    }

    /// Report only `bytes` bytes per read.
    pub fn with_short_read(mut self, bytes: usize) -> Self {
        self.short_read = Some(bytes);
        self
    }

    /// Start parameters of the current run, if started.
    pub fn started_with(&self) -> Option<RawSourceConfig> {
        self.started
    }

    /// Whether the source is converting.
    pub fn is_started(&self) -> bool {
        self.started.is_some()
    }

    /// Number of chunks delivered since construction.
    pub fn chunks_read(&self) -> u64 {
        self.counters.chunks_read()
    }

    /// Number of `stop` calls.
    pub fn stop_calls(&self) -> u64 {
        self.counters.stop_calls()
    }

    /// Shared counter handle that outlives moves of the source.
    pub fn counters(&self) -> Arc<SourceCounters> {
        Arc::clone(&self.counters)
    }

    fn next_code(&mut self) -> u16 {
        let mut code = self.waveform.code_at(self.position);
        self.position += 1;

        if let Some((amplitude, rng)) = self.noise.as_mut() {
            let amplitude = i32::from(*amplitude);
            let noisy = i32::from(code) + rng.gen_range(-amplitude..=amplitude);
            code = noisy.clamp(0, i32::from(MAX_RAW_CODE)) as u16;
        }

        (code & RAW_CODE_MASK) | (u16::from(self.channel_tag) << 12)
    }
}

impl RawSampleSource for SyntheticSource {
    fn capabilities(&self) -> SourceCapabilities {
        self.capabilities
    }

    fn start(&mut self, config: &RawSourceConfig) -> Result<()> {
        self.counters.start_calls.fetch_add(1, Ordering::Relaxed);

        if self.fail_start {
            return Err(SamplerError::HardwareInit {
                message: "Synthetic source configured to fail".to_string(),
            });
        }
        if config.sample_rate_hz > self.capabilities.max_sample_rate {
            return Err(SamplerError::HardwareInit {
                message: format!("Unsupported sample rate {} Hz", config.sample_rate_hz),
            });
        }
        if config.buffer_bytes == 0 || config.buffer_bytes > self.capabilities.max_transfer_bytes
        {
            return Err(SamplerError::HardwareInit {
                message: format!("Unsupported buffer size {} bytes", config.buffer_bytes),
            });
        }

        self.started = Some(*config);
        self.position = 0;
        Ok(())
    }

    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.started.is_none() {
            return Err(SamplerError::Source {
                message: "Synthetic source is not started".to_string(),
            });
        }
        if let Some(limit) = self.fail_after_chunks {
            if self.counters.chunks_read() >= limit {
                return Err(SamplerError::Source {
                    message: format!("Synthetic failure after {limit} chunks"),
                });
            }
        }
        if let Some(delay) = self.chunk_delay {
            std::thread::sleep(delay);
        }

        for cell in buf.chunks_exact_mut(RAW_SAMPLE_BYTES) {
            let code = self.next_code();
            cell.copy_from_slice(&code.to_le_bytes());
        }
        self.counters.chunks_read.fetch_add(1, Ordering::Relaxed);

        Ok(self.short_read.map_or(buf.len(), |n| n.min(buf.len())))
    }

    fn stop(&mut self) -> Result<()> {
        self.counters.stop_calls.fetch_add(1, Ordering::Relaxed);
        self.started = None;
        Ok(())
    }
}

/// Simulated ADC unit.
#[derive(Debug, Clone)]
pub struct MockFrontEnd {
    codes: Vec<u16>,
    cursor: usize,
    factory: FactoryCalibration,
    characterization: Option<CalibrationMapping>,
    reference_pins: Option<Vec<u8>>,
    fail_configure: bool,
    configured: Option<(AdcChannel, AttenuationRange)>,
    routed: Option<u8>,
    reads: u64,
    ticks: u64,
}

impl Default for MockFrontEnd {
    fn default() -> Self {
        Self::new()
    }
}

impl MockFrontEnd {
    /// Front end without factory calibration returning mid-scale codes.
    pub fn new() -> Self {
        Self {
            codes: vec![2048],
            cursor: 0,
            factory: FactoryCalibration::Unavailable,
            characterization: None,
            reference_pins: None,
            fail_configure: false,
            configured: None,
            routed: None,
            reads: 0,
            ticks: 0,
        }
    }

    /// One-shot conversions cycle through `codes`.
    pub fn with_codes(mut self, codes: &[u16]) -> Self {
        self.codes = codes.to_vec();
        self.cursor = 0;
        self
    }

    /// Report the given eFuse contents.
    pub fn with_factory_calibration(mut self, factory: FactoryCalibration) -> Self {
        self.factory = factory;
        self
    }

    /// Return `mapping` from `characterize` regardless of range.
    pub fn with_characterization(mut self, mapping: CalibrationMapping) -> Self {
        self.characterization = Some(mapping);
        self
    }

    /// Only these pins can carry the reference voltage.
    pub fn with_reference_pins(mut self, pins: &[u8]) -> Self {
        self.reference_pins = Some(pins.to_vec());
        self
    }

    /// Make channel configuration fail.
    pub fn fail_configure(mut self) -> Self {
        self.fail_configure = true;
        self
    }

    /// Last configured channel and range.
    pub fn configured(&self) -> Option<(AdcChannel, AttenuationRange)> {
        self.configured
    }

    /// Pin the reference was last routed to.
    pub fn routed_pin(&self) -> Option<u8> {
        self.routed
    }

    /// Number of one-shot conversions performed.
    pub fn reads(&self) -> u64 {
        self.reads
    }

    /// Number of ticks waited.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }
}

impl AnalogFrontEnd for MockFrontEnd {
    fn factory_calibration(&self) -> FactoryCalibration {
        self.factory
    }

    fn configure_channel(&mut self, channel: AdcChannel, range: AttenuationRange) -> Result<()> {
        if self.fail_configure {
            return Err(SamplerError::HardwareInit {
                message: format!("Cannot configure {channel}"),
            });
        }
        self.configured = Some((channel, range));
        Ok(())
    }

    fn read_raw(&mut self, channel: AdcChannel) -> Result<u16> {
        match self.configured {
            Some((configured, _)) if configured == channel => {}
            _ => {
                return Err(SamplerError::HardwareInit {
                    message: format!("{channel} is not configured"),
                })
            }
        }

        let code = if self.codes.is_empty() {
            0
        } else {
            self.codes[self.cursor % self.codes.len()]
        };
        self.cursor += 1;
        self.reads += 1;
        Ok(code)
    }

    fn wait_tick(&mut self) {
        self.ticks += 1;
    }

    fn route_reference(&mut self, pin: u8) -> Result<()> {
        if let Some(pins) = &self.reference_pins {
            if !pins.contains(&pin) {
                return Err(SamplerError::HardwareInit {
                    message: format!("GPIO {pin} cannot carry the reference voltage"),
                });
            }
        }
        self.routed = Some(pin);
        Ok(())
    }

    fn characterize(&self, range: AttenuationRange) -> CalibrationMapping {
        self.characterization
            .unwrap_or_else(|| CalibrationMapping::characterize(range, self.factory))
    }
}
