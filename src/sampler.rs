//! Acquisition engine.
//!
//! [`Sampler`] owns the configuration, the calibration mapping of the running
//! session and the raw chunk buffer. It is driven from a single execution
//! context; diagnostics that other threads may want to watch (AC zero level,
//! timings, batch counter) are published through a shared [`SamplerStatus`]
//! of atomics and carry no consistency guarantee.
//!
//! # State Machine
//!
//! ```text
//!            begin()                 end()
//!   Idle ─────────────▶ Running ─────────────▶ Idle
//!    │                    │
//!    └─ measure()         └─ collect() (repeated, blocking)
//! ```
//!
//! # Example
//!
//! ```
//! use adc_sampler::mock::{MockFrontEnd, SyntheticSource, Waveform};
//! use adc_sampler::{Sampler, SamplerConfig, SignalMode};
//!
//! # fn example() -> adc_sampler::Result<()> {
//! let source = SyntheticSource::new(Waveform::Constant(2048));
//! let mut sampler = Sampler::new(source, MockFrontEnd::new());
//!
//! sampler.set_config(SamplerConfig {
//!     mode: SignalMode::Ac,
//!     ..Sampler::<SyntheticSource, MockFrontEnd>::default_config()
//! })?;
//!
//! sampler.begin()?;
//! let mut samples = vec![0i16; 1024];
//! let elapsed_ms = sampler.collect(&mut samples)?;
//! println!("AC zero {} mV after {} ms", sampler.ac_zero(), elapsed_ms);
//! sampler.end();
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info, trace, warn};

use crate::calibration::{log_factory_calibration, AttenuationRange, CalibrationMapping};
use crate::channel::{resolve_channel, AdcChannel};
use crate::config::{SamplerConfig, SignalMode};
use crate::error::{Result, SamplerError};
use crate::source::{AnalogFrontEnd, RawSampleSource, RawSourceConfig};
use crate::timing::{BufferGeometry, RAW_SAMPLE_BYTES};

/// Diagnostics shared with observer threads.
///
/// Values are advisory snapshots: they are written by the acquisition thread
/// without locking and may be read mid-update.
#[derive(Debug, Default)]
pub struct SamplerStatus {
    running: AtomicBool,
    ac_zero: AtomicI32,
    collect_time_ms: AtomicU64,
    last_collect_ms: AtomicU64,
    batches: AtomicU64,
}

impl SamplerStatus {
    /// Whether a session is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Mean subtracted by the last AC-mode collection, in millivolts.
    pub fn ac_zero(&self) -> i16 {
        self.ac_zero.load(Ordering::Relaxed) as i16
    }

    /// Expected time to fill one batch at the configured rate.
    pub fn collect_time_ms(&self) -> u64 {
        self.collect_time_ms.load(Ordering::Relaxed)
    }

    /// Wall time spent in the last collection.
    pub fn last_collect_ms(&self) -> u64 {
        self.last_collect_ms.load(Ordering::Relaxed)
    }

    /// Number of batches collected since construction.
    pub fn batches(&self) -> u64 {
        self.batches.load(Ordering::Relaxed)
    }
}

/// State of a running acquisition.
struct Session {
    geometry: BufferGeometry,
    calibration: CalibrationMapping,
    channel: AdcChannel,
    raw: Vec<u8>,
}

/// Single-channel calibrated sampler.
///
/// One instance owns one input channel. Construct it once with the hardware
/// collaborators and keep it for the lifetime of the application.
pub struct Sampler<S: RawSampleSource, F: AnalogFrontEnd> {
    source: S,
    front_end: F,
    config: SamplerConfig,
    session: Option<Session>,
    status: Arc<SamplerStatus>,
}

impl<S: RawSampleSource, F: AnalogFrontEnd> Sampler<S, F> {
    /// Create an idle sampler using the default configuration.
    pub fn new(source: S, front_end: F) -> Self {
        Self {
            source,
            front_end,
            config: SamplerConfig::default(),
            session: None,
            status: Arc::new(SamplerStatus::default()),
        }
    }

    /// A known-good configuration (3.3 V, 44.1 kHz, 1024 samples, DC, x2).
    pub fn default_config() -> SamplerConfig {
        SamplerConfig::default()
    }

    /// Copy of the active configuration.
    pub fn config(&self) -> SamplerConfig {
        self.config
    }

    /// Replace the active configuration.
    ///
    /// The configuration is validated immediately, including the raw rate and
    /// transfer limits of the source. On error the previous configuration is
    /// kept. Changing the configuration of a running session is rejected.
    pub fn set_config(&mut self, config: SamplerConfig) -> Result<()> {
        if self.session.is_some() {
            return Err(SamplerError::SessionActive);
        }

        BufferGeometry::plan(&config, &self.source.capabilities())?;
        self.config = config;

        debug!(?config, "Sampler configuration updated");
        Ok(())
    }

    /// Start a streaming session.
    ///
    /// Plans the buffer geometry, configures and characterizes the input
    /// channel, then starts the raw source. On any failure the sampler stays
    /// idle and the source is stopped.
    pub fn begin(&mut self) -> Result<BufferGeometry> {
        if self.session.is_some() {
            return Err(SamplerError::SessionActive);
        }

        let geometry = BufferGeometry::plan(&self.config, &self.source.capabilities())?;
        let channel = resolve_channel(self.config.pin)?;
        let range = AttenuationRange::for_ceiling(self.config.voltage_ceiling);
        let calibration = self.setup_channel(channel, range)?;

        let source_config = RawSourceConfig {
            channel_count: 1,
            buffer_bytes: geometry.chunk_bytes,
            buffer_count: geometry.buffer_count,
            sample_rate_hz: geometry.raw_sample_rate,
            input_pin: self.config.pin,
        };

        info!(
            channel = %channel,
            sample_rate_khz = f64::from(self.config.sample_frequency) / 1000.0,
            samples = self.config.output_samples,
            collect_time_ms = geometry.collect_time_ms,
            "Starting sampler"
        );
        info!(
            buffer_count = geometry.buffer_count,
            buffer_bytes = geometry.chunk_bytes,
            raw_rate_khz = f64::from(geometry.raw_sample_rate) / 1000.0,
            "Raw source geometry"
        );

        if let Err(e) = self.source.start(&source_config) {
            error!(error = %e, "Raw source failed to start");
            if let Err(stop_err) = self.source.stop() {
                warn!(error = %stop_err, "Error stopping raw source after failed start");
            }
            return Err(e);
        }

        self.session = Some(Session {
            geometry,
            calibration,
            channel,
            raw: vec![0u8; geometry.chunk_bytes],
        });
        self.status
            .collect_time_ms
            .store(geometry.collect_time_ms, Ordering::Relaxed);
        self.status.running.store(true, Ordering::Relaxed);

        Ok(geometry)
    }

    /// Stop the streaming session. Does nothing when idle.
    ///
    /// Must not race an in-flight [`collect`](Self::collect); the `&mut self`
    /// receiver enforces this for direct callers.
    pub fn end(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };

        if let Err(e) = self.source.stop() {
            warn!(error = %e, "Error stopping raw source");
        }
        self.status.running.store(false, Ordering::Relaxed);

        info!(
            channel = %session.channel,
            batches = self.status.batches(),
            "Stopped sampler"
        );
    }

    /// Fill `buffer` with calibrated samples, blocking until it is full.
    ///
    /// Every `multisample` consecutive raw readings are averaged (truncating)
    /// into one output sample. In [`SignalMode::Ac`] the batch mean is then
    /// subtracted from every sample and published as [`ac_zero`](Self::ac_zero).
    ///
    /// Raw chunks are pulled from the source as needed and never carried over
    /// to the next call, so one call consumes exactly
    /// `ceil(len * multisample / samples_per_chunk)` chunks.
    ///
    /// Returns the wall time spent, in milliseconds.
    pub fn collect(&mut self, buffer: &mut [i16]) -> Result<u64> {
        let started = Instant::now();
        let multisample = self.config.multisample;
        let mode = self.config.mode;

        let session = self.session.as_mut().ok_or(SamplerError::NotRunning)?;
        if buffer.is_empty() {
            return Ok(0);
        }

        let calibration = session.calibration;
        let mut produced = 0usize;
        let mut cursor = 0usize;
        let mut available = 0usize;
        let mut accumulator: i64 = 0;
        let mut accumulated: u32 = 0;
        let mut total: i64 = 0;

        while produced < buffer.len() {
            if cursor >= available {
                let read = self.source.read_chunk(&mut session.raw)?;
                available = read.min(session.raw.len()) & !(RAW_SAMPLE_BYTES - 1);
                if available == 0 {
                    return Err(SamplerError::Source {
                        message: format!("Short read: {read} bytes"),
                    });
                }
                cursor = 0;
            }

            let raw = u16::from_le_bytes([session.raw[cursor], session.raw[cursor + 1]]);
            cursor += RAW_SAMPLE_BYTES;

            accumulator += i64::from(calibration.raw_to_millivolts(raw));
            accumulated += 1;

            if accumulated == multisample {
                let sample = saturate_i16(accumulator / i64::from(multisample));
                buffer[produced] = sample;
                produced += 1;
                total += i64::from(sample);
                accumulator = 0;
                accumulated = 0;
            }
        }

        if mode == SignalMode::Ac {
            let ac_zero = saturate_i16(total / buffer.len() as i64);
            for sample in buffer.iter_mut() {
                *sample = sample.saturating_sub(ac_zero);
            }
            self.status
                .ac_zero
                .store(i32::from(ac_zero), Ordering::Relaxed);
        }

        let elapsed_ms = started.elapsed().as_millis() as u64;
        self.status
            .last_collect_ms
            .store(elapsed_ms, Ordering::Relaxed);
        self.status.batches.fetch_add(1, Ordering::Relaxed);

        trace!(samples = buffer.len(), elapsed_ms, "Collected batch");
        Ok(elapsed_ms)
    }

    /// Average one-shot readings of `pin` over `duration_ticks` scheduler ticks.
    ///
    /// Uses the attenuation selected by the configured voltage ceiling and
    /// blocks for about `duration_ticks` ticks (at least one reading is taken).
    /// Fails with [`SamplerError::ConcurrentAccess`] while streaming, without
    /// touching the ADC.
    pub fn measure(&mut self, pin: u8, duration_ticks: u32) -> Result<i16> {
        if self.session.is_some() {
            error!(pin, "Cannot run one-shot measurement while streaming");
            return Err(SamplerError::ConcurrentAccess);
        }

        let channel = resolve_channel(pin)?;
        let range = AttenuationRange::for_ceiling(self.config.voltage_ceiling);
        let calibration = self.setup_channel(channel, range)?;

        let mut sum: i64 = 0;
        let mut reads: i64 = 0;
        let mut remaining = duration_ticks;
        loop {
            let raw = self.front_end.read_raw(channel)?;
            sum += i64::from(calibration.raw_to_millivolts(raw));
            reads += 1;
            self.front_end.wait_tick();

            remaining = remaining.saturating_sub(1);
            if remaining == 0 {
                break;
            }
        }

        let mean = saturate_i16(sum / reads);
        debug!(pin, reads, mean_mv = mean, "One-shot measurement");
        Ok(mean)
    }

    /// Expose the internal reference voltage on `pin` for external measurement.
    ///
    /// Diagnostic only; failures are logged and reported as `false`.
    pub fn route_calibration_reference(&mut self, pin: u8) -> bool {
        match self.front_end.route_reference(pin) {
            Ok(()) => {
                info!(pin, "Reference voltage routed");
                true
            }
            Err(e) => {
                error!(pin, error = %e, "Failed to route reference voltage");
                false
            }
        }
    }

    /// Whether a streaming session is active.
    pub fn is_running(&self) -> bool {
        self.session.is_some()
    }

    /// Mean subtracted by the last AC-mode collection, in millivolts.
    pub fn ac_zero(&self) -> i16 {
        self.status.ac_zero()
    }

    /// Expected time to fill one batch, from the last [`begin`](Self::begin).
    pub fn collect_time_ms(&self) -> u64 {
        self.status.collect_time_ms()
    }

    /// Shared diagnostics handle for observer threads.
    pub fn status(&self) -> Arc<SamplerStatus> {
        Arc::clone(&self.status)
    }

    /// Buffer geometry of the running session.
    pub fn geometry(&self) -> Option<BufferGeometry> {
        self.session.as_ref().map(|s| s.geometry)
    }

    /// Calibration of the running session.
    pub fn calibration(&self) -> Option<CalibrationMapping> {
        self.session.as_ref().map(|s| s.calibration)
    }

    /// The raw sample source.
    pub fn source(&self) -> &S {
        &self.source
    }

    /// The ADC front end.
    pub fn front_end(&self) -> &F {
        &self.front_end
    }

    /// Configure `channel` for `range`, characterize it and prime the converter.
    fn setup_channel(
        &mut self,
        channel: AdcChannel,
        range: AttenuationRange,
    ) -> Result<CalibrationMapping> {
        log_factory_calibration(self.front_end.factory_calibration());
        self.front_end.configure_channel(channel, range)?;

        let calibration = self.front_end.characterize(range);
        info!(
            channel = %channel,
            ceiling = self.config.voltage_ceiling,
            attenuation_db = range.attenuation_db(),
            vref = calibration.vref(),
            coeff_a = calibration.coeff_a(),
            coeff_b = calibration.coeff_b(),
            "Configured ADC channel"
        );

        // First conversion after reconfiguration is discarded.
        self.front_end.read_raw(channel)?;
        Ok(calibration)
    }
}

impl<S: RawSampleSource, F: AnalogFrontEnd> Drop for Sampler<S, F> {
    fn drop(&mut self) {
        if self.session.is_some() {
            self.end();
        }
    }
}

impl<S: RawSampleSource, F: AnalogFrontEnd> std::fmt::Debug for Sampler<S, F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sampler")
            .field("config", &self.config)
            .field("running", &self.session.is_some())
            .field("geometry", &self.geometry())
            .finish()
    }
}

fn saturate_i16(value: i64) -> i16 {
    value.clamp(i64::from(i16::MIN), i64::from(i16::MAX)) as i16
}
