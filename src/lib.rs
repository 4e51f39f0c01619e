//! # ADC Sampler
//!
//! Continuous, calibrated sampling of one ADC1 input on ESP32-class hardware.
//!
//! A hardware-clocked raw stream (I2S/DMA on the ESP32) delivers 12-bit codes
//! into rotating buffers. The [`Sampler`] decimates them by averaging
//! `multisample` readings, converts each to millivolts with the factory
//! calibration of the selected attenuation range and, in AC mode, removes the
//! batch mean. A one-shot [`Sampler::measure`] path averages software-triggered
//! readings of any ADC1 pin while streaming is stopped.
//!
//! ## Crate Structure
//!
//! - **`config`**: [`SamplerConfig`] and [`SignalMode`], the value-type
//!   acquisition parameters with serde defaults.
//! - **`channel`**: the fixed GPIO to ADC1 channel table.
//! - **`calibration`**: attenuation ranges and the eFuse-derived linear
//!   raw-code to millivolt mapping.
//! - **`timing`**: raw sampling rate and DMA buffer geometry.
//! - **`source`**: the [`RawSampleSource`] and [`AnalogFrontEnd`] hardware seams.
//! - **`sampler`**: the acquisition engine and its shared [`SamplerStatus`].
//! - **`collector`**: background collect loop with `tokio` channel sinks.
//! - **`mock`**: synthetic hardware for tests and demos.
//! - **`settings`** / **`logging`**: Figment settings and tracing setup.
//! - **`error`**: the [`SamplerError`] enum.
//!
//! ## Quick Start
//!
//! ```
//! use adc_sampler::mock::{MockFrontEnd, SyntheticSource, Waveform};
//! use adc_sampler::{Sampler, SamplerConfig, SignalMode};
//!
//! # fn main() -> adc_sampler::Result<()> {
//! let mut sampler = Sampler::new(
//!     SyntheticSource::new(Waveform::Sine { center: 2048, amplitude: 500, period: 64 }),
//!     MockFrontEnd::new(),
//! );
//! sampler.set_config(SamplerConfig {
//!     sample_frequency: 8_000,
//!     output_samples: 256,
//!     mode: SignalMode::Ac,
//!     ..SamplerConfig::default()
//! })?;
//!
//! let geometry = sampler.begin()?;
//! assert_eq!(geometry.raw_sample_rate, 16_000);
//!
//! let mut samples = vec![0i16; 256];
//! sampler.collect(&mut samples)?;
//! sampler.end();
//! # Ok(())
//! # }
//! ```

pub mod calibration;
pub mod channel;
pub mod collector;
pub mod config;
pub mod error;
pub mod logging;
pub mod mock;
pub mod sampler;
pub mod settings;
pub mod source;
pub mod timing;

pub use calibration::{AttenuationRange, CalibrationMapping, CalibrationSource, FactoryCalibration};
pub use channel::{resolve_channel, AdcChannel};
pub use collector::{Collector, CollectorStats, SampleBatch, SinkConfig, SinkReceiver};
pub use config::{SamplerConfig, SignalMode};
pub use error::{Result, SamplerError};
pub use sampler::{Sampler, SamplerStatus};
pub use settings::Settings;
pub use source::{AnalogFrontEnd, RawSampleSource, RawSourceConfig, SourceCapabilities};
pub use timing::BufferGeometry;
