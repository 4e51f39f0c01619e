//! Raw sampling rate and buffer geometry.
//!
//! One collection produces `output_samples` values from
//! `output_samples * multisample` raw cells of 2 bytes each. The raw source
//! transfers at most [`SourceCapabilities::max_transfer_bytes`] per chunk, so
//! a large batch is spread over several rotating buffers:
//!
//! ```text
//! ideal_bytes  = output_samples * multisample * 2
//! chunk_bytes  = min(ideal_bytes, max_transfer_bytes), rounded down to a cell
//! buffer_count = ceil(ideal_bytes / chunk_bytes) + extra_buffers
//! ```

use tracing::debug;

use crate::config::SamplerConfig;
use crate::error::{Result, SamplerError};
use crate::source::SourceCapabilities;

/// Size of one raw ADC cell in bytes.
pub const RAW_SAMPLE_BYTES: usize = 2;

/// Derived timing and buffer layout for one acquisition session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferGeometry {
    /// Hardware sampling rate in Hz (output rate x multisample)
    pub raw_sample_rate: u32,
    /// Raw bytes needed for one full batch
    pub ideal_bytes: usize,
    /// Bytes per raw chunk delivered by the source
    pub chunk_bytes: usize,
    /// Number of rotating raw buffers
    pub buffer_count: usize,
    /// Expected time to fill one batch, in milliseconds
    pub collect_time_ms: u64,
}

impl BufferGeometry {
    /// Compute the geometry for `config` against the source limits.
    pub fn plan(config: &SamplerConfig, caps: &SourceCapabilities) -> Result<Self> {
        config.validate()?;

        let raw_sample_rate = config.raw_sample_rate().ok_or_else(|| {
            SamplerError::invalid_config("Raw sample rate overflows".to_string())
        })?;

        if raw_sample_rate > caps.max_sample_rate {
            return Err(SamplerError::invalid_config(format!(
                "Raw sample rate {} Hz ({} Hz x {}) exceeds source maximum {} Hz",
                raw_sample_rate, config.sample_frequency, config.multisample, caps.max_sample_rate
            )));
        }

        let max_chunk = caps.max_transfer_bytes - caps.max_transfer_bytes % RAW_SAMPLE_BYTES;
        if max_chunk == 0 {
            return Err(SamplerError::HardwareInit {
                message: format!(
                    "Source transfer size {} bytes cannot hold one sample",
                    caps.max_transfer_bytes
                ),
            });
        }

        let ideal_bytes = config
            .output_samples
            .checked_mul(config.multisample as usize)
            .and_then(|cells| cells.checked_mul(RAW_SAMPLE_BYTES))
            .ok_or_else(|| SamplerError::invalid_config("Raw buffer size overflows"))?;

        let chunk_bytes = ideal_bytes.min(max_chunk);
        let buffer_count = ideal_bytes.div_ceil(chunk_bytes) + config.extra_buffers as usize;
        let collect_time_ms = (config.output_samples as u64)
            .checked_mul(1000)
            .ok_or_else(|| SamplerError::invalid_config("Collect time overflows"))?
            / u64::from(config.sample_frequency);

        let geometry = Self {
            raw_sample_rate,
            ideal_bytes,
            chunk_bytes,
            buffer_count,
            collect_time_ms,
        };

        debug!(
            raw_sample_rate,
            ideal_bytes,
            chunk_bytes,
            buffer_count,
            collect_time_ms,
            "Planned buffer geometry"
        );

        Ok(geometry)
    }

    /// Raw cells carried by one chunk.
    pub fn samples_per_chunk(&self) -> usize {
        self.chunk_bytes / RAW_SAMPLE_BYTES
    }

    /// Chunks needed to produce `output_samples` values at `multisample`.
    pub fn chunks_per_batch(&self, output_samples: usize, multisample: u32) -> usize {
        (output_samples * multisample as usize).div_ceil(self.samples_per_chunk())
    }
}
