//! Background collection with multi-sink fan-out.
//!
//! [`Collector`] moves a [`Sampler`] onto a dedicated thread that calls
//! [`Sampler::collect`] back to back and forwards every filled batch to named
//! `tokio` channels:
//!
//! ```text
//!   RawSampleSource ──▶ Sampler::collect ──▶ SampleBatch
//!                                              │
//!                     ┌────────────────────────┼──────────────────┐
//!                     ▼                        ▼                  ▼
//!                 "display"                "storage"           "fft"
//! ```
//!
//! A full sink drops the batch (counted per sink) unless it was added with
//! `drop_on_overflow = false`, in which case the collector thread blocks on it.
//! Such a sink has to be drained or dropped, otherwise [`Collector::stop`]
//! waits on it.
//! Stop requests are honoured between batches; the session is then ended and
//! the sampler handed back.
//!
//! # Example
//!
//! ```
//! use adc_sampler::mock::{MockFrontEnd, SyntheticSource, Waveform};
//! use adc_sampler::{Collector, Sampler};
//!
//! # fn example() -> adc_sampler::Result<()> {
//! let sampler = Sampler::new(SyntheticSource::new(Waveform::Constant(2048)), MockFrontEnd::new());
//! let mut collector = Collector::new(sampler);
//! let mut rx = collector.add_sink("display", 4)?;
//!
//! collector.start()?;
//! let batch = rx.blocking_recv().expect("collector running");
//! collector.stop()?;
//!
//! assert_eq!(batch.len(), 1024);
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace};

use crate::config::SignalMode;
use crate::error::{Result, SamplerError};
use crate::sampler::{Sampler, SamplerStatus};
use crate::source::{AnalogFrontEnd, RawSampleSource};

/// One filled batch of calibrated samples.
#[derive(Debug, Clone)]
pub struct SampleBatch {
    /// Samples in millivolts (relative to `ac_zero` in AC mode)
    pub data: Vec<i16>,
    /// Sequence number for ordering
    pub sequence: u64,
    /// Mode the batch was collected in
    pub mode: SignalMode,
    /// Mean subtracted from the batch (AC mode only)
    pub ac_zero: i16,
    /// Wall time spent collecting, in milliseconds
    pub elapsed_ms: u64,
    /// When the batch was completed
    pub timestamp: Instant,
}

impl SampleBatch {
    /// Number of samples.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the batch has no samples.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Arithmetic mean of the samples in millivolts.
    pub fn mean_mv(&self) -> f64 {
        if self.data.is_empty() {
            return 0.0;
        }
        let sum: i64 = self.data.iter().map(|&s| i64::from(s)).sum();
        sum as f64 / self.data.len() as f64
    }

    /// Difference between the largest and smallest sample.
    pub fn peak_to_peak_mv(&self) -> i32 {
        match (self.data.iter().max(), self.data.iter().min()) {
            (Some(&max), Some(&min)) => i32::from(max) - i32::from(min),
            _ => 0,
        }
    }
}

/// Receiver handle for a collector sink.
pub type SinkReceiver = mpsc::Receiver<SampleBatch>;

/// Configuration for a collector sink.
#[derive(Debug, Clone)]
pub struct SinkConfig {
    /// Name of the sink (for logging/identification)
    pub name: String,
    /// Channel capacity in batches
    pub buffer_size: usize,
    /// Drop batches when the sink is full instead of blocking
    pub drop_on_overflow: bool,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            buffer_size: 8,
            drop_on_overflow: true,
        }
    }
}

struct Sink {
    sender: mpsc::Sender<SampleBatch>,
    drop_on_overflow: bool,
    drops: AtomicU64,
}

/// Statistics of a collector.
#[derive(Debug, Clone, Default)]
pub struct CollectorStats {
    /// Batches collected and dispatched
    pub batches_produced: u64,
    /// Batches dropped across all sinks
    pub batches_dropped: u64,
    /// Per-sink drop counts
    pub sink_drops: HashMap<String, u64>,
}

/// Hand-off cell: the thread takes the sampler on entry and puts it back on exit.
type SamplerSlot<S, F> = Arc<Mutex<Option<Sampler<S, F>>>>;

enum State<S: RawSampleSource, F: AnalogFrontEnd> {
    Idle(Sampler<S, F>),
    Running {
        handle: JoinHandle<Option<SamplerError>>,
        slot: SamplerSlot<S, F>,
    },
    Lost,
}

/// Runs a sampler's collect loop on its own thread.
pub struct Collector<S, F>
where
    S: RawSampleSource + Send + 'static,
    F: AnalogFrontEnd + Send + 'static,
{
    state: State<S, F>,
    sinks: Arc<RwLock<HashMap<String, Sink>>>,
    running: Arc<AtomicBool>,
    sequence: Arc<AtomicU64>,
    batches_produced: Arc<AtomicU64>,
    batches_dropped: Arc<AtomicU64>,
    status: Arc<SamplerStatus>,
}

impl<S, F> Collector<S, F>
where
    S: RawSampleSource + Send + 'static,
    F: AnalogFrontEnd + Send + 'static,
{
    /// Wrap an idle sampler.
    pub fn new(sampler: Sampler<S, F>) -> Self {
        let status = sampler.status();
        Self {
            state: State::Idle(sampler),
            sinks: Arc::new(RwLock::new(HashMap::new())),
            running: Arc::new(AtomicBool::new(false)),
            sequence: Arc::new(AtomicU64::new(0)),
            batches_produced: Arc::new(AtomicU64::new(0)),
            batches_dropped: Arc::new(AtomicU64::new(0)),
            status,
        }
    }

    /// Add a dropping sink holding up to `buffer_size` batches.
    pub fn add_sink(&self, name: &str, buffer_size: usize) -> Result<SinkReceiver> {
        self.add_sink_with_config(SinkConfig {
            name: name.to_string(),
            buffer_size,
            ..Default::default()
        })
    }

    /// Add a sink with full configuration.
    pub fn add_sink_with_config(&self, config: SinkConfig) -> Result<SinkReceiver> {
        if config.buffer_size == 0 {
            return Err(SamplerError::Collector {
                message: format!("Sink '{}' needs a buffer of at least one batch", config.name),
            });
        }

        let mut sinks = self.sinks.write();
        if sinks.contains_key(&config.name) {
            return Err(SamplerError::Collector {
                message: format!("Sink '{}' already exists", config.name),
            });
        }

        let (tx, rx) = mpsc::channel(config.buffer_size);
        sinks.insert(
            config.name.clone(),
            Sink {
                sender: tx,
                drop_on_overflow: config.drop_on_overflow,
                drops: AtomicU64::new(0),
            },
        );
        debug!(name = config.name, buffer_size = config.buffer_size, "Added sink");

        Ok(rx)
    }

    /// Remove a sink by name.
    pub fn remove_sink(&self, name: &str) -> bool {
        self.sinks.write().remove(name).is_some()
    }

    /// Names of the registered sinks.
    pub fn sink_names(&self) -> Vec<String> {
        self.sinks.read().keys().cloned().collect()
    }

    /// Begin the sampler session and start the collector thread.
    ///
    /// Session errors from [`Sampler::begin`] are returned here and leave the
    /// collector idle. If the thread cannot be spawned the session is ended,
    /// the sampler stays with the collector and a [`SamplerError::Collector`]
    /// is returned.
    pub fn start(&mut self) -> Result<()> {
        let mut sampler = match std::mem::replace(&mut self.state, State::Lost) {
            State::Idle(sampler) => sampler,
            running @ State::Running { .. } => {
                self.state = running;
                return Err(SamplerError::SessionActive);
            }
            State::Lost => {
                return Err(SamplerError::Collector {
                    message: "Sampler was lost by a panicked collector thread".to_string(),
                })
            }
        };

        if let Err(e) = sampler.begin() {
            self.state = State::Idle(sampler);
            return Err(e);
        }

        self.running.store(true, Ordering::SeqCst);

        let running = Arc::clone(&self.running);
        let sinks = Arc::clone(&self.sinks);
        let sequence = Arc::clone(&self.sequence);
        let batches_produced = Arc::clone(&self.batches_produced);
        let batches_dropped = Arc::clone(&self.batches_dropped);
        let slot: SamplerSlot<S, F> = Arc::new(Mutex::new(Some(sampler)));
        let thread_slot = Arc::clone(&slot);

        let spawned = thread::Builder::new()
            .name("adc-collector".to_string())
            .spawn(move || {
                let Some(mut sampler) = thread_slot.lock().take() else {
                    return None;
                };
                let mode = sampler.config().mode;
                let mut buffer = vec![0i16; sampler.config().output_samples];
                let mut failure = None;

                while running.load(Ordering::SeqCst) {
                    let elapsed_ms = match sampler.collect(&mut buffer) {
                        Ok(ms) => ms,
                        Err(e) => {
                            error!(error = %e, "Collection failed");
                            failure = Some(e);
                            break;
                        }
                    };

                    let batch = SampleBatch {
                        data: buffer.clone(),
                        sequence: sequence.fetch_add(1, Ordering::SeqCst),
                        mode,
                        ac_zero: match mode {
                            SignalMode::Ac => sampler.ac_zero(),
                            SignalMode::Dc => 0,
                        },
                        elapsed_ms,
                        timestamp: Instant::now(),
                    };

                    dispatch(&sinks, batch, &batches_dropped);
                    batches_produced.fetch_add(1, Ordering::SeqCst);
                }

                running.store(false, Ordering::SeqCst);
                sampler.end();
                *thread_slot.lock() = Some(sampler);
                debug!("Collector thread exiting");
                failure
            });

        match spawned {
            Ok(handle) => {
                self.state = State::Running { handle, slot };
                info!(sinks = self.sinks.read().len(), "Started collector");
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                if let Some(sampler) = reclaim(&slot) {
                    self.state = State::Idle(sampler);
                }
                Err(SamplerError::Collector {
                    message: format!("Failed to spawn collector thread: {e}"),
                })
            }
        }
    }

    /// Stop after the batch in progress, end the session and reclaim the sampler.
    ///
    /// Returns the collection error that terminated the thread early, if any.
    /// Does nothing when idle.
    pub fn stop(&mut self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);

        let (handle, slot) = match std::mem::replace(&mut self.state, State::Lost) {
            State::Running { handle, slot } => (handle, slot),
            other => {
                self.state = other;
                return Ok(());
            }
        };

        let failure = handle.join().map_err(|_| {
            error!("Collector thread panicked");
            SamplerError::Collector {
                message: "Collector thread panicked".to_string(),
            }
        })?;
        let sampler = reclaim(&slot).ok_or_else(|| SamplerError::Collector {
            message: "Collector thread did not return the sampler".to_string(),
        })?;
        self.state = State::Idle(sampler);

        let stats = self.stats();
        info!(
            batches = stats.batches_produced,
            drops = stats.batches_dropped,
            "Stopped collector"
        );

        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Whether the collector thread is producing batches.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Diagnostics of the wrapped sampler.
    pub fn status(&self) -> Arc<SamplerStatus> {
        Arc::clone(&self.status)
    }

    /// Current statistics.
    pub fn stats(&self) -> CollectorStats {
        let sink_drops = self
            .sinks
            .read()
            .iter()
            .map(|(name, sink)| (name.clone(), sink.drops.load(Ordering::SeqCst)))
            .collect();

        CollectorStats {
            batches_produced: self.batches_produced.load(Ordering::SeqCst),
            batches_dropped: self.batches_dropped.load(Ordering::SeqCst),
            sink_drops,
        }
    }

    /// The sampler, while the collector is idle.
    pub fn sampler(&self) -> Option<&Sampler<S, F>> {
        match &self.state {
            State::Idle(sampler) => Some(sampler),
            _ => None,
        }
    }

    /// Mutable access to the sampler, while the collector is idle.
    pub fn sampler_mut(&mut self) -> Option<&mut Sampler<S, F>> {
        match &mut self.state {
            State::Idle(sampler) => Some(sampler),
            _ => None,
        }
    }

    /// Stop if needed and hand back the sampler.
    pub fn into_sampler(mut self) -> Result<Sampler<S, F>> {
        let stopped = self.stop();
        match std::mem::replace(&mut self.state, State::Lost) {
            State::Idle(sampler) => {
                if let Err(e) = stopped {
                    debug!(error = %e, "Collector stopped with error");
                }
                Ok(sampler)
            }
            _ => Err(stopped.err().unwrap_or(SamplerError::Collector {
                message: "Sampler is not available".to_string(),
            })),
        }
    }
}

/// Take the sampler back from a hand-off cell, ending any session it still runs.
fn reclaim<S, F>(slot: &Mutex<Option<Sampler<S, F>>>) -> Option<Sampler<S, F>>
where
    S: RawSampleSource,
    F: AnalogFrontEnd,
{
    let mut sampler = slot.lock().take()?;
    sampler.end();
    Some(sampler)
}

fn dispatch(
    sinks: &RwLock<HashMap<String, Sink>>,
    batch: SampleBatch,
    batches_dropped: &AtomicU64,
) {
    let sinks = sinks.read();
    for (name, sink) in sinks.iter() {
        if sink.drop_on_overflow {
            match sink.sender.try_send(batch.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    sink.drops.fetch_add(1, Ordering::SeqCst);
                    batches_dropped.fetch_add(1, Ordering::SeqCst);
                    trace!(sink = name, "Dropped batch (sink full)");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    trace!(sink = name, "Sink closed");
                }
            }
        } else if sink.sender.blocking_send(batch.clone()).is_err() {
            trace!(sink = name, "Sink closed");
        }
    }
}

impl<S, F> Drop for Collector<S, F>
where
    S: RawSampleSource + Send + 'static,
    F: AnalogFrontEnd + Send + 'static,
{
    fn drop(&mut self) {
        if matches!(self.state, State::Running { .. }) {
            if let Err(e) = self.stop() {
                error!(error = %e, "Error stopping collector on drop");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SamplerConfig;
    use crate::mock::{MockFrontEnd, SyntheticSource, Waveform};

    fn collector(source: SyntheticSource) -> Collector<SyntheticSource, MockFrontEnd> {
        let mut sampler = Sampler::new(source, MockFrontEnd::new());
        sampler
            .set_config(SamplerConfig {
                output_samples: 64,
                ..SamplerConfig::default()
            })
            .unwrap();
        Collector::new(sampler)
    }

    #[test]
    fn test_sample_batch_statistics() {
        let batch = SampleBatch {
            data: vec![-10, 0, 10, 20],
            sequence: 0,
            mode: SignalMode::Dc,
            ac_zero: 0,
            elapsed_ms: 1,
            timestamp: Instant::now(),
        };
        assert_eq!(batch.len(), 4);
        assert!((batch.mean_mv() - 5.0).abs() < f64::EPSILON);
        assert_eq!(batch.peak_to_peak_mv(), 30);
    }

    #[test]
    fn test_duplicate_sink_rejected() {
        let collector = collector(SyntheticSource::new(Waveform::Constant(0)));
        collector.add_sink("display", 2).unwrap();
        assert!(collector.add_sink("display", 2).is_err());
        assert!(collector.add_sink("empty", 0).is_err());
        assert!(collector.remove_sink("display"));
        assert!(collector.sink_names().is_empty());
    }

    #[test]
    fn test_start_stop_reclaims_sampler() {
        let mut collector = collector(SyntheticSource::new(Waveform::Constant(2048)));
        let mut rx = collector.add_sink("display", 4).unwrap();

        collector.start().unwrap();
        assert!(collector.sampler().is_none());

        let first = rx.blocking_recv().unwrap();
        let second = rx.blocking_recv().unwrap();
        assert_eq!(first.len(), 64);
        assert!(second.sequence > first.sequence);

        collector.stop().unwrap();
        assert!(!collector.is_running());

        let sampler = collector.sampler().unwrap();
        assert!(!sampler.is_running());
        assert!(collector.stats().batches_produced >= 2);
    }

    #[test]
    fn test_full_sink_drops_batches() {
        let mut collector = collector(SyntheticSource::new(Waveform::Constant(0)));
        let mut rx = collector.add_sink("slow", 1).unwrap();

        collector.start().unwrap();
        while collector.stats().batches_dropped == 0 {
            thread::yield_now();
        }
        collector.stop().unwrap();

        let stats = collector.stats();
        assert!(stats.sink_drops["slow"] > 0);
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn test_begin_failure_keeps_collector_idle() {
        let mut collector = collector(SyntheticSource::new(Waveform::Constant(0)).fail_start());
        assert!(collector.start().unwrap_err().is_hardware());
        assert!(!collector.is_running());
        assert!(collector.sampler().is_some());
    }

    #[test]
    fn test_source_failure_is_reported_on_stop() {
        let mut collector = collector(SyntheticSource::new(Waveform::Constant(0)).fail_after(3));
        collector.start().unwrap();
        while collector.is_running() {
            thread::yield_now();
        }

        let err = collector.stop().unwrap_err();
        assert!(matches!(err, SamplerError::Source { .. }));
        assert!(collector.sampler().is_some());
    }

    #[test]
    fn test_reclaim_ends_session_and_empties_slot() {
        let mut sampler = Sampler::new(
            SyntheticSource::new(Waveform::Constant(0)),
            MockFrontEnd::new(),
        );
        sampler.begin().unwrap();
        let slot = Mutex::new(Some(sampler));

        let sampler = reclaim(&slot).unwrap();
        assert!(!sampler.is_running());
        assert_eq!(sampler.source().stop_calls(), 1);
        assert!(reclaim(&slot).is_none());
    }

    #[test]
    fn test_dc_batches_report_zero_ac_offset() {
        let mut sampler = Sampler::new(
            SyntheticSource::new(Waveform::Constant(2048)),
            MockFrontEnd::new(),
        );
        let ac = SamplerConfig {
            output_samples: 64,
            mode: SignalMode::Ac,
            ..SamplerConfig::default()
        };
        sampler.set_config(ac).unwrap();
        sampler.begin().unwrap();
        sampler.collect(&mut [0i16; 64]).unwrap();
        sampler.end();
        assert_ne!(sampler.ac_zero(), 0);

        sampler
            .set_config(SamplerConfig {
                mode: SignalMode::Dc,
                ..ac
            })
            .unwrap();
        let mut collector = Collector::new(sampler);
        let mut rx = collector.add_sink("display", 2).unwrap();
        collector.start().unwrap();
        let batch = rx.blocking_recv().unwrap();
        collector.stop().unwrap();

        assert_eq!(batch.mode, SignalMode::Dc);
        assert_eq!(batch.ac_zero, 0);
        assert!(batch.data.iter().all(|&s| s == 1792));
    }

    #[test]
    fn test_into_sampler_stops_running_collector() {
        let mut collector = collector(SyntheticSource::new(Waveform::Constant(0)));
        collector.start().unwrap();
        let sampler = collector.into_sampler().unwrap();
        assert!(!sampler.is_running());
        assert_eq!(sampler.source().stop_calls(), 1);
    }
}
