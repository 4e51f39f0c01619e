//! End-to-end acquisition tests against the synthetic hardware.
//!
//! Covers chunk accounting, decimation exactness, AC centering, session state
//! transitions and one-shot measurement isolation.

use adc_sampler::mock::{MockFrontEnd, SyntheticSource, Waveform};
use adc_sampler::{
    AttenuationRange, CalibrationMapping, FactoryCalibration, Sampler, SamplerConfig,
    SamplerError, SignalMode,
};

type MockSampler = Sampler<SyntheticSource, MockFrontEnd>;

fn sampler_with(source: SyntheticSource, config: SamplerConfig) -> MockSampler {
    let mut sampler = Sampler::new(source, MockFrontEnd::new());
    sampler.set_config(config).unwrap();
    sampler
}

/// Maps code 0 to -100 mV and code 200 to +100 mV.
fn offset_mapping() -> CalibrationMapping {
    CalibrationMapping::from_coefficients(AttenuationRange::Db11, 1 << 16, -100, 1100)
}

#[test]
fn test_collect_consumes_exact_chunk_count() {
    let cases = [(1024, 2), (300, 3), (100, 1), (513, 1), (64, 16)];

    for (output_samples, multisample) in cases {
        let config = SamplerConfig {
            output_samples,
            multisample,
            sample_frequency: 8_000,
            ..SamplerConfig::default()
        };
        let mut sampler = sampler_with(SyntheticSource::new(Waveform::Constant(1000)), config);
        let geometry = sampler.begin().unwrap();
        let expected = geometry.chunks_per_batch(output_samples, multisample) as u64;

        let mut buffer = vec![0i16; output_samples];
        sampler.collect(&mut buffer).unwrap();
        assert_eq!(
            sampler.source().chunks_read(),
            expected,
            "n={output_samples} m={multisample}"
        );

        // Leftover cells are not carried into the next batch.
        sampler.collect(&mut buffer).unwrap();
        assert_eq!(sampler.source().chunks_read(), 2 * expected);
    }
}

#[test]
fn test_default_scenario_reads_four_chunks() {
    let config = SamplerConfig {
        mode: SignalMode::Ac,
        ..SamplerConfig::default()
    };
    let mut sampler = sampler_with(SyntheticSource::new(Waveform::Constant(2048)), config);

    let geometry = sampler.begin().unwrap();
    assert_eq!(geometry.raw_sample_rate, 88_200);
    assert_eq!(geometry.ideal_bytes, 4096);
    assert_eq!(geometry.chunk_bytes, 1024);
    assert_eq!(geometry.buffer_count, 4);
    assert_eq!(geometry.collect_time_ms, 23);
    assert_eq!(sampler.collect_time_ms(), 23);

    let mut buffer = vec![0i16; 1024];
    sampler.collect(&mut buffer).unwrap();
    assert_eq!(sampler.source().chunks_read(), 4);
}

#[test]
fn test_constant_input_dc_is_exact() {
    for multisample in [1, 2, 5] {
        let config = SamplerConfig {
            output_samples: 200,
            multisample,
            ..SamplerConfig::default()
        };
        let mut sampler = sampler_with(SyntheticSource::new(Waveform::Constant(2048)), config);
        sampler.begin().unwrap();

        let mut buffer = vec![0i16; 200];
        sampler.collect(&mut buffer).unwrap();

        // Default Vref, 11 dB: ((52798 * 2048 + 32768) >> 16) + 142
        assert!(buffer.iter().all(|&s| s == 1792), "multisample {multisample}");
        assert_eq!(sampler.ac_zero(), 0);
    }
}

#[test]
fn test_constant_input_ac_is_zero() {
    let config = SamplerConfig {
        output_samples: 512,
        mode: SignalMode::Ac,
        ..SamplerConfig::default()
    };
    let mut sampler = sampler_with(SyntheticSource::new(Waveform::Constant(2048)), config);
    sampler.begin().unwrap();

    let mut buffer = vec![123i16; 512];
    sampler.collect(&mut buffer).unwrap();

    assert!(buffer.iter().all(|&s| s == 0));
    assert_eq!(sampler.ac_zero(), 1792);
    assert_eq!(sampler.status().ac_zero(), 1792);
}

#[test]
fn test_alternating_plus_minus_100mv() {
    for mode in [SignalMode::Dc, SignalMode::Ac] {
        let front_end = MockFrontEnd::new().with_characterization(offset_mapping());
        let mut sampler =
            Sampler::new(SyntheticSource::new(Waveform::Alternating(0, 200)), front_end);
        sampler
            .set_config(SamplerConfig {
                output_samples: 256,
                multisample: 2,
                mode,
                ..SamplerConfig::default()
            })
            .unwrap();
        sampler.begin().unwrap();

        let mut buffer = vec![1i16; 256];
        sampler.collect(&mut buffer).unwrap();

        assert!(buffer.iter().all(|&s| s == 0), "{mode:?}");
        assert_eq!(sampler.ac_zero(), 0);
    }
}

#[test]
fn test_decimation_truncates_negative_means() {
    // -100 and +99 average to -0.5, which truncates toward zero.
    let front_end = MockFrontEnd::new().with_characterization(offset_mapping());
    let mut sampler = Sampler::new(SyntheticSource::new(Waveform::Alternating(0, 199)), front_end);
    sampler
        .set_config(SamplerConfig {
            output_samples: 16,
            ..SamplerConfig::default()
        })
        .unwrap();
    sampler.begin().unwrap();

    let mut buffer = vec![7i16; 16];
    sampler.collect(&mut buffer).unwrap();
    assert!(buffer.iter().all(|&s| s == 0));
}

#[test]
fn test_ac_square_wave_is_centered() {
    let front_end = MockFrontEnd::new().with_characterization(offset_mapping());
    let waveform = Waveform::Square {
        low: 0,
        high: 200,
        half_period: 8,
    };
    let mut sampler = Sampler::new(SyntheticSource::new(waveform), front_end);
    sampler
        .set_config(SamplerConfig {
            output_samples: 64,
            multisample: 1,
            mode: SignalMode::Ac,
            ..SamplerConfig::default()
        })
        .unwrap();
    sampler.begin().unwrap();

    let mut buffer = vec![0i16; 64];
    sampler.collect(&mut buffer).unwrap();

    assert_eq!(sampler.ac_zero(), 0);
    assert_eq!(&buffer[..8], &[-100; 8]);
    assert_eq!(&buffer[8..16], &[100; 8]);
}

#[test]
fn test_channel_tag_bits_are_ignored() {
    let config = SamplerConfig {
        output_samples: 128,
        ..SamplerConfig::default()
    };
    let tagged = SyntheticSource::new(Waveform::Constant(2048)).with_channel_tag(0xF);
    let mut sampler = sampler_with(tagged, config);
    sampler.begin().unwrap();

    let mut buffer = vec![0i16; 128];
    sampler.collect(&mut buffer).unwrap();
    assert!(buffer.iter().all(|&s| s == 1792));
}

#[test]
fn test_noisy_sine_ac_mean_is_near_zero() {
    let waveform = Waveform::Sine {
        center: 2048,
        amplitude: 800,
        period: 128,
    };
    let source = SyntheticSource::new(waveform).with_noise(16, 1234);
    let config = SamplerConfig {
        output_samples: 1024,
        multisample: 2,
        mode: SignalMode::Ac,
        ..SamplerConfig::default()
    };
    let mut sampler = sampler_with(source, config);
    sampler.begin().unwrap();

    let mut buffer = vec![0i16; 1024];
    sampler.collect(&mut buffer).unwrap();

    let mean: i64 = buffer.iter().map(|&s| i64::from(s)).sum::<i64>() / 1024;
    assert!(mean.abs() <= 1, "mean {mean}");
    assert!((sampler.ac_zero() - 1792).abs() < 20);
    assert!(buffer.iter().any(|&s| s > 400));
    assert!(buffer.iter().any(|&s| s < -400));
}

#[test]
fn test_short_read_is_a_source_error() {
    let source = SyntheticSource::new(Waveform::Constant(0)).with_short_read(0);
    let mut sampler = sampler_with(source, SamplerConfig::default());
    sampler.begin().unwrap();

    let mut buffer = vec![0i16; 1024];
    let err = sampler.collect(&mut buffer).unwrap_err();
    assert!(matches!(err, SamplerError::Source { .. }));
    assert!(sampler.is_running());
}

#[test]
fn test_partial_reads_pull_more_chunks() {
    let source = SyntheticSource::new(Waveform::Constant(2048)).with_short_read(256);
    let mut sampler = sampler_with(source, SamplerConfig::default());
    sampler.begin().unwrap();

    let mut buffer = vec![0i16; 1024];
    sampler.collect(&mut buffer).unwrap();
    // 2048 cells at 128 usable cells per read.
    assert_eq!(sampler.source().chunks_read(), 16);
    assert!(buffer.iter().all(|&s| s == 1792));
}

#[test]
fn test_source_failure_propagates() {
    let source = SyntheticSource::new(Waveform::Constant(0)).fail_after(1);
    let mut sampler = sampler_with(source, SamplerConfig::default());
    sampler.begin().unwrap();

    let mut buffer = vec![0i16; 1024];
    assert!(sampler.collect(&mut buffer).unwrap_err().is_hardware());
}

#[test]
fn test_session_state_transitions() {
    let mut sampler = sampler_with(
        SyntheticSource::new(Waveform::Constant(0)),
        SamplerConfig::default(),
    );
    let mut buffer = vec![0i16; 16];

    assert!(matches!(sampler.collect(&mut buffer), Err(SamplerError::NotRunning)));

    sampler.begin().unwrap();
    assert!(sampler.is_running());
    assert!(matches!(
        sampler.set_config(SamplerConfig::default()),
        Err(SamplerError::SessionActive)
    ));

    sampler.end();
    sampler.end();
    assert!(!sampler.is_running());
    assert!(!sampler.status().is_running());
    assert!(!sampler.source().is_started());
    assert!(matches!(sampler.collect(&mut buffer), Err(SamplerError::NotRunning)));

    // A second session can be started after end.
    sampler.begin().unwrap();
    sampler.collect(&mut buffer).unwrap();
    assert_eq!(sampler.status().batches(), 1);
}

#[test]
fn test_set_config_of_current_config_is_noop() {
    let mut sampler = sampler_with(
        SyntheticSource::new(Waveform::Constant(0)),
        SamplerConfig {
            pin: 32,
            voltage_ceiling: 1.5,
            sample_frequency: 16_000,
            output_samples: 333,
            mode: SignalMode::Ac,
            multisample: 3,
            extra_buffers: 1,
        },
    );
    let before = sampler.config();
    sampler.set_config(sampler.config()).unwrap();
    assert_eq!(sampler.config(), before);
    assert_eq!(MockSampler::default_config(), SamplerConfig::default());
}

#[test]
fn test_voltage_ceiling_selects_attenuation() {
    let cases = [
        (1.0, AttenuationRange::Db0),
        (1.5, AttenuationRange::Db2_5),
        (2.2, AttenuationRange::Db6),
        (3.3, AttenuationRange::Db11),
    ];
    for (ceiling, expected) in cases {
        let mut sampler = sampler_with(
            SyntheticSource::new(Waveform::Constant(0)),
            SamplerConfig {
                voltage_ceiling: ceiling,
                ..SamplerConfig::default()
            },
        );
        sampler.begin().unwrap();
        assert_eq!(sampler.front_end().configured().unwrap().1, expected);
        assert_eq!(sampler.calibration().unwrap().range(), expected);
    }
}

#[test]
fn test_begin_uses_factory_calibration() {
    let front_end =
        MockFrontEnd::new().with_factory_calibration(FactoryCalibration::Vref(1000));
    let mut sampler = Sampler::new(SyntheticSource::new(Waveform::Constant(0)), front_end);
    sampler.begin().unwrap();

    let calibration = sampler.calibration().unwrap();
    assert_eq!(calibration.vref(), 1000);
    assert_eq!(calibration.range(), AttenuationRange::Db11);
}

#[test]
fn test_begin_failures_leave_sampler_idle() {
    let mut sampler = Sampler::new(
        SyntheticSource::new(Waveform::Constant(0)),
        MockFrontEnd::new().fail_configure(),
    );
    assert!(sampler.begin().unwrap_err().is_hardware());
    assert!(!sampler.is_running());
    assert!(!sampler.source().is_started());

    let source = SyntheticSource::new(Waveform::Constant(0)).with_max_transfer_bytes(1);
    let mut sampler = Sampler::new(source, MockFrontEnd::new());
    assert!(matches!(
        sampler.begin(),
        Err(SamplerError::HardwareInit { .. })
    ));
    assert!(!sampler.is_running());
}

#[test]
fn test_measure_is_isolated_from_streaming() {
    let mut sampler = sampler_with(
        SyntheticSource::new(Waveform::Constant(0)),
        SamplerConfig::default(),
    );
    sampler.begin().unwrap();
    let reads = sampler.front_end().reads();
    let chunks = sampler.source().chunks_read();

    let err = sampler.measure(36, 100).unwrap_err();
    assert!(matches!(err, SamplerError::ConcurrentAccess));
    assert!(err.is_state_conflict());
    assert_eq!(sampler.front_end().reads(), reads);
    assert_eq!(sampler.source().chunks_read(), chunks);
    assert!(sampler.is_running());

    sampler.end();
    let mean = sampler.measure(36, 10).unwrap();
    assert_eq!(mean, 1792);
    // One priming read plus one per tick.
    assert_eq!(sampler.front_end().reads() - reads, 11);
    assert_eq!(sampler.front_end().ticks(), 10);
}

#[test]
fn test_route_calibration_reference() {
    let front_end = MockFrontEnd::new().with_reference_pins(&[25, 26, 27]);
    let mut sampler = Sampler::new(SyntheticSource::new(Waveform::Constant(0)), front_end);

    assert!(sampler.route_calibration_reference(25));
    assert_eq!(sampler.front_end().routed_pin(), Some(25));
    assert!(!sampler.route_calibration_reference(34));
    assert_eq!(sampler.front_end().routed_pin(), Some(25));
}
