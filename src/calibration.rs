//! ADC attenuation ranges and raw-code calibration.
//!
//! The SAR ADC resolves 12 bits over a full-scale voltage that depends on the
//! input attenuation. Calibration is an affine transform in Q16 fixed point:
//!
//! ```text
//! millivolts = ((coeff_a * code + 2^15) >> 16) + coeff_b
//! ```
//!
//! Coefficients come from the factory calibration burned into eFuse when it is
//! present (two-point readings, or a measured reference voltage), otherwise from
//! the nominal 1100 mV reference.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Mask for the 12 significant bits of a raw ADC cell.
pub const RAW_CODE_MASK: u16 = 0x0FFF;

/// Largest valid raw code.
pub const MAX_RAW_CODE: u16 = 4095;

/// Nominal reference voltage used when eFuse carries no calibration.
pub const DEFAULT_VREF_MV: u32 = 1100;

const COEFF_A_SCALE_BITS: u32 = 16;
const COEFF_A_ROUND: i64 = 1 << (COEFF_A_SCALE_BITS - 1);
const ADC_12_BIT_RES: u32 = 4096;

// Two-point calibration voltages (mV) at which the factory readings were taken.
const TP_LOW_MV: u32 = 150;
const TP_HIGH_MV: u32 = 850;

const TP_ATTEN_SCALE: [u32; 4] = [65504, 86975, 120389, 224310];
const TP_ATTEN_OFFSET: [i32; 4] = [0, 1, 27, 54];
const VREF_ATTEN_SCALE: [u32; 4] = [57431, 76236, 105481, 196602];
const VREF_ATTEN_OFFSET: [i32; 4] = [75, 78, 107, 142];

/// Input attenuation, which determines the full-scale voltage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttenuationRange {
    /// 0 dB, about 1.1 V full scale
    Db0,
    /// 2.5 dB, about 1.5 V full scale
    Db2_5,
    /// 6 dB, about 2.2 V full scale
    Db6,
    /// 11 dB, about 3.9 V full scale
    Db11,
}

impl AttenuationRange {
    /// All ranges in ascending full-scale order.
    pub const ALL: [AttenuationRange; 4] = [Self::Db0, Self::Db2_5, Self::Db6, Self::Db11];

    /// Select the smallest range able to represent `ceiling` volts.
    ///
    /// Band edges are inclusive; anything above 2.2 V (including the 3.3 V
    /// default and values beyond 3.9 V) selects [`AttenuationRange::Db11`].
    pub fn for_ceiling(ceiling: f32) -> Self {
        if ceiling <= 1.1 {
            Self::Db0
        } else if ceiling <= 1.5 {
            Self::Db2_5
        } else if ceiling <= 2.2 {
            Self::Db6
        } else {
            Self::Db11
        }
    }

    /// Attenuation in decibels.
    pub fn attenuation_db(self) -> f32 {
        match self {
            Self::Db0 => 0.0,
            Self::Db2_5 => 2.5,
            Self::Db6 => 6.0,
            Self::Db11 => 11.0,
        }
    }

    /// Nominal full-scale input in volts.
    pub fn full_scale_volts(self) -> f32 {
        match self {
            Self::Db0 => 1.1,
            Self::Db2_5 => 1.5,
            Self::Db6 => 2.2,
            Self::Db11 => 3.9,
        }
    }

    fn table_index(self) -> usize {
        match self {
            Self::Db0 => 0,
            Self::Db2_5 => 1,
            Self::Db6 => 2,
            Self::Db11 => 3,
        }
    }
}

impl fmt::Display for AttenuationRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} dB ({:.1} V full scale)",
            self.attenuation_db(),
            self.full_scale_volts()
        )
    }
}

/// Factory calibration data read from the ADC unit's eFuse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FactoryCalibration {
    /// Raw readings of the 150 mV and 850 mV calibration points
    TwoPoint {
        /// Reading at 150 mV
        low: u32,
        /// Reading at 850 mV
        high: u32,
    },
    /// Measured reference voltage in millivolts
    Vref(u32),
    /// eFuse carries no calibration
    #[default]
    Unavailable,
}

/// Which calibration data produced a [`CalibrationMapping`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationSource {
    /// eFuse two-point readings
    TwoPoint,
    /// eFuse reference voltage
    EfuseVref,
    /// Nominal reference voltage (no factory data)
    DefaultVref,
    /// Coefficients supplied directly
    Custom,
}

/// Affine raw-code to millivolt transform for one attenuation range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalibrationMapping {
    range: AttenuationRange,
    coeff_a: u32,
    coeff_b: i32,
    vref: u32,
    source: CalibrationSource,
}

impl CalibrationMapping {
    /// Derive coefficients for `range` from the available factory data.
    ///
    /// Never fails: unusable or missing eFuse data degrades to the nominal
    /// reference voltage.
    pub fn characterize(range: AttenuationRange, factory: FactoryCalibration) -> Self {
        let idx = range.table_index();
        let mapping = match factory {
            FactoryCalibration::TwoPoint { low, high } if high > low => {
                let delta_x = high - low;
                let delta_v = TP_HIGH_MV - TP_LOW_MV;
                let coeff_a = (u64::from(delta_v) * u64::from(TP_ATTEN_SCALE[idx])
                    + u64::from(delta_x / 2))
                    / u64::from(delta_x);
                let high_term = (u64::from(delta_v) * u64::from(high) + u64::from(delta_x / 2))
                    / u64::from(delta_x);
                let coeff_b = TP_HIGH_MV as i64 - high_term as i64 + TP_ATTEN_OFFSET[idx] as i64;
                Self {
                    range,
                    coeff_a: coeff_a as u32,
                    coeff_b: coeff_b as i32,
                    vref: DEFAULT_VREF_MV,
                    source: CalibrationSource::TwoPoint,
                }
            }
            FactoryCalibration::Vref(vref) if vref > 0 => {
                Self::from_vref(range, vref, CalibrationSource::EfuseVref)
            }
            FactoryCalibration::TwoPoint { low, high } => {
                warn!(low, high, "Ignoring inconsistent two-point eFuse calibration");
                Self::from_vref(range, DEFAULT_VREF_MV, CalibrationSource::DefaultVref)
            }
            FactoryCalibration::Vref(_) | FactoryCalibration::Unavailable => {
                Self::from_vref(range, DEFAULT_VREF_MV, CalibrationSource::DefaultVref)
            }
        };

        debug!(
            range = %range,
            vref = mapping.vref,
            coeff_a = mapping.coeff_a,
            coeff_b = mapping.coeff_b,
            source = ?mapping.source,
            "Characterized ADC calibration"
        );

        mapping
    }

    /// Build a mapping from explicit coefficients.
    ///
    /// `coeff_a` is the slope in millivolts per code scaled by 65536.
    pub fn from_coefficients(
        range: AttenuationRange,
        coeff_a: u32,
        coeff_b: i32,
        vref: u32,
    ) -> Self {
        Self {
            range,
            coeff_a,
            coeff_b,
            vref,
            source: CalibrationSource::Custom,
        }
    }

    fn from_vref(range: AttenuationRange, vref: u32, source: CalibrationSource) -> Self {
        let idx = range.table_index();
        let coeff_a =
            u64::from(vref) * u64::from(VREF_ATTEN_SCALE[idx]) / u64::from(ADC_12_BIT_RES);
        Self {
            range,
            coeff_a: coeff_a as u32,
            coeff_b: VREF_ATTEN_OFFSET[idx],
            vref,
            source,
        }
    }

    /// Convert one raw ADC cell to millivolts.
    ///
    /// Bits above the 12-bit code (channel id / flags) are ignored.
    #[inline]
    pub fn raw_to_millivolts(&self, raw: u16) -> i32 {
        let code = i64::from(raw & RAW_CODE_MASK);
        let scaled = (i64::from(self.coeff_a) * code + COEFF_A_ROUND) >> COEFF_A_SCALE_BITS;
        (scaled + i64::from(self.coeff_b)) as i32
    }

    /// Attenuation range these coefficients belong to.
    pub fn range(&self) -> AttenuationRange {
        self.range
    }

    /// Slope coefficient (Q16).
    pub fn coeff_a(&self) -> u32 {
        self.coeff_a
    }

    /// Offset coefficient in millivolts.
    pub fn coeff_b(&self) -> i32 {
        self.coeff_b
    }

    /// Reference voltage in millivolts.
    pub fn vref(&self) -> u32 {
        self.vref
    }

    /// Calibration data the coefficients were derived from.
    pub fn source(&self) -> CalibrationSource {
        self.source
    }
}

/// Log which factory calibration the ADC unit provides.
pub(crate) fn log_factory_calibration(factory: FactoryCalibration) {
    match factory {
        FactoryCalibration::TwoPoint { .. } => info!("eFuse two-point calibration: supported"),
        FactoryCalibration::Vref(vref) => info!(vref, "eFuse Vref calibration: supported"),
        FactoryCalibration::Unavailable => {
            info!("eFuse calibration not supported, using default coefficients")
        }
    }
}
