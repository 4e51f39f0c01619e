//! GPIO to ADC1 channel resolution.
//!
//! Only the eight pins of the ADC1 bank can be sampled while the radio is
//! active, so the table is fixed.

use std::fmt;

use crate::error::{Result, SamplerError};

/// ADC1 input channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AdcChannel(u8);

impl AdcChannel {
    /// Channel index within ADC1 (0-7).
    pub fn index(self) -> u8 {
        self.0
    }
}

impl fmt::Display for AdcChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ADC1_CH{}", self.0)
    }
}

/// Pin to channel table, ordered by GPIO number.
const PIN_TABLE: [(u8, u8); 8] = [
    (32, 4),
    (33, 5),
    (34, 6),
    (35, 7),
    (36, 0),
    (37, 1),
    (38, 2),
    (39, 3),
];

/// Resolve a GPIO number to its ADC1 channel.
pub fn resolve_channel(pin: u8) -> Result<AdcChannel> {
    PIN_TABLE
        .iter()
        .find(|(gpio, _)| *gpio == pin)
        .map(|&(_, channel)| AdcChannel(channel))
        .ok_or(SamplerError::InvalidPin { pin })
}

/// All GPIO numbers that resolve to an ADC1 channel.
pub fn adc_pins() -> impl Iterator<Item = u8> {
    PIN_TABLE.iter().map(|&(gpio, _)| gpio)
}
