//! Bit-rate math for the two-wire peripheral.
//!
//! The bus clock is derived from the peripheral clock as
//! `scl = clock / (16 + 2 * divider * prescale)`, with an 8-bit divider.

use fugit::HertzU32;

use crate::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Prescaler {
    #[default]
    Div1 = 0,
    Div4 = 1,
    Div16 = 2,
    Div64 = 3,
}

impl Prescaler {
    pub const ALL: [Prescaler; 4] = [
        Prescaler::Div1,
        Prescaler::Div4,
        Prescaler::Div16,
        Prescaler::Div64,
    ];

    pub const fn factor(self) -> u32 {
        match self {
            Prescaler::Div1 => 1,
            Prescaler::Div4 => 4,
            Prescaler::Div16 => 16,
            Prescaler::Div64 => 64,
        }
    }

    /// Value of the prescaler select bits.
    pub const fn bits(self) -> u8 {
        self as u8
    }
}

/// Divider giving the highest bus rate not above `frequency`.
pub fn divider(
    clock: HertzU32,
    frequency: HertzU32,
    prescaler: Prescaler,
) -> Result<u8, ConfigError> {
    if frequency.raw() == 0 {
        return Err(ConfigError::InvalidFrequency);
    }

    let cycles = clock.raw().div_ceil(frequency.raw());
    if cycles < 16 {
        return Err(ConfigError::FrequencyTooHigh);
    }

    // Round up so the resulting rate never exceeds the request.
    let divider = (cycles - 16).div_ceil(2 * prescaler.factor());
    u8::try_from(divider).map_err(|_| ConfigError::FrequencyTooLow)
}

/// Bus rate produced by `divider` and `prescaler`.
pub fn frequency(clock: HertzU32, divider: u8, prescaler: Prescaler) -> HertzU32 {
    let cycles = 16 + 2 * u32::from(divider) * prescaler.factor();
    HertzU32::from_raw(clock.raw() / cycles)
}

/// Picks the smallest prescaler able to reach `frequency`.
pub fn solve(clock: HertzU32, frequency: HertzU32) -> Result<(Prescaler, u8), ConfigError> {
    let mut last = ConfigError::FrequencyTooLow;
    for prescaler in Prescaler::ALL {
        match divider(clock, frequency, prescaler) {
            Ok(divider) => return Ok((prescaler, divider)),
            Err(ConfigError::FrequencyTooLow) => continue,
            Err(err) => last = err,
        }
    }
    Err(last)
}
