//! Pacing clock calculations
//!
//! Paced transfers advance once per data request, and the data request
//! rate is set by a clock manager channel: a source oscillator divided by
//! an integer divisor. DMA wait cycles divide the rate further.

use core::time::Duration;

use crate::{control_block::MAX_WAIT_CYCLES, Error, Result};

/// Largest integer divisor of a clock manager channel
pub const MAX_DIVISOR: u32 = 4095;

const NANOS_PER_SECOND: u64 = 1_000_000_000;

/// A clock manager source with a fixed frequency
///
/// PLLC is left out since its rate follows the core clock, and the HDMI
/// auxiliary clock stops when HDMI is disabled.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ClockSource {
    /// The 19.2MHz crystal oscillator
    Oscillator,
    /// PLLD, 500MHz
    PllD,
}

impl ClockSource {
    /// Sources in order of preference
    pub const ALL: [ClockSource; 2] = [ClockSource::Oscillator, ClockSource::PllD];

    /// Returns the source frequency in Hz
    pub const fn hz(self) -> u64 {
        match self {
            ClockSource::Oscillator => 19_200_000,
            ClockSource::PllD => 500_000_000,
        }
    }

    /// Returns the clock manager SRC field value
    pub const fn raw(self) -> u32 {
        match self {
            ClockSource::Oscillator => 1,
            ClockSource::PllD => 6,
        }
    }
}

/// A realizable pacing rate
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClockConfig {
    /// Source oscillator
    pub source: ClockSource,
    /// Integer divisor, `1..=MAX_DIVISOR`
    pub divisor: u32,
    /// DMA wait cycles; each one divides the rate again
    pub wait_cycles: u8,
    /// Resulting frequency, rounded down
    pub actual_hz: u64,
}

impl ClockConfig {
    /// Total division between the source and the pacing rate
    pub const fn total_division(&self) -> u64 {
        self.divisor as u64 * (self.wait_cycles as u64 + 1)
    }

    /// Returns `true` if the rate is exactly `actual_hz`
    pub const fn is_exact(&self) -> bool {
        self.source.hz() % self.total_division() == 0
    }

    /// Orders by frequency, then fewer wait cycles. Earlier sources win ties
    /// because the caller only replaces on strict improvement.
    fn is_better_than(&self, other: &ClockConfig) -> bool {
        // Compare source / total without rounding.
        let ours = u128::from(self.source.hz()) * u128::from(other.total_division());
        let theirs = u128::from(other.source.hz()) * u128::from(self.total_division());
        ours > theirs || (ours == theirs && self.wait_cycles < other.wait_cycles)
    }
}

/// Finds the clock configuration closest to `desired_hz` without exceeding it
///
/// `max_wait_cycles` bounds how many DMA wait cycles may help divide the
/// source; pass 0 to rely on the divisor alone.
pub fn compute(desired_hz: u64, max_wait_cycles: u8) -> Result<ClockConfig> {
    if desired_hz == 0 || max_wait_cycles > MAX_WAIT_CYCLES {
        return Err(Error::NoSuitableClockSource {
            requested_hz: desired_hz,
        });
    }
    let mut best: Option<ClockConfig> = None;
    for source in ClockSource::ALL {
        let Some(candidate) = closest(source, desired_hz, max_wait_cycles) else {
            continue;
        };
        best = match best {
            Some(current) if !candidate.is_better_than(&current) => Some(current),
            _ => Some(candidate),
        };
    }
    let config = best.ok_or(Error::NoSuitableClockSource {
        requested_hz: desired_hz,
    })?;
    log::debug!(
        "clock for {desired_hz} Hz: {:?} / {} / {} waits = {} Hz",
        config.source,
        config.divisor,
        config.wait_cycles,
        config.actual_hz
    );
    Ok(config)
}

/// Like [`compute`], but fails unless the rate is exact
pub fn compute_exact(desired_hz: u64, max_wait_cycles: u8) -> Result<ClockConfig> {
    let config = compute(desired_hz, max_wait_cycles)?;
    if config.actual_hz != desired_hz {
        return Err(Error::OversamplingUnsupported {
            requested_hz: desired_hz,
            actual_hz: config.actual_hz,
        });
    }
    Ok(config)
}

/// Best configuration for one source, or `None` if the source can't be
/// divided down to `desired_hz`
fn closest(source: ClockSource, desired_hz: u64, max_wait_cycles: u8) -> Option<ClockConfig> {
    let src = source.hz();
    // Smallest total division that doesn't exceed the request.
    let min_total = src.div_ceil(desired_hz).max(1);
    let mut best: Option<(u64, u32, u8)> = None;
    for wait_cycles in 0..=max_wait_cycles {
        let multiplier = u64::from(wait_cycles) + 1;
        let divisor = min_total.div_ceil(multiplier).max(1);
        if divisor > u64::from(MAX_DIVISOR) {
            continue;
        }
        let total = divisor * multiplier;
        if best.map_or(true, |(current, _, _)| total < current) {
            best = Some((total, divisor as u32, wait_cycles));
        }
    }
    best.map(|(total, divisor, wait_cycles)| ClockConfig {
        source,
        divisor,
        wait_cycles,
        actual_hz: src / total,
    })
}

/// Converts a per-tick duration into a frequency in Hz
///
/// The duration must divide one second evenly. Otherwise the rate isn't a
/// whole number of Hz, and this returns [`Error::OversamplingUnsupported`]
/// with the rate rounded up as requested, and rounded down as achievable.
/// Ticks longer than a second are slower than any clock source.
pub fn frequency(resolution: Duration) -> Result<u64> {
    let nanos = resolution.as_nanos();
    if nanos == 0 {
        return Err(Error::InvalidConfiguration("resolution must be at least 1ns"));
    }
    if nanos > u128::from(NANOS_PER_SECOND) {
        return Err(Error::NoSuitableClockSource { requested_hz: 0 });
    }
    let nanos = nanos as u64;
    if NANOS_PER_SECOND % nanos != 0 {
        return Err(Error::OversamplingUnsupported {
            requested_hz: NANOS_PER_SECOND.div_ceil(nanos),
            actual_hz: NANOS_PER_SECOND / nanos,
        });
    }
    Ok(NANOS_PER_SECOND / nanos)
}

/// The clock peripheral that generates data requests
///
/// Clock manager and PWM register layouts are outside this driver.
/// Implementations program them from a [`ClockConfig`].
pub trait Pacer {
    /// Stops data requests
    ///
    /// Called before a paced transfer is started, so that the channel
    /// doesn't run ahead while it's being configured.
    fn stop(&mut self);
    /// Starts issuing data requests at `clock`
    fn start(&mut self, clock: &ClockConfig);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_oscillator_division() {
        let config = compute(1_200_000, 0).unwrap();
        assert_eq!(config.source, ClockSource::Oscillator);
        assert_eq!(config.divisor, 16);
        assert_eq!(config.wait_cycles, 0);
        assert_eq!(config.actual_hz, 1_200_000);
        assert!(config.is_exact());
    }

    #[test]
    fn falls_back_to_plld() {
        // 19.2MHz isn't a multiple of 1MHz, 500MHz is.
        let config = compute(1_000_000, 0).unwrap();
        assert_eq!(config.source, ClockSource::PllD);
        assert_eq!(config.divisor, 500);
        assert_eq!(config.actual_hz, 1_000_000);
    }

    #[test]
    fn never_exceeds_request() {
        for hz in [7_777, 123_457, 800_001, 2_500_000, 33_333_333] {
            let config = compute(hz, 31).unwrap();
            assert!(config.actual_hz <= hz, "{hz}: {config:?}");
            assert!(config.divisor >= 1 && config.divisor <= MAX_DIVISOR);
        }
    }

    #[test]
    fn wait_cycles_reach_slow_rates() {
        // 19.2MHz / 4095 is about 4.7kHz; slower needs wait cycles.
        assert!(compute(1_000, 0).is_err());
        let config = compute(1_000, 31).unwrap();
        assert_eq!(config.actual_hz, 1_000);
        assert!(config.wait_cycles > 0);
        assert!(config.is_exact());
    }

    #[test]
    fn prefers_fewer_wait_cycles() {
        let config = compute(100_000, 31).unwrap();
        assert_eq!(config.wait_cycles, 0);
        assert_eq!(config.source, ClockSource::Oscillator);
        assert_eq!(config.divisor, 192);
    }

    #[test]
    fn too_slow_for_any_source() {
        assert_eq!(
            compute(1, 31),
            Err(Error::NoSuitableClockSource { requested_hz: 1 })
        );
        assert!(compute(0, 0).is_err());
    }

    #[test]
    fn faster_than_every_source() {
        let config = compute(1_000_000_000, 0).unwrap();
        assert_eq!(config.source, ClockSource::PllD);
        assert_eq!(config.divisor, 1);
        assert_eq!(config.actual_hz, 500_000_000);
        assert_eq!(
            compute_exact(1_000_000_000, 0),
            Err(Error::OversamplingUnsupported {
                requested_hz: 1_000_000_000,
                actual_hz: 500_000_000
            })
        );
    }

    #[test]
    fn inexact_rate_is_reported() {
        let hz = 3_000_001;
        let config = compute(hz, 0).unwrap();
        assert!(config.actual_hz < hz);
        assert!(matches!(
            compute_exact(hz, 0),
            Err(Error::OversamplingUnsupported { .. })
        ));
    }

    #[test]
    fn resolution_to_frequency() {
        assert_eq!(frequency(Duration::from_micros(1)).unwrap(), 1_000_000);
        assert_eq!(frequency(Duration::from_nanos(400)).unwrap(), 2_500_000);
        assert_eq!(frequency(Duration::from_secs(1)).unwrap(), 1);
        assert_eq!(
            frequency(Duration::from_nanos(3)),
            Err(Error::OversamplingUnsupported {
                requested_hz: 333_333_334,
                actual_hz: 333_333_333
            })
        );
        assert_eq!(
            frequency(Duration::from_secs(2)),
            Err(Error::NoSuitableClockSource { requested_hz: 0 })
        );
        assert!(matches!(
            frequency(Duration::ZERO),
            Err(Error::InvalidConfiguration(_))
        ));
    }
}
