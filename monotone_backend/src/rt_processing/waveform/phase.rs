use std::f64::consts::TAU;

/// Phase increment in radians per frame.
#[inline]
pub fn phase_increment(frequency_hz: u32, sample_rate: u32) -> f64 {
    TAU * f64::from(frequency_hz) / f64::from(sample_rate)
}

/// Wrap any angle into [0, 2π).
#[inline]
pub fn normalize_phase(radians: f64) -> f64 {
    let wrapped = radians.rem_euclid(TAU);
    // rem_euclid can round up to TAU for tiny negative inputs
    if wrapped >= TAU { 0.0 } else { wrapped }
}

/// Oscillator angle accumulator, always in [0, 2π).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Phase(f64);

impl Phase {
    pub const ZERO: Phase = Phase(0.0);

    pub fn new(radians: f64) -> Self {
        Self(normalize_phase(radians))
    }

    #[inline]
    pub fn radians(self) -> f64 {
        self.0
    }

    /// Step forward, wrapping once past 2π.
    #[inline]
    pub fn advance(&mut self, step: f64) {
        self.0 += step;
        if self.0 >= TAU {
            self.0 -= TAU;
            // only reachable when one step spans more than a full cycle
            if self.0 >= TAU {
                self.0 = normalize_phase(self.0);
            }
        }
    }
}
