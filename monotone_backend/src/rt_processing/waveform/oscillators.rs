use std::f64::consts::FRAC_2_PI;
use std::fmt;
use std::str::FromStr;

/// Harmonics summed by the additive sawtooth.
pub const SAWTOOTH_HARMONICS: u32 = 39;

#[inline]
pub fn sine(phase: f64) -> f64 {
    phase.sin()
}

/// Either value is acceptable exactly at a zero crossing; we return -1.
#[inline]
pub fn square(phase: f64) -> f64 {
    if phase.sin() > 0.0 { 1.0 } else { -1.0 }
}

#[inline]
pub fn triangle(phase: f64) -> f64 {
    phase.sin().asin() * FRAC_2_PI
}

/// Truncated Fourier series of a (falling) sawtooth.
///
/// Not band-limited to the sample rate, and it overshoots ±1 by roughly 18%
/// next to the discontinuity (Gibbs). The overshoot is left in.
#[inline]
pub fn sawtooth(phase: f64) -> f64 {
    let mut sum = 0.0;
    for n in 1..=SAWTOOTH_HARMONICS {
        let n = f64::from(n);
        sum += (n * phase).sin() / n;
    }
    sum * FRAC_2_PI
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Waveform {
    #[default]
    Sine,
    Square,
    Triangle,
    Sawtooth,
}

impl Waveform {
    pub const ALL: [Waveform; 4] = [
        Waveform::Sine,
        Waveform::Square,
        Waveform::Triangle,
        Waveform::Sawtooth,
    ];

    /// Amplitude at `phase` radians.
    #[inline]
    pub fn evaluate(self, phase: f64) -> f64 {
        match self {
            Waveform::Sine => sine(phase),
            Waveform::Square => square(phase),
            Waveform::Triangle => triangle(phase),
            Waveform::Sawtooth => sawtooth(phase),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Waveform::Sine => "sine",
            Waveform::Square => "square",
            Waveform::Triangle => "triangle",
            Waveform::Sawtooth => "sawtooth",
        }
    }
}

impl fmt::Display for Waveform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown waveform {0:?} (expected sine, square, triangle or sawtooth)")]
pub struct ParseWaveformError(String);

impl FromStr for Waveform {
    type Err = ParseWaveformError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sine" | "sin" => Ok(Waveform::Sine),
            "square" | "sqr" => Ok(Waveform::Square),
            "triangle" | "tri" => Ok(Waveform::Triangle),
            "sawtooth" | "saw" => Ok(Waveform::Sawtooth),
            _ => Err(ParseWaveformError(s.to_string())),
        }
    }
}
