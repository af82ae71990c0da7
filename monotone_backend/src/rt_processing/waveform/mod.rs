pub mod oscillators;
pub mod phase;

pub use oscillators::{ParseWaveformError, SAWTOOTH_HARMONICS, Waveform};
pub use phase::{Phase, normalize_phase, phase_increment};
