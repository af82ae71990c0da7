//! Shared value types for the monotone synthesizer: sample formats and the
//! stream configuration.

pub mod config;
pub mod format;

pub use config::{ConfigError, ConfigResult, SynthConfig};
pub use format::{Encoding, Endianness, FormatError, SampleFormat};
