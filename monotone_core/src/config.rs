//! Stream configuration.
//!
//! One explicit value carrying everything the stream needs to know before
//! the device is opened: rate, sample format, buffer/period times and the
//! recovery and diagnostics knobs.

use crate::format::SampleFormat;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthConfig {
    /// Stream rate in Hz.
    pub sample_rate: u32,
    pub format: SampleFormat,
    /// Ring buffer length in microseconds.
    pub buffer_time_us: u32,
    /// Period length in microseconds.
    pub period_time_us: u32,
    /// Let the driver resample when the exact rate is unavailable.
    pub resample: bool,
    /// Wake the device once per period instead of on `avail_min`.
    pub period_event: bool,
    /// Wait between `resume` attempts on a suspended device.
    pub resume_poll_interval_ms: u64,
    pub resume_max_attempts: u32,
    /// How often the streaming loop logs its statistics. Zero disables it.
    pub stats_interval_ms: u64,
}

impl SynthConfig {
    pub fn new() -> Self {
        Self {
            sample_rate: 44100,
            format: SampleFormat::S16,
            buffer_time_us: 500_000,
            period_time_us: 100_000,
            resample: true,
            period_event: false,
            resume_poll_interval_ms: 1000,
            resume_max_attempts: 30,
            stats_interval_ms: 1000,
        }
    }

    pub fn with_sample_rate(mut self, rate: u32) -> Self {
        self.sample_rate = rate;
        self
    }

    pub fn with_format(mut self, format: SampleFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_buffer_time_us(mut self, micros: u32) -> Self {
        self.buffer_time_us = micros;
        self
    }

    pub fn with_period_time_us(mut self, micros: u32) -> Self {
        self.period_time_us = micros;
        self
    }

    pub fn with_resample(mut self, resample: bool) -> Self {
        self.resample = resample;
        self
    }

    pub fn with_period_event(mut self, enabled: bool) -> Self {
        self.period_event = enabled;
        self
    }

    pub fn with_resume_policy(mut self, poll_interval: Duration, max_attempts: u32) -> Self {
        self.resume_poll_interval_ms = poll_interval.as_millis() as u64;
        self.resume_max_attempts = max_attempts;
        self
    }

    pub fn with_stats_interval(mut self, interval: Duration) -> Self {
        self.stats_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Short buffers for interactive playing: ~5 ms periods.
    pub fn low_latency() -> Self {
        Self::new()
            .with_sample_rate(48000)
            .with_buffer_time_us(20_000)
            .with_period_time_us(5_000)
    }

    pub fn balanced() -> Self {
        Self::new()
            .with_sample_rate(48000)
            .with_buffer_time_us(100_000)
            .with_period_time_us(25_000)
    }

    pub fn high_quality() -> Self {
        Self::new()
            .with_sample_rate(96000)
            .with_format(SampleFormat::S32_LE)
    }

    pub fn resume_poll_interval(&self) -> Duration {
        Duration::from_millis(self.resume_poll_interval_ms)
    }

    pub fn stats_interval(&self) -> Option<Duration> {
        match self.stats_interval_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.sample_rate == 0 {
            return Err(ConfigError::Invalid("sample rate must be non-zero".into()));
        }
        if self.buffer_time_us == 0 || self.period_time_us == 0 {
            return Err(ConfigError::Invalid(
                "buffer and period times must be non-zero".into(),
            ));
        }
        if self.period_time_us > self.buffer_time_us {
            return Err(ConfigError::Invalid(format!(
                "period time {}us exceeds buffer time {}us",
                self.period_time_us, self.buffer_time_us
            )));
        }
        if self.resume_poll_interval_ms == 0 || self.resume_max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "resume polling needs a non-zero interval and attempt count".into(),
            ));
        }
        Ok(())
    }

    /// Parse a JSON document. Missing fields keep their defaults.
    pub fn from_json(json: &str) -> ConfigResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }
}

impl Default for SynthConfig {
    fn default() -> Self {
        Self::new()
    }
}
