//! Blocking PCM device abstraction.
//!
//! The streaming loop talks to hardware through [`PcmDevice`]: a handle that
//! accepts interleaved, device-native bytes one period at a time and reports
//! transfer faults the way a kernel PCM interface does (`TryAgain`,
//! `Underrun`, `Suspended`). Dropping the device closes it.

pub mod negotiation;
pub mod raw_stream;

#[cfg(feature = "cpal")]
pub mod cpal_output;

use monotone_core::{SampleFormat, SynthConfig};

pub use negotiation::{ConfigNegotiator, DeviceCapabilities, NegotiationError};
pub use raw_stream::{RawStreamDevice, RawStreamDriver};

#[cfg(feature = "cpal")]
pub use cpal_output::{CpalDevice, CpalDriver};

/// Hardware parameters requested from a device.
#[derive(Debug, Clone, PartialEq)]
pub struct HwParams {
    pub sample_rate: u32,
    pub channels: u16,
    pub format: SampleFormat,
    pub buffer_time_us: u32,
    pub period_time_us: u32,
    pub resample: bool,
    pub period_event: bool,
}

impl HwParams {
    pub fn from_config(config: &SynthConfig, channels: u16) -> Self {
        Self {
            sample_rate: config.sample_rate,
            channels,
            format: config.format,
            buffer_time_us: config.buffer_time_us,
            period_time_us: config.period_time_us,
            resample: config.resample,
            period_event: config.period_event,
        }
    }

    /// Bytes occupied by one interleaved frame.
    pub fn frame_bytes(&self) -> usize {
        usize::from(self.channels) * self.format.physical_bytes_per_sample()
    }
}

/// What the device actually agreed to, sizes in frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NegotiatedParams {
    pub sample_rate: u32,
    pub buffer_size: usize,
    pub period_size: usize,
    /// Frames queued before playback starts.
    pub start_threshold: usize,
    /// Free frames required before a write is accepted.
    pub avail_min: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("failed to open device {name:?}: {reason}")]
    Open { name: String, reason: String },
    #[error(transparent)]
    Negotiation(#[from] NegotiationError),
    #[error("device is not configured")]
    NotConfigured,
    #[error("prepare failed: {0}")]
    Prepare(String),
    #[error("device I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Outcome of a failed [`PcmDevice::write`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WriteError {
    #[error("device not ready, try again")]
    TryAgain,
    #[error("buffer underrun")]
    Underrun,
    #[error("device suspended")]
    Suspended,
    #[error("write failed: {0}")]
    Fatal(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResumeError {
    #[error("resume pending, try again")]
    TryAgain,
    #[error("resume failed: {0}")]
    Failed(String),
}

/// An open playback device.
pub trait PcmDevice: Send {
    /// Configure the device. Must be called once before any `write`.
    fn negotiate(&mut self, params: &HwParams) -> Result<NegotiatedParams, DeviceError>;

    /// Queue up to `frames` interleaved frames from `buf`.
    ///
    /// Returns how many frames were accepted, which may be fewer than asked.
    fn write(&mut self, buf: &[u8], frames: usize) -> Result<usize, WriteError>;

    /// Reset the device to the ready state after an underrun.
    fn prepare(&mut self) -> Result<(), DeviceError>;

    /// Wake a suspended device.
    fn resume(&mut self) -> Result<(), ResumeError>;
}

impl<D: PcmDevice + ?Sized> PcmDevice for Box<D> {
    fn negotiate(&mut self, params: &HwParams) -> Result<NegotiatedParams, DeviceError> {
        (**self).negotiate(params)
    }

    fn write(&mut self, buf: &[u8], frames: usize) -> Result<usize, WriteError> {
        (**self).write(buf, frames)
    }

    fn prepare(&mut self) -> Result<(), DeviceError> {
        (**self).prepare()
    }

    fn resume(&mut self) -> Result<(), ResumeError> {
        (**self).resume()
    }
}

/// Opens devices by name.
pub trait PcmDriver {
    type Device: PcmDevice + 'static;

    fn open(&self, name: &str) -> Result<Self::Device, DeviceError>;
}
