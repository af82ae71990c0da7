//! Real-time single-voice synthesizer engine.
//!
//! [`SynthContext`] owns a playback device and streams one oscillator through
//! it, period by period, on a dedicated thread. Pitch changes travel through a
//! lock-free [`FrequencyHandle`].

pub mod audio_device;
pub mod context;
pub mod rt_processing;

pub use audio_device::{
    DeviceError, HwParams, NegotiatedParams, PcmDevice, PcmDriver, RawStreamDevice,
    RawStreamDriver, ResumeError, WriteError,
};
pub use context::{STREAM_THREAD_NAME, SynthContext, SynthError, SynthHandle};
pub use rt_processing::{
    ChannelArea, FatalDeviceError, FrequencyHandle, PerformanceSnapshot, Phase, Waveform,
};

#[cfg(feature = "cpal")]
pub use audio_device::{CpalDevice, CpalDriver};
