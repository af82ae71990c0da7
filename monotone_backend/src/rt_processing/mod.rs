pub mod frequency;
pub mod performance;
pub mod recovery;
pub mod renderer;
pub mod streaming;
pub mod waveform;

pub use frequency::{FrequencyCell, FrequencyHandle, MAX_FREQUENCY_HZ, MIN_FREQUENCY_HZ, clamp_frequency};
pub use performance::{PerformanceMonitor, PerformanceSnapshot};
pub use recovery::{FatalDeviceError, RecoveredFault, Recovery, ResumePolicy};
pub use renderer::{ChannelArea, LayoutError, SampleRenderer, validate_areas};
pub use streaming::{PeriodOutcome, StreamingLoop, write_period};
pub use waveform::{Phase, Waveform};
