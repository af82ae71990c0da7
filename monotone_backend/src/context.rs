//! Synth context: the device, its negotiated layout, and the streaming loop.
//!
//! Created once per stream. All buffers and channel areas are allocated in
//! [`SynthContext::create`]; the streaming loop only reuses them.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use monotone_core::{ConfigError, SampleFormat, SynthConfig};
use tracing::{debug, error, info};

use crate::audio_device::{ConfigNegotiator, DeviceError, HwParams, NegotiatedParams, PcmDevice, PcmDriver};
use crate::rt_processing::{
    ChannelArea, FatalDeviceError, FrequencyHandle, LayoutError, PerformanceMonitor,
    PerformanceSnapshot, Recovery, ResumePolicy, SampleRenderer, StreamingLoop, Waveform,
    validate_areas,
};

pub const STREAM_THREAD_NAME: &str = "monotone-stream";

#[derive(Debug, thiserror::Error)]
pub enum SynthError {
    #[error("device configuration failed: {0}")]
    Device(#[from] DeviceError),
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("invalid channel layout: {0}")]
    Layout(#[from] LayoutError),
    #[error("volume must be within [0, 1], got {0}")]
    Volume(f64),
    #[error("channel count must be at least 1")]
    NoChannels,
    #[error(transparent)]
    Fatal(#[from] FatalDeviceError),
    #[error("failed to spawn streaming thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("streaming thread panicked")]
    Panicked,
}

impl SynthError {
    /// Whether the stream died while running, as opposed to never starting.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SynthError::Fatal(_) | SynthError::Panicked)
    }
}

pub struct SynthContext<D: PcmDevice> {
    stream: StreamingLoop<D>,
    channels: u16,
    format: SampleFormat,
    negotiated: NegotiatedParams,
    frequency: FrequencyHandle,
    monitor: Arc<PerformanceMonitor>,
    stop: Arc<AtomicBool>,
}

impl<D: PcmDevice + 'static> SynthContext<D> {
    /// Open `device_name`, negotiate the stream and allocate the period buffer.
    pub fn create<Drv>(
        driver: &Drv,
        device_name: &str,
        channels: u16,
        volume: f64,
        initial_frequency_hz: i32,
        waveform: Waveform,
        config: &SynthConfig,
    ) -> Result<Self, SynthError>
    where
        Drv: PcmDriver<Device = D>,
    {
        if channels == 0 {
            return Err(SynthError::NoChannels);
        }
        config.validate()?;
        let device = driver.open(device_name)?;
        debug!("Opened playback device {:?}", device_name);
        Self::from_device(device, channels, volume, initial_frequency_hz, waveform, config)
    }

    /// Same as [`Self::create`] for a device that is already open, with an
    /// interleaved layout.
    pub fn from_device(
        device: D,
        channels: u16,
        volume: f64,
        initial_frequency_hz: i32,
        waveform: Waveform,
        config: &SynthConfig,
    ) -> Result<Self, SynthError> {
        if channels == 0 {
            return Err(SynthError::NoChannels);
        }
        let areas = ChannelArea::interleaved_set(channels, &config.format);
        Self::from_device_with_areas(device, areas, volume, initial_frequency_hz, waveform, config)
    }

    /// Build a context with explicit channel areas, one per channel.
    ///
    /// The period buffer is sized as `period_size * channels * width`; areas
    /// that don't fit it, or that aren't byte aligned, are rejected.
    pub fn from_device_with_areas(
        mut device: D,
        areas: Vec<ChannelArea>,
        volume: f64,
        initial_frequency_hz: i32,
        waveform: Waveform,
        config: &SynthConfig,
    ) -> Result<Self, SynthError> {
        if !(0.0..=1.0).contains(&volume) {
            return Err(SynthError::Volume(volume));
        }
        let channels = u16::try_from(areas.len()).map_err(|_| LayoutError::TooManyChannels {
            count: areas.len(),
        })?;
        if channels == 0 {
            return Err(SynthError::NoChannels);
        }
        config.validate()?;

        let params = HwParams::from_config(config, channels);
        let negotiated = device.negotiate(&params)?;
        let frame_bytes = params.frame_bytes();
        let buffer = vec![0u8; negotiated.period_size * frame_bytes];
        validate_areas(&areas, &config.format, negotiated.period_size, buffer.len())?;

        let frequency = FrequencyHandle::new(initial_frequency_hz);
        let monitor = Arc::new(PerformanceMonitor::new(
            negotiated.period_size,
            negotiated.sample_rate,
            PerformanceMonitor::DEFAULT_EMA_ALPHA,
        ));
        let renderer = SampleRenderer::new(waveform, volume, config.format, negotiated.sample_rate, areas);
        let stream = StreamingLoop::new(
            device,
            renderer,
            buffer,
            negotiated.period_size,
            frame_bytes,
            frequency.cell(),
            Recovery::new(ResumePolicy::from_config(config)),
            Arc::clone(&monitor),
            config.stats_interval(),
        );

        info!(
            "Synth ready: {} {}ch {} @ {}Hz, buffer {} frames ({:.1} ms) / period {} frames ({:.1} ms)",
            waveform,
            channels,
            config.format,
            negotiated.sample_rate,
            negotiated.buffer_size,
            ConfigNegotiator::calculate_latency_ms(negotiated.sample_rate, negotiated.buffer_size),
            negotiated.period_size,
            ConfigNegotiator::calculate_latency_ms(negotiated.sample_rate, negotiated.period_size),
        );

        Ok(Self {
            stream,
            channels,
            format: config.format,
            negotiated,
            frequency,
            monitor,
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Change the pitch; takes effect at the next period. Returns the clamped
    /// value stored.
    pub fn set_frequency(&self, hz: i32) -> u32 {
        self.frequency.set_frequency(hz)
    }

    pub fn frequency(&self) -> u32 {
        self.frequency.frequency()
    }

    pub fn frequency_handle(&self) -> FrequencyHandle {
        self.frequency.clone()
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.negotiated.sample_rate
    }

    pub fn format(&self) -> SampleFormat {
        self.format
    }

    pub fn negotiated(&self) -> NegotiatedParams {
        self.negotiated
    }

    pub fn buffer_size(&self) -> usize {
        self.negotiated.buffer_size
    }

    pub fn period_size(&self) -> usize {
        self.negotiated.period_size
    }

    pub fn volume(&self) -> f64 {
        self.stream.renderer().volume()
    }

    pub fn waveform(&self) -> Waveform {
        self.stream.renderer().waveform()
    }

    pub fn areas(&self) -> &[ChannelArea] {
        self.stream.renderer().areas()
    }

    pub fn device(&self) -> &D {
        self.stream.device()
    }

    pub fn stats(&self) -> PerformanceSnapshot {
        self.monitor.snapshot(false)
    }

    /// Render the next period into the context's buffer without writing it.
    pub fn render_period(&mut self) -> &[u8] {
        self.stream.render_next()
    }

    /// Ask a running [`Self::start`] to return after the current period.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// Run the streaming loop on this thread until stopped or a fatal error.
    ///
    /// Clears any earlier stop request, so a context returned by
    /// [`SynthHandle::join`] streams again.
    pub fn start(&mut self) -> Result<(), SynthError> {
        self.stop.store(false, Ordering::Release);
        self.stream_until_stopped()
    }

    fn stream_until_stopped(&mut self) -> Result<(), SynthError> {
        self.stream.run(&self.stop).map_err(|e| {
            error!("Stream terminated: {}", e);
            SynthError::Fatal(e)
        })
    }

    /// Run [`Self::start`] on a dedicated thread.
    pub fn spawn(mut self) -> Result<SynthHandle<D>, SynthError> {
        self.stop.store(false, Ordering::Release);
        let frequency = self.frequency.clone();
        let stop = Arc::clone(&self.stop);
        let monitor = Arc::clone(&self.monitor);

        let thread = thread::Builder::new()
            .name(STREAM_THREAD_NAME.into())
            .spawn(move || match self.stream_until_stopped() {
                Ok(()) => Ok(self),
                Err(e) => {
                    self.destroy();
                    Err(e)
                }
            })
            .map_err(SynthError::Spawn)?;

        Ok(SynthHandle {
            frequency,
            stop,
            monitor,
            thread: Some(thread),
        })
    }

    /// Release the buffer and close the device.
    pub fn destroy(self) {
        debug!("Closing synth after {}", self.monitor.snapshot(false));
    }
}

type StreamResult<D> = Result<SynthContext<D>, SynthError>;

/// Control side of a spawned stream.
///
/// Dropping the handle stops the stream and waits for the thread.
pub struct SynthHandle<D: PcmDevice + 'static> {
    frequency: FrequencyHandle,
    stop: Arc<AtomicBool>,
    monitor: Arc<PerformanceMonitor>,
    thread: Option<JoinHandle<StreamResult<D>>>,
}

impl<D: PcmDevice + 'static> SynthHandle<D> {
    pub fn frequency(&self) -> FrequencyHandle {
        self.frequency.clone()
    }

    pub fn set_frequency(&self, hz: i32) -> u32 {
        self.frequency.set_frequency(hz)
    }

    pub fn stats(&self) -> PerformanceSnapshot {
        self.monitor.snapshot(false)
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// True once the streaming thread has exited, whether stopped or failed.
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Wait for the streaming thread. Does not stop it; call [`Self::stop`]
    /// first unless the stream is expected to fail on its own.
    ///
    /// Returns the context on a clean stop so it can be destroyed or
    /// restarted. On a fatal error the context has already been released.
    pub fn join(mut self) -> Result<SynthContext<D>, SynthError> {
        match self.thread.take() {
            Some(thread) => thread.join().map_err(|_| SynthError::Panicked)?,
            None => Err(SynthError::Panicked),
        }
    }
}

impl<D: PcmDevice + 'static> Drop for SynthHandle<D> {
    fn drop(&mut self) {
        if let Some(thread) = self.thread.take() {
            self.stop.store(true, Ordering::Release);
            if let Ok(Ok(context)) = thread.join() {
                context.destroy();
            }
        }
    }
}
