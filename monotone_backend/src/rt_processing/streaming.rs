//! The render/transfer loop.
//!
//! Design goals:
//! - One period per iteration: read the frequency, render, hand to the device.
//! - Never allocate on this thread; the period buffer is sized once up front.
//! - Partial writes are finished before the next period is rendered.
//! - Device faults go through [`Recovery`]; a recovered fault drops the rest
//!   of the period rather than replaying stale audio.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::audio_device::{PcmDevice, WriteError};
use crate::rt_processing::frequency::FrequencyCell;
use crate::rt_processing::performance::PerformanceMonitor;
use crate::rt_processing::recovery::{FatalDeviceError, RecoveredFault, Recovery};
use crate::rt_processing::renderer::SampleRenderer;
use crate::rt_processing::waveform::Phase;

/// How one period's transfer ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeriodOutcome {
    Complete,
    /// A fault was recovered and `remaining` frames were dropped.
    Skipped {
        fault: RecoveredFault,
        remaining: usize,
    },
}

/// Push `frames` frames from `buf` into the device.
///
/// Short writes are re-issued from where the device stopped. `TryAgain` is
/// retried immediately with no limit, so a device that never makes progress
/// keeps this thread spinning.
pub fn write_period<D: PcmDevice + ?Sized>(
    device: &mut D,
    buf: &[u8],
    frames: usize,
    frame_bytes: usize,
    recovery: &Recovery,
    monitor: &PerformanceMonitor,
) -> Result<PeriodOutcome, FatalDeviceError> {
    let mut offset = 0;
    let mut remaining = frames;

    while remaining > 0 {
        match device.write(&buf[offset * frame_bytes..], remaining) {
            Ok(written) => {
                let written = written.min(remaining);
                if written < remaining {
                    trace!("Partial write: {} of {} frames", written, remaining);
                }
                offset += written;
                remaining -= written;
                monitor.add_frames_written(written as u64);
            }
            Err(WriteError::TryAgain) => {
                monitor.increment_retries();
                std::hint::spin_loop();
            }
            Err(fault) => {
                let fault = recovery.recover(device, fault)?;
                match fault {
                    RecoveredFault::Underrun => monitor.increment_underruns(),
                    RecoveredFault::Suspended => monitor.increment_suspends(),
                }
                monitor.increment_skipped_periods();
                return Ok(PeriodOutcome::Skipped { fault, remaining });
            }
        }
    }
    Ok(PeriodOutcome::Complete)
}

/// Owns the device and everything the streaming thread touches.
pub struct StreamingLoop<D: PcmDevice> {
    device: D,
    renderer: SampleRenderer,
    buffer: Vec<u8>,
    period_size: usize,
    frame_bytes: usize,
    frequency: Arc<FrequencyCell>,
    phase: Phase,
    recovery: Recovery,
    monitor: Arc<PerformanceMonitor>,
    stats_interval: Option<Duration>,
}

impl<D: PcmDevice> StreamingLoop<D> {
    /// `buffer` must already hold a full period for `renderer`'s channel areas.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        device: D,
        renderer: SampleRenderer,
        buffer: Vec<u8>,
        period_size: usize,
        frame_bytes: usize,
        frequency: Arc<FrequencyCell>,
        recovery: Recovery,
        monitor: Arc<PerformanceMonitor>,
        stats_interval: Option<Duration>,
    ) -> Self {
        Self {
            device,
            renderer,
            buffer,
            period_size,
            frame_bytes,
            frequency,
            phase: Phase::ZERO,
            recovery,
            monitor,
            stats_interval,
        }
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn renderer(&self) -> &SampleRenderer {
        &self.renderer
    }

    /// Render the next period without sending it anywhere.
    pub fn render_next(&mut self) -> &[u8] {
        let frequency = self.frequency.get();
        let _timing = self.monitor.scoped_render();
        self.phase = self
            .renderer
            .render(&mut self.buffer, self.period_size, frequency, self.phase);
        &self.buffer
    }

    /// Render one period and push it to the device.
    pub fn run_period(&mut self) -> Result<PeriodOutcome, FatalDeviceError> {
        self.render_next();
        write_period(
            &mut self.device,
            &self.buffer,
            self.period_size,
            self.frame_bytes,
            &self.recovery,
            &self.monitor,
        )
    }

    /// Loop until `stop` is raised or the device fails for good.
    ///
    /// The flag is checked once per period, so stopping takes at most one
    /// period plus whatever the device blocks for.
    pub fn run(&mut self, stop: &AtomicBool) -> Result<(), FatalDeviceError> {
        debug!(
            "Streaming {} at {}Hz, {} frames per period",
            self.renderer.waveform(),
            self.renderer.sample_rate(),
            self.period_size
        );
        let mut last_report = Instant::now();

        while !stop.load(Ordering::Acquire) {
            self.run_period()?;

            if let Some(interval) = self.stats_interval {
                if last_report.elapsed() >= interval {
                    debug!("Stream stats: {}", self.monitor.snapshot(true));
                    last_report = Instant::now();
                }
            }
        }

        debug!("Streaming loop stopped at {}", self.monitor.snapshot(false));
        Ok(())
    }
}
