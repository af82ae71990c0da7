use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use quanta::{Clock, Instant as QuantaInstant};

/// Point-in-time copy of the stream counters, for logging.
#[derive(Debug, Clone, PartialEq)]
pub struct PerformanceSnapshot {
    /// Frames the device has accepted.
    pub frames_written: u64,
    /// Periods rendered, including ones cut short by recovery.
    pub periods: u64,
    pub underruns: u64,
    pub suspends: u64,
    /// `TryAgain` results seen while writing.
    pub retries: u64,
    /// Periods abandoned after a recovery.
    pub skipped_periods: u64,
    /// Fastest render observed (ns).
    pub min_render_nanos: Option<u64>,
    /// Slowest render observed (ns).
    pub max_render_nanos: Option<u64>,
    /// EMA of render time in nanoseconds.
    pub ema_render_nanos: f64,
    /// Wall-clock length of one period.
    pub expected_period_nanos: f64,
    /// EMA render time as a share of the period.
    pub avg_load_percent: f64,
}

impl fmt::Display for PerformanceSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "periods={} frames={} underruns={} suspends={} retries={} skipped={} render_ema={:.1}us load={:.2}%",
            self.periods,
            self.frames_written,
            self.underruns,
            self.suspends,
            self.retries,
            self.skipped_periods,
            self.ema_render_nanos / 1_000.0,
            self.avg_load_percent,
        )
    }
}

/// Stream health counters shared between the streaming thread and observers.
///
/// The streaming thread only touches atomics (`increment_*`, `add_*` and the
/// guard from `scoped_render`). `snapshot` can run on any thread.
pub struct PerformanceMonitor {
    clock: Clock,
    period_size: usize,
    sample_rate: u32,

    frames_written: AtomicU64,
    periods: AtomicU64,
    underruns: AtomicU64,
    suspends: AtomicU64,
    retries: AtomicU64,
    skipped_periods: AtomicU64,

    min_render_nanos: AtomicU64,
    max_render_nanos: AtomicU64,
    /// f64 bits
    ema_render_bits: AtomicU64,
    ema_alpha: f64,
}

impl fmt::Debug for PerformanceMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PerformanceMonitor")
            .field("period_size", &self.period_size)
            .field("sample_rate", &self.sample_rate)
            .finish_non_exhaustive()
    }
}

impl PerformanceMonitor {
    pub const DEFAULT_EMA_ALPHA: f64 = 0.1;

    /// `ema_alpha` outside `(0, 1]` falls back to [`Self::DEFAULT_EMA_ALPHA`].
    pub fn new(period_size: usize, sample_rate: u32, ema_alpha: f64) -> Self {
        let ema_alpha = if ema_alpha > 0.0 && ema_alpha <= 1.0 {
            ema_alpha
        } else {
            Self::DEFAULT_EMA_ALPHA
        };
        Self {
            clock: Clock::new(),
            period_size,
            sample_rate,
            frames_written: AtomicU64::new(0),
            periods: AtomicU64::new(0),
            underruns: AtomicU64::new(0),
            suspends: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            skipped_periods: AtomicU64::new(0),
            min_render_nanos: AtomicU64::new(u64::MAX),
            max_render_nanos: AtomicU64::new(0),
            ema_render_bits: AtomicU64::new(0),
            ema_alpha,
        }
    }

    #[inline(always)]
    pub fn add_frames_written(&self, n: u64) {
        self.frames_written.fetch_add(n, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn increment_underruns(&self) {
        self.underruns.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn increment_suspends(&self) {
        self.suspends.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn increment_retries(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn increment_skipped_periods(&self) {
        self.skipped_periods.fetch_add(1, Ordering::Relaxed);
    }

    /// Fold one render duration into min, max and EMA.
    #[inline(always)]
    pub fn record_render_nanos(&self, nanos: u64) {
        self.min_render_nanos.fetch_min(nanos, Ordering::Relaxed);
        self.max_render_nanos.fetch_max(nanos, Ordering::Relaxed);

        // EMA_new = alpha * x + (1 - alpha) * EMA_old
        let alpha = self.ema_alpha;
        let mut old_bits = self.ema_render_bits.load(Ordering::Relaxed);
        loop {
            let old = f64::from_bits(old_bits);
            let new = alpha * (nanos as f64) + (1.0 - alpha) * old;
            match self.ema_render_bits.compare_exchange_weak(
                old_bits,
                new.to_bits(),
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(found) => old_bits = found,
            }
        }
    }

    #[inline(always)]
    pub fn record_render(&self, d: Duration) {
        self.record_render_nanos(u64::try_from(d.as_nanos()).unwrap_or(u64::MAX));
    }

    /// Count a period and time its rendering until the guard drops.
    #[inline(always)]
    pub fn scoped_render(&self) -> RenderGuard<'_> {
        self.periods.fetch_add(1, Ordering::Relaxed);
        RenderGuard {
            monitor: self,
            start: self.clock.now(),
        }
    }

    /// Read the counters. With `reset_peaks` the min/max/EMA timings start
    /// over afterwards; event counters are never reset here.
    pub fn snapshot(&self, reset_peaks: bool) -> PerformanceSnapshot {
        let min_raw = self.min_render_nanos.load(Ordering::Relaxed);
        let max_raw = self.max_render_nanos.load(Ordering::Relaxed);
        let ema = f64::from_bits(self.ema_render_bits.load(Ordering::Relaxed));
        let expected_period_nanos = if self.sample_rate > 0 {
            self.period_size as f64 / f64::from(self.sample_rate) * 1_000_000_000.0
        } else {
            0.0
        };
        let avg_load_percent = if expected_period_nanos > 0.0 {
            ema / expected_period_nanos * 100.0
        } else {
            0.0
        };

        if reset_peaks {
            self.min_render_nanos.store(u64::MAX, Ordering::Relaxed);
            self.max_render_nanos.store(0, Ordering::Relaxed);
            self.ema_render_bits.store(0, Ordering::Relaxed);
        }

        PerformanceSnapshot {
            frames_written: self.frames_written.load(Ordering::Relaxed),
            periods: self.periods.load(Ordering::Relaxed),
            underruns: self.underruns.load(Ordering::Relaxed),
            suspends: self.suspends.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            skipped_periods: self.skipped_periods.load(Ordering::Relaxed),
            min_render_nanos: (min_raw != u64::MAX).then_some(min_raw),
            max_render_nanos: (max_raw != 0).then_some(max_raw),
            ema_render_nanos: ema,
            expected_period_nanos,
            avg_load_percent,
        }
    }
}

/// Records render latency on drop. Atomics only.
pub struct RenderGuard<'a> {
    monitor: &'a PerformanceMonitor,
    start: QuantaInstant,
}

impl Drop for RenderGuard<'_> {
    fn drop(&mut self) {
        let elapsed = self.monitor.clock.now().saturating_duration_since(self.start);
        self.monitor.record_render(elapsed);
    }
}
