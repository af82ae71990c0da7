#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use monotone_backend::audio_device::{ConfigNegotiator, DeviceCapabilities};
use monotone_backend::{DeviceError, HwParams, NegotiatedParams, PcmDevice, ResumeError, WriteError};
use monotone_core::SynthConfig;

/// One scripted reaction to a `write` call.
#[derive(Debug, Clone)]
pub enum Step {
    /// Accept at most this many frames.
    Accept(usize),
    Fail(WriteError),
}

/// Everything the device saw, shared with the test.
#[derive(Debug, Default)]
pub struct Log {
    pub bytes: Vec<u8>,
    pub writes: usize,
    pub prepares: usize,
    pub resumes: usize,
    pub writer_threads: Vec<Option<String>>,
    /// Fail every write from this write count on, once the script is spent.
    pub fail_at_write: Option<(usize, WriteError)>,
}

#[derive(Debug, Clone, Default)]
pub struct SharedLog(Arc<Mutex<Log>>);

impl SharedLog {
    pub fn lock(&self) -> MutexGuard<'_, Log> {
        self.0.lock().unwrap()
    }

    /// Poll until at least `bytes` bytes were written, or panic after 5s.
    pub fn wait_for_bytes(&self, bytes: usize) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while self.lock().bytes.len() < bytes {
            assert!(Instant::now() < deadline, "device never received {} bytes", bytes);
            thread::sleep(Duration::from_millis(1));
        }
    }
}

/// In-memory playback device driven by a script of write outcomes. Once the
/// script runs out every write is accepted in full.
pub struct ScriptedDevice {
    script: VecDeque<Step>,
    resumes: VecDeque<Result<(), ResumeError>>,
    prepare_fails: bool,
    capabilities: DeviceCapabilities,
    frame_bytes: usize,
    log: SharedLog,
}

impl ScriptedDevice {
    pub fn new() -> (Self, SharedLog) {
        let log = SharedLog::default();
        let device = Self {
            script: VecDeque::new(),
            resumes: VecDeque::new(),
            prepare_fails: false,
            capabilities: DeviceCapabilities::permissive(),
            frame_bytes: 0,
            log: log.clone(),
        };
        (device, log)
    }

    pub fn script(mut self, steps: impl IntoIterator<Item = Step>) -> Self {
        self.script.extend(steps);
        self
    }

    pub fn resumes(mut self, results: impl IntoIterator<Item = Result<(), ResumeError>>) -> Self {
        self.resumes.extend(results);
        self
    }

    pub fn failing_prepare(mut self) -> Self {
        self.prepare_fails = true;
        self
    }

    pub fn capabilities(mut self, capabilities: DeviceCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Skip negotiation for tests that call `write_period` directly.
    pub fn with_frame_bytes(mut self, frame_bytes: usize) -> Self {
        self.frame_bytes = frame_bytes;
        self
    }
}

impl PcmDevice for ScriptedDevice {
    fn negotiate(&mut self, params: &HwParams) -> Result<NegotiatedParams, DeviceError> {
        let negotiated = ConfigNegotiator::negotiate(&self.capabilities, params)?;
        self.frame_bytes = params.frame_bytes();
        Ok(negotiated)
    }

    fn write(&mut self, buf: &[u8], frames: usize) -> Result<usize, WriteError> {
        let mut log = self.log.lock();
        log.writes += 1;
        log.writer_threads
            .push(thread::current().name().map(str::to_string));
        assert!(buf.len() >= frames * self.frame_bytes, "short buffer handed to device");

        let accepted = match self.script.pop_front() {
            Some(Step::Fail(err)) => return Err(err),
            Some(Step::Accept(n)) => n.min(frames),
            None => match &log.fail_at_write {
                Some((at, err)) if log.writes >= *at => return Err(err.clone()),
                _ => frames,
            },
        };
        log.bytes.extend_from_slice(&buf[..accepted * self.frame_bytes]);
        Ok(accepted)
    }

    fn prepare(&mut self) -> Result<(), DeviceError> {
        self.log.lock().prepares += 1;
        if self.prepare_fails {
            return Err(DeviceError::Prepare("scripted failure".into()));
        }
        Ok(())
    }

    fn resume(&mut self) -> Result<(), ResumeError> {
        self.log.lock().resumes += 1;
        self.resumes.pop_front().unwrap_or(Ok(()))
    }
}

/// 8 kHz, 10 ms periods (80 frames), 50 ms buffer, fast resume polling.
pub fn small_config() -> SynthConfig {
    SynthConfig::new()
        .with_sample_rate(8000)
        .with_period_time_us(10_000)
        .with_buffer_time_us(50_000)
        .with_resume_policy(Duration::from_millis(1), 5)
        .with_stats_interval(Duration::ZERO)
}
