//! Raw PCM byte sink.
//!
//! Writes packed, interleaved frames to any `io::Write`. Pointing it at stdout
//! and piping into `aplay -f S16_LE -r 44100 -c 1` gives audible output without
//! a native backend; pointing it at a file records the stream.

use std::fmt;
use std::fs::File;
use std::io::{self, Write};
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::audio_device::{
    ConfigNegotiator, DeviceCapabilities, DeviceError, HwParams, NegotiatedParams, PcmDevice,
    PcmDriver, ResumeError, WriteError,
};

/// Device name that selects standard output.
pub const STDOUT_DEVICE: &str = "-";

pub struct RawStreamDevice<W: Write + Send> {
    writer: W,
    capabilities: DeviceCapabilities,
    frame_bytes: usize,
    negotiated: Option<NegotiatedParams>,
    /// Throttle writes to wall-clock rate, keeping at most one buffer queued.
    paced: bool,
    clock: Option<PaceClock>,
}

struct PaceClock {
    started: Instant,
    frames_written: u64,
}

impl<W: Write + Send> RawStreamDevice<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            capabilities: DeviceCapabilities::permissive(),
            frame_bytes: 0,
            negotiated: None,
            paced: false,
            clock: None,
        }
    }

    pub fn with_capabilities(mut self, capabilities: DeviceCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn paced(mut self, paced: bool) -> Self {
        self.paced = paced;
        self
    }

    pub fn get_ref(&self) -> &W {
        &self.writer
    }

    fn pace(&mut self, frames: usize) {
        let Some(params) = self.negotiated else {
            return;
        };
        let clock = self.clock.get_or_insert_with(|| PaceClock {
            started: Instant::now(),
            frames_written: 0,
        });
        clock.frames_written += frames as u64;

        let rate = f64::from(params.sample_rate);
        let played = clock.started.elapsed().as_secs_f64() * rate;
        let queued = clock.frames_written as f64 - played;
        let excess = queued - params.buffer_size as f64;
        if excess > 0.0 {
            std::thread::sleep(Duration::from_secs_f64(excess / rate));
        }
    }
}

impl<W: Write + Send> fmt::Debug for RawStreamDevice<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawStreamDevice")
            .field("frame_bytes", &self.frame_bytes)
            .field("negotiated", &self.negotiated)
            .field("paced", &self.paced)
            .finish_non_exhaustive()
    }
}

/// Write all of `bytes`, riding out interrupts and a sink that is briefly full.
fn finish_frame<W: Write>(writer: &mut W, mut bytes: &[u8]) -> Result<(), WriteError> {
    while !bytes.is_empty() {
        match writer.write(bytes) {
            Ok(0) => return Err(WriteError::Fatal("sink closed".into())),
            Ok(n) => bytes = &bytes[n..],
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => std::thread::yield_now(),
            Err(e) => return Err(WriteError::Fatal(e.to_string())),
        }
    }
    Ok(())
}

impl<W: Write + Send> PcmDevice for RawStreamDevice<W> {
    fn negotiate(&mut self, params: &HwParams) -> Result<NegotiatedParams, DeviceError> {
        let negotiated = ConfigNegotiator::negotiate(&self.capabilities, params)?;
        self.frame_bytes = params.frame_bytes();
        self.negotiated = Some(negotiated);
        debug!(
            "Raw stream configured: {}ch {} @ {}Hz, period {} frames",
            params.channels, params.format, negotiated.sample_rate, negotiated.period_size
        );
        Ok(negotiated)
    }

    fn write(&mut self, buf: &[u8], frames: usize) -> Result<usize, WriteError> {
        if self.negotiated.is_none() {
            return Err(WriteError::Fatal("device is not configured".into()));
        }
        let frame_bytes = self.frame_bytes;
        let bytes = buf
            .get(..frames * frame_bytes)
            .ok_or_else(|| WriteError::Fatal("buffer shorter than frame count".into()))?;
        if bytes.is_empty() {
            return Ok(0);
        }

        let written = match self.writer.write(bytes) {
            Ok(0) => return Err(WriteError::Fatal("sink closed".into())),
            Ok(n) => n,
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted) => {
                return Err(WriteError::TryAgain);
            }
            Err(e) => return Err(WriteError::Fatal(e.to_string())),
        };

        // never leave half a frame behind: finish the one we started
        let mut accepted = written / frame_bytes;
        if written % frame_bytes != 0 {
            let end = (accepted + 1) * frame_bytes;
            finish_frame(&mut self.writer, &bytes[written..end])?;
            accepted += 1;
        }
        trace!("Raw stream accepted {} of {} frames", accepted, frames);

        if self.paced {
            self.pace(accepted);
        }
        Ok(accepted)
    }

    fn prepare(&mut self) -> Result<(), DeviceError> {
        self.writer
            .flush()
            .map_err(|e| DeviceError::Prepare(e.to_string()))?;
        self.clock = None;
        Ok(())
    }

    fn resume(&mut self) -> Result<(), ResumeError> {
        Ok(())
    }
}

impl<W: Write + Send> Drop for RawStreamDevice<W> {
    fn drop(&mut self) {
        let _ = self.writer.flush();
    }
}

/// Opens `-` as stdout and anything else as a file path (created or truncated).
#[derive(Debug, Clone, Default)]
pub struct RawStreamDriver {
    paced: bool,
}

impl RawStreamDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pace file output to real time. Stdout is never paced; the reader on
    /// the other end of the pipe provides back-pressure.
    pub fn paced(mut self, paced: bool) -> Self {
        self.paced = paced;
        self
    }
}

impl PcmDriver for RawStreamDriver {
    type Device = RawStreamDevice<Box<dyn Write + Send>>;

    fn open(&self, name: &str) -> Result<Self::Device, DeviceError> {
        if name == STDOUT_DEVICE {
            debug!("Opening raw stream on stdout");
            let writer: Box<dyn Write + Send> = Box::new(io::stdout());
            return Ok(RawStreamDevice::new(writer));
        }

        let file = File::create(name).map_err(|e| DeviceError::Open {
            name: name.to_string(),
            reason: e.to_string(),
        })?;
        debug!("Opening raw stream on {}", name);
        let writer: Box<dyn Write + Send> = Box::new(io::BufWriter::new(file));
        Ok(RawStreamDevice::new(writer).paced(self.paced))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use monotone_core::SampleFormat;
    use std::collections::VecDeque;

    fn params(channels: u16) -> HwParams {
        HwParams {
            sample_rate: 8000,
            channels,
            format: SampleFormat::S16_LE,
            buffer_time_us: 100_000,
            period_time_us: 10_000,
            resample: true,
            period_event: false,
        }
    }

    /// Accepts at most `limit` bytes per call, then reports `WouldBlock` once.
    struct Trickle {
        data: Vec<u8>,
        limit: usize,
        block_next: bool,
    }

    impl Write for Trickle {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.block_next {
                self.block_next = false;
                return Err(io::ErrorKind::WouldBlock.into());
            }
            let n = buf.len().min(self.limit);
            self.data.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Accepts at most `limit` bytes per call; after the first accepted
    /// write, fails once with each queued error kind.
    struct Stutter {
        data: Vec<u8>,
        limit: usize,
        writes: usize,
        hiccups: VecDeque<io::ErrorKind>,
    }

    impl Write for Stutter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.writes > 0 {
                if let Some(kind) = self.hiccups.pop_front() {
                    return Err(kind.into());
                }
            }
            self.writes += 1;
            let n = buf.len().min(self.limit);
            self.data.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_write_requires_negotiation() {
        let mut device = RawStreamDevice::new(Vec::<u8>::new());
        assert!(matches!(device.write(&[0; 4], 2), Err(WriteError::Fatal(_))));
    }

    #[test]
    fn test_full_write() {
        let mut device = RawStreamDevice::new(Vec::<u8>::new());
        let negotiated = device.negotiate(&params(2)).unwrap();
        assert_eq!(negotiated.period_size, 80);

        let buf: Vec<u8> = (0..16).collect();
        assert_eq!(device.write(&buf, 4), Ok(4));
        assert_eq!(device.get_ref().as_slice(), buf.as_slice());
    }

    #[test]
    fn test_partial_write_completes_started_frame() {
        let writer = Trickle {
            data: Vec::new(),
            limit: 5,
            block_next: false,
        };
        let mut device = RawStreamDevice::new(writer);
        device.negotiate(&params(1)).unwrap();

        let buf: Vec<u8> = (0..8).collect();
        // 5 bytes accepted, the third frame is finished with one more byte
        assert_eq!(device.write(&buf, 4), Ok(3));
        assert_eq!(device.get_ref().data, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_started_frame_survives_interrupt_and_would_block() {
        let writer = Stutter {
            data: Vec::new(),
            limit: 5,
            writes: 0,
            hiccups: VecDeque::from([io::ErrorKind::Interrupted, io::ErrorKind::WouldBlock]),
        };
        let mut device = RawStreamDevice::new(writer);
        device.negotiate(&params(1)).unwrap();

        let buf: Vec<u8> = (0..8).collect();
        assert_eq!(device.write(&buf, 4), Ok(3));
        assert_eq!(device.get_ref().data, vec![0, 1, 2, 3, 4, 5]);
        assert!(device.get_ref().hiccups.is_empty());
    }

    #[test]
    fn test_would_block_maps_to_try_again() {
        let writer = Trickle {
            data: Vec::new(),
            limit: usize::MAX,
            block_next: true,
        };
        let mut device = RawStreamDevice::new(writer);
        device.negotiate(&params(1)).unwrap();

        assert_eq!(device.write(&[1, 2], 1), Err(WriteError::TryAgain));
        assert_eq!(device.write(&[1, 2], 1), Ok(1));
    }

    #[test]
    fn test_short_buffer_is_fatal() {
        let mut device = RawStreamDevice::new(Vec::<u8>::new());
        device.negotiate(&params(1)).unwrap();
        assert!(matches!(device.write(&[0; 2], 4), Err(WriteError::Fatal(_))));
    }

    #[test]
    fn test_driver_opens_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.raw");

        {
            let mut device = RawStreamDriver::new().open(path.to_str().unwrap()).unwrap();
            device.negotiate(&params(1)).unwrap();
            assert_eq!(device.write(&[7, 0, 9, 0], 2), Ok(2));
        }

        assert_eq!(std::fs::read(&path).unwrap(), vec![7, 0, 9, 0]);
    }

    #[test]
    fn test_driver_reports_open_failure() {
        let err = RawStreamDriver::new()
            .open("/nonexistent-dir/monotone/out.raw")
            .unwrap_err();
        assert!(matches!(err, DeviceError::Open { .. }));
        assert!(format!("{:?}", RawStreamDevice::new(Vec::<u8>::new())).starts_with("RawStreamDevice"));
    }
}
