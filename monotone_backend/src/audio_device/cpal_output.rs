//! cpal-backed playback device.
//!
//! cpal drives audio through a callback, while the streaming loop wants a
//! blocking `write`. The two meet in a byte ring buffer:
//!
//! ```text
//! Streaming Loop                 ring (bytes)                 cpal callback
//!     │                               │                             │
//! [write period]──push_slice──────►[queue]──────pop_slice──────►[decode + play]
//!     │                               │                             │
//!     ◄──── Underrun / Suspended flags set by the callback side ────┘
//! ```
//!
//! `cpal::Stream` cannot cross threads on every platform, so it lives on a
//! small keeper thread that owns it for the device's lifetime and takes
//! play/pause commands over a channel.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam::channel::{self, RecvTimeoutError, Sender};
use monotone_core::{Encoding, Endianness, SampleFormat};
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use tracing::{debug, error, warn};

use crate::audio_device::{
    ConfigNegotiator, DeviceCapabilities, DeviceError, HwParams, NegotiatedParams,
    NegotiationError, PcmDevice, PcmDriver, ResumeError, WriteError,
};

/// How long a play/pause request may take before we give up on it.
const COMMAND_TIMEOUT: Duration = Duration::from_millis(500);

/// Name that selects the host's default output device.
pub const DEFAULT_DEVICE: &str = "default";

#[derive(Default)]
struct StreamFlags {
    /// Playback has been started since the last prepare.
    started: AtomicBool,
    underrun: AtomicBool,
    suspended: AtomicBool,
}

#[derive(Debug, Clone, Copy)]
enum Action {
    Play,
    Pause,
}

struct Command {
    action: Action,
    reply: Sender<Result<(), String>>,
}

#[derive(Debug, thiserror::Error)]
enum KeeperError {
    #[error("stream keeper is gone")]
    Disconnected,
    #[error("{0:?} request timed out")]
    TimedOut(Action),
    #[error("{0}")]
    Failed(String),
}

/// Owns the cpal stream on its own thread.
struct StreamKeeper {
    commands: Option<Sender<Command>>,
    handle: Option<JoinHandle<()>>,
}

impl StreamKeeper {
    fn spawn(
        device: cpal::Device,
        config: cpal::StreamConfig,
        format: cpal::SampleFormat,
        consumer: HeapCons<u8>,
        scratch_bytes: usize,
        flags: Arc<StreamFlags>,
    ) -> Result<Self, DeviceError> {
        let (command_tx, command_rx) = channel::unbounded::<Command>();
        let (ready_tx, ready_rx) = channel::bounded::<Result<(), String>>(1);

        let handle = thread::Builder::new()
            .name("cpal-stream".into())
            .spawn(move || {
                let stream = match build_stream(&device, &config, format, consumer, scratch_bytes, flags) {
                    Ok(stream) => stream,
                    Err(reason) => {
                        let _ = ready_tx.send(Err(reason));
                        return;
                    }
                };
                // some hosts start streams on creation; playback begins at the start threshold
                let _ = stream.pause();
                let _ = ready_tx.send(Ok(()));

                while let Ok(command) = command_rx.recv() {
                    let result = match command.action {
                        Action::Play => stream.play().map_err(|e| e.to_string()),
                        Action::Pause => stream.pause().map_err(|e| e.to_string()),
                    };
                    let _ = command.reply.send(result);
                }
                debug!("cpal stream keeper exiting");
            })?;

        let keeper = Self {
            commands: Some(command_tx),
            handle: Some(handle),
        };
        match ready_rx.recv() {
            Ok(Ok(())) => Ok(keeper),
            Ok(Err(reason)) => Err(NegotiationError::DeviceQueryFailed(reason).into()),
            Err(_) => Err(NegotiationError::DeviceQueryFailed(
                "stream thread exited before reporting".into(),
            )
            .into()),
        }
    }

    fn request(&self, action: Action) -> Result<(), KeeperError> {
        let Some(ref commands) = self.commands else {
            return Err(KeeperError::Disconnected);
        };
        let (reply_tx, reply_rx) = channel::bounded(1);
        commands
            .send(Command {
                action,
                reply: reply_tx,
            })
            .map_err(|_| KeeperError::Disconnected)?;
        match reply_rx.recv_timeout(COMMAND_TIMEOUT) {
            Ok(result) => result.map_err(KeeperError::Failed),
            Err(RecvTimeoutError::Timeout) => Err(KeeperError::TimedOut(action)),
            Err(RecvTimeoutError::Disconnected) => Err(KeeperError::Disconnected),
        }
    }
}

impl Drop for StreamKeeper {
    fn drop(&mut self) {
        // disconnect first so the keeper's recv() returns, then join
        drop(self.commands.take());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn build_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    format: cpal::SampleFormat,
    consumer: HeapCons<u8>,
    scratch_bytes: usize,
    flags: Arc<StreamFlags>,
) -> Result<cpal::Stream, String> {
    let sink = CallbackSink {
        consumer,
        scratch_bytes,
        flags,
    };
    let result = match format {
        cpal::SampleFormat::I8 => build_typed(device, config, sink, i8::from_ne_bytes, 0),
        cpal::SampleFormat::U8 => build_typed(device, config, sink, u8::from_ne_bytes, 0x80),
        cpal::SampleFormat::I16 => build_typed(device, config, sink, i16::from_ne_bytes, 0),
        cpal::SampleFormat::U16 => build_typed(device, config, sink, u16::from_ne_bytes, 0x8000),
        cpal::SampleFormat::I32 => build_typed(device, config, sink, i32::from_ne_bytes, 0),
        cpal::SampleFormat::U32 => build_typed(device, config, sink, u32::from_ne_bytes, 0x8000_0000),
        cpal::SampleFormat::F32 => build_typed(device, config, sink, f32::from_ne_bytes, 0.0),
        other => return Err(format!("unsupported cpal sample format {:?}", other)),
    };
    result.map_err(|e| e.to_string())
}

/// What the output callback reads from.
struct CallbackSink {
    consumer: HeapCons<u8>,
    /// Size of the decode buffer; one full ring holds this many bytes.
    scratch_bytes: usize,
    flags: Arc<StreamFlags>,
}

/// Decode queued bytes into `data`, going through `scratch` one chunk at a
/// time, and pad with `silence` once the ring runs dry.
///
/// Returns true if the ring could not fill `data`.
fn fill_from_ring<C, T, const N: usize>(
    consumer: &mut C,
    scratch: &mut [u8],
    data: &mut [T],
    decode: fn([u8; N]) -> T,
    silence: T,
) -> bool
where
    C: Consumer<Item = u8>,
    T: Copy,
{
    let per_chunk = scratch.len() / N;
    let mut filled = 0;
    if per_chunk > 0 {
        for out in data.chunks_mut(per_chunk) {
            let want = out.len() * N;
            // the ring only ever holds whole frames, so whole samples come out
            let popped = consumer.pop_slice(&mut scratch[..want]) / N;
            for (sample, bytes) in out.iter_mut().zip(scratch[..popped * N].chunks_exact(N)) {
                let mut raw = [0u8; N];
                raw.copy_from_slice(bytes);
                *sample = decode(raw);
            }
            filled += popped;
            if popped < out.len() {
                break;
            }
        }
    }
    if filled < data.len() {
        data[filled..].fill(silence);
        return true;
    }
    false
}

fn build_typed<T, const N: usize>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sink: CallbackSink,
    decode: fn([u8; N]) -> T,
    silence: T,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: cpal::SizedSample + Send + 'static,
{
    let CallbackSink {
        mut consumer,
        scratch_bytes,
        flags,
    } = sink;
    let error_flags = flags.clone();
    let mut scratch: Vec<u8> = vec![0; scratch_bytes.max(N)];

    device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            let starved = fill_from_ring(&mut consumer, &mut scratch, data, decode, silence);
            if starved && flags.started.load(Ordering::Acquire) {
                flags.underrun.store(true, Ordering::Release);
            }
        },
        move |err| {
            error!("Audio stream error: {}", err);
            error_flags.suspended.store(true, Ordering::Release);
        },
        None,
    )
}

/// Map a PCM layout onto the cpal sample type carrying the same bytes.
///
/// cpal samples are host-endian and unpadded, so only native-order formats
/// without padding have a counterpart.
pub fn cpal_sample_format(format: SampleFormat) -> Option<cpal::SampleFormat> {
    if format.bits() != format.physical_bits() {
        return None;
    }
    if format.bits() > 8 && format.endianness() != Endianness::native() {
        return None;
    }
    match (format.bits(), format.encoding()) {
        (8, Encoding::Signed) => Some(cpal::SampleFormat::I8),
        (8, Encoding::Unsigned) => Some(cpal::SampleFormat::U8),
        (16, Encoding::Signed) => Some(cpal::SampleFormat::I16),
        (16, Encoding::Unsigned) => Some(cpal::SampleFormat::U16),
        (32, Encoding::Signed) => Some(cpal::SampleFormat::I32),
        (32, Encoding::Unsigned) => Some(cpal::SampleFormat::U32),
        (32, Encoding::Float) => Some(cpal::SampleFormat::F32),
        _ => None,
    }
}

fn sample_format_from_cpal(format: cpal::SampleFormat) -> Option<SampleFormat> {
    let native = Endianness::native();
    let (bits, encoding) = match format {
        cpal::SampleFormat::I8 => (8, Encoding::Signed),
        cpal::SampleFormat::U8 => (8, Encoding::Unsigned),
        cpal::SampleFormat::I16 => (16, Encoding::Signed),
        cpal::SampleFormat::U16 => (16, Encoding::Unsigned),
        cpal::SampleFormat::I32 => (32, Encoding::Signed),
        cpal::SampleFormat::U32 => (32, Encoding::Unsigned),
        cpal::SampleFormat::F32 => (32, Encoding::Float),
        _ => return None,
    };
    SampleFormat::new(bits, bits, native, encoding).ok()
}

fn query_capabilities(device: &cpal::Device) -> Result<DeviceCapabilities, DeviceError> {
    let configs = device
        .supported_output_configs()
        .map_err(|e| NegotiationError::DeviceQueryFailed(e.to_string()))?;

    let mut caps = DeviceCapabilities {
        min_sample_rate: u32::MAX,
        max_sample_rate: 0,
        supported_sample_rates: Vec::new(),
        supported_channels: Vec::new(),
        supported_formats: Vec::new(),
        min_buffer_size: 1,
        max_buffer_size: usize::MAX,
        min_period_size: 1,
    };

    for range in configs {
        caps.min_sample_rate = caps.min_sample_rate.min(range.min_sample_rate().0);
        caps.max_sample_rate = caps.max_sample_rate.max(range.max_sample_rate().0);
        if !caps.supported_channels.contains(&range.channels()) {
            caps.supported_channels.push(range.channels());
        }
        if let Some(format) = sample_format_from_cpal(range.sample_format()) {
            if !caps.supported_formats.contains(&format) {
                caps.supported_formats.push(format);
            }
        }
    }

    if caps.max_sample_rate == 0 {
        return Err(NegotiationError::DeviceQueryFailed("device reports no output configurations".into()).into());
    }
    caps.supported_channels.sort_unstable();
    Ok(caps)
}

pub struct CpalDevice {
    name: String,
    device: cpal::Device,
    flags: Arc<StreamFlags>,
    producer: Option<HeapProd<u8>>,
    keeper: Option<StreamKeeper>,
    frame_bytes: usize,
    start_threshold_bytes: usize,
    avail_min: usize,
    sample_rate: u32,
    period_size: usize,
}

impl CpalDevice {
    pub fn name(&self) -> &str {
        &self.name
    }

    fn start_playback(&mut self) -> Result<(), WriteError> {
        let keeper = self
            .keeper
            .as_ref()
            .ok_or_else(|| WriteError::Fatal("device is not configured".into()))?;
        keeper
            .request(Action::Play)
            .map_err(|e| WriteError::Fatal(e.to_string()))?;
        self.flags.started.store(true, Ordering::Release);
        debug!("Playback started on {}", self.name);
        Ok(())
    }
}

impl PcmDevice for CpalDevice {
    fn negotiate(&mut self, params: &HwParams) -> Result<NegotiatedParams, DeviceError> {
        let caps = query_capabilities(&self.device)?;
        let negotiated = ConfigNegotiator::negotiate(&caps, params)?;
        let format = cpal_sample_format(params.format).ok_or_else(|| NegotiationError::FormatNotSupported {
            requested: params.format,
            available: caps.supported_formats.clone(),
        })?;

        // tear down any earlier stream before building the new one
        self.keeper = None;
        self.producer = None;

        let frame_bytes = params.frame_bytes();
        let ring_bytes = negotiated.buffer_size * frame_bytes;
        let ring = HeapRb::<u8>::new(ring_bytes);
        let (producer, consumer) = ring.split();

        let config = cpal::StreamConfig {
            channels: params.channels,
            sample_rate: cpal::SampleRate(negotiated.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };
        self.flags = Arc::new(StreamFlags::default());
        let keeper = StreamKeeper::spawn(
            self.device.clone(),
            config,
            format,
            consumer,
            ring_bytes,
            self.flags.clone(),
        )?;

        self.keeper = Some(keeper);
        self.producer = Some(producer);
        self.frame_bytes = frame_bytes;
        self.start_threshold_bytes = negotiated.start_threshold * frame_bytes;
        self.avail_min = negotiated.avail_min;
        self.sample_rate = negotiated.sample_rate;
        self.period_size = negotiated.period_size;

        debug!(
            "cpal device {} configured: {}ch {} @ {}Hz, buffer {} frames",
            self.name, params.channels, params.format, negotiated.sample_rate, negotiated.buffer_size
        );
        Ok(negotiated)
    }

    fn write(&mut self, buf: &[u8], frames: usize) -> Result<usize, WriteError> {
        if self.flags.suspended.load(Ordering::Acquire) {
            return Err(WriteError::Suspended);
        }
        if self.flags.underrun.load(Ordering::Acquire) {
            return Err(WriteError::Underrun);
        }
        let Some(producer) = self.producer.as_mut() else {
            return Err(WriteError::Fatal("device is not configured".into()));
        };

        let frame_bytes = self.frame_bytes;
        let mut vacant = producer.vacant_len() / frame_bytes;
        if vacant < self.avail_min.min(frames) {
            // block like a kernel PCM would, but never longer than one period
            let missing = self.avail_min.min(frames) - vacant;
            let wait = missing.min(self.period_size) as f64 / f64::from(self.sample_rate);
            thread::sleep(Duration::from_secs_f64(wait));
            vacant = producer.vacant_len() / frame_bytes;
        }
        if vacant == 0 {
            return Err(WriteError::TryAgain);
        }

        let accepted = frames.min(vacant);
        let bytes = buf
            .get(..accepted * frame_bytes)
            .ok_or_else(|| WriteError::Fatal("buffer shorter than frame count".into()))?;
        let pushed = producer.push_slice(bytes);
        let queued = producer.occupied_len();

        if !self.flags.started.load(Ordering::Acquire) && queued >= self.start_threshold_bytes {
            self.start_playback()?;
        }
        Ok(pushed / frame_bytes)
    }

    fn prepare(&mut self) -> Result<(), DeviceError> {
        let keeper = self.keeper.as_ref().ok_or(DeviceError::NotConfigured)?;
        keeper
            .request(Action::Pause)
            .map_err(|e| DeviceError::Prepare(e.to_string()))?;
        self.flags.started.store(false, Ordering::Release);
        self.flags.underrun.store(false, Ordering::Release);
        Ok(())
    }

    fn resume(&mut self) -> Result<(), ResumeError> {
        let Some(keeper) = self.keeper.as_ref() else {
            return Err(ResumeError::Failed("device is not configured".into()));
        };
        match keeper.request(Action::Play) {
            Ok(()) => {
                self.flags.suspended.store(false, Ordering::Release);
                Ok(())
            }
            Err(KeeperError::TimedOut(_)) => Err(ResumeError::TryAgain),
            Err(e) => {
                warn!("Resume of {} failed: {}", self.name, e);
                Err(ResumeError::Failed(e.to_string()))
            }
        }
    }
}

/// Opens cpal output devices by name; `default` picks the host default.
pub struct CpalDriver {
    host: cpal::Host,
}

impl CpalDriver {
    pub fn new() -> Self {
        Self {
            host: cpal::default_host(),
        }
    }
}

impl Default for CpalDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl PcmDriver for CpalDriver {
    type Device = CpalDevice;

    fn open(&self, name: &str) -> Result<Self::Device, DeviceError> {
        let open_error = |reason: String| DeviceError::Open {
            name: name.to_string(),
            reason,
        };

        let device = if name == DEFAULT_DEVICE {
            self.host
                .default_output_device()
                .ok_or_else(|| open_error("no default output device".into()))?
        } else {
            let wanted = name.to_lowercase();
            self.host
                .output_devices()
                .map_err(|e| open_error(e.to_string()))?
                .find(|d| d.name().map(|n| n.to_lowercase() == wanted).unwrap_or(false))
                .ok_or_else(|| open_error("no such output device".into()))?
        };

        let name = device.name().unwrap_or_else(|_| name.to_string());
        debug!("Opened cpal output device {}", name);
        Ok(CpalDevice {
            name,
            device,
            flags: Arc::new(StreamFlags::default()),
            producer: None,
            keeper: None,
            frame_bytes: 1,
            start_threshold_bytes: 0,
            avail_min: 1,
            sample_rate: 1,
            period_size: 1,
        })
    }
}
