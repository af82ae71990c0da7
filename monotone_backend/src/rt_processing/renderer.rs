//! Packs oscillator output into raw device frames.
//!
//! - Every channel carries the same sample; only the placement differs.
//! - Placement is described per channel by a bit offset and a bit stride,
//!   both of which must land on byte boundaries.
//! - Rendering writes into a caller-owned buffer and never allocates.

use monotone_core::{Encoding, SampleFormat};

use crate::rt_processing::waveform::{Phase, Waveform, phase_increment};

/// Where one channel's samples live inside a period buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelArea {
    /// Offset of the first sample, in bits.
    pub first: usize,
    /// Distance between consecutive samples, in bits.
    pub step: usize,
}

impl ChannelArea {
    /// Layout of `channel` in an interleaved buffer of `channels` channels.
    pub fn interleaved(channel: u16, channels: u16, format: &SampleFormat) -> Self {
        let width = usize::from(format.physical_bits());
        Self {
            first: usize::from(channel) * width,
            step: usize::from(channels) * width,
        }
    }

    pub fn interleaved_set(channels: u16, format: &SampleFormat) -> Vec<ChannelArea> {
        (0..channels)
            .map(|channel| Self::interleaved(channel, channels, format))
            .collect()
    }

    #[inline]
    fn byte_offset(&self) -> usize {
        self.first / 8
    }

    #[inline]
    fn byte_step(&self) -> usize {
        self.step / 8
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LayoutError {
    #[error("no channel areas given")]
    NoChannels,
    #[error("{count} channel areas exceed the 65535 channel limit")]
    TooManyChannels { count: usize },
    #[error("channel {channel}: first offset of {bits} bits is not byte aligned")]
    MisalignedOffset { channel: usize, bits: usize },
    #[error("channel {channel}: step of {bits} bits is not a whole number of bytes")]
    MisalignedStep { channel: usize, bits: usize },
    #[error("channel {channel}: step of {step} bytes is narrower than a {width}-byte sample")]
    StepTooSmall { channel: usize, step: usize, width: usize },
    #[error("channel {channel} needs {needed} bytes but the buffer holds {available}")]
    OutOfBounds {
        channel: usize,
        needed: usize,
        available: usize,
    },
}

/// Check every area against the format and a buffer of `buffer_len` bytes
/// holding `frames` frames.
pub fn validate_areas(
    areas: &[ChannelArea],
    format: &SampleFormat,
    frames: usize,
    buffer_len: usize,
) -> Result<(), LayoutError> {
    if areas.is_empty() {
        return Err(LayoutError::NoChannels);
    }
    let width = format.physical_bytes_per_sample();
    for (channel, area) in areas.iter().enumerate() {
        if area.first % 8 != 0 {
            return Err(LayoutError::MisalignedOffset {
                channel,
                bits: area.first,
            });
        }
        if area.step % 8 != 0 {
            return Err(LayoutError::MisalignedStep {
                channel,
                bits: area.step,
            });
        }
        if frames > 1 && area.byte_step() < width {
            return Err(LayoutError::StepTooSmall {
                channel,
                step: area.byte_step(),
                width,
            });
        }
        if frames > 0 {
            let needed = area.byte_offset() + (frames - 1) * area.byte_step() + width;
            if needed > buffer_len {
                return Err(LayoutError::OutOfBounds {
                    channel,
                    needed,
                    available: buffer_len,
                });
            }
        }
    }
    Ok(())
}

/// Convert an amplitude to the format's raw sample bits (low `bits` bits).
///
/// Integer formats scale by the largest representable value and saturate
/// instead of wrapping, then truncate toward zero. Unsigned formats flip the
/// sign bit. Float formats store the IEEE-754 pattern of `amplitude * volume`.
#[inline]
pub fn encode_sample(format: &SampleFormat, amplitude: f64, volume: f64) -> u32 {
    match format.encoding() {
        Encoding::Float => ((amplitude * volume) as f32).to_bits(),
        Encoding::Signed | Encoding::Unsigned => {
            let max = format.max_representable();
            let scaled = (amplitude * volume * max).clamp(format.min_representable(), max);
            let bits = u32::from(format.bits());
            let mask = if bits >= 32 { u32::MAX } else { (1u32 << bits) - 1 };
            let mut raw = (scaled as i64 as u32) & mask;
            if format.is_unsigned() {
                raw ^= 1u32 << (bits - 1);
            }
            raw
        }
    }
}

/// Store the significant bytes of `value` at the start of `slot`.
///
/// `slot` is one physical sample wide. Little-endian fills from the front,
/// big-endian from the back; container padding is left untouched.
#[inline]
pub fn pack_sample(slot: &mut [u8], value: u32, format: &SampleFormat) {
    let bytes = format.bytes_per_sample();
    let width = format.physical_bytes_per_sample();
    if format.is_big_endian() {
        for i in 0..bytes {
            slot[width - 1 - i] = (value >> (8 * i)) as u8;
        }
    } else {
        for (i, byte) in slot.iter_mut().take(bytes).enumerate() {
            *byte = (value >> (8 * i)) as u8;
        }
    }
}

/// Renders one waveform at a fixed volume into a preallocated period buffer.
#[derive(Debug, Clone)]
pub struct SampleRenderer {
    waveform: Waveform,
    volume: f64,
    format: SampleFormat,
    sample_rate: u32,
    areas: Vec<ChannelArea>,
}

impl SampleRenderer {
    /// `areas` should already have passed [`validate_areas`] for the buffers
    /// this renderer will see.
    pub fn new(
        waveform: Waveform,
        volume: f64,
        format: SampleFormat,
        sample_rate: u32,
        areas: Vec<ChannelArea>,
    ) -> Self {
        Self {
            waveform,
            volume: volume.clamp(0.0, 1.0),
            format,
            sample_rate,
            areas,
        }
    }

    pub fn waveform(&self) -> Waveform {
        self.waveform
    }

    pub fn volume(&self) -> f64 {
        self.volume
    }

    pub fn format(&self) -> &SampleFormat {
        &self.format
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn areas(&self) -> &[ChannelArea] {
        &self.areas
    }

    /// Fill `frames` frames of `buf` starting at `phase`, returning the phase
    /// after the last frame.
    ///
    /// The same bytes go to every channel. A zero frequency keeps the phase
    /// where it is, so the output is a constant.
    pub fn render(&self, buf: &mut [u8], frames: usize, frequency_hz: u32, phase: Phase) -> Phase {
        let step = phase_increment(frequency_hz, self.sample_rate);
        let width = self.format.physical_bytes_per_sample();
        let mut phase = phase;

        for frame in 0..frames {
            let amplitude = self.waveform.evaluate(phase.radians());
            let value = encode_sample(&self.format, amplitude, self.volume);
            for area in &self.areas {
                let at = area.byte_offset() + frame * area.byte_step();
                pack_sample(&mut buf[at..at + width], value, &self.format);
            }
            phase.advance(step);
        }
        phase
    }
}
