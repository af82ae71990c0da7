use crate::audio_device::{HwParams, NegotiatedParams};
use monotone_core::SampleFormat;

/// What a device can do, as reported by its driver.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceCapabilities {
    pub min_sample_rate: u32,
    pub max_sample_rate: u32,
    pub supported_sample_rates: Vec<u32>,

    pub supported_channels: Vec<u16>,
    pub supported_formats: Vec<SampleFormat>,

    pub min_buffer_size: usize,
    pub max_buffer_size: usize,
    pub min_period_size: usize,
}

impl DeviceCapabilities {
    /// A device that accepts anything sensible: software sinks such as
    /// files and pipes.
    pub fn permissive() -> Self {
        Self {
            min_sample_rate: 1,
            max_sample_rate: 768_000,
            supported_sample_rates: Vec::new(),
            supported_channels: (1..=32).collect(),
            supported_formats: vec![
                SampleFormat::S8,
                SampleFormat::U8,
                SampleFormat::S16_LE,
                SampleFormat::S16_BE,
                SampleFormat::U16_LE,
                SampleFormat::U16_BE,
                SampleFormat::S24_LE,
                SampleFormat::S24_BE,
                SampleFormat::S24_3LE,
                SampleFormat::S24_3BE,
                SampleFormat::S32_LE,
                SampleFormat::S32_BE,
                SampleFormat::FLOAT_LE,
                SampleFormat::FLOAT_BE,
            ],
            min_buffer_size: 1,
            max_buffer_size: usize::MAX,
            min_period_size: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum NegotiationError {
    #[error("rate doesn't match (requested {requested}Hz, nearest {nearest}Hz)")]
    RateMismatch { requested: u32, nearest: u32 },
    #[error("channel count {requested} not supported, available: {available:?}")]
    ChannelsNotSupported { requested: u16, available: Vec<u16> },
    #[error("sample format {requested} not supported, available: {available:?}")]
    FormatNotSupported {
        requested: SampleFormat,
        available: Vec<SampleFormat>,
    },
    #[error("period of {period_time_us}us at {sample_rate}Hz is shorter than one frame")]
    PeriodTooShort { period_time_us: u32, sample_rate: u32 },
    #[error("device query failed: {0}")]
    DeviceQueryFailed(String),
}

pub type NegotiationResult<T> = Result<T, NegotiationError>;

pub struct ConfigNegotiator;

impl ConfigNegotiator {
    pub fn negotiate(
        caps: &DeviceCapabilities,
        request: &HwParams,
    ) -> NegotiationResult<NegotiatedParams> {
        let sample_rate = Self::negotiate_sample_rate(caps, request)?;
        Self::negotiate_channels(caps, request)?;
        Self::negotiate_format(caps, request)?;

        let buffer_size = Self::frames_for(sample_rate, request.buffer_time_us)
            .clamp(caps.min_buffer_size, caps.max_buffer_size);

        let period_size = Self::frames_for(sample_rate, request.period_time_us);
        if period_size == 0 {
            return Err(NegotiationError::PeriodTooShort {
                period_time_us: request.period_time_us,
                sample_rate,
            });
        }
        let period_size = period_size.clamp(caps.min_period_size.min(buffer_size), buffer_size);

        // start once the buffer is almost full: a whole number of periods
        let start_threshold = (buffer_size / period_size) * period_size;
        let avail_min = if request.period_event {
            buffer_size
        } else {
            period_size
        };

        Ok(NegotiatedParams {
            sample_rate,
            buffer_size,
            period_size,
            start_threshold,
            avail_min,
        })
    }

    fn negotiate_sample_rate(caps: &DeviceCapabilities, request: &HwParams) -> NegotiationResult<u32> {
        let requested = request.sample_rate;
        if Self::is_sample_rate_supported(caps, requested) || request.resample {
            return Ok(requested);
        }

        let nearest = Self::find_closest_sample_rate(caps, requested);
        Err(NegotiationError::RateMismatch { requested, nearest })
    }

    fn is_sample_rate_supported(caps: &DeviceCapabilities, rate: u32) -> bool {
        if !caps.supported_sample_rates.is_empty() {
            return caps.supported_sample_rates.contains(&rate);
        }
        rate >= caps.min_sample_rate && rate <= caps.max_sample_rate
    }

    pub fn find_closest_sample_rate(caps: &DeviceCapabilities, target: u32) -> u32 {
        if caps.supported_sample_rates.is_empty() {
            return target.clamp(caps.min_sample_rate, caps.max_sample_rate);
        }

        caps.supported_sample_rates
            .iter()
            .copied()
            .min_by_key(|&rate| (i64::from(rate) - i64::from(target)).abs())
            .unwrap_or(target)
    }

    fn negotiate_channels(caps: &DeviceCapabilities, request: &HwParams) -> NegotiationResult<()> {
        if caps.supported_channels.contains(&request.channels) {
            Ok(())
        } else {
            Err(NegotiationError::ChannelsNotSupported {
                requested: request.channels,
                available: caps.supported_channels.clone(),
            })
        }
    }

    fn negotiate_format(caps: &DeviceCapabilities, request: &HwParams) -> NegotiationResult<()> {
        if caps.supported_formats.contains(&request.format) {
            Ok(())
        } else {
            Err(NegotiationError::FormatNotSupported {
                requested: request.format,
                available: caps.supported_formats.clone(),
            })
        }
    }

    /// Frames covered by `micros` at `sample_rate`, rounded down.
    pub fn frames_for(sample_rate: u32, micros: u32) -> usize {
        (u64::from(sample_rate) * u64::from(micros) / 1_000_000) as usize
    }

    pub fn calculate_latency_ms(sample_rate: u32, frames: usize) -> f32 {
        (frames as f32 / sample_rate as f32) * 1000.0
    }
}
