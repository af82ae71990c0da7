//! PCM sample format descriptors.
//!
//! A [`SampleFormat`] describes how one sample is laid out in memory: how many
//! bits carry the value, how wide the container is, the byte order and whether
//! the value is signed, offset-binary (unsigned) or IEEE float.
//!
//! Formats are named the way ALSA names them (`S16_LE`, `U8`, `S24_3BE`,
//! `FLOAT_LE`, ...). A name without a byte-order suffix (`S16`) means the
//! host's native order.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Endianness {
    Little,
    Big,
}

impl Endianness {
    /// Byte order of the machine we are running on.
    pub const fn native() -> Self {
        if cfg!(target_endian = "big") {
            Endianness::Big
        } else {
            Endianness::Little
        }
    }

    fn suffix(self) -> &'static str {
        match self {
            Endianness::Little => "LE",
            Endianness::Big => "BE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Encoding {
    Signed,
    Unsigned,
    Float,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormatError {
    #[error("unknown sample format name: {0:?}")]
    UnknownName(String),
    #[error("unsupported sample width: {bits} significant bits in a {physical_bits}-bit container")]
    UnsupportedWidth { bits: u16, physical_bits: u16 },
    #[error("float samples must be 32 bits wide, got {0}")]
    FloatWidth(u16),
}

/// Layout of a single PCM sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SampleFormat {
    bits: u16,
    physical_bits: u16,
    endianness: Endianness,
    encoding: Encoding,
}

impl SampleFormat {
    pub const S8: Self = Self::int(8, 8, Endianness::Little, Encoding::Signed);
    pub const U8: Self = Self::int(8, 8, Endianness::Little, Encoding::Unsigned);

    pub const S16_LE: Self = Self::int(16, 16, Endianness::Little, Encoding::Signed);
    pub const S16_BE: Self = Self::int(16, 16, Endianness::Big, Encoding::Signed);
    pub const U16_LE: Self = Self::int(16, 16, Endianness::Little, Encoding::Unsigned);
    pub const U16_BE: Self = Self::int(16, 16, Endianness::Big, Encoding::Unsigned);

    /// 24 significant bits in a 32-bit container.
    pub const S24_LE: Self = Self::int(24, 32, Endianness::Little, Encoding::Signed);
    pub const S24_BE: Self = Self::int(24, 32, Endianness::Big, Encoding::Signed);
    /// 24 bits packed into three bytes.
    pub const S24_3LE: Self = Self::int(24, 24, Endianness::Little, Encoding::Signed);
    pub const S24_3BE: Self = Self::int(24, 24, Endianness::Big, Encoding::Signed);

    pub const S32_LE: Self = Self::int(32, 32, Endianness::Little, Encoding::Signed);
    pub const S32_BE: Self = Self::int(32, 32, Endianness::Big, Encoding::Signed);

    pub const FLOAT_LE: Self = Self::int(32, 32, Endianness::Little, Encoding::Float);
    pub const FLOAT_BE: Self = Self::int(32, 32, Endianness::Big, Encoding::Float);

    /// Signed 16-bit in native byte order.
    pub const S16: Self = Self::int(16, 16, Endianness::native(), Encoding::Signed);

    const fn int(bits: u16, physical_bits: u16, endianness: Endianness, encoding: Encoding) -> Self {
        Self {
            bits,
            physical_bits,
            endianness,
            encoding,
        }
    }

    /// Build a format, rejecting layouts the renderer cannot pack.
    ///
    /// Supported containers are `bits == physical_bits` for 8/16/24/32 bits
    /// and 24 significant bits in a 32-bit container.
    pub fn new(
        bits: u16,
        physical_bits: u16,
        endianness: Endianness,
        encoding: Encoding,
    ) -> Result<Self, FormatError> {
        if encoding == Encoding::Float {
            if bits != 32 || physical_bits != 32 {
                return Err(FormatError::FloatWidth(bits));
            }
            return Ok(Self::int(32, 32, endianness, encoding));
        }

        let supported = matches!(
            (bits, physical_bits),
            (8, 8) | (16, 16) | (24, 24) | (24, 32) | (32, 32)
        );
        if !supported {
            return Err(FormatError::UnsupportedWidth {
                bits,
                physical_bits,
            });
        }

        // byte order is meaningless for single-byte samples
        let endianness = if bits == 8 {
            Endianness::Little
        } else {
            endianness
        };
        Ok(Self::int(bits, physical_bits, endianness, encoding))
    }

    /// Significant bits per sample.
    pub fn bits(&self) -> u16 {
        self.bits
    }

    /// Bits occupied in memory per sample, padding included.
    pub fn physical_bits(&self) -> u16 {
        self.physical_bits
    }

    pub fn bytes_per_sample(&self) -> usize {
        usize::from(self.bits / 8)
    }

    pub fn physical_bytes_per_sample(&self) -> usize {
        usize::from(self.physical_bits / 8)
    }

    pub fn endianness(&self) -> Endianness {
        self.endianness
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    pub fn is_big_endian(&self) -> bool {
        self.endianness == Endianness::Big
    }

    pub fn is_unsigned(&self) -> bool {
        self.encoding == Encoding::Unsigned
    }

    /// Largest positive magnitude the format can represent.
    ///
    /// Integer formats return `2^(bits-1) - 1`; float formats return `1.0`.
    pub fn max_representable(&self) -> f64 {
        match self.encoding {
            Encoding::Float => 1.0,
            Encoding::Signed | Encoding::Unsigned => ((1i64 << (self.bits - 1)) - 1) as f64,
        }
    }

    /// Smallest (most negative) value before the unsigned offset is applied.
    pub fn min_representable(&self) -> f64 {
        match self.encoding {
            Encoding::Float => -1.0,
            Encoding::Signed | Encoding::Unsigned => -((1i64 << (self.bits - 1)) as f64),
        }
    }
}

impl Default for SampleFormat {
    fn default() -> Self {
        Self::S16
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let suffix = self.endianness.suffix();
        match self.encoding {
            Encoding::Float => write!(f, "FLOAT_{}", suffix),
            Encoding::Signed | Encoding::Unsigned => {
                let prefix = if self.is_unsigned() { 'U' } else { 'S' };
                if self.bits == 8 {
                    return write!(f, "{}8", prefix);
                }
                let packed = if self.bits == 24 && self.physical_bits == 24 {
                    "3"
                } else {
                    ""
                };
                write!(f, "{}{}_{}{}", prefix, self.bits, packed, suffix)
            }
        }
    }
}

impl FromStr for SampleFormat {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unknown = || FormatError::UnknownName(s.to_string());
        let upper = s.trim().to_ascii_uppercase();
        let (head, tail) = match upper.split_once('_') {
            Some((head, tail)) => (head, Some(tail)),
            None => (upper.as_str(), None),
        };

        let (packed, endianness) = match tail {
            None => (false, Endianness::native()),
            Some("LE") => (false, Endianness::Little),
            Some("BE") => (false, Endianness::Big),
            Some("3LE") => (true, Endianness::Little),
            Some("3BE") => (true, Endianness::Big),
            Some(_) => return Err(unknown()),
        };

        if head == "FLOAT" {
            if packed {
                return Err(unknown());
            }
            return Self::new(32, 32, endianness, Encoding::Float);
        }

        let mut chars = head.chars();
        let encoding = match chars.next() {
            Some('S') => Encoding::Signed,
            Some('U') => Encoding::Unsigned,
            _ => return Err(unknown()),
        };
        let bits: u16 = chars.as_str().parse().map_err(|_| unknown())?;

        let physical_bits = match (bits, packed) {
            (24, true) => 24,
            (24, false) => 32,
            (_, true) => return Err(unknown()),
            (bits, false) => bits,
        };
        if bits == 8 && tail.is_some() {
            return Err(unknown());
        }

        Self::new(bits, physical_bits, endianness, encoding)
    }
}

impl TryFrom<String> for SampleFormat {
    type Error = FormatError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SampleFormat> for String {
    fn from(value: SampleFormat) -> Self {
        value.to_string()
    }
}
