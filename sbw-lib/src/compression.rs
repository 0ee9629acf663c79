//! Block decompression.
//!
//! The low nibble of the header `flags` byte selects the algorithm. The
//! upper nibble is reserved and must be zero; the driver warns when it is
//! not. Heatshrink appears in the flags registry but is not implemented,
//! and selecting it is surfaced as an explicit skip rather than a decode
//! attempt.

use std::fmt;
use std::io::Read;
use std::str::FromStr;

use lz4_flex::frame::FrameDecoder;
use serde::Serialize;

/// Compression algorithms in the flags registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    None = 0x0,
    Lz4 = 0x1,
    Heatshrink = 0x2,
}

impl Compression {
    /// Select the algorithm from a block's flags byte, or `None` for an
    /// unregistered value.
    #[must_use]
    pub fn from_flags(flags: u8) -> Option<Self> {
        match flags & 0x0f {
            0x0 => Some(Compression::None),
            0x1 => Some(Compression::Lz4),
            0x2 => Some(Compression::Heatshrink),
            _ => None,
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Compression::None => write!(f, "none"),
            Compression::Lz4 => write!(f, "lz4"),
            Compression::Heatshrink => write!(f, "heatshrink"),
        }
    }
}

impl FromStr for Compression {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Compression::None),
            "lz4" => Ok(Compression::Lz4),
            "heatshrink" => Ok(Compression::Heatshrink),
            other => Err(format!("unknown compression algorithm {other:?}")),
        }
    }
}

/// Reserved (must-be-zero) bits of a flags byte.
#[must_use]
pub fn reserved_flag_bits(flags: u8) -> u8 {
    flags & 0xf0
}

/// Per-block inflate failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InflateFailure {
    /// The algorithm is registered but not implemented (heatshrink).
    Unsupported(Compression),
    /// The compressed stream could not be decoded.
    Corrupt(String),
}

/// Inflate plaintext bytes with the selected algorithm.
///
/// `Compression::None` is a passthrough. The caller is responsible for
/// comparing the inflated length against the header's `raw_size`; a
/// mismatch is a warning, not a failure, because the TLV scanner's own
/// bounds checks govern record safety.
pub fn inflate(algorithm: Compression, data: &[u8]) -> Result<Vec<u8>, InflateFailure> {
    match algorithm {
        Compression::None => Ok(data.to_vec()),
        Compression::Lz4 => {
            let mut out = Vec::with_capacity(data.len().saturating_mul(2));
            FrameDecoder::new(data)
                .read_to_end(&mut out)
                .map_err(|err| InflateFailure::Corrupt(err.to_string()))?;
            Ok(out)
        }
        Compression::Heatshrink => Err(InflateFailure::Unsupported(Compression::Heatshrink)),
    }
}
