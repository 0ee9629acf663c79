//! The decode driver: pulls blocks from the frame reader, routes each
//! through unseal → inflate → scan, and aggregates records and per-block
//! outcomes.
//!
//! A block advances through frame, crypto, decompress, and TLV stages;
//! any stage can divert it to a terminal `Skipped` outcome. A single
//! block's failure never fails the run. The only fatal conditions are
//! I/O errors from the byte source and the key-likely-wrong bailout.
//!
//! # Example
//! ```no_run
//! use std::fs::File;
//! use sbw::decode::Decoder;
//!
//! let key = std::fs::read("key.bin").unwrap();
//! let file = File::open("capture.sbw").unwrap();
//! let decoded = Decoder::new(&key).unwrap().decode(file).unwrap();
//! println!("{} imu samples", decoded.imu.len());
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, warn};

use crate::block::{Block, BlockReader, ReadEvent, Truncation, DEFAULT_MAX_BLOCK_SIZE};
use crate::compression::{self, reserved_flag_bits, Compression, InflateFailure};
use crate::config::DecodeConfig;
use crate::crypto::{UnsealFailure, Unsealer};
use crate::tlv::{self, Record, TailSkip, Value};
use crate::{Error, Result};

/// Pipeline stage a block outcome is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Frame,
    Crypto,
    Decompress,
    Tlv,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Frame => write!(f, "frame"),
            Stage::Crypto => write!(f, "crypto"),
            Stage::Decompress => write!(f, "decompress"),
            Stage::Tlv => write!(f, "tlv"),
        }
    }
}

/// Why a block was skipped.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum SkipReason {
    TruncatedHeader,
    TruncatedPayload,
    WrongKeyOrTampered,
    NonceLengthInvalid { got: u8 },
    UnsupportedAlgorithm { algorithm: Compression },
    UnknownAlgorithm { code: u8 },
    CorruptStream { detail: String },
    TlvTruncatedHeader,
    TlvLengthOverrun { kind: u8, length: u16 },
}

impl SkipReason {
    /// Short name used for grouping in the summary.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            SkipReason::TruncatedHeader | SkipReason::TlvTruncatedHeader => "truncated_header",
            SkipReason::TruncatedPayload => "truncated_payload",
            SkipReason::WrongKeyOrTampered => "wrong_key_or_tampered",
            SkipReason::NonceLengthInvalid { .. } => "nonce_length_invalid",
            SkipReason::UnsupportedAlgorithm { .. } => "unsupported_algorithm",
            SkipReason::UnknownAlgorithm { .. } => "unknown_algorithm",
            SkipReason::CorruptStream { .. } => "corrupt_stream",
            SkipReason::TlvLengthOverrun { .. } => "length_overrun",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NonceLengthInvalid { got } => {
                write!(f, "nonce_length_invalid (got {got})")
            }
            SkipReason::UnsupportedAlgorithm { algorithm } => {
                write!(f, "unsupported_algorithm ({algorithm})")
            }
            SkipReason::UnknownAlgorithm { code } => {
                write!(f, "unknown_algorithm (code {code:#x})")
            }
            SkipReason::CorruptStream { detail } => write!(f, "corrupt_stream ({detail})"),
            SkipReason::TlvLengthOverrun { kind, length } => {
                write!(f, "length_overrun (type {kind:#04x}, length {length})")
            }
            other => write!(f, "{}", other.label()),
        }
    }
}

/// Final disposition of one block.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum Outcome {
    Ok,
    Skipped { stage: Stage, reason: SkipReason },
}

/// A recoverable oddity observed while a block still produced output.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "warning")]
pub enum Warning {
    /// Inflated length differed from the header's `raw_size`.
    RawSizeMismatch { expected: u32, actual: usize },
    /// Reserved bits of the flags byte were set.
    ReservedFlags { bits: u8 },
}

/// One row of the block ledger.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerEntry {
    /// `None` only when the stream ended before a full header.
    pub block_id: Option<u16>,
    /// Absolute offset of the block's first byte.
    pub offset: u64,
    pub bytes_consumed: usize,
    /// Records retained from this block. May be non-zero even for a
    /// `tlv`-skipped block, since records decoded before a tail skip are
    /// kept.
    pub records_produced: usize,
    pub outcome: Outcome,
    pub warnings: Vec<Warning>,
}

/// Diagnostic event severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Error,
}

/// A structured diagnostic emitted by the driver.
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticEvent {
    pub block_id: Option<u16>,
    pub stage: Stage,
    pub severity: Severity,
    pub reason: String,
}

/// Sink for driver diagnostics. The default [TracingSink] forwards events
/// to `tracing`.
pub trait Diagnostics {
    fn event(&mut self, event: DiagnosticEvent);
}

#[derive(Debug, Default)]
pub struct TracingSink;

impl Diagnostics for TracingSink {
    fn event(&mut self, event: DiagnosticEvent) {
        match event.severity {
            Severity::Warning => warn!(
                block_id = event.block_id,
                stage = %event.stage,
                "{}", event.reason
            ),
            Severity::Error => error!(
                block_id = event.block_id,
                stage = %event.stage,
                "{}", event.reason
            ),
        }
    }
}

/// Aggregate counters over a whole run.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub blocks_seen: usize,
    pub blocks_ok: usize,
    pub blocks_skipped: usize,
    /// Skip counts keyed `stage/reason`.
    pub skipped: BTreeMap<String, usize>,
    /// Record counts keyed by record kind name.
    pub records: BTreeMap<String, usize>,
    pub total_records: usize,
    /// Smallest Timestamp value seen, in microseconds since the epoch.
    pub first_timestamp: Option<u64>,
    /// Largest Timestamp value seen, in microseconds since the epoch.
    pub last_timestamp: Option<u64>,
    pub bytes_consumed: u64,
    pub cancelled: bool,
}

/// Everything a run produces: per-kind ordered record sequences, the block
/// ledger, and the aggregate summary. Record order within each sequence
/// follows block order, then cursor order within a block.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct Decoded {
    pub imu: Vec<Record>,
    pub temperature: Vec<Record>,
    pub health: Vec<Record>,
    pub session: Vec<Record>,
    pub timestamps: Vec<Record>,
    pub raw: Vec<Record>,
    pub malformed: Vec<Record>,
    pub ledger: Vec<LedgerEntry>,
    pub summary: Summary,
}

impl Decoded {
    fn add_record(&mut self, record: Record) {
        if let Value::Timestamp { microseconds } = record.value {
            self.summary.first_timestamp = Some(match self.summary.first_timestamp {
                Some(cur) => cur.min(microseconds),
                None => microseconds,
            });
            self.summary.last_timestamp = Some(match self.summary.last_timestamp {
                Some(cur) => cur.max(microseconds),
                None => microseconds,
            });
        }

        let (name, seq) = match record.value {
            Value::Imu(_) => ("imu", &mut self.imu),
            Value::Temperature(_) => ("temperature", &mut self.temperature),
            Value::Health(_) => ("health", &mut self.health),
            Value::Session(_) => ("session", &mut self.session),
            Value::Timestamp { .. } => ("timestamp", &mut self.timestamps),
            Value::Raw { .. } => ("raw", &mut self.raw),
            Value::Malformed { .. } => ("malformed", &mut self.malformed),
        };
        *self.summary.records.entry(name.to_string()).or_default() += 1;
        self.summary.total_records += 1;
        seq.push(record);
    }

    fn push_entry(&mut self, entry: LedgerEntry) {
        self.summary.blocks_seen += 1;
        self.summary.bytes_consumed += entry.bytes_consumed as u64;
        match &entry.outcome {
            Outcome::Ok => self.summary.blocks_ok += 1,
            Outcome::Skipped { stage, reason } => {
                self.summary.blocks_skipped += 1;
                *self
                    .summary
                    .skipped
                    .entry(format!("{stage}/{}", reason.label()))
                    .or_default() += 1;
            }
        }
        self.ledger.push(entry);
    }

    /// The per-kind sequences in a fixed order, for exporters that
    /// iterate rather than pick fields.
    #[must_use]
    pub fn sequences(&self) -> [(&'static str, &[Record]); 7] {
        [
            ("imu", self.imu.as_slice()),
            ("temperature", self.temperature.as_slice()),
            ("health", self.health.as_slice()),
            ("session", self.session.as_slice()),
            ("timestamp", self.timestamps.as_slice()),
            ("raw", self.raw.as_slice()),
            ("malformed", self.malformed.as_slice()),
        ]
    }
}

/// Runs the decode pipeline over a byte source.
pub struct Decoder {
    unsealer: Unsealer,
    compression_override: Option<Compression>,
    max_block_size: u32,
    cancel: Option<Arc<AtomicBool>>,
    sink: Box<dyn Diagnostics>,
}

impl Decoder {
    /// Create a decoder with default limits for the given 32-byte key.
    ///
    /// # Errors
    /// [Error::Config] if the key is invalid.
    pub fn new(key: &[u8]) -> Result<Self> {
        Ok(Decoder {
            unsealer: Unsealer::new(key)?,
            compression_override: None,
            max_block_size: DEFAULT_MAX_BLOCK_SIZE,
            cancel: None,
            sink: Box::new(TracingSink),
        })
    }

    /// Create a decoder from a validated configuration.
    pub fn from_config(config: &DecodeConfig) -> Result<Self> {
        let mut decoder = Decoder::new(&config.key)?;
        decoder.unsealer = decoder
            .unsealer
            .with_failure_threshold(config.key_failure_threshold);
        decoder.compression_override = config.compression;
        decoder.max_block_size = config.max_block_size;
        Ok(decoder)
    }

    /// Force a compression algorithm, ignoring each block's flags.
    pub fn with_compression(mut self, algorithm: Compression) -> Self {
        self.compression_override = Some(algorithm);
        self
    }

    pub fn with_max_block_size(mut self, max: u32) -> Self {
        self.max_block_size = max;
        self
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.unsealer = self.unsealer.with_failure_threshold(threshold);
        self
    }

    /// Install a cancellation flag, polled between blocks.
    pub fn with_cancel(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Install a diagnostics sink replacing the default tracing sink.
    pub fn with_diagnostics(mut self, sink: Box<dyn Diagnostics>) -> Self {
        self.sink = sink;
        self
    }

    /// Decode every obtainable block from `reader`.
    ///
    /// # Errors
    /// [Error::Io] on byte-source failures and [Error::KeyLikelyWrong]
    /// when the tag-failure threshold is reached before any block
    /// succeeds. Per-block failures are ledger entries, not errors.
    pub fn decode<R: Read>(mut self, reader: R) -> Result<Decoded> {
        let mut out = Decoded::default();
        let blocks = BlockReader::new(reader).with_max_block_size(self.max_block_size);

        for event in blocks {
            if let Some(flag) = &self.cancel {
                if flag.load(Ordering::Relaxed) {
                    debug!("cancellation requested; stopping between blocks");
                    out.summary.cancelled = true;
                    break;
                }
            }

            match event? {
                ReadEvent::Truncated {
                    at,
                    header,
                    consumed,
                    reason,
                } => {
                    let reason = match reason {
                        Truncation::TruncatedHeader => SkipReason::TruncatedHeader,
                        Truncation::TruncatedPayload => SkipReason::TruncatedPayload,
                    };
                    let block_id = header.map(|h| h.block_id);
                    self.emit(block_id, Stage::Frame, Severity::Warning, reason.to_string());
                    out.push_entry(LedgerEntry {
                        block_id,
                        offset: at,
                        bytes_consumed: consumed,
                        records_produced: 0,
                        outcome: Outcome::Skipped {
                            stage: Stage::Frame,
                            reason,
                        },
                        warnings: Vec::new(),
                    });
                }
                ReadEvent::Block(block) => self.process_block(block, &mut out)?,
            }
        }

        debug!(
            blocks = out.summary.blocks_seen,
            records = out.summary.total_records,
            "decode complete"
        );
        Ok(out)
    }

    fn process_block(&mut self, block: Block, out: &mut Decoded) -> Result<()> {
        let block_id = block.header.block_id;
        let offset = block.offset;
        let bytes_consumed = block.wire_len();

        let mut warnings = Vec::new();
        let reserved = reserved_flag_bits(block.header.flags);
        if reserved != 0 {
            warnings.push(Warning::ReservedFlags { bits: reserved });
            self.emit(
                Some(block_id),
                Stage::Frame,
                Severity::Warning,
                format!("reserved flag bits set: {reserved:#04x}"),
            );
        }

        let plaintext = match self.unsealer.open(&block) {
            Ok(plaintext) => plaintext,
            Err(failure) => {
                let reason = match failure {
                    UnsealFailure::WrongKeyOrTampered => SkipReason::WrongKeyOrTampered,
                    UnsealFailure::NonceLengthInvalid { got } => {
                        SkipReason::NonceLengthInvalid { got }
                    }
                };
                self.emit(
                    Some(block_id),
                    Stage::Crypto,
                    Severity::Warning,
                    reason.to_string(),
                );
                out.push_entry(LedgerEntry {
                    block_id: Some(block_id),
                    offset,
                    bytes_consumed,
                    records_produced: 0,
                    outcome: Outcome::Skipped {
                        stage: Stage::Crypto,
                        reason,
                    },
                    warnings,
                });

                if self.unsealer.key_exhausted() {
                    let failures = self.unsealer.failures();
                    self.emit(
                        Some(block_id),
                        Stage::Crypto,
                        Severity::Error,
                        format!("{failures} authentication failures with no success; aborting"),
                    );
                    return Err(Error::KeyLikelyWrong {
                        failures,
                        partial: Box::new(std::mem::take(out)),
                    });
                }
                return Ok(());
            }
        };

        let algorithm = match self.compression_override {
            Some(algorithm) => Some(algorithm),
            None => Compression::from_flags(block.header.flags),
        };
        let inflated = match algorithm {
            Some(algorithm) => match compression::inflate(algorithm, &plaintext) {
                Ok(inflated) => inflated,
                Err(failure) => {
                    let reason = match failure {
                        InflateFailure::Unsupported(algorithm) => {
                            SkipReason::UnsupportedAlgorithm { algorithm }
                        }
                        InflateFailure::Corrupt(detail) => SkipReason::CorruptStream { detail },
                    };
                    self.emit(
                        Some(block_id),
                        Stage::Decompress,
                        Severity::Warning,
                        reason.to_string(),
                    );
                    out.push_entry(LedgerEntry {
                        block_id: Some(block_id),
                        offset,
                        bytes_consumed,
                        records_produced: 0,
                        outcome: Outcome::Skipped {
                            stage: Stage::Decompress,
                            reason,
                        },
                        warnings,
                    });
                    return Ok(());
                }
            },
            None => {
                let reason = SkipReason::UnknownAlgorithm {
                    code: block.header.flags & 0x0f,
                };
                self.emit(
                    Some(block_id),
                    Stage::Decompress,
                    Severity::Warning,
                    reason.to_string(),
                );
                out.push_entry(LedgerEntry {
                    block_id: Some(block_id),
                    offset,
                    bytes_consumed,
                    records_produced: 0,
                    outcome: Outcome::Skipped {
                        stage: Stage::Decompress,
                        reason,
                    },
                    warnings,
                });
                return Ok(());
            }
        };

        if inflated.len() != block.header.raw_size as usize {
            warnings.push(Warning::RawSizeMismatch {
                expected: block.header.raw_size,
                actual: inflated.len(),
            });
            self.emit(
                Some(block_id),
                Stage::Decompress,
                Severity::Warning,
                format!(
                    "inflated length {} differs from declared raw_size {}",
                    inflated.len(),
                    block.header.raw_size
                ),
            );
        }

        let scanned = tlv::scan(&inflated, block_id);
        let records_produced = scanned.records.len();
        for record in scanned.records {
            out.add_record(record);
        }

        let outcome = match scanned.tail_skip {
            None => Outcome::Ok,
            Some(tail) => {
                let reason = match tail {
                    TailSkip::TruncatedHeader => SkipReason::TlvTruncatedHeader,
                    TailSkip::LengthOverrun { kind, length } => {
                        SkipReason::TlvLengthOverrun { kind, length }
                    }
                };
                self.emit(
                    Some(block_id),
                    Stage::Tlv,
                    Severity::Warning,
                    reason.to_string(),
                );
                Outcome::Skipped {
                    stage: Stage::Tlv,
                    reason,
                }
            }
        };

        out.push_entry(LedgerEntry {
            block_id: Some(block_id),
            offset,
            bytes_consumed,
            records_produced,
            outcome,
            warnings,
        });
        Ok(())
    }

    fn emit(
        &mut self,
        block_id: Option<u16>,
        stage: Stage,
        severity: Severity,
        reason: impl Into<String>,
    ) {
        self.sink.event(DiagnosticEvent {
            block_id,
            stage,
            severity,
            reason: reason.into(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tlv::ImuSample;

    fn record(block_id: u16, index: u32, value: Value) -> Record {
        Record {
            block_id,
            index,
            timestamp: None,
            value,
        }
    }

    #[test]
    fn add_record_routes_by_kind_and_tracks_timestamps() {
        let mut out = Decoded::default();
        out.add_record(record(
            0,
            0,
            Value::Imu(ImuSample {
                accel_x: 0.0,
                accel_y: 0.0,
                accel_z: 0.0,
                gyro_x: 0.0,
                gyro_y: 0.0,
                gyro_z: 0.0,
            }),
        ));
        out.add_record(record(0, 1, Value::Timestamp { microseconds: 500 }));
        out.add_record(record(0, 2, Value::Timestamp { microseconds: 100 }));

        assert_eq!(out.imu.len(), 1);
        assert_eq!(out.timestamps.len(), 2);
        assert_eq!(out.summary.total_records, 3);
        assert_eq!(out.summary.records["imu"], 1);
        assert_eq!(out.summary.records["timestamp"], 2);
        assert_eq!(out.summary.first_timestamp, Some(100));
        assert_eq!(out.summary.last_timestamp, Some(500));
    }

    #[test]
    fn push_entry_groups_skips_by_stage_and_reason() {
        let mut out = Decoded::default();
        for _ in 0..2 {
            out.push_entry(LedgerEntry {
                block_id: Some(1),
                offset: 0,
                bytes_consumed: 40,
                records_produced: 0,
                outcome: Outcome::Skipped {
                    stage: Stage::Crypto,
                    reason: SkipReason::WrongKeyOrTampered,
                },
                warnings: Vec::new(),
            });
        }
        out.push_entry(LedgerEntry {
            block_id: Some(2),
            offset: 80,
            bytes_consumed: 40,
            records_produced: 3,
            outcome: Outcome::Ok,
            warnings: Vec::new(),
        });

        assert_eq!(out.summary.blocks_seen, 3);
        assert_eq!(out.summary.blocks_ok, 1);
        assert_eq!(out.summary.blocks_skipped, 2);
        assert_eq!(out.summary.skipped["crypto/wrong_key_or_tampered"], 2);
        assert_eq!(out.summary.bytes_consumed, 120);
    }
}
