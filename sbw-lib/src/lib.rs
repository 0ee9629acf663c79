//! Decoding of Shoot-By-Wire telemetry capture files.
//!
//! A capture file is a concatenation of self-describing blocks (LG-1.0),
//! each sealed with AES-256-GCM (EN-1.0) and optionally LZ4-compressed.
//! The plaintext of a block is a stream of TLV records (TL-1.0) carrying
//! IMU samples, temperatures, health metrics, session metadata, and
//! timestamps.
//!
//! The pipeline parses untrusted input without panicking, enforces
//! cryptographic integrity, and keeps going past corrupt blocks: each
//! block ends up either recorded or skipped, and both dispositions appear
//! in the run's ledger.
//!
//! # Example
//! ```no_run
//! use std::fs::File;
//! use sbw::decode::Decoder;
//!
//! let key = std::fs::read("session.key").unwrap();
//! let decoded = Decoder::new(&key)
//!     .unwrap()
//!     .decode(File::open("flight.sbw").unwrap())
//!     .unwrap();
//!
//! for record in &decoded.imu {
//!     println!("block {} record {}: {:?}", record.block_id, record.index, record.value);
//! }
//! println!("{} of {} blocks ok", decoded.summary.blocks_ok, decoded.summary.blocks_seen);
//! ```

mod bytes;
mod error;

pub mod block;
pub mod compression;
pub mod config;
pub mod crypto;
pub mod decode;
pub mod tlv;

pub use error::{Error, Result};
