//! LG-1.0 block framing.
//!
//! A capture file is a bare concatenation of blocks with no file header,
//! magic number, or sync marker. Each block is a fixed 12-byte header
//! followed by a sealed payload of `nonce ‖ ciphertext ‖ tag`. Because the
//! format has no sync marker the reader never attempts re-synchronization:
//! a header it cannot trust terminates the stream.

use std::io::Read;

use serde::Serialize;
use tracing::debug;

use crate::bytes::{Counted, Fill};
use crate::Result;

/// AES-GCM authentication tag length in bytes.
pub const TAG_LEN: usize = 16;

/// Default upper bound on `compressed_size`, 64 MiB.
pub const DEFAULT_MAX_BLOCK_SIZE: u32 = 64 * 1024 * 1024;

/// Contents of an LG-1.0 block header.
///
/// `block_id` increases monotonically in a well-formed file, but the reader
/// does not assume uniqueness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BlockHeader {
    /// Expected plaintext length after decompression.
    pub raw_size: u32,
    /// Ciphertext length, excluding nonce and tag.
    pub compressed_size: u32,
    /// Low nibble selects the compression algorithm; upper bits are
    /// reserved and must be zero.
    pub flags: u8,
    /// Nonce length in bytes. EN-1.0 requires 12.
    pub nonce_size: u8,
    pub block_id: u16,
}

impl BlockHeader {
    /// Block header length in bytes.
    pub const LEN: usize = 12;

    /// Decode a header from exactly [Self::LEN] little-endian bytes.
    #[must_use]
    pub fn decode(dat: &[u8; Self::LEN]) -> Self {
        BlockHeader {
            raw_size: u32::from_le_bytes([dat[0], dat[1], dat[2], dat[3]]),
            compressed_size: u32::from_le_bytes([dat[4], dat[5], dat[6], dat[7]]),
            flags: dat[8],
            nonce_size: dat[9],
            block_id: u16::from_le_bytes([dat[10], dat[11]]),
        }
    }

    /// Length of the sealed payload that must follow this header.
    #[must_use]
    pub fn sealed_len(&self) -> usize {
        self.nonce_size as usize + self.compressed_size as usize + TAG_LEN
    }
}

/// A single framed block: header plus the sealed payload bytes.
#[derive(Debug, Clone)]
pub struct Block {
    pub header: BlockHeader,
    /// Absolute offset of the header's first byte in the input.
    pub offset: u64,
    payload: Vec<u8>,
}

impl Block {
    /// The nonce prefix of the sealed payload.
    #[must_use]
    pub fn nonce(&self) -> &[u8] {
        &self.payload[..self.header.nonce_size as usize]
    }

    /// Ciphertext followed by the 16-byte tag.
    #[must_use]
    pub fn ciphertext_and_tag(&self) -> &[u8] {
        &self.payload[self.header.nonce_size as usize..]
    }

    /// Total bytes this block occupies in the input, header included.
    #[must_use]
    pub fn wire_len(&self) -> usize {
        BlockHeader::LEN + self.payload.len()
    }

    /// True when the block carries no ciphertext at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.header.compressed_size == 0
    }
}

/// Why the stream ended before a complete block could be framed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Truncation {
    /// Fewer than 12 bytes remained, or the header fields were absurd
    /// (zero-length nonce, oversize ciphertext).
    TruncatedHeader,
    /// The header was plausible but the payload it declared was not fully
    /// present.
    TruncatedPayload,
}

/// One step of block framing.
///
/// Truncation is terminal: after a [ReadEvent::Truncated] the iterator
/// ends. It is also non-fatal, since everything obtainable from the file
/// has already been produced.
#[derive(Debug, Clone)]
pub enum ReadEvent {
    Block(Block),
    Truncated {
        /// Offset of the fragment that could not be framed.
        at: u64,
        /// Header of the fragment, when enough bytes were present to
        /// decode one.
        header: Option<BlockHeader>,
        /// Bytes of the trailing fragment that were consumed.
        consumed: usize,
        reason: Truncation,
    },
}

/// Lazily reads LG-1.0 blocks from a byte stream.
///
/// The reader consumes exactly `12 + nonce_size + compressed_size + 16`
/// bytes per block, plus at most one partial trailing fragment.
///
/// # Example
/// ```no_run
/// use std::fs::File;
/// use sbw::block::{BlockReader, ReadEvent};
///
/// let file = File::open("capture.sbw").unwrap();
/// for event in BlockReader::new(file) {
///     match event.unwrap() {
///         ReadEvent::Block(block) => println!("block {}", block.header.block_id),
///         ReadEvent::Truncated { at, .. } => println!("truncated at {at}"),
///     }
/// }
/// ```
pub struct BlockReader<R>
where
    R: Read,
{
    bytes: Counted<R>,
    max_block_size: u32,
    done: bool,
}

impl<R> BlockReader<R>
where
    R: Read,
{
    pub fn new(reader: R) -> Self {
        BlockReader {
            bytes: Counted::new(reader),
            max_block_size: DEFAULT_MAX_BLOCK_SIZE,
            done: false,
        }
    }

    pub fn with_max_block_size(mut self, max: u32) -> Self {
        self.max_block_size = max;
        self
    }

    fn read_one(&mut self) -> Result<Option<ReadEvent>> {
        let at = self.bytes.consumed();

        let mut hdr = [0u8; BlockHeader::LEN];
        match self.bytes.fill(&mut hdr)? {
            Fill::Eof => return Ok(None),
            Fill::Short(n) => {
                debug!(at, got = n, "partial header at end of stream");
                return Ok(Some(ReadEvent::Truncated {
                    at,
                    header: None,
                    consumed: n,
                    reason: Truncation::TruncatedHeader,
                }));
            }
            Fill::Full => {}
        }

        let header = BlockHeader::decode(&hdr);
        if header.nonce_size == 0 || header.compressed_size > self.max_block_size {
            debug!(
                at,
                block_id = header.block_id,
                nonce_size = header.nonce_size,
                compressed_size = header.compressed_size,
                "header fields not plausible; ending stream"
            );
            return Ok(Some(ReadEvent::Truncated {
                at,
                header: Some(header),
                consumed: BlockHeader::LEN,
                reason: Truncation::TruncatedHeader,
            }));
        }

        let mut payload = vec![0u8; header.sealed_len()];
        match self.bytes.fill(&mut payload)? {
            Fill::Full => Ok(Some(ReadEvent::Block(Block {
                header,
                offset: at,
                payload,
            }))),
            Fill::Eof | Fill::Short(_) => {
                let consumed = (self.bytes.consumed() - at) as usize;
                debug!(
                    at,
                    block_id = header.block_id,
                    need = header.sealed_len(),
                    got = consumed - BlockHeader::LEN,
                    "payload truncated at end of stream"
                );
                Ok(Some(ReadEvent::Truncated {
                    at,
                    header: Some(header),
                    consumed,
                    reason: Truncation::TruncatedPayload,
                }))
            }
        }
    }
}

impl<R> Iterator for BlockReader<R>
where
    R: Read,
{
    type Item = Result<ReadEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.read_one() {
            Ok(Some(event)) => {
                if matches!(event, ReadEvent::Truncated { .. }) {
                    self.done = true;
                }
                Some(Ok(event))
            }
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}
