//! EN-1.0 authenticated decryption.
//!
//! AES-256-GCM with a 96-bit nonce, 128-bit tag, and empty AAD. The
//! unsealer either returns the full plaintext for a block or fails; it
//! never returns partial data.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use zeroize::Zeroizing;

use crate::block::Block;
use crate::{Error, Result};

/// EN-1.0 key length in bytes.
pub const KEY_LEN: usize = 32;

/// EN-1.0 nonce length in bytes.
pub const NONCE_LEN: usize = 12;

/// Default number of tag-mismatch failures tolerated before a run with no
/// successful block is abandoned.
pub const DEFAULT_KEY_FAILURE_THRESHOLD: u32 = 16;

/// Per-block unseal failure. These are recoverable: the driver records a
/// skip and moves on to the next block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnsealFailure {
    /// Tag verification failed. Either the key is wrong or the nonce,
    /// ciphertext, or tag bytes were altered.
    WrongKeyOrTampered,
    /// The header declared a nonce length other than 12.
    NonceLengthInvalid { got: u8 },
}

/// Validate key material for EN-1.0.
///
/// The key must be exactly 32 bytes and must not be a constant-byte
/// pattern (which covers the all-zero key).
pub fn validate_key(key: &[u8]) -> Result<()> {
    if key.len() != KEY_LEN {
        return Err(Error::Config(format!(
            "crypto key must be {KEY_LEN} bytes, got {}",
            key.len()
        )));
    }
    if key.iter().all(|b| *b == key[0]) {
        return Err(Error::Config(
            "crypto key is a constant-byte pattern".to_string(),
        ));
    }
    Ok(())
}

/// Authenticates and decrypts sealed block payloads.
///
/// Owns the run's key material for its lifetime; the key copy is zeroed
/// when the unsealer is dropped.
pub struct Unsealer {
    cipher: Aes256Gcm,
    // Held only so the material is wiped on drop.
    _key: Zeroizing<[u8; KEY_LEN]>,
    threshold: u32,
    failures: u32,
    successes: u64,
}

impl Unsealer {
    /// Create an unsealer for the given 32-byte key.
    ///
    /// # Errors
    /// [Error::Config] if the key fails [validate_key].
    pub fn new(key: &[u8]) -> Result<Self> {
        validate_key(key)?;
        let mut material = Zeroizing::new([0u8; KEY_LEN]);
        material.copy_from_slice(key);
        let cipher = Aes256Gcm::new_from_slice(&material[..])
            .map_err(|_| Error::Config("crypto key rejected by cipher".to_string()))?;
        Ok(Unsealer {
            cipher,
            _key: material,
            threshold: DEFAULT_KEY_FAILURE_THRESHOLD,
            failures: 0,
            successes: 0,
        })
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.threshold = threshold;
        self
    }

    /// Authenticate and decrypt one block, returning exactly
    /// `compressed_size` plaintext bytes on success.
    pub fn open(&mut self, block: &Block) -> std::result::Result<Vec<u8>, UnsealFailure> {
        if block.header.nonce_size as usize != NONCE_LEN {
            return Err(UnsealFailure::NonceLengthInvalid {
                got: block.header.nonce_size,
            });
        }
        let payload = Payload {
            msg: block.ciphertext_and_tag(),
            aad: b"",
        };
        match self.cipher.decrypt(Nonce::from_slice(block.nonce()), payload) {
            Ok(plaintext) => {
                self.successes += 1;
                Ok(plaintext)
            }
            Err(_) => {
                self.failures += 1;
                Err(UnsealFailure::WrongKeyOrTampered)
            }
        }
    }

    /// Count of tag-mismatch failures so far this run.
    #[must_use]
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// True once the failure threshold has been reached without a single
    /// successful block, i.e. the key is almost certainly wrong and the
    /// caller should stop rather than exhaust a large file.
    #[must_use]
    pub fn key_exhausted(&self) -> bool {
        self.successes == 0 && self.failures >= self.threshold
    }
}
