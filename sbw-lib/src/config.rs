//! Run configuration.
//!
//! Options are an explicit, enumerated set loaded from a JSON document
//! with `crypto`, `compression`, and `limits` sections. Unknown keys are
//! ignored with a warning so configs written for newer tool versions still
//! load.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::Deserialize;
use tracing::warn;
use zeroize::Zeroizing;

use crate::block::DEFAULT_MAX_BLOCK_SIZE;
use crate::compression::Compression;
use crate::crypto::{self, DEFAULT_KEY_FAILURE_THRESHOLD};
use crate::{Error, Result};

/// Default cap on input file size, 100 MB.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 100_000_000;

/// Validated decode configuration.
#[derive(Clone)]
pub struct DecodeConfig {
    /// 32-byte AES-256-GCM key. Wiped when the config is dropped.
    pub key: Zeroizing<Vec<u8>>,
    /// When set, overrides the compression algorithm indicated by each
    /// block's flags.
    pub compression: Option<Compression>,
    pub max_file_size: u64,
    pub max_block_size: u32,
    pub key_failure_threshold: u32,
}

impl fmt::Debug for DecodeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodeConfig")
            .field("key", &"[redacted]")
            .field("compression", &self.compression)
            .field("max_file_size", &self.max_file_size)
            .field("max_block_size", &self.max_block_size)
            .field("key_failure_threshold", &self.key_failure_threshold)
            .finish()
    }
}

impl DecodeConfig {
    /// Configuration with default limits for the given key.
    ///
    /// # Errors
    /// [Error::Config] if the key is invalid.
    pub fn new(key: &[u8]) -> Result<Self> {
        crypto::validate_key(key)?;
        Ok(DecodeConfig {
            key: Zeroizing::new(key.to_vec()),
            compression: None,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            max_block_size: DEFAULT_MAX_BLOCK_SIZE,
            key_failure_threshold: DEFAULT_KEY_FAILURE_THRESHOLD,
        })
    }

    /// Load configuration from a JSON file.
    ///
    /// # Errors
    /// [Error::Io] if the file cannot be read, [Error::Config] for
    /// malformed JSON or invalid option values.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Parse configuration from a JSON document.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let raw: RawConfig = serde_json::from_str(text)
            .map_err(|err| Error::Config(format!("malformed config: {err}")))?;
        raw.resolve()
    }
}

/// Decode a key given as hex or standard base64.
pub fn parse_key(text: &str) -> Result<Zeroizing<Vec<u8>>> {
    let text = text.trim();
    let decoded = match hex::decode(text) {
        Ok(bytes) => bytes,
        Err(_) => BASE64
            .decode(text)
            .map_err(|_| Error::Config("crypto.key is neither hex nor base64".to_string()))?,
    };
    crypto::validate_key(&decoded)?;
    Ok(Zeroizing::new(decoded))
}

fn warn_unknown(section: &str, unknown: &HashMap<String, serde_json::Value>) {
    for key in unknown.keys() {
        warn!(section, key, "ignoring unknown config option");
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawConfig {
    crypto: RawCrypto,
    compression: RawCompression,
    limits: RawLimits,
    #[serde(flatten)]
    unknown: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawCrypto {
    key: Option<String>,
    algorithm: Option<String>,
    tag_length: Option<u32>,
    nonce_length: Option<u32>,
    #[serde(flatten)]
    unknown: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawCompression {
    algorithm: Option<String>,
    #[serde(flatten)]
    unknown: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawLimits {
    max_file_size: Option<u64>,
    max_block_size: Option<u64>,
    key_failure_threshold: Option<u32>,
    #[serde(flatten)]
    unknown: HashMap<String, serde_json::Value>,
}

impl RawConfig {
    fn resolve(self) -> Result<DecodeConfig> {
        warn_unknown("", &self.unknown);
        warn_unknown("crypto", &self.crypto.unknown);
        warn_unknown("compression", &self.compression.unknown);
        warn_unknown("limits", &self.limits.unknown);

        if let Some(algorithm) = &self.crypto.algorithm {
            if algorithm != "AES-GCM" {
                return Err(Error::Config(format!(
                    "crypto.algorithm must be \"AES-GCM\", got {algorithm:?}"
                )));
            }
        }
        if let Some(tag_length) = self.crypto.tag_length {
            if tag_length != 16 {
                return Err(Error::Config(format!(
                    "crypto.tag_length must be 16, got {tag_length}"
                )));
            }
        }
        if let Some(nonce_length) = self.crypto.nonce_length {
            if nonce_length != 12 {
                return Err(Error::Config(format!(
                    "crypto.nonce_length must be 12, got {nonce_length}"
                )));
            }
        }

        let key = match &self.crypto.key {
            Some(text) => parse_key(text)?,
            None => return Err(Error::Config("crypto.key is required".to_string())),
        };

        let compression = match &self.compression.algorithm {
            Some(name) => Some(name.parse::<Compression>().map_err(Error::Config)?),
            None => None,
        };

        let max_file_size = self.limits.max_file_size.unwrap_or(DEFAULT_MAX_FILE_SIZE);
        if max_file_size == 0 {
            return Err(Error::Config("limits.max_file_size must be non-zero".to_string()));
        }

        let max_block_size = match self.limits.max_block_size {
            Some(size) => {
                if size == 0 || size > u64::from(u32::MAX) {
                    return Err(Error::Config(format!(
                        "limits.max_block_size out of range: {size}"
                    )));
                }
                size as u32
            }
            None => DEFAULT_MAX_BLOCK_SIZE,
        };

        let key_failure_threshold = self
            .limits
            .key_failure_threshold
            .unwrap_or(DEFAULT_KEY_FAILURE_THRESHOLD);
        if key_failure_threshold == 0 {
            return Err(Error::Config(
                "limits.key_failure_threshold must be non-zero".to_string(),
            ));
        }

        Ok(DecodeConfig {
            key,
            compression,
            max_file_size,
            max_block_size,
            key_failure_threshold,
        })
    }
}
