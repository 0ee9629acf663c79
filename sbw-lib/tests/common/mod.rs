//! Shared fixtures: a reference encoder producing sealed capture bytes so
//! the decode pipeline can be exercised end-to-end.

use std::io::Write;

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};

pub const TAG_LEN: usize = 16;

/// 32 bytes of a repeating 11 22 33 pattern; passes key validation.
pub fn test_key() -> [u8; 32] {
    let mut key = [0u8; 32];
    for (i, b) in key.iter_mut().enumerate() {
        *b = [0x11, 0x22, 0x33][i % 3];
    }
    key
}

pub struct BlockSpec {
    pub block_id: u16,
    pub flags: u8,
    pub plaintext: Vec<u8>,
    /// When set, written to the header instead of the true plaintext
    /// length.
    pub declared_raw_size: Option<u32>,
}

impl BlockSpec {
    pub fn new(block_id: u16, flags: u8, plaintext: Vec<u8>) -> Self {
        BlockSpec {
            block_id,
            flags,
            plaintext,
            declared_raw_size: None,
        }
    }
}

/// Seal one block: compress per the flags low nibble, encrypt with
/// AES-256-GCM and a per-block nonce, and prepend the 12-byte header.
pub fn seal_block(key: &[u8], spec: &BlockSpec) -> Vec<u8> {
    let compressed = match spec.flags & 0x0f {
        0x0 => spec.plaintext.clone(),
        0x1 => {
            let mut encoder = lz4_flex::frame::FrameEncoder::new(Vec::new());
            encoder.write_all(&spec.plaintext).unwrap();
            encoder.finish().unwrap()
        }
        other => panic!("reference encoder cannot compress with algorithm {other:#x}"),
    };

    let mut nonce = [0u8; 12];
    nonce[..2].copy_from_slice(&spec.block_id.to_le_bytes());
    nonce[11] = 0xc5;

    let cipher = Aes256Gcm::new_from_slice(key).unwrap();
    let sealed = cipher
        .encrypt(
            Nonce::from_slice(&nonce),
            Payload {
                msg: &compressed,
                aad: b"",
            },
        )
        .unwrap();
    assert_eq!(sealed.len(), compressed.len() + TAG_LEN);

    let raw_size = spec
        .declared_raw_size
        .unwrap_or(spec.plaintext.len() as u32);

    let mut out = Vec::with_capacity(12 + nonce.len() + sealed.len());
    out.extend_from_slice(&raw_size.to_le_bytes());
    out.extend_from_slice(&(compressed.len() as u32).to_le_bytes());
    out.push(spec.flags);
    out.push(nonce.len() as u8);
    out.extend_from_slice(&spec.block_id.to_le_bytes());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&sealed);
    out
}

pub fn capture(key: &[u8], specs: &[BlockSpec]) -> Vec<u8> {
    specs.iter().flat_map(|s| seal_block(key, s)).collect()
}

pub fn tlv(kind: u8, payload: &[u8]) -> Vec<u8> {
    let mut dat = vec![kind];
    dat.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    dat.extend_from_slice(payload);
    dat
}

pub fn imu_tlv(accel: [f32; 3], gyro: [f32; 3]) -> Vec<u8> {
    let payload: Vec<u8> = accel
        .iter()
        .chain(gyro.iter())
        .flat_map(|v| v.to_le_bytes())
        .collect();
    tlv(0x01, &payload)
}

pub fn temperature_tlv(temperature: f32, sensor_id: u32) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(&temperature.to_le_bytes());
    payload.extend_from_slice(&sensor_id.to_le_bytes());
    tlv(0x02, &payload)
}

pub fn health_tlv(
    battery_voltage: f32,
    cpu_temperature: f32,
    memory_usage: u32,
    error_code: u32,
) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(&battery_voltage.to_le_bytes());
    payload.extend_from_slice(&cpu_temperature.to_le_bytes());
    payload.extend_from_slice(&memory_usage.to_le_bytes());
    payload.extend_from_slice(&error_code.to_le_bytes());
    tlv(0x03, &payload)
}

pub fn session_tlv(session_id: [u8; 16], firmware_version: u32, reserved: &[u8]) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(&session_id);
    payload.extend_from_slice(&firmware_version.to_le_bytes());
    payload.extend_from_slice(reserved);
    tlv(0x04, &payload)
}

pub fn timestamp_tlv(microseconds: u64) -> Vec<u8> {
    tlv(0x05, &microseconds.to_le_bytes())
}
