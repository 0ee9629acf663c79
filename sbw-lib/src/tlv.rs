//! TL-1.0 record parsing.
//!
//! Inflated block plaintext is a sequence of type-length-value records:
//! a 1-byte type, a 2-byte little-endian length, and exactly `length`
//! payload bytes. The scanner is forgiving at record granularity (an
//! unknown type or a schema mismatch costs only that record) and strict at
//! block granularity (a length that overruns the buffer discards the rest
//! of the block, since the cursor can no longer be trusted).

use serde::Serialize;

/// TL-1.0 record type registry.
pub mod kind {
    pub const IMU: u8 = 0x01;
    pub const TEMPERATURE: u8 = 0x02;
    pub const HEALTH: u8 = 0x03;
    pub const SESSION: u8 = 0x04;
    pub const TIMESTAMP: u8 = 0x05;
}

/// One IMU sample: accelerometer in m/s², gyro in rad/s.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ImuSample {
    pub accel_x: f32,
    pub accel_y: f32,
    pub accel_z: f32,
    pub gyro_x: f32,
    pub gyro_y: f32,
    pub gyro_z: f32,
}

impl ImuSample {
    /// Payload length mandated by TL-1.0.
    pub const LEN: usize = 24;
}

/// One temperature reading in °C with its source sensor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TemperatureSample {
    pub temperature: f32,
    pub sensor_id: u32,
}

impl TemperatureSample {
    pub const LEN: usize = 8;
}

/// System health snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HealthReading {
    pub battery_voltage: f32,
    pub cpu_temperature: f32,
    pub memory_usage: u32,
    pub error_code: u32,
}

impl HealthReading {
    pub const LEN: usize = 16;
}

/// Session metadata. Trailing bytes beyond the firmware version are
/// reserved by TL-1.0 and preserved here as an opaque blob.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionInfo {
    #[serde(serialize_with = "hex_upper")]
    pub session_id: [u8; 16],
    pub firmware_version: u32,
    #[serde(serialize_with = "hex_upper")]
    pub reserved: Vec<u8>,
}

impl SessionInfo {
    /// Minimum payload length mandated by TL-1.0.
    pub const MIN_LEN: usize = 20;

    #[must_use]
    pub fn session_id_hex(&self) -> String {
        hex::encode_upper(self.session_id)
    }
}

fn hex_upper<S, T>(bytes: &T, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
    T: AsRef<[u8]>,
{
    serializer.serialize_str(&hex::encode_upper(bytes.as_ref()))
}

/// The decoded body of a TLV record.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum Value {
    Imu(ImuSample),
    Temperature(TemperatureSample),
    Health(HealthReading),
    Session(SessionInfo),
    Timestamp {
        /// Microseconds since the Unix epoch.
        microseconds: u64,
    },
    /// A record of a type this decoder does not recognize. Preserved so
    /// exporters can log it rather than lose it.
    Raw {
        kind: u8,
        #[serde(serialize_with = "hex_upper")]
        payload: Vec<u8>,
    },
    /// A record of a known type whose payload violates the schema.
    Malformed {
        kind: u8,
        length: u16,
        reason: String,
    },
}

impl Value {
    /// The wire type byte this value was decoded from.
    #[must_use]
    pub fn kind(&self) -> u8 {
        match self {
            Value::Imu(_) => kind::IMU,
            Value::Temperature(_) => kind::TEMPERATURE,
            Value::Health(_) => kind::HEALTH,
            Value::Session(_) => kind::SESSION,
            Value::Timestamp { .. } => kind::TIMESTAMP,
            Value::Raw { kind, .. } | Value::Malformed { kind, .. } => *kind,
        }
    }
}

/// A decoded record with its provenance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    /// Block the record was decoded from.
    pub block_id: u16,
    /// Zero-based index of the record within its block.
    pub index: u32,
    /// Timestamp context in effect when the record was scanned, in
    /// microseconds since the Unix epoch. `None` for records before the
    /// first Timestamp record of their block.
    pub timestamp: Option<u64>,
    pub value: Value,
}

/// Why the scan stopped before the end of the buffer. Records produced
/// before the stop are retained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum TailSkip {
    /// 1 or 2 bytes remained, not enough for a record header.
    TruncatedHeader,
    /// A record's declared length ran past the end of the buffer.
    LengthOverrun { kind: u8, length: u16 },
}

/// Result of scanning one block's plaintext.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanOutput {
    pub records: Vec<Record>,
    pub tail_skip: Option<TailSkip>,
}

/// Walk `data` and decode every TLV record in cursor order.
///
/// The cursor advances by exactly `3 + length` per record. The timestamp
/// context updates after a Timestamp record is emitted, so the Timestamp
/// record itself carries the context that preceded it.
#[must_use]
pub fn scan(data: &[u8], block_id: u16) -> ScanOutput {
    let mut records: Vec<Record> = Vec::new();
    let mut context: Option<u64> = None;
    let mut cursor = 0usize;

    loop {
        let remaining = data.len() - cursor;
        if remaining == 0 {
            return ScanOutput {
                records,
                tail_skip: None,
            };
        }
        if remaining < 3 {
            return ScanOutput {
                records,
                tail_skip: Some(TailSkip::TruncatedHeader),
            };
        }

        let kind = data[cursor];
        let length = u16::from_le_bytes([data[cursor + 1], data[cursor + 2]]);
        if length as usize > remaining - 3 {
            return ScanOutput {
                records,
                tail_skip: Some(TailSkip::LengthOverrun { kind, length }),
            };
        }

        let payload = &data[cursor + 3..cursor + 3 + length as usize];
        let value = decode_value(kind, length, payload);
        let next_context = match &value {
            Value::Timestamp { microseconds } => Some(*microseconds),
            _ => None,
        };

        records.push(Record {
            block_id,
            index: records.len() as u32,
            timestamp: context,
            value,
        });
        if let Some(us) = next_context {
            context = Some(us);
        }

        cursor += 3 + length as usize;
    }
}

fn decode_value(kind: u8, length: u16, payload: &[u8]) -> Value {
    let zult = match kind {
        kind::IMU => decode_imu(payload),
        kind::TEMPERATURE => decode_temperature(payload),
        kind::HEALTH => decode_health(payload),
        kind::SESSION => decode_session(payload),
        kind::TIMESTAMP => decode_timestamp(payload),
        _ => {
            return Value::Raw {
                kind,
                payload: payload.to_vec(),
            }
        }
    };
    zult.unwrap_or_else(|reason| Value::Malformed {
        kind,
        length,
        reason,
    })
}

fn f32_le(dat: &[u8], at: usize) -> f32 {
    f32::from_le_bytes([dat[at], dat[at + 1], dat[at + 2], dat[at + 3]])
}

fn u32_le(dat: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([dat[at], dat[at + 1], dat[at + 2], dat[at + 3]])
}

fn decode_imu(payload: &[u8]) -> Result<Value, String> {
    if payload.len() != ImuSample::LEN {
        return Err(format!(
            "imu payload must be {} bytes, got {}",
            ImuSample::LEN,
            payload.len()
        ));
    }
    Ok(Value::Imu(ImuSample {
        accel_x: f32_le(payload, 0),
        accel_y: f32_le(payload, 4),
        accel_z: f32_le(payload, 8),
        gyro_x: f32_le(payload, 12),
        gyro_y: f32_le(payload, 16),
        gyro_z: f32_le(payload, 20),
    }))
}

fn decode_temperature(payload: &[u8]) -> Result<Value, String> {
    if payload.len() != TemperatureSample::LEN {
        return Err(format!(
            "temperature payload must be {} bytes, got {}",
            TemperatureSample::LEN,
            payload.len()
        ));
    }
    Ok(Value::Temperature(TemperatureSample {
        temperature: f32_le(payload, 0),
        sensor_id: u32_le(payload, 4),
    }))
}

fn decode_health(payload: &[u8]) -> Result<Value, String> {
    if payload.len() != HealthReading::LEN {
        return Err(format!(
            "health payload must be {} bytes, got {}",
            HealthReading::LEN,
            payload.len()
        ));
    }
    Ok(Value::Health(HealthReading {
        battery_voltage: f32_le(payload, 0),
        cpu_temperature: f32_le(payload, 4),
        memory_usage: u32_le(payload, 8),
        error_code: u32_le(payload, 12),
    }))
}

fn decode_session(payload: &[u8]) -> Result<Value, String> {
    if payload.len() < SessionInfo::MIN_LEN {
        return Err(format!(
            "session payload must be at least {} bytes, got {}",
            SessionInfo::MIN_LEN,
            payload.len()
        ));
    }
    let mut session_id = [0u8; 16];
    session_id.copy_from_slice(&payload[..16]);
    Ok(Value::Session(SessionInfo {
        session_id,
        firmware_version: u32_le(payload, 16),
        reserved: payload[SessionInfo::MIN_LEN..].to_vec(),
    }))
}

fn decode_timestamp(payload: &[u8]) -> Result<Value, String> {
    if payload.len() != 8 {
        return Err(format!(
            "timestamp payload must be 8 bytes, got {}",
            payload.len()
        ));
    }
    Ok(Value::Timestamp {
        microseconds: u64::from_le_bytes([
            payload[0], payload[1], payload[2], payload[3], payload[4], payload[5], payload[6],
            payload[7],
        ]),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tlv(kind: u8, payload: &[u8]) -> Vec<u8> {
        let mut dat = vec![kind];
        dat.extend_from_slice(&(payload.len() as u16).to_le_bytes());
        dat.extend_from_slice(payload);
        dat
    }

    fn imu_payload() -> Vec<u8> {
        [1.0f32, 2.0, 3.0, 0.1, 0.2, 0.3]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect()
    }

    #[test]
    fn empty_buffer_scans_cleanly() {
        let zult = scan(&[], 1);
        assert!(zult.records.is_empty());
        assert!(zult.tail_skip.is_none());
    }

    #[test]
    fn decode_imu_record() {
        let dat = tlv(kind::IMU, &imu_payload());
        let zult = scan(&dat, 9);

        assert_eq!(zult.records.len(), 1);
        assert!(zult.tail_skip.is_none());
        let record = &zult.records[0];
        assert_eq!(record.block_id, 9);
        assert_eq!(record.index, 0);
        assert_eq!(record.timestamp, None);
        match &record.value {
            Value::Imu(sample) => {
                assert_eq!(sample.accel_x.to_bits(), 1.0f32.to_bits());
                assert_eq!(sample.accel_y.to_bits(), 2.0f32.to_bits());
                assert_eq!(sample.accel_z.to_bits(), 3.0f32.to_bits());
                assert_eq!(sample.gyro_x.to_bits(), 0.1f32.to_bits());
                assert_eq!(sample.gyro_y.to_bits(), 0.2f32.to_bits());
                assert_eq!(sample.gyro_z.to_bits(), 0.3f32.to_bits());
            }
            other => panic!("expected imu, got {other:?}"),
        }
    }

    #[test]
    fn decode_temperature_and_health() {
        let mut temp = Vec::new();
        temp.extend_from_slice(&21.5f32.to_le_bytes());
        temp.extend_from_slice(&3u32.to_le_bytes());

        let mut health = Vec::new();
        health.extend_from_slice(&3.7f32.to_le_bytes());
        health.extend_from_slice(&45.5f32.to_le_bytes());
        health.extend_from_slice(&1_048_576u32.to_le_bytes());
        health.extend_from_slice(&0u32.to_le_bytes());

        let mut dat = tlv(kind::TEMPERATURE, &temp);
        dat.extend_from_slice(&tlv(kind::HEALTH, &health));
        let zult = scan(&dat, 0);

        assert_eq!(zult.records.len(), 2);
        match &zult.records[0].value {
            Value::Temperature(sample) => {
                assert_eq!(sample.temperature.to_bits(), 21.5f32.to_bits());
                assert_eq!(sample.sensor_id, 3);
            }
            other => panic!("expected temperature, got {other:?}"),
        }
        match &zult.records[1].value {
            Value::Health(reading) => {
                assert_eq!(reading.battery_voltage.to_bits(), 3.7f32.to_bits());
                assert_eq!(reading.cpu_temperature.to_bits(), 45.5f32.to_bits());
                assert_eq!(reading.memory_usage, 1_048_576);
                assert_eq!(reading.error_code, 0);
            }
            other => panic!("expected health, got {other:?}"),
        }
    }

    #[test]
    fn timestamp_context_applies_to_following_records_only() {
        let us: u64 = 1_700_000_000_000_000;
        let mut dat = tlv(kind::IMU, &imu_payload());
        dat.extend_from_slice(&tlv(kind::TIMESTAMP, &us.to_le_bytes()));
        dat.extend_from_slice(&tlv(kind::IMU, &imu_payload()));

        let zult = scan(&dat, 0);
        assert_eq!(zult.records.len(), 3);
        assert_eq!(zult.records[0].timestamp, None);
        // The timestamp record carries the context that preceded it.
        assert_eq!(zult.records[1].timestamp, None);
        assert_eq!(zult.records[2].timestamp, Some(us));
    }

    #[test]
    fn timestamp_context_does_not_cross_scan_calls() {
        let us: u64 = 42;
        let dat = tlv(kind::TIMESTAMP, &us.to_le_bytes());
        let _ = scan(&dat, 0);

        let zult = scan(&tlv(kind::IMU, &imu_payload()), 1);
        assert_eq!(zult.records[0].timestamp, None);
    }

    #[test]
    fn session_preserves_reserved_tail() {
        let mut payload = vec![0xaa; 16];
        payload.extend_from_slice(&0x0102_0304u32.to_le_bytes());
        payload.extend_from_slice(&[0xde, 0xad]);

        let zult = scan(&tlv(kind::SESSION, &payload), 0);
        match &zult.records[0].value {
            Value::Session(info) => {
                assert_eq!(info.session_id, [0xaa; 16]);
                assert_eq!(info.firmware_version, 0x0102_0304);
                assert_eq!(info.reserved, vec![0xde, 0xad]);
            }
            other => panic!("expected session, got {other:?}"),
        }
    }

    #[test]
    fn unknown_type_becomes_raw_and_scanning_continues() {
        let mut dat = tlv(0x7f, &[1, 2, 3]);
        dat.extend_from_slice(&tlv(kind::IMU, &imu_payload()));

        let zult = scan(&dat, 0);
        assert_eq!(zult.records.len(), 2);
        match &zult.records[0].value {
            Value::Raw { kind, payload } => {
                assert_eq!(*kind, 0x7f);
                assert_eq!(payload, &[1, 2, 3]);
            }
            other => panic!("expected raw, got {other:?}"),
        }
        assert!(matches!(zult.records[1].value, Value::Imu(_)));
    }

    #[test]
    fn malformed_record_does_not_stop_the_scan() {
        let us: u64 = 1_700_000_000_000_000;
        let mut dat = tlv(kind::IMU, &imu_payload());
        dat.extend_from_slice(&tlv(kind::TEMPERATURE, &[0u8; 7]));
        dat.extend_from_slice(&tlv(kind::TIMESTAMP, &us.to_le_bytes()));

        let zult = scan(&dat, 0);
        assert_eq!(zult.records.len(), 3);
        assert!(zult.tail_skip.is_none());
        assert!(matches!(zult.records[0].value, Value::Imu(_)));
        match &zult.records[1].value {
            Value::Malformed { kind, length, .. } => {
                assert_eq!(*kind, 0x02);
                assert_eq!(*length, 7);
            }
            other => panic!("expected malformed, got {other:?}"),
        }
        assert!(matches!(
            zult.records[2].value,
            Value::Timestamp {
                microseconds: 1_700_000_000_000_000
            }
        ));
    }

    #[test]
    fn malformed_timestamp_does_not_update_context() {
        let mut dat = tlv(kind::TIMESTAMP, &[0u8; 4]);
        dat.extend_from_slice(&tlv(kind::IMU, &imu_payload()));

        let zult = scan(&dat, 0);
        assert!(matches!(zult.records[0].value, Value::Malformed { .. }));
        assert_eq!(zult.records[1].timestamp, None);
    }

    #[test]
    fn trailing_partial_header_is_tail_skip() {
        let mut dat = tlv(kind::IMU, &imu_payload());
        dat.extend_from_slice(&[0x02, 0x08]);

        let zult = scan(&dat, 0);
        assert_eq!(zult.records.len(), 1);
        assert_eq!(zult.tail_skip, Some(TailSkip::TruncatedHeader));
    }

    #[test]
    fn length_overrun_discards_tail_but_keeps_earlier_records() {
        let mut dat = tlv(kind::IMU, &imu_payload());
        // Declares 100 payload bytes but only 2 follow.
        dat.extend_from_slice(&[kind::HEALTH, 100, 0, 1, 2]);

        let zult = scan(&dat, 0);
        assert_eq!(zult.records.len(), 1);
        assert!(matches!(zult.records[0].value, Value::Imu(_)));
        assert_eq!(
            zult.tail_skip,
            Some(TailSkip::LengthOverrun {
                kind: kind::HEALTH,
                length: 100
            })
        );
    }

    #[test]
    fn zero_length_record_advances_cursor() {
        // An unknown type with length 0 followed by a real record.
        let mut dat = tlv(0x66, &[]);
        dat.extend_from_slice(&tlv(kind::IMU, &imu_payload()));

        let zult = scan(&dat, 0);
        assert_eq!(zult.records.len(), 2);
        assert!(zult.tail_skip.is_none());
    }
}
