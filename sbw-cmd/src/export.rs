//! Record exporters.
//!
//! Exporters consume the decoder's per-kind sequences and never reach
//! into the pipeline itself. CSV output covers the typed kinds with
//! fixed columns; raw and malformed records only appear in the JSON
//! export, where their payloads can be carried as hex.

use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use sbw::decode::Decoded;
use sbw::tlv::{Record, Value};
use serde::Serialize;
use tracing::info;

fn check_clobber(path: &Path, clobber: bool) -> Result<()> {
    if !clobber && path.exists() {
        bail!("{path:?} exists; use --clobber");
    }
    Ok(())
}

/// Write one CSV file per typed record kind. Returns the created paths.
pub fn export_csv(decoded: &Decoded, dir: &Path, clobber: bool) -> Result<Vec<PathBuf>> {
    let mut created = Vec::new();
    for (kind, records) in decoded.sequences() {
        if records.is_empty() {
            continue;
        }
        let Some(header) = csv_header(kind) else {
            continue;
        };

        let path = dir.join(format!("{kind}.csv"));
        check_clobber(&path, clobber)?;
        let mut writer =
            csv::Writer::from_path(&path).with_context(|| format!("creating {path:?}"))?;
        writer.write_record(header).context("writing csv header")?;
        for record in records {
            writer
                .write_record(csv_row(record))
                .context("writing csv row")?;
        }
        writer.flush().context("flushing csv")?;

        info!(kind, count = records.len(), path = ?path, "wrote csv");
        created.push(path);
    }
    Ok(created)
}

fn csv_header(kind: &str) -> Option<&'static [&'static str]> {
    match kind {
        "imu" => Some(&[
            "block_id",
            "record_index",
            "timestamp_us",
            "accel_x",
            "accel_y",
            "accel_z",
            "gyro_x",
            "gyro_y",
            "gyro_z",
        ]),
        "temperature" => Some(&[
            "block_id",
            "record_index",
            "timestamp_us",
            "temperature",
            "sensor_id",
        ]),
        "health" => Some(&[
            "block_id",
            "record_index",
            "timestamp_us",
            "battery_voltage",
            "cpu_temperature",
            "memory_usage",
            "error_code",
        ]),
        "session" => Some(&[
            "block_id",
            "record_index",
            "timestamp_us",
            "session_id",
            "firmware_version",
            "reserved",
        ]),
        "timestamp" => Some(&["block_id", "record_index", "timestamp_us", "microseconds"]),
        _ => None,
    }
}

fn csv_row(record: &Record) -> Vec<String> {
    let mut row = vec![
        record.block_id.to_string(),
        record.index.to_string(),
        record
            .timestamp
            .map(|us| us.to_string())
            .unwrap_or_default(),
    ];
    match &record.value {
        Value::Imu(sample) => row.extend([
            sample.accel_x.to_string(),
            sample.accel_y.to_string(),
            sample.accel_z.to_string(),
            sample.gyro_x.to_string(),
            sample.gyro_y.to_string(),
            sample.gyro_z.to_string(),
        ]),
        Value::Temperature(sample) => row.extend([
            sample.temperature.to_string(),
            sample.sensor_id.to_string(),
        ]),
        Value::Health(reading) => row.extend([
            reading.battery_voltage.to_string(),
            reading.cpu_temperature.to_string(),
            reading.memory_usage.to_string(),
            reading.error_code.to_string(),
        ]),
        Value::Session(session) => row.extend([
            session.session_id_hex(),
            format!("{:#010x}", session.firmware_version),
            hex::encode_upper(&session.reserved),
        ]),
        Value::Timestamp { microseconds } => row.push(microseconds.to_string()),
        // Raw and malformed records have no CSV layout.
        Value::Raw { .. } | Value::Malformed { .. } => {}
    }
    row
}

#[derive(Serialize)]
struct KindDocument<'a> {
    kind: &'a str,
    record_count: usize,
    records: &'a [Record],
}

#[derive(Serialize)]
struct CaptureDocument<'a> {
    summary: &'a sbw::decode::Summary,
    ledger: &'a [sbw::decode::LedgerEntry],
}

/// Write one JSON document per non-empty record kind plus a capture-level
/// document with the summary and ledger. Returns the created paths.
pub fn export_json(decoded: &Decoded, dir: &Path, clobber: bool) -> Result<Vec<PathBuf>> {
    let mut created = Vec::new();

    for (kind, records) in decoded.sequences() {
        if records.is_empty() {
            continue;
        }
        let path = dir.join(format!("{kind}.json"));
        check_clobber(&path, clobber)?;
        let file = File::create(&path).with_context(|| format!("creating {path:?}"))?;
        serde_json::to_writer_pretty(
            file,
            &KindDocument {
                kind,
                record_count: records.len(),
                records,
            },
        )
        .with_context(|| format!("serializing {path:?}"))?;

        info!(kind, count = records.len(), path = ?path, "wrote json");
        created.push(path);
    }

    let path = dir.join("capture.json");
    check_clobber(&path, clobber)?;
    let file = File::create(&path).with_context(|| format!("creating {path:?}"))?;
    serde_json::to_writer_pretty(
        file,
        &CaptureDocument {
            summary: &decoded.summary,
            ledger: &decoded.ledger,
        },
    )
    .with_context(|| format!("serializing {path:?}"))?;
    created.push(path);

    Ok(created)
}
