//! # Batch Ingestion Parsing
//!
//! Turns the raw body of `POST /api/receiver-data` into a [`BatchReport`].
//! Parsing never touches engine state: a body that fails here is rejected
//! whole, while a single bad entry inside an otherwise valid batch is only
//! counted as rejected.
//!
//! Wire format (camelCase JSON):
//!
//! ```json
//! { "receiverId": "RX1", "timestamp": 1700000000, "deviceCount": 1,
//!   "devices": [ { "deviceId": "D1", "stepCount": 100, "batteryLevel": 87.5,
//!                  "lastSeen": 3, "signalStrength": -42 } ] }
//! ```

use chrono::{DateTime, TimeDelta, Utc};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::model::{DeviceId, Reading, ReceiverId};

/// Signal strength assumed when a receiver omits it.
pub const DEFAULT_SIGNAL_STRENGTH: i32 = -100;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("request body is empty")]
    EmptyBody,

    #[error("request body is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("request body must be a JSON object")]
    NotAnObject,

    #[error("receiverId must be a non-empty string")]
    MissingReceiverId,

    #[error("devices must be a list")]
    DevicesNotAList,
}

/// Why a single entry of a batch was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryRejection {
    NotAnObject,
    MissingDeviceId,
    NonNumericStepCount,
}

/// One valid device entry of a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceReport {
    pub device_id: DeviceId,
    pub step_count: u64,
    pub battery_level: f64,
    pub seconds_since_observed: u64,
    pub signal_strength: i32,
}

impl DeviceReport {
    /// Anchors the relative `lastSeen` to the ingestion instant.
    pub fn to_reading(&self, now: DateTime<Utc>) -> Reading {
        let age = i64::try_from(self.seconds_since_observed)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .unwrap_or(TimeDelta::zero());
        Reading {
            step_count: self.step_count,
            battery_level: self.battery_level,
            observed_at: now.checked_sub_signed(age).unwrap_or(now),
            signal_strength: self.signal_strength,
        }
    }
}

/// A batch that passed top-level validation.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchReport {
    pub receiver_id: ReceiverId,
    pub timestamp: Option<i64>,
    pub device_count: Option<u64>,
    pub entry_count: usize,
    pub reports: Vec<DeviceReport>,
    pub rejected: Vec<(usize, EntryRejection)>,
}

impl BatchReport {
    /// Device count to record on the receiver: the declared one, else the list length.
    pub fn reported_device_count(&self) -> u64 {
        self.device_count.unwrap_or(self.entry_count as u64)
    }
}

pub fn parse_batch(body: &[u8]) -> Result<BatchReport, IngestError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(IngestError::EmptyBody);
    }
    let value: Value = serde_json::from_slice(body)?;
    batch_from_value(&value)
}

pub fn batch_from_value(value: &Value) -> Result<BatchReport, IngestError> {
    let object = value.as_object().ok_or(IngestError::NotAnObject)?;

    let receiver_id = object
        .get("receiverId")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or(IngestError::MissingReceiverId)?
        .to_string();

    let entries = object
        .get("devices")
        .and_then(Value::as_array)
        .ok_or(IngestError::DevicesNotAList)?;

    let mut reports = Vec::with_capacity(entries.len());
    let mut rejected = Vec::new();
    for (index, entry) in entries.iter().enumerate() {
        match parse_entry(entry) {
            Ok(report) => reports.push(report),
            Err(reason) => rejected.push((index, reason)),
        }
    }

    Ok(BatchReport {
        receiver_id,
        timestamp: object.get("timestamp").and_then(Value::as_i64),
        device_count: object.get("deviceCount").and_then(Value::as_u64),
        entry_count: entries.len(),
        reports,
        rejected,
    })
}

fn parse_entry(entry: &Value) -> Result<DeviceReport, EntryRejection> {
    let fields = entry.as_object().ok_or(EntryRejection::NotAnObject)?;

    let device_id = device_id(fields).ok_or(EntryRejection::MissingDeviceId)?;
    let step_count = non_negative(fields.get("stepCount")).ok_or(EntryRejection::NonNumericStepCount)?;

    let battery_level = fields
        .get("batteryLevel")
        .and_then(Value::as_f64)
        .unwrap_or(0.0)
        .clamp(0.0, 100.0);
    let seconds_since_observed = non_negative(fields.get("lastSeen")).unwrap_or(0);
    let signal_strength = fields
        .get("signalStrength")
        .and_then(Value::as_f64)
        .map(|dbm| dbm.round().clamp(f64::from(i32::MIN), f64::from(i32::MAX)) as i32)
        .unwrap_or(DEFAULT_SIGNAL_STRENGTH);

    Ok(DeviceReport {
        device_id,
        step_count,
        battery_level,
        seconds_since_observed,
        signal_strength,
    })
}

fn device_id(fields: &Map<String, Value>) -> Option<DeviceId> {
    match fields.get("deviceId")? {
        Value::String(id) => {
            let id = id.trim();
            (!id.is_empty()).then(|| id.to_string())
        }
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

/// Accepts integers, and finite non-negative floats truncated toward zero.
fn non_negative(value: Option<&Value>) -> Option<u64> {
    let value = value?;
    if let Some(n) = value.as_u64() {
        return Some(n);
    }
    let n = value.as_f64()?;
    (n.is_finite() && n >= 0.0).then(|| n.trunc().min(u64::MAX as f64) as u64)
}
