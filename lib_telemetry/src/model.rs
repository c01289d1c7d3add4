//! # Data Model
//!
//! Plain records shared by the engine, the persistence layer and the HTTP views.
//! All timestamps are absolute UTC instants; all records serialize with
//! camelCase field names so the on-disk documents and the JSON API agree.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier a device broadcasts about itself.
pub type DeviceId = String;
/// Identifier a receiver puts in its batch reports.
pub type ReceiverId = String;

/// One receiver's latest observation of one device.
///
/// Replaced wholesale on every report for the same `(device, receiver)` pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reading {
    pub step_count: u64,
    pub battery_level: f64,
    pub observed_at: DateTime<Utc>,
    pub signal_strength: i32,
}

/// The authoritative view of a live device, always a verbatim copy of the
/// reading that won arbitration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRecord {
    pub device_id: DeviceId,
    pub step_count: u64,
    pub battery_level: f64,
    pub best_receiver_id: ReceiverId,
    pub last_seen: DateTime<Utc>,
    pub signal_strength: i32,
}

impl DeviceRecord {
    pub fn from_reading(device_id: &str, receiver_id: &str, reading: &Reading) -> Self {
        Self {
            device_id: device_id.to_string(),
            step_count: reading.step_count,
            battery_level: reading.battery_level,
            best_receiver_id: receiver_id.to_string(),
            last_seen: reading.observed_at,
            signal_strength: reading.signal_strength,
        }
    }
}

/// Long-lived per-device statistics. Counters only ever grow; the record
/// survives archival and is reattached when the device comes back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceHistory {
    pub first_seen: DateTime<Utc>,
    pub total_updates: u64,
    pub peak_step_count: u64,
    pub min_battery: f64,
    pub max_battery: f64,
    pub last_online_time: DateTime<Utc>,
    pub cumulative_online_secs: u64,
    pub disconnection_count: u64,
}

impl DeviceHistory {
    /// History for a device reporting for the very first time.
    pub fn first_report(reading: &Reading, now: DateTime<Utc>) -> Self {
        Self {
            first_seen: now,
            total_updates: 1,
            peak_step_count: reading.step_count,
            min_battery: reading.battery_level,
            max_battery: reading.battery_level,
            last_online_time: reading.observed_at,
            cumulative_online_secs: 0,
            disconnection_count: 0,
        }
    }

    /// Fresh baseline seeded from the device's current authoritative values.
    pub fn baseline(record: &DeviceRecord, now: DateTime<Utc>) -> Self {
        Self {
            first_seen: now,
            total_updates: 0,
            peak_step_count: record.step_count,
            min_battery: record.battery_level,
            max_battery: record.battery_level,
            last_online_time: record.last_seen,
            cumulative_online_secs: 0,
            disconnection_count: 0,
        }
    }

    /// Folds one more ingested reading into the history.
    pub fn observe(&mut self, reading: &Reading) {
        self.total_updates += 1;
        self.peak_step_count = self.peak_step_count.max(reading.step_count);
        self.min_battery = self.min_battery.min(reading.battery_level);
        self.max_battery = self.max_battery.max(reading.battery_level);
        if reading.observed_at > self.last_online_time {
            self.last_online_time = reading.observed_at;
        }
    }
}

/// What the archive remembers about a device that went quiet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchivedDevice {
    pub record: DeviceRecord,
    pub archived_at: DateTime<Utc>,
}

/// On-disk form of an archived device: the archived record with its history
/// embedded, so the archive document loads on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveEntry {
    pub record: DeviceRecord,
    pub archived_at: DateTime<Utc>,
    pub history: DeviceHistory,
}

/// Liveness and summary counters for one receiver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiverRecord {
    pub receiver_id: ReceiverId,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub reported_device_count: u64,
    pub batch_count: u64,
    /// The receiver's own clock from its last batch, informational only.
    pub last_batch_timestamp: Option<i64>,
    pub devices: BTreeSet<DeviceId>,
}

/// System totals recomputed from registry state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStats {
    pub total_steps: u64,
    pub active_devices: usize,
    pub active_receivers: usize,
    pub computed_at: DateTime<Utc>,
}

impl SystemStats {
    pub fn empty(now: DateTime<Utc>) -> Self {
        Self {
            total_steps: 0,
            active_devices: 0,
            active_receivers: 0,
            computed_at: now,
        }
    }
}

/// One row of the offline listing carried by every system snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflineDevice {
    pub device_id: DeviceId,
    pub step_count: u64,
    pub battery_level: f64,
    pub last_seen: DateTime<Utc>,
    pub archived_at: DateTime<Utc>,
}

/// Periodic sample of system totals kept in the rolling history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemSnapshot {
    pub timestamp: DateTime<Utc>,
    pub total_steps: u64,
    pub active_device_count: usize,
    pub active_receiver_count: usize,
    pub total_requests_served: u64,
    pub offline_devices: Vec<OfflineDevice>,
}
