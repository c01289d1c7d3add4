//! Read models served by the dashboard API. Built from a consistent view of
//! the engine while the caller holds the state lock; all lists are sorted by id.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::engine::TelemetryEngine;
use crate::model::{DeviceHistory, DeviceId, ReceiverId, SystemSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Live,
    Archived,
    /// History only: neither live nor archived, e.g. after the archive document was lost.
    Inactive,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSummary {
    pub total_steps: u64,
    pub active_devices: usize,
    pub active_receivers: usize,
    pub archived_devices: usize,
    pub total_requests_served: u64,
    pub uptime_secs: u64,
    pub computed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceView {
    pub device_id: DeviceId,
    pub status: DeviceStatus,
    pub step_count: u64,
    pub battery_level: f64,
    pub best_receiver_id: ReceiverId,
    pub last_seen: DateTime<Utc>,
    pub signal_strength: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub online_since: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archived_at: Option<DateTime<Utc>>,
    pub history: Option<DeviceHistory>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceListing {
    pub live: Vec<DeviceView>,
    pub archived: Vec<DeviceView>,
}

/// A receiver's own reading of one device, as held in the reading store.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiverDeviceReading {
    pub device_id: DeviceId,
    pub step_count: u64,
    pub battery_level: f64,
    pub observed_at: DateTime<Utc>,
    pub signal_strength: i32,
    /// Whether this reading currently backs the device record.
    pub is_best: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiverView {
    pub receiver_id: ReceiverId,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub reported_device_count: u64,
    pub batch_count: u64,
    pub last_batch_timestamp: Option<i64>,
    pub devices: Vec<ReceiverDeviceReading>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceHistoryView {
    pub device_id: DeviceId,
    pub status: DeviceStatus,
    #[serde(flatten)]
    pub history: DeviceHistory,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryListing {
    pub devices: Vec<DeviceHistoryView>,
    pub snapshots: Vec<SystemSnapshot>,
}

impl TelemetryEngine {
    pub fn dashboard(&self, uptime_secs: u64) -> DashboardSummary {
        let stats = self.latest_stats();
        DashboardSummary {
            total_steps: stats.total_steps,
            active_devices: stats.active_devices,
            active_receivers: stats.active_receivers,
            archived_devices: self.devices.archived_count(),
            total_requests_served: self.requests_served(),
            uptime_secs,
            computed_at: stats.computed_at,
        }
    }

    pub fn device_listing(&self) -> DeviceListing {
        let mut live: Vec<DeviceView> = self
            .devices
            .live_devices()
            .filter_map(|d| self.device_view(&d.record.device_id))
            .collect();
        let mut archived: Vec<DeviceView> = self
            .devices
            .archived_devices()
            .filter_map(|d| self.device_view(&d.record.device_id))
            .collect();
        live.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        archived.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        DeviceListing { live, archived }
    }

    pub fn device_view(&self, device_id: &str) -> Option<DeviceView> {
        let history = self.devices.history(device_id).cloned();
        if let Some(live) = self.devices.live(device_id) {
            let record = &live.record;
            return Some(DeviceView {
                device_id: record.device_id.clone(),
                status: DeviceStatus::Live,
                step_count: record.step_count,
                battery_level: record.battery_level,
                best_receiver_id: record.best_receiver_id.clone(),
                last_seen: record.last_seen,
                signal_strength: record.signal_strength,
                online_since: Some(live.online_since),
                archived_at: None,
                history,
            });
        }
        let archived = self.devices.archived(device_id)?;
        let record = &archived.record;
        Some(DeviceView {
            device_id: record.device_id.clone(),
            status: DeviceStatus::Archived,
            step_count: record.step_count,
            battery_level: record.battery_level,
            best_receiver_id: record.best_receiver_id.clone(),
            last_seen: record.last_seen,
            signal_strength: record.signal_strength,
            online_since: None,
            archived_at: Some(archived.archived_at),
            history,
        })
    }

    pub fn receiver_listing(&self) -> Vec<ReceiverView> {
        let mut receivers: Vec<ReceiverView> = self
            .receivers
            .iter()
            .filter_map(|r| self.receiver_view(&r.receiver_id))
            .collect();
        receivers.sort_by(|a, b| a.receiver_id.cmp(&b.receiver_id));
        receivers
    }

    pub fn receiver_view(&self, receiver_id: &str) -> Option<ReceiverView> {
        let receiver = self.receivers.get(receiver_id)?;
        let devices = receiver
            .devices
            .iter()
            .filter_map(|device_id| {
                let reading = self.readings.get(device_id, receiver_id)?;
                let is_best = self
                    .devices
                    .live(device_id)
                    .is_some_and(|live| live.record.best_receiver_id == receiver_id);
                Some(ReceiverDeviceReading {
                    device_id: device_id.clone(),
                    step_count: reading.step_count,
                    battery_level: reading.battery_level,
                    observed_at: reading.observed_at,
                    signal_strength: reading.signal_strength,
                    is_best,
                })
            })
            .collect();
        Some(ReceiverView {
            receiver_id: receiver.receiver_id.clone(),
            first_seen: receiver.first_seen,
            last_seen: receiver.last_seen,
            reported_device_count: receiver.reported_device_count,
            batch_count: receiver.batch_count,
            last_batch_timestamp: receiver.last_batch_timestamp,
            devices,
        })
    }

    pub fn history_listing(&self) -> HistoryListing {
        let mut devices: Vec<DeviceHistoryView> = self
            .devices
            .histories()
            .map(|(device_id, history)| DeviceHistoryView {
                device_id: device_id.clone(),
                status: if self.devices.live(device_id).is_some() {
                    DeviceStatus::Live
                } else if self.devices.archived(device_id).is_some() {
                    DeviceStatus::Archived
                } else {
                    DeviceStatus::Inactive
                },
                history: history.clone(),
            })
            .collect();
        devices.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        HistoryListing {
            devices,
            snapshots: self.snapshots.to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::EngineSettings;
    use crate::ingest::parse_batch;
    use chrono::TimeDelta;

    fn ingest(engine: &mut TelemetryEngine, body: &str, now: DateTime<Utc>) {
        let batch = parse_batch(body.as_bytes()).unwrap();
        engine.ingest(&batch, now);
    }

    #[test]
    fn receiver_view_nests_its_own_readings_and_marks_the_winner() {
        let mut engine = TelemetryEngine::new(EngineSettings::default());
        let now = Utc::now();
        ingest(
            &mut engine,
            r#"{"receiverId":"RX1","devices":[{"deviceId":"D1","stepCount":10,"signalStrength":-40},{"deviceId":"D2","stepCount":3,"signalStrength":-90}]}"#,
            now,
        );
        ingest(
            &mut engine,
            r#"{"receiverId":"RX2","devices":[{"deviceId":"D2","stepCount":4,"signalStrength":-50}]}"#,
            now,
        );

        let rx1 = engine.receiver_view("RX1").unwrap();
        assert_eq!(rx1.devices.len(), 2);
        assert!(rx1.devices[0].is_best);
        assert_eq!(rx1.devices[1].device_id, "D2");
        assert_eq!(rx1.devices[1].step_count, 3);
        assert!(!rx1.devices[1].is_best);

        assert!(engine.receiver_view("RX404").is_none());
        let ids: Vec<_> = engine.receiver_listing().into_iter().map(|r| r.receiver_id).collect();
        assert_eq!(ids, vec!["RX1".to_string(), "RX2".to_string()]);
    }

    #[test]
    fn listings_cover_live_and_archived_devices() {
        let mut engine = TelemetryEngine::new(EngineSettings::default());
        let t0 = Utc::now();
        ingest(&mut engine, r#"{"receiverId":"RX1","devices":[{"deviceId":"D1","stepCount":10}]}"#, t0);
        let t1 = t0 + TimeDelta::seconds(280);
        ingest(&mut engine, r#"{"receiverId":"RX1","devices":[{"deviceId":"D2","stepCount":20}]}"#, t1);
        engine.sweep(t0 + TimeDelta::seconds(300));

        let listing = engine.device_listing();
        assert_eq!(listing.live.len(), 1);
        assert_eq!(listing.live[0].device_id, "D2");
        assert_eq!(listing.archived.len(), 1);
        assert_eq!(listing.archived[0].status, DeviceStatus::Archived);
        assert_eq!(listing.archived[0].history.as_ref().unwrap().disconnection_count, 1);

        let history = engine.history_listing();
        let statuses: Vec<_> = history.devices.iter().map(|d| (d.device_id.as_str(), d.status)).collect();
        assert_eq!(statuses, vec![("D1", DeviceStatus::Archived), ("D2", DeviceStatus::Live)]);

        assert!(engine.device_view("D9").is_none());
    }

    #[test]
    fn dashboard_reads_the_cached_statistics() {
        let mut engine = TelemetryEngine::new(EngineSettings::default());
        let now = Utc::now();
        ingest(&mut engine, r#"{"receiverId":"RX1","devices":[{"deviceId":"D1","stepCount":42}]}"#, now);
        assert_eq!(engine.dashboard(5).total_steps, 0);

        engine.refresh_stats(now);
        let summary = engine.dashboard(5);
        assert_eq!(summary.total_steps, 42);
        assert_eq!(summary.active_devices, 1);
        assert_eq!(summary.active_receivers, 1);
        assert_eq!(summary.total_requests_served, 1);
        assert_eq!(summary.uptime_secs, 5);
    }

    #[test]
    fn history_view_serializes_flat() {
        let mut engine = TelemetryEngine::new(EngineSettings::default());
        let now = Utc::now();
        ingest(&mut engine, r#"{"receiverId":"RX1","devices":[{"deviceId":"D1","stepCount":42}]}"#, now);
        let json = serde_json::to_value(engine.history_listing()).unwrap();
        assert_eq!(json["devices"][0]["deviceId"], "D1");
        assert_eq!(json["devices"][0]["status"], "live");
        assert_eq!(json["devices"][0]["peakStepCount"], 42);
    }
}
