//! # Statistics
//!
//! Totals are recomputed from the registries on every pass rather than kept as
//! running counters, so they cannot drift from the state they describe.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};

use super::devices::DeviceRegistry;
use super::lifecycle::Liveness;
use super::receivers::ReceiverRegistry;
use crate::model::{OfflineDevice, SystemSnapshot, SystemStats};

pub fn compute(
    devices: &DeviceRegistry,
    receivers: &ReceiverRegistry,
    liveness: &Liveness,
    now: DateTime<Utc>,
) -> SystemStats {
    let mut total_steps = 0u64;
    let mut active_devices = 0usize;
    for live in devices.live_devices() {
        if liveness.device_is_active(live.last_report, now) {
            total_steps = total_steps.saturating_add(live.record.step_count);
            active_devices += 1;
        }
    }
    let active_receivers = receivers
        .iter()
        .filter(|receiver| liveness.receiver_is_active(receiver.last_seen, now))
        .count();

    SystemStats {
        total_steps,
        active_devices,
        active_receivers,
        computed_at: now,
    }
}

/// The archive as listed in a system snapshot, ordered by device id.
pub fn offline_listing(devices: &DeviceRegistry) -> Vec<OfflineDevice> {
    let mut listing: Vec<OfflineDevice> = devices
        .archived_devices()
        .map(|archived| OfflineDevice {
            device_id: archived.record.device_id.clone(),
            step_count: archived.record.step_count,
            battery_level: archived.record.battery_level,
            last_seen: archived.record.last_seen,
            archived_at: archived.archived_at,
        })
        .collect();
    listing.sort_by(|a, b| a.device_id.cmp(&b.device_id));
    listing
}

/// Bounded rolling list of system snapshots, oldest first.
#[derive(Debug)]
pub struct SnapshotHistory {
    entries: VecDeque<SystemSnapshot>,
    retention: usize,
}

impl SnapshotHistory {
    pub fn new(retention: usize) -> Self {
        let retention = retention.max(1);
        Self {
            entries: VecDeque::with_capacity(retention.min(1024)),
            retention,
        }
    }

    pub fn push(&mut self, snapshot: SystemSnapshot) {
        self.entries.push_back(snapshot);
        while self.entries.len() > self.retention {
            self.entries.pop_front();
        }
    }

    /// Replaces the contents, keeping only the newest `retention` entries.
    pub fn restore(&mut self, snapshots: Vec<SystemSnapshot>) {
        self.entries.clear();
        for snapshot in snapshots {
            self.push(snapshot);
        }
    }

    pub fn latest(&self) -> Option<&SystemSnapshot> {
        self.entries.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SystemSnapshot> {
        self.entries.iter()
    }

    pub fn to_vec(&self) -> Vec<SystemSnapshot> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn retention(&self) -> usize {
        self.retention
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn snapshot(at: DateTime<Utc>, steps: u64) -> SystemSnapshot {
        SystemSnapshot {
            timestamp: at,
            total_steps: steps,
            active_device_count: 0,
            active_receiver_count: 0,
            total_requests_served: 0,
            offline_devices: Vec::new(),
        }
    }

    #[test]
    fn snapshot_history_drops_oldest_beyond_retention() {
        let t0 = Utc::now();
        let mut history = SnapshotHistory::new(3);
        for i in 0..5 {
            history.push(snapshot(t0 + TimeDelta::seconds(i), i as u64));
        }
        let steps: Vec<u64> = history.iter().map(|s| s.total_steps).collect();
        assert_eq!(steps, vec![2, 3, 4]);
        assert_eq!(history.latest().unwrap().total_steps, 4);
    }

    #[test]
    fn restore_applies_retention_to_loaded_entries() {
        let t0 = Utc::now();
        let mut history = SnapshotHistory::new(2);
        history.restore((0..4).map(|i| snapshot(t0, i)).collect());
        assert_eq!(history.len(), 2);
        assert_eq!(history.to_vec()[0].total_steps, 2);
    }
}
