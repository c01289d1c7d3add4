//! # Telemetry Engine
//!
//! The single owner of all mutable aggregation state. Every public method is a
//! complete, synchronous step: callers serialize access (the HTTP layer keeps
//! the engine behind one mutex) and no step is ever observed half applied.

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use super::arbitration::{select_best, ScoringPolicy};
use super::devices::{DeviceRegistry, Placement};
use super::lifecycle::{self, Liveness, SweepReport};
use super::readings::ReadingStore;
use super::receivers::ReceiverRegistry;
use super::stats::{self, SnapshotHistory};
use crate::ingest::BatchReport;
use crate::model::{DeviceId, DeviceRecord, Reading, ReceiverId, SystemSnapshot, SystemStats};
use crate::persistence::PersistedState;

/// Tunables of the engine, resolved from configuration at startup.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineSettings {
    pub liveness: Liveness,
    pub scoring: ScoringPolicy,
    pub snapshot_retention: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            liveness: Liveness::default(),
            scoring: ScoringPolicy::default(),
            snapshot_retention: 288,
        }
    }
}

/// Outcome of one ingested batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub receiver_id: ReceiverId,
    pub new_receiver: bool,
    pub accepted: usize,
    pub skipped: usize,
    pub registered: Vec<DeviceId>,
    pub reconnected: Vec<DeviceId>,
}

#[derive(Debug)]
pub struct TelemetryEngine {
    pub(crate) settings: EngineSettings,
    pub(crate) readings: ReadingStore,
    pub(crate) devices: DeviceRegistry,
    pub(crate) receivers: ReceiverRegistry,
    pub(crate) snapshots: SnapshotHistory,
    pub(crate) latest_stats: SystemStats,
    pub(crate) requests_served: u64,
}

impl TelemetryEngine {
    pub fn new(settings: EngineSettings) -> Self {
        Self {
            settings,
            readings: ReadingStore::new(),
            devices: DeviceRegistry::new(),
            receivers: ReceiverRegistry::new(),
            snapshots: SnapshotHistory::new(settings.snapshot_retention),
            latest_stats: SystemStats::empty(Utc::now()),
            requests_served: 0,
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Applies a validated batch. The receiver is refreshed even when every
    /// entry was rejected at parse time.
    pub fn ingest(&mut self, batch: &BatchReport, now: DateTime<Utc>) -> IngestSummary {
        self.requests_served += 1;
        let new_receiver = self.receivers.touch(
            &batch.receiver_id,
            batch.reported_device_count(),
            batch.timestamp,
            now,
        );
        if new_receiver {
            info!(receiver_id = %batch.receiver_id, "receiver registered");
        }

        let mut summary = IngestSummary {
            receiver_id: batch.receiver_id.clone(),
            new_receiver,
            skipped: batch.rejected.len(),
            ..IngestSummary::default()
        };

        for report in &batch.reports {
            let reading = report.to_reading(now);
            match self.apply_reading(&report.device_id, &batch.receiver_id, reading, now) {
                Placement::Registered => summary.registered.push(report.device_id.clone()),
                Placement::Reconnected => {
                    info!(device_id = %report.device_id, receiver_id = %batch.receiver_id, "device reconnected");
                    summary.reconnected.push(report.device_id.clone());
                }
                Placement::Refreshed => {}
            }
            summary.accepted += 1;
        }

        for (index, reason) in &batch.rejected {
            debug!(receiver_id = %batch.receiver_id, index, ?reason, "skipped malformed reading");
        }
        summary
    }

    /// Reading write, arbitration, placement and history, in that order.
    fn apply_reading(
        &mut self,
        device_id: &str,
        receiver_id: &str,
        reading: Reading,
        now: DateTime<Utc>,
    ) -> Placement {
        self.readings.upsert(device_id, receiver_id, reading.clone());
        self.receivers.attach_device(receiver_id, device_id);

        // The store holds at least the reading just written.
        let record = self
            .readings
            .readings_for(device_id)
            .and_then(|candidates| select_best(candidates, &self.settings.scoring, now))
            .map(|best| best.to_record(device_id))
            .unwrap_or_else(|| DeviceRecord::from_reading(device_id, receiver_id, &reading));
        let last_report = self
            .readings
            .newest_observation(device_id)
            .unwrap_or(reading.observed_at);

        let placement = self.devices.place(record, last_report, now);
        self.devices.record_report(device_id, &reading, now);
        placement
    }

    /// Demotes stale devices and receivers. Idempotent at a fixed `now`.
    pub fn sweep(&mut self, now: DateTime<Utc>) -> SweepReport {
        lifecycle::sweep(
            &mut self.readings,
            &mut self.devices,
            &mut self.receivers,
            &self.settings.liveness,
            &self.settings.scoring,
            now,
        )
    }

    /// Recomputes the system totals and caches them for the dashboard.
    pub fn refresh_stats(&mut self, now: DateTime<Utc>) -> SystemStats {
        let stats = stats::compute(&self.devices, &self.receivers, &self.settings.liveness, now);
        self.latest_stats = stats.clone();
        stats
    }

    pub fn latest_stats(&self) -> &SystemStats {
        &self.latest_stats
    }

    /// Appends a system snapshot built from freshly computed totals.
    pub fn record_snapshot(&mut self, now: DateTime<Utc>) -> SystemSnapshot {
        let stats = self.refresh_stats(now);
        let snapshot = SystemSnapshot {
            timestamp: now,
            total_steps: stats.total_steps,
            active_device_count: stats.active_devices,
            active_receiver_count: stats.active_receivers,
            total_requests_served: self.requests_served,
            offline_devices: stats::offline_listing(&self.devices),
        };
        self.snapshots.push(snapshot.clone());
        snapshot
    }

    pub fn snapshots(&self) -> &SnapshotHistory {
        &self.snapshots
    }

    pub fn requests_served(&self) -> u64 {
        self.requests_served
    }

    pub fn readings(&self) -> &ReadingStore {
        &self.readings
    }

    pub fn devices(&self) -> &DeviceRegistry {
        &self.devices
    }

    pub fn receivers(&self) -> &ReceiverRegistry {
        &self.receivers
    }

    /// Rebaselines live history and drops the archive and snapshot history.
    /// Callers persist the result right away.
    pub fn clear_history(&mut self, now: DateTime<Utc>) {
        self.devices.clear_history(now);
        self.snapshots.clear();
        info!(live_devices = self.devices.live_count(), "device history cleared");
    }

    /// Forgets everything: readings, registries, archive, history, snapshots.
    pub fn reset(&mut self, now: DateTime<Utc>) {
        self.readings.clear();
        self.devices.clear();
        self.receivers.clear();
        self.snapshots.clear();
        self.requests_served = 0;
        self.latest_stats = SystemStats::empty(now);
        info!("engine state reset");
    }

    /// Copy of the durable state, cheap enough to take under the state lock.
    /// Devices still live at `now` are written as archived at `now`.
    pub fn persisted_state(&self, now: DateTime<Utc>) -> PersistedState {
        let (histories, archive) = self.devices.export(now);
        PersistedState {
            histories,
            archive,
            snapshots: self.snapshots.to_vec(),
        }
    }

    /// Installs recovered durable state. Meant for startup, before ingestion.
    pub fn restore(&mut self, state: PersistedState) {
        self.devices.restore(state.histories, state.archive);
        self.snapshots.restore(state.snapshots);
        if let Some(latest) = self.snapshots.latest() {
            self.requests_served = self.requests_served.max(latest.total_requests_served);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::views::DeviceStatus;
    use crate::ingest::{parse_batch, DeviceReport};
    use chrono::TimeDelta;

    fn batch(receiver: &str, devices: &[(&str, u64, f64, u64, i32)]) -> BatchReport {
        BatchReport {
            receiver_id: receiver.to_string(),
            timestamp: None,
            device_count: None,
            entry_count: devices.len(),
            reports: devices
                .iter()
                .map(|(id, steps, battery, last_seen, signal)| DeviceReport {
                    device_id: id.to_string(),
                    step_count: *steps,
                    battery_level: *battery,
                    seconds_since_observed: *last_seen,
                    signal_strength: *signal,
                })
                .collect(),
            rejected: Vec::new(),
        }
    }

    fn sorted_live(engine: &TelemetryEngine) -> Vec<crate::core::devices::LiveDevice> {
        let mut live: Vec<_> = engine.devices().live_devices().cloned().collect();
        live.sort_by(|a, b| a.record.device_id.cmp(&b.record.device_id));
        live
    }

    fn engine() -> TelemetryEngine {
        TelemetryEngine::new(EngineSettings::default())
    }

    #[test]
    fn two_receiver_scenario_prefers_fresher_stronger_and_archives_after_timeout() {
        let mut engine = engine();
        let t0 = Utc::now();

        engine.ingest(&batch("RX1", &[("D1", 100, 80.0, 0, -40)]), t0);
        let t5 = t0 + TimeDelta::seconds(5);
        engine.ingest(&batch("RX2", &[("D1", 100, 80.0, 0, -70)]), t5);

        let live = engine.devices().live("D1").unwrap();
        assert_eq!(live.record.best_receiver_id, "RX1");
        assert_eq!(live.record.signal_strength, -40);
        assert_eq!(live.record.last_seen, t0);

        let t405 = t5 + TimeDelta::seconds(400);
        let report = engine.sweep(t405);
        assert_eq!(report.archived_devices, vec!["D1".to_string()]);
        assert!(engine.devices().live("D1").is_none());
        assert!(engine.devices().archived("D1").is_some());
        assert_eq!(engine.devices().history("D1").unwrap().disconnection_count, 1);
    }

    #[test]
    fn record_mirrors_the_winning_reading_after_every_write() {
        let mut engine = engine();
        let t0 = Utc::now();
        engine.ingest(&batch("RX1", &[("D1", 100, 80.0, 0, -60)]), t0);
        engine.ingest(&batch("RX2", &[("D1", 104, 79.0, 0, -50)]), t0);

        let live = engine.devices().live("D1").unwrap();
        assert_eq!(live.record.best_receiver_id, "RX2");
        let winning = engine.readings().get("D1", "RX2").unwrap();
        assert_eq!(live.record.step_count, winning.step_count);
        assert_eq!(live.record.battery_level, winning.battery_level);
        assert_eq!(live.record.signal_strength, winning.signal_strength);
        assert_eq!(live.record.last_seen, winning.observed_at);
    }

    #[test]
    fn disconnection_is_counted_once_per_archival_not_per_sweep() {
        let mut engine = engine();
        let t0 = Utc::now();
        engine.ingest(&batch("RX1", &[("D1", 10, 90.0, 0, -40)]), t0);

        for minutes in [6, 7, 8, 20] {
            engine.sweep(t0 + TimeDelta::minutes(minutes));
        }
        assert_eq!(engine.devices().history("D1").unwrap().disconnection_count, 1);
    }

    #[test]
    fn sweep_is_idempotent() {
        let mut engine = engine();
        let t0 = Utc::now();
        engine.ingest(&batch("RX1", &[("D1", 10, 90.0, 0, -40), ("D2", 5, 50.0, 0, -60)]), t0);
        let t1 = t0 + TimeDelta::seconds(300);
        engine.ingest(&batch("RX2", &[("D2", 6, 49.0, 0, -70)]), t1);

        let now = t0 + TimeDelta::seconds(360);
        let first = engine.sweep(now);
        assert_eq!(first.archived_devices, vec!["D1".to_string()]);
        assert_eq!(first.removed_receivers, vec!["RX1".to_string()]);
        let after_first = engine.persisted_state(now);
        let live_after_first = sorted_live(&engine);

        let second = engine.sweep(now);
        assert!(second.is_empty());
        assert_eq!(engine.persisted_state(now), after_first);
        assert_eq!(sorted_live(&engine), live_after_first);
    }

    #[test]
    fn pruned_winner_triggers_rearbitration() {
        let mut engine = engine();
        let t0 = Utc::now();
        engine.ingest(&batch("RX1", &[("D1", 10, 90.0, 0, -30)]), t0);
        let t1 = t0 + TimeDelta::seconds(250);
        engine.ingest(&batch("RX2", &[("D1", 11, 90.0, 0, -90)]), t1);
        // At t1 RX1 scores -30 - 250 = -280, RX2 scores -90.
        assert_eq!(engine.devices().live("D1").unwrap().record.best_receiver_id, "RX2");

        let report = engine.sweep(t0 + TimeDelta::seconds(301));
        assert_eq!(report.pruned_readings, 1);
        assert_eq!(report.rearbitrated_devices, vec!["D1".to_string()]);
        assert!(engine.readings().get("D1", "RX1").is_none());
        assert!(!engine.receivers().get("RX2").unwrap().devices.is_empty());
        assert_eq!(engine.devices().live("D1").unwrap().record.step_count, 11);
    }

    #[test]
    fn reconnection_restores_history_and_merges_new_values() {
        let mut engine = engine();
        let t0 = Utc::now();
        engine.ingest(&batch("RX1", &[("D1", 500, 90.0, 0, -40)]), t0);
        engine.ingest(&batch("RX1", &[("D1", 520, 88.0, 0, -40)]), t0 + TimeDelta::seconds(30));
        engine.sweep(t0 + TimeDelta::seconds(400));
        let before = engine.devices().history("D1").unwrap().clone();
        assert_eq!(before.cumulative_online_secs, 30);

        let t1 = t0 + TimeDelta::seconds(900);
        let summary = engine.ingest(&batch("RX3", &[("D1", 510, 95.0, 0, -55)]), t1);
        assert_eq!(summary.reconnected, vec!["D1".to_string()]);
        assert!(engine.devices().archived("D1").is_none());

        let after = engine.devices().history("D1").unwrap();
        assert_eq!(after.first_seen, before.first_seen);
        assert_eq!(after.peak_step_count, 520);
        assert_eq!(after.max_battery, 95.0);
        assert_eq!(after.min_battery, 88.0);
        assert_eq!(after.disconnection_count, 1);
        assert_eq!(after.total_updates, before.total_updates + 1);

        engine.ingest(&batch("RX3", &[("D1", 600, 94.0, 0, -55)]), t1 + TimeDelta::seconds(1));
        assert_eq!(engine.devices().history("D1").unwrap().peak_step_count, 600);
    }

    #[test]
    fn statistics_sum_exactly_the_live_registry_after_a_sweep() {
        let mut engine = engine();
        let t0 = Utc::now();
        engine.ingest(&batch("RX1", &[("D1", 100, 90.0, 0, -40), ("D2", 250, 70.0, 0, -40)]), t0);
        let t1 = t0 + TimeDelta::seconds(250);
        engine.ingest(&batch("RX2", &[("D3", 40, 60.0, 0, -50)]), t1);

        let now = t0 + TimeDelta::seconds(320);
        engine.sweep(now);
        let stats = engine.refresh_stats(now);

        let expected: u64 = engine.devices().live_devices().map(|d| d.record.step_count).sum();
        assert_eq!(stats.total_steps, expected);
        assert_eq!(stats.total_steps, 40);
        assert_eq!(stats.active_devices, engine.devices().live_count());
        assert_eq!(stats.active_receivers, 1);
        assert_eq!(engine.latest_stats(), &stats);
    }

    #[test]
    fn batch_with_only_bad_entries_still_refreshes_the_receiver() {
        let mut engine = engine();
        let t0 = Utc::now();
        let parsed = parse_batch(br#"{ "receiverId": "RX1", "devices": [ { "stepCount": 3 } ] }"#).unwrap();
        let summary = engine.ingest(&parsed, t0);

        assert_eq!(summary.accepted, 0);
        assert_eq!(summary.skipped, 1);
        assert!(summary.new_receiver);
        assert_eq!(engine.receivers().get("RX1").unwrap().last_seen, t0);
        assert_eq!(engine.devices().live_count(), 0);
    }

    #[test]
    fn every_parsed_entry_is_either_accepted_or_skipped() {
        let mut engine = TelemetryEngine::new(EngineSettings {
            scoring: ScoringPolicy {
                signal_weight: f64::NAN,
                age_weight: 1.0,
            },
            ..EngineSettings::default()
        });
        let t0 = Utc::now();
        let parsed = parse_batch(
            br#"{ "receiverId": "RX1", "devices": [
                { "deviceId": "D1", "stepCount": 3 },
                { "stepCount": 4 },
                { "deviceId": "D2", "stepCount": 5, "signalStrength": -60 }
            ] }"#,
        )
        .unwrap();
        let summary = engine.ingest(&parsed, t0);

        assert_eq!(summary.skipped, parsed.rejected.len());
        assert_eq!(summary.accepted + summary.skipped, parsed.entry_count);
        assert_eq!(summary.registered, vec!["D1".to_string(), "D2".to_string()]);
        assert_eq!(engine.devices().live("D2").unwrap().record.step_count, 5);
    }

    #[test]
    fn snapshots_capture_totals_and_offline_listing() {
        let mut engine = TelemetryEngine::new(EngineSettings {
            snapshot_retention: 2,
            ..EngineSettings::default()
        });
        let t0 = Utc::now();
        engine.ingest(&batch("RX1", &[("D1", 100, 90.0, 0, -40)]), t0);
        engine.ingest(&batch("RX2", &[("D2", 30, 90.0, 0, -40)]), t0 + TimeDelta::seconds(250));
        engine.sweep(t0 + TimeDelta::seconds(310));

        let snapshot = engine.record_snapshot(t0 + TimeDelta::seconds(310));
        assert_eq!(snapshot.total_steps, 30);
        assert_eq!(snapshot.active_device_count, 1);
        assert_eq!(snapshot.total_requests_served, 2);
        assert_eq!(snapshot.offline_devices.len(), 1);
        assert_eq!(snapshot.offline_devices[0].device_id, "D1");

        engine.record_snapshot(t0 + TimeDelta::seconds(320));
        engine.record_snapshot(t0 + TimeDelta::seconds(330));
        assert_eq!(engine.snapshots().len(), 2);
    }

    #[test]
    fn clear_history_keeps_live_devices_with_fresh_baseline() {
        let mut engine = engine();
        let t0 = Utc::now();
        engine.ingest(&batch("RX1", &[("D1", 100, 90.0, 0, -40)]), t0);
        engine.ingest(&batch("RX1", &[("D1", 150, 60.0, 0, -40)]), t0 + TimeDelta::seconds(10));
        engine.ingest(&batch("RX2", &[("D2", 5, 20.0, 0, -40)]), t0);
        engine.ingest(&batch("RX1", &[("D1", 160, 55.0, 0, -40)]), t0 + TimeDelta::seconds(290));
        engine.sweep(t0 + TimeDelta::seconds(300));
        engine.record_snapshot(t0 + TimeDelta::seconds(300));

        let now = t0 + TimeDelta::seconds(301);
        engine.clear_history(now);

        assert_eq!(engine.devices().archived_count(), 0);
        let state = engine.persisted_state(now);
        assert_eq!(state.archive.keys().collect::<Vec<_>>(), vec!["D1"]);
        assert!(state.snapshots.is_empty());
        assert_eq!(state.histories.len(), 1);
        let history = &state.histories["D1"];
        assert_eq!(history.first_seen, now);
        assert_eq!(history.peak_step_count, 160);
        assert_eq!(history.min_battery, 55.0);
        assert_eq!(history.max_battery, 55.0);
        assert_eq!(history.total_updates, 0);
        assert!(engine.devices().live("D1").is_some());
    }

    #[test]
    fn reset_clears_everything() {
        let mut engine = engine();
        let t0 = Utc::now();
        engine.ingest(&batch("RX1", &[("D1", 100, 90.0, 0, -40)]), t0);
        engine.record_snapshot(t0);
        engine.reset(t0);

        assert_eq!(engine.devices().live_count(), 0);
        assert!(engine.receivers().is_empty());
        assert!(engine.readings().is_empty());
        assert_eq!(engine.persisted_state(t0), PersistedState::default());
        assert_eq!(engine.requests_served(), 0);
    }

    #[test]
    fn restore_brings_back_archive_for_reconnection() {
        let mut first = engine();
        let t0 = Utc::now();
        first.ingest(&batch("RX1", &[("D1", 100, 90.0, 0, -40)]), t0);
        first.sweep(t0 + TimeDelta::seconds(400));
        let saved = first.persisted_state(t0 + TimeDelta::seconds(400));

        let mut second = engine();
        second.restore(saved.clone());
        assert_eq!(second.persisted_state(t0 + TimeDelta::seconds(400)), saved);

        let t1 = t0 + TimeDelta::seconds(1000);
        let summary = second.ingest(&batch("RX1", &[("D1", 130, 85.0, 0, -40)]), t1);
        assert_eq!(summary.reconnected, vec!["D1".to_string()]);
        assert_eq!(second.devices().history("D1").unwrap().first_seen, t0);
    }

    #[test]
    fn live_devices_come_back_archived_after_a_restart() {
        let mut first = engine();
        let t0 = Utc::now();
        first.ingest(&batch("RX1", &[("D1", 100, 90.0, 0, -40)]), t0);
        first.ingest(&batch("RX1", &[("D1", 120, 89.0, 0, -40)]), t0 + TimeDelta::seconds(200));
        let saved_at = t0 + TimeDelta::seconds(210);
        let saved = first.persisted_state(saved_at);
        assert!(first.devices().live("D1").is_some());

        let mut second = engine();
        second.restore(saved);
        let view = second.device_view("D1").unwrap();
        assert_eq!(view.status, DeviceStatus::Archived);
        assert_eq!(view.archived_at, Some(saved_at));
        assert_eq!(view.step_count, 120);
        let history = view.history.unwrap();
        assert_eq!(history.disconnection_count, 1);
        assert_eq!(history.cumulative_online_secs, 200);
        assert_eq!(history.total_updates, 2);

        let summary = second.ingest(&batch("RX1", &[("D1", 140, 88.0, 0, -40)]), saved_at + TimeDelta::seconds(60));
        assert_eq!(summary.reconnected, vec!["D1".to_string()]);
        assert_eq!(second.devices().live_count(), 1);
        assert_eq!(second.devices().history("D1").unwrap().total_updates, 3);
    }
}
