//! # Device Registry
//!
//! Three maps with one owner: the live records produced by arbitration, the
//! offline archive of devices that went quiet, and the history of every device
//! ever seen. A device id is in at most one of `live` and `archive` at a time;
//! its history lives in `histories` regardless of which.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};

use crate::model::{ArchiveEntry, ArchivedDevice, DeviceHistory, DeviceId, DeviceRecord, Reading};

/// A device in the Live state.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveDevice {
    pub record: DeviceRecord,
    /// When the device entered the Live state.
    pub online_since: DateTime<Utc>,
    /// Newest observation across all receivers, drives liveness.
    pub last_report: DateTime<Utc>,
}

/// How a freshly arbitrated record entered the live registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Already live, record refreshed.
    Refreshed,
    /// Never seen as live before.
    Registered,
    /// Came back out of the archive.
    Reconnected,
}

#[derive(Debug, Default)]
pub struct DeviceRegistry {
    live: HashMap<DeviceId, LiveDevice>,
    archive: HashMap<DeviceId, ArchivedDevice>,
    histories: HashMap<DeviceId, DeviceHistory>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs the result of an arbitration round as the device's live record,
    /// promoting it out of the archive when needed.
    pub fn place(
        &mut self,
        record: DeviceRecord,
        last_report: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Placement {
        if let Some(live) = self.live.get_mut(&record.device_id) {
            live.record = record;
            live.last_report = last_report;
            return Placement::Refreshed;
        }

        let placement = if self.archive.remove(&record.device_id).is_some() {
            Placement::Reconnected
        } else {
            Placement::Registered
        };
        self.live.insert(
            record.device_id.clone(),
            LiveDevice {
                record,
                online_since: now,
                last_report,
            },
        );
        placement
    }

    /// Folds an ingested reading into the device's history, creating it on
    /// first contact.
    pub fn record_report(&mut self, device_id: &str, reading: &Reading, now: DateTime<Utc>) {
        match self.histories.get_mut(device_id) {
            Some(history) => history.observe(reading),
            None => {
                self.histories
                    .insert(device_id.to_string(), DeviceHistory::first_report(reading, now));
            }
        }
    }

    /// Moves a live device into the archive. The record is snapshotted before
    /// the live entry goes away; the history is charged with the online span
    /// and exactly one disconnection.
    pub fn archive(&mut self, device_id: &str, now: DateTime<Utc>) -> Option<&ArchivedDevice> {
        let live = self.live.remove(device_id)?;
        let history = self
            .histories
            .entry(device_id.to_string())
            .or_insert_with(|| DeviceHistory::baseline(&live.record, live.online_since));
        charge_disconnection(history, &live);

        let archived = ArchivedDevice {
            record: live.record,
            archived_at: now,
        };
        self.archive.insert(device_id.to_string(), archived);
        self.archive.get(device_id)
    }

    pub fn live(&self, device_id: &str) -> Option<&LiveDevice> {
        self.live.get(device_id)
    }

    pub fn archived(&self, device_id: &str) -> Option<&ArchivedDevice> {
        self.archive.get(device_id)
    }

    pub fn history(&self, device_id: &str) -> Option<&DeviceHistory> {
        self.histories.get(device_id)
    }

    pub fn live_devices(&self) -> impl Iterator<Item = &LiveDevice> {
        self.live.values()
    }

    pub fn archived_devices(&self) -> impl Iterator<Item = &ArchivedDevice> {
        self.archive.values()
    }

    pub fn histories(&self) -> impl Iterator<Item = (&DeviceId, &DeviceHistory)> {
        self.histories.iter()
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    pub fn archived_count(&self) -> usize {
        self.archive.len()
    }

    /// Restarts history for every live device from its current values and
    /// forgets the archive along with the histories only it referenced.
    pub fn clear_history(&mut self, now: DateTime<Utc>) {
        self.archive.clear();
        let rebased: HashMap<DeviceId, DeviceHistory> = self
            .live
            .iter_mut()
            .map(|(id, live)| {
                live.online_since = now;
                (id.clone(), DeviceHistory::baseline(&live.record, now))
            })
            .collect();
        self.histories = rebased;
    }

    pub fn clear(&mut self) {
        self.live.clear();
        self.archive.clear();
        self.histories.clear();
    }

    /// Durable copy of histories and archive. Live devices are exported as if
    /// archived at `now`, so a restart brings them back through reconnection;
    /// the registry itself is left untouched.
    pub fn export(&self, now: DateTime<Utc>) -> (BTreeMap<DeviceId, DeviceHistory>, BTreeMap<DeviceId, ArchiveEntry>) {
        let mut histories: BTreeMap<DeviceId, DeviceHistory> = self
            .histories
            .iter()
            .map(|(id, history)| (id.clone(), history.clone()))
            .collect();

        let mut archive: BTreeMap<DeviceId, ArchiveEntry> = self
            .archive
            .iter()
            .map(|(id, archived)| {
                let history = histories
                    .get(id)
                    .cloned()
                    .unwrap_or_else(|| DeviceHistory::baseline(&archived.record, archived.archived_at));
                let entry = ArchiveEntry {
                    record: archived.record.clone(),
                    archived_at: archived.archived_at,
                    history,
                };
                (id.clone(), entry)
            })
            .collect();

        for (id, live) in &self.live {
            let history = histories
                .entry(id.clone())
                .or_insert_with(|| DeviceHistory::baseline(&live.record, live.online_since));
            charge_disconnection(history, live);
            let entry = ArchiveEntry {
                record: live.record.clone(),
                archived_at: now,
                history: history.clone(),
            };
            archive.insert(id.clone(), entry);
        }
        (histories, archive)
    }

    /// Replaces histories and archive with recovered documents. An archive
    /// entry whose history is missing from `histories` brings its own.
    pub fn restore(
        &mut self,
        histories: BTreeMap<DeviceId, DeviceHistory>,
        archive: BTreeMap<DeviceId, ArchiveEntry>,
    ) {
        self.histories = histories.into_iter().collect();
        self.archive.clear();
        for (id, entry) in archive {
            if self.live.contains_key(&id) {
                continue;
            }
            self.histories.entry(id.clone()).or_insert(entry.history);
            self.archive.insert(
                id,
                ArchivedDevice {
                    record: entry.record,
                    archived_at: entry.archived_at,
                },
            );
        }
    }
}

/// Online span since `online_since` plus one disconnection.
fn charge_disconnection(history: &mut DeviceHistory, live: &LiveDevice) {
    let online_secs = (live.last_report - live.online_since).num_seconds().max(0);
    history.cumulative_online_secs += u64::try_from(online_secs).unwrap_or(0);
    history.disconnection_count += 1;
    if live.last_report > history.last_online_time {
        history.last_online_time = live.last_report;
    }
}
