//! # Reading Store
//!
//! Latest reading per `(device, receiver)` pair. Receivers are kept in a
//! `BTreeMap` so every consumer, arbitration included, visits them in
//! ascending receiver id order.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};

use crate::model::{DeviceId, Reading, ReceiverId};

/// A reading dropped by [`ReadingStore::prune_older_than`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrunedReading {
    pub device_id: DeviceId,
    pub receiver_id: ReceiverId,
}

#[derive(Debug, Default)]
pub struct ReadingStore {
    by_device: HashMap<DeviceId, BTreeMap<ReceiverId, Reading>>,
}

impl ReadingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `reading` for the pair, returning whatever it replaced.
    pub fn upsert(&mut self, device_id: &str, receiver_id: &str, reading: Reading) -> Option<Reading> {
        self.by_device
            .entry(device_id.to_string())
            .or_default()
            .insert(receiver_id.to_string(), reading)
    }

    pub fn get(&self, device_id: &str, receiver_id: &str) -> Option<&Reading> {
        self.by_device.get(device_id)?.get(receiver_id)
    }

    /// All readings currently held for a device, in receiver id order.
    pub fn readings_for(&self, device_id: &str) -> Option<&BTreeMap<ReceiverId, Reading>> {
        self.by_device.get(device_id)
    }

    /// Newest `observed_at` across every receiver that reported the device.
    pub fn newest_observation(&self, device_id: &str) -> Option<DateTime<Utc>> {
        self.by_device
            .get(device_id)?
            .values()
            .map(|reading| reading.observed_at)
            .max()
    }

    /// Drops every reading observed at or before `cutoff`. Devices left with no
    /// readings disappear from the store entirely.
    pub fn prune_older_than(&mut self, cutoff: DateTime<Utc>) -> Vec<PrunedReading> {
        let mut pruned = Vec::new();
        self.by_device.retain(|device_id, readings| {
            readings.retain(|receiver_id, reading| {
                if reading.observed_at <= cutoff {
                    pruned.push(PrunedReading {
                        device_id: device_id.clone(),
                        receiver_id: receiver_id.clone(),
                    });
                    false
                } else {
                    true
                }
            });
            !readings.is_empty()
        });
        pruned
    }

    pub fn contains_device(&self, device_id: &str) -> bool {
        self.by_device.contains_key(device_id)
    }

    /// Total number of readings across all devices.
    pub fn len(&self) -> usize {
        self.by_device.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_device.is_empty()
    }

    pub fn clear(&mut self) {
        self.by_device.clear();
    }
}
