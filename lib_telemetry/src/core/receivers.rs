//! # Receiver Registry
//!
//! Liveness and counters per receiver. Receivers carry no history: one that
//! times out is dropped and simply registers again on its next batch.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};

use crate::model::{ReceiverId, ReceiverRecord};

#[derive(Debug, Default)]
pub struct ReceiverRegistry {
    receivers: HashMap<ReceiverId, ReceiverRecord>,
}

impl ReceiverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks a batch from `receiver_id` as received at `now`. Returns `true`
    /// when the receiver was not registered before.
    pub fn touch(
        &mut self,
        receiver_id: &str,
        reported_device_count: u64,
        batch_timestamp: Option<i64>,
        now: DateTime<Utc>,
    ) -> bool {
        match self.receivers.get_mut(receiver_id) {
            Some(receiver) => {
                receiver.last_seen = now;
                receiver.reported_device_count = reported_device_count;
                receiver.batch_count += 1;
                receiver.last_batch_timestamp = batch_timestamp;
                false
            }
            None => {
                self.receivers.insert(
                    receiver_id.to_string(),
                    ReceiverRecord {
                        receiver_id: receiver_id.to_string(),
                        first_seen: now,
                        last_seen: now,
                        reported_device_count,
                        batch_count: 1,
                        last_batch_timestamp: batch_timestamp,
                        devices: BTreeSet::new(),
                    },
                );
                true
            }
        }
    }

    pub fn attach_device(&mut self, receiver_id: &str, device_id: &str) {
        if let Some(receiver) = self.receivers.get_mut(receiver_id) {
            receiver.devices.insert(device_id.to_string());
        }
    }

    pub fn detach_device(&mut self, receiver_id: &str, device_id: &str) {
        if let Some(receiver) = self.receivers.get_mut(receiver_id) {
            receiver.devices.remove(device_id);
        }
    }

    /// Removes every receiver last heard at or before `cutoff`.
    pub fn remove_stale(&mut self, cutoff: DateTime<Utc>) -> Vec<ReceiverId> {
        let mut removed = Vec::new();
        self.receivers.retain(|id, receiver| {
            let keep = receiver.last_seen > cutoff;
            if !keep {
                removed.push(id.clone());
            }
            keep
        });
        removed.sort();
        removed
    }

    pub fn get(&self, receiver_id: &str) -> Option<&ReceiverRecord> {
        self.receivers.get(receiver_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ReceiverRecord> {
        self.receivers.values()
    }

    pub fn len(&self) -> usize {
        self.receivers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receivers.is_empty()
    }

    pub fn clear(&mut self) {
        self.receivers.clear();
    }
}
