//! # Lifecycle Sweep
//!
//! Devices: Live -> Archived after `device_timeout` without a report, back to
//! Live on the next report. Receivers: Live -> Removed after
//! `receiver_timeout`. The same [`Liveness`] thresholds are used by the
//! statistics pass so the two never disagree about who is active.
//!
//! A sweep only acts on readings old enough to prune, so a second sweep at the
//! same instant finds nothing to do.

use std::collections::BTreeSet;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, warn};

use super::arbitration::{select_best, ScoringPolicy};
use super::devices::DeviceRegistry;
use super::readings::ReadingStore;
use super::receivers::ReceiverRegistry;
use crate::model::{DeviceId, ReceiverId};

/// Longest accepted timeout, ten years.
pub const MAX_TIMEOUT_SECS: u64 = 3650 * 24 * 60 * 60;

/// Inactivity thresholds shared by the sweep and the statistics pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Liveness {
    device_timeout: TimeDelta,
    receiver_timeout: TimeDelta,
}

impl Liveness {
    /// Receivers must time out before devices do; a receiver timeout that is
    /// not shorter than the device timeout is lowered to half of it. Both are
    /// capped at [`MAX_TIMEOUT_SECS`].
    pub fn new(device_timeout_secs: u64, receiver_timeout_secs: u64) -> Self {
        if device_timeout_secs > MAX_TIMEOUT_SECS {
            warn!(
                requested = device_timeout_secs,
                max = MAX_TIMEOUT_SECS,
                "device timeout too large, clamped"
            );
        }
        let device_secs = device_timeout_secs.clamp(1, MAX_TIMEOUT_SECS);
        let receiver_secs = if receiver_timeout_secs == 0 || receiver_timeout_secs >= device_secs {
            (device_secs / 2).max(1)
        } else {
            receiver_timeout_secs
        };
        Self {
            device_timeout: timeout(device_secs),
            receiver_timeout: timeout(receiver_secs),
        }
    }

    pub fn device_timeout(&self) -> TimeDelta {
        self.device_timeout
    }

    pub fn receiver_timeout(&self) -> TimeDelta {
        self.receiver_timeout
    }

    /// Readings observed at or before this instant are stale.
    pub fn device_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_sub_signed(self.device_timeout)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    pub fn receiver_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_sub_signed(self.receiver_timeout)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    pub fn device_is_active(&self, last_report: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        last_report > self.device_cutoff(now)
    }

    pub fn receiver_is_active(&self, last_seen: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        last_seen > self.receiver_cutoff(now)
    }
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new(300, 120)
    }
}

fn timeout(secs: u64) -> TimeDelta {
    i64::try_from(secs.min(MAX_TIMEOUT_SECS))
        .ok()
        .and_then(TimeDelta::try_seconds)
        .unwrap_or(TimeDelta::days(3650))
}

/// What one sweep changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub pruned_readings: usize,
    pub archived_devices: Vec<DeviceId>,
    pub rearbitrated_devices: Vec<DeviceId>,
    pub removed_receivers: Vec<ReceiverId>,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.pruned_readings == 0
            && self.archived_devices.is_empty()
            && self.rearbitrated_devices.is_empty()
            && self.removed_receivers.is_empty()
    }
}

pub(crate) fn sweep(
    readings: &mut ReadingStore,
    devices: &mut DeviceRegistry,
    receivers: &mut ReceiverRegistry,
    liveness: &Liveness,
    policy: &ScoringPolicy,
    now: DateTime<Utc>,
) -> SweepReport {
    let mut report = SweepReport::default();

    let pruned = readings.prune_older_than(liveness.device_cutoff(now));
    report.pruned_readings = pruned.len();

    let mut touched = BTreeSet::new();
    for stale in &pruned {
        receivers.detach_device(&stale.receiver_id, &stale.device_id);
        touched.insert(stale.device_id.clone());
    }

    for device_id in touched {
        if devices.live(&device_id).is_none() {
            continue;
        }
        let Some(candidates) = readings.readings_for(&device_id) else {
            if devices.archive(&device_id, now).is_some() {
                debug!(device_id = %device_id, "device archived after inactivity");
                report.archived_devices.push(device_id);
            }
            continue;
        };
        let last_report = readings.newest_observation(&device_id).unwrap_or(now);
        if let Some(best) = select_best(candidates, policy, now) {
            let record = best.to_record(&device_id);
            devices.place(record, last_report, now);
            report.rearbitrated_devices.push(device_id);
        }
    }

    report.removed_receivers = receivers.remove_stale(liveness.receiver_cutoff(now));
    for receiver_id in &report.removed_receivers {
        debug!(receiver_id = %receiver_id, "receiver removed after inactivity");
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn receiver_timeout_is_kept_below_device_timeout() {
        let liveness = Liveness::new(300, 600);
        assert_eq!(liveness.receiver_timeout(), TimeDelta::seconds(150));
        assert_eq!(liveness.device_timeout(), TimeDelta::seconds(300));

        let liveness = Liveness::new(300, 120);
        assert_eq!(liveness.receiver_timeout(), TimeDelta::seconds(120));
    }

    #[test]
    fn activity_boundary_is_exclusive_at_the_timeout() {
        let liveness = Liveness::new(300, 120);
        let now = Utc::now();
        assert!(liveness.device_is_active(now - TimeDelta::seconds(299), now));
        assert!(!liveness.device_is_active(now - TimeDelta::seconds(300), now));
        assert!(!liveness.receiver_is_active(now - TimeDelta::seconds(120), now));
    }

    #[test]
    fn oversized_timeouts_are_capped() {
        let liveness = Liveness::new(u64::MAX, u64::MAX);
        assert_eq!(liveness.device_timeout(), TimeDelta::seconds(MAX_TIMEOUT_SECS as i64));
        assert_eq!(liveness.receiver_timeout(), TimeDelta::seconds(MAX_TIMEOUT_SECS as i64 / 2));

        let liveness = Liveness::new(10_000_000_000_000_000, 120);
        let now = Utc::now();
        assert!(liveness.device_cutoff(now) < now);
        assert!(liveness.device_is_active(now - TimeDelta::days(365), now));
        assert!(!liveness.receiver_is_active(now - TimeDelta::seconds(120), now));
        assert_eq!(
            liveness.device_cutoff(DateTime::<Utc>::MIN_UTC),
            DateTime::<Utc>::MIN_UTC
        );
    }
}
