//! # Arbitration
//!
//! Picks the one reading that best represents a device right now, among every
//! receiver currently holding a reading for it.
//!
//! Each candidate scores `signal_weight * signal_strength - age_weight * age`,
//! with age in fractional seconds measured against the arbitration instant.
//! With the default unit weights a reading loses one point per second of age,
//! so recency dominates once ages differ by more than the signal gap, and the
//! stronger signal wins among readings heard at roughly the same time.
//!
//! Ties: candidates are visited in the order given (the reading store yields
//! ascending receiver ids) and a later candidate only displaces the current
//! best when it scores strictly higher, so an exact tie goes to the smallest
//! receiver id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{DeviceRecord, Reading};

/// Weights of the scoring formula. Heuristic, so configurable.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoringPolicy {
    pub signal_weight: f64,
    pub age_weight: f64,
}

impl Default for ScoringPolicy {
    fn default() -> Self {
        Self {
            signal_weight: 1.0,
            age_weight: 1.0,
        }
    }
}

impl ScoringPolicy {
    pub fn score(&self, reading: &Reading, now: DateTime<Utc>) -> f64 {
        self.signal_weight * f64::from(reading.signal_strength) - self.age_weight * age_secs(reading, now)
    }
}

/// Age of a reading in seconds; readings stamped in the future count as fresh.
pub fn age_secs(reading: &Reading, now: DateTime<Utc>) -> f64 {
    let millis = (now - reading.observed_at).num_milliseconds().max(0);
    millis as f64 / 1000.0
}

/// The winning candidate of one arbitration round.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Selection<'a> {
    pub receiver_id: &'a str,
    pub reading: &'a Reading,
    pub score: f64,
}

impl Selection<'_> {
    pub fn to_record(&self, device_id: &str) -> DeviceRecord {
        DeviceRecord::from_reading(device_id, self.receiver_id, self.reading)
    }
}

/// Returns the highest scoring candidate, or `None` when there are none.
pub fn select_best<'a, I, K>(candidates: I, policy: &ScoringPolicy, now: DateTime<Utc>) -> Option<Selection<'a>>
where
    I: IntoIterator<Item = (&'a K, &'a Reading)>,
    K: AsRef<str> + 'a + ?Sized,
{
    let mut best: Option<Selection<'a>> = None;
    for (receiver_id, reading) in candidates {
        let score = policy.score(reading, now);
        match best {
            Some(current) if score <= current.score => {}
            _ => {
                best = Some(Selection {
                    receiver_id: receiver_id.as_ref(),
                    reading,
                    score,
                })
            }
        }
    }
    best
}
