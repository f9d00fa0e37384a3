//! Beaconing / tunnel detector.
//!
//! Grounded on `examples/original_source/backend/app/collectors/tunnel_detector.py`:
//! a rolling window of observed contact timestamps per `(source, destination)`
//! pair is checked for low-variance intervals, the hallmark of C2 beaconing.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use parking_lot::Mutex;
use reconwatch_types::BeaconingPattern;

const WINDOW: usize = 32;
const MIN_SAMPLES: usize = 5;
/// Coefficient of variation below this threshold reads as "too regular to
/// be human/organic traffic" (tunnel_detector.py's beacon heuristic).
const VARIANCE_THRESHOLD: f64 = 0.15;

struct Contact {
    timestamps: VecDeque<DateTime<Utc>>,
}

#[derive(Default)]
pub struct BeaconDetector {
    contacts: Mutex<HashMap<(String, String), Contact>>,
}

impl BeaconDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_contact(&self, source_ip: &str, destination: &str, at: DateTime<Utc>) {
        let mut contacts = self.contacts.lock();
        let entry = contacts
            .entry((source_ip.to_string(), destination.to_string()))
            .or_insert_with(|| Contact { timestamps: VecDeque::with_capacity(WINDOW) });
        entry.timestamps.push_back(at);
        if entry.timestamps.len() > WINDOW {
            entry.timestamps.pop_front();
        }
    }

    /// Evaluates every tracked `(source, destination)` pair and returns a
    /// `BeaconingPattern` for any whose inter-contact intervals are both
    /// plentiful and suspiciously regular.
    pub fn detect(&self) -> Vec<BeaconingPattern> {
        let contacts = self.contacts.lock();
        let mut patterns = Vec::new();

        for ((source_ip, destination), contact) in contacts.iter() {
            if contact.timestamps.len() < MIN_SAMPLES {
                continue;
            }
            let intervals: Vec<f64> = contact
                .timestamps
                .iter()
                .zip(contact.timestamps.iter().skip(1))
                .map(|(a, b)| (*b - *a).num_milliseconds() as f64 / 1000.0)
                .collect();

            let mean = intervals.iter().sum::<f64>() / intervals.len() as f64;
            if mean <= 0.0 {
                continue;
            }
            let variance = intervals.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / intervals.len() as f64;
            let stddev = variance.sqrt();
            let coefficient_of_variation = stddev / mean;

            if coefficient_of_variation <= VARIANCE_THRESHOLD {
                let confidence = (1.0 - coefficient_of_variation).clamp(0.0, 1.0);
                patterns.push(BeaconingPattern {
                    pattern_id: format!("beacon-{}", correlation_id(source_ip, destination)),
                    source_ip: source_ip.clone(),
                    destination: destination.clone(),
                    interval_seconds: mean,
                    interval_variance: variance,
                    confidence,
                    sample_count: contact.timestamps.len() as u32,
                    first_seen: *contact.timestamps.front().unwrap(),
                    last_seen: *contact.timestamps.back().unwrap(),
                });
            }
        }
        patterns
    }
}

/// Deterministic correlation id for a `(source, destination)` pair, matching
/// `tunnel_detector.py`'s `hashlib.md5(...)` id derivation.
fn correlation_id(source_ip: &str, destination: &str) -> String {
    let digest = Md5::digest(format!("{source_ip}|{destination}").as_bytes());
    hex::encode(digest).chars().take(12).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn regular_intervals_are_flagged_as_beaconing() {
        let detector = BeaconDetector::new();
        let base = Utc::now();
        for i in 0..10 {
            detector.record_contact("10.0.0.5", "203.0.113.9", base + Duration::seconds(i * 60));
        }
        let patterns = detector.detect();
        assert_eq!(patterns.len(), 1);
        assert!((patterns[0].interval_seconds - 60.0).abs() < 1.0);
    }

    #[test]
    fn irregular_intervals_are_not_flagged() {
        let detector = BeaconDetector::new();
        let base = Utc::now();
        let offsets = [0, 3, 47, 12, 90, 5, 61];
        for off in offsets {
            detector.record_contact("10.0.0.5", "203.0.113.9", base + Duration::seconds(off));
        }
        assert!(detector.detect().is_empty());
    }
}
