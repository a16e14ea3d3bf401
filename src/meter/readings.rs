//! Per-cycle result accumulation
//!
//! Recognizers add the value of each region into the accumulator of its
//! identifier. Several regions sharing one identifier compose a multi-digit
//! number through their scalers (`4·10² + 3·10¹ + 2·10⁰`).
//!
//! A region that cannot be read poisons its identifier for the cycle: the
//! value becomes NaN and no later region of the same identifier revives it,
//! whatever the order the regions were declared in.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::vision::Region;

/// A reading handed to the caller
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reading {
    pub identifier: String,
    pub value: f64,
    pub time: DateTime<Utc>,
}

impl Reading {
    pub fn new(identifier: impl Into<String>, value: f64, time: DateTime<Utc>) -> Self {
        Self {
            identifier: identifier.into(),
            value,
            time,
        }
    }
}

#[derive(Debug, Clone)]
struct RawResult {
    value: f64,
    confidence_id: Option<String>,
    min_confidence: f64,
}

impl Default for RawResult {
    fn default() -> Self {
        Self {
            value: 0.0,
            confidence_id: None,
            min_confidence: f64::MAX,
        }
    }
}

/// Raw results of one cycle, keyed by identifier
#[derive(Debug, Clone, Default)]
pub struct RawReadings {
    results: BTreeMap<String, RawResult>,
}

impl RawReadings {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&mut self, region: &Region) -> &mut RawResult {
        let result = self.results.entry(region.identifier().to_string()).or_default();
        if let Some(conf_id) = region.confidence_id() {
            result.confidence_id = Some(conf_id.to_string());
        }
        result
    }

    /// Add an already scaled value read with `confidence` for `region`
    pub fn add(&mut self, region: &Region, value: f64, confidence: f64) {
        let result = self.entry(region);
        // NaN stays NaN
        result.value += value;
        result.min_confidence = result.min_confidence.min(confidence);
    }

    /// Mark the identifier of `region` unreadable for this cycle
    pub fn mark_unreadable(&mut self, region: &Region) {
        let result = self.entry(region);
        result.value = f64::NAN;
        result.min_confidence = 0.0;
    }

    /// Current value of an identifier, NaN when unreadable
    pub fn value(&self, identifier: &str) -> Option<f64> {
        self.results.get(identifier).map(|r| r.value)
    }

    /// Minimum accepted word confidence of an identifier
    pub fn min_confidence(&self, identifier: &str) -> Option<f64> {
        self.results.get(identifier).map(|r| r.min_confidence)
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Emit readings in identifier order, at most `max_reads`. Each readable
    /// identifier is followed by its confidence reading if it has one.
    /// Whatever does not fit is dropped.
    pub fn into_readings(self, max_reads: usize, time: DateTime<Utc>) -> Vec<Reading> {
        let mut readings = Vec::with_capacity(max_reads.min(self.results.len() * 2));

        for (identifier, result) in self.results {
            if result.value.is_nan() {
                debug!("'{}' unreadable this cycle, skipped", identifier);
                continue;
            }
            if readings.len() >= max_reads {
                break;
            }
            readings.push(Reading::new(identifier, result.value, time));

            if let Some(conf_id) = result.confidence_id {
                if readings.len() >= max_reads {
                    break;
                }
                readings.push(Reading::new(conf_id, result.min_confidence, time));
            }
        }

        readings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(id: &str) -> Region {
        Region::new(id).unwrap()
    }

    #[test]
    fn test_shared_identifier_sums() {
        let mut reads = RawReadings::new();
        reads.add(&region("id1"), 432.0, 90.0);
        reads.add(&region("id1"), 432.0, 80.0);
        assert_eq!(reads.value("id1"), Some(864.0));
        assert_eq!(reads.min_confidence("id1"), Some(80.0));
        assert_eq!(reads.len(), 1);
    }

    #[test]
    fn test_unreadable_region_poisons_identifier_in_any_order() {
        let mut fail_last = RawReadings::new();
        fail_last.add(&region("id1"), 400.0, 90.0);
        fail_last.mark_unreadable(&region("id1"));
        assert!(fail_last.value("id1").unwrap().is_nan());

        let mut fail_first = RawReadings::new();
        fail_first.mark_unreadable(&region("id1"));
        fail_first.add(&region("id1"), 32.0, 90.0);
        assert!(fail_first.value("id1").unwrap().is_nan());
        assert_eq!(fail_first.min_confidence("id1"), Some(0.0));
    }

    #[test]
    fn test_into_readings_skips_nan_and_orders_by_key() {
        let now = Utc::now();
        let mut reads = RawReadings::new();
        reads.add(&region("water"), 12.5, 70.0);
        reads.mark_unreadable(&region("gas"));
        reads.add(&region("electricity"), 3.0, 70.0);

        let readings = reads.into_readings(10, now);
        let ids: Vec<_> = readings.iter().map(|r| r.identifier.as_str()).collect();
        assert_eq!(ids, vec!["electricity", "water"]);
        assert!(readings.iter().all(|r| r.time == now));
    }

    #[test]
    fn test_confidence_reading_follows_value() {
        let conf = region("id1").with_confidence_id(Some("id1_conf".to_string()));
        let mut reads = RawReadings::new();
        reads.add(&conf, 432.0, 88.0);
        reads.add(&region("id1"), 0.5, 61.5);
        reads.add(&region("id2"), 7.0, 99.0);

        let readings = reads.into_readings(10, Utc::now());
        let pairs: Vec<_> = readings.iter().map(|r| (r.identifier.as_str(), r.value)).collect();
        assert_eq!(pairs, vec![("id1", 432.5), ("id1_conf", 61.5), ("id2", 7.0)]);
    }

    #[test]
    fn test_truncation_at_max_reads() {
        let mut reads = RawReadings::new();
        for id in ["a", "b", "c", "d"] {
            reads.add(&region(id), 1.0, 50.0);
        }
        assert_eq!(reads.clone().into_readings(2, Utc::now()).len(), 2);
        assert_eq!(reads.clone().into_readings(4, Utc::now()).len(), 4);
        assert_eq!(reads.clone().into_readings(9, Utc::now()).len(), 4);
        assert!(reads.into_readings(0, Utc::now()).is_empty());
    }

    #[test]
    fn test_truncation_can_split_value_and_confidence() {
        let conf = region("a").with_confidence_id(Some("a_conf".to_string()));
        let mut reads = RawReadings::new();
        reads.add(&conf, 1.0, 50.0);
        reads.add(&region("b"), 2.0, 50.0);

        let readings = reads.into_readings(1, Utc::now());
        assert_eq!(readings.len(), 1);
        assert_eq!(readings[0].identifier, "a");
    }
}
