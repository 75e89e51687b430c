//! Fleet-wide aggregate statistics, recomputed from full collection scans.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::records::DEVICE_STATUS_ONLINE;

/// Average temperature reported when no detection carries a usable sample.
pub const DEFAULT_AVG_TEMPERATURE: f64 = 25.0;
/// Average humidity reported when no detection carries a usable sample.
pub const DEFAULT_AVG_HUMIDITY: f64 = 65.0;

/// The statistics singleton kept under `statistics/global`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    pub total_detections: i64,
    pub active_devices: i64,
    pub avg_temperature: f64,
    pub avg_humidity: f64,
    pub last_updated: DateTime<Utc>,
    pub total_devices: i64,
}

impl Statistics {
    /// Recomputes the aggregate from complete scans of the device and
    /// detection collections.
    ///
    /// Deliberately not incremental: rebuilding from scratch keeps the
    /// singleton drift-free under racing last-write-wins updates, at the
    /// cost of scanning both collections on every report. Documents are
    /// read leniently; a missing or wrongly-typed field counts as absent,
    /// and the detection total saturates at the i64 bounds instead of
    /// overflowing.
    pub fn recompute(devices: &[Value], detections: &[Value], now: DateTime<Utc>) -> Self {
        let total_detections = detections
            .iter()
            .map(|doc| doc.get("detection_count").and_then(Value::as_i64).unwrap_or(0))
            .fold(0i64, i64::saturating_add);
        let active_devices = devices
            .iter()
            .filter(|doc| doc.get("status").and_then(Value::as_str) == Some(DEVICE_STATUS_ONLINE))
            .count() as i64;

        Self {
            total_detections,
            active_devices,
            avg_temperature: average(&samples(detections, "temperature"))
                .unwrap_or(DEFAULT_AVG_TEMPERATURE),
            avg_humidity: average(&samples(detections, "humidity"))
                .unwrap_or(DEFAULT_AVG_HUMIDITY),
            last_updated: now,
            total_devices: devices.len() as i64,
        }
    }
}

/// Collects the usable readings for `field`: present, numeric and nonzero.
///
/// Zero doubles as the missing-reading default on the wire, so a zero
/// reading is treated as no reading at all.
fn samples(detections: &[Value], field: &str) -> Vec<f64> {
    detections
        .iter()
        .filter_map(|doc| doc.get(field).and_then(Value::as_f64))
        .filter(|value| *value != 0.0)
        .collect()
}

fn average(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}
