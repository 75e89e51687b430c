//! Document schemas written to the store, plus the collection layout.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Collection of per-device status documents, keyed by device identifier.
pub const DEVICES: &str = "raspberry_devices";
/// Append-only collection of detection samples.
pub const DETECTIONS: &str = "detections";
/// Append-only collection of alerts raised for nonzero detections.
pub const ALERTS: &str = "alerts";
/// Collection holding the aggregate statistics singleton.
pub const STATISTICS: &str = "statistics";
/// Key of the statistics singleton inside [`STATISTICS`].
pub const STATISTICS_KEY: &str = "global";

/// Status written for every device that just reported.
pub const DEVICE_STATUS_ONLINE: &str = "online";
/// Alert type tag attached to every alert this service raises.
pub const ALERT_TYPE_AEDES: &str = "aedes_detected";
/// Initial status of a freshly raised alert.
pub const ALERT_STATUS_ACTIVE: &str = "active";

/// Per-device status document, merge-updated on every report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub raspberry_id: String,
    pub name: Option<String>,
    pub location: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub last_seen: DateTime<Utc>,
    pub status: String,
    pub temperature: f64,
    pub humidity: f64,
    /// Detection count of the most recent sample. The fleet-wide running
    /// total lives in the statistics singleton.
    pub total_detections: i64,
    pub updated_at: DateTime<Utc>,
    /// Stamped on the first report from a device and omitted from every
    /// later merge so the original value survives.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// One detection sample, appended per accepted report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionRecord {
    pub raspberry_id: String,
    pub timestamp: DateTime<Utc>,
    pub detection_count: i64,
    pub temperature: f64,
    pub humidity: f64,
    pub latitude: f64,
    pub longitude: f64,
    /// Object key of the stored image inside the blob store.
    pub image_filename: String,
    pub image_url: String,
    pub location: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Alert raised when a sample detected at least one mosquito.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRecord {
    pub raspberry_id: String,
    pub location: Option<String>,
    pub detection_count: i64,
    pub timestamp: DateTime<Utc>,
    pub image_url: String,
    pub alert_type: String,
    pub status: String,
}

/// Success acknowledgement returned to the device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportAck {
    pub status: String,
    pub message: String,
    pub raspberry_id: String,
    pub detection_count: i64,
    pub image_url: String,
    pub timestamp: DateTime<Utc>,
    /// Key the detection record was appended under.
    pub detection_key: String,
}
