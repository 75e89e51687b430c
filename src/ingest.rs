//! The ingestion pipeline: everything that happens to one accepted report.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::{info, instrument, warn};

use crate::blob_store::{BlobStore, StoredImage};
use crate::document_store::DocumentStore;
use crate::error::IngestError;
use crate::records::{
    AlertRecord, DetectionRecord, DeviceRecord, ReportAck, ALERTS, ALERT_STATUS_ACTIVE,
    ALERT_TYPE_AEDES, DETECTIONS, DEVICES, DEVICE_STATUS_ONLINE, STATISTICS, STATISTICS_KEY,
};
use crate::report::SensorReport;
use crate::stats::Statistics;

/// Executes the ordered side effects for one validated report.
pub struct Ingestor {
    blob_store: Arc<dyn BlobStore>,
    documents: Arc<dyn DocumentStore>,
}

impl Ingestor {
    pub fn new(blob_store: Arc<dyn BlobStore>, documents: Arc<dyn DocumentStore>) -> Self {
        Self {
            blob_store,
            documents,
        }
    }

    /// Ingests one report:
    ///
    /// 1. upload the image (failure aborts before any document write),
    /// 2. merge the device record, stamping `created_at` on first sighting,
    /// 3. append the detection record,
    /// 4. append an alert when the sample detected anything,
    /// 5. recompute statistics, best effort (failure logged and swallowed).
    ///
    /// Steps 2-4 are not transactionally linked; a failure in between
    /// leaves the earlier writes in place.
    #[instrument(skip(self, report), fields(raspberry_id = %report.raspberry_id, detection_count = report.detection_count))]
    pub async fn ingest(&self, mut report: SensorReport) -> Result<ReportAck, IngestError> {
        metrics::counter!("ingest.reports.received").increment(1);

        let now = Utc::now();
        let size_bytes = report.image.content.len();
        info!(size_bytes, "Report received");

        let image_bytes = std::mem::take(&mut report.image.content);
        let upload_started = Instant::now();
        let image = self
            .blob_store
            .store_detection_image(&report.raspberry_id, image_bytes, &report.image.content_type)
            .await
            .map_err(IngestError::Upstream)?;
        metrics::histogram!("ingest.upload.duration_seconds")
            .record(upload_started.elapsed().as_secs_f64());

        self.upsert_device(&report, now)
            .await
            .map_err(IngestError::Upstream)?;

        let detection_key = self
            .append_detection(&report, &image, now)
            .await
            .map_err(IngestError::Upstream)?;
        metrics::counter!("ingest.detections.stored").increment(1);

        if report.detection_count > 0 {
            self.append_alert(&report, &image, now)
                .await
                .map_err(IngestError::Upstream)?;
            metrics::counter!("ingest.alerts.created").increment(1);
            info!(detection_count = report.detection_count, "Alert raised");
        }

        // Statistics must never fail the request the device is retrying.
        if let Err(err) = self.update_statistics(now).await {
            metrics::counter!("ingest.stats.failures").increment(1);
            warn!(error = %err, "Statistics update failed");
        }

        info!(detection_key = %detection_key, image_url = %image.url, "Report stored");

        Ok(ReportAck {
            status: "success".to_owned(),
            message: format!("Data received from {}", report.raspberry_id),
            raspberry_id: report.raspberry_id,
            detection_count: report.detection_count,
            image_url: image.url,
            timestamp: now,
            detection_key,
        })
    }

    async fn upsert_device(
        &self,
        report: &SensorReport,
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let existing = self.documents.get(DEVICES, &report.raspberry_id).await?;
        if existing.is_none() {
            info!(raspberry_id = %report.raspberry_id, "New device registered");
        }

        let device = DeviceRecord {
            raspberry_id: report.raspberry_id.clone(),
            name: report.name.clone(),
            location: report.location.clone(),
            latitude: report.latitude,
            longitude: report.longitude,
            last_seen: now,
            status: DEVICE_STATUS_ONLINE.to_owned(),
            temperature: report.temperature,
            humidity: report.humidity,
            total_detections: report.detection_count,
            updated_at: now,
            created_at: existing.is_none().then_some(now),
        };
        self.documents
            .merge(DEVICES, &report.raspberry_id, &serde_json::to_value(&device)?)
            .await
    }

    async fn append_detection(
        &self,
        report: &SensorReport,
        image: &StoredImage,
        now: DateTime<Utc>,
    ) -> anyhow::Result<String> {
        let detection = DetectionRecord {
            raspberry_id: report.raspberry_id.clone(),
            timestamp: now,
            detection_count: report.detection_count,
            temperature: report.temperature,
            humidity: report.humidity,
            latitude: report.latitude,
            longitude: report.longitude,
            image_filename: image.path.clone(),
            image_url: image.url.clone(),
            location: report.location.clone(),
            created_at: now,
        };
        self.documents
            .push(DETECTIONS, &serde_json::to_value(&detection)?)
            .await
    }

    async fn append_alert(
        &self,
        report: &SensorReport,
        image: &StoredImage,
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let alert = AlertRecord {
            raspberry_id: report.raspberry_id.clone(),
            location: report.location.clone(),
            detection_count: report.detection_count,
            timestamp: now,
            image_url: image.url.clone(),
            alert_type: ALERT_TYPE_AEDES.to_owned(),
            status: ALERT_STATUS_ACTIVE.to_owned(),
        };
        self.documents
            .push(ALERTS, &serde_json::to_value(&alert)?)
            .await?;
        Ok(())
    }

    async fn update_statistics(&self, now: DateTime<Utc>) -> anyhow::Result<()> {
        let devices = self.documents.list(DEVICES).await?;
        let detections = self.documents.list(DETECTIONS).await?;
        let stats = Statistics::recompute(&devices, &detections, now);
        self.documents
            .merge(STATISTICS, STATISTICS_KEY, &serde_json::to_value(&stats)?)
            .await
    }
}
