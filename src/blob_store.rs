//! Blob store gateway: uploaded detection images and their public URLs.

use std::sync::Mutex;

use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::ObjectCannedAcl;
use aws_sdk_s3::Client as S3Client;
use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::config::S3Config;

/// Category prefix for detection images inside the bucket.
const IMAGE_CATEGORY: &str = "detections";

/// Reference to a stored image: its object key and public URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredImage {
    pub path: String,
    pub url: String,
}

/// Gateway to the object store holding detection images.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Uploads one image, makes it publicly readable and returns its key
    /// and public URL.
    async fn store_detection_image(
        &self,
        raspberry_id: &str,
        content: Vec<u8>,
        content_type: &str,
    ) -> Result<StoredImage>;
}

/// Builds the object key for a detection image:
/// `detections/{raspberry_id}/{yyyymmdd_hhmmss}_{8 hex chars}.jpg`.
///
/// The random suffix disambiguates samples taken within the same second.
pub fn detection_image_key(raspberry_id: &str, now: DateTime<Utc>) -> String {
    let timestamp = now.format("%Y%m%d_%H%M%S");
    let unique = Uuid::new_v4().simple().to_string();
    format!(
        "{IMAGE_CATEGORY}/{}/{timestamp}_{}.jpg",
        sanitize_key_component(raspberry_id),
        &unique[..8],
    )
}

/// Restricts a key component to `[A-Za-z0-9_-]` so a hostile device id
/// cannot escape its prefix.
fn sanitize_key_component(component: &str) -> String {
    component
        .chars()
        .map(|c| match c {
            c if c.is_ascii_alphanumeric() || c == '-' || c == '_' => c,
            _ => '_',
        })
        .collect()
}

/// S3-backed blob store.
pub struct S3BlobStore {
    client: S3Client,
    bucket: String,
    public_url_base: String,
}

impl S3BlobStore {
    /// Create a new S3-backed blob store
    pub async fn new(config: &S3Config) -> Result<Self> {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut builder = S3ConfigBuilder::from(&aws_config);

        // Configure custom endpoint for MinIO/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            builder = builder.endpoint_url(endpoint_url);
        }

        // Force path-style access for MinIO compatibility
        if config.force_path_style {
            builder = builder.force_path_style(true);
        }

        let client = S3Client::from_conf(builder.build());

        info!(
            bucket = %config.bucket,
            region = %config.region,
            "S3 blob store initialized"
        );

        Ok(Self {
            client,
            bucket: config.bucket.clone(),
            public_url_base: public_url_base(config),
        })
    }
}

/// Base URL under which uploaded objects are publicly readable.
fn public_url_base(config: &S3Config) -> String {
    if let Some(ref base) = config.public_url_base {
        base.trim_end_matches('/').to_owned()
    } else if let Some(ref endpoint) = config.endpoint_url {
        format!("{}/{}", endpoint.trim_end_matches('/'), config.bucket)
    } else {
        format!("https://{}.s3.{}.amazonaws.com", config.bucket, config.region)
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    #[instrument(skip(self, content), fields(raspberry_id = %raspberry_id, size_bytes = content.len()))]
    async fn store_detection_image(
        &self,
        raspberry_id: &str,
        content: Vec<u8>,
        content_type: &str,
    ) -> Result<StoredImage> {
        let key = detection_image_key(raspberry_id, Utc::now());

        debug!(key = %key, "Uploading detection image");

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from(content))
            .content_type(content_type)
            .acl(ObjectCannedAcl::PublicRead)
            .metadata("raspberry-id", sanitize_key_component(raspberry_id))
            .send()
            .await
            .context("Failed to upload detection image to S3")?;

        let url = format!("{}/{}", self.public_url_base, key);

        info!(key = %key, "Detection image uploaded");

        Ok(StoredImage { path: key, url })
    }
}

/// One object held by [`MemoryBlobStore`].
#[derive(Debug, Clone)]
pub struct MemoryObject {
    pub key: String,
    pub content: Vec<u8>,
    pub content_type: String,
}

/// In-memory blob store for tests and local development.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    objects: Mutex<Vec<MemoryObject>>,
}

impl MemoryBlobStore {
    pub fn len(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of everything stored so far, in upload order.
    pub fn objects(&self) -> Vec<MemoryObject> {
        self.objects.lock().unwrap().clone()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn store_detection_image(
        &self,
        raspberry_id: &str,
        content: Vec<u8>,
        content_type: &str,
    ) -> Result<StoredImage> {
        let key = detection_image_key(raspberry_id, Utc::now());
        let url = format!("memory://{key}");
        self.objects.lock().unwrap().push(MemoryObject {
            key: key.clone(),
            content,
            content_type: content_type.to_owned(),
        });
        Ok(StoredImage { path: key, url })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_key_is_partitioned_by_device_and_timestamp() {
        let at = Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 45).unwrap();
        let key = detection_image_key("rpi-007", at);

        assert!(key.starts_with("detections/rpi-007/20240115_103045_"));
        assert!(key.ends_with(".jpg"));
    }

    #[test]
    fn test_key_suffix_is_eight_hex_chars() {
        let at = Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 45).unwrap();
        let key = detection_image_key("rpi-007", at);

        let suffix = key
            .strip_prefix("detections/rpi-007/20240115_103045_")
            .and_then(|rest| rest.strip_suffix(".jpg"))
            .unwrap();
        assert_eq!(suffix.len(), 8);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_keys_differ_within_the_same_second() {
        let at = Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 45).unwrap();
        assert_ne!(detection_image_key("rpi-007", at), detection_image_key("rpi-007", at));
    }

    #[test]
    fn test_hostile_device_id_cannot_escape_its_prefix() {
        let at = Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 45).unwrap();
        let key = detection_image_key("../../../etc/passwd", at);

        assert!(key.starts_with("detections/_________etc_passwd/"));
        assert!(!key.contains(".."));
    }

    #[test]
    fn test_sanitize_keeps_safe_characters() {
        assert_eq!(sanitize_key_component("rpi-007_A"), "rpi-007_A");
        assert_eq!(sanitize_key_component("rpi 007/x"), "rpi_007_x");
    }

    #[test]
    fn test_public_url_base_prefers_explicit_override() {
        let config = S3Config {
            bucket: "detections".to_owned(),
            region: "us-east-1".to_owned(),
            endpoint_url: Some("http://minio:9000".to_owned()),
            force_path_style: true,
            public_url_base: Some("https://cdn.example.com/".to_owned()),
        };
        assert_eq!(public_url_base(&config), "https://cdn.example.com");
    }

    #[test]
    fn test_public_url_base_uses_custom_endpoint() {
        let config = S3Config {
            bucket: "detections".to_owned(),
            region: "us-east-1".to_owned(),
            endpoint_url: Some("http://minio:9000/".to_owned()),
            force_path_style: true,
            public_url_base: None,
        };
        assert_eq!(public_url_base(&config), "http://minio:9000/detections");
    }

    #[test]
    fn test_public_url_base_defaults_to_virtual_hosted_style() {
        let config = S3Config {
            bucket: "detections".to_owned(),
            region: "sa-east-1".to_owned(),
            endpoint_url: None,
            force_path_style: false,
            public_url_base: None,
        };
        assert_eq!(
            public_url_base(&config),
            "https://detections.s3.sa-east-1.amazonaws.com"
        );
    }

    #[tokio::test]
    async fn test_memory_store_records_uploads() {
        let store = MemoryBlobStore::default();

        let stored = store
            .store_detection_image("rpi-007", vec![1, 2, 3], "image/jpeg")
            .await
            .unwrap();

        assert!(stored.url.starts_with("memory://detections/rpi-007/"));
        assert_eq!(store.len(), 1);
        let objects = store.objects();
        assert_eq!(objects[0].key, stored.path);
        assert_eq!(objects[0].content, vec![1, 2, 3]);
        assert_eq!(objects[0].content_type, "image/jpeg");
    }
}
