//! Aedes Ingest Service
//!
//! Ingestion endpoint for the Aedes mosquito monitoring network. Field
//! devices (Raspberry Pi trap units running an on-board insect detection
//! model) post multipart reports carrying sensor readings and the detection
//! image for one sample. The service stores the image in an object store,
//! updates the per-device status document, appends the detection sample,
//! raises an alert when anything was detected and recomputes the
//! fleet-wide statistics singleton.
//!
//! ## Features
//!
//! - **Device-tolerant decoding**: a multipart decoder matched to the
//!   hand-rolled bodies the trap firmware produces
//! - **Public image storage**: S3 uploads partitioned by device and
//!   timestamp, with stable public URLs for the dashboard
//! - **Document-oriented state**: JSONB-backed collections for devices,
//!   detections, alerts and aggregate statistics
//! - **Swappable backends**: store gateways are traits with in-memory
//!   implementations for tests and local development
//!
//! ## Architecture
//!
//! ```text
//! Raspberry Pi                 aedes-ingest                Backends
//! ┌──────────────┐  multipart ┌──────────────┐   put      ┌──────────────┐
//! │ trap unit    │───────────▶│ multipart    │──────────▶ │ S3 bucket    │
//! └──────────────┘    POST    │ decoder      │            │  detections/ │
//!                             └──────┬───────┘            └──────────────┘
//!                                    │ SensorReport
//!                                    ▼
//!                             ┌──────────────┐ merge/push ┌──────────────┐
//!                             │ ingest       │──────────▶ │ documents    │
//!                             │ pipeline     │            │  devices     │
//!                             └──────┬───────┘            │  detections  │
//!                                    │ full scan          │  alerts      │
//!                                    ▼                    │  statistics  │
//!                             ┌──────────────┐            └──────────────┘
//!                             │ statistics   │  best-effort merge
//!                             │ recompute    │
//!                             └──────────────┘
//! ```

pub mod api;
pub mod blob_store;
pub mod config;
pub mod document_store;
pub mod error;
pub mod ingest;
pub mod multipart;
pub mod records;
pub mod report;
pub mod stats;

pub use api::AppState;
pub use blob_store::{BlobStore, MemoryBlobStore, S3BlobStore, StoredImage};
pub use config::Config;
pub use document_store::{DocumentStore, MemoryDocumentStore, PostgresDocumentStore};
pub use error::IngestError;
pub use ingest::Ingestor;
pub use multipart::{FilePart, MultipartForm};
pub use records::ReportAck;
pub use report::SensorReport;
pub use stats::Statistics;
