//! Document store gateway: point reads, shallow merges and keyed appends
//! on named collections.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::DatabaseConfig;

/// Gateway to the document database holding device, detection, alert and
/// statistics state.
///
/// Writes are last-write-wins. There are no transactions or locks across
/// operations; racing updates to the same document are accepted.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Point read. `None` when the document does not exist.
    async fn get(&self, collection: &str, key: &str) -> Result<Option<Value>>;

    /// Upserts `patch` into the document at `key`, replacing top-level
    /// keys wholesale (shallow merge). Creates the document when absent.
    async fn merge(&self, collection: &str, key: &str, patch: &Value) -> Result<()>;

    /// Appends `doc` under a generated opaque key and returns the key.
    async fn push(&self, collection: &str, doc: &Value) -> Result<String>;

    /// Full scan of one collection, in key order.
    async fn list(&self, collection: &str) -> Result<Vec<Value>>;

    /// Cheap connectivity probe for readiness checks.
    async fn ping(&self) -> Result<()>;
}

fn generate_key() -> String {
    Uuid::new_v4().simple().to_string()
}

/// PostgreSQL-backed document store: one JSONB row per (collection, key).
pub struct PostgresDocumentStore {
    pool: PgPool,
}

impl PostgresDocumentStore {
    /// Create a new PostgreSQL-backed document store
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Some(Duration::from_secs(config.idle_timeout_secs)))
            .connect(&config.url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        info!("Connected to PostgreSQL document store");

        Ok(Self { pool })
    }

    /// Run database migrations (the documents table)
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run migrations")?;

        info!("Database migrations completed");
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for PostgresDocumentStore {
    async fn get(&self, collection: &str, key: &str) -> Result<Option<Value>> {
        let doc = sqlx::query_scalar::<_, Value>(
            "SELECT doc FROM documents WHERE collection = $1 AND key = $2",
        )
        .bind(collection)
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to read document")?;
        Ok(doc)
    }

    async fn merge(&self, collection: &str, key: &str, patch: &Value) -> Result<()> {
        // JSONB || replaces top-level keys of the stored document with
        // those of the patch, which is exactly the merge the pipeline
        // relies on to keep created_at intact across updates.
        sqlx::query(
            r#"
            INSERT INTO documents (collection, key, doc)
            VALUES ($1, $2, $3)
            ON CONFLICT (collection, key)
            DO UPDATE SET doc = documents.doc || EXCLUDED.doc
            "#,
        )
        .bind(collection)
        .bind(key)
        .bind(patch)
        .execute(&self.pool)
        .await
        .context("Failed to merge document")?;

        debug!(collection = %collection, key = %key, "Document merged");
        Ok(())
    }

    async fn push(&self, collection: &str, doc: &Value) -> Result<String> {
        let key = generate_key();
        sqlx::query("INSERT INTO documents (collection, key, doc) VALUES ($1, $2, $3)")
            .bind(collection)
            .bind(&key)
            .bind(doc)
            .execute(&self.pool)
            .await
            .context("Failed to append document")?;

        debug!(collection = %collection, key = %key, "Document appended");
        Ok(key)
    }

    async fn list(&self, collection: &str) -> Result<Vec<Value>> {
        let docs = sqlx::query_scalar::<_, Value>(
            "SELECT doc FROM documents WHERE collection = $1 ORDER BY key",
        )
        .bind(collection)
        .fetch_all(&self.pool)
        .await
        .context("Failed to scan collection")?;
        Ok(docs)
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .context("Database ping failed")?;
        Ok(())
    }
}

/// In-memory document store for tests and local development.
///
/// Mirrors the shallow-merge semantics of the JSONB `||` operator: the
/// patch's top-level keys replace the stored ones wholesale, nested
/// objects included.
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    collections: Mutex<HashMap<String, BTreeMap<String, Value>>>,
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get(&self, collection: &str, key: &str) -> Result<Option<Value>> {
        Ok(self
            .collections
            .lock()
            .unwrap()
            .get(collection)
            .and_then(|docs| docs.get(key))
            .cloned())
    }

    async fn merge(&self, collection: &str, key: &str, patch: &Value) -> Result<()> {
        let mut collections = self.collections.lock().unwrap();
        let doc = collections
            .entry(collection.to_owned())
            .or_default()
            .entry(key.to_owned())
            .or_insert_with(|| Value::Object(Default::default()));
        shallow_merge(doc, patch);
        Ok(())
    }

    async fn push(&self, collection: &str, doc: &Value) -> Result<String> {
        let key = generate_key();
        self.collections
            .lock()
            .unwrap()
            .entry(collection.to_owned())
            .or_default()
            .insert(key.clone(), doc.clone());
        Ok(key)
    }

    async fn list(&self, collection: &str) -> Result<Vec<Value>> {
        Ok(self
            .collections
            .lock()
            .unwrap()
            .get(collection)
            .map(|docs| docs.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

fn shallow_merge(doc: &mut Value, patch: &Value) {
    match (doc, patch) {
        (Value::Object(doc), Value::Object(patch)) => {
            for (key, value) in patch {
                doc.insert(key.clone(), value.clone());
            }
        }
        (doc, patch) => *doc = patch.clone(),
    }
}
