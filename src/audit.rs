//! Fire-and-forget audit logging
//!
//! Lifecycle events and session object sizes are recorded asynchronously: a
//! send enqueues the record on an unbounded channel and returns immediately,
//! and a background task drains the channel into an [`AuditStore`]. Nothing
//! here participates in session correctness — a full, failed or missing
//! sink never changes a lifecycle result.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::SessionError;

/// One lifecycle event observed by the provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: Uuid,
    #[serde(rename = "app")]
    pub application_name: String,
    #[serde(rename = "s_id")]
    pub session_id: String,
    #[serde(rename = "u")]
    pub url: String,
    #[serde(rename = "e")]
    pub description: String,
    #[serde(rename = "user")]
    pub user: String,
    #[serde(rename = "c_date", with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

/// Size of one stored session object, in kibibytes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectSizeRecord {
    pub id: Uuid,
    #[serde(rename = "app")]
    pub application_name: String,
    #[serde(rename = "s_id")]
    pub session_id: String,
    #[serde(rename = "u")]
    pub url: String,
    #[serde(rename = "k")]
    pub key: String,
    #[serde(rename = "s_kb")]
    pub size_kb: f64,
    #[serde(rename = "user")]
    pub user: String,
    #[serde(rename = "c_date", with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

/// A record bound for the audit store
#[derive(Debug, Clone)]
pub enum AuditRecord {
    Event(EventRecord),
    ObjectSize(ObjectSizeRecord),
}

/// Destination for audit records
#[async_trait]
pub trait AuditStore: Send + Sync + 'static {
    /// Append one record. Ordering across records is not guaranteed.
    async fn append(&self, record: &AuditRecord) -> Result<(), SessionError>;
}

/// Non-blocking front end to an [`AuditStore`]
///
/// `spawn` starts the drain task on the current Tokio runtime; the returned
/// logger can be cloned freely and sends never block or fail the caller.
/// Store errors are logged and swallowed.
#[derive(Clone)]
pub struct AuditLogger {
    tx: mpsc::UnboundedSender<AuditRecord>,
    application_name: String,
}

impl AuditLogger {
    /// Start the background drain task and return a logger feeding it.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn<S: AuditStore>(application_name: impl Into<String>, store: S) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<AuditRecord>();

        tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                if let Err(e) = store.append(&record).await {
                    tracing::warn!("Failed to append audit record: {}", e);
                }
            }
        });

        Self {
            tx,
            application_name: application_name.into(),
        }
    }

    /// Record a lifecycle event. Returns immediately.
    pub fn record_event(&self, session_id: &str, url: &str, user: &str, description: &str) {
        let record = AuditRecord::Event(EventRecord {
            id: Uuid::new_v4(),
            application_name: self.application_name.clone(),
            session_id: session_id.to_string(),
            url: url.to_string(),
            description: description.to_string(),
            user: user.to_string(),
            created_at: Utc::now(),
        });

        // A dropped receiver means the runtime is shutting down; the record
        // is best-effort either way.
        let _ = self.tx.send(record);
    }

    /// Record the size of one stored session object. Returns immediately.
    pub fn record_object_size(
        &self,
        session_id: &str,
        url: &str,
        user: &str,
        key: &str,
        size_kb: f64,
    ) {
        let record = AuditRecord::ObjectSize(ObjectSizeRecord {
            id: Uuid::new_v4(),
            application_name: self.application_name.clone(),
            session_id: session_id.to_string(),
            url: url.to_string(),
            key: key.to_string(),
            size_kb,
            user: user.to_string(),
            created_at: Utc::now(),
        });

        let _ = self.tx.send(record);
    }
}

/// In-memory audit store for development and tests
#[derive(Clone, Default)]
pub struct MemoryAuditStore {
    records: std::sync::Arc<parking_lot::RwLock<Vec<AuditRecord>>>,
}

impl MemoryAuditStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything appended so far
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.read().clone()
    }
}

#[async_trait]
impl AuditStore for MemoryAuditStore {
    async fn append(&self, record: &AuditRecord) -> Result<(), SessionError> {
        self.records.write().push(record.clone());
        Ok(())
    }
}
