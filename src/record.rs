//! Persisted session record

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// One-shot action flags carried on a session record.
///
/// A flag is consumed by the first read that observes it: the read returns
/// the flags as they were and resets the stored value to zero in the same
/// atomic step, so no second reader ever sees the same flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionActions(pub i32);

impl SessionActions {
    /// No pending action.
    pub const NONE: SessionActions = SessionActions(0);

    /// The next exclusive read should hand back a freshly initialized,
    /// empty session instead of the stored data.
    pub const INITIALIZE_ITEM: SessionActions = SessionActions(1);

    /// Whether the initialize marker is set.
    pub fn requires_initialization(self) -> bool {
        self.0 & Self::INITIALIZE_ITEM.0 != 0
    }
}

impl Default for SessionActions {
    fn default() -> Self {
        Self::NONE
    }
}

/// One session's durable state, keyed by `(application_name, session_id)`.
///
/// Records serialize to JSON with short field names so they stay compact in
/// the store and server-side scripts can address individual fields.
/// Timestamps are epoch milliseconds for the same reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Session identifier, one component of the storage key
    #[serde(rename = "s_id")]
    pub session_id: String,

    /// Owning application, the other component of the storage key
    #[serde(rename = "app")]
    pub application_name: String,

    /// Last known principal name, best-effort, may be empty
    #[serde(rename = "user")]
    pub username: String,

    /// Opaque serialized session item blob; the encoding belongs to the caller
    #[serde(rename = "data")]
    pub data: String,

    /// Idle timeout configured for this session, in minutes
    #[serde(rename = "t")]
    pub timeout_minutes: i64,

    /// One-shot action flags, reset to zero when observed
    #[serde(rename = "f")]
    pub flags: SessionActions,

    #[serde(rename = "c_date", with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,

    /// Past this instant the record is logically dead and readers treat it
    /// as absent
    #[serde(rename = "e_date", with = "chrono::serde::ts_milliseconds")]
    pub expires_at: DateTime<Utc>,

    /// True while a request holds exclusive write access
    #[serde(rename = "l")]
    pub is_locked: bool,

    /// Fencing token, incremented on every lock acquisition. Starts at 0
    /// for records seeded by `create_uninitialized`.
    #[serde(rename = "l_id")]
    pub lock_id: i64,

    /// Instant of the most recent lock acquisition
    #[serde(rename = "l_date", with = "chrono::serde::ts_milliseconds")]
    pub locked_at: DateTime<Utc>,
}

impl SessionRecord {
    /// Create an unlocked record expiring `timeout_minutes` from now, with
    /// no pending actions and an initial lock id of 0.
    pub fn new(
        application_name: impl Into<String>,
        session_id: impl Into<String>,
        username: impl Into<String>,
        data: impl Into<String>,
        timeout_minutes: i64,
    ) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            application_name: application_name.into(),
            username: username.into(),
            data: data.into(),
            timeout_minutes,
            flags: SessionActions::NONE,
            created_at: now,
            expires_at: now + Duration::minutes(timeout_minutes),
            is_locked: false,
            lock_id: 0,
            locked_at: now,
        }
    }

    /// Composite storage key. Applications never collide even when they
    /// reuse the same session identifier.
    pub fn storage_key(application_name: &str, session_id: &str) -> String {
        format!("{}.{}", application_name, session_id)
    }

    /// This record's storage key.
    pub fn key(&self) -> String {
        Self::storage_key(&self.application_name, &self.session_id)
    }

    /// Whether the idle timeout has elapsed.
    pub fn is_expired(&self) -> bool {
        self.expires_at < Utc::now()
    }

    /// Age of the current lock, measured from `locked_at`.
    pub fn lock_age(&self) -> Duration {
        Utc::now() - self.locked_at
    }
}
