//! In-memory session backend
//!
//! This is primarily for development and testing.
//! For production, use RedisBackend.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use super::SessionBackend;
use crate::error::SessionError;
use crate::record::{SessionActions, SessionRecord};

/// In-memory session backend
///
/// Every operation takes the map's write lock for its whole duration, which
/// gives the same per-record atomicity the Redis backend gets from
/// server-side scripts.
///
/// Warning: this backend is not suitable for production use because:
/// - Sessions are lost on process restart
/// - Sessions are not shared across multiple server instances
/// - Memory usage grows with number of sessions
pub struct MemoryBackend {
    sessions: Arc<RwLock<HashMap<String, SessionRecord>>>,
}

impl MemoryBackend {
    /// Create a new memory backend
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Drop records whose expiry has elapsed.
    ///
    /// Stands in for the store-level TTL sweep a real backend provides.
    /// The provider never depends on this running; it is best-effort
    /// reclamation only.
    pub fn sweep_expired(&self) {
        let now = Utc::now();
        self.sessions.write().retain(|_, record| record.expires_at > now);
    }

    /// Number of records currently held, expired or not
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    /// Whether no records are held
    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for MemoryBackend {
    fn clone(&self) -> Self {
        Self {
            sessions: Arc::clone(&self.sessions),
        }
    }
}

#[async_trait]
impl SessionBackend for MemoryBackend {
    async fn try_acquire_lock(&self, key: &str) -> Result<bool, SessionError> {
        let mut sessions = self.sessions.write();
        let now = Utc::now();

        if let Some(record) = sessions.get_mut(key) {
            if !record.is_locked && record.expires_at > now {
                record.is_locked = true;
                record.locked_at = now;
                record.lock_id += 1;
                return Ok(true);
            }
        }

        Ok(false)
    }

    async fn release_lock(&self, key: &str, lock_id: i64) -> Result<(), SessionError> {
        let mut sessions = self.sessions.write();

        if let Some(record) = sessions.get_mut(key) {
            if record.lock_id == lock_id {
                record.is_locked = false;
            }
        }

        Ok(())
    }

    async fn clear(&self, key: &str) -> Result<(), SessionError> {
        let mut sessions = self.sessions.write();

        if let Some(record) = sessions.get_mut(key) {
            record.is_locked = false;
            record.data.clear();
        }

        Ok(())
    }

    async fn renew_expiry(&self, key: &str, timeout_minutes: i64) -> Result<(), SessionError> {
        let mut sessions = self.sessions.write();

        if let Some(record) = sessions.get_mut(key) {
            record.expires_at = Utc::now() + Duration::minutes(timeout_minutes);
        }

        Ok(())
    }

    async fn fetch(&self, key: &str) -> Result<Option<SessionRecord>, SessionError> {
        Ok(self.sessions.read().get(key).cloned())
    }

    async fn fetch_and_reset_flags(&self, key: &str) -> Result<Option<SessionRecord>, SessionError> {
        let mut sessions = self.sessions.write();

        match sessions.get_mut(key) {
            Some(record) => {
                let snapshot = record.clone();
                record.flags = SessionActions::NONE;
                Ok(Some(snapshot))
            }
            None => Ok(None),
        }
    }

    async fn write(&self, record: &SessionRecord) -> Result<(), SessionError> {
        self.sessions.write().insert(record.key(), record.clone());
        Ok(())
    }

    async fn put_and_release(
        &self,
        key: &str,
        lock_id: i64,
        data: &str,
        username: &str,
    ) -> Result<(), SessionError> {
        let mut sessions = self.sessions.write();

        if let Some(record) = sessions.get_mut(key) {
            if record.lock_id == lock_id {
                record.data = data.to_string();
                record.username = username.to_string();
                record.is_locked = false;
            }
        }

        Ok(())
    }
}
