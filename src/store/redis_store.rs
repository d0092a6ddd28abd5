//! Redis session backend
//!
//! Records are stored as JSON strings under `namespace + key` (default
//! namespace: "SessionState:Session:"). Every conditional operation runs as
//! a server-side Lua script, which Redis executes atomically, so two
//! requests racing on the same record always serialize on the server.
//!
//! Each key also carries a Redis expiry set one full timeout period past
//! the record's logical `e_date`: the store-level sweep. Readers never
//! depend on it — a logically expired record is treated as absent and
//! cleared eagerly regardless of when the key is purged.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use std::sync::Arc;

use super::SessionBackend;
use crate::audit::{AuditRecord, AuditStore};
use crate::config::ProviderConfig;
use crate::error::SessionError;
use crate::record::SessionRecord;

// Lock admission: matches unlocked and unexpired, stamps the lock and
// bumps the fencing token. Returns 1 iff the record was modified.
const ACQUIRE_LUA: &str = r#"
local raw = redis.call('GET', KEYS[1])
if not raw then return 0 end
local rec = cjson.decode(raw)
local now = tonumber(ARGV[1])
if rec['l'] or rec['e_date'] <= now then return 0 end
rec['l'] = true
rec['l_date'] = now
rec['l_id'] = rec['l_id'] + 1
redis.call('SET', KEYS[1], cjson.encode(rec), 'KEEPTTL')
return 1
"#;

// Fenced unlock: a stale token leaves the record untouched.
const RELEASE_LUA: &str = r#"
local raw = redis.call('GET', KEYS[1])
if not raw then return 0 end
local rec = cjson.decode(raw)
if rec['l_id'] ~= tonumber(ARGV[1]) then return 0 end
rec['l'] = false
redis.call('SET', KEYS[1], cjson.encode(rec), 'KEEPTTL')
return 1
"#;

// Unconditional unlock-and-empty, used for expiry cleanup and removal.
const CLEAR_LUA: &str = r#"
local raw = redis.call('GET', KEYS[1])
if not raw then return 0 end
local rec = cjson.decode(raw)
rec['l'] = false
rec['data'] = ''
redis.call('SET', KEYS[1], cjson.encode(rec), 'KEEPTTL')
return 1
"#;

// Push logical expiry forward and move the sweep deadline with it.
const RENEW_LUA: &str = r#"
local raw = redis.call('GET', KEYS[1])
if not raw then return 0 end
local rec = cjson.decode(raw)
rec['e_date'] = tonumber(ARGV[1])
redis.call('SET', KEYS[1], cjson.encode(rec))
redis.call('PEXPIREAT', KEYS[1], tonumber(ARGV[2]))
return 1
"#;

// Returns the record as it was while zeroing its flags, so a one-shot
// flag is observed by exactly one reader.
const RESET_FLAGS_LUA: &str = r#"
local raw = redis.call('GET', KEYS[1])
if not raw then return false end
local rec = cjson.decode(raw)
if rec['f'] ~= 0 then
  rec['f'] = 0
  redis.call('SET', KEYS[1], cjson.encode(rec), 'KEEPTTL')
end
return raw
"#;

// Fenced write-and-unlock: the lost-update guard. A stale token drops the
// write silently.
const PUT_AND_RELEASE_LUA: &str = r#"
local raw = redis.call('GET', KEYS[1])
if not raw then return 0 end
local rec = cjson.decode(raw)
if rec['l_id'] ~= tonumber(ARGV[1]) then return 0 end
rec['data'] = ARGV[2]
rec['user'] = ARGV[3]
rec['l'] = false
redis.call('SET', KEYS[1], cjson.encode(rec), 'KEEPTTL')
return 1
"#;

/// Redis session backend
///
/// Holds one long-lived [`ConnectionManager`] resolved from configuration;
/// clones share it, so a process connects once and reuses the connection
/// for its lifetime.
///
/// # Example
///
/// ```rust,ignore
/// use redis_session_state::{ProviderConfig, RedisBackend};
///
/// let config = ProviderConfig::new().with_application_name("shop");
/// let backend = RedisBackend::connect(&config).await?;
/// ```
pub struct RedisBackend {
    conn: Arc<ConnectionManager>,
    namespace: String,
}

impl RedisBackend {
    /// Resolve a backend from configuration: endpoint from
    /// `connection_url`, key namespace from `database_name` and
    /// `collection_name`.
    pub async fn connect(config: &ProviderConfig) -> Result<Self, SessionError> {
        let client = redis::Client::open(config.connection_url.as_str()).map_err(|e| {
            SessionError::StoreUnavailable(format!("Failed to create Redis client: {}", e))
        })?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self {
            conn: Arc::new(conn),
            namespace: config.namespace(),
        })
    }

    /// Create a backend from a connection string with the default namespace
    pub async fn from_url(url: &str) -> Result<Self, SessionError> {
        let client = redis::Client::open(url).map_err(|e| {
            SessionError::StoreUnavailable(format!("Failed to create Redis client: {}", e))
        })?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self {
            conn: Arc::new(conn),
            namespace: ProviderConfig::default().namespace(),
        })
    }

    /// Create a backend from an existing connection manager
    pub fn from_connection_manager(conn: ConnectionManager, namespace: &str) -> Self {
        Self {
            conn: Arc::new(conn),
            namespace: namespace.to_string(),
        }
    }

    /// Build with a custom key namespace
    pub fn with_namespace(mut self, namespace: &str) -> Self {
        self.namespace = namespace.to_string();
        self
    }

    /// Full Redis key for a record's composite storage key
    fn make_key(&self, key: &str) -> String {
        format!("{}{}", self.namespace, key)
    }

    /// Store-level purge deadline: one timeout period past logical expiry.
    /// The sweep always lags the eager expired-means-absent rule.
    fn sweep_deadline_ms(expires_at: DateTime<Utc>, timeout_minutes: i64) -> i64 {
        (expires_at + Duration::minutes(timeout_minutes)).timestamp_millis()
    }
}

impl Clone for RedisBackend {
    fn clone(&self) -> Self {
        Self {
            conn: Arc::clone(&self.conn),
            namespace: self.namespace.clone(),
        }
    }
}

#[async_trait]
impl SessionBackend for RedisBackend {
    async fn try_acquire_lock(&self, key: &str) -> Result<bool, SessionError> {
        let key = self.make_key(key);
        let mut conn = (*self.conn).clone();

        let script = Script::new(ACQUIRE_LUA);
        let modified: i64 = script
            .key(&key)
            .arg(Utc::now().timestamp_millis())
            .invoke_async(&mut conn)
            .await?;

        Ok(modified > 0)
    }

    async fn release_lock(&self, key: &str, lock_id: i64) -> Result<(), SessionError> {
        let key = self.make_key(key);
        let mut conn = (*self.conn).clone();

        let script = Script::new(RELEASE_LUA);
        let _: i64 = script.key(&key).arg(lock_id).invoke_async(&mut conn).await?;

        Ok(())
    }

    async fn clear(&self, key: &str) -> Result<(), SessionError> {
        let key = self.make_key(key);
        let mut conn = (*self.conn).clone();

        let script = Script::new(CLEAR_LUA);
        let _: i64 = script.key(&key).invoke_async(&mut conn).await?;

        Ok(())
    }

    async fn renew_expiry(&self, key: &str, timeout_minutes: i64) -> Result<(), SessionError> {
        let key = self.make_key(key);
        let mut conn = (*self.conn).clone();

        let expires_at = Utc::now() + Duration::minutes(timeout_minutes);
        let script = Script::new(RENEW_LUA);
        let _: i64 = script
            .key(&key)
            .arg(expires_at.timestamp_millis())
            .arg(Self::sweep_deadline_ms(expires_at, timeout_minutes))
            .invoke_async(&mut conn)
            .await?;

        Ok(())
    }

    async fn fetch(&self, key: &str) -> Result<Option<SessionRecord>, SessionError> {
        let key = self.make_key(key);
        let mut conn = (*self.conn).clone();

        let raw: Option<String> = conn.get(&key).await?;

        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn fetch_and_reset_flags(&self, key: &str) -> Result<Option<SessionRecord>, SessionError> {
        let key = self.make_key(key);
        let mut conn = (*self.conn).clone();

        let script = Script::new(RESET_FLAGS_LUA);
        let raw: Option<String> = script.key(&key).invoke_async(&mut conn).await?;

        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn write(&self, record: &SessionRecord) -> Result<(), SessionError> {
        let key = self.make_key(&record.key());
        let mut conn = (*self.conn).clone();

        let json = serde_json::to_string(record)?;
        let _: () = redis::cmd("SET")
            .arg(&key)
            .arg(&json)
            .arg("PXAT")
            .arg(Self::sweep_deadline_ms(record.expires_at, record.timeout_minutes))
            .query_async(&mut conn)
            .await?;

        Ok(())
    }

    async fn put_and_release(
        &self,
        key: &str,
        lock_id: i64,
        data: &str,
        username: &str,
    ) -> Result<(), SessionError> {
        let key = self.make_key(key);
        let mut conn = (*self.conn).clone();

        let script = Script::new(PUT_AND_RELEASE_LUA);
        let _: i64 = script
            .key(&key)
            .arg(lock_id)
            .arg(data)
            .arg(username)
            .invoke_async(&mut conn)
            .await?;

        Ok(())
    }
}

/// Redis audit store
///
/// Appends audit records as JSON lines to the `EventLog` and
/// `SessionObjectLog` lists under the audit namespace (default:
/// "SessionState.Log:"). Shares its connection the same way the session
/// backend does.
pub struct RedisAuditStore {
    conn: Arc<ConnectionManager>,
    namespace: String,
}

impl RedisAuditStore {
    /// Resolve an audit store from configuration
    pub async fn connect(config: &ProviderConfig) -> Result<Self, SessionError> {
        let client = redis::Client::open(config.connection_url.as_str()).map_err(|e| {
            SessionError::StoreUnavailable(format!("Failed to create Redis client: {}", e))
        })?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self {
            conn: Arc::new(conn),
            namespace: config.audit_namespace(),
        })
    }

    /// Create an audit store from an existing connection manager
    pub fn from_connection_manager(conn: ConnectionManager, namespace: &str) -> Self {
        Self {
            conn: Arc::new(conn),
            namespace: namespace.to_string(),
        }
    }
}

#[async_trait]
impl AuditStore for RedisAuditStore {
    async fn append(&self, record: &AuditRecord) -> Result<(), SessionError> {
        let (list, json) = match record {
            AuditRecord::Event(event) => (
                format!("{}EventLog", self.namespace),
                serde_json::to_string(event)?,
            ),
            AuditRecord::ObjectSize(size) => (
                format!("{}SessionObjectLog", self.namespace),
                serde_json::to_string(size)?,
            ),
        };

        let mut conn = (*self.conn).clone();
        conn.rpush::<_, _, ()>(&list, &json).await?;

        Ok(())
    }
}
