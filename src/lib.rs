//! # redis-session-state
//!
//! Backing store for ephemeral, per-user web session state with an explicit
//! exclusive-lock protocol, backed by Redis.
//!
//! Session records are keyed by `(application, session id)`, carry an
//! opaque data blob serialized by the host, and expire after a configurable
//! idle timeout. Single-writer access is enforced with a per-record lock
//! and a monotonically increasing fencing token, implemented entirely as
//! atomic conditional updates in the backing store — correct across
//! processes and nodes with zero in-process locking.
//!
//! ## Features
//!
//! - **Race-free lock admission**: one atomic conditional update decides
//!   which request gets exclusive access; losers learn the holder's token
//!   and lock age
//! - **Fencing tokens**: a write or release presenting a superseded token
//!   is silently dropped, so a late writer never clobbers a newer holder
//! - **Eager expiry**: logically expired records are treated as absent and
//!   cleared on first sight; the store-level TTL sweep is best-effort only
//! - **Pluggable backends**: Redis for production, in-memory for tests
//! - **Fire-and-forget auditing**: lifecycle events and object sizes stream
//!   to an audit sink without ever affecting the session result
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use redis_session_state::{
//!     ProviderConfig, RedisBackend, RequestContext, SessionLookup,
//!     SessionProvider, SessionStateProvider,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ProviderConfig::new()
//!         .with_application_name("shop")
//!         .with_timeout_minutes(20);
//!
//!     let backend = RedisBackend::connect(&config).await?;
//!     let provider = SessionStateProvider::new(backend, config);
//!
//!     let ctx = RequestContext::default();
//!     provider.create_uninitialized(&ctx, "sess-1", 20).await?;
//!
//!     match provider.acquire_exclusive(&ctx, "sess-1").await? {
//!         SessionLookup::Found { data, lock_id, .. } => {
//!             // ... mutate the session, then commit and unlock
//!             provider
//!                 .commit_and_release(&ctx, "sess-1", lock_id, &data, false)
//!                 .await?;
//!         }
//!         SessionLookup::Locked { lock_age, .. } => {
//!             // Another request holds the lock; poll again later
//!             println!("locked for {}s", lock_age.num_seconds());
//!         }
//!         SessionLookup::Absent => {
//!             // First visit or expired session
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod audit;
pub mod config;
pub mod error;
pub mod provider;
pub mod record;
pub mod store;

pub use audit::{AuditLogger, AuditRecord, AuditStore, EventRecord, MemoryAuditStore, ObjectSizeRecord};
pub use config::ProviderConfig;
pub use error::SessionError;
pub use provider::{RequestContext, SessionLookup, SessionProvider, SessionStateProvider};
pub use record::{SessionActions, SessionRecord};
pub use store::{MemoryBackend, SessionBackend};

#[cfg(feature = "redis-store")]
pub use store::{RedisAuditStore, RedisBackend};
