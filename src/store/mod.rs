//! Session backend implementations

mod memory;
mod traits;

pub use memory::MemoryBackend;
pub use traits::SessionBackend;

#[cfg(feature = "redis-store")]
mod redis_store;

#[cfg(feature = "redis-store")]
pub use redis_store::{RedisAuditStore, RedisBackend};
