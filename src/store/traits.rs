//! Session backend trait

use async_trait::async_trait;

use crate::error::SessionError;
use crate::record::SessionRecord;

/// Atomic operations a session backend must expose
///
/// Every method is a single conditional update against one record, so the
/// provider never needs a read-then-write cycle of its own. Implementations
/// must guarantee per-record atomicity: two requests racing on the same key
/// can never both observe `true` from `try_acquire_lock`.
///
/// Any method may fail with [`SessionError::StoreUnavailable`]; backends do
/// not retry — retry policy, if any, belongs to the caller.
#[async_trait]
pub trait SessionBackend: Send + Sync + 'static {
    /// Attempt to take the write lock on an unlocked, unexpired record.
    ///
    /// Matches a record with the given key where `is_locked` is false and
    /// `expires_at` is in the future; on a match, marks it locked, stamps
    /// `locked_at` and increments the fencing token. Returns true iff
    /// exactly one record was modified. This is the sole admission point
    /// for exclusive access.
    async fn try_acquire_lock(&self, key: &str) -> Result<bool, SessionError>;

    /// Release the lock identified by `lock_id`.
    ///
    /// A mismatched token means the lock was reassigned in the meantime;
    /// the call is then a no-op so a stale holder can never unlock a newer
    /// one.
    async fn release_lock(&self, key: &str, lock_id: i64) -> Result<(), SessionError>;

    /// Unlock the record and empty its data, regardless of lock holder.
    ///
    /// Missing records are a no-op. Used for expiry cleanup and explicit
    /// removal.
    async fn clear(&self, key: &str) -> Result<(), SessionError>;

    /// Push the record's expiry forward to now + `timeout_minutes`.
    async fn renew_expiry(&self, key: &str, timeout_minutes: i64) -> Result<(), SessionError>;

    /// Plain lookup with no locking semantics.
    async fn fetch(&self, key: &str) -> Result<Option<SessionRecord>, SessionError>;

    /// Fetch the record and reset its action flags to zero in one atomic
    /// step, returning the pre-reset state. A flag is observed by at most
    /// one caller.
    async fn fetch_and_reset_flags(&self, key: &str) -> Result<Option<SessionRecord>, SessionError>;

    /// Upsert the record under its composite key, overwriting any residual
    /// record already stored there.
    async fn write(&self, record: &SessionRecord) -> Result<(), SessionError>;

    /// Store new data and drop the lock in one conditional update matching
    /// `lock_id`, also refreshing the stored principal name.
    ///
    /// A mismatched token leaves the record untouched: a late writer whose
    /// lock was reassigned must not clobber the newer holder's state.
    async fn put_and_release(
        &self,
        key: &str,
        lock_id: i64,
        data: &str,
        username: &str,
    ) -> Result<(), SessionError>;
}
