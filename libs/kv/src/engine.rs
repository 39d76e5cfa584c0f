use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::KvError;

/// A single entry of a sorted-by-score set, as returned by range/list reads.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredMember {
    pub member: String,
    pub score: f64,
}

/// The capability surface described in spec.md §4.1 (C1): primitive
/// get/set, sorted sets, append-only lists, compare-and-set, and prefix
/// scan. Every operation accepts a [`CancellationToken`] so callers (DBOS
/// RPC handlers, the coordinator) can bound how long a write may run.
#[async_trait]
pub trait KvEngine: Send + Sync {
    async fn get(&self, key: &str, ctx: &CancellationToken) -> Result<Option<Vec<u8>>, KvError>;

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>, ctx: &CancellationToken) -> Result<(), KvError>;

    async fn exists(&self, key: &str, ctx: &CancellationToken) -> Result<bool, KvError>;

    async fn delete(&self, key: &str, ctx: &CancellationToken) -> Result<(), KvError>;

    /// Reads a CAS-protected record: `(version, value)`, or `None` if absent.
    async fn get_versioned(&self, key: &str, ctx: &CancellationToken) -> Result<Option<(u64, Vec<u8>)>, KvError>;

    /// Writes `value` iff the record's current version equals `expected`
    /// (`None` means "must not exist yet"). On success returns the new
    /// version (`expected.unwrap_or(0) + 1`). On mismatch, returns
    /// [`KvError::VersionConflict`] and leaves the record untouched.
    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<u64>,
        value: Vec<u8>,
        ctx: &CancellationToken,
    ) -> Result<u64, KvError>;

    async fn scan_prefix(&self, prefix: &str, ctx: &CancellationToken) -> Result<Vec<(String, Vec<u8>)>, KvError>;

    async fn zadd(&self, zset_key: &str, member: &str, score: f64, ctx: &CancellationToken) -> Result<(), KvError>;

    async fn zrem(&self, zset_key: &str, member: &str, ctx: &CancellationToken) -> Result<(), KvError>;

    /// Members with `min <= score <= max`, ascending by score.
    async fn zrange_by_score(
        &self,
        zset_key: &str,
        min: f64,
        max: f64,
        ctx: &CancellationToken,
    ) -> Result<Vec<ScoredMember>, KvError>;

    /// All members, ascending by score.
    async fn zlist(&self, zset_key: &str, ctx: &CancellationToken) -> Result<Vec<ScoredMember>, KvError>;

    /// Prepends `value` to the append-only list at `list_key`.
    async fn list_prepend(&self, list_key: &str, value: Vec<u8>, ctx: &CancellationToken) -> Result<(), KvError>;

    /// Reads up to `limit` entries from the head of `list_key` (newest-first).
    async fn list_range(&self, list_key: &str, limit: usize, ctx: &CancellationToken) -> Result<Vec<Vec<u8>>, KvError>;
}

pub(crate) fn check_cancelled(ctx: &CancellationToken) -> Result<(), KvError> {
    if ctx.is_cancelled() {
        Err(KvError::Cancelled)
    } else {
        Ok(())
    }
}
