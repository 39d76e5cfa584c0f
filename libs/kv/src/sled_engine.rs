use std::collections::VecDeque;
use std::path::Path;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::engine::{check_cancelled, KvEngine, ScoredMember};
use crate::error::KvError;

#[derive(Serialize, Deserialize, Clone)]
struct StoredValue {
    value: Vec<u8>,
    expires_at: Option<SystemTime>,
}

impl StoredValue {
    fn is_expired(&self, now: SystemTime) -> bool {
        matches!(self.expires_at, Some(t) if now >= t)
    }
}

#[derive(Serialize, Deserialize, Clone, Default)]
struct VersionedValue {
    version: u64,
    value: Vec<u8>,
}

/// In-memory-primary, on-disk-durable KV engine (spec.md §4.1, C1).
///
/// Every write lands in the in-memory maps first (served on the hot path)
/// and is mirrored to a [`sled::Db`] for crash recovery. `temporary()`
/// constructs a disk-backed instance in a throwaway directory for tests.
pub struct SledKvEngine {
    db: sled::Db,
    kv: DashMap<String, StoredValue>,
    versioned: DashMap<String, VersionedValue>,
    zsets: DashMap<String, Mutex<Vec<ScoredMember>>>,
    lists: DashMap<String, Mutex<VecDeque<Vec<u8>>>>,
    // Keeps a tempdir alive for the lifetime of a `temporary()` engine.
    _tempdir: Option<tempfile::TempDir>,
}

const TREE_KV: &str = "kv";
const TREE_VERSIONED: &str = "versioned";
const TREE_ZSETS: &str = "zsets";
const TREE_LISTS: &str = "lists";

impl SledKvEngine {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, KvError> {
        let db = sled::open(path)?;
        Self::from_db(db, None)
    }

    /// Opens a disk-backed engine in a process-lifetime temp directory.
    /// Used by `imn-store` unit/integration tests (see DESIGN.md).
    pub fn temporary() -> Result<Self, KvError> {
        let dir = tempfile::tempdir().map_err(|e| KvError::Other(e.to_string()))?;
        let db = sled::open(dir.path())?;
        Self::from_db(db, Some(dir))
    }

    fn from_db(db: sled::Db, tempdir: Option<tempfile::TempDir>) -> Result<Self, KvError> {
        let engine = Self {
            kv: DashMap::new(),
            versioned: DashMap::new(),
            zsets: DashMap::new(),
            lists: DashMap::new(),
            db,
            _tempdir: tempdir,
        };
        engine.hydrate()?;
        Ok(engine)
    }

    /// Reloads the in-memory primary from disk on startup.
    fn hydrate(&self) -> Result<(), KvError> {
        for item in self.db.open_tree(TREE_KV)?.iter() {
            let (k, v) = item?;
            let stored: StoredValue = bincode::deserialize(&v)?;
            self.kv.insert(String::from_utf8_lossy(&k).into_owned(), stored);
        }
        for item in self.db.open_tree(TREE_VERSIONED)?.iter() {
            let (k, v) = item?;
            let stored: VersionedValue = bincode::deserialize(&v)?;
            self.versioned.insert(String::from_utf8_lossy(&k).into_owned(), stored);
        }
        for item in self.db.open_tree(TREE_ZSETS)?.iter() {
            let (k, v) = item?;
            let stored: Vec<ScoredMemberRepr> = bincode::deserialize(&v)?;
            self.zsets.insert(
                String::from_utf8_lossy(&k).into_owned(),
                Mutex::new(stored.into_iter().map(Into::into).collect()),
            );
        }
        for item in self.db.open_tree(TREE_LISTS)?.iter() {
            let (k, v) = item?;
            let stored: VecDeque<Vec<u8>> = bincode::deserialize(&v)?;
            self.lists.insert(String::from_utf8_lossy(&k).into_owned(), Mutex::new(stored));
        }
        Ok(())
    }

    fn persist_kv(&self, key: &str, stored: &StoredValue) -> Result<(), KvError> {
        let bytes = bincode::serialize(stored)?;
        self.db.open_tree(TREE_KV)?.insert(key.as_bytes(), bytes)?;
        Ok(())
    }

    fn persist_versioned(&self, key: &str, stored: &VersionedValue) -> Result<(), KvError> {
        let bytes = bincode::serialize(stored)?;
        self.db.open_tree(TREE_VERSIONED)?.insert(key.as_bytes(), bytes)?;
        Ok(())
    }

    fn persist_zset(&self, key: &str, members: &[ScoredMember]) -> Result<(), KvError> {
        let repr: Vec<ScoredMemberRepr> = members.iter().cloned().map(Into::into).collect();
        let bytes = bincode::serialize(&repr)?;
        self.db.open_tree(TREE_ZSETS)?.insert(key.as_bytes(), bytes)?;
        Ok(())
    }

    fn persist_list(&self, key: &str, items: &VecDeque<Vec<u8>>) -> Result<(), KvError> {
        let bytes = bincode::serialize(items)?;
        self.db.open_tree(TREE_LISTS)?.insert(key.as_bytes(), bytes)?;
        Ok(())
    }
}

#[derive(Serialize, Deserialize, Clone)]
struct ScoredMemberRepr {
    member: String,
    score_bits: u64,
}

impl From<ScoredMember> for ScoredMemberRepr {
    fn from(m: ScoredMember) -> Self {
        Self { member: m.member, score_bits: m.score.to_bits() }
    }
}

impl From<ScoredMemberRepr> for ScoredMember {
    fn from(r: ScoredMemberRepr) -> Self {
        Self { member: r.member, score: f64::from_bits(r.score_bits) }
    }
}

#[async_trait]
impl KvEngine for SledKvEngine {
    #[instrument(skip(self, ctx))]
    async fn get(&self, key: &str, ctx: &CancellationToken) -> Result<Option<Vec<u8>>, KvError> {
        check_cancelled(ctx)?;
        let now = SystemTime::now();
        if let Some(entry) = self.kv.get(key) {
            if entry.is_expired(now) {
                drop(entry);
                self.delete(key, ctx).await?;
                return Ok(None);
            }
            return Ok(Some(entry.value.clone()));
        }
        Ok(None)
    }

    #[instrument(skip(self, value, ctx))]
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>, ctx: &CancellationToken) -> Result<(), KvError> {
        check_cancelled(ctx)?;
        let stored = StoredValue { value, expires_at: ttl.map(|d| SystemTime::now() + d) };
        self.persist_kv(key, &stored)?;
        self.kv.insert(key.to_string(), stored);
        Ok(())
    }

    async fn exists(&self, key: &str, ctx: &CancellationToken) -> Result<bool, KvError> {
        Ok(self.get(key, ctx).await?.is_some())
    }

    async fn delete(&self, key: &str, ctx: &CancellationToken) -> Result<(), KvError> {
        check_cancelled(ctx)?;
        self.kv.remove(key);
        self.db.open_tree(TREE_KV)?.remove(key.as_bytes())?;
        Ok(())
    }

    async fn get_versioned(&self, key: &str, ctx: &CancellationToken) -> Result<Option<(u64, Vec<u8>)>, KvError> {
        check_cancelled(ctx)?;
        Ok(self.versioned.get(key).map(|v| (v.version, v.value.clone())))
    }

    #[instrument(skip(self, value, ctx))]
    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<u64>,
        value: Vec<u8>,
        ctx: &CancellationToken,
    ) -> Result<u64, KvError> {
        check_cancelled(ctx)?;
        let new_version = expected.unwrap_or(0) + 1;

        match self.versioned.entry(key.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                let current = occupied.get().version;
                if Some(current) != expected {
                    return Err(KvError::VersionConflict { expected, actual: Some(current) });
                }
                let updated = VersionedValue { version: new_version, value };
                self.persist_versioned(key, &updated)?;
                occupied.insert(updated);
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                if expected.is_some() {
                    return Err(KvError::VersionConflict { expected, actual: None });
                }
                let created = VersionedValue { version: new_version, value };
                self.persist_versioned(key, &created)?;
                vacant.insert(created);
            }
        }
        Ok(new_version)
    }

    async fn scan_prefix(&self, prefix: &str, ctx: &CancellationToken) -> Result<Vec<(String, Vec<u8>)>, KvError> {
        check_cancelled(ctx)?;
        let now = SystemTime::now();
        Ok(self
            .kv
            .iter()
            .filter(|e| e.key().starts_with(prefix) && !e.value().is_expired(now))
            .map(|e| (e.key().clone(), e.value().value.clone()))
            .collect())
    }

    async fn zadd(&self, zset_key: &str, member: &str, score: f64, ctx: &CancellationToken) -> Result<(), KvError> {
        check_cancelled(ctx)?;
        let entry = self.zsets.entry(zset_key.to_string()).or_insert_with(|| Mutex::new(Vec::new()));
        let mut guard = entry.lock();
        guard.retain(|m| m.member != member);
        let pos = guard.partition_point(|m| m.score < score);
        guard.insert(pos, ScoredMember { member: member.to_string(), score });
        self.persist_zset(zset_key, &guard)?;
        Ok(())
    }

    async fn zrem(&self, zset_key: &str, member: &str, ctx: &CancellationToken) -> Result<(), KvError> {
        check_cancelled(ctx)?;
        if let Some(entry) = self.zsets.get(zset_key) {
            let mut guard = entry.lock();
            guard.retain(|m| m.member != member);
            self.persist_zset(zset_key, &guard)?;
        }
        Ok(())
    }

    async fn zrange_by_score(
        &self,
        zset_key: &str,
        min: f64,
        max: f64,
        ctx: &CancellationToken,
    ) -> Result<Vec<ScoredMember>, KvError> {
        check_cancelled(ctx)?;
        Ok(self
            .zsets
            .get(zset_key)
            .map(|e| e.lock().iter().filter(|m| m.score >= min && m.score <= max).cloned().collect())
            .unwrap_or_default())
    }

    async fn zlist(&self, zset_key: &str, ctx: &CancellationToken) -> Result<Vec<ScoredMember>, KvError> {
        check_cancelled(ctx)?;
        Ok(self.zsets.get(zset_key).map(|e| e.lock().clone()).unwrap_or_default())
    }

    async fn list_prepend(&self, list_key: &str, value: Vec<u8>, ctx: &CancellationToken) -> Result<(), KvError> {
        check_cancelled(ctx)?;
        let entry = self.lists.entry(list_key.to_string()).or_insert_with(|| Mutex::new(VecDeque::new()));
        let mut guard = entry.lock();
        guard.push_front(value);
        self.persist_list(list_key, &guard)?;
        Ok(())
    }

    async fn list_range(&self, list_key: &str, limit: usize, ctx: &CancellationToken) -> Result<Vec<Vec<u8>>, KvError> {
        check_cancelled(ctx)?;
        Ok(self
            .lists
            .get(list_key)
            .map(|e| e.lock().iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> CancellationToken {
        CancellationToken::new()
    }

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let engine = SledKvEngine::temporary().unwrap();
        engine.set("k1", b"v1".to_vec(), None, &ctx()).await.unwrap();
        assert_eq!(engine.get("k1", &ctx()).await.unwrap(), Some(b"v1".to_vec()));
    }

    #[tokio::test]
    async fn ttl_expiry_hides_value() {
        let engine = SledKvEngine::temporary().unwrap();
        engine.set("k1", b"v1".to_vec(), Some(Duration::from_millis(1)), &ctx()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(engine.get("k1", &ctx()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn compare_and_set_rejects_stale_version() {
        let engine = SledKvEngine::temporary().unwrap();
        let v1 = engine.compare_and_set("rec1", None, b"a".to_vec(), &ctx()).await.unwrap();
        assert_eq!(v1, 1);
        let err = engine.compare_and_set("rec1", Some(0), b"b".to_vec(), &ctx()).await.unwrap_err();
        assert!(matches!(err, KvError::VersionConflict { .. }));
        let v2 = engine.compare_and_set("rec1", Some(1), b"b".to_vec(), &ctx()).await.unwrap();
        assert_eq!(v2, 2);
    }

    #[tokio::test]
    async fn zset_range_by_score_is_ascending() {
        let engine = SledKvEngine::temporary().unwrap();
        engine.zadd("z1", "b", 2.0, &ctx()).await.unwrap();
        engine.zadd("z1", "a", 1.0, &ctx()).await.unwrap();
        engine.zadd("z1", "c", 3.0, &ctx()).await.unwrap();
        let members: Vec<String> = engine.zrange_by_score("z1", 0.0, 2.5, &ctx()).await.unwrap().into_iter().map(|m| m.member).collect();
        assert_eq!(members, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn zadd_moves_existing_member_instead_of_duplicating() {
        let engine = SledKvEngine::temporary().unwrap();
        engine.zadd("z1", "a", 1.0, &ctx()).await.unwrap();
        engine.zadd("z1", "a", 5.0, &ctx()).await.unwrap();
        let all = engine.zlist("z1", &ctx()).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].score, 5.0);
    }

    #[tokio::test]
    async fn list_prepend_is_newest_first() {
        let engine = SledKvEngine::temporary().unwrap();
        engine.list_prepend("l1", b"first".to_vec(), &ctx()).await.unwrap();
        engine.list_prepend("l1", b"second".to_vec(), &ctx()).await.unwrap();
        let items = engine.list_range("l1", 10, &ctx()).await.unwrap();
        assert_eq!(items, vec![b"second".to_vec(), b"first".to_vec()]);
    }

    #[tokio::test]
    async fn scan_prefix_filters_by_key_prefix() {
        let engine = SledKvEngine::temporary().unwrap();
        engine.set("agent:1", b"a".to_vec(), None, &ctx()).await.unwrap();
        engine.set("agent:2", b"b".to_vec(), None, &ctx()).await.unwrap();
        engine.set("task:1", b"c".to_vec(), None, &ctx()).await.unwrap();
        let results = engine.scan_prefix("agent:", &ctx()).await.unwrap();
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn cancelled_context_short_circuits() {
        let engine = SledKvEngine::temporary().unwrap();
        let token = CancellationToken::new();
        token.cancel();
        let err = engine.get("k1", &token).await.unwrap_err();
        assert!(matches!(err, KvError::Cancelled));
    }
}
