use std::sync::Arc;
use std::time::Duration;

use imn_kv::KvEngine;
use imn_model::MeasurementResult;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::error::StoreError;

pub const DEFAULT_IDEMPOTENCY_TTL_SECS: u64 = 86_400;

fn primary_key(agent_id: &str, request_id: &str) -> String {
    format!("result:{agent_id}:{request_id}")
}

fn index_key(agent_id: &str) -> String {
    format!("results:{agent_id}")
}

fn idempotency_key(request_id: &str) -> String {
    format!("processed:{request_id}")
}

/// Deduplicated, immutable result store (spec.md §4.2 "Result store").
pub struct ResultStore {
    kv: Arc<dyn KvEngine>,
    idempotency_ttl: Duration,
}

impl ResultStore {
    pub fn new(kv: Arc<dyn KvEngine>) -> Self {
        Self { kv, idempotency_ttl: Duration::from_secs(DEFAULT_IDEMPOTENCY_TTL_SECS) }
    }

    pub fn with_idempotency_ttl(kv: Arc<dyn KvEngine>, ttl: Duration) -> Self {
        Self { kv, idempotency_ttl: ttl }
    }

    /// Crash-safe write order (spec.md §4.2): check the idempotency mark,
    /// then write the primary record, then the secondary index, then the
    /// mark itself. A crash between steps 2–4 is tolerated on replay
    /// because step 2 is a value-equal no-op (I5, P2, P5).
    #[instrument(skip(self, result, ctx))]
    pub async fn store_result(&self, result: &MeasurementResult, ctx: &CancellationToken) -> Result<(), StoreError> {
        if self.kv.exists(&idempotency_key(&result.request_id), ctx).await? {
            return Ok(());
        }

        let bytes = bincode::serialize(result).map_err(|e| StoreError::Other(e.to_string()))?;
        self.kv.set(&primary_key(&result.agent_id, &result.request_id), bytes, None, ctx).await?;

        self.kv
            .zadd(&index_key(&result.agent_id), &result.request_id, result.received_at.timestamp() as f64, ctx)
            .await?;

        self.kv
            .set(&idempotency_key(&result.request_id), b"1".to_vec(), Some(self.idempotency_ttl), ctx)
            .await?;
        Ok(())
    }

    pub async fn get_result(&self, agent_id: &str, request_id: &str, ctx: &CancellationToken) -> Result<MeasurementResult, StoreError> {
        let bytes = self.kv.get(&primary_key(agent_id, request_id), ctx).await?.ok_or(StoreError::NotFound)?;
        bincode::deserialize(&bytes).map_err(|e| StoreError::Other(e.to_string()))
    }

    pub async fn list_results(&self, agent_id: &str, ctx: &CancellationToken) -> Result<Vec<MeasurementResult>, StoreError> {
        let members = self.kv.zlist(&index_key(agent_id), ctx).await?;
        let mut out = Vec::with_capacity(members.len());
        for m in members {
            if let Ok(result) = self.get_result(agent_id, &m.member, ctx).await {
                out.push(result);
            }
        }
        Ok(out)
    }

    /// Deletes a result and clears its idempotency mark
    /// (`DELETE /agents/{id}/results/{rid}`, spec.md §4.7).
    pub async fn delete_result(&self, agent_id: &str, request_id: &str, ctx: &CancellationToken) -> Result<(), StoreError> {
        self.kv.delete(&primary_key(agent_id, request_id), ctx).await?;
        self.kv.zrem(&index_key(agent_id), request_id, ctx).await?;
        self.kv.delete(&idempotency_key(request_id), ctx).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use imn_kv::SledKvEngine;

    fn ctx() -> CancellationToken {
        CancellationToken::new()
    }

    fn sample(request_id: &str) -> MeasurementResult {
        let now = Utc::now();
        MeasurementResult {
            result_id: uuid::Uuid::new_v4().to_string(),
            agent_id: "a1".to_string(),
            request_id: request_id.to_string(),
            module_name: "echo_module".to_string(),
            payload: br#"{"message":"hi"}"#.to_vec(),
            created_at: now,
            received_at: now,
            agent_start_time: now,
            agent_runtime_version: "0.1.0".to_string(),
            module_revision: "1".to_string(),
            server_id: "s1".to_string(),
            ingest_source: "bus".to_string(),
        }
    }

    fn store() -> ResultStore {
        let kv: Arc<dyn KvEngine> = Arc::new(SledKvEngine::temporary().unwrap());
        ResultStore::new(kv)
    }

    // P5 / R2: storing and re-fetching a result round-trips.
    #[tokio::test]
    async fn store_then_get_round_trips() {
        let store = store();
        let r = sample("w1");
        store.store_result(&r, &ctx()).await.unwrap();
        let fetched = store.get_result("a1", "w1", &ctx()).await.unwrap();
        assert_eq!(fetched.result_id, r.result_id);
    }

    // P2 / B4 scenario 4: storing the same result twice is a no-op and
    // yields exactly one index entry.
    #[tokio::test]
    async fn duplicate_store_is_idempotent() {
        let store = store();
        let r = sample("w2");
        store.store_result(&r, &ctx()).await.unwrap();
        store.store_result(&r, &ctx()).await.unwrap();

        let results = store.list_results("a1", &ctx()).await.unwrap();
        assert_eq!(results.len(), 1);
        assert!(store.kv.exists(&idempotency_key("w2"), &ctx()).await.unwrap());
    }

    #[tokio::test]
    async fn delete_clears_primary_index_and_idempotency_mark() {
        let store = store();
        let r = sample("w3");
        store.store_result(&r, &ctx()).await.unwrap();
        store.delete_result("a1", "w3", &ctx()).await.unwrap();

        assert!(matches!(store.get_result("a1", "w3", &ctx()).await.unwrap_err(), StoreError::NotFound));
        assert!(store.list_results("a1", &ctx()).await.unwrap().is_empty());
        assert!(!store.kv.exists(&idempotency_key("w3"), &ctx()).await.unwrap());
    }
}
