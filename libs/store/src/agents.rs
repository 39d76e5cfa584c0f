use std::sync::Arc;

use chrono::Utc;
use imn_kv::KvEngine;
use imn_model::Agent;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::error::StoreError;

fn agent_key(agent_id: &str) -> String {
    format!("agent:{agent_id}")
}

/// Agent registry (spec.md §4.2 "Agent store").
pub struct AgentStore {
    kv: Arc<dyn KvEngine>,
}

impl AgentStore {
    pub fn new(kv: Arc<dyn KvEngine>) -> Self {
        Self { kv }
    }

    /// Overwrites unconditionally: last-writer-wins on heartbeat.
    #[instrument(skip(self, agent, ctx))]
    pub async fn register_agent(&self, agent: &Agent, ctx: &CancellationToken) -> Result<(), StoreError> {
        let bytes = bincode::serialize(agent).map_err(|e| StoreError::Other(e.to_string()))?;
        self.kv.set(&agent_key(&agent.agent_id), bytes, None, ctx).await?;
        Ok(())
    }

    pub async fn get_agent(&self, agent_id: &str, ctx: &CancellationToken) -> Result<Agent, StoreError> {
        let bytes = self.kv.get(&agent_key(agent_id), ctx).await?.ok_or(StoreError::NotFound)?;
        bincode::deserialize(&bytes).map_err(|e| StoreError::Other(e.to_string()))
    }

    pub async fn list_agents(&self, ctx: &CancellationToken) -> Result<Vec<Agent>, StoreError> {
        let entries = self.kv.scan_prefix("agent:", ctx).await?;
        entries
            .into_iter()
            .map(|(_, bytes)| bincode::deserialize(&bytes).map_err(|e| StoreError::Other(e.to_string())))
            .collect()
    }

    /// Agents with `now - last_seen <= liveness_window`, for `GET /agents/alive`.
    pub async fn list_alive(&self, liveness_window_secs: i64, ctx: &CancellationToken) -> Result<Vec<Agent>, StoreError> {
        let now = Utc::now();
        Ok(self
            .list_agents(ctx)
            .await?
            .into_iter()
            .filter(|a| a.is_alive(now, liveness_window_secs))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use imn_kv::SledKvEngine;

    fn ctx() -> CancellationToken {
        CancellationToken::new()
    }

    #[tokio::test]
    async fn register_then_get_round_trips() {
        let kv: Arc<dyn KvEngine> = Arc::new(SledKvEngine::temporary().unwrap());
        let store = AgentStore::new(kv);
        let agent = Agent::new("a1", "host-1", Utc::now());
        store.register_agent(&agent, &ctx()).await.unwrap();
        let fetched = store.get_agent("a1", &ctx()).await.unwrap();
        assert_eq!(fetched.agent_id, "a1");
    }

    #[tokio::test]
    async fn get_missing_agent_is_not_found() {
        let kv: Arc<dyn KvEngine> = Arc::new(SledKvEngine::temporary().unwrap());
        let store = AgentStore::new(kv);
        let err = store.get_agent("ghost", &ctx()).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }

    #[tokio::test]
    async fn list_alive_excludes_stale_agents() {
        let kv: Arc<dyn KvEngine> = Arc::new(SledKvEngine::temporary().unwrap());
        let store = AgentStore::new(kv);
        let now = Utc::now();
        let mut fresh = Agent::new("fresh", "host-1", now);
        fresh.record_heartbeat(now, Default::default());
        let mut stale = Agent::new("stale", "host-2", now - chrono::Duration::seconds(60));
        stale.last_seen = now - chrono::Duration::seconds(60);
        store.register_agent(&fresh, &ctx()).await.unwrap();
        store.register_agent(&stale, &ctx()).await.unwrap();

        let alive = store.list_alive(10, &ctx()).await.unwrap();
        let ids: Vec<_> = alive.iter().map(|a| a.agent_id.as_str()).collect();
        assert_eq!(ids, vec!["fresh"]);
    }
}
