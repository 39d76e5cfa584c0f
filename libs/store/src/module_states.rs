use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use imn_kv::KvEngine;
use imn_model::{ModuleState, StateSymbol};
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::error::StoreError;

fn primary_key(request_id: &str) -> String {
    format!("module_state:{request_id}")
}

fn index_key(agent_id: &str, module_name: &str) -> String {
    format!("module_states:{agent_id}:{module_name}")
}

/// A request to advance (or create) a module-state record. Mirrors the
/// `SetModuleState` input in spec.md §4.3: the caller never supplies a
/// version — the store computes it.
#[derive(Debug, Clone)]
pub struct SetModuleStateRequest {
    pub request_id: String,
    pub agent_id: String,
    pub module_name: String,
    pub state: StateSymbol,
    pub error_message: String,
    pub details: HashMap<String, String>,
}

/// Versioned module-state store (spec.md §4.2 "Module-state store").
pub struct ModuleStateStore {
    kv: Arc<dyn KvEngine>,
}

impl ModuleStateStore {
    pub fn new(kv: Arc<dyn KvEngine>) -> Self {
        Self { kv }
    }

    async fn read_current(&self, request_id: &str, ctx: &CancellationToken) -> Result<Option<ModuleState>, StoreError> {
        match self.kv.get_versioned(&primary_key(request_id), ctx).await? {
            Some((_, bytes)) => Ok(Some(bincode::deserialize(&bytes).map_err(|e| StoreError::Other(e.to_string()))?)),
            None => Ok(None),
        }
    }

    fn build_next(
        current: &Option<ModuleState>,
        req: &SetModuleStateRequest,
        now: DateTime<Utc>,
    ) -> Result<ModuleState, StoreError> {
        match current {
            Some(cur) => Ok(cur.advance(req.state, now, req.error_message.clone(), req.details.clone())?),
            None => {
                if req.state != StateSymbol::Created {
                    return Err(StoreError::InvalidTransition(imn_model::InvalidTransition {
                        request_id: req.request_id.clone(),
                        from: StateSymbol::Created,
                        to: req.state,
                    }));
                }
                Ok(ModuleState::first(req.request_id.clone(), req.agent_id.clone(), req.module_name.clone(), now))
            }
        }
    }

    async fn write(&self, next: &ModuleState, expected: Option<u64>, ctx: &CancellationToken) -> Result<(), StoreError> {
        let bytes = bincode::serialize(next).map_err(|e| StoreError::Other(e.to_string()))?;
        self.kv.compare_and_set(&primary_key(&next.request_id), expected, bytes, ctx).await?;
        self.kv
            .zadd(&index_key(&next.agent_id, &next.module_name), &next.request_id, next.timestamp.timestamp() as f64, ctx)
            .await?;
        Ok(())
    }

    /// Validates and persists the transition; computes `version` itself.
    #[instrument(skip(self, req, ctx))]
    pub async fn set_module_state(&self, req: SetModuleStateRequest, now: DateTime<Utc>, ctx: &CancellationToken) -> Result<ModuleState, StoreError> {
        let current = self.read_current(&req.request_id, ctx).await?;
        let expected = current.as_ref().map(|c| c.version);
        let next = Self::build_next(&current, &req, now)?;
        self.write(&next, expected, ctx).await?;
        Ok(next)
    }

    /// As `set_module_state`, but additionally requires
    /// `current.version == expected_version`; on mismatch fails with
    /// `VersionConflict` and performs no writes (spec.md §4.2).
    #[instrument(skip(self, req, ctx))]
    pub async fn set_module_state_with_version(
        &self,
        req: SetModuleStateRequest,
        expected_version: u64,
        now: DateTime<Utc>,
        ctx: &CancellationToken,
    ) -> Result<ModuleState, StoreError> {
        let current = self.read_current(&req.request_id, ctx).await?;
        let actual = current.as_ref().map(|c| c.version);
        if actual != Some(expected_version) {
            return Err(StoreError::VersionConflict { expected: Some(expected_version), actual });
        }
        let next = Self::build_next(&current, &req, now)?;
        self.write(&next, Some(expected_version), ctx).await?;
        Ok(next)
    }

    pub async fn get_module_state(&self, request_id: &str, ctx: &CancellationToken) -> Result<ModuleState, StoreError> {
        self.read_current(request_id, ctx).await?.ok_or(StoreError::NotFound)
    }

    pub async fn list_module_states(&self, agent_id: &str, module_name: &str, ctx: &CancellationToken) -> Result<Vec<ModuleState>, StoreError> {
        let members = self.kv.zlist(&index_key(agent_id, module_name), ctx).await?;
        let mut out = Vec::with_capacity(members.len());
        for m in members {
            if let Some(state) = self.read_current(&m.member, ctx).await? {
                out.push(state);
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use imn_kv::SledKvEngine;

    fn ctx() -> CancellationToken {
        CancellationToken::new()
    }

    fn req(request_id: &str, state: StateSymbol) -> SetModuleStateRequest {
        SetModuleStateRequest {
            request_id: request_id.to_string(),
            agent_id: "a1".to_string(),
            module_name: "echo_module".to_string(),
            state,
            error_message: String::new(),
            details: HashMap::new(),
        }
    }

    fn store() -> ModuleStateStore {
        let kv: Arc<dyn KvEngine> = Arc::new(SledKvEngine::temporary().unwrap());
        ModuleStateStore::new(kv)
    }

    #[tokio::test]
    async fn full_lifecycle_increments_version_each_step() {
        let store = store();
        let now = Utc::now();
        let created = store.set_module_state(req("r1", StateSymbol::Created), now, &ctx()).await.unwrap();
        assert_eq!(created.version, 1);
        let started = store.set_module_state(req("r1", StateSymbol::Started), now, &ctx()).await.unwrap();
        assert_eq!(started.version, 2);
        let running = store.set_module_state(req("r1", StateSymbol::Running), now, &ctx()).await.unwrap();
        assert_eq!(running.version, 3);
        let completed = store.set_module_state(req("r1", StateSymbol::Completed), now, &ctx()).await.unwrap();
        assert_eq!(completed.version, 4);
        assert_eq!(completed.state, StateSymbol::Completed);
    }

    // B1: SetModuleState(completed -> running) fails, record unchanged.
    #[tokio::test]
    async fn illegal_transition_leaves_record_unchanged() {
        let store = store();
        let now = Utc::now();
        store.set_module_state(req("r1", StateSymbol::Created), now, &ctx()).await.unwrap();
        store.set_module_state(req("r1", StateSymbol::Started), now, &ctx()).await.unwrap();
        store.set_module_state(req("r1", StateSymbol::Running), now, &ctx()).await.unwrap();
        store.set_module_state(req("r1", StateSymbol::Completed), now, &ctx()).await.unwrap();

        let err = store.set_module_state(req("r1", StateSymbol::Running), now, &ctx()).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition(_)));

        let current = store.get_module_state("r1", &ctx()).await.unwrap();
        assert_eq!(current.state, StateSymbol::Completed);
        assert_eq!(current.version, 4);
    }

    // B2: SetModuleStateWithVersion with a stale expected version fails,
    // record unchanged.
    #[tokio::test]
    async fn with_version_rejects_stale_expected_version() {
        let store = store();
        let now = Utc::now();
        store.set_module_state(req("r1", StateSymbol::Created), now, &ctx()).await.unwrap();
        store.set_module_state(req("r1", StateSymbol::Started), now, &ctx()).await.unwrap();

        let err = store
            .set_module_state_with_version(req("r1", StateSymbol::Running), 1, now, &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::VersionConflict { .. }));

        let current = store.get_module_state("r1", &ctx()).await.unwrap();
        assert_eq!(current.version, 2);
        assert_eq!(current.state, StateSymbol::Started);
    }

    #[tokio::test]
    async fn with_version_succeeds_on_matching_version() {
        let store = store();
        let now = Utc::now();
        store.set_module_state(req("r1", StateSymbol::Created), now, &ctx()).await.unwrap();
        let result = store
            .set_module_state_with_version(req("r1", StateSymbol::Started), 1, now, &ctx())
            .await
            .unwrap();
        assert_eq!(result.version, 2);
        assert_eq!(result.state, StateSymbol::Started);
    }

    #[tokio::test]
    async fn list_module_states_uses_secondary_index() {
        let store = store();
        let now = Utc::now();
        store.set_module_state(req("r1", StateSymbol::Created), now, &ctx()).await.unwrap();
        store.set_module_state(req("r2", StateSymbol::Created), now, &ctx()).await.unwrap();
        let states = store.list_module_states("a1", "echo_module", &ctx()).await.unwrap();
        assert_eq!(states.len(), 2);
    }
}
