use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use imn_bus::Bus;
use imn_model::SchemaRegistry;
use imn_modules::ModuleRegistry;
use imn_store::DbosApi;
use uuid::Uuid;

use crate::config::CoordinatorConfig;
use crate::correlator::Correlator;

/// Shared application state handed to every axum handler and background
/// daemon (spec.md §4.6, C6 — the coordinator).
#[derive(Clone)]
pub struct AppState {
    pub dbos: Arc<dyn DbosApi>,
    pub bus: Arc<dyn Bus>,
    pub schemas: Arc<SchemaRegistry>,
    /// Used only to answer "does this module use module-scoped subjects?"
    /// (spec.md §4.4) — the coordinator never calls `handle` itself.
    pub module_registry: Arc<ModuleRegistry>,
    pub correlator: Arc<Correlator>,
    pub config: Arc<CoordinatorConfig>,
    pub server_id: Arc<str>,
    outstanding: Arc<DashMap<String, AtomicUsize>>,
}

impl AppState {
    pub fn new(dbos: Arc<dyn DbosApi>, bus: Arc<dyn Bus>, schemas: SchemaRegistry, module_registry: Arc<ModuleRegistry>, config: CoordinatorConfig) -> Self {
        let correlator = Correlator::new(bus.clone(), module_registry.clone());
        Self {
            dbos,
            bus,
            schemas: Arc::new(schemas),
            module_registry,
            correlator,
            config: Arc::new(config),
            server_id: Arc::from(Uuid::new_v4().to_string()),
            outstanding: Arc::new(DashMap::new()),
        }
    }

    /// Backpressure gate (spec.md §5 "the coordinator imposes an upper bound
    /// on outstanding awaits per agent"). Returns `false` if the agent is at
    /// capacity; otherwise reserves a slot the caller must later release.
    pub fn try_acquire_slot(&self, agent_id: &str) -> bool {
        let counter = self.outstanding.entry(agent_id.to_string()).or_insert_with(|| AtomicUsize::new(0));
        let mut current = counter.load(Ordering::SeqCst);
        loop {
            if current >= self.config.max_outstanding_per_agent {
                return false;
            }
            match counter.compare_exchange(current, current + 1, Ordering::SeqCst, Ordering::SeqCst) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }

    pub fn release_slot(&self, agent_id: &str) {
        if let Some(counter) = self.outstanding.get(agent_id) {
            counter.fetch_sub(1, Ordering::SeqCst);
        }
    }
}
