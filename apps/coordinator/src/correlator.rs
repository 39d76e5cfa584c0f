use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use imn_bus::{subject, Bus, BusMessage};
use imn_model::{ModuleInvocationFailure, ModuleInvocationOutcome};
use imn_modules::ModuleRegistry;
use parking_lot::Mutex;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::debug;

#[derive(Debug, Error)]
pub enum CorrelatorError {
    #[error("request timed out waiting for agent response")]
    Timeout,
    #[error("correlation channel closed without a response")]
    Cancelled,
}

#[derive(Debug, Clone)]
pub enum CorrelatedOutcome {
    Success(Value),
    HandlerError { message: String },
    Crashed { message: String },
}

/// Rendezvous point for the coordinator's await step (spec.md §4.6 step 5):
/// correlates an agent's out/error bus messages back to the `request_id`
/// that dispatched them.
pub struct Correlator {
    bus: Arc<dyn Bus>,
    module_registry: Arc<ModuleRegistry>,
    pending: DashMap<String, oneshot::Sender<CorrelatedOutcome>>,
    wired: Mutex<HashSet<String>>,
}

impl Correlator {
    pub fn new(bus: Arc<dyn Bus>, module_registry: Arc<ModuleRegistry>) -> Arc<Self> {
        Arc::new(Self { bus, module_registry, pending: DashMap::new(), wired: Mutex::new(HashSet::new()) })
    }

    /// Picks the module-scoped or generic per-agent subject triple (spec.md
    /// §4.4 — generic is the default, module-scoped is the exception "used
    /// by some modules") and wires each exactly once, keyed on the subject
    /// itself so modules sharing the generic subject only subscribe once.
    async fn ensure_wired(self: &Arc<Self>, agent_id: &str, module_name: &str) {
        let module_scoped = self.module_registry.uses_module_scoped_subjects(module_name);
        let (out_subject, error_subject) = if module_scoped {
            (subject::agent_module_out(agent_id, module_name), subject::agent_module_error(agent_id, module_name))
        } else {
            (subject::agent_out(agent_id), subject::agent_error(agent_id))
        };

        let already_wired = {
            let mut wired = self.wired.lock();
            !wired.insert(out_subject.clone())
        };
        if already_wired {
            return;
        }

        let this = self.clone();
        self.bus.subscribe(&out_subject, Box::new(move |msg| this.on_out(msg))).await;

        let this = self.clone();
        self.bus.subscribe(&error_subject, Box::new(move |msg| this.on_error(msg))).await;
    }

    /// Registers the wait for `request_id` and blocks until the matching
    /// out/error message arrives or `timeout` elapses.
    pub async fn await_outcome(
        self: &Arc<Self>,
        agent_id: &str,
        module_name: &str,
        request_id: &str,
        timeout: Duration,
    ) -> Result<CorrelatedOutcome, CorrelatorError> {
        self.ensure_wired(agent_id, module_name).await;

        let (tx, rx) = oneshot::channel();
        self.pending.insert(request_id.to_string(), tx);

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(_)) => Err(CorrelatorError::Cancelled),
            Err(_) => {
                self.pending.remove(request_id);
                Err(CorrelatorError::Timeout)
            }
        }
    }

    fn on_out(&self, msg: BusMessage) {
        let Ok(outcome) = bincode::deserialize::<ModuleInvocationOutcome>(&msg.payload) else { return };
        if let Some((_, tx)) = self.pending.remove(&outcome.request_id) {
            let _ = tx.send(CorrelatedOutcome::Success(outcome.payload));
        } else {
            debug!(request_id = %outcome.request_id, "out message with no awaiting caller (late or duplicate)");
        }
    }

    fn on_error(&self, msg: BusMessage) {
        let Ok(failure) = bincode::deserialize::<ModuleInvocationFailure>(&msg.payload) else { return };
        if let Some((_, tx)) = self.pending.remove(&failure.request_id) {
            let outcome = if failure.crashed {
                CorrelatedOutcome::Crashed { message: failure.error_message }
            } else {
                CorrelatedOutcome::HandlerError { message: failure.error_message }
            };
            let _ = tx.send(outcome);
        } else {
            debug!(request_id = %failure.request_id, "error message with no awaiting caller (late or duplicate)");
        }
    }
}
