use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use imn_bus::{subject, Bus, BusMessage};
use imn_model::{HeartbeatMessage, ModuleInvocation, ModuleInvocationFailure, ModuleInvocationOutcome, RunningNotice};
use imn_modules::{ModuleRegistry, ModuleSpec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Default ceiling on a single `handle` invocation before it's treated as
/// an unhandled crash (spec.md §4.6 "bounded-duration guard").
pub const DEFAULT_HANDLER_TIMEOUT_MS: u64 = 30_000;

/// Matches spec.md §6's `HEARTBEAT_INTERVAL_MS` default.
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 2_000;

pub struct AgentRuntimeConfig {
    pub agent_id: String,
    pub hostname: String,
    pub handler_timeout: Duration,
    pub heartbeat_interval: Duration,
}

impl AgentRuntimeConfig {
    pub fn new(agent_id: impl Into<String>, hostname: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            hostname: hostname.into(),
            handler_timeout: Duration::from_millis(DEFAULT_HANDLER_TIMEOUT_MS),
            heartbeat_interval: Duration::from_millis(DEFAULT_HEARTBEAT_INTERVAL_MS),
        }
    }
}

/// The agent runtime (spec.md C5): loads a fixed module registry, runs one
/// worker loop per module, and emits heartbeats — all independent of any
/// particular bus transport, in-process or networked.
pub struct AgentRuntime {
    config: AgentRuntimeConfig,
    bus: Arc<dyn Bus>,
    registry: Arc<ModuleRegistry>,
}

impl AgentRuntime {
    pub fn new(config: AgentRuntimeConfig, bus: Arc<dyn Bus>, registry: Arc<ModuleRegistry>) -> Self {
        Self { config, bus, registry }
    }

    /// Boots every module's worker loop and the heartbeat emitter. Returns
    /// once `shutdown` is cancelled; in-flight invocations are not waited on.
    ///
    /// Modules that use the module-scoped subject triple each get a
    /// dedicated worker loop; the rest share a single loop on the generic
    /// per-agent subject (spec.md §4.4 — that form is the default, the
    /// module-scoped one is the exception "used by some modules").
    #[instrument(skip(self, shutdown), fields(agent_id = %self.config.agent_id))]
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut generic_modules = Vec::new();
        for name in self.registry.names() {
            let module = self.registry.get(name).expect("registry name came from iterating registry.names()");
            module.setup().await.unwrap_or_else(|e| warn!(module = name, error = %e, "module setup failed"));
            if module.uses_module_scoped_subjects() {
                self.spawn_module_scoped_worker_loop(module, shutdown.clone()).await;
            } else {
                generic_modules.push(module);
            }
        }
        if !generic_modules.is_empty() {
            self.spawn_generic_worker_loop(generic_modules, shutdown.clone()).await;
        }
        self.spawn_heartbeat_loop(shutdown.clone());
        info!(modules = ?self.registry.names().collect::<Vec<_>>(), "agent runtime online");
    }

    /// One loop per module, on `agent.{id}.{module}.in`.
    async fn spawn_module_scoped_worker_loop(&self, module: Arc<dyn ModuleSpec>, shutdown: CancellationToken) {
        let agent_id = self.config.agent_id.clone();
        let handler_timeout = self.config.handler_timeout;
        let bus = self.bus.clone();
        let in_subject = subject::agent_module_in(&agent_id, module.name());

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<BusMessage>();
        self.bus
            .subscribe(&in_subject, Box::new(move |msg| {
                let _ = tx.send(msg);
            }))
            .await;

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    message = rx.recv() => {
                        match message {
                            Some(msg) => process_one(&agent_id, &module, &bus, msg, handler_timeout, true).await,
                            None => break,
                        }
                    }
                }
            }
        });
        debug!(subject = %in_subject, "module-scoped worker loop subscribed");
    }

    /// One shared loop for every module addressed on the generic
    /// `agent.{id}.in` subject; dispatches each invocation to the named
    /// module internally by `ModuleInvocation::module_name`.
    async fn spawn_generic_worker_loop(&self, modules: Vec<Arc<dyn ModuleSpec>>, shutdown: CancellationToken) {
        let agent_id = self.config.agent_id.clone();
        let handler_timeout = self.config.handler_timeout;
        let bus = self.bus.clone();
        let in_subject = subject::agent_in(&agent_id);
        let by_name: HashMap<&'static str, Arc<dyn ModuleSpec>> = modules.into_iter().map(|m| (m.name(), m)).collect();

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<BusMessage>();
        self.bus
            .subscribe(&in_subject, Box::new(move |msg| {
                let _ = tx.send(msg);
            }))
            .await;

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    message = rx.recv() => {
                        match message {
                            Some(msg) => {
                                match dispatch_generic(&agent_id, &by_name, &bus, msg, handler_timeout).await {
                                    Ok(()) => {}
                                    Err(unknown) => warn!(module = %unknown, "dropping invocation for unregistered module"),
                                }
                            }
                            None => break,
                        }
                    }
                }
            }
        });
        debug!(subject = %in_subject, modules = ?by_name.keys().collect::<Vec<_>>(), "generic worker loop subscribed");
    }

    fn spawn_heartbeat_loop(&self, shutdown: CancellationToken) {
        let agent_id = self.config.agent_id.clone();
        let hostname = self.config.hostname.clone();
        let interval = self.config.heartbeat_interval;
        let bus = self.bus.clone();

        tokio::spawn(async move {
            let first_seen = Utc::now();
            let mut total_heartbeats = 0u64;
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        total_heartbeats += 1;
                        let heartbeat = HeartbeatMessage {
                            agent_id: agent_id.clone(),
                            hostname: hostname.clone(),
                            first_seen: first_seen.timestamp() as f64,
                            total_heartbeats,
                            config: HashMap::new(),
                            timestamp: Utc::now().timestamp() as f64,
                        };
                        let Ok(bytes) = bincode::serialize(&heartbeat) else { continue };
                        bus.publish(BusMessage::new(subject::HEARTBEAT_MODULE, bytes)).await;
                    }
                }
            }
        });
    }
}

/// Decodes `msg` and routes it to the matching module in `by_name`. Returns
/// the unrecognized module name as `Err` so the caller can log it without
/// this function needing a `tracing` dependency on its error path.
async fn dispatch_generic(
    agent_id: &str,
    by_name: &HashMap<&'static str, Arc<dyn ModuleSpec>>,
    bus: &Arc<dyn Bus>,
    msg: BusMessage,
    handler_timeout: Duration,
) -> Result<(), String> {
    let invocation: ModuleInvocation = match bincode::deserialize(&msg.payload) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "dropping undecodable module invocation");
            return Ok(());
        }
    };
    let module = by_name.get(invocation.module_name.as_str()).cloned().ok_or(invocation.module_name.clone())?;
    process_one(agent_id, &module, bus, msg, handler_timeout, false).await;
    Ok(())
}

async fn process_one(agent_id: &str, module: &Arc<dyn ModuleSpec>, bus: &Arc<dyn Bus>, msg: BusMessage, handler_timeout: Duration, module_scoped: bool) {
    let invocation: ModuleInvocation = match bincode::deserialize(&msg.payload) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "dropping undecodable module invocation");
            return;
        }
    };

    let normalized = match imn_model::schema::validate(module.schema(), &invocation.input) {
        Ok(v) => v,
        Err(e) => {
            publish_failure(agent_id, module.name(), bus, &invocation.request_id, e.to_string(), false, module_scoped).await;
            return;
        }
    };

    if !invocation.request_id.is_empty() {
        let notice = RunningNotice {
            request_id: invocation.request_id.clone(),
            agent_id: agent_id.to_string(),
            module_name: module.name().to_string(),
        };
        if let Ok(bytes) = bincode::serialize(&notice) {
            bus.publish(BusMessage::new(subject::MODULE_STATE, bytes).with_trace_id(invocation.request_id.clone())).await;
        }
    }

    let module = module.clone();
    let ctx = CancellationToken::new();
    let handle_ctx = ctx.clone();
    let task = tokio::spawn(async move { module.handle(normalized, &handle_ctx).await });

    match tokio::time::timeout(handler_timeout, task).await {
        Ok(Ok(Ok(payload))) => {
            let outcome = ModuleInvocationOutcome {
                request_id: invocation.request_id.clone(),
                agent_id: agent_id.to_string(),
                module_name: module.name().to_string(),
                payload,
            };
            if let Ok(bytes) = bincode::serialize(&outcome) {
                let out_subject = if module_scoped { subject::agent_module_out(agent_id, module.name()) } else { subject::agent_out(agent_id) };
                bus.publish(BusMessage::new(out_subject, bytes).with_trace_id(invocation.request_id)).await;
            }
        }
        Ok(Ok(Err(module_error))) => {
            publish_failure(agent_id, module.name(), bus, &invocation.request_id, module_error.to_string(), false, module_scoped).await;
        }
        Ok(Err(join_error)) => {
            let crashed = join_error.is_panic();
            error!(module = module.name(), panic = crashed, "module task ended abnormally");
            publish_failure(agent_id, module.name(), bus, &invocation.request_id, join_error.to_string(), crashed, module_scoped).await;
        }
        Err(_elapsed) => {
            ctx.cancel();
            publish_failure(agent_id, module.name(), bus, &invocation.request_id, "handler timed out".to_string(), true, module_scoped).await;
        }
    }
}

async fn publish_failure(agent_id: &str, module_name: &str, bus: &Arc<dyn Bus>, request_id: &str, error_message: String, crashed: bool, module_scoped: bool) {
    let failure = ModuleInvocationFailure {
        request_id: request_id.to_string(),
        agent_id: agent_id.to_string(),
        module_name: module_name.to_string(),
        error_message,
        crashed,
    };
    if let Ok(bytes) = bincode::serialize(&failure) {
        let error_subject = if module_scoped { subject::agent_module_error(agent_id, module_name) } else { subject::agent_error(agent_id) };
        bus.publish(BusMessage::new(error_subject, bytes).with_trace_id(request_id.to_string())).await;
    }
}
