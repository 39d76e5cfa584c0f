use clap::Parser;

/// Control-plane server configuration (spec.md §6 "Configuration (environment)").
#[derive(Debug, Clone, Parser)]
#[command(name = "imn-coordinator", version, about)]
pub struct CoordinatorConfig {
    /// HTTP bind port for the REST surface.
    #[arg(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    /// Address of the bus RPC server this coordinator hosts for agents.
    #[arg(long, env = "BUS_ADDR", default_value = "0.0.0.0:4300")]
    pub bus_addr: String,

    /// Where the KV engine persists its sled database; empty for ephemeral/in-memory.
    #[arg(long, env = "KV_ADDR", default_value = "")]
    pub kv_addr: String,

    /// Coordinator's RPC target for the state store (spec.md §6
    /// `DBOS_ADDRESS`). When set, the coordinator runs as a `DbosClient`
    /// against a remote store process instead of opening its own KV engine.
    #[arg(long, env = "DBOS_ADDRESS")]
    pub dbos_address: Option<String>,

    /// Address this coordinator hosts its own `DbosServer` on, when it owns
    /// the local store (i.e. `DBOS_ADDRESS` is unset) — lets other
    /// processes reach C3's RPC surface instead of it being library-only.
    #[arg(long, env = "DBOS_BIND_ADDR", default_value = "0.0.0.0:4310")]
    pub dbos_bind_addr: String,

    #[arg(long, env = "HEARTBEAT_INTERVAL_MS", default_value_t = 2000)]
    pub heartbeat_interval_ms: u64,

    #[arg(long, env = "LIVENESS_WINDOW_MS", default_value_t = 10_000)]
    pub liveness_window_ms: i64,

    #[arg(long, env = "REQUEST_TIMEOUT_MS", default_value_t = 30_000)]
    pub request_timeout_ms: u64,

    #[arg(long, env = "VISIBILITY_TIMEOUT_S", default_value_t = 300)]
    pub visibility_timeout_s: i64,

    #[arg(long, env = "IDEMPOTENCY_TTL_S", default_value_t = 86_400)]
    pub idempotency_ttl_s: i64,

    /// Module-state age beyond which a restart-time scan forces `failed`.
    #[arg(long, env = "RECOVERY_WINDOW_S", default_value_t = 120)]
    pub recovery_window_s: i64,

    /// Outstanding in-flight awaits allowed per agent before `busy` is returned.
    #[arg(long, env = "MAX_OUTSTANDING_PER_AGENT", default_value_t = 32)]
    pub max_outstanding_per_agent: usize,

    #[arg(long, env = "MAX_TASK_RETRIES", default_value_t = imn_model::DEFAULT_MAX_RETRIES)]
    pub max_task_retries: u32,
}

impl CoordinatorConfig {
    pub fn liveness_window_secs(&self) -> i64 {
        self.liveness_window_ms / 1000
    }

    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.request_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.heartbeat_interval_ms)
    }
}
