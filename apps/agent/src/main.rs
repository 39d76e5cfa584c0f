use std::sync::Arc;

use clap::Parser;
use imn_agent::{AgentRuntime, AgentRuntimeConfig};
use imn_bus::BusRpcClient;
use imn_modules::ModuleRegistry;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Measurement agent: runs the built-in module set against a bus endpoint.
#[derive(Debug, Parser)]
#[command(name = "imn-agent", version, about)]
struct Args {
    /// Unique id for this agent, used to build its subject namespace
    /// (spec.md §6 `AGENT_ID`).
    #[arg(long, env = "AGENT_ID")]
    agent_id: String,

    /// Hostname reported in heartbeats; defaults to the OS hostname.
    #[arg(long, env = "AGENT_HOSTNAME")]
    hostname: Option<String>,

    /// Address of the bus RPC server (coordinator-hosted `BusRpcServer`,
    /// bound via the coordinator's own `BUS_ADDR`).
    #[arg(long, env = "BUS_ADDR", default_value = "127.0.0.1:4300")]
    bus_addr: String,

    /// Milliseconds before a module's `handle` is treated as an unhandled crash.
    #[arg(long, env = "HANDLER_TIMEOUT_MS", default_value_t = imn_agent::DEFAULT_HANDLER_TIMEOUT_MS)]
    handler_timeout_ms: u64,

    /// Milliseconds between heartbeat broadcasts (spec.md §6
    /// `HEARTBEAT_INTERVAL_MS`).
    #[arg(long, env = "HEARTBEAT_INTERVAL_MS", default_value_t = imn_agent::DEFAULT_HEARTBEAT_INTERVAL_MS)]
    heartbeat_interval_ms: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let hostname = args.hostname.unwrap_or_else(|| {
        hostname_fallback()
    });

    info!(agent_id = %args.agent_id, bus_addr = %args.bus_addr, "starting agent");

    let bus = Arc::new(BusRpcClient::new(args.bus_addr));
    let registry = Arc::new(ModuleRegistry::with_builtins());

    let mut config = AgentRuntimeConfig::new(args.agent_id, hostname);
    config.handler_timeout = std::time::Duration::from_millis(args.handler_timeout_ms);
    config.heartbeat_interval = std::time::Duration::from_millis(args.heartbeat_interval_ms);

    let runtime = AgentRuntime::new(config, bus, registry);
    let shutdown = CancellationToken::new();

    runtime.run(shutdown.clone()).await;

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    shutdown.cancel();

    Ok(())
}

fn hostname_fallback() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown-host".to_string())
}
