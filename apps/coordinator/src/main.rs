use std::sync::Arc;

use imn_bus::{Bus, BusRpcServer, InProcessBus};
use imn_coordinator::{config::CoordinatorConfig, heartbeat, recovery, routes, running_consumer, AppState};
use imn_kv::{KvEngine, SledKvEngine};
use imn_modules::ModuleRegistry;
use imn_store::{Dbos, DbosApi, DbosClient, DbosServer};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = <CoordinatorConfig as clap::Parser>::parse();

    // spec.md §6 `DBOS_ADDRESS`: when set, this coordinator is a pure RPC
    // client against a remote store process (C3) instead of owning its own
    // KV engine; when unset, it owns the store locally and also hosts it
    // over C3's RPC surface so other processes can reach it.
    let dbos: Arc<dyn DbosApi> = if let Some(addr) = config.dbos_address.clone() {
        info!(%addr, "connecting to remote dbos rpc store");
        Arc::new(DbosClient::connect(addr).await?)
    } else {
        let kv: Arc<dyn KvEngine> = if config.kv_addr.is_empty() {
            Arc::new(SledKvEngine::temporary()?)
        } else {
            Arc::new(SledKvEngine::open(&config.kv_addr)?)
        };
        let local: Arc<dyn DbosApi> = Arc::new(Dbos::new(kv).with_max_task_retries(config.max_task_retries));

        let dbos_bind_addr = config.dbos_bind_addr.clone();
        let dbos_for_rpc = local.clone();
        tokio::spawn(async move {
            let server = DbosServer::new(dbos_for_rpc);
            if let Err(e) = server.serve(dbos_bind_addr).await {
                tracing::error!(error = %e, "dbos rpc server stopped");
            }
        });

        local
    };

    let bus: Arc<dyn Bus> = Arc::new(InProcessBus::new());
    let bus_rpc_addr = config.bus_addr.clone();
    let bus_for_rpc = bus.clone();
    tokio::spawn(async move {
        let server = BusRpcServer::new(bus_for_rpc);
        if let Err(e) = server.serve(bus_rpc_addr).await {
            tracing::error!(error = %e, "bus rpc server stopped");
        }
    });

    let module_registry = Arc::new(ModuleRegistry::with_builtins());
    let schemas = module_registry.schema_registry();
    let port = config.port;
    let state = AppState::new(dbos, bus, schemas, module_registry, config);

    info!("running startup recovery scan");
    recovery::run_recovery(&state).await;

    heartbeat::spawn_heartbeat_consumer(state.clone()).await;
    running_consumer::spawn_running_consumer(state.clone()).await;

    let router = routes::build_router(state);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "coordinator listening");
    axum::serve(listener, router).await?;

    Ok(())
}
