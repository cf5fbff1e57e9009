use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

use roomd::clock::SystemClock;
use roomd::config::Config;
use roomd::notify::NotifyHub;
use roomd::schedule::Scheduler;
use roomd::store::MemoryStore;
use roomd::{compactor, server};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;
    roomd::observability::init(config.metrics_port);

    // Ensure data directory exists
    std::fs::create_dir_all(&config.data_dir)?;

    let store = Arc::new(MemoryStore::open(&config.wal_path())?);
    let scheduler = Arc::new(Scheduler::new(store.clone(), Arc::new(NotifyHub::new())));

    tokio::spawn(compactor::run_compactor(
        store.clone(),
        config.compact_threshold,
        config.compact_interval,
    ));

    let addr = config.addr();
    let listener = TcpListener::bind(&addr).await?;
    info!("roomd listening on {addr}");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  rooms: {}", store.room_count());
    info!("  max_connections: {}", config.max_connections);
    info!("  metrics: {}", config.metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics")));

    // Graceful shutdown: stop accepting on SIGTERM/ctrl-c, drain in-flight connections
    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("failed to register SIGTERM handler");
            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
        }
    };

    server::serve(
        listener,
        scheduler,
        Arc::new(SystemClock),
        config.max_connections,
        shutdown,
    )
    .await;

    info!("roomd stopped");
    Ok(())
}
