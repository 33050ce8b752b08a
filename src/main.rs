use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use bookdesk::config::{Config, Seed};
use bookdesk::engine::{Engine, InMemoryStore, SystemClock, MIN_DURATION_MINUTES};
use bookdesk::wire;

fn load_store(seed: &Seed) -> Result<InMemoryStore, Box<dyn std::error::Error>> {
    Ok(match seed {
        Seed::Empty => InMemoryStore::new(),
        Seed::Demo => InMemoryStore::demo(),
        Seed::File(path) => InMemoryStore::from_json(&std::fs::read_to_string(path)?)?,
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;
    bookdesk::observability::init(config.metrics_port)?;

    if i64::from(config.rules.min_duration_minutes) != MIN_DURATION_MINUTES {
        warn!(
            "BOOKDESK_MIN_DURATION_MINUTES={} is informational; bookings shorter than {MIN_DURATION_MINUTES} minutes are always rejected",
            config.rules.min_duration_minutes
        );
    }

    let store = load_store(&config.seed)?;
    let seeded = store.len();
    let engine = Arc::new(Engine::new(
        Arc::new(store),
        config.rules,
        config.resources.clone(),
        Arc::new(SystemClock),
    ));
    let max_connections = config.max_connections;
    let semaphore = Arc::new(Semaphore::new(max_connections));

    let addr = format!("{}:{}", config.bind, config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("bookdesk listening on {addr}");
    info!("  resources: {}", config.resources.join(", "));
    info!("  seeded bookings: {seeded}");
    info!("  buffer: {} min, max duration: {} h", config.rules.buffer_minutes, config.rules.max_duration_hours);
    info!("  max_connections: {max_connections}");
    info!("  metrics: {}", config.metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics")));

    // Graceful shutdown: stop accepting on SIGTERM/ctrl-c, drain in-flight connections
    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = ctrl_c => {}
                        _ = sigterm.recv() => {}
                    }
                }
                Err(e) => {
                    warn!("cannot listen for SIGTERM: {e}");
                    ctrl_c.await.ok();
                }
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
        }
    };
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = listener.accept() => {
                let (socket, peer) = match result {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::error!("accept error: {e}");
                        continue;
                    }
                };

                let permit = match semaphore.clone().try_acquire_owned() {
                    Ok(permit) => permit,
                    Err(_) => {
                        warn!("connection limit reached, rejecting {peer}");
                        metrics::counter!(bookdesk::observability::CONNECTIONS_REJECTED_TOTAL).increment(1);
                        drop(socket);
                        continue;
                    }
                };

                info!("connection from {peer}");
                metrics::counter!(bookdesk::observability::CONNECTIONS_TOTAL).increment(1);
                metrics::gauge!(bookdesk::observability::CONNECTIONS_ACTIVE).increment(1.0);
                let engine = engine.clone();

                tokio::spawn(async move {
                    let _permit = permit; // held until connection closes
                    if let Err(e) = wire::process_connection(socket, engine).await {
                        tracing::error!("connection error from {peer}: {e}");
                    }
                    metrics::gauge!(bookdesk::observability::CONNECTIONS_ACTIVE).decrement(1.0);
                });
            }
            _ = &mut shutdown => {
                info!("shutdown signal received, stopping accept loop");
                break;
            }
        }
    }

    // Wait for in-flight connections to finish (up to 10s)
    info!("draining connections...");
    let drain_deadline = tokio::time::sleep(std::time::Duration::from_secs(10));
    tokio::pin!(drain_deadline);

    loop {
        if semaphore.available_permits() == max_connections {
            info!("all connections drained");
            break;
        }
        tokio::select! {
            _ = &mut drain_deadline => {
                let remaining = max_connections - semaphore.available_permits();
                warn!("drain timeout, {remaining} connections still open");
                break;
            }
            _ = tokio::time::sleep(std::time::Duration::from_millis(100)) => {}
        }
    }

    info!("bookdesk stopped");
    Ok(())
}
