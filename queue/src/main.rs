use anyhow::{Context, Result};
use queue::{build_router, run_lease_loop, AppState, LEASE_SWEEP_INTERVAL};
use std::{env, time::Duration};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// - En Docker: QUEUE_ADDR=0.0.0.0:8080 y el worker apunta a http://queue:8080
/// - Local: default 0.0.0.0:8080
fn queue_addr() -> String {
    env::var("QUEUE_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string())
}

fn lease_secs() -> Result<u64> {
    match env::var("QUEUE_LEASE_SECS") {
        Ok(v) => v.trim().parse().with_context(|| format!("QUEUE_LEASE_SECS inválido: {v:?}")),
        Err(_) => Ok(3600),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("queue=debug,tower_http=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let state = AppState::new(Duration::from_secs(lease_secs()?));

    // router HTTP
    let app = build_router(state.clone());

    // sweep de leases vencidos en segundo plano
    let lease_state = state.clone();
    tokio::spawn(async move {
        run_lease_loop(lease_state, LEASE_SWEEP_INTERVAL).await;
    });

    let addr = queue_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("no se pudo escuchar en {addr}"))?;
    info!(
        "cola escuchando en {} (lease {:?})",
        listener.local_addr()?,
        state.lease
    );

    axum::serve(listener, app).await?;
    Ok(())
}
