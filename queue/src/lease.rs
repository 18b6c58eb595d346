use chrono::{DateTime, Utc};
use std::time::Duration;

use common::QueueStatus;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::state::AppState;

/// Loop de tolerancia a fallos de la cola:
/// - detecta jobs despachados sin acknowledge dentro del lease
/// - los vuelve a dejar QUEUED para el próximo poll
pub async fn run_lease_loop(state: AppState, interval: Duration) {
    loop {
        sleep(interval).await;

        match sweep_once(&state, Utc::now()) {
            Ok(0) => {}
            Ok(n) => info!(
                "{} jobs reencolados por lease vencido ({} en cola, {} despachados)",
                n,
                state.count(QueueStatus::Queued),
                state.count(QueueStatus::Dispatched)
            ),
            Err(e) => warn!("error en lease sweep: {:?}", e),
        }
    }
}

/// Una pasada de chequeo contra `now`. Devuelve cuántos jobs reencoló.
pub fn sweep_once(state: &AppState, now: DateTime<Utc>) -> Result<usize, String> {
    let lease = chrono::Duration::from_std(state.lease).map_err(|e| e.to_string())?;
    let mut jobs = state.lock_jobs()?;
    let mut requeued = 0;

    for job in jobs.iter_mut() {
        if job.status != QueueStatus::Dispatched {
            continue;
        }
        let Some(dispatched_at) = job.dispatched_at else {
            continue;
        };

        let elapsed = now - dispatched_at;
        if elapsed > lease {
            warn!(
                "job {} sin acknowledge hace {}s (despacho #{}), reencolando",
                job.uuid,
                elapsed.num_seconds(),
                job.dispatches
            );
            job.status = QueueStatus::Queued;
            job.dispatched_at = None;
            requeued += 1;
        }
    }

    Ok(requeued)
}
