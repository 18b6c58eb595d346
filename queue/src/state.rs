// queue/src/state.rs

use common::{QueueStatus, QueuedJob};
use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

#[derive(Clone)]
pub struct AppState {
    // jobs en orden de llegada; el despacho toma el primero QUEUED
    pub jobs: Arc<Mutex<Vec<QueuedJob>>>,
    // tiempo máximo entre despacho y acknowledge antes de reencolar
    pub lease: Duration,
}

impl AppState {
    pub fn new(lease: Duration) -> Self {
        Self {
            jobs: Arc::new(Mutex::new(Vec::new())),
            lease,
        }
    }

    pub fn lock_jobs(&self) -> Result<MutexGuard<'_, Vec<QueuedJob>>, String> {
        self.jobs.lock().map_err(|_| "lock jobs".to_string())
    }

    /// Cuántos jobs hay en cada estado, para los logs.
    pub fn count(&self, status: QueueStatus) -> usize {
        self.lock_jobs()
            .map(|jobs| jobs.iter().filter(|j| j.status == status).count())
            .unwrap_or(0)
    }
}
