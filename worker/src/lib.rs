pub mod error;
pub mod notify;
pub mod pipeline;
pub mod process;
pub mod recovery;
pub mod source;
pub mod stager;
pub mod upload;
pub mod worker;

#[cfg(test)]
mod testing;

use common::Settings;
use reqwest::Client;
use std::sync::Arc;

pub use error::{recovery_plan, RecoveryPlan, StagingFailure, WorkerError};
pub use notify::{ErrorReporter, LogReporter, Notice, WebhookReporter};
pub use pipeline::{Pipeline, RunContext, Stage, StageOutcome, StageResult};
pub use process::{CommandSpec, ProcessRunner, SystemRunner};
pub use source::{AckResult, HttpJobSource, JobSource, PollOutcome};
pub use worker::{Iteration, IterationOutcome, WorkerLoop, WorkerState};

/// Arma el loop con los colaboradores reales a partir de las constantes.
pub fn build_worker(settings: Settings) -> WorkerLoop {
    let client = Client::new();
    let source = HttpJobSource::new(client.clone(), &settings.request_api, &settings.response_api);
    let reporter: Arc<dyn ErrorReporter> = match &settings.notify_webhook {
        Some(url) => Arc::new(WebhookReporter::new(client, url)),
        None => Arc::new(LogReporter),
    };

    WorkerLoop::new(settings, Arc::new(source), Arc::new(SystemRunner), reporter)
}
