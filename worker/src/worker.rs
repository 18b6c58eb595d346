use common::{AckStatus, Job, JobId, Settings};
use std::{sync::Arc, time::Duration};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::{
    error::{recovery_plan, RecoveryPlan, StagingFailure, WorkerError},
    notify::{ErrorReporter, Notice},
    pipeline::{Pipeline, RunContext, StageOutcome},
    process::ProcessRunner,
    recovery,
    source::{AckResult, JobSource, PollOutcome},
    stager,
    upload::upload_results,
};

/// Estados del loop. Sólo se usan para loguear las transiciones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Polling,
    Staging,
    Pipeline,
    Uploading,
    Acknowledging,
    Recovering,
}

fn enter(state: WorkerState, job: &str) {
    debug!("[{}] → {:?}", job, state);
}

/// Cómo terminó una iteración.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IterationOutcome {
    /// La cola respondió distinto de 200
    NoJob,
    Unreachable,
    Malformed,
    /// Job de datos observados: no hay pronóstico que correr
    Skipped(JobId),
    /// Subidas hechas y estado aceptado por la cola
    Completed { job: JobId, status: AckStatus },
    /// Cortado por un error; `label` es el asunto notificado
    Failed { job: JobId, label: &'static str },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Iteration {
    pub outcome: IterationOutcome,
    /// Espera antes del próximo poll
    pub delay: Duration,
}

/// Loop principal: un job a la vez, de principio a fin.
pub struct WorkerLoop {
    settings: Arc<Settings>,
    source: Arc<dyn JobSource>,
    runner: Arc<dyn ProcessRunner>,
    reporter: Arc<dyn ErrorReporter>,
    pipeline: Arc<Pipeline>,
}

impl WorkerLoop {
    pub fn new(
        settings: Settings,
        source: Arc<dyn JobSource>,
        runner: Arc<dyn ProcessRunner>,
        reporter: Arc<dyn ErrorReporter>,
    ) -> Self {
        Self {
            settings: Arc::new(settings),
            source,
            runner,
            reporter,
            pipeline: Arc::new(Pipeline::standard()),
        }
    }

    pub fn with_pipeline(mut self, pipeline: Pipeline) -> Self {
        self.pipeline = Arc::new(pipeline);
        self
    }

    /// Nunca termina: cada iteración corre en su propia tarea para que un
    /// panic no tire abajo el proceso.
    pub async fn run_forever(self: Arc<Self>) {
        info!("pipeline de {} etapas: {}", self.pipeline.names().len(), self.pipeline.names().join(" → "));
        loop {
            let it = self.run_guarded().await;
            debug!("iteración: {:?}, durmiendo {:?}", it.outcome, it.delay);
            enter(WorkerState::Idle, "-");
            sleep(it.delay).await;
        }
    }

    /// Una iteración aislada en una tarea; un panic se trata como un error no
    /// capturado y se recupera igual.
    pub async fn run_guarded(self: &Arc<Self>) -> Iteration {
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move { this.run_once().await });

        match handle.await {
            Ok(it) => it,
            Err(e) => {
                let err = WorkerError::staging(StagingFailure::Unexpected, format!("panic o join error: {e}"));
                let plan = self.dispatch(None, &err).await;
                if plan.restore {
                    self.recover("-").await;
                }
                Iteration {
                    outcome: IterationOutcome::Failed {
                        job: String::new(),
                        label: plan.label,
                    },
                    delay: self.settings.timing.idle,
                }
            }
        }
    }

    /// Poll → staging → pipeline → subida → acknowledge → recuperación.
    pub async fn run_once(&self) -> Iteration {
        let timing = &self.settings.timing;

        enter(WorkerState::Polling, "-");
        let job = match self.source.poll().await {
            PollOutcome::Job(job) => job,
            PollOutcome::NoJob(code) => {
                info!("sin jobs (status {}), durmiendo {:?}", code, timing.no_job);
                return Iteration {
                    outcome: IterationOutcome::NoJob,
                    delay: timing.no_job,
                };
            }
            PollOutcome::Unreachable(cause) => {
                let plan = self.dispatch(None, &WorkerError::Transport(cause)).await;
                if plan.restore {
                    self.recover("-").await;
                }
                return Iteration {
                    outcome: IterationOutcome::Unreachable,
                    delay: timing.transport_retry,
                };
            }
            PollOutcome::Malformed(cause) => {
                warn!("respuesta de la cola descartada: {}", cause);
                return Iteration {
                    outcome: IterationOutcome::Malformed,
                    delay: timing.idle,
                };
            }
        };

        if !job.category.needs_forecast() {
            info!("job {} de {} sin pronóstico, se ignora", job.id, job.source);
            return Iteration {
                outcome: IterationOutcome::Skipped(job.id),
                delay: timing.idle,
            };
        }

        let (outcome, restore) = match self.process(&job).await {
            Ok(status) => {
                info!("job {} terminado: {:?}", job.id, status);
                let done = IterationOutcome::Completed {
                    job: job.id.clone(),
                    status,
                };
                (done, true)
            }
            Err(err) => {
                let plan = self.dispatch(Some(&job), &err).await;
                let failed = IterationOutcome::Failed {
                    job: job.id.clone(),
                    label: plan.label,
                };
                (failed, plan.restore)
            }
        };

        if restore {
            self.recover(&job.id).await;
        }

        Iteration {
            outcome,
            delay: timing.idle,
        }
    }

    async fn process(&self, job: &Job) -> Result<AckStatus, WorkerError> {
        let settings = self.settings.as_ref();
        let runner = self.runner.as_ref();

        enter(WorkerState::Staging, &job.id);
        let staged = stager::stage(job, settings, runner).await?;

        enter(WorkerState::Pipeline, &job.id);
        let mut ctx = RunContext::new(settings, runner, &staged);
        let report = self.pipeline.run(&mut ctx).await;
        if let Some(failed) = report.failure() {
            let cause = match &failed.outcome {
                StageOutcome::Failed(cause) => cause.clone(),
                StageOutcome::Success => String::new(),
            };
            return Err(WorkerError::Stage {
                label: failed.label,
                cause,
            });
        }

        enter(WorkerState::Uploading, &job.id);
        let uploads = upload_results(runner, settings, job, &staged.key).await;
        let status = uploads.status();
        debug!("subidas de {}: {:?}", job.id, uploads);

        enter(WorkerState::Acknowledging, &job.id);
        self.acknowledge(&job.id, status).await?;
        Ok(status)
    }

    /// Reporta a la cola; ante un fallo reintenta `ack_retries` veces con
    /// `ack_backoff` entre intentos.
    async fn acknowledge(&self, job_id: &str, status: AckStatus) -> Result<(), WorkerError> {
        let timing = &self.settings.timing;
        let attempts = timing.ack_retries + 1;

        for attempt in 1..=attempts {
            match self.source.acknowledge(job_id, status).await {
                AckResult::Ok => return Ok(()),
                AckResult::RetryableFailure(cause) => {
                    warn!("acknowledge de {} ({}/{}) falló: {}", job_id, attempt, attempts, cause);
                    if attempt < attempts {
                        sleep(timing.ack_backoff).await;
                    }
                }
            }
        }

        Err(WorkerError::Acknowledge {
            job: job_id.to_string(),
            status,
            attempts,
        })
    }

    /// Notifica el error y manda el acknowledge que pida su plan. La
    /// restauración queda a cargo del llamador según `plan.restore`.
    async fn dispatch(&self, job: Option<&Job>, err: &WorkerError) -> RecoveryPlan {
        let plan = recovery_plan(err);
        let (id, source) = job.map_or(("-", ""), |j| (j.id.as_str(), j.source.as_str()));
        error!("[{}] {}", id, err);
        self.reporter.report(Notice::new(plan.label, source, &err.cause())).await;

        if let (Some(status), Some(job)) = (plan.acknowledge, job) {
            enter(WorkerState::Acknowledging, &job.id);
            if let Err(ack_err) = self.acknowledge(&job.id, status).await {
                error!("{}", ack_err);
                self.reporter
                    .report(Notice::new(ack_err.label(), &job.source, &ack_err.cause()))
                    .await;
            }
        }

        plan
    }

    async fn recover(&self, job_id: &str) {
        enter(WorkerState::Recovering, job_id);
        if let Err(e) = recovery::recover(&self.settings, self.runner.as_ref()).await {
            error!("recuperación tras {} falló: {:#}", job_id, e);
            self.reporter
                .report(Notice::new("error restoring backup", "", &format!("{e:#}")))
                .await;
        }
    }
}
