use anyhow::Result;
use common::{AckStatus, Job, Settings};
use std::path::Path;
use tracing::{info, warn};

use crate::process::{CommandSpec, ProcessRunner};

/// Código de la transferencia que se considera transitorio.
pub const RETRYABLE_EXIT: i32 = 1;

const FC_OUTPUT: &str = "fc_output";
const SC_OUTPUT: &str = "sc_output";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    Uploaded { attempts: u32 },
    Failed { code: i32, attempts: u32 },
}

impl UploadOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(self, Self::Uploaded { .. })
    }
}

/// Sube un archivo con `<SERVER_SCP> <local> <SERVER_IP>:<remote>` y devuelve
/// el código de salida.
pub async fn upload(runner: &dyn ProcessRunner, settings: &Settings, local: &Path, remote: &str) -> Result<i32> {
    let cmd = CommandSpec::from_template(&settings.server_scp)?
        .path_arg(local)
        .arg(settings.remote(remote));
    runner.run(&cmd).await
}

/// Código 1 se reintenta en el acto hasta `retries` veces; cualquier otro
/// distinto de 0 es un fallo sin reintento.
pub async fn upload_with_retry(
    runner: &dyn ProcessRunner,
    settings: &Settings,
    local: &Path,
    remote: &str,
    retries: u32,
) -> UploadOutcome {
    let mut attempts = 0;
    loop {
        attempts += 1;
        let code = match upload(runner, settings, local, remote).await {
            Ok(code) => code,
            Err(e) => {
                warn!("no se pudo lanzar la subida de {}: {:#}", local.display(), e);
                return UploadOutcome::Failed { code: -1, attempts };
            }
        };

        if code == 0 {
            info!("{} subido a {} (intento {})", local.display(), remote, attempts);
            return UploadOutcome::Uploaded { attempts };
        }
        if code == RETRYABLE_EXIT && attempts <= retries {
            warn!("subida de {} devolvió {}, reintentando ({}/{})", local.display(), code, attempts, retries);
            continue;
        }

        warn!("subida de {} falló con código {} tras {} intentos", local.display(), code, attempts);
        return UploadOutcome::Failed { code, attempts };
    }
}

/// Resultado de las dos subidas de un job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadReport {
    pub full: UploadOutcome,
    pub sub: UploadOutcome,
}

impl UploadReport {
    pub fn status(&self) -> AckStatus {
        if self.full.succeeded() && self.sub.succeeded() {
            AckStatus::Success
        } else {
            AckStatus::Failure
        }
    }
}

/// Sube las salidas de cuenca completa y de sub-cuencas, cada una con sus
/// propios reintentos.
pub async fn upload_results(runner: &dyn ProcessRunner, settings: &Settings, job: &Job, key: &str) -> UploadReport {
    let retries = settings.timing.upload_retries;
    let fc_local = settings.final_out_path.join(FC_OUTPUT).join(key);
    let sc_local = settings.final_out_path.join(SC_OUTPUT).join(key);

    let full = upload_with_retry(runner, settings, &fc_local, &job.fc_output_path, retries).await;
    let sub = upload_with_retry(runner, settings, &sc_local, &job.sc_output_path, retries).await;

    UploadReport { full, sub }
}
