use anyhow::{Context, Result};
use clap::Parser;
use common::{Settings, DEFAULT_CONSTANTS_FILE};
use std::{path::PathBuf, sync::Arc};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Worker de pronósticos: toma jobs de la cola y los corre de punta a punta.
#[derive(Parser, Debug)]
#[command(name = "worker")]
struct Args {
    /// Archivo de constantes `clave,valor`
    #[arg(long, env = "HMS_CONSTANTS_FILE", default_value = DEFAULT_CONSTANTS_FILE)]
    constants: PathBuf,

    /// Corre una sola iteración y sale (útil para probar la configuración)
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("worker=debug,reqwest=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();

    // Nombre de host (solo para info)
    let hostname_str = hostname::get()
        .unwrap_or_default()
        .to_string_lossy()
        .to_string();

    let settings = Settings::load(&args.constants)
        .with_context(|| format!("constant file importing error ({})", args.constants.display()))?;
    info!(
        "worker en {} con constantes de {} (cola: {})",
        hostname_str,
        args.constants.display(),
        settings.request_api
    );
    if settings.engine_timeout.is_none() {
        warn!("ENGINE_TIMEOUT_SECS sin definir: el motor puede bloquear el worker");
    }

    let worker = Arc::new(worker::build_worker(settings));
    if args.once {
        let it = worker.run_guarded().await;
        info!("iteración única: {:?}", it.outcome);
        return Ok(());
    }

    worker.run_forever().await;
    Ok(())
}
