use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use common::{merge, JobRequest, QueuedJob};
use reqwest::Client;
use std::{env, path::PathBuf};

/// Igual que en el worker:
/// - En Docker: QUEUE_URL=http://queue:8080
/// - Local: default http://localhost:8080
fn queue_base_url() -> String {
    env::var("QUEUE_URL").unwrap_or_else(|_| "http://localhost:8080".to_string())
}

#[derive(Parser)]
#[command(name = "client")]
#[command(about = "CLI simple para hablar con la cola de pronósticos")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encola un pronóstico nuevo
    Submit {
        /// Ruta remota del bundle, ej: /data/20230303_20230318_20230427_1679144521408.zip
        #[arg(value_name = "INPUT_PATH")]
        input_path: String,

        /// Destino remoto de la salida de cuenca completa
        #[arg(long)]
        fc_output: String,

        /// Destino remoto de la salida de sub-cuencas
        #[arg(long)]
        sc_output: String,

        #[arg(long, default_value = "IMD_FORECAST")]
        source: String,
    },
    /// Consulta el estado de un job
    Status {
        #[arg(value_name = "JOB_UUID")]
        uuid: String,
    },
    /// Lista todos los jobs de la cola
    Jobs,
    /// Merge local de sub-cuencas sobre archivos en disco
    Merge {
        /// CSV de series por sub-cuenca (13 columnas)
        #[arg(long)]
        input: PathBuf,

        /// Mapa de composición `estación,sub-cuenca,operación`
        #[arg(long)]
        map: PathBuf,

        #[arg(long)]
        output: PathBuf,
    },
}

fn print_job(job: &QueuedJob) {
    println!("Job {}", job.uuid);
    println!("  estado      : {:?}", job.status);
    println!("  source      : {}", job.request.source);
    println!("  input_path  : {}", job.request.input_path);
    println!("  fc_output   : {}", job.request.fc_output_path);
    println!("  sc_output   : {}", job.request.sc_output_path);
    println!("  submitted_at: {}", job.submitted_at);
    if let Some(ref at) = job.dispatched_at {
        println!("  despachado  : {} (despachos={})", at, job.dispatches);
    }
    if let Some(ref done) = job.finished_at {
        println!("  finalizado  : {}", done);
    }
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let client = Client::new();
    let base_url = queue_base_url();

    match cli.command {
        Commands::Submit {
            input_path,
            fc_output,
            sc_output,
            source,
        } => {
            let url = format!("{}/api/v1/jobs", base_url);
            let req = JobRequest {
                input_path,
                fc_output_path: fc_output,
                sc_output_path: sc_output,
                source,
            };

            let resp = client.post(&url).json(&req).send().await?;
            if !resp.status().is_success() {
                bail!("la cola rechazó el pedido (status {})", resp.status());
            }
            let job: QueuedJob = resp.json().await?;

            println!("Job encolado:");
            print_job(&job);
        }

        Commands::Status { uuid } => {
            let url = format!("{}/api/v1/jobs/{uuid}", base_url);
            let resp = client.get(&url).send().await?;

            if resp.status().is_success() {
                let job: QueuedJob = resp.json().await?;
                print_job(&job);
            } else {
                println!("No se encontró el job con uuid {uuid}");
            }
        }

        Commands::Jobs => {
            let url = format!("{}/api/v1/jobs", base_url);
            let resp = client.get(&url).send().await?;
            if resp.status().is_success() {
                let jobs: Vec<QueuedJob> = resp.json().await?;
                if jobs.is_empty() {
                    println!("No hay jobs en la cola.");
                }
                for job in &jobs {
                    print_job(job);
                    println!();
                }
            } else {
                println!("Error consultando /api/v1/jobs (status {})", resp.status());
            }
        }

        Commands::Merge { input, map, output } => {
            println!("Ejecutando merge local de sub-cuencas:");
            println!("  input : {}", input.display());
            println!("  map   : {}", map.display());
            println!("  out   : {}", output.display());

            let rows = merge::merge_file(&input, &map, &output)?;
            println!("Merge completado: {} filas en {}", rows, output.display());
        }
    }

    Ok(())
}
