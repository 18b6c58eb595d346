use anyhow::{bail, Context, Result};
use common::{correlation_key, window::compact, Job, RunType, RunWindow, Settings};
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::{debug, info};

use crate::{
    error::{StagingFailure, WorkerError},
    process::{CommandSpec, ProcessRunner},
};

const OBSERVED_DATA: &str = "observed_data";
const CURVE_NUMBER: &str = "CURVE_NUMBER";

/// Lo que deja el staging para el resto del pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedInputs {
    /// Clave de correlación: nombre del bundle sin extensión
    pub key: String,
    pub run_type: RunType,
    pub window: RunWindow,
    /// `<INPUT_GRID_DIR>/<key>`: grillas diarias del bundle
    pub bundle_dir: PathBuf,
    /// Archivo de caudales observados ya movido al almacén de observaciones
    pub observed_file: PathBuf,
    pub curve_number: PathBuf,
}

/// Mueve un archivo o directorio; si `rename` cruza de filesystem, copia y borra.
pub(crate) fn move_path(from: &Path, to: &Path) -> Result<()> {
    // sin origen no se toca el destino
    if !from.exists() {
        bail!("{} no existe", from.display());
    }
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)?;
    }
    if to.is_dir() {
        fs::remove_dir_all(to)?;
    } else if to.exists() {
        fs::remove_file(to)?;
    }

    if fs::rename(from, to).is_ok() {
        return Ok(());
    }
    if from.is_dir() {
        copy_dir(from, to)?;
        fs::remove_dir_all(from)?;
    } else {
        fs::copy(from, to).with_context(|| format!("no se pudo copiar {}", from.display()))?;
        fs::remove_file(from)?;
    }
    Ok(())
}

fn copy_dir(from: &Path, to: &Path) -> Result<()> {
    fs::create_dir_all(to)?;
    for entry in fs::read_dir(from)? {
        let entry = entry?;
        let target = to.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

async fn expect_zero(
    runner: &dyn ProcessRunner,
    cmd: &CommandSpec,
    kind: StagingFailure,
) -> Result<(), WorkerError> {
    match runner.run(cmd).await {
        Ok(0) => Ok(()),
        Ok(code) => Err(WorkerError::staging(kind, format!("'{cmd}' terminó con código {code}"))),
        Err(e) => Err(WorkerError::staging(kind, format!("{e:#}"))),
    }
}

/// Descarga, descomprime y ordena el bundle del job.
pub async fn stage(
    job: &Job,
    settings: &Settings,
    runner: &dyn ProcessRunner,
) -> Result<StagedInputs, WorkerError> {
    let invalid = |cause: String| WorkerError::staging(StagingFailure::InvalidJob, cause);

    let run_type = RunType::from_source(&job.source)
        .ok_or_else(|| invalid(format!("source {:?} sin tipo de corrida conocido", job.source)))?;

    let file_name = job
        .input_path
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| invalid(format!("input_path {:?} sin nombre de archivo", job.input_path)))?
        .to_string();
    let key = correlation_key(&file_name);
    let window = RunWindow::from_key(&key).map_err(|e| invalid(format!("{key}: {e}")))?;
    info!("staging de {} ({:?}, ventana {:?})", key, run_type, window);

    // 1) descarga
    let grid_dir = &settings.input_grid_dir;
    fs::create_dir_all(grid_dir).map_err(|e| WorkerError::staging(StagingFailure::Download, e))?;
    let download = CommandSpec::from_template(&settings.server_scp)
        .map_err(|e| WorkerError::staging(StagingFailure::Download, e))?
        .arg(settings.remote(&job.input_path))
        .path_arg(grid_dir);
    expect_zero(runner, &download, StagingFailure::Download).await?;

    // 2) directorio viejo con el mismo nombre
    let bundle_dir = grid_dir.join(&key);
    if bundle_dir.exists() {
        debug!("borrando directorio previo {}", bundle_dir.display());
        fs::remove_dir_all(&bundle_dir).map_err(|e| {
            WorkerError::staging(StagingFailure::Layout, format!("error removing {}: {e}", bundle_dir.display()))
        })?;
    }

    // 3) descompresión
    let unpack = CommandSpec::from_template(&settings.unpack_command)
        .map_err(|e| WorkerError::staging(StagingFailure::Unpack, e))?
        .path_arg(&grid_dir.join(&file_name))
        .arg("-d")
        .path_arg(grid_dir);
    expect_zero(runner, &unpack, StagingFailure::Unpack).await?;
    if !bundle_dir.is_dir() {
        return Err(WorkerError::staging(
            StagingFailure::Unpack,
            format!("el bundle no generó {}", bundle_dir.display()),
        ));
    }

    // 4) caudales observados al almacén de observaciones
    let observed_file = settings.obs_flows_dir.join(format!("{OBSERVED_DATA}_{key}"));
    move_path(&bundle_dir.join(OBSERVED_DATA), &observed_file).map_err(|e| {
        WorkerError::staging(
            StagingFailure::Layout,
            format!("error copying observed flows file {OBSERVED_DATA}_{key}: {e:#}"),
        )
    })?;

    // 5) curve number de la fecha de referencia
    let reference = compact(window.reference);
    let cn_source = bundle_dir.join(format!("{CURVE_NUMBER}_{reference}"));
    if !cn_source.is_file() {
        return Err(WorkerError::staging(
            StagingFailure::MissingPrerequisite,
            format!("input file name {key}: falta {CURVE_NUMBER}_{reference}"),
        ));
    }
    let curve_number = settings.cn_dir.join(format!("{CURVE_NUMBER}_{reference}_{key}"));
    move_path(&cn_source, &curve_number)
        .map_err(|e| WorkerError::staging(StagingFailure::Layout, format!("{e:#}")))?;

    info!("staging de {} listo", key);
    Ok(StagedInputs {
        key,
        run_type,
        window,
        bundle_dir,
        observed_file,
        curve_number,
    })
}
