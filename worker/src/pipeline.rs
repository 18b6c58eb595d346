use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use common::{
    grid::{build_gridded_series, write_gridded_series},
    merge::merge_file,
    metadata::RunMetadata,
    observed::{containerize_observed, read_station_list, split_by_station},
    patch::{patch_forecast_window, patch_gauge_window, patch_grid_source, rewrite_in_place},
    Settings, SpecVariant,
};
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::{debug, info, warn};

use crate::{
    process::{CommandSpec, ProcessRunner},
    stager::StagedInputs,
};

/// Estado de un job en curso que recorre las etapas.
pub struct RunContext<'a> {
    pub settings: &'a Settings,
    pub runner: &'a dyn ProcessRunner,
    pub staged: &'a StagedInputs,
    /// Hubo lecturas negativas en los caudales observados. Lo fija la etapa
    /// de parseo y decide la variante de especificación.
    pub missing_data: bool,
}

impl<'a> RunContext<'a> {
    pub fn new(settings: &'a Settings, runner: &'a dyn ProcessRunner, staged: &'a StagedInputs) -> Self {
        Self {
            settings,
            runner,
            staged,
            missing_data: false,
        }
    }

    pub fn spec_variant(&self) -> SpecVariant {
        SpecVariant::from_missing_data(self.missing_data)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    Success,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageResult {
    pub stage: &'static str,
    /// Etiqueta de la notificación si la etapa falla
    pub label: &'static str,
    pub outcome: StageOutcome,
}

impl StageResult {
    pub fn failed(&self) -> bool {
        matches!(self.outcome, StageOutcome::Failed(_))
    }
}

/// Una etapa del pipeline; falla de forma independiente.
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    fn label(&self) -> &'static str;

    async fn run(&self, ctx: &mut RunContext<'_>) -> Result<()>;
}

/// Resultado de recorrer el pipeline: una entrada por etapa ejecutada.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineReport {
    pub results: Vec<StageResult>,
}

impl PipelineReport {
    /// Primera (y única) etapa fallida.
    pub fn failure(&self) -> Option<&StageResult> {
        self.results.iter().find(|r| r.failed())
    }
}

pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
}

impl Pipeline {
    pub fn new(stages: Vec<Box<dyn Stage>>) -> Self {
        Self { stages }
    }

    /// Las catorce etapas de un pronóstico, en orden.
    pub fn standard() -> Self {
        Self::new(vec![
            Box::new(GridPreparation),
            Box::new(MetadataWrite),
            Box::new(EngineScript::RAINFALL_BUILD),
            Box::new(ObservedParse),
            Box::new(ObservedContainers),
            Box::new(RainfallInstall),
            Box::new(ForecastPatch),
            Box::new(GridPatch),
            Box::new(GaugePatch),
            Box::new(OutputReset),
            Box::new(EngineScript::ENGINE_RUN),
            Box::new(EngineScript::FULL_EXTRACT),
            Box::new(EngineScript::SUB_EXTRACT),
            Box::new(SubMerge),
        ])
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Corre las etapas en orden y se detiene en la primera que falla.
    pub async fn run(&self, ctx: &mut RunContext<'_>) -> PipelineReport {
        let mut report = PipelineReport::default();

        for (i, stage) in self.stages.iter().enumerate() {
            debug!("[{}/{}] {}", i + 1, self.stages.len(), stage.name());
            let outcome = match stage.run(ctx).await {
                Ok(()) => StageOutcome::Success,
                Err(e) => {
                    warn!("etapa {} falló: {:#}", stage.name(), e);
                    StageOutcome::Failed(format!("{e:#}"))
                }
            };

            let stop = outcome != StageOutcome::Success;
            report.results.push(StageResult {
                stage: stage.name(),
                label: stage.label(),
                outcome,
            });
            if stop {
                break;
            }
        }

        report
    }
}

/* ---- Utilidades ---- */

/// Corre trabajo de archivos en un hilo de bloqueo.
async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(res) => res,
        Err(e) => bail!("panic o join error: {e}"),
    }
}

/// Copia `from` a `to`; si `to` es un directorio, conserva el nombre.
fn copy_into(from: &Path, to: &Path) -> Result<PathBuf> {
    let target = if to.is_dir() {
        match from.file_name() {
            Some(name) => to.join(name),
            None => bail!("{} no tiene nombre de archivo", from.display()),
        }
    } else {
        to.to_path_buf()
    };
    fs::copy(from, &target)
        .with_context(|| format!("no se pudo copiar {} a {}", from.display(), target.display()))?;
    Ok(target)
}

/// Reemplaza `live` por la copia de `backup`.
fn reset_from_backup(backup: &Path, live: &Path) -> Result<()> {
    if live.exists() {
        fs::remove_file(live).with_context(|| format!("no se pudo borrar {}", live.display()))?;
    }
    if let Some(parent) = live.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(backup, live)
        .with_context(|| format!("no se pudo restaurar {} desde {}", live.display(), backup.display()))?;
    Ok(())
}

/* ---- Etapas ---- */

pub struct GridPreparation;

#[async_trait]
impl Stage for GridPreparation {
    fn name(&self) -> &'static str {
        "grid-preparation"
    }

    fn label(&self) -> &'static str {
        "error when creating NC file"
    }

    async fn run(&self, ctx: &mut RunContext<'_>) -> Result<()> {
        let input = ctx.staged.bundle_dir.clone();
        let window = ctx.staged.window;
        let output = ctx.settings.nc_file_path.join(format!("{}.nc", ctx.staged.key));

        let days = blocking(move || {
            let series = build_gridded_series(&input, &window)?;
            write_gridded_series(&series, &output)?;
            Ok(series.time.len())
        })
        .await?;

        info!("grilla de {} días lista", days);
        Ok(())
    }
}

pub struct MetadataWrite;

#[async_trait]
impl Stage for MetadataWrite {
    fn name(&self) -> &'static str {
        "metadata-write"
    }

    fn label(&self) -> &'static str {
        "error creating metadata file"
    }

    async fn run(&self, ctx: &mut RunContext<'_>) -> Result<()> {
        let metadata = RunMetadata::new(&ctx.staged.key, ctx.staged.run_type);
        let path = ctx.settings.metadata_input_file.clone();
        blocking(move || metadata.write(&path)).await
    }
}

/// Script que se le pasa al motor externo.
#[derive(Debug, Clone, Copy)]
enum Script {
    DssCreate,
    Forecast,
    FullExtract,
    SubExtract,
}

/// Invocación del motor con un script. El código de salida se loguea pero no
/// corta el pipeline; sólo falla si el proceso no arranca o supera el límite.
pub struct EngineScript {
    name: &'static str,
    label: &'static str,
    script: Script,
}

impl EngineScript {
    pub const RAINFALL_BUILD: Self = Self {
        name: "rainfall-build",
        label: "error creating input rainfall dss file",
        script: Script::DssCreate,
    };
    pub const ENGINE_RUN: Self = Self {
        name: "engine-run",
        label: "HMS run execution error",
        script: Script::Forecast,
    };
    pub const FULL_EXTRACT: Self = Self {
        name: "full-catchment-extract",
        label: "error extracting full catchment output",
        script: Script::FullExtract,
    };
    pub const SUB_EXTRACT: Self = Self {
        name: "sub-catchment-extract",
        label: "error extracting self catchment output",
        script: Script::SubExtract,
    };

    fn script_path<'s>(&self, settings: &'s Settings) -> &'s Path {
        match self.script {
            Script::DssCreate => &settings.dss_file_create_script_path,
            Script::Forecast => &settings.forecast_script_file_path,
            Script::FullExtract => &settings.dss_script_file_path,
            Script::SubExtract => &settings.sc_dss_script_file_path,
        }
    }
}

#[async_trait]
impl Stage for EngineScript {
    fn name(&self) -> &'static str {
        self.name
    }

    fn label(&self) -> &'static str {
        self.label
    }

    async fn run(&self, ctx: &mut RunContext<'_>) -> Result<()> {
        let script = self.script_path(ctx.settings);
        let cmd = CommandSpec::from_template(&ctx.settings.engine_command)?
            .arg("-script")
            .path_arg(script)
            .current_dir(&ctx.settings.hms_dir_path)
            .timeout(ctx.settings.engine_timeout);

        info!("motor: {}", cmd);
        let code = ctx.runner.run(&cmd).await?;
        if code != 0 {
            warn!("el motor devolvió {} con {}; se continúa", code, script.display());
        }
        Ok(())
    }
}

pub struct ObservedParse;

#[async_trait]
impl Stage for ObservedParse {
    fn name(&self) -> &'static str {
        "observed-parse"
    }

    fn label(&self) -> &'static str {
        "error parsing observed flows"
    }

    async fn run(&self, ctx: &mut RunContext<'_>) -> Result<()> {
        let observed = ctx.staged.observed_file.clone();
        let stations_file = ctx.settings.stations_data.clone();
        let model_inp = ctx.settings.model_inp_path.clone();

        let summary = blocking(move || {
            let stations = read_station_list(&stations_file)?;
            split_by_station(&observed, &stations, &model_inp)
        })
        .await?;

        info!(
            "caudales observados: {} estaciones, {} filas, missing_data={}",
            summary.stations, summary.rows_written, summary.missing_data
        );
        ctx.missing_data = summary.missing_data;
        Ok(())
    }
}

pub struct ObservedContainers;

#[async_trait]
impl Stage for ObservedContainers {
    fn name(&self) -> &'static str {
        "observed-containers"
    }

    fn label(&self) -> &'static str {
        "observed flows creation error"
    }

    async fn run(&self, ctx: &mut RunContext<'_>) -> Result<()> {
        let catalog = ctx.settings.obs_dss_file_path.clone();
        let model_inp = ctx.settings.model_inp_path.clone();
        let out_dir = ctx.settings.obs_dss_dir.clone();
        let start = ctx.staged.window.start;

        let written = blocking(move || containerize_observed(&catalog, &model_inp, start, &out_dir)).await?;
        debug!("{} contenedores observados escritos", written.len());
        Ok(())
    }
}

pub struct RainfallInstall;

#[async_trait]
impl Stage for RainfallInstall {
    fn name(&self) -> &'static str {
        "rainfall-install"
    }

    fn label(&self) -> &'static str {
        "dss file copy error"
    }

    async fn run(&self, ctx: &mut RunContext<'_>) -> Result<()> {
        let artifact = ctx
            .settings
            .dss_file_path
            .join(&ctx.staged.key)
            .join(format!("{}.dss", ctx.staged.run_type.rainfall_name()));
        let dest = ctx.settings.model_input_dss_path.clone();
        let target = blocking(move || copy_into(&artifact, &dest)).await?;
        debug!("lluvia instalada en {}", target.display());
        Ok(())
    }
}

pub struct ForecastPatch;

#[async_trait]
impl Stage for ForecastPatch {
    fn name(&self) -> &'static str {
        "forecast-patch"
    }

    fn label(&self) -> &'static str {
        "forecast file parsing exception"
    }

    async fn run(&self, ctx: &mut RunContext<'_>) -> Result<()> {
        let variant = ctx.spec_variant();
        let file = ctx
            .settings
            .forecast_file_path
            .join(variant.spec_file(ctx.staged.run_type));
        info!("especificación {:?}: {}", variant, file.display());

        let window = ctx.staged.window;
        blocking(move || rewrite_in_place(&file, |text| patch_forecast_window(text, &window))).await
    }
}

pub struct GridPatch;

#[async_trait]
impl Stage for GridPatch {
    fn name(&self) -> &'static str {
        "grid-patch"
    }

    fn label(&self) -> &'static str {
        "grid file parsing exception"
    }

    async fn run(&self, ctx: &mut RunContext<'_>) -> Result<()> {
        let start = ctx.staged.window.start;
        let file = ctx.settings.grid_file_path.clone();
        blocking(move || rewrite_in_place(&file, |text| patch_grid_source(text, start))).await
    }
}

pub struct GaugePatch;

#[async_trait]
impl Stage for GaugePatch {
    fn name(&self) -> &'static str {
        "gauge-patch"
    }

    fn label(&self) -> &'static str {
        "gage file parsing exception"
    }

    async fn run(&self, ctx: &mut RunContext<'_>) -> Result<()> {
        let s = ctx.settings;
        let gage = s.gage_file_path.clone();
        let backup = s.backup_folder.join(&s.gage_file_src);
        let clean = s.model_path.join(&s.gage_file_src);
        let window = ctx.staged.window;

        blocking(move || {
            if gage.exists() {
                fs::remove_file(&gage)?;
            }
            // se parte siempre de la copia limpia del backup
            fs::copy(&backup, &clean)
                .with_context(|| format!("no se pudo restaurar {} desde el backup", backup.display()))?;

            rewrite_in_place(&gage, |text| patch_gauge_window(text, window.start, window.reference))
        })
        .await
    }
}

pub struct OutputReset;

#[async_trait]
impl Stage for OutputReset {
    fn name(&self) -> &'static str {
        "output-reset"
    }

    fn label(&self) -> &'static str {
        "error copying output dss file"
    }

    async fn run(&self, ctx: &mut RunContext<'_>) -> Result<()> {
        let container = ctx.staged.run_type.output_container_file();
        debug!("reseteando {}", container);
        let backup = ctx.settings.backup_folder.join(&container);
        let live = ctx.settings.model_path.join(&container);
        blocking(move || reset_from_backup(&backup, &live)).await
    }
}

pub struct SubMerge;

#[async_trait]
impl Stage for SubMerge {
    fn name(&self) -> &'static str {
        "sub-catchment-merge"
    }

    fn label(&self) -> &'static str {
        "error merging self catchment output"
    }

    async fn run(&self, ctx: &mut RunContext<'_>) -> Result<()> {
        let input = ctx.settings.sc_input_csv_path.join(&ctx.staged.key);
        let map = ctx.settings.sc_metadata_path.clone();
        let output = ctx.settings.sc_output_file_path.join(&ctx.staged.key);

        let rows = blocking(move || merge_file(&input, &map, &output)).await?;
        info!("merge de sub-cuencas: {} filas", rows);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{settings_in, temp_dir, RecordingRunner};
    use common::{window::compact, RunType, RunWindow};

    const KEY: &str = "20230301_20230303_20230305_1";

    const FORECAST: &str = "Forecast: Forecast_IMD\n     Start Date: 1 January 2021\n     Start Time: 08:30\n     Forecast Date: 2 January 2021\n     End Date: 3 January 2021\nEnd:\n";
    const GRID: &str = "Grid: Precip\n     DSS Pathname: /UTM44N/TN_AP/PRECIPITATION/01JAN2020:1200/02JAN2020:1200/GODAVARI/\nEnd:\n";
    const GAGE: &str = "Gage Manager: godavari\nEnd:\n\nGage: Polavaram\n     Gage Type: Flow\n     Start Time: x\n     End Time: x\n     Time Zone ID: Asia/Kolkata\nEnd:\n";

    /// Arma un árbol de trabajo completo para KEY; `negative` mete una
    /// lectura negativa en los observados.
    fn fixture(root: &Path, negative: bool) -> (Settings, StagedInputs) {
        let s = settings_in(root);
        let window = RunWindow::from_key(KEY).unwrap();

        let bundle = s.input_grid_dir.join(KEY);
        fs::create_dir_all(&bundle).unwrap();
        for day in window.days() {
            fs::write(bundle.join(compact(day)), "18.0,80.0,1.0\n18.0,80.5,2.0\n").unwrap();
        }

        fs::create_dir_all(&s.obs_flows_dir).unwrap();
        let observed = s.obs_flows_dir.join(format!("observed_data_{KEY}"));
        let last = if negative { "-5" } else { "140" };
        fs::write(
            &observed,
            format!("Polavaram,Inflow,2023,3,1,8,30,120\nPolavaram,Inflow,2023,3,2,8,30,{last}\n"),
        )
        .unwrap();
        fs::write(&s.stations_data, "id,stn\n1,Polavaram\n").unwrap();
        fs::write(
            &s.obs_dss_file_path,
            "folder,gauge,type,units,file\nPolavaram,PLV,flow,cfs,realtime_inflows_input\n",
        )
        .unwrap();

        let dss = s.dss_file_path.join(KEY);
        fs::create_dir_all(&dss).unwrap();
        fs::write(dss.join("IMD.dss"), "rain").unwrap();

        fs::create_dir_all(&s.model_input_dss_path).unwrap();
        fs::write(s.model_path.join("Forecast_IMD.forecast"), FORECAST).unwrap();
        fs::write(s.model_path.join("IMD"), FORECAST).unwrap();
        fs::write(&s.grid_file_path, GRID).unwrap();
        fs::write(&s.gage_file_path, "roto").unwrap();

        fs::create_dir_all(&s.backup_folder).unwrap();
        fs::write(s.backup_folder.join("godavari.gage"), GAGE).unwrap();
        fs::write(s.backup_folder.join("Forecast_IMD.dss"), "vacío").unwrap();
        fs::write(s.model_path.join("Forecast_IMD.dss"), "corrida anterior").unwrap();

        fs::write(&s.sc_metadata_path, "Polavaram,SC1,add\nPolavaram,SC2,remove\n").unwrap();

        let staged = StagedInputs {
            key: KEY.to_string(),
            run_type: RunType::ImdForecast,
            window,
            bundle_dir: bundle,
            observed_file: observed,
            curve_number: s.cn_dir.join(format!("CURVE_NUMBER_20230303_{KEY}")),
        };
        (s, staged)
    }

    /// Motor falso: la extracción de sub-cuencas deja su CSV.
    fn engine(sc_input: PathBuf, code: i32) -> RecordingRunner {
        RecordingRunner::new(move |cmd| {
            if cmd.args.iter().any(|a| a.ends_with("sc_extract.script")) {
                fs::create_dir_all(&sc_input)?;
                fs::write(
                    sc_input.join(KEY),
                    "SC1,inflow,2023,03,01,8,30,2023,03,01,9,29,10.0\n\
                     SC2,inflow,2023,03,01,8,30,2023,03,01,9,29,4.0\n",
                )?;
            }
            Ok(code)
        })
    }

    #[test]
    fn pipeline_estandar_tiene_catorce_etapas_en_orden() {
        let names = Pipeline::standard().names();
        assert_eq!(names.len(), 14);
        assert_eq!(names[0], "grid-preparation");
        assert_eq!(names[6], "forecast-patch");
        assert_eq!(names[10], "engine-run");
        assert_eq!(names[13], "sub-catchment-merge");
    }

    #[tokio::test]
    async fn pipeline_completo_deja_todos_los_artefactos() {
        let root = temp_dir("pipeline_ok");
        let (s, staged) = fixture(&root, false);
        let runner = engine(s.sc_input_csv_path.clone(), 0);

        let mut ctx = RunContext::new(&s, &runner, &staged);
        let report = Pipeline::standard().run(&mut ctx).await;

        assert_eq!(report.failure(), None, "{:?}", report);
        assert_eq!(report.results.len(), 14);
        assert!(!ctx.missing_data);

        assert!(s.nc_file_path.join(format!("{KEY}.nc")).is_file());
        assert_eq!(
            fs::read_to_string(&s.metadata_input_file).unwrap(),
            format!("{KEY},Forecast_IMD,IMD\n")
        );
        assert!(s.obs_dss_dir.join("PLV.dss").is_file());
        assert!(s.model_input_dss_path.join("IMD.dss").is_file());

        let forecast = fs::read_to_string(s.model_path.join("Forecast_IMD.forecast")).unwrap();
        assert!(forecast.contains("Forecast Date: 3 March 2023"));
        // la variante de corrida no se toca
        assert_eq!(fs::read_to_string(s.model_path.join("IMD")).unwrap(), FORECAST);

        let grid = fs::read_to_string(&s.grid_file_path).unwrap();
        assert!(grid.contains("/28FEB2023:1200/01MAR2023:1200/"));
        let gage = fs::read_to_string(&s.gage_file_path).unwrap();
        assert!(gage.contains("       End Time: 3 March 2023, 08:30"));
        assert_eq!(fs::read_to_string(s.model_path.join("Forecast_IMD.dss")).unwrap(), "vacío");

        assert_eq!(
            fs::read_to_string(s.sc_output_file_path.join(KEY)).unwrap(),
            "Polavaram,inflow,2023,03,01,8,30,2023,03,01,9,29,6\n"
        );

        let engine_calls = runner.calls_to("./hec-hms.sh");
        assert_eq!(engine_calls.len(), 4);
        for c in &engine_calls {
            assert_eq!(c.args[0], "-script");
            assert_eq!(c.cwd.as_deref(), Some(s.hms_dir_path.as_path()));
        }
        assert!(engine_calls[0].args[1].ends_with("create_dss.script"));
        assert!(engine_calls[1].args[1].ends_with("forecast.script"));
    }

    #[tokio::test]
    async fn lectura_negativa_elige_la_variante_de_corrida() {
        let root = temp_dir("pipeline_missing");
        let (s, staged) = fixture(&root, true);
        let runner = engine(s.sc_input_csv_path.clone(), 0);

        let mut ctx = RunContext::new(&s, &runner, &staged);
        let report = Pipeline::standard().run(&mut ctx).await;

        assert_eq!(report.failure(), None, "{:?}", report);
        assert!(ctx.missing_data);
        assert!(fs::read_to_string(s.model_path.join("IMD")).unwrap().contains("Start Date: 1 March 2023"));
        assert_eq!(fs::read_to_string(s.model_path.join("Forecast_IMD.forecast")).unwrap(), FORECAST);
    }

    #[tokio::test]
    async fn falla_del_parche_de_pronostico_corta_antes_del_motor() {
        let root = temp_dir("pipeline_forecast_fail");
        let (s, staged) = fixture(&root, false);
        fs::remove_file(s.model_path.join("Forecast_IMD.forecast")).unwrap();
        let runner = engine(s.sc_input_csv_path.clone(), 0);

        let mut ctx = RunContext::new(&s, &runner, &staged);
        let report = Pipeline::standard().run(&mut ctx).await;

        assert_eq!(report.results.len(), 7);
        let failure = report.failure().unwrap();
        assert_eq!(failure.label, "forecast file parsing exception");
        // sólo corrió el motor de la etapa de lluvia
        assert_eq!(runner.calls_to("./hec-hms.sh").len(), 1);
        assert!(!s.sc_output_file_path.join(KEY).exists());
    }

    #[tokio::test]
    async fn codigo_distinto_de_cero_del_motor_no_es_fatal() {
        let root = temp_dir("pipeline_engine_code");
        let (s, staged) = fixture(&root, false);
        let runner = engine(s.sc_input_csv_path.clone(), 3);

        let mut ctx = RunContext::new(&s, &runner, &staged);
        let report = Pipeline::standard().run(&mut ctx).await;
        assert_eq!(report.failure(), None);
    }

    #[tokio::test]
    async fn motor_que_no_arranca_falla_la_etapa() {
        let root = temp_dir("pipeline_engine_spawn");
        let (s, staged) = fixture(&root, false);
        let runner = RecordingRunner::new(|cmd| {
            if cmd.args.iter().any(|a| a.ends_with("forecast.script")) {
                anyhow::bail!("no se pudo lanzar '{}'", cmd);
            }
            Ok(0)
        });

        let mut ctx = RunContext::new(&s, &runner, &staged);
        let report = Pipeline::standard().run(&mut ctx).await;
        let failure = report.failure().unwrap();
        assert_eq!(failure.stage, "engine-run");
        assert_eq!(failure.label, "HMS run execution error");
        assert_eq!(report.results.len(), 11);
    }
}
