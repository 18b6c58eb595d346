use anyhow::{bail, Context, Result};
use std::{collections::HashMap, path::Path, path::PathBuf, time::Duration};

pub const DEFAULT_CONSTANTS_FILE: &str = "/home/HECHMS_GODAVARI/constants.csv";

const DEFAULT_ENGINE_COMMAND: &str = "./hec-hms.sh";
const DEFAULT_UNPACK_COMMAND: &str = "unzip -o -q";
const DEFAULT_BACKUP_ARCHIVE: &str = "nodes_data.zip";

/// Intervalos del loop del worker (en segundos salvo los contadores).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timing {
    /// Espera tras no poder contactar la cola
    pub transport_retry: Duration,
    /// Espera tras una respuesta distinta de 200
    pub no_job: Duration,
    /// Backoff entre reintentos de acknowledge
    pub ack_backoff: Duration,
    /// Espera tras la recuperación, antes del siguiente poll
    pub idle: Duration,
    pub ack_retries: u32,
    pub upload_retries: u32,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            transport_retry: Duration::from_secs(60),
            no_job: Duration::from_secs(900),
            ack_backoff: Duration::from_secs(30),
            idle: Duration::from_secs(5),
            ack_retries: 3,
            upload_retries: 3,
        }
    }
}

/// Constantes del worker, cargadas una sola vez al arrancar.
#[derive(Debug, Clone)]
pub struct Settings {
    // cola y transferencia
    pub request_api: String,
    pub response_api: String,
    pub server_scp: String,
    pub server_ip: String,
    pub notify_webhook: Option<String>,

    // staging
    pub input_grid_dir: PathBuf,
    pub obs_flows_dir: PathBuf,
    pub cn_dir: PathBuf,
    pub unpack_command: String,

    // artefactos intermedios
    pub nc_file_path: PathBuf,
    pub metadata_input_file: PathBuf,
    pub dss_file_path: PathBuf,
    pub model_input_dss_path: PathBuf,

    // motor externo
    pub hms_dir_path: PathBuf,
    pub engine_command: String,
    pub engine_timeout: Option<Duration>,
    pub dss_file_create_script_path: PathBuf,
    pub forecast_script_file_path: PathBuf,
    pub dss_script_file_path: PathBuf,
    pub sc_dss_script_file_path: PathBuf,

    // caudales observados
    pub stations_data: PathBuf,
    pub model_inp_path: PathBuf,
    pub obs_dss_file_path: PathBuf,
    pub obs_dss_dir: PathBuf,

    // configuración del modelo
    pub forecast_file_path: PathBuf,
    pub grid_file_path: PathBuf,
    pub gage_file_path: PathBuf,
    pub gage_file_src: String,
    pub model_path: PathBuf,

    // backup / recuperación
    pub backup_folder: PathBuf,
    pub backup_archive: String,
    pub model_out_dir: PathBuf,
    pub model_out_dir_file: PathBuf,

    // sub-cuencas y salida final
    pub sc_metadata_path: PathBuf,
    pub sc_input_csv_path: PathBuf,
    pub sc_output_file_path: PathBuf,
    pub final_out_path: PathBuf,

    pub timing: Timing,
}

/// Lee el archivo de constantes: una línea `clave,valor` por entrada, sin encabezado.
pub fn read_constants(path: &Path) -> Result<HashMap<String, String>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("no se pudo abrir el archivo de constantes {}", path.display()))?;

    let mut out = HashMap::new();
    for (idx, row) in reader.records().enumerate() {
        let row = row.with_context(|| format!("línea {} de {}", idx + 1, path.display()))?;
        let key = row.get(0).unwrap_or("").to_string();
        if key.is_empty() || key.starts_with('#') {
            continue;
        }
        let value = row.get(1).unwrap_or("").to_string();
        out.insert(key, value);
    }
    Ok(out)
}

/// Ayuda para sacar claves del mapa acumulando las que faltan.
struct Lookup<'a> {
    map: &'a HashMap<String, String>,
    missing: Vec<&'static str>,
}

impl<'a> Lookup<'a> {
    fn string(&mut self, key: &'static str) -> String {
        match self.map.get(key) {
            Some(v) if !v.is_empty() => v.clone(),
            _ => {
                self.missing.push(key);
                String::new()
            }
        }
    }

    fn path(&mut self, key: &'static str) -> PathBuf {
        PathBuf::from(self.string(key))
    }

    fn optional(&self, key: &str) -> Option<String> {
        self.map.get(key).filter(|v| !v.is_empty()).cloned()
    }

    fn secs(&self, key: &str, default: Duration) -> Result<Duration> {
        match self.optional(key) {
            Some(v) => {
                let n: u64 = v
                    .parse()
                    .with_context(|| format!("{key} debe ser un entero de segundos, vino {v:?}"))?;
                Ok(Duration::from_secs(n))
            }
            None => Ok(default),
        }
    }

    fn count(&self, key: &str, default: u32) -> Result<u32> {
        match self.optional(key) {
            Some(v) => v
                .parse()
                .with_context(|| format!("{key} debe ser un entero, vino {v:?}")),
            None => Ok(default),
        }
    }
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self> {
        let map = read_constants(path)?;
        Self::from_map(&map)
    }

    pub fn from_map(map: &HashMap<String, String>) -> Result<Self> {
        let mut l = Lookup {
            map,
            missing: Vec::new(),
        };

        let defaults = Timing::default();
        let timing = Timing {
            transport_retry: l.secs("TRANSPORT_RETRY_SECS", defaults.transport_retry)?,
            no_job: l.secs("NO_JOB_SECS", defaults.no_job)?,
            ack_backoff: l.secs("ACK_BACKOFF_SECS", defaults.ack_backoff)?,
            idle: l.secs("IDLE_SECS", defaults.idle)?,
            ack_retries: l.count("ACK_RETRIES", defaults.ack_retries)?,
            upload_retries: l.count("UPLOAD_RETRIES", defaults.upload_retries)?,
        };

        // 0 o ausente: espera sin límite
        let engine_timeout = match l.optional("ENGINE_TIMEOUT_SECS") {
            Some(_) => Some(l.secs("ENGINE_TIMEOUT_SECS", Duration::ZERO)?).filter(|d| !d.is_zero()),
            None => None,
        };

        let settings = Settings {
            request_api: l.string("REQUEST_API"),
            response_api: l.string("RESPONSE_API"),
            server_scp: l.string("SERVER_SCP"),
            server_ip: l.string("SERVER_IP"),
            notify_webhook: l.optional("NOTIFY_WEBHOOK"),

            input_grid_dir: l.path("INPUT_GRID_DIR"),
            obs_flows_dir: l.path("OBS_FLOWS_DIR"),
            cn_dir: l.path("CN_DIR"),
            unpack_command: l
                .optional("UNPACK_COMMAND")
                .unwrap_or_else(|| DEFAULT_UNPACK_COMMAND.to_string()),

            nc_file_path: l.path("NC_FILE_PATH"),
            metadata_input_file: l.path("METADATA_INPUT_FILE"),
            dss_file_path: l.path("DSS_FILE_PATH"),
            model_input_dss_path: l.path("MODEL_INPUT_DSS_PATH"),

            hms_dir_path: l.path("HMS_DIR_PATH"),
            engine_command: l
                .optional("ENGINE_COMMAND")
                .unwrap_or_else(|| DEFAULT_ENGINE_COMMAND.to_string()),
            engine_timeout,
            dss_file_create_script_path: l.path("DSS_FILE_CREATE_SCRIPT_PATH"),
            forecast_script_file_path: l.path("FORECAST_SCRIPT_FILE_PATH"),
            dss_script_file_path: l.path("DSSSCRIPT_FILE_PATH"),
            sc_dss_script_file_path: l.path("SC_DSSSCRIPT_FILE_PATH"),

            stations_data: l.path("STATIONS_DATA"),
            model_inp_path: l.path("MODEL_INP_PATH"),
            obs_dss_file_path: l.path("OBS_DSS_FILE_PATH"),
            obs_dss_dir: l.path("OBS_DSS_DIR"),

            forecast_file_path: l.path("FORECAST_FILE_PATH"),
            grid_file_path: l.path("GRID_FILE_PATH"),
            gage_file_path: l.path("GAGE_FILE_PATH"),
            gage_file_src: l.string("GAGE_FILE_SRC"),
            model_path: l.path("MODEL_PATH"),

            backup_folder: l.path("BACKUP_FOLDER"),
            backup_archive: l
                .optional("BACKUP_ARCHIVE")
                .unwrap_or_else(|| DEFAULT_BACKUP_ARCHIVE.to_string()),
            model_out_dir: l.path("MODEL_OUT_DIR"),
            model_out_dir_file: l.path("MODEL_OUT_DIR_FILE"),

            sc_metadata_path: l.path("SC_METADATA_PATH"),
            sc_input_csv_path: l.path("SC_INPUT_CSV_PATH"),
            sc_output_file_path: l.path("SC_OUTPUT_FILE_PATH"),
            final_out_path: l.path("FINAL_OUT_PATH"),

            timing,
        };

        if !l.missing.is_empty() {
            bail!("faltan constantes requeridas: {}", l.missing.join(", "));
        }

        Ok(settings)
    }

    /// Destino de `scp`: "<SERVER_IP>:<ruta>"
    pub fn remote(&self, path: &str) -> String {
        format!("{}:{}", self.server_ip, path)
    }
}
