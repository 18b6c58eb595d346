use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type JobId = String;

/// Cuerpo con el que se encola un pronóstico, y objeto `dex` que la cola
/// devuelve al despachar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRequest {
    /// Ruta remota del bundle de entrada, ej: "/data/20230303_20230318_20230427_1679144521408.zip"
    pub input_path: String,

    /// Destino remoto de la salida de cuenca completa
    pub fc_output_path: String,

    /// Destino remoto de la salida de sub-cuencas
    pub sc_output_path: String,

    /// Origen del pronóstico, ej: "IMD_FORECAST", "ACTUAL_SOURCE"
    pub source: String,
}

/// Respuesta 200 de `GET <request-endpoint>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDispatch {
    pub uuid: JobId,
    pub dex: JobRequest,
}

/// Categoría de origen del job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceCategory {
    DeterministicForecast,
    EnsembleForecast,
    /// Datos observados: no hay pronóstico que correr.
    ObservedSource,
    Other(String),
}

impl SourceCategory {
    pub fn parse(raw: &str) -> Self {
        if raw == "ACTUAL_SOURCE" {
            Self::ObservedSource
        } else if raw.starts_with("ENSEMBLE_DETERMINISTIC") {
            Self::DeterministicForecast
        } else if raw.starts_with("ENSEMBLE_FORECAST") {
            Self::EnsembleForecast
        } else {
            Self::Other(raw.to_string())
        }
    }

    pub fn needs_forecast(&self) -> bool {
        !matches!(self, Self::ObservedSource)
    }
}

/// Job inmutable durante toda su vida en el worker.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub source: String,
    pub category: SourceCategory,
    pub input_path: String,
    pub fc_output_path: String,
    pub sc_output_path: String,
}

impl From<JobDispatch> for Job {
    fn from(d: JobDispatch) -> Self {
        Job {
            id: d.uuid,
            category: SourceCategory::parse(&d.dex.source),
            source: d.dex.source,
            input_path: d.dex.input_path,
            fc_output_path: d.dex.fc_output_path,
            sc_output_path: d.dex.sc_output_path,
        }
    }
}

/// Nombre del directorio staged y clave de correlación de todos los
/// artefactos del job: nombre del bundle sin extensión.
pub fn correlation_key(input_path: &str) -> String {
    let file_name = input_path.rsplit('/').next().unwrap_or(input_path);
    file_name.split('.').next().unwrap_or(file_name).to_string()
}

/// Tipo de corrida del modelo, derivado de los dos primeros segmentos del source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunType {
    ImdForecast,
    EnsembleForecast,
    EnsembleDeterministic,
}

impl RunType {
    pub fn from_source(source: &str) -> Option<Self> {
        let mut parts = source.split('_');
        let prefix = match (parts.next(), parts.next()) {
            (Some(a), Some(b)) => format!("{a}_{b}"),
            _ => return None,
        };

        match prefix.as_str() {
            "IMD_FORECAST" => Some(Self::ImdForecast),
            "ENSEMBLE_FORECAST" => Some(Self::EnsembleForecast),
            "ENSEMBLE_DETERMINISTIC" => Some(Self::EnsembleDeterministic),
            _ => None,
        }
    }

    /// Nombre del artefacto de lluvia (y de la especificación de corrida).
    pub fn rainfall_name(&self) -> &'static str {
        match self {
            Self::ImdForecast => "IMD",
            Self::EnsembleForecast => "ECMWF_ENS",
            Self::EnsembleDeterministic => "ECMWF_DET",
        }
    }

    /// Nombre del pronóstico a computar en el motor.
    pub fn compute_name(&self) -> &'static str {
        match self {
            Self::ImdForecast => "Forecast_IMD",
            Self::EnsembleForecast => "Forecast_ECMWF_ENS",
            Self::EnsembleDeterministic => "Forecast_ECMWF_DET",
        }
    }

    pub fn forecast_spec_file(&self) -> String {
        format!("{}.forecast", self.compute_name())
    }

    /// Contenedor de salida que el motor llena al correr.
    pub fn output_container_file(&self) -> String {
        format!("{}.dss", self.compute_name())
    }
}

/// Variante de especificación que usará la simulación.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecVariant {
    /// Sin lecturas inválidas: especificación de pronóstico.
    ForecastOnly,
    /// Hubo lecturas negativas: especificación de corrida.
    ObservedAware,
}

impl SpecVariant {
    pub fn from_missing_data(missing_data: bool) -> Self {
        if missing_data {
            Self::ObservedAware
        } else {
            Self::ForecastOnly
        }
    }

    pub fn spec_file(&self, run_type: RunType) -> String {
        match self {
            Self::ForecastOnly => run_type.forecast_spec_file(),
            Self::ObservedAware => run_type.rainfall_name().to_string(),
        }
    }
}

/// Estado terminal que se reporta a la cola.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AckStatus {
    Success,
    Failure,
}

impl AckStatus {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Success => "1",
            Self::Failure => "2",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "1" => Some(Self::Success),
            "2" => Some(Self::Failure),
            _ => None,
        }
    }
}

/* --------- Vista de la cola (servidor de desarrollo y CLI) --------- */

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueueStatus {
    Queued,
    Dispatched,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedJob {
    pub uuid: JobId,
    pub request: JobRequest,
    pub status: QueueStatus,

    pub submitted_at: DateTime<Utc>,
    pub dispatched_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Veces que el job fue despachado (re-despachos por lease vencido incluidos)
    pub dispatches: u32,
}
