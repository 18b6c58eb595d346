use common::{AckStatus, JobId};
use thiserror::Error;

/// Motivo de un fallo de staging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StagingFailure {
    /// La transferencia del bundle devolvió distinto de 0 o no se pudo lanzar
    Download,
    /// El bundle no se pudo descomprimir
    Unpack,
    /// El bundle no tiene la forma esperada (observed_data, directorio previo)
    Layout,
    /// Falta el archivo de curve number de la fecha de referencia
    MissingPrerequisite,
    /// Nombre de bundle o source no interpretables
    InvalidJob,
    /// Cualquier error no capturado dentro de la iteración
    Unexpected,
}

impl StagingFailure {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Download => "error downloading input file",
            Self::Unpack => "unzip error of grid data",
            Self::Layout => "error copying observed flows file",
            Self::MissingPrerequisite => "Curve number file not exists",
            Self::InvalidJob => "input file name issue",
            Self::Unexpected => "code execution error",
        }
    }
}

/// Errores que cortan una iteración del loop.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("cola inalcanzable: {0}")]
    Transport(String),

    #[error("{}: {cause}", .kind.label())]
    Staging { kind: StagingFailure, cause: String },

    #[error("{label}: {cause}")]
    Stage { label: &'static str, cause: String },

    #[error("no se pudo reportar {status:?} del job {job} tras {attempts} intentos")]
    Acknowledge {
        job: JobId,
        status: AckStatus,
        attempts: u32,
    },
}

impl WorkerError {
    pub fn staging(kind: StagingFailure, cause: impl std::fmt::Display) -> Self {
        Self::Staging {
            kind,
            cause: cause.to_string(),
        }
    }

    /// Etiqueta que va en el asunto de la notificación.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Transport(_) => "Server response error",
            Self::Staging { kind, .. } => kind.label(),
            Self::Stage { label, .. } => *label,
            Self::Acknowledge {
                status: AckStatus::Success,
                ..
            } => "error upon acknowledging the success status",
            Self::Acknowledge { .. } => "error upon acknowledging the failure status",
        }
    }

    pub fn cause(&self) -> String {
        match self {
            Self::Staging { cause, .. } | Self::Stage { cause, .. } => cause.clone(),
            other => other.to_string(),
        }
    }
}

/// Qué hace el loop con un error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryPlan {
    pub label: &'static str,
    /// Estado a reportar a la cola, si corresponde
    pub acknowledge: Option<AckStatus>,
    /// Restaurar el directorio de trabajo (siempre que haya un job en curso)
    pub restore: bool,
}

/// Tabla única de error → transición.
pub fn recovery_plan(err: &WorkerError) -> RecoveryPlan {
    let label = err.label();
    match err {
        // sin job en curso: no hay nada que restaurar
        WorkerError::Transport(_) => RecoveryPlan {
            label,
            acknowledge: None,
            restore: false,
        },
        WorkerError::Staging {
            kind: StagingFailure::MissingPrerequisite,
            ..
        } => RecoveryPlan {
            label,
            acknowledge: Some(AckStatus::Failure),
            restore: true,
        },
        WorkerError::Staging { .. } | WorkerError::Stage { .. } | WorkerError::Acknowledge { .. } => {
            RecoveryPlan {
                label,
                acknowledge: None,
                restore: true,
            }
        }
    }
}
