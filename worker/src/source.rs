use async_trait::async_trait;
use common::{AckStatus, Job, JobDispatch};
use reqwest::{Client, StatusCode};
use tracing::{debug, info, warn};

/// Resultado de un poll. Nunca es un error: cada caso decide cuánto dormir.
#[derive(Debug, Clone)]
pub enum PollOutcome {
    Job(Job),
    /// La cola respondió distinto de 200 (204 incluido)
    NoJob(u16),
    /// No se pudo contactar la cola
    Unreachable(String),
    /// 200 con un cuerpo sin uuid o sin los campos del job
    Malformed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckResult {
    Ok,
    RetryableFailure(String),
}

/// Cola remota de pronósticos.
#[async_trait]
pub trait JobSource: Send + Sync {
    async fn poll(&self) -> PollOutcome;

    async fn acknowledge(&self, job_id: &str, status: AckStatus) -> AckResult;
}

/// Cliente HTTP de la cola:
/// - `GET <request_api>` → 200 `{uuid, dex}`
/// - `GET <response_api>/<uuid>/<1|2>`
#[derive(Debug, Clone)]
pub struct HttpJobSource {
    client: Client,
    request_api: String,
    response_api: String,
}

impl HttpJobSource {
    pub fn new(client: Client, request_api: impl Into<String>, response_api: impl Into<String>) -> Self {
        Self {
            client,
            request_api: request_api.into(),
            response_api: response_api.into().trim_end_matches('/').to_string(),
        }
    }
}

/// Interpreta el cuerpo de un 200.
fn parse_dispatch(body: &str) -> Result<Job, String> {
    let dispatch: JobDispatch = serde_json::from_str(body).map_err(|e| e.to_string())?;
    if dispatch.uuid.trim().is_empty() {
        return Err("uuid vacío".to_string());
    }
    Ok(Job::from(dispatch))
}

#[async_trait]
impl JobSource for HttpJobSource {
    async fn poll(&self) -> PollOutcome {
        let resp = match self.client.get(&self.request_api).send().await {
            Ok(r) => r,
            Err(e) => {
                warn!("no se pudo contactar la cola {}: {}", self.request_api, e);
                return PollOutcome::Unreachable(e.to_string());
            }
        };

        let status = resp.status();
        debug!("cola respondió {}", status);
        if status != StatusCode::OK {
            return PollOutcome::NoJob(status.as_u16());
        }

        let body = match resp.text().await {
            Ok(b) => b,
            Err(e) => return PollOutcome::Unreachable(e.to_string()),
        };

        match parse_dispatch(&body) {
            Ok(job) => {
                info!("job {} recibido (source={}, input={})", job.id, job.source, job.input_path);
                PollOutcome::Job(job)
            }
            Err(e) => {
                warn!("respuesta de la cola sin job válido: {}", e);
                PollOutcome::Malformed(e)
            }
        }
    }

    async fn acknowledge(&self, job_id: &str, status: AckStatus) -> AckResult {
        let url = format!("{}/{}/{}", self.response_api, job_id, status.code());
        match self.client.get(&url).send().await {
            Ok(resp) if resp.status() == StatusCode::OK => {
                let text = resp.text().await.unwrap_or_default();
                info!("acknowledge {:?} de {} aceptado: {}", status, job_id, text);
                AckResult::Ok
            }
            Ok(resp) => {
                warn!("acknowledge de {} devolvió {}", job_id, resp.status());
                AckResult::RetryableFailure(format!("status {}", resp.status()))
            }
            Err(e) => {
                warn!("acknowledge de {} falló: {}", job_id, e);
                AckResult::RetryableFailure(e.to_string())
            }
        }
    }
}
