use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::{error, warn};

const SUBJECT_PREFIX: &str = "HMS GODAVARI ERROR :: ";

/// Aviso al operador.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub subject: String,
    pub message: String,
}

impl Notice {
    /// `source` vacío cuando el error ocurre antes de tener un job.
    pub fn new(label: &str, source: &str, cause: &str) -> Self {
        let message = if source.is_empty() {
            cause.to_string()
        } else {
            format!("{source} :: {cause}")
        };
        Self {
            subject: format!("{SUBJECT_PREFIX}{label}"),
            message,
        }
    }
}

/// Canal de notificación de errores. Fire-and-forget: no devuelve error.
#[async_trait]
pub trait ErrorReporter: Send + Sync {
    async fn report(&self, notice: Notice);
}

/// Sólo deja el aviso en el log.
#[derive(Debug, Clone, Default)]
pub struct LogReporter;

#[async_trait]
impl ErrorReporter for LogReporter {
    async fn report(&self, notice: Notice) {
        error!("{} | {}", notice.subject, notice.message);
    }
}

/// Además de loguear, hace POST `{subject, message}` al webhook.
#[derive(Debug, Clone)]
pub struct WebhookReporter {
    client: Client,
    url: String,
}

impl WebhookReporter {
    pub fn new(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl ErrorReporter for WebhookReporter {
    async fn report(&self, notice: Notice) {
        LogReporter.report(notice.clone()).await;

        match self.client.post(&self.url).json(&notice).send().await {
            Ok(resp) if resp.status().is_success() => {}
            Ok(resp) => warn!("webhook de notificación devolvió {}", resp.status()),
            Err(e) => warn!("no se pudo enviar la notificación: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::State, routing::post, Json, Router};
    use std::sync::{Arc, Mutex};
    use tokio::net::TcpListener;

    #[test]
    fn notice_arma_asunto_y_cuerpo() {
        let n = Notice::new("dss file copy error", "IMD_FORECAST", "No such file");
        assert_eq!(n.subject, "HMS GODAVARI ERROR :: dss file copy error");
        assert_eq!(n.message, "IMD_FORECAST :: No such file");

        let n = Notice::new("Server response error", "", "connection refused");
        assert_eq!(n.message, "connection refused");
    }

    #[tokio::test]
    async fn webhook_recibe_el_json_del_aviso() {
        let seen: Arc<Mutex<Vec<serde_json::Value>>> = Arc::default();
        let app = Router::new()
            .route(
                "/hook",
                post(
                    |State(seen): State<Arc<Mutex<Vec<serde_json::Value>>>>,
                     Json(body): Json<serde_json::Value>| async move {
                        seen.lock().unwrap().push(body);
                    },
                ),
            )
            .with_state(seen.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let reporter = WebhookReporter::new(Client::new(), format!("http://{addr}/hook"));
        reporter
            .report(Notice::new("HMS run execution error", "ENSEMBLE_FORECAST", "exit 2"))
            .await;

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0]["subject"], "HMS GODAVARI ERROR :: HMS run execution error");
        assert_eq!(seen[0]["message"], "ENSEMBLE_FORECAST :: exit 2");
    }

    #[tokio::test]
    async fn webhook_caido_no_propaga_el_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let reporter = WebhookReporter::new(Client::new(), format!("http://{addr}/hook"));
        reporter.report(Notice::new("x", "y", "z")).await;
    }
}
