//! Dobles de prueba compartidos por los tests del worker.

use anyhow::Result;
use async_trait::async_trait;
use common::{AckStatus, Settings};
use std::{
    collections::{HashMap, VecDeque},
    env, fs,
    path::{Path, PathBuf},
    sync::Mutex,
};

use crate::{
    notify::{ErrorReporter, Notice},
    process::{CommandSpec, ProcessRunner},
    source::{AckResult, JobSource, PollOutcome},
};

pub fn temp_dir(sub: &str) -> PathBuf {
    let base = env::temp_dir().join("worker_tests").join(sub);
    let _ = fs::remove_dir_all(&base);
    fs::create_dir_all(&base).unwrap();
    base
}

/// Constantes con todas las rutas bajo `root`.
pub fn settings_in(root: &Path) -> Settings {
    let p = |rel: &str| root.join(rel).to_string_lossy().into_owned();
    let mut map: HashMap<String, String> = HashMap::new();
    let mut set = |k: &str, v: String| {
        map.insert(k.to_string(), v);
    };

    set("REQUEST_API", "http://queue/api/v1/forecast/request".into());
    set("RESPONSE_API", "http://queue/api/v1/forecast/response".into());
    set("SERVER_SCP", "scp".into());
    set("SERVER_IP", "user@10.0.0.1".into());
    set("INPUT_GRID_DIR", p("input_grid"));
    set("OBS_FLOWS_DIR", p("obs_flows"));
    set("CN_DIR", p("cn"));
    set("NC_FILE_PATH", p("nc"));
    set("METADATA_INPUT_FILE", p("metadata.csv"));
    set("HMS_DIR_PATH", p("hms"));
    set("DSS_FILE_CREATE_SCRIPT_PATH", p("scripts/create_dss.script"));
    set("FORECAST_SCRIPT_FILE_PATH", p("scripts/forecast.script"));
    set("DSSSCRIPT_FILE_PATH", p("scripts/fc_extract.script"));
    set("SC_DSSSCRIPT_FILE_PATH", p("scripts/sc_extract.script"));
    set("STATIONS_DATA", p("stations.csv"));
    set("MODEL_INP_PATH", p("model_inp"));
    set("OBS_DSS_FILE_PATH", p("obs_catalog.csv"));
    set("OBS_DSS_DIR", p("obs_dss"));
    set("DSS_FILE_PATH", p("dss"));
    set("MODEL_INPUT_DSS_PATH", p("model/input_dss"));
    set("FORECAST_FILE_PATH", p("model"));
    set("GRID_FILE_PATH", p("model/godavari.grid"));
    set("GAGE_FILE_PATH", p("model/godavari.gage"));
    set("GAGE_FILE_SRC", "godavari.gage".into());
    set("MODEL_PATH", p("model"));
    set("BACKUP_FOLDER", p("backup"));
    set("MODEL_OUT_DIR", p("out"));
    set("MODEL_OUT_DIR_FILE", p("out/nodes_data"));
    set("SC_METADATA_PATH", p("sc_map.csv"));
    set("SC_INPUT_CSV_PATH", p("sc_input"));
    set("SC_OUTPUT_FILE_PATH", p("final/sc_output"));
    set("FINAL_OUT_PATH", p("final"));

    Settings::from_map(&map).unwrap()
}

type Responder = Box<dyn Fn(&CommandSpec) -> Result<i32> + Send + Sync>;

/// Runner que anota cada comando y responde según una función.
pub struct RecordingRunner {
    calls: Mutex<Vec<CommandSpec>>,
    respond: Responder,
}

impl RecordingRunner {
    pub fn new(respond: impl Fn(&CommandSpec) -> Result<i32> + Send + Sync + 'static) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            respond: Box::new(respond),
        }
    }

    /// Todo termina con 0.
    pub fn ok() -> Self {
        Self::new(|_| Ok(0))
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().unwrap().clone()
    }

    /// Comandos cuyo programa es `program`.
    pub fn calls_to(&self, program: &str) -> Vec<CommandSpec> {
        self.calls().into_iter().filter(|c| c.program == program).collect()
    }
}

#[async_trait]
impl ProcessRunner for RecordingRunner {
    async fn run(&self, cmd: &CommandSpec) -> Result<i32> {
        self.calls.lock().unwrap().push(cmd.clone());
        (self.respond)(cmd)
    }
}

#[derive(Default)]
pub struct RecordingReporter {
    notices: Mutex<Vec<Notice>>,
}

impl RecordingReporter {
    pub fn notices(&self) -> Vec<Notice> {
        self.notices.lock().unwrap().clone()
    }
}

#[async_trait]
impl ErrorReporter for RecordingReporter {
    async fn report(&self, notice: Notice) {
        self.notices.lock().unwrap().push(notice);
    }
}

/// Cola en memoria: devuelve los polls en orden y luego `NoJob(204)`.
#[derive(Default)]
pub struct FakeSource {
    polls: Mutex<VecDeque<PollOutcome>>,
    ack_replies: Mutex<VecDeque<AckResult>>,
    acks: Mutex<Vec<(String, AckStatus)>>,
}

impl FakeSource {
    pub fn with_polls(polls: impl IntoIterator<Item = PollOutcome>) -> Self {
        Self {
            polls: Mutex::new(polls.into_iter().collect()),
            ..Default::default()
        }
    }

    /// Respuestas a los próximos acknowledge; agotadas, responde `Ok`.
    pub fn ack_replies(self, replies: impl IntoIterator<Item = AckResult>) -> Self {
        *self.ack_replies.lock().unwrap() = replies.into_iter().collect();
        self
    }

    pub fn acks(&self) -> Vec<(String, AckStatus)> {
        self.acks.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobSource for FakeSource {
    async fn poll(&self) -> PollOutcome {
        self.polls
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(PollOutcome::NoJob(204))
    }

    async fn acknowledge(&self, job_id: &str, status: AckStatus) -> AckResult {
        self.acks.lock().unwrap().push((job_id.to_string(), status));
        self.ack_replies.lock().unwrap().pop_front().unwrap_or(AckResult::Ok)
    }
}
