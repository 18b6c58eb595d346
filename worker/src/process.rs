use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::{
    fmt,
    path::{Path, PathBuf},
    time::Duration,
};
use tokio::process::Command;
use tracing::{debug, warn};

/// Línea de comando externa (transferencia, descompresión, motor).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    /// Límite de tiempo; al vencer se mata el proceso
    pub timeout: Option<Duration>,
}

impl CommandSpec {
    /// Arma el comando a partir de una plantilla tipo "unzip -o -q".
    pub fn from_template(template: &str) -> Result<Self> {
        let mut parts = template.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .with_context(|| format!("plantilla de comando vacía: {template:?}"))?;
        Ok(Self {
            program,
            args: parts.collect(),
            cwd: None,
            timeout: None,
        })
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn path_arg(self, path: &Path) -> Self {
        let arg = path.to_string_lossy().into_owned();
        self.arg(arg)
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn timeout(mut self, limit: Option<Duration>) -> Self {
        self.timeout = limit;
        self
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for a in &self.args {
            write!(f, " {a}")?;
        }
        Ok(())
    }
}

/// Ejecuta comandos externos y devuelve su código de salida.
/// `Err` sólo si el proceso no se pudo lanzar o superó su límite.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(&self, cmd: &CommandSpec) -> Result<i32>;
}

/// Runner real sobre `tokio::process`.
#[derive(Debug, Clone, Default)]
pub struct SystemRunner;

#[async_trait]
impl ProcessRunner for SystemRunner {
    async fn run(&self, cmd: &CommandSpec) -> Result<i32> {
        let mut command = Command::new(&cmd.program);
        command.args(&cmd.args).kill_on_drop(true);
        if let Some(dir) = &cmd.cwd {
            command.current_dir(dir);
        }

        debug!("ejecutando: {}", cmd);
        let mut child = command
            .spawn()
            .with_context(|| format!("no se pudo lanzar '{}'", cmd))?;

        let status = match cmd.timeout {
            Some(limit) => {
                let waited = tokio::time::timeout(limit, child.wait()).await;
                match waited {
                    Ok(status) => status?,
                    Err(_) => {
                        warn!("'{}' superó {:?}, matando el proceso", cmd, limit);
                        let _ = child.kill().await;
                        bail!("'{}' superó el límite de {:?}", cmd, limit);
                    }
                }
            }
            None => child.wait().await?,
        };

        // terminado por señal: no hay código
        let code = status.code().unwrap_or(-1);
        debug!("'{}' terminó con código {}", cmd, code);
        Ok(code)
    }
}
