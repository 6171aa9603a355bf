//! Python interpreter process speaking newline-delimited JSON on stdin/stdout.

use std::{process::Stdio, sync::Arc, time::Duration};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines},
    process::{Child, ChildStdin, ChildStdout, Command},
    time::timeout,
};

use super::{distribution_for, imported_modules, Sandbox, SandboxFactory, StdoutSink};
use crate::{config::Config, error::SandboxError};

const DRIVER: &str = include_str!("driver.py");

#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Request<'a> {
    Exec { code: &'a str },
    FindMissing { modules: Vec<String> },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Reply {
    Ready { version: String },
    Stdout { text: String },
    Done,
    Missing { modules: Vec<String> },
    Error { message: String },
}

#[derive(Debug, Clone)]
pub struct PythonSandboxFactory {
    python: String,
    auto_install: bool,
    install_timeout: Duration,
}

impl PythonSandboxFactory {
    pub fn new(python: impl Into<String>) -> Self {
        Self {
            python: python.into(),
            auto_install: true,
            install_timeout: Duration::from_secs(300),
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self {
            python: cfg.python_bin(),
            auto_install: cfg.get_bool("AUTO_INSTALL_PACKAGES"),
            install_timeout: cfg.package_install_timeout(),
        }
    }

    pub fn auto_install(mut self, enabled: bool) -> Self {
        self.auto_install = enabled;
        self
    }
}

#[async_trait]
impl SandboxFactory for PythonSandboxFactory {
    async fn initialize(&self) -> Result<Arc<dyn Sandbox>, SandboxError> {
        let sandbox = PythonSandbox::start(self.clone()).await?;
        Ok(Arc::new(sandbox))
    }
}

struct DriverIo {
    child: Child,
    stdin: ChildStdin,
    lines: Lines<BufReader<ChildStdout>>,
}

pub struct PythonSandbox {
    settings: PythonSandboxFactory,
    version: String,
    io: tokio::sync::Mutex<DriverIo>,
    stdout: Mutex<Option<StdoutSink>>,
}

impl std::fmt::Debug for PythonSandbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PythonSandbox")
            .field("python", &self.settings.python)
            .field("version", &self.version)
            .finish()
    }
}

impl PythonSandbox {
    async fn start(settings: PythonSandboxFactory) -> Result<Self, SandboxError> {
        let mut cmd = Command::new(&settings.python);
        cmd.arg("-u") // unbuffered
            .arg("-c")
            .arg(DRIVER)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| SandboxError::Init(format!("{}: {e}", settings.python)))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| SandboxError::Init("no stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SandboxError::Init("no stdout".into()))?;
        let mut lines = BufReader::new(stdout).lines();

        let first = lines
            .next_line()
            .await?
            .ok_or_else(|| SandboxError::Init("interpreter exited during start-up".into()))?;
        let version = match serde_json::from_str::<Reply>(&first) {
            Ok(Reply::Ready { version }) => version,
            _ => return Err(SandboxError::Init(format!("unexpected greeting: {first}"))),
        };
        tracing::info!(python = %settings.python, %version, "interpreter ready");

        Ok(Self {
            settings,
            version,
            io: tokio::sync::Mutex::new(DriverIo { child, stdin, lines }),
            stdout: Mutex::new(None),
        })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    fn emit(&self, text: String) {
        let sink = self.stdout.lock().clone();
        if let Some(sink) = sink {
            sink(text);
        }
    }

    /// Send one request and wait for its final reply, streaming stdout on the way.
    async fn request(&self, req: &Request<'_>) -> Result<Reply, SandboxError> {
        let mut io = self.io.lock().await;
        let mut payload =
            serde_json::to_string(req).map_err(|e| SandboxError::Protocol(e.to_string()))?;
        payload.push('\n');
        io.stdin.write_all(payload.as_bytes()).await?;
        io.stdin.flush().await?;

        loop {
            let line = io
                .lines
                .next_line()
                .await?
                .ok_or_else(|| SandboxError::Protocol("interpreter exited".into()))?;
            match parse_reply(&line)? {
                Some(Reply::Stdout { text }) => self.emit(text),
                Some(reply) => return Ok(reply),
                // something wrote straight to fd 1; keep it as output
                None => self.emit(format!("{line}\n")),
            }
        }
    }

    async fn install(&self, distributions: &[&str]) -> Result<(), SandboxError> {
        let mut cmd = Command::new(&self.settings.python);
        cmd.args(["-m", "pip", "install", "--quiet", "--disable-pip-version-check"])
            .args(distributions)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let out = timeout(self.settings.install_timeout, cmd.output())
            .await
            .map_err(|_| SandboxError::PackageLoad("package installation timed out".into()))??;
        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr);
            let detail = stderr.lines().last().unwrap_or("pip failed").to_string();
            return Err(SandboxError::PackageLoad(detail));
        }
        Ok(())
    }
}

/// Decode one driver line. `None` means plain text that bypassed the driver.
fn parse_reply(line: &str) -> Result<Option<Reply>, SandboxError> {
    match serde_json::from_str::<Reply>(line) {
        Ok(reply) => Ok(Some(reply)),
        Err(e) if line.starts_with("{\"type\"") => {
            Err(SandboxError::Protocol(format!("undecodable reply: {e}")))
        }
        Err(_) => Ok(None),
    }
}

#[async_trait]
impl Sandbox for PythonSandbox {
    fn set_stdout(&self, sink: StdoutSink) {
        *self.stdout.lock() = Some(sink);
    }

    async fn load_packages_from_imports(
        &self,
        source: &str,
        progress: &(dyn Fn(String) + Send + Sync),
    ) -> Result<(), SandboxError> {
        let modules: Vec<String> = imported_modules(source).into_iter().collect();
        if modules.is_empty() {
            return Ok(());
        }

        let missing = match self.request(&Request::FindMissing { modules }).await? {
            Reply::Missing { modules } => modules,
            Reply::Error { message } => return Err(SandboxError::PackageLoad(message)),
            other => return Err(SandboxError::Protocol(format!("unexpected reply: {other:?}"))),
        };
        if missing.is_empty() {
            return Ok(());
        }

        let dists: Vec<&str> = missing.iter().map(|m| distribution_for(m)).collect();
        let listed = dists.join(", ");
        if !self.settings.auto_install {
            return Err(SandboxError::PackageLoad(format!(
                "missing {listed} (automatic installation is disabled)"
            )));
        }

        tracing::info!(packages = %listed, "installing packages");
        progress(format!("Loading {listed}"));
        self.install(&dists).await?;
        progress(format!("Loaded {listed}"));

        match self
            .request(&Request::Exec { code: "import importlib\nimportlib.invalidate_caches()\n" })
            .await?
        {
            Reply::Done => Ok(()),
            Reply::Error { message } => Err(SandboxError::PackageLoad(message)),
            other => Err(SandboxError::Protocol(format!("unexpected reply: {other:?}"))),
        }
    }

    async fn run(&self, source: &str) -> Result<(), SandboxError> {
        match self.request(&Request::Exec { code: source }).await? {
            Reply::Done => Ok(()),
            Reply::Error { message } => Err(SandboxError::Runtime(message)),
            other => Err(SandboxError::Protocol(format!("unexpected reply: {other:?}"))),
        }
    }

    async fn shutdown(&self) {
        let mut io = self.io.lock().await;
        if let Err(e) = io.child.kill().await {
            tracing::debug!("interpreter already gone: {e}");
        }
    }
}
