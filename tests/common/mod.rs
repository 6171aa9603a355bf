#![allow(dead_code)]

use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::Result;
use async_trait::async_trait;
use chutra::{
    artifact::{ArtifactId, CodeArtifact},
    bus::EventBus,
    chat::ChatPanel,
    conversation::{ChatMessage, MessageSink, Role},
    error::SandboxError,
    execution::ExecutionEngine,
    preferences::{MemoryStorage, Preferences},
    sandbox::{Sandbox, SandboxFactory, StdoutSink},
    session::{SessionContext, UserIdentity},
};
use parking_lot::Mutex;
use tokio::sync::Notify;

/// A tiny line interpreter standing in for Python.
///
/// Understood lines: `print("x")`, `raise Exception("m")`, `plt.show()`,
/// `wait()` (blocks until [`ScriptedSandbox::release`]), `hang()` (sleeps
/// for an hour). Importing `numpy` triggers package loading.
#[derive(Default)]
pub struct ScriptedSandbox {
    pub executed: Mutex<Vec<String>>,
    pub packages_loaded: Mutex<Vec<String>>,
    pub fail_packages: AtomicBool,
    pub shutdowns: AtomicUsize,
    stdout: Mutex<Option<StdoutSink>>,
    matplotlib_ready: AtomicBool,
    gate: Notify,
}

impl ScriptedSandbox {
    pub fn release(&self) {
        self.gate.notify_one();
    }

    fn emit(&self, line: &str) {
        let sink = self.stdout.lock().clone();
        if let Some(sink) = sink {
            sink(format!("{line}\n"));
        }
    }
}

fn quoted(line: &str, prefix: &str) -> Option<String> {
    line.strip_prefix(prefix)?
        .strip_suffix("\")")
        .map(str::to_string)
}

#[async_trait]
impl Sandbox for ScriptedSandbox {
    fn set_stdout(&self, sink: StdoutSink) {
        *self.stdout.lock() = Some(sink);
    }

    async fn load_packages_from_imports(
        &self,
        source: &str,
        progress: &(dyn Fn(String) + Send + Sync),
    ) -> Result<(), SandboxError> {
        if !source.contains("import numpy") {
            return Ok(());
        }
        if self.fail_packages.load(Ordering::SeqCst) {
            return Err(SandboxError::PackageLoad("numpy is not available".into()));
        }
        progress("Loading numpy".into());
        self.packages_loaded.lock().push("numpy".into());
        progress("Loaded numpy".into());
        Ok(())
    }

    async fn run(&self, source: &str) -> Result<(), SandboxError> {
        self.executed.lock().push(source.to_string());

        if source.contains("def setup_matplotlib_output") {
            return Ok(());
        }
        for line in source.lines().map(str::trim) {
            if line == "setup_matplotlib_output()" {
                self.matplotlib_ready.store(true, Ordering::SeqCst);
            } else if let Some(text) = quoted(line, "print(\"") {
                self.emit(&text);
            } else if let Some(msg) = quoted(line, "raise Exception(\"") {
                return Err(SandboxError::Runtime(msg));
            } else if line == "plt.show()" {
                if !self.matplotlib_ready.load(Ordering::SeqCst) {
                    return Err(SandboxError::Runtime("plt.show called before setup".into()));
                }
                self.emit("data:image/png;base64,iVBORw0KGgo=");
            } else if line == "wait()" {
                self.gate.notified().await;
            } else if line == "hang()" {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
        }
        Ok(())
    }

    async fn shutdown(&self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct ScriptedFactory {
    pub sandbox: Arc<ScriptedSandbox>,
    pub initializations: AtomicUsize,
    pub fail: AtomicBool,
}

impl ScriptedFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sandbox: Arc::new(ScriptedSandbox::default()),
            initializations: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl SandboxFactory for ScriptedFactory {
    async fn initialize(&self) -> Result<Arc<dyn Sandbox>, SandboxError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(SandboxError::Init("interpreter unavailable".into()));
        }
        self.initializations.fetch_add(1, Ordering::SeqCst);
        Ok(self.sandbox.clone())
    }
}

#[derive(Default)]
pub struct RecordingSink {
    pub messages: Mutex<Vec<ChatMessage>>,
}

impl RecordingSink {
    pub fn contents(&self) -> Vec<String> {
        self.messages.lock().iter().map(|m| m.content.clone()).collect()
    }
}

impl MessageSink for RecordingSink {
    fn append_message(&self, role: Role, content: String) -> Result<()> {
        self.messages.lock().push(ChatMessage::new(role, content));
        Ok(())
    }
}

/// Everything a test needs, wired the way the application root wires it.
pub struct Harness {
    pub bus: EventBus,
    pub factory: Arc<ScriptedFactory>,
    pub session: Arc<SessionContext>,
    pub storage: Arc<MemoryStorage>,
    pub preferences: Preferences,
    pub sink: Arc<RecordingSink>,
    pub engine: Arc<ExecutionEngine>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_timeout(None)
    }

    pub fn with_timeout(timeout: Option<Duration>) -> Self {
        let bus = EventBus::new();
        let factory = ScriptedFactory::new();
        let session = Arc::new(SessionContext::new(
            UserIdentity { id: "tester".into() },
            factory.clone(),
        ));
        let storage = Arc::new(MemoryStorage::new());
        let preferences = Preferences::new(storage.clone(), bus.clone());
        let sink = Arc::new(RecordingSink::default());
        let engine = Arc::new(
            ExecutionEngine::new(session.clone(), bus.clone(), sink.clone()).with_timeout(timeout),
        );
        Self { bus, factory, session, storage, preferences, sink, engine }
    }

    pub fn sandbox(&self) -> &ScriptedSandbox {
        &self.factory.sandbox
    }

    pub fn artifact(&self, id: &str) -> Arc<CodeArtifact> {
        CodeArtifact::new(
            ArtifactId::from(id),
            self.engine.clone(),
            self.bus.clone(),
            self.preferences.clone(),
            self.sink.clone(),
        )
    }

    pub fn chat(&self, auto_run_delay: Duration) -> Arc<ChatPanel> {
        ChatPanel::new(self.bus.clone(), self.preferences.clone(), auto_run_delay)
    }
}

/// Poll `check` until it holds or a second passes.
pub async fn eventually<F: Fn() -> bool>(check: F) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check()
}
