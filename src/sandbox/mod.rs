//! Interpreter seam: the engine only talks to a [`Sandbox`] obtained from a
//! [`SandboxFactory`], never to a concrete process.

use std::{collections::BTreeSet, sync::Arc};

use async_trait::async_trait;

use crate::error::SandboxError;

pub mod python;

pub use python::{PythonSandbox, PythonSandboxFactory};

/// Receives interpreter stdout one line at a time (line terminator included).
pub type StdoutSink = Arc<dyn Fn(String) + Send + Sync>;

#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Route stdout of subsequent runs to `sink`, replacing any previous sink.
    fn set_stdout(&self, sink: StdoutSink);

    /// Make every module `source` imports importable, reporting progress.
    async fn load_packages_from_imports(
        &self,
        source: &str,
        progress: &(dyn Fn(String) + Send + Sync),
    ) -> Result<(), SandboxError>;

    /// Execute `source` in the interpreter's global namespace.
    async fn run(&self, source: &str) -> Result<(), SandboxError>;

    /// Release the interpreter. Further calls may fail.
    async fn shutdown(&self) {}
}

#[async_trait]
pub trait SandboxFactory: Send + Sync {
    async fn initialize(&self) -> Result<Arc<dyn Sandbox>, SandboxError>;
}

/// Top-level module names imported by `source`, skipping relative imports.
pub fn imported_modules(source: &str) -> BTreeSet<String> {
    let mut modules = BTreeSet::new();
    for line in source.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("import ") {
            for item in rest.split(',') {
                let name = item.split_whitespace().next().unwrap_or("");
                push_root(&mut modules, name);
            }
        } else if let Some(rest) = line.strip_prefix("from ") {
            let mut parts = rest.split_whitespace();
            if let (Some(name), Some("import")) = (parts.next(), parts.next()) {
                push_root(&mut modules, name);
            }
        }
    }
    modules
}

fn push_root(modules: &mut BTreeSet<String>, dotted: &str) {
    if dotted.starts_with('.') {
        return;
    }
    let root = dotted.split('.').next().unwrap_or("");
    if !root.is_empty() && root.chars().all(|c| c.is_alphanumeric() || c == '_') {
        modules.insert(root.to_string());
    }
}

/// pip distribution name for an importable module name.
pub fn distribution_for(module: &str) -> &str {
    match module {
        "sklearn" => "scikit-learn",
        "PIL" => "pillow",
        "cv2" => "opencv-python",
        "yaml" => "pyyaml",
        "bs4" => "beautifulsoup4",
        "skimage" => "scikit-image",
        "dateutil" => "python-dateutil",
        other => other,
    }
}
