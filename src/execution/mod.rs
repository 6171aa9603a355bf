//! Execution engine: run records, output chunks, and the pieces that produce them.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod classifier;
pub mod engine;
pub mod format;
pub mod shims;

pub use classifier::required_shims;
pub use engine::ExecutionEngine;
pub use format::{chat_message_for, format_for_chat};
pub use shims::Shim;

/// Prefix the matplotlib shim prints before a rendered figure.
pub const IMAGE_PREFIX: &str = "data:image/png;base64";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    InProgress,
    LoadingPackages,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkKind {
    Text,
    Image,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputChunk {
    #[serde(rename = "type")]
    pub kind: ChunkKind,
    pub value: String,
}

impl OutputChunk {
    pub fn text(value: impl Into<String>) -> Self {
        Self { kind: ChunkKind::Text, value: value.into() }
    }

    pub fn image(value: impl Into<String>) -> Self {
        Self { kind: ChunkKind::Image, value: value.into() }
    }

    /// Classify one line of interpreter stdout.
    pub fn from_stdout(line: String) -> Self {
        if line.starts_with(IMAGE_PREFIX) {
            Self::image(line.trim_end().to_string())
        } else {
            Self::text(line)
        }
    }
}

/// One execution attempt of an artifact's current content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRun {
    pub id: RunId,
    pub status: RunStatus,
    pub contents: Vec<OutputChunk>,
}

impl ExecutionRun {
    pub fn started(id: RunId) -> Self {
        Self { id, status: RunStatus::InProgress, contents: Vec::new() }
    }

    pub fn is_completed(&self) -> bool {
        self.status == RunStatus::Completed
    }
}
