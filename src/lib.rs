//! Sandboxed execution core for code artifacts in a chat assistant.
//!
//! An artifact's snippet runs in a session-owned interpreter
//! ([`execution::ExecutionEngine`]), its per-artifact state lives in a
//! [`state::ExecutionStore`], and the editor, console and chat panels
//! coordinate over an [`bus::EventBus`] instead of referencing each other.

pub mod artifact;
pub mod bus;
pub mod chat;
pub mod config;
pub mod conversation;
pub mod error;
pub mod execution;
pub mod preferences;
pub mod printer;
pub mod sandbox;
pub mod session;
pub mod state;
pub mod tool_value;

pub use artifact::{ArtifactId, CodeArtifact, StreamPart};
pub use bus::{EventBus, EventKind, PanelEvent};
pub use chat::ChatPanel;
pub use error::{ExecutionError, SandboxError};
pub use execution::{ExecutionEngine, ExecutionRun, OutputChunk, RunStatus};
pub use preferences::Preferences;
pub use session::SessionContext;
