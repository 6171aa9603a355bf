//! Render completed runs as a transcript for the chat.

use super::{ChunkKind, ExecutionRun};

const HEADER: &str = "```python\n# Code Execution Results\n";
const RUN_SEPARATOR: &str = "\n----- Run Result -----\n";
const IMAGE_PLACEHOLDER: &str = "[Image output generated]\n";
const FOOTER: &str = "```";

pub const CHAT_PREFIX: &str = "Code execution results:\n";

/// Fenced transcript of every completed run, or `""` when there are none.
///
/// Image payloads are never inlined; they render as a placeholder line.
pub fn format_for_chat(runs: &[ExecutionRun]) -> String {
    let completed: Vec<&ExecutionRun> = runs.iter().filter(|r| r.is_completed()).collect();
    if completed.is_empty() {
        return String::new();
    }

    let mut out = String::from(HEADER);
    for (idx, run) in completed.iter().enumerate() {
        if idx > 0 {
            out.push_str(RUN_SEPARATOR);
        }
        for chunk in &run.contents {
            match chunk.kind {
                ChunkKind::Text => {
                    out.push_str(&chunk.value);
                    if !chunk.value.ends_with('\n') {
                        out.push('\n');
                    }
                }
                ChunkKind::Image => out.push_str(IMAGE_PLACEHOLDER),
            }
        }
    }
    out.push_str(FOOTER);
    out
}

/// The user message to inject for `runs`, if there is anything to send.
pub fn chat_message_for(runs: &[ExecutionRun]) -> Option<String> {
    let transcript = format_for_chat(runs);
    if transcript.is_empty() {
        None
    } else {
        Some(format!("{CHAT_PREFIX}{transcript}"))
    }
}
