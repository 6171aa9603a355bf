//! Printers: console runs (owo-colors) and markdown transcripts (termimad).

use owo_colors::OwoColorize;
use termimad::MadSkin;

use crate::execution::{ChunkKind, ExecutionRun, RunStatus};

pub struct ConsolePrinter {
    pub color: bool,
}

impl ConsolePrinter {
    pub fn render(&self, runs: &[ExecutionRun]) -> String {
        let mut out = String::new();
        for (idx, run) in runs.iter().enumerate() {
            let label = match run.status {
                RunStatus::InProgress => "running",
                RunStatus::LoadingPackages => "loading packages",
                RunStatus::Completed => "completed",
                RunStatus::Failed => "failed",
            };
            let header = format!("[{}] {}", idx + 1, label);
            let header = if !self.color {
                header
            } else {
                match run.status {
                    RunStatus::Completed => header.green().to_string(),
                    RunStatus::Failed => header.red().to_string(),
                    _ => header.yellow().to_string(),
                }
            };
            out.push_str(&header);
            out.push('\n');

            for chunk in &run.contents {
                match chunk.kind {
                    ChunkKind::Text => {
                        out.push_str(&chunk.value);
                        if !chunk.value.ends_with('\n') {
                            out.push('\n');
                        }
                    }
                    ChunkKind::Image => {
                        let note = format!("<image, {} bytes base64>", chunk.value.len());
                        if self.color {
                            out.push_str(&note.cyan().to_string());
                        } else {
                            out.push_str(&note);
                        }
                        out.push('\n');
                    }
                }
            }
        }
        out
    }

    pub fn print(&self, runs: &[ExecutionRun]) {
        print!("{}", self.render(runs));
    }
}

pub struct MarkdownPrinter {
    pub skin: MadSkin,
}

impl Default for MarkdownPrinter {
    fn default() -> Self {
        Self { skin: MadSkin::default() }
    }
}

impl MarkdownPrinter {
    pub fn print(&self, text: &str) {
        self.skin.print_text(text);
        println!();
    }
}
