use std::path::PathBuf;

use clap::{ArgGroup, Parser};

#[derive(Parser, Debug, Clone)]
#[command(name = "chutra", about = "Run code artifacts in a sandboxed Python interpreter", version)]
#[command(group(ArgGroup::new("auto_send_switch").args(["auto_send", "no_auto_send"]).multiple(false)))]
#[command(group(ArgGroup::new("always_execute_switch").args(["always_execute", "no_always_execute"]).multiple(false)))]
#[command(group(ArgGroup::new("md_switch").args(["md", "no_md"]).multiple(false)))]
#[command(group(ArgGroup::new("info").args(["show_chat", "list_chats", "show_prefs"]).multiple(false)))]
pub struct Cli {
    /// Python file to run as a code artifact. Reads stdin when omitted.
    #[arg(value_name = "FILE")]
    pub file: Option<PathBuf>,

    /// Conversation that receives execution results.
    #[arg(long, value_name = "ID")]
    pub chat: Option<String>,

    /// Persistently enable sending results to the chat.
    #[arg(long)]
    pub auto_send: bool,
    /// Persistently disable sending results to the chat.
    #[arg(long = "no-auto-send")]
    pub no_auto_send: bool,

    /// Persistently run generated code without asking.
    #[arg(long)]
    pub always_execute: bool,
    /// Persistently ask before running generated code.
    #[arg(long = "no-always-execute")]
    pub no_always_execute: bool,

    /// Execution time limit in seconds (0 = unlimited).
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Python interpreter to use.
    #[arg(long, value_name = "BIN")]
    pub python: Option<String>,

    /// Render the chat transcript as Markdown.
    #[arg(long)]
    pub md: bool,
    /// Print the chat transcript as plain text.
    #[arg(long = "no-md")]
    pub no_md: bool,

    /// Show a stored conversation.
    #[arg(long = "show-chat", value_name = "ID")]
    pub show_chat: Option<String>,

    /// List stored conversations.
    #[arg(long = "list-chats")]
    pub list_chats: bool,

    /// Print the stored preferences.
    #[arg(long = "show-prefs")]
    pub show_prefs: bool,
}

impl Cli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }

    /// Requested auto-send value, if a switch was given.
    pub fn auto_send_switch(&self) -> Option<bool> {
        switch(self.auto_send, self.no_auto_send)
    }

    pub fn always_execute_switch(&self) -> Option<bool> {
        switch(self.always_execute, self.no_always_execute)
    }
}

fn switch(on: bool, off: bool) -> Option<bool> {
    match (on, off) {
        (true, _) => Some(true),
        (_, true) => Some(false),
        _ => None,
    }
}
