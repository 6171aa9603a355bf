mod cli;

use std::{
    fs,
    io::{self, Read, Write},
    sync::Arc,
};

use anyhow::{anyhow, bail, Context, Result};
use chutra::{
    artifact::{ArtifactId, CodeArtifact, StreamPart},
    bus::{EventBus, EventKind, PanelEvent},
    chat::{ChatPanel, ExecutionPrompt},
    config::Config,
    conversation::{ChatHistory, Conversation, Role},
    execution::{format_for_chat, ExecutionEngine},
    preferences::{FileStorage, Preferences},
    printer::{ConsolePrinter, MarkdownPrinter},
    sandbox::PythonSandboxFactory,
    session::SessionContext,
    tool_value::ToolValue,
};
use is_terminal::IsTerminal;
use owo_colors::OwoColorize;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();

    // CLI overrides go through the environment so they beat the rc file
    if let Some(secs) = args.timeout {
        std::env::set_var("EXECUTION_TIMEOUT", secs.to_string());
    }
    if let Some(bin) = args.python.as_deref() {
        std::env::set_var("PYTHON_BIN", bin);
    }

    let cfg = Config::load();
    init_tracing(&cfg);

    let bus = EventBus::new();
    let preferences = Preferences::new(Arc::new(FileStorage::new(cfg.preferences_path())), bus.clone());
    if let Some(enabled) = args.auto_send_switch() {
        preferences.set_auto_send(enabled)?;
    }
    if let Some(enabled) = args.always_execute_switch() {
        preferences.set_always_execute(enabled)?;
    }
    let history = ChatHistory::from_config(&cfg);
    let stdout_tty = io::stdout().is_terminal();
    let md = if args.no_md { false } else if args.md { true } else { stdout_tty };

    if args.show_prefs {
        println!("auto-send: {}", preferences.auto_send());
        println!("always-execute: {}", preferences.always_execute());
        return Ok(());
    }
    if args.list_chats {
        for p in history.list() {
            println!("{}", p.display());
        }
        return Ok(());
    }
    if let Some(id) = &args.show_chat {
        return show_chat(&history, id, md);
    }

    let stdin_tty = io::stdin().is_terminal();
    let source = match &args.file {
        Some(path) => fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?,
        None if !stdin_tty => {
            let mut buf = String::new();
            io::stdin().read_to_string(&mut buf)?;
            buf
        }
        None => {
            if args.auto_send_switch().is_some() || args.always_execute_switch().is_some() {
                return Ok(());
            }
            bail!("Provide a Python file or pipe code via stdin");
        }
    };
    if source.trim().is_empty() {
        bail!("Nothing to run");
    }

    let chat_id = args.chat.clone().unwrap_or_else(|| "temp".to_string());
    if chat_id == "temp" {
        history.invalidate(&chat_id);
    }
    let conversation = Arc::new(Conversation::new(history.clone(), chat_id.clone()));

    let session = Arc::new(SessionContext::from_config(
        &cfg,
        Arc::new(PythonSandboxFactory::from_config(&cfg)),
    ));
    let engine = Arc::new(
        ExecutionEngine::new(Arc::clone(&session), bus.clone(), conversation.clone())
            .with_timeout(cfg.execution_timeout()),
    );
    let chat = ChatPanel::new(bus.clone(), preferences.clone(), cfg.auto_run_delay());
    let artifact = CodeArtifact::new(
        ArtifactId::new(),
        engine,
        bus.clone(),
        preferences.clone(),
        conversation.clone(),
    );
    let listener = artifact.spawn_listener();

    // This loop is the chat panel's UI: it answers the run prompt.
    let (_ids, mut events) = bus.subscribe_channel(&[
        EventKind::ExecutionRequested,
        EventKind::ExecutionComplete,
        EventKind::AutoSendToggled,
    ]);

    artifact.on_stream_part(StreamPart::CodeDelta(source));
    artifact.on_stream_part(StreamPart::Finish);

    let mut failure = None;
    while let Some(event) = events.recv().await {
        let auto_run = chat.handle_event(&event);
        match event {
            PanelEvent::ExecutionRequested { .. } => {
                if auto_run.is_some() {
                    tokio::time::sleep(cfg.auto_run_delay()).await;
                    chat.run_pending();
                } else if let Some(prompt) = chat.prompt() {
                    // piped code cannot be confirmed interactively; treat the pipe as consent
                    let accepted = args.file.is_none() || !stdin_tty || confirm(prompt).await?;
                    if accepted {
                        chat.run_pending();
                    } else {
                        chat.dismiss();
                        break;
                    }
                }
            }
            PanelEvent::ExecutionComplete { artifact_id, error } if &artifact_id == artifact.id() => {
                failure = error;
                break;
            }
            _ => {}
        }
    }

    let state = artifact.store().snapshot();
    ConsolePrinter { color: stdout_tty }.print(&state.outputs);

    // same rule the engine applied when it decided to send
    if failure.is_none() && state.auto_send_message().is_some() {
        let note = format!("Sent results to chat {chat_id}");
        eprintln!("{}", if stdout_tty { note.dimmed().to_string() } else { note });
        if md {
            MarkdownPrinter::default().print(&format_for_chat(&state.outputs));
        }
    }

    drop(artifact);
    listener.abort();
    session.close().await;

    match failure {
        Some(err) => Err(anyhow!("execution failed: {err}")),
        None => Ok(()),
    }
}

fn init_tracing(cfg: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cfg.get("LOG_LEVEL").unwrap_or_else(|| "warn".into())));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

async fn confirm(prompt: ExecutionPrompt) -> Result<bool> {
    let question = format!(
        "Would you like to run this code? [Y/n] (auto-send {})",
        if prompt.auto_send_enabled { "on" } else { "off" }
    );
    tokio::task::spawn_blocking(move || -> Result<bool> {
        print!("{} ", question.cyan());
        io::stdout().flush()?;
        let mut answer = String::new();
        io::stdin().read_line(&mut answer)?;
        let answer = answer.trim().to_ascii_lowercase();
        Ok(answer.is_empty() || answer == "y" || answer == "yes")
    })
    .await?
}

fn show_chat(history: &ChatHistory, id: &str, md: bool) -> Result<()> {
    if !history.exists(id) {
        bail!("chat not found: {}", history.file_path(id).display());
    }
    let messages = history.read(id)?;
    if md {
        let mut md_text = String::new();
        for m in messages {
            let body = match m.role {
                Role::Tool => ToolValue::parse(&m.content).render(),
                _ => m.content,
            };
            md_text.push_str(&format!("### {}\n\n{}\n\n", m.role.as_str(), body));
        }
        MarkdownPrinter::default().print(&md_text);
    } else {
        for m in messages {
            let role = m.role.as_str();
            let header = match m.role {
                Role::System => format!("{}", role.cyan()),
                Role::User => format!("{}", role.magenta()),
                Role::Assistant => format!("{}", role.green()),
                Role::Tool => format!("{}", role.yellow()),
            };
            let body = match m.role {
                Role::Tool => ToolValue::parse(&m.content).render(),
                _ => m.content,
            };
            println!("{}: {}\n", header, body);
        }
    }
    Ok(())
}
