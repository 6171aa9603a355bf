//! Chat messages, the chat-injection capability, and file-backed conversations.

use std::{fs, path::PathBuf};

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::Config;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self { role, content: content.into() }
    }
}

/// Enqueue a message into the enclosing conversation.
///
/// Components that inject into the chat take one of these at construction.
pub trait MessageSink: Send + Sync {
    fn append_message(&self, role: Role, content: String) -> Result<()>;
}

/// Directory of JSON conversation files, one per chat id.
#[derive(Debug, Clone)]
pub struct ChatHistory {
    length: usize,
    storage_path: PathBuf,
}

impl ChatHistory {
    pub fn from_config(cfg: &Config) -> Self {
        let len = cfg.get_usize("CHAT_CACHE_LENGTH").unwrap_or(100);
        Self::new(cfg.chat_cache_path(), len)
    }

    pub fn new(storage_path: PathBuf, length: usize) -> Self {
        if let Err(e) = fs::create_dir_all(&storage_path) {
            tracing::warn!(path = %storage_path.display(), "cannot create chat cache: {e}");
        }
        Self { length, storage_path }
    }

    pub fn file_path(&self, chat_id: &str) -> PathBuf {
        self.storage_path.join(chat_id)
    }

    pub fn exists(&self, chat_id: &str) -> bool {
        self.file_path(chat_id).exists()
    }

    pub fn invalidate(&self, chat_id: &str) {
        let _ = fs::remove_file(self.file_path(chat_id));
    }

    pub fn read(&self, chat_id: &str) -> Result<Vec<ChatMessage>> {
        let p = self.file_path(chat_id);
        if !p.exists() {
            return Ok(Vec::new());
        }
        let text = fs::read_to_string(&p).with_context(|| format!("reading {}", p.display()))?;
        let msgs: Vec<ChatMessage> =
            serde_json::from_str(&text).with_context(|| format!("parsing {}", p.display()))?;
        Ok(msgs)
    }

    pub fn write(&self, chat_id: &str, mut messages: Vec<ChatMessage>) -> Result<()> {
        // Keep a leading system message, then the newest `length` messages.
        let pinned = match messages.first() {
            Some(m) if m.role == Role::System => Some(messages.remove(0)),
            _ => None,
        };
        let over = messages.len().saturating_sub(self.length);
        let mut kept: Vec<ChatMessage> = pinned.into_iter().collect();
        kept.extend(messages.into_iter().skip(over));

        let p = self.file_path(chat_id);
        fs::write(&p, serde_json::to_string(&kept)?).with_context(|| format!("writing {}", p.display()))?;
        Ok(())
    }

    pub fn list(&self) -> Vec<PathBuf> {
        if let Ok(read_dir) = fs::read_dir(&self.storage_path) {
            let mut files: Vec<PathBuf> = read_dir.filter_map(|e| e.ok().map(|e| e.path())).collect();
            files.sort_by_key(|p| fs::metadata(p).and_then(|m| m.modified()).ok());
            files
        } else {
            Vec::new()
        }
    }
}

/// One conversation; appends go straight to disk.
#[derive(Debug)]
pub struct Conversation {
    history: ChatHistory,
    chat_id: String,
    write_lock: Mutex<()>,
}

impl Conversation {
    pub fn new(history: ChatHistory, chat_id: impl Into<String>) -> Self {
        Self { history, chat_id: chat_id.into(), write_lock: Mutex::new(()) }
    }

    pub fn chat_id(&self) -> &str {
        &self.chat_id
    }

    pub fn messages(&self) -> Result<Vec<ChatMessage>> {
        self.history.read(&self.chat_id)
    }
}

impl MessageSink for Conversation {
    fn append_message(&self, role: Role, content: String) -> Result<()> {
        let _guard = self.write_lock.lock();
        let mut messages = self.history.read(&self.chat_id)?;
        messages.push(ChatMessage::new(role, content));
        self.history.write(&self.chat_id, messages)?;
        tracing::debug!(chat = %self.chat_id, role = role.as_str(), "message appended");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn write_keeps_system_message_and_newest_tail() {
        let dir = tempfile::tempdir().unwrap();
        let history = ChatHistory::new(dir.path().to_path_buf(), 2);
        let msgs = vec![
            ChatMessage::new(Role::System, "sys"),
            ChatMessage::new(Role::User, "a"),
            ChatMessage::new(Role::Assistant, "b"),
            ChatMessage::new(Role::User, "c"),
        ];
        history.write("chat", msgs).unwrap();

        let stored = history.read("chat").unwrap();
        assert_eq!(
            stored,
            vec![
                ChatMessage::new(Role::System, "sys"),
                ChatMessage::new(Role::Assistant, "b"),
                ChatMessage::new(Role::User, "c"),
            ]
        );
    }

    #[test]
    fn conversation_appends_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let conversation = Conversation::new(ChatHistory::new(dir.path().to_path_buf(), 10), "c1");
        assert!(conversation.messages().unwrap().is_empty());

        conversation.append_message(Role::User, "first".into()).unwrap();
        conversation.append_message(Role::User, "second".into()).unwrap();

        let contents: Vec<_> = conversation.messages().unwrap().into_iter().map(|m| m.content).collect();
        assert_eq!(contents, vec!["first", "second"]);
        assert_eq!(ChatHistory::new(dir.path().to_path_buf(), 10).list().len(), 1);
    }
}
