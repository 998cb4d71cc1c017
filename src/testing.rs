//! Fakes shared by the unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::directory::{UserDirectory, UserPatch, UserRecord};
use crate::llm::{Completer, CompletionOutcome};
use crate::platform::{
    CallbackNotice, MembershipStatus, OutgoingMessage, TextFormat, Transport,
};

/// One outbound call that the fake transport accepted
#[derive(Debug, Clone, PartialEq)]
pub enum Sent {
    Message {
        chat_id: i64,
        message: OutgoingMessage,
    },
    Edit {
        chat_id: i64,
        message_id: i32,
        message: OutgoingMessage,
    },
    Delete {
        chat_id: i64,
        message_id: i32,
    },
    Answer {
        query_id: String,
        notice: Option<CallbackNotice>,
    },
    Copy {
        to_chat_id: i64,
        from_chat_id: i64,
        message_id: i32,
    },
    Typing {
        chat_id: i64,
    },
}

/// Transport that records successful calls and fails on request
#[derive(Default)]
pub struct RecordingTransport {
    log: Mutex<Vec<Sent>>,
    failing_chats: HashSet<i64>,
    /// Users absent from this map make the membership query error out
    members: HashMap<u64, MembershipStatus>,
    fail_edits: bool,
    reject_markdown: bool,
    membership_delay: Option<Duration>,
    membership_queries: AtomicUsize,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_chat(mut self, chat_id: i64) -> Self {
        self.failing_chats.insert(chat_id);
        self
    }

    pub fn member(mut self, user_id: u64, status: MembershipStatus) -> Self {
        self.members.insert(user_id, status);
        self
    }

    pub fn failing_edits(mut self) -> Self {
        self.fail_edits = true;
        self
    }

    pub fn rejecting_markdown(mut self) -> Self {
        self.reject_markdown = true;
        self
    }

    pub fn slow_membership(mut self, delay: Duration) -> Self {
        self.membership_delay = Some(delay);
        self
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.log.lock().unwrap().clone()
    }

    /// Messages delivered to one chat, in order
    pub fn messages_to(&self, chat_id: i64) -> Vec<OutgoingMessage> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Message { chat_id: c, message } if c == chat_id => Some(message),
                _ => None,
            })
            .collect()
    }

    pub fn copies(&self) -> Vec<i64> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Copy { to_chat_id, .. } => Some(to_chat_id),
                _ => None,
            })
            .collect()
    }

    pub fn membership_queries(&self) -> usize {
        self.membership_queries.load(Ordering::SeqCst)
    }

    fn record(&self, sent: Sent) {
        self.log.lock().unwrap().push(sent);
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send_message(&self, chat_id: i64, message: &OutgoingMessage) -> Result<()> {
        if self.failing_chats.contains(&chat_id) {
            bail!("chat {} is unreachable", chat_id);
        }
        let mut message = message.clone();
        if self.reject_markdown && message.format == TextFormat::Markdown {
            if !message.plain_fallback {
                bail!("can't parse entities");
            }
            message.format = TextFormat::Plain;
        }
        self.record(Sent::Message { chat_id, message });
        Ok(())
    }

    async fn edit_message(
        &self,
        chat_id: i64,
        message_id: i32,
        message: &OutgoingMessage,
    ) -> Result<()> {
        if self.fail_edits {
            bail!("message can't be edited");
        }
        self.record(Sent::Edit {
            chat_id,
            message_id,
            message: message.clone(),
        });
        Ok(())
    }

    async fn delete_message(&self, chat_id: i64, message_id: i32) -> Result<()> {
        self.record(Sent::Delete {
            chat_id,
            message_id,
        });
        Ok(())
    }

    async fn answer_callback(&self, query_id: &str, notice: Option<CallbackNotice>) -> Result<()> {
        self.record(Sent::Answer {
            query_id: query_id.to_string(),
            notice,
        });
        Ok(())
    }

    async fn copy_message(
        &self,
        to_chat_id: i64,
        from_chat_id: i64,
        message_id: i32,
    ) -> Result<()> {
        if self.failing_chats.contains(&to_chat_id) {
            bail!("bot was blocked by the user");
        }
        self.record(Sent::Copy {
            to_chat_id,
            from_chat_id,
            message_id,
        });
        Ok(())
    }

    async fn membership_status(&self, _channel: &str, user_id: u64) -> Result<MembershipStatus> {
        self.membership_queries.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.membership_delay {
            tokio::time::sleep(delay).await;
        }
        match self.members.get(&user_id) {
            Some(status) => Ok(*status),
            None => bail!("user not found"),
        }
    }

    async fn send_typing(&self, chat_id: i64) -> Result<()> {
        self.record(Sent::Typing { chat_id });
        Ok(())
    }
}

/// Completer that always answers with the same outcome
pub struct ScriptedCompleter {
    outcome: CompletionOutcome,
    calls: Mutex<Vec<(String, String)>>,
}

impl ScriptedCompleter {
    pub fn new(outcome: CompletionOutcome) -> Self {
        Self {
            outcome,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn replying(text: &str) -> Self {
        Self::new(CompletionOutcome::Reply(text.to_string()))
    }

    /// `(slug, prompt)` pairs received so far
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Completer for ScriptedCompleter {
    async fn complete(&self, slug: &str, prompt: &str) -> CompletionOutcome {
        self.calls
            .lock()
            .unwrap()
            .push((slug.to_string(), prompt.to_string()));
        self.outcome.clone()
    }
}

/// Directory whose backend is always down
pub struct BrokenDirectory;

#[async_trait]
impl UserDirectory for BrokenDirectory {
    async fn get(&self, _id: &str) -> Result<Option<UserRecord>> {
        bail!("directory unavailable")
    }

    async fn patch(&self, _id: &str, _patch: &UserPatch) -> Result<()> {
        bail!("directory unavailable")
    }

    async fn list(&self) -> Result<Vec<String>> {
        bail!("directory unavailable")
    }

    async fn register(&self, _id: &str, _display_name: &str, _seen_at: i64) -> Result<bool> {
        bail!("directory unavailable")
    }
}
