pub mod telegram;
pub mod update;

use anyhow::Result;
use async_trait::async_trait;

/// A text message received from the platform
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingMessage {
    pub chat_id: i64,
    pub user_id: u64,
    /// Display name of the sender, may be empty
    pub user_name: String,
    pub message_id: i32,
    pub text: String,
}

/// A press on an inline keyboard button
#[derive(Debug, Clone, PartialEq)]
pub struct CallbackQuery {
    pub id: String,
    pub user_id: u64,
    pub chat_id: i64,
    pub message_id: i32,
    pub data: String,
}

/// One inbound event. The platform never delivers both kinds in one update.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundUpdate {
    Message(IncomingMessage),
    CallbackQuery(CallbackQuery),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextFormat {
    #[default]
    Plain,
    Html,
    Markdown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Button {
    Callback { label: String, data: String },
    Url { label: String, url: String },
}

impl Button {
    pub fn callback(label: impl Into<String>, data: impl Into<String>) -> Self {
        Button::Callback {
            label: label.into(),
            data: data.into(),
        }
    }

    pub fn url(label: impl Into<String>, url: impl Into<String>) -> Self {
        Button::Url {
            label: label.into(),
            url: url.into(),
        }
    }
}

/// Inline keyboard attached to a message, as rows of buttons
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Keyboard {
    pub rows: Vec<Vec<Button>>,
}

#[cfg(test)]
impl Keyboard {
    /// All callback payloads carried by this keyboard, in row order
    pub fn callback_data(&self) -> Vec<&str> {
        self.rows
            .iter()
            .flatten()
            .filter_map(|b| match b {
                Button::Callback { data, .. } => Some(data.as_str()),
                Button::Url { .. } => None,
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub text: String,
    pub format: TextFormat,
    pub keyboard: Option<Keyboard>,
    /// Resend as plain text when the platform rejects the markup
    pub plain_fallback: bool,
}

impl OutgoingMessage {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            format: TextFormat::Plain,
            keyboard: None,
            plain_fallback: false,
        }
    }

    pub fn html(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            format: TextFormat::Html,
            keyboard: None,
            plain_fallback: false,
        }
    }

    pub fn markdown(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            format: TextFormat::Markdown,
            keyboard: None,
            plain_fallback: false,
        }
    }

    pub fn with_keyboard(mut self, keyboard: Keyboard) -> Self {
        self.keyboard = Some(keyboard);
        self
    }

    pub fn with_plain_fallback(mut self) -> Self {
        self.plain_fallback = true;
        self
    }
}

/// Short notice shown when answering a callback query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackNotice {
    pub text: String,
    /// Show as a modal alert instead of a toast
    pub alert: bool,
}

impl CallbackNotice {
    pub fn toast(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            alert: false,
        }
    }

    pub fn alert(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            alert: true,
        }
    }
}

/// A user's standing in a channel, as reported by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipStatus {
    Owner,
    Administrator,
    Member,
    Restricted,
    Left,
    Banned,
}

impl MembershipStatus {
    /// Owners, administrators and regular members pass the gate
    pub fn grants_access(self) -> bool {
        matches!(
            self,
            MembershipStatus::Owner | MembershipStatus::Administrator | MembershipStatus::Member
        )
    }
}

/// Outbound side of the messaging platform
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_message(&self, chat_id: i64, message: &OutgoingMessage) -> Result<()>;

    async fn edit_message(
        &self,
        chat_id: i64,
        message_id: i32,
        message: &OutgoingMessage,
    ) -> Result<()>;

    async fn delete_message(&self, chat_id: i64, message_id: i32) -> Result<()>;

    async fn answer_callback(&self, query_id: &str, notice: Option<CallbackNotice>) -> Result<()>;

    /// Replicate an existing message verbatim into another chat
    async fn copy_message(&self, to_chat_id: i64, from_chat_id: i64, message_id: i32)
        -> Result<()>;

    async fn membership_status(&self, channel: &str, user_id: u64) -> Result<MembershipStatus>;

    async fn send_typing(&self, chat_id: i64) -> Result<()>;
}
