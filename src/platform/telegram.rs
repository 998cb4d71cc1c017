use anyhow::{Context, Result};
use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{
    CallbackQueryId, ChatAction, InlineKeyboardButton, InlineKeyboardMarkup, MessageId, ParseMode,
    Recipient,
};
use tracing::{debug, info};

use crate::platform::{
    Button, CallbackNotice, Keyboard, MembershipStatus, OutgoingMessage, TextFormat, Transport,
};

/// Telegram rejects messages longer than 4096 chars
const MAX_MESSAGE_LEN: usize = 4000;

/// Split long messages for Telegram's 4096 char limit
fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut start = 0;

    while start < text.len() {
        let mut end = (start + max_len).min(text.len());
        // Walk back to a valid UTF-8 char boundary so slicing doesn't panic
        while end > start && !text.is_char_boundary(end) {
            end -= 1;
        }
        let actual_end = if end < text.len() {
            text[start..end]
                .rfind('\n')
                .or_else(|| text[start..end].rfind(' '))
                .map(|pos| start + pos + 1)
                .unwrap_or(end)
        } else {
            end
        };

        chunks.push(text[start..actual_end].to_string());
        start = actual_end;
    }

    chunks
}

#[allow(deprecated)]
fn parse_mode(format: TextFormat) -> Option<ParseMode> {
    match format {
        TextFormat::Plain => None,
        TextFormat::Html => Some(ParseMode::Html),
        TextFormat::Markdown => Some(ParseMode::Markdown),
    }
}

fn inline_markup(keyboard: &Keyboard) -> Result<InlineKeyboardMarkup> {
    let mut rows = Vec::with_capacity(keyboard.rows.len());
    for row in &keyboard.rows {
        let mut buttons = Vec::with_capacity(row.len());
        for button in row {
            buttons.push(match button {
                Button::Callback { label, data } => {
                    InlineKeyboardButton::callback(label.clone(), data.clone())
                }
                Button::Url { label, url } => {
                    let url: reqwest::Url = url
                        .parse()
                        .with_context(|| format!("Invalid button URL: {}", url))?;
                    InlineKeyboardButton::url(label.clone(), url)
                }
            });
        }
        rows.push(buttons);
    }
    Ok(InlineKeyboardMarkup::new(rows))
}

/// Channels are addressed either by `@username` or by numeric id
fn channel_recipient(channel: &str) -> Recipient {
    match channel.parse::<i64>() {
        Ok(id) => Recipient::Id(ChatId(id)),
        Err(_) => {
            let name = if channel.starts_with('@') {
                channel.to_string()
            } else {
                format!("@{}", channel)
            };
            Recipient::ChannelUsername(name)
        }
    }
}

/// [`Transport`] backed by the Telegram Bot API
#[derive(Clone)]
pub struct TelegramTransport {
    bot: Bot,
}

impl TelegramTransport {
    pub fn new(token: &str) -> Self {
        Self {
            bot: Bot::new(token),
        }
    }

    #[cfg(test)]
    fn with_api_url(token: &str, api_url: reqwest::Url) -> Self {
        Self {
            bot: Bot::new(token).set_api_url(api_url),
        }
    }

    /// Point the platform's update delivery at this service
    pub async fn register_webhook(&self, url: &str) -> Result<()> {
        let url: reqwest::Url = url
            .parse()
            .with_context(|| format!("Invalid webhook URL: {}", url))?;
        self.bot
            .set_webhook(url.clone())
            .await
            .context("Failed to set webhook")?;
        info!("Webhook set to: {}", url);
        Ok(())
    }

    async fn send_chunk(
        &self,
        chat_id: i64,
        text: String,
        mode: Option<ParseMode>,
        markup: Option<InlineKeyboardMarkup>,
    ) -> Result<()> {
        let mut request = self.bot.send_message(ChatId(chat_id), text);
        if let Some(mode) = mode {
            request = request.parse_mode(mode);
        }
        if let Some(markup) = markup {
            request = request.reply_markup(markup);
        }
        request
            .await
            .with_context(|| format!("Failed to send message to {}", chat_id))?;
        Ok(())
    }
}

#[async_trait]
impl Transport for TelegramTransport {
    async fn send_message(&self, chat_id: i64, message: &OutgoingMessage) -> Result<()> {
        let chunks = split_message(&message.text, MAX_MESSAGE_LEN);
        let last = chunks.len().saturating_sub(1);
        let mut formatted = true;

        for (i, chunk) in chunks.into_iter().enumerate() {
            // Keyboard goes under the final chunk only
            let markup = match &message.keyboard {
                Some(keyboard) if i == last => Some(inline_markup(keyboard)?),
                _ => None,
            };
            let mode = if formatted {
                parse_mode(message.format)
            } else {
                None
            };

            match self.send_chunk(chat_id, chunk.clone(), mode, markup.clone()).await {
                Ok(()) => {}
                // Chunks already delivered stay as they are, only this one
                // and the rest go out unformatted
                Err(e)
                    if formatted
                        && message.plain_fallback
                        && message.format != TextFormat::Plain =>
                {
                    debug!("Chunk {} rejected, sending the rest as plain text: {:#}", i, e);
                    formatted = false;
                    self.send_chunk(chat_id, chunk, None, markup).await?;
                }
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }

    async fn edit_message(
        &self,
        chat_id: i64,
        message_id: i32,
        message: &OutgoingMessage,
    ) -> Result<()> {
        let mut request =
            self.bot
                .edit_message_text(ChatId(chat_id), MessageId(message_id), &message.text);
        if let Some(mode) = parse_mode(message.format) {
            request = request.parse_mode(mode);
        }
        if let Some(keyboard) = &message.keyboard {
            request = request.reply_markup(inline_markup(keyboard)?);
        }
        request
            .await
            .with_context(|| format!("Failed to edit message {} in {}", message_id, chat_id))?;
        Ok(())
    }

    async fn delete_message(&self, chat_id: i64, message_id: i32) -> Result<()> {
        self.bot
            .delete_message(ChatId(chat_id), MessageId(message_id))
            .await
            .with_context(|| format!("Failed to delete message {} in {}", message_id, chat_id))?;
        Ok(())
    }

    async fn answer_callback(&self, query_id: &str, notice: Option<CallbackNotice>) -> Result<()> {
        let mut request = self
            .bot
            .answer_callback_query(CallbackQueryId(query_id.to_string()));
        if let Some(notice) = notice {
            request = request.text(notice.text).show_alert(notice.alert);
        }
        request
            .await
            .context("Failed to answer callback query")?;
        Ok(())
    }

    async fn copy_message(
        &self,
        to_chat_id: i64,
        from_chat_id: i64,
        message_id: i32,
    ) -> Result<()> {
        self.bot
            .copy_message(ChatId(to_chat_id), ChatId(from_chat_id), MessageId(message_id))
            .await
            .with_context(|| format!("Failed to copy message to {}", to_chat_id))?;
        Ok(())
    }

    async fn membership_status(&self, channel: &str, user_id: u64) -> Result<MembershipStatus> {
        let member = self
            .bot
            .get_chat_member(channel_recipient(channel), UserId(user_id))
            .await
            .with_context(|| format!("Failed to query membership of {} in {}", user_id, channel))?;

        let kind = &member.kind;
        let status = if kind.is_owner() {
            MembershipStatus::Owner
        } else if kind.is_administrator() {
            MembershipStatus::Administrator
        } else if kind.is_member() {
            MembershipStatus::Member
        } else if kind.is_restricted() {
            MembershipStatus::Restricted
        } else if kind.is_left() {
            MembershipStatus::Left
        } else {
            MembershipStatus::Banned
        };
        Ok(status)
    }

    async fn send_typing(&self, chat_id: i64) -> Result<()> {
        self.bot
            .send_chat_action(ChatId(chat_id), ChatAction::Typing)
            .await
            .context("Failed to send typing indicator")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::State;
    use axum::{Json, Router};
    use serde_json::{json, Value};
    use std::sync::{Arc, Mutex};

    /// `(text, parse_mode)` of every message the fake API accepted
    type Delivered = Arc<Mutex<Vec<(String, Option<String>)>>>;

    /// Accepts every `sendMessage`, except formatted text with an unclosed
    /// code fence, which fails the way Telegram's entity parser does
    async fn send_message_api(
        State(delivered): State<Delivered>,
        Json(body): Json<Value>,
    ) -> Json<Value> {
        let text = body["text"].as_str().unwrap_or_default().to_string();
        let mode = body["parse_mode"].as_str().map(str::to_string);

        if mode.is_some() && text.matches("```").count() % 2 == 1 {
            return Json(json!({
                "ok": false,
                "error_code": 400,
                "description": "Bad Request: can't parse entities: can't find end of the entity"
            }));
        }

        let mut delivered = delivered.lock().unwrap();
        delivered.push((text.clone(), mode));
        Json(json!({
            "ok": true,
            "result": {
                "message_id": delivered.len(),
                "date": 0,
                "chat": {"id": body["chat_id"], "type": "private", "first_name": "Ana"},
                "text": text
            }
        }))
    }

    async fn fake_bot_api() -> (TelegramTransport, Delivered) {
        let delivered: Delivered = Arc::default();
        let app = Router::new()
            .fallback(send_message_api)
            .with_state(delivered.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let url = format!("http://{}/", addr).parse().unwrap();
        (TelegramTransport::with_api_url("123:test", url), delivered)
    }

    #[test]
    fn test_short_message_is_not_split() {
        assert_eq!(split_message("hello", 10), vec!["hello".to_string()]);
    }

    #[test]
    fn test_split_prefers_newlines() {
        let chunks = split_message("aaaa\nbbbb\ncccc", 10);
        assert_eq!(chunks, vec!["aaaa\nbbbb\n", "cccc"]);
    }

    #[test]
    fn test_split_respects_char_boundaries() {
        let text = "é".repeat(10);
        let chunks = split_message(&text, 5);
        assert_eq!(chunks.concat(), text);
        assert!(chunks.iter().all(|c| c.len() <= 5));
    }

    #[test]
    fn test_channel_recipient() {
        assert_eq!(
            channel_recipient("@news"),
            Recipient::ChannelUsername("@news".to_string())
        );
        assert_eq!(
            channel_recipient("news"),
            Recipient::ChannelUsername("@news".to_string())
        );
        assert_eq!(
            channel_recipient("-1001234"),
            Recipient::Id(ChatId(-1001234))
        );
    }

    #[test]
    fn test_invalid_url_button_is_rejected() {
        let keyboard = Keyboard {
            rows: vec![vec![Button::url("bad", "not a url")]],
        };
        assert!(inline_markup(&keyboard).is_err());
    }

    #[tokio::test]
    async fn test_rejected_chunk_does_not_repeat_delivered_ones() {
        let (transport, delivered) = fake_bot_api().await;
        // First chunk is plain prose, the code block straddles chunks two and three
        let text = format!("{}```\n{}```\n", "a\n".repeat(2000), "b\n".repeat(2100));

        transport
            .send_message(42, &OutgoingMessage::markdown(text.clone()).with_plain_fallback())
            .await
            .unwrap();

        let delivered = delivered.lock().unwrap().clone();
        let modes: Vec<Option<&str>> = delivered.iter().map(|(_, m)| m.as_deref()).collect();
        assert_eq!(modes, vec![Some("Markdown"), None, None]);
        let joined: String = delivered.iter().map(|(t, _)| t.as_str()).collect();
        assert_eq!(joined, text);
    }

    #[tokio::test]
    async fn test_rejected_markup_without_fallback_fails() {
        let (transport, delivered) = fake_bot_api().await;

        let result = transport
            .send_message(42, &OutgoingMessage::markdown("```unclosed"))
            .await;

        assert!(result.is_err());
        assert!(delivered.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_short_markdown_is_sent_formatted() {
        let (transport, delivered) = fake_bot_api().await;

        transport
            .send_message(42, &OutgoingMessage::markdown("*hi*").with_plain_fallback())
            .await
            .unwrap();

        assert_eq!(
            delivered.lock().unwrap().clone(),
            vec![("*hi*".to_string(), Some("Markdown".to_string()))]
        );
    }
}
