//! Decoding of webhook bodies into [`InboundUpdate`].
//!
//! Only the handful of fields the router reads are modelled; everything else
//! in the platform's update schema is ignored by serde.

use anyhow::{Context, Result};
use serde::Deserialize;

use super::{CallbackQuery, InboundUpdate, IncomingMessage};

#[derive(Debug, Deserialize)]
struct RawUpdate {
    #[serde(default)]
    message: Option<RawMessage>,
    #[serde(default)]
    callback_query: Option<RawCallbackQuery>,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    message_id: i32,
    chat: RawChat,
    #[serde(default)]
    from: Option<RawUser>,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawChat {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct RawUser {
    id: u64,
    #[serde(default)]
    first_name: String,
}

#[derive(Debug, Deserialize)]
struct RawCallbackQuery {
    id: String,
    from: RawUser,
    #[serde(default)]
    message: Option<RawMessage>,
    #[serde(default)]
    data: Option<String>,
}

/// Decode one webhook body.
///
/// Returns `Ok(None)` for updates the router has no use for (edited posts,
/// stickers, callbacks without payload, ...). Errors only on invalid JSON.
pub fn decode(body: &[u8]) -> Result<Option<InboundUpdate>> {
    let raw: RawUpdate = serde_json::from_slice(body).context("Failed to parse update body")?;

    if let Some(query) = raw.callback_query {
        let (Some(message), Some(data)) = (query.message, query.data) else {
            return Ok(None);
        };
        return Ok(Some(InboundUpdate::CallbackQuery(CallbackQuery {
            id: query.id,
            user_id: query.from.id,
            chat_id: message.chat.id,
            message_id: message.message_id,
            data,
        })));
    }

    let Some(message) = raw.message else {
        return Ok(None);
    };
    let (Some(from), Some(text)) = (message.from, message.text) else {
        return Ok(None);
    };

    Ok(Some(InboundUpdate::Message(IncomingMessage {
        chat_id: message.chat.id,
        user_id: from.id,
        user_name: from.first_name,
        message_id: message.message_id,
        text,
    })))
}
