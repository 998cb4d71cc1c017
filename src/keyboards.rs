//! Inline keyboards and user-facing texts.

use crate::models::ModelRegistry;
use crate::platform::{Button, Keyboard};

pub const CHECK_JOIN: &str = "check_join";
pub const BACK_TO_MODELS: &str = "back_to_models";

pub const WELCOME_BACK: &str = "👋 <b>Welcome Back!</b>\n\n🧠 Choose an AI Model:";
pub const VERIFIED: &str = "🎉 <b>Verification Successful!</b>\n\n🧠 <b>Select an AI Model:</b>";
pub const CHOOSE_MODEL: &str = "🧠 <b>Choose an AI Model:</b>";
pub const SWITCH_MODEL: &str = "🔄 <b>Switch Model:</b>";
pub const SELECT_MODEL_FIRST: &str = "🧠 <b>Select an AI Model first:</b>";
pub const ACCESS_DENIED: &str = "⚠️ <b>Access Denied</b>\nPlease verify subscription:";
pub const BROADCAST_MODE: &str = "📣 <b>Broadcast Mode</b>\n\nSend message to broadcast.";
pub const BROADCAST_STARTING: &str = "🚀 Starting broadcast...";
pub const NO_REPLY: &str = "❌ AI Error.";
pub const BACKEND_UNAVAILABLE: &str = "❌ Server Error.";

pub const NOTICE_VERIFIED: &str = "✅ Verified!";
pub const NOTICE_NOT_JOINED: &str = "❌ Not Joined Yet!";
pub const NOTICE_JOIN_FIRST: &str = "⚠️ Join Channel First!";
pub const NOTICE_SAVE_FAILED: &str = "⚠️ Could not save your choice, please try again.";

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            _ => out.push(c),
        }
    }
    out
}

pub fn join_prompt(name: &str) -> String {
    format!(
        "👋 <b>Hello {}</b>\n\n🔒 To use this bot, you must join our channel first.",
        escape_html(name)
    )
}

pub fn model_set(alias: &str) -> String {
    format!(
        "✅ <b>Model set to: {}</b>\n\n👇 You can now chat!",
        escape_html(alias)
    )
}

pub fn model_selected_notice(alias: &str) -> String {
    format!("Selected: {}", alias)
}

pub fn new_user_notice(name: &str, user_id: u64, total: usize) -> String {
    format!(
        "➕ <b>New User</b>\n👤 {}\n🆔 <code>{}</code>\n📊 Total: {}",
        escape_html(name),
        user_id,
        total
    )
}

pub fn broadcast_report(sent: usize, failed: usize) -> String {
    format!("✅ <b>Done</b>\nSent: {}\nFailed: {}", sent, failed)
}

pub fn broadcast_resumed_report(sent: usize, failed: usize) -> String {
    format!(
        "♻️ <b>Interrupted broadcast resumed</b>\nSent: {}\nFailed: {}",
        sent, failed
    )
}

/// Join link plus verify button. Numeric channel ids have no public link.
pub fn join_keyboard(channel: Option<&str>) -> Keyboard {
    let mut rows = Vec::new();
    if let Some(channel) = channel {
        if channel.parse::<i64>().is_err() {
            rows.push(vec![Button::url(
                "📢 Join Official Channel",
                format!("https://t.me/{}", channel.trim_start_matches('@')),
            )]);
        }
    }
    rows.push(vec![Button::callback("✅ Verify / I have Joined", CHECK_JOIN)]);
    Keyboard { rows }
}

/// One button per model, two per row
pub fn model_keyboard(registry: &ModelRegistry) -> Keyboard {
    let buttons: Vec<Button> = registry
        .iter()
        .map(|m| Button::callback(m.button_label(), m.alias.clone()))
        .collect();
    Keyboard {
        rows: buttons.chunks(2).map(|row| row.to_vec()).collect(),
    }
}

pub fn back_keyboard() -> Keyboard {
    Keyboard {
        rows: vec![vec![Button::callback("🔄 Change Model", BACK_TO_MODELS)]],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_keyboard_layout() {
        let keyboard = model_keyboard(&ModelRegistry::builtin());
        assert_eq!(keyboard.rows.len(), 2);
        assert_eq!(
            keyboard.callback_data(),
            vec!["GLM", "DeepSeek", "Qwen", "Kimi"]
        );
    }

    #[test]
    fn test_join_keyboard_links_channel() {
        let keyboard = join_keyboard(Some("@news"));
        assert_eq!(
            keyboard.rows[0][0],
            Button::url("📢 Join Official Channel", "https://t.me/news")
        );
        assert_eq!(keyboard.callback_data(), vec![CHECK_JOIN]);
    }

    #[test]
    fn test_join_keyboard_without_public_link() {
        let keyboard = join_keyboard(Some("-100123"));
        assert_eq!(keyboard.rows.len(), 1);
        assert_eq!(keyboard.callback_data(), vec![CHECK_JOIN]);
    }

    #[test]
    fn test_names_are_escaped() {
        assert_eq!(escape_html("<b>&"), "&lt;b&gt;&amp;");
        assert!(new_user_notice("<x>", 1, 2).contains("&lt;x&gt;"));
    }
}
