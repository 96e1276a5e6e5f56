use async_trait::async_trait;
use serde::Serialize;

use crate::notifications::models::{Channel, ChannelConfig, FlipMessage};

use super::{SenderError, Transport, HTTP_CLIENT};

/// Pushes flip messages through the Telegram Bot API.
#[derive(Debug, Default)]
pub struct TelegramSender;

impl TelegramSender {
    pub fn new() -> Self {
        Self
    }
}

/// Escapes text for Telegram MarkdownV2.
/// Characters to escape: _ * [ ] ( ) ~ ` > # + - = | { } . !
fn escape_markdown_v2(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '_' | '*' | '[' | ']' | '(' | ')' | '~' | '`' | '>' | '#' | '+' | '-' | '='
            | '|' | '{' | '}' | '.' | '!' => {
                escaped.push('\\');
                escaped.push(c);
            }
            _ => escaped.push(c),
        }
    }
    escaped
}

#[derive(Serialize)]
struct TelegramPayload<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'a str,
}

#[async_trait]
impl Transport for TelegramSender {
    fn kind(&self) -> &'static str {
        "telegram"
    }

    async fn send(&self, channel: &Channel, message: &FlipMessage) -> Result<(), SenderError> {
        let ChannelConfig::Telegram { bot_token, chat_id } = &channel.config else {
            return Err(SenderError::Misconfigured("expected telegram configuration".to_string()));
        };

        let api_url = format!("https://api.telegram.org/bot{bot_token}/sendMessage");
        let text = escape_markdown_v2(&message.text());
        let payload = TelegramPayload {
            chat_id,
            text: &text,
            parse_mode: "MarkdownV2",
        };

        let response = HTTP_CLIENT.post(&api_url).json(&payload).send().await?;
        let status = response.status();
        if !status.is_success() {
            // 403: the user blocked the bot. 404: the chat is gone.
            let permanent = matches!(status.as_u16(), 403 | 404);
            return Err(SenderError::Rejected { code: status.as_u16(), permanent });
        }
        Ok(())
    }
}
