use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;

use crate::checks::model::CheckStatus;
use crate::notifications::models::{Channel, ChannelConfig, FlipMessage};

use super::{is_delivered, SenderError, Transport, HTTP_CLIENT};

/// Generic webhook transport with `$VAR` placeholder substitution in URLs,
/// headers, and bodies.
#[derive(Debug, Default)]
pub struct WebhookSender;

impl WebhookSender {
    pub fn new() -> Self {
        Self
    }
}

/// Replaces `$VAR` placeholders with values from the message. `encode`
/// percent-encodes the values, for substitution into URLs.
///
/// Supported: $CODE, $NAME, $NAME_JSON (a JSON string literal, quotes
/// included), $STATUS, $NOW, $TAGS, $TAG1..$TAGn, $JSON (the whole message).
fn substitute(template: &str, message: &FlipMessage, encode: bool) -> String {
    if !template.contains('$') {
        return template.to_string();
    }

    let mut vars: Vec<(String, String)> = vec![
        ("$CODE".to_string(), message.check_id.to_string()),
        ("$NAME_JSON".to_string(), serde_json::to_string(&message.check_name).unwrap_or_default()),
        ("$NAME".to_string(), message.check_name.clone()),
        ("$STATUS".to_string(), message.status.to_string()),
        ("$NOW".to_string(), message.at.to_rfc3339()),
        ("$TAGS".to_string(), message.tags.join(" ")),
        ("$JSON".to_string(), serde_json::to_string(message).unwrap_or_default()),
    ];
    for (i, tag) in message.tags.iter().enumerate() {
        vars.push((format!("$TAG{}", i + 1), tag.clone()));
    }
    // Longest names first, so $NAME_JSON is not clobbered by $NAME and
    // $TAG12 is not clobbered by $TAG1.
    vars.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

    let mut out = template.to_string();
    for (name, value) in vars {
        if !out.contains(&name) {
            continue;
        }
        let value = if encode {
            urlencoding::encode(&value).into_owned()
        } else {
            value
        };
        out = out.replace(&name, &value);
    }
    out
}

#[async_trait]
impl Transport for WebhookSender {
    fn kind(&self) -> &'static str {
        "webhook"
    }

    fn is_noop(&self, channel: &Channel, message: &FlipMessage) -> bool {
        match &channel.config {
            ChannelConfig::Webhook { url_down, url_up, .. } => {
                let url = if message.status == CheckStatus::Up { url_up } else { url_down };
                url.is_empty()
            }
            _ => false,
        }
    }

    async fn send(&self, channel: &Channel, message: &FlipMessage) -> Result<(), SenderError> {
        let ChannelConfig::Webhook { url_down, url_up, method, headers, body_down, body_up } =
            &channel.config
        else {
            return Err(SenderError::Misconfigured("expected webhook configuration".to_string()));
        };

        let (url, body) = if message.status == CheckStatus::Up {
            (url_up, body_up)
        } else {
            (url_down, body_down)
        };
        if url.is_empty() {
            return Ok(());
        }

        let http_method = match method.to_uppercase().as_str() {
            "GET" => Method::GET,
            "POST" => Method::POST,
            "PUT" => Method::PUT,
            other => {
                return Err(SenderError::Misconfigured(format!("unsupported HTTP method: {other}")));
            }
        };

        let url = substitute(url, message, true);
        let mut request = HTTP_CLIENT.request(http_method.clone(), &url);

        if let Some(headers) = headers {
            let mut header_map = HeaderMap::new();
            for (key, value) in headers {
                let name = HeaderName::from_bytes(key.as_bytes())
                    .map_err(|e| SenderError::Misconfigured(format!("invalid header name '{key}': {e}")))?;
                let value = HeaderValue::from_str(&substitute(value, message, false))
                    .map_err(|e| SenderError::Misconfigured(format!("invalid header value for '{key}': {e}")))?;
                header_map.insert(name, value);
            }
            request = request.headers(header_map);
        }

        if http_method != Method::GET {
            if let Some(body) = body {
                request = request.body(substitute(body, message, false));
            }
        }

        let response = request.send().await?;
        let status = response.status();
        if !is_delivered(status) {
            // Webhook rejections are never treated as permanent.
            return Err(SenderError::Rejected { code: status.as_u16(), permanent: false });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checks::model::FlipReason;
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    fn message() -> FlipMessage {
        FlipMessage {
            check_id: Uuid::nil(),
            check_name: "db backup".to_string(),
            tags: vec!["prod".to_string(), "db".to_string()],
            status: CheckStatus::Down,
            reason: FlipReason::Timeout,
            at: Utc.with_ymd_and_hms(2026, 1, 5, 12, 0, 0).unwrap(),
        }
    }

    #[test]
    fn substitutes_placeholders() {
        let out = substitute("$NAME is $STATUS ($TAGS)", &message(), false);
        assert_eq!(out, "db backup is down (prod db)");
    }

    #[test]
    fn url_substitution_percent_encodes() {
        let out = substitute("https://example.org/alert/$NAME", &message(), true);
        assert_eq!(out, "https://example.org/alert/db%20backup");
    }

    #[test]
    fn name_json_is_a_quoted_literal() {
        let out = substitute("{\"name\": $NAME_JSON}", &message(), false);
        assert_eq!(out, "{\"name\": \"db backup\"}");
    }

    #[test]
    fn numbered_tags_resolve_individually() {
        let out = substitute("$TAG1/$TAG2", &message(), false);
        assert_eq!(out, "prod/db");
        // Unmatched numbered tags stay as-is.
        let out = substitute("$TAG3", &message(), false);
        assert_eq!(out, "$TAG3");
    }

    #[test]
    fn code_and_now_resolve() {
        let out = substitute("$CODE at $NOW", &message(), false);
        assert_eq!(out, "00000000-0000-0000-0000-000000000000 at 2026-01-05T12:00:00+00:00");
    }

    #[test]
    fn json_renders_the_whole_message() {
        let out = substitute("$JSON", &message(), false);
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["check_name"], "db backup");
        assert_eq!(value["status"], "down");
    }

    #[test]
    fn noop_follows_the_flip_direction() {
        let sender = WebhookSender::new();
        let channel = Channel {
            id: Uuid::new_v4(),
            name: "hook".to_string(),
            config: ChannelConfig::Webhook {
                url_down: "https://example.org/down".to_string(),
                url_up: String::new(),
                method: "GET".to_string(),
                headers: None,
                body_down: None,
                body_up: None,
            },
            enabled: true,
            checks: None,
        };

        let mut down = message();
        down.status = CheckStatus::Down;
        assert!(!sender.is_noop(&channel, &down));

        let mut up = message();
        up.status = CheckStatus::Up;
        assert!(sender.is_noop(&channel, &up));
    }
}
