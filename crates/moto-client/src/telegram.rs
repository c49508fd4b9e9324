//! Minimal Telegram Bot API client: long polling plus send/edit of text
//! messages.

use std::time::Duration;

use moto_core::error::AppError;
use moto_core::models::{ChatId, InboundMessage, InboundUpdate, OperatorId, SentMessage};
use moto_core::traits::{Messenger, UpdateSource};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

const DEFAULT_API_BASE: &str = "https://api.telegram.org";
const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(30);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Telegram Bot API client.
///
/// The token is part of every request URL, so reqwest errors are stripped
/// of their URL before they are turned into [`AppError`]s.
#[derive(Clone)]
pub struct TelegramClient {
    client: Client,
    api_base: String,
    token: String,
    poll_timeout: Duration,
}

impl std::fmt::Debug for TelegramClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramClient")
            .field("api_base", &self.api_base)
            .field("poll_timeout", &self.poll_timeout)
            .finish_non_exhaustive()
    }
}

impl TelegramClient {
    pub fn new(token: &str) -> Result<Self, AppError> {
        Self::with_api_base(token, DEFAULT_API_BASE)
    }

    /// Point the client at another Bot API server (e.g. a local one).
    pub fn with_api_base(token: &str, api_base: &str) -> Result<Self, AppError> {
        if token.trim().is_empty() {
            return Err(AppError::ConfigError("Telegram bot token is empty".into()));
        }
        let client = Client::builder()
            .build()
            .map_err(|e| AppError::HttpError(e.to_string()))?;

        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            token: token.trim().to_string(),
            poll_timeout: DEFAULT_POLL_TIMEOUT,
        })
    }

    /// How long the server may hold a `getUpdates` call open.
    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    async fn call<Req, Resp>(
        &self,
        method: &str,
        body: &Req,
        timeout: Duration,
    ) -> Result<Resp, AppError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let url = format!("{}/bot{}/{method}", self.api_base, self.token);
        let response = self
            .client
            .post(&url)
            .timeout(timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                let e = e.without_url();
                if e.is_timeout() {
                    AppError::Timeout(timeout.as_secs())
                } else if e.is_connect() {
                    AppError::NetworkError(format!("Connection failed: {e}"))
                } else {
                    AppError::HttpError(e.to_string())
                }
            })?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| AppError::HttpError(e.without_url().to_string()))?;
        decode_response(method, status, &text)
    }
}

/// Unwrap the Bot API envelope `{ok, result, description}`.
fn decode_response<T: DeserializeOwned>(method: &str, status: u16, body: &str) -> Result<T, AppError> {
    let envelope: ApiResponse<T> = match serde_json::from_str(body) {
        Ok(envelope) => envelope,
        Err(_) if status == 429 || status >= 500 => {
            return Err(AppError::HttpStatus {
                status,
                url: method.to_string(),
            });
        }
        Err(e) => return Err(AppError::SerializationError(e)),
    };

    match envelope {
        ApiResponse {
            ok: true,
            result: Some(result),
            ..
        } => Ok(result),
        ApiResponse { description, .. } => {
            if status == 429 || status >= 500 {
                return Err(AppError::HttpStatus {
                    status,
                    url: method.to_string(),
                });
            }
            Err(AppError::MessagingError(format!(
                "{method} failed: {}",
                description.unwrap_or_else(|| format!("HTTP {status}"))
            )))
        }
    }
}

// ---- Bot API types ----

#[derive(Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Serialize)]
struct GetUpdates<'a> {
    offset: i64,
    timeout: u64,
    allowed_updates: &'a [&'a str],
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: i64,
    text: &'a str,
}

#[derive(Serialize)]
struct EditMessageText<'a> {
    chat_id: i64,
    message_id: i64,
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    message: Option<Message>,
}

#[derive(Debug, Deserialize)]
struct Message {
    message_id: i64,
    from: Option<User>,
    chat: Chat,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct User {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct Chat {
    id: i64,
}

impl From<Update> for InboundUpdate {
    fn from(update: Update) -> Self {
        let message = update.message.and_then(|m| {
            Some(InboundMessage {
                operator: OperatorId(m.from?.id),
                chat: ChatId(m.chat.id),
                text: m.text?,
            })
        });
        Self {
            update_id: update.update_id,
            message,
        }
    }
}

impl UpdateSource for TelegramClient {
    async fn poll(&self, offset: i64) -> Result<Vec<InboundUpdate>, AppError> {
        let request = GetUpdates {
            offset,
            timeout: self.poll_timeout.as_secs(),
            allowed_updates: &["message"],
        };
        let updates: Vec<Update> = self
            .call("getUpdates", &request, self.poll_timeout + REQUEST_TIMEOUT)
            .await?;
        Ok(updates.into_iter().map(InboundUpdate::from).collect())
    }
}

impl Messenger for TelegramClient {
    async fn send_text(&self, chat: ChatId, text: &str) -> Result<SentMessage, AppError> {
        let request = SendMessage {
            chat_id: chat.0,
            text,
        };
        let sent: Message = self.call("sendMessage", &request, REQUEST_TIMEOUT).await?;
        Ok(SentMessage {
            chat: ChatId(sent.chat.id),
            message_id: sent.message_id,
        })
    }

    async fn edit_text(&self, message: &SentMessage, text: &str) -> Result<(), AppError> {
        let request = EditMessageText {
            chat_id: message.chat.0,
            message_id: message.message_id,
            text,
        };
        // The API answers with the edited message, or `true` for inline messages.
        let _: serde_json::Value = self
            .call("editMessageText", &request, REQUEST_TIMEOUT)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_updates_and_skips_non_text() {
        let body = r#"{
            "ok": true,
            "result": [
                {"update_id": 100, "message": {"message_id": 1, "from": {"id": 42, "is_bot": false, "first_name": "Ivan"}, "chat": {"id": 42, "type": "private"}, "date": 1700000000, "text": "https://jmmoto.ru/moto/1"}},
                {"update_id": 101, "message": {"message_id": 2, "from": {"id": 42, "is_bot": false, "first_name": "Ivan"}, "chat": {"id": 42, "type": "private"}, "date": 1700000001, "sticker": {}}},
                {"update_id": 102, "edited_message": {"message_id": 1}}
            ]
        }"#;

        let updates: Vec<Update> = decode_response("getUpdates", 200, body).unwrap();
        let updates: Vec<InboundUpdate> = updates.into_iter().map(Into::into).collect();

        assert_eq!(updates.len(), 3);
        assert_eq!(
            updates[0].message,
            Some(InboundMessage {
                operator: OperatorId(42),
                chat: ChatId(42),
                text: "https://jmmoto.ru/moto/1".into(),
            })
        );
        assert_eq!(updates[1].message, None);
        assert_eq!(updates[2].update_id, 102);
        assert_eq!(updates[2].message, None);
    }

    #[test]
    fn api_error_carries_description() {
        let body = r#"{"ok": false, "error_code": 400, "description": "Bad Request: message text is empty"}"#;
        let err = decode_response::<Message>("sendMessage", 400, body).unwrap_err();
        match err {
            AppError::MessagingError(msg) => assert!(msg.contains("message text is empty")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn throttling_is_retryable() {
        let body = r#"{"ok": false, "error_code": 429, "description": "Too Many Requests: retry after 3"}"#;
        let err = decode_response::<Message>("sendMessage", 429, body).unwrap_err();
        assert!(err.is_retryable());

        let err = decode_response::<Message>("getUpdates", 502, "<html>Bad Gateway</html>").unwrap_err();
        assert!(matches!(err, AppError::HttpStatus { status: 502, .. }));
    }

    #[test]
    fn empty_token_is_rejected() {
        let err = TelegramClient::new("  ").unwrap_err();
        assert!(matches!(err, AppError::ConfigError(_)));
    }

    #[test]
    fn debug_output_hides_token() {
        let client = TelegramClient::new("123456:SECRET").unwrap();
        assert!(!format!("{client:?}").contains("SECRET"));
    }

    #[tokio::test]
    async fn transport_errors_do_not_leak_token() {
        let client = TelegramClient::with_api_base("123456:SECRET", "http://127.0.0.1:9").unwrap();
        let err = client.send_text(ChatId(1), "hi").await.unwrap_err();
        assert!(!err.to_string().contains("SECRET"), "{err}");
    }
}
