//! Telegram Bot API backend for the chat boundary.
//!
//! Blocking HTTP via ureq: `getMe` to validate the token at startup,
//! long-polled `getUpdates` on a dedicated thread, `sendMessage` for the
//! outbound sink. Only the fields the bridge needs are deserialized;
//! serde ignores the rest.

use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{ChatError, ChatSink, InboundMessage};

/// Generic Telegram API response wrapper.
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    pub description: Option<String>,
    pub result: Option<T>,
}

/// An Update object from `getUpdates`.
#[derive(Debug, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
}

#[derive(Debug, Deserialize)]
pub struct Message {
    pub from: Option<User>,
    pub chat: Chat,
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct User {
    pub id: i64,
    pub first_name: String,
    pub username: Option<String>,
}

impl User {
    /// `@username` when the account has one, first name otherwise.
    pub fn display_name(&self) -> String {
        match &self.username {
            Some(name) => format!("@{name}"),
            None => self.first_name.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct Chat {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

impl Chat {
    pub fn is_private(&self) -> bool {
        self.kind.as_deref() == Some("private")
    }
}

/// Sent message result (only the id is of interest).
#[derive(Debug, Deserialize)]
pub struct SentMessage {
    pub message_id: i64,
}

/// Low-level Bot API client. Cheap to clone: the underlying agent shares
/// its connection pool.
#[derive(Clone)]
pub struct TelegramClient {
    agent: ureq::Agent,
    base_url: String,
}

impl TelegramClient {
    /// Create a client for the given bot token. `poll_timeout` is the
    /// long-poll duration the read timeout has to outlast.
    pub fn new(token: &str, poll_timeout: Duration) -> Self {
        Self::with_base_url(token, "https://api.telegram.org", poll_timeout)
    }

    /// Create a client against a custom base URL (for testing).
    pub fn with_base_url(token: &str, base_url: &str, poll_timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(10))
            // A long poll holds the connection open with no bytes moving.
            .timeout_read(poll_timeout + Duration::from_secs(10))
            .build();
        Self {
            agent,
            base_url: format!("{}/bot{}", base_url.trim_end_matches('/'), token),
        }
    }

    fn url(&self, method: &str) -> String {
        format!("{}/{}", self.base_url, method)
    }

    /// Validate the token and fetch the bot's own account.
    pub fn get_me(&self) -> Result<User, ChatError> {
        let resp: ApiResponse<User> = self.agent.get(&self.url("getMe")).call()?.into_json()?;
        if !resp.ok {
            return Err(ChatError::Api(resp.description.unwrap_or_default()));
        }
        resp.result
            .ok_or_else(|| ChatError::Api("getMe returned no user".to_string()))
    }

    /// Long-poll for new updates.
    ///
    /// `offset` should be `last_update_id + 1` to acknowledge previously
    /// received updates.
    pub fn get_updates(
        &self,
        offset: Option<i64>,
        timeout_secs: u64,
    ) -> Result<Vec<Update>, ChatError> {
        let mut body = json!({
            "timeout": timeout_secs,
            "allowed_updates": ["message"],
        });
        if let Some(off) = offset {
            body["offset"] = json!(off);
        }

        let resp: ApiResponse<Vec<Update>> = self
            .agent
            .post(&self.url("getUpdates"))
            .send_json(body)?
            .into_json()?;
        if !resp.ok {
            let desc = resp.description.unwrap_or_default();
            warn!("getUpdates failed: {desc}");
            return Err(ChatError::Api(desc));
        }
        Ok(resp.result.unwrap_or_default())
    }

    /// Send a text message, returning its id.
    pub fn send_message(&self, chat_id: i64, text: &str) -> Result<i64, ChatError> {
        debug!("sendMessage to chat_id={chat_id}");
        let resp: ApiResponse<SentMessage> = self
            .agent
            .post(&self.url("sendMessage"))
            .send_json(json!({ "chat_id": chat_id, "text": text }))?
            .into_json()?;
        if !resp.ok {
            let desc = resp.description.unwrap_or_default();
            warn!("sendMessage failed: {desc}");
            return Err(ChatError::Api(desc));
        }
        Ok(resp.result.map(|m| m.message_id).unwrap_or(0))
    }
}

/// Outbound sink bound to the bridged chat.
pub struct TelegramChat {
    client: TelegramClient,
    chat_id: i64,
}

impl TelegramChat {
    pub fn new(client: TelegramClient, chat_id: i64) -> Self {
        Self { client, chat_id }
    }
}

impl ChatSink for TelegramChat {
    fn send_line(&self, text: &str) -> Result<(), ChatError> {
        // The Bot API rejects empty message text, so a blank line becomes
        // a silent no-op instead of a delivery error.
        if text.trim().is_empty() {
            debug!("suppressing blank line");
            return Ok(());
        }
        self.client.send_message(self.chat_id, text).map(|_| ())
    }
}

/// Run the long-polling loop on its own thread until `stop` is set or the
/// message channel closes.
///
/// Only traffic from the bridged chat is forwarded, plus direct messages
/// from `owner_id` when one is configured. Errors back off exponentially,
/// capped at a minute. The thread spends most of its life blocked inside
/// `getUpdates`, so a stop request takes effect at the next poll boundary;
/// callers exit without joining it.
pub fn spawn_poller(
    client: TelegramClient,
    chat_id: i64,
    owner_id: Option<i64>,
    poll_timeout_secs: u64,
    messages: mpsc::Sender<InboundMessage>,
    stop: Arc<AtomicBool>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        let mut offset: Option<i64> = None;
        let mut backoff_secs = 1u64;

        info!(chat_id, "telegram poller started");

        loop {
            if stop.load(Ordering::Relaxed) {
                info!("telegram poller shutting down");
                return;
            }

            match client.get_updates(offset, poll_timeout_secs) {
                Ok(updates) => {
                    backoff_secs = 1;

                    for update in updates {
                        // Advance offset to acknowledge this update
                        offset = Some(update.update_id + 1);

                        let Some(msg) = update.message else { continue };
                        let direct = msg.chat.is_private();
                        let from_owner = owner_id.is_some()
                            && msg.from.as_ref().map(|u| u.id) == owner_id;
                        if msg.chat.id != chat_id && !(direct && from_owner) {
                            debug!(
                                from_chat = msg.chat.id,
                                expected = chat_id,
                                "ignoring message from unauthorized chat"
                            );
                            continue;
                        }

                        let Some(text) = msg.text else { continue };
                        let sender = msg
                            .from
                            .as_ref()
                            .map(User::display_name)
                            .unwrap_or_else(|| "unknown".to_string());

                        let inbound = InboundMessage {
                            sender,
                            text,
                            direct,
                        };
                        if messages.send(inbound).is_err() {
                            warn!("message channel closed, stopping poller");
                            return;
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, backoff_secs, "getUpdates failed, backing off");
                    thread::sleep(Duration::from_secs(backoff_secs));
                    backoff_secs = (backoff_secs * 2).min(60);
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_builds_bot_urls() {
        let client =
            TelegramClient::with_base_url("123:abc", "https://example.test/", Duration::from_secs(5));
        assert_eq!(client.url("getMe"), "https://example.test/bot123:abc/getMe");
    }

    #[test]
    fn deserialize_update_with_message() {
        let json = r#"{
            "update_id": 123,
            "message": {
                "message_id": 456,
                "from": {"id": 789, "first_name": "Alice", "is_bot": false},
                "chat": {"id": -100123, "type": "supergroup"},
                "date": 1700000000,
                "text": "z: look"
            }
        }"#;
        let update: Update = serde_json::from_str(json).unwrap();
        assert_eq!(update.update_id, 123);
        let msg = update.message.unwrap();
        assert_eq!(msg.text.as_deref(), Some("z: look"));
        assert_eq!(msg.chat.id, -100123);
        assert!(!msg.chat.is_private());
        assert_eq!(msg.from.unwrap().id, 789);
    }

    #[test]
    fn deserialize_update_without_text() {
        // Stickers, photos and the like carry no text.
        let json = r#"{
            "update_id": 124,
            "message": {
                "message_id": 457,
                "chat": {"id": 55, "type": "private"},
                "date": 1700000000
            }
        }"#;
        let update: Update = serde_json::from_str(json).unwrap();
        let msg = update.message.unwrap();
        assert!(msg.text.is_none());
        assert!(msg.from.is_none());
        assert!(msg.chat.is_private());
    }

    #[test]
    fn deserialize_api_response_ok() {
        let json = r#"{"ok": true, "result": [{"update_id": 1}]}"#;
        let resp: ApiResponse<Vec<Update>> = serde_json::from_str(json).unwrap();
        assert!(resp.ok);
        assert_eq!(resp.result.unwrap().len(), 1);
    }

    #[test]
    fn deserialize_api_response_error() {
        let json = r#"{"ok": false, "description": "Unauthorized"}"#;
        let resp: ApiResponse<Vec<Update>> = serde_json::from_str(json).unwrap();
        assert!(!resp.ok);
        assert_eq!(resp.description.unwrap(), "Unauthorized");
        assert!(resp.result.is_none());
    }

    #[test]
    fn deserialize_get_me_user() {
        let json = r#"{"ok": true, "result": {"id": 1, "is_bot": true, "first_name": "Grue", "username": "grue_bot"}}"#;
        let resp: ApiResponse<User> = serde_json::from_str(json).unwrap();
        let user = resp.result.unwrap();
        assert_eq!(user.display_name(), "@grue_bot");
    }

    #[test]
    fn display_name_falls_back_to_first_name() {
        let user = User {
            id: 9,
            first_name: "Alice".to_string(),
            username: None,
        };
        assert_eq!(user.display_name(), "Alice");
    }
}
