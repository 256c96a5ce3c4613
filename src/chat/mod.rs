pub mod telegram;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("chat request failed: {0}")]
    Http(#[source] Box<ureq::Error>),
    #[error("chat api rejected the request: {0}")]
    Api(String),
    #[error("failed to decode chat response: {0}")]
    Decode(#[from] std::io::Error),
}

impl From<ureq::Error> for ChatError {
    fn from(err: ureq::Error) -> Self {
        ChatError::Http(Box::new(err))
    }
}

/// Outbound half of the chat boundary. One call sends one line of text to
/// the bridged chat; pacing between lines is the caller's business.
pub trait ChatSink {
    fn send_line(&self, text: &str) -> Result<(), ChatError>;
}

/// A message read from the chat, already filtered down to the bridged
/// conversation by the poller.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub sender: String,
    pub text: String,
    /// Came from a one-on-one conversation with the bot rather than the
    /// bridged group chat.
    pub direct: bool,
}

/// A chat message recognized as a bridge command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BotCommand {
    /// `<trigger>start`: launch the game.
    Start,
    /// `<trigger>stop`: terminate the game.
    Stop,
    /// `z:<text>`: forward text to the game's stdin.
    Input(String),
    /// Direct `die`: shut the whole bridge down.
    Shutdown,
}

impl BotCommand {
    /// Recognize a command in raw message text. Anything else is ordinary
    /// chatter and yields `None`.
    pub fn parse(text: &str, trigger: char, direct: bool) -> Option<BotCommand> {
        if direct && text.trim() == "die" {
            return Some(BotCommand::Shutdown);
        }
        if let Some(rest) = text.strip_prefix(trigger) {
            match rest.trim().to_ascii_lowercase().as_str() {
                "start" => return Some(BotCommand::Start),
                "stop" => return Some(BotCommand::Stop),
                _ => {} // unknown trigger word, not ours
            }
        }
        if text.get(..2).is_some_and(|p| p.eq_ignore_ascii_case("z:")) {
            return Some(BotCommand::Input(text[2..].trim().to_string()));
        }
        None
    }

    /// Short name for logs and the transcript.
    pub fn label(&self) -> &'static str {
        match self {
            BotCommand::Start => "start",
            BotCommand::Stop => "stop",
            BotCommand::Input(_) => "input",
            BotCommand::Shutdown => "die",
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::{ChatError, ChatSink};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Records every line instead of talking to a chat service.
    pub(crate) struct RecordingSink {
        lines: Mutex<Vec<String>>,
    }

    impl RecordingSink {
        pub(crate) fn new() -> Self {
            Self {
                lines: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn lines(&self) -> Vec<String> {
            self.lines.lock().unwrap().clone()
        }

        pub(crate) fn take(&self) -> Vec<String> {
            std::mem::take(&mut *self.lines.lock().unwrap())
        }
    }

    impl ChatSink for RecordingSink {
        fn send_line(&self, text: &str) -> Result<(), ChatError> {
            self.lines.lock().unwrap().push(text.to_string());
            Ok(())
        }
    }

    /// Fails every send, counting attempts.
    pub(crate) struct RejectingSink {
        attempts: AtomicUsize,
    }

    impl RejectingSink {
        pub(crate) fn new() -> Self {
            Self {
                attempts: AtomicUsize::new(0),
            }
        }

        pub(crate) fn attempts(&self) -> usize {
            self.attempts.load(Ordering::Relaxed)
        }
    }

    impl ChatSink for RejectingSink {
        fn send_line(&self, _text: &str) -> Result<(), ChatError> {
            self.attempts.fetch_add(1, Ordering::Relaxed);
            Err(ChatError::Api("synthetic failure".to_string()))
        }
    }
}
