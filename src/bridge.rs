//! Foreground bridge runtime.
//!
//! Wires the chat poller, the session controller, and the transcript into
//! one event loop: the poller thread queues inbound messages, recognized
//! commands drive the controller, with everything observable landing in
//! the transcript. Runs until a chat-side `die`, a termination signal, or
//! the poller giving up.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::chat::BotCommand;
use crate::chat::telegram::{self, TelegramChat, TelegramClient};
use crate::config::BridgeConfig;
use crate::session::{BridgeEvent, SessionController};
use crate::transcript::{Transcript, TranscriptEvent};

/// How often the event loop wakes up to notice a shutdown signal.
const TICK: Duration = Duration::from_millis(250);

/// Run the bridge until something stops it. `base` anchors relative
/// runtime paths (the transcript, mainly).
pub fn run(config: &BridgeConfig, base: &Path) -> Result<()> {
    let client = TelegramClient::new(
        &config.chat.token,
        Duration::from_secs(config.chat.poll_timeout_secs),
    );
    let me = client
        .get_me()
        .context("could not reach the Telegram Bot API (is the token right?)")?;
    info!(bot = %me.display_name(), chat_id = config.chat.chat_id, "connected to telegram");

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = shutdown.clone();
        ctrlc::set_handler(move || {
            shutdown.store(true, Ordering::Relaxed);
        })
        .context("failed to install signal handler")?;
    }

    let transcript = match config.transcript_path(base) {
        Some(path) => {
            let transcript = Transcript::new(&path)?;
            info!(path = %transcript.path().display(), "transcript enabled");
            Some(transcript)
        }
        None => None,
    };
    log_event(
        transcript.as_ref(),
        TranscriptEvent::BridgeStarted {
            chat_id: config.chat.chat_id,
        },
    );

    // The poller thread is not joined on exit: it spends its life blocked
    // in a long poll and only notices the stop flag at a poll boundary.
    let (message_tx, messages) = mpsc::channel();
    let _poller = telegram::spawn_poller(
        client.clone(),
        config.chat.chat_id,
        config.chat.owner_id,
        config.chat.poll_timeout_secs,
        message_tx,
        shutdown.clone(),
    );

    let sink = TelegramChat::new(client, config.chat.chat_id);
    let (event_tx, events) = mpsc::channel();
    let mut controller = SessionController::new(
        config.game.clone(),
        config.timing.clone(),
        Some(event_tx),
    );

    info!(trigger = %config.chat.trigger, "bridge running");
    let reason = loop {
        if shutdown.load(Ordering::Relaxed) {
            break "signal";
        }
        match messages.recv_timeout(TICK) {
            Ok(msg) => {
                let Some(command) =
                    BotCommand::parse(&msg.text, config.chat.trigger, msg.direct)
                else {
                    continue;
                };
                debug!(sender = %msg.sender, command = command.label(), "command received");
                log_event(
                    transcript.as_ref(),
                    TranscriptEvent::CommandReceived {
                        sender: msg.sender.clone(),
                        command: command.label().to_string(),
                    },
                );
                match command {
                    BotCommand::Start => controller.start(&sink),
                    BotCommand::Stop => controller.stop(&sink),
                    BotCommand::Input(text) => controller.input(&text, &sink),
                    BotCommand::Shutdown => {
                        info!(sender = %msg.sender, "shutdown requested from chat");
                        break "chat";
                    }
                }
                flush_events(&events, transcript.as_ref());
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                warn!("poller thread stopped, shutting down");
                break "poller";
            }
        }
    };

    info!(reason, "bridge stopping");
    controller.shutdown();
    shutdown.store(true, Ordering::Relaxed);
    flush_events(&events, transcript.as_ref());
    log_event(
        transcript.as_ref(),
        TranscriptEvent::BridgeStopped {
            reason: reason.to_string(),
        },
    );
    info!("bridge stopped");
    Ok(())
}

/// Move controller events into the transcript. Events are drained even
/// with no transcript configured so the channel never backs up.
fn flush_events(events: &mpsc::Receiver<BridgeEvent>, transcript: Option<&Transcript>) {
    for event in events.try_iter() {
        log_event(transcript, TranscriptEvent::from(&event));
    }
}

fn log_event(transcript: Option<&Transcript>, event: TranscriptEvent) {
    if let Some(transcript) = transcript {
        if let Err(e) = transcript.log(event) {
            warn!(error = %e, "failed to write transcript entry");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::StopReason;
    use uuid::Uuid;

    #[test]
    fn flush_events_writes_through_to_transcript() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("run.jsonl");
        let transcript = Transcript::new(&path).unwrap();

        let (tx, rx) = mpsc::channel();
        let id = Uuid::new_v4();
        tx.send(BridgeEvent::SessionStarted {
            id,
            program: "dfrotz".to_string(),
            pid: 7,
        })
        .unwrap();
        tx.send(BridgeEvent::SessionStopped {
            id,
            reason: StopReason::Requested,
        })
        .unwrap();

        flush_events(&rx, Some(&transcript));

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("\"event\":\"session_started\""));
        assert!(lines[1].contains("\"event\":\"session_stopped\""));
    }

    #[test]
    fn flush_events_drains_without_transcript() {
        let (tx, rx) = mpsc::channel();
        tx.send(BridgeEvent::NoticeSent {
            text: "The game is running.".to_string(),
        })
        .unwrap();

        flush_events(&rx, None);
        assert!(rx.try_recv().is_err());
    }
}
