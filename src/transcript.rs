//! Structured bridge transcript — JSON lines per run.
//!
//! Every bridge run can append to a `.jsonl` transcript capturing what
//! happened at the chat boundary: commands received, sessions started and
//! stopped, batches relayed, notices sent. Each line is a self-contained
//! JSON object with a timestamp, making transcripts easy to grep, stream,
//! and post-process.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use tracing::debug;

use crate::session::BridgeEvent;

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// A structured entry in the transcript.
#[derive(Debug, Clone, Serialize)]
pub struct TranscriptEntry {
    /// RFC 3339 timestamp in UTC.
    pub timestamp: String,
    /// The event type and its data.
    #[serde(flatten)]
    pub event: TranscriptEvent,
}

/// All event types that can appear in the transcript.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data")]
#[serde(rename_all = "snake_case")]
pub enum TranscriptEvent {
    /// The bridge connected to the chat and began relaying.
    BridgeStarted { chat_id: i64 },
    /// The bridge shut down.
    BridgeStopped { reason: String },
    /// A recognized command arrived from the chat.
    CommandReceived { sender: String, command: String },
    /// A game process was launched.
    SessionStarted {
        session: String,
        program: String,
        pid: u32,
    },
    /// The opening banner was relayed.
    BannerDelivered { session: String, lines: usize },
    /// Player input went to the game and its reply was relayed.
    InputForwarded {
        session: String,
        input: String,
        lines: usize,
    },
    /// A game session ended.
    SessionStopped { session: String, reason: String },
    /// A lifecycle notice was sent to the chat.
    NoticeSent { text: String },
}

impl From<&BridgeEvent> for TranscriptEvent {
    fn from(event: &BridgeEvent) -> Self {
        match event {
            BridgeEvent::SessionStarted { id, program, pid } => TranscriptEvent::SessionStarted {
                session: id.to_string(),
                program: program.clone(),
                pid: *pid,
            },
            BridgeEvent::BannerDelivered { id, lines } => TranscriptEvent::BannerDelivered {
                session: id.to_string(),
                lines: *lines,
            },
            BridgeEvent::InputForwarded { id, input, lines } => TranscriptEvent::InputForwarded {
                session: id.to_string(),
                input: input.clone(),
                lines: *lines,
            },
            BridgeEvent::SessionStopped { id, reason } => TranscriptEvent::SessionStopped {
                session: id.to_string(),
                reason: reason.as_str().to_string(),
            },
            BridgeEvent::NoticeSent { text } => TranscriptEvent::NoticeSent { text: text.clone() },
        }
    }
}

/// Writer for JSON lines transcripts.
pub struct Transcript {
    writer: Mutex<BufWriter<File>>,
    path: PathBuf,
}

impl Transcript {
    /// Create a transcript writing to the given path.
    ///
    /// Creates the file (and parent directories) if they don't exist.
    /// Appends to an existing file.
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create transcript directory: {}", parent.display())
            })?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open transcript: {}", path.display()))?;

        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
            path: path.to_path_buf(),
        })
    }

    /// Append an event.
    pub fn log(&self, event: TranscriptEvent) -> Result<()> {
        let entry = TranscriptEntry {
            timestamp: now_rfc3339(),
            event,
        };

        let json = serde_json::to_string(&entry).context("failed to serialize transcript entry")?;

        debug!(event = %json, "transcript");

        let mut writer = self.writer.lock().unwrap();
        writeln!(writer, "{json}").context("failed to write transcript entry")?;
        writer.flush().context("failed to flush transcript")?;

        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::StopReason;
    use uuid::Uuid;

    #[test]
    fn entry_serializes_with_tag_and_data() {
        let entry = TranscriptEntry {
            timestamp: "2026-01-01T00:00:00Z".to_string(),
            event: TranscriptEvent::CommandReceived {
                sender: "@alice".to_string(),
                command: "start".to_string(),
            },
        };

        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"event\":\"command_received\""));
        assert!(json.contains("\"sender\":\"@alice\""));
        assert!(json.contains("\"timestamp\":\"2026-01-01T00:00:00Z\""));
    }

    #[test]
    fn all_event_types_serialize() {
        let events = vec![
            TranscriptEvent::BridgeStarted { chat_id: -100123 },
            TranscriptEvent::BridgeStopped {
                reason: "signal".to_string(),
            },
            TranscriptEvent::CommandReceived {
                sender: "@alice".to_string(),
                command: "input".to_string(),
            },
            TranscriptEvent::SessionStarted {
                session: "s-1".to_string(),
                program: "dfrotz".to_string(),
                pid: 1234,
            },
            TranscriptEvent::BannerDelivered {
                session: "s-1".to_string(),
                lines: 4,
            },
            TranscriptEvent::InputForwarded {
                session: "s-1".to_string(),
                input: "look".to_string(),
                lines: 2,
            },
            TranscriptEvent::SessionStopped {
                session: "s-1".to_string(),
                reason: "requested".to_string(),
            },
            TranscriptEvent::NoticeSent {
                text: "The game is offline.".to_string(),
            },
        ];

        for event in events {
            let entry = TranscriptEntry {
                timestamp: "0".to_string(),
                event,
            };
            let json = serde_json::to_string(&entry);
            assert!(json.is_ok(), "failed to serialize: {entry:?}");
            assert!(json.unwrap().contains("\"event\":"));
        }
    }

    #[test]
    fn write_and_read_transcript() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("run.jsonl");

        let transcript = Transcript::new(&path).unwrap();
        transcript
            .log(TranscriptEvent::BridgeStarted { chat_id: 7 })
            .unwrap();
        transcript
            .log(TranscriptEvent::CommandReceived {
                sender: "@alice".to_string(),
                command: "start".to_string(),
            })
            .unwrap();
        transcript
            .log(TranscriptEvent::BridgeStopped {
                reason: "chat".to_string(),
            })
            .unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);

        for line in &lines {
            let parsed: serde_json::Value = serde_json::from_str(line).unwrap();
            assert!(parsed.get("event").is_some());
            assert!(parsed.get("timestamp").is_some());
        }

        assert!(lines[0].contains("\"event\":\"bridge_started\""));
        assert!(lines[1].contains("\"event\":\"command_received\""));
        assert!(lines[2].contains("\"event\":\"bridge_stopped\""));
    }

    #[test]
    fn creates_parent_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("deep").join("nested").join("run.jsonl");

        let transcript = Transcript::new(&path).unwrap();
        transcript
            .log(TranscriptEvent::BridgeStopped {
                reason: "signal".to_string(),
            })
            .unwrap();

        assert!(path.exists());
    }

    #[test]
    fn appends_to_existing_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("append.jsonl");

        {
            let transcript = Transcript::new(&path).unwrap();
            transcript
                .log(TranscriptEvent::BridgeStarted { chat_id: 1 })
                .unwrap();
        }
        {
            let transcript = Transcript::new(&path).unwrap();
            transcript
                .log(TranscriptEvent::BridgeStopped {
                    reason: "signal".to_string(),
                })
                .unwrap();
        }

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
    }

    #[test]
    fn path_accessor() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("t.jsonl");
        let transcript = Transcript::new(&path).unwrap();
        assert_eq!(transcript.path(), path);
    }

    #[test]
    fn bridge_event_conversion() {
        let id = Uuid::new_v4();
        let events = vec![
            BridgeEvent::SessionStarted {
                id,
                program: "dfrotz".to_string(),
                pid: 42,
            },
            BridgeEvent::BannerDelivered { id, lines: 3 },
            BridgeEvent::InputForwarded {
                id,
                input: "look".to_string(),
                lines: 2,
            },
            BridgeEvent::SessionStopped {
                id,
                reason: StopReason::Died,
            },
            BridgeEvent::NoticeSent {
                text: "The game is running.".to_string(),
            },
        ];

        for event in &events {
            let transcript_event: TranscriptEvent = event.into();
            let json = serde_json::to_string(&TranscriptEntry {
                timestamp: "0".to_string(),
                event: transcript_event,
            })
            .unwrap();
            assert!(json.contains(&id.to_string()) || json.contains("notice_sent"));
        }
    }

    #[test]
    fn stop_reason_strings() {
        let id = Uuid::new_v4();
        let event: TranscriptEvent = (&BridgeEvent::SessionStopped {
            id,
            reason: StopReason::Requested,
        })
            .into();
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"reason\":\"requested\""));
    }

    #[test]
    fn timestamp_is_rfc3339() {
        let ts = now_rfc3339();
        assert!(chrono::DateTime::parse_from_rfc3339(&ts).is_ok());
    }
}
