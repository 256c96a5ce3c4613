use std::sync::mpsc;
use std::thread;
use tracing::{info, warn};
use uuid::Uuid;

use crate::batcher;
use crate::chat::ChatSink;
use crate::config::{GameConfig, TimingConfig};
use crate::process::{GameProcess, ProcessError};
use crate::reader::OutputReader;

/// Why a session went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// A stop command asked for it.
    Requested,
    /// The game exited (or its stdin broke) on its own.
    Died,
    /// The bridge itself is going down.
    Shutdown,
}

impl StopReason {
    pub fn as_str(self) -> &'static str {
        match self {
            StopReason::Requested => "requested",
            StopReason::Died => "died",
            StopReason::Shutdown => "shutdown",
        }
    }
}

/// Observable things the controller does, for the transcript.
#[derive(Debug, Clone)]
pub enum BridgeEvent {
    SessionStarted {
        id: Uuid,
        program: String,
        pid: u32,
    },
    BannerDelivered {
        id: Uuid,
        lines: usize,
    },
    InputForwarded {
        id: Uuid,
        input: String,
        lines: usize,
    },
    SessionStopped {
        id: Uuid,
        reason: StopReason,
    },
    NoticeSent {
        text: String,
    },
}

/// One game process with its reader thread and output queue.
struct Session {
    id: Uuid,
    process: GameProcess,
    chunks: mpsc::Receiver<Vec<u8>>,
    reader: OutputReader,
}

impl Session {
    fn spawn(game: &GameConfig) -> Result<Self, ProcessError> {
        let mut process = GameProcess::spawn(game)?;
        let (tx, rx) = mpsc::channel();
        let stdout = process.take_stdout().ok_or_else(|| ProcessError::Spawn {
            program: game.program.clone(),
            source: std::io::Error::other("stdout already taken"),
        })?;
        let reader = OutputReader::spawn(stdout, tx);
        Ok(Self {
            id: Uuid::new_v4(),
            process,
            chunks: rx,
            reader,
        })
    }
}

/// Owns the lifecycle of at most one game session and turns chat commands
/// into process actions. Nothing the game does bubbles out as an error:
/// every failure path ends in a notice to the chat and a clean reap.
pub struct SessionController {
    game: GameConfig,
    timing: TimingConfig,
    session: Option<Session>,
    events: Option<mpsc::Sender<BridgeEvent>>,
}

impl SessionController {
    pub fn new(
        game: GameConfig,
        timing: TimingConfig,
        events: Option<mpsc::Sender<BridgeEvent>>,
    ) -> Self {
        Self {
            game,
            timing,
            session: None,
            events,
        }
    }

    /// Whether a live game is attached right now.
    pub fn is_running(&mut self) -> bool {
        self.session
            .as_mut()
            .is_some_and(|s| s.process.is_alive())
    }

    /// Launch the game. If one is already running this is a no-op with a
    /// notice; a session whose process quietly died is reaped and replaced.
    /// After the spawn, waits briefly for the interpreter to come up, then
    /// relays the opening banner.
    pub fn start(&mut self, sink: &dyn ChatSink) {
        if self.ensure_alive() {
            self.notice(sink, "The game is running.");
            return;
        }

        let session = match Session::spawn(&self.game) {
            Ok(session) => session,
            Err(e) => {
                warn!(program = %self.game.program, error = %e, "failed to start game");
                self.notice(sink, &format!("Could not start the game: {e}"));
                return;
            }
        };

        info!(session = %session.id, pid = session.process.pid(), "game session started");
        self.emit(BridgeEvent::SessionStarted {
            id: session.id,
            program: self.game.program.clone(),
            pid: session.process.pid(),
        });

        // Let the interpreter print its banner before the first drain.
        thread::sleep(self.timing.settle_delay());
        let lines = batcher::drain(&session.chunks, self.timing.drain_timeout());
        batcher::deliver(&lines, sink, self.timing.line_delay());
        self.emit(BridgeEvent::BannerDelivered {
            id: session.id,
            lines: lines.len(),
        });

        self.session = Some(session);
    }

    /// Terminate the running game, confirming to the chat. Stopping when
    /// nothing is running only produces a notice.
    pub fn stop(&mut self, sink: &dyn ChatSink) {
        match self.session.take() {
            Some(mut session) => {
                if session.process.is_alive() {
                    self.reap(session, StopReason::Requested);
                    self.notice(sink, "The game is offline.");
                } else {
                    self.reap(session, StopReason::Died);
                    self.notice(sink, "The game is not running.");
                }
            }
            None => self.notice(sink, "The game is not running."),
        }
    }

    /// Forward one line of player input and relay whatever the game prints
    /// back. A dead game, discovered either up front or through the write
    /// itself, turns into an offline notice.
    pub fn input(&mut self, text: &str, sink: &dyn ChatSink) {
        if !self.ensure_alive() {
            self.notice(sink, "The game is offline.");
            return;
        }

        let mut write_failed = false;
        if let Some(session) = self.session.as_mut() {
            if let Err(e) = session.process.write_line(text) {
                // The write is the authoritative liveness signal: a broken
                // pipe means the game is gone no matter what the last poll
                // said.
                warn!(session = %session.id, error = %e, "write to game failed");
                write_failed = true;
            }
        }
        if write_failed {
            if let Some(stale) = self.session.take() {
                self.reap(stale, StopReason::Died);
            }
            self.notice(sink, "The game is offline.");
            return;
        }

        if let Some(session) = self.session.as_ref() {
            let lines = batcher::drain(&session.chunks, self.timing.drain_timeout());
            batcher::deliver(&lines, sink, self.timing.line_delay());
            self.emit(BridgeEvent::InputForwarded {
                id: session.id,
                input: text.to_string(),
                lines: lines.len(),
            });
        }

        // The input may have ended the game (quitting the story, say).
        if !self.ensure_alive() {
            self.notice(sink, "The game is offline.");
        }
    }

    /// Silently tear down any session. For bridge exit, where notices have
    /// nowhere useful to go.
    pub fn shutdown(&mut self) {
        if let Some(session) = self.session.take() {
            self.reap(session, StopReason::Shutdown);
        }
    }

    /// True when a live session exists. A session whose process has exited
    /// is reaped as a side effect.
    fn ensure_alive(&mut self) -> bool {
        let alive = self
            .session
            .as_mut()
            .is_some_and(|s| s.process.is_alive());
        if !alive {
            if let Some(stale) = self.session.take() {
                self.reap(stale, StopReason::Died);
            }
        }
        alive
    }

    fn reap(&mut self, session: Session, reason: StopReason) {
        let Session {
            id,
            mut process,
            chunks,
            reader,
        } = session;
        process.shutdown(self.timing.stop_grace());
        reader.stop();
        reader.join();
        drop(chunks);
        info!(session = %id, reason = reason.as_str(), "game session stopped");
        self.emit(BridgeEvent::SessionStopped { id, reason });
    }

    fn notice(&self, sink: &dyn ChatSink, text: &str) {
        if let Err(e) = sink.send_line(text) {
            warn!(error = %e, notice = text, "failed to deliver notice");
        }
        self.emit(BridgeEvent::NoticeSent {
            text: text.to_string(),
        });
    }

    fn emit(&self, event: BridgeEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }
}
