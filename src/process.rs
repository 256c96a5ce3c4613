use std::io::{self, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::GameConfig;

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to write to game stdin: {0}")]
    Write(#[source] io::Error),
    #[error("failed to signal game process: {0}")]
    Signal(#[source] io::Error),
}

/// A running game interpreter with piped stdin/stdout.
///
/// stderr is discarded: interpreters like dfrotz write curses noise and
/// usage complaints there, none of which belongs in the chat.
#[derive(Debug)]
pub struct GameProcess {
    child: Child,
    stdin: ChildStdin,
    stdout: Option<ChildStdout>,
    program: String,
}

impl GameProcess {
    pub fn spawn(config: &GameConfig) -> Result<Self, ProcessError> {
        let spawn_err = |source| ProcessError::Spawn {
            program: config.program.clone(),
            source,
        };

        let mut child = Command::new(&config.program)
            .args(&config.args)
            .current_dir(&config.work_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(spawn_err)?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| spawn_err(io::Error::other("stdin pipe missing")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| spawn_err(io::Error::other("stdout pipe missing")))?;

        debug!(program = %config.program, pid = child.id(), "game process spawned");
        Ok(Self {
            child,
            stdin,
            stdout: Some(stdout),
            program: config.program.clone(),
        })
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Hand the stdout pipe to the output reader. Yields `Some` exactly once.
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.stdout.take()
    }

    /// True while the child has not exited. Reaps the exit status as a side
    /// effect once the child is gone.
    pub fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Write one line of player input, newline-terminated and flushed.
    pub fn write_line(&mut self, text: &str) -> Result<(), ProcessError> {
        self.stdin
            .write_all(text.as_bytes())
            .and_then(|()| self.stdin.write_all(b"\n"))
            .and_then(|()| self.stdin.flush())
            .map_err(ProcessError::Write)
    }

    /// Ask the child to exit. Idempotent: an already-exited child is not an
    /// error, and neither is losing the race with its exit.
    pub fn terminate(&mut self) -> Result<(), ProcessError> {
        if !self.is_alive() {
            return Ok(());
        }
        self.send_term()
    }

    #[cfg(unix)]
    fn send_term(&mut self) -> Result<(), ProcessError> {
        // SAFETY: pid comes from our own un-reaped Child handle, so it still
        // names this child (a zombie keeps its pid until waited on).
        #[allow(clippy::cast_possible_wrap)]
        let ret = unsafe { libc::kill(self.child.id() as i32, libc::SIGTERM) };
        if ret == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ESRCH) {
            // Exited between the liveness check and the signal.
            return Ok(());
        }
        Err(ProcessError::Signal(err))
    }

    #[cfg(not(unix))]
    fn send_term(&mut self) -> Result<(), ProcessError> {
        match self.child.kill() {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::InvalidInput => Ok(()),
            Err(e) => Err(ProcessError::Signal(e)),
        }
    }

    /// Terminate and wait for the child to go away, escalating to a hard
    /// kill if `grace` passes without an exit. Always leaves the child
    /// reaped, which closes the stdout pipe and unblocks the reader.
    pub fn shutdown(&mut self, grace: Duration) {
        if let Err(e) = self.terminate() {
            warn!(program = %self.program, error = %e, "terminate failed");
        }
        let deadline = Instant::now() + grace;
        loop {
            match self.child.try_wait() {
                Ok(Some(status)) => {
                    debug!(program = %self.program, %status, "game process exited");
                    return;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(program = %self.program, error = %e, "wait failed");
                    return;
                }
            }
            if Instant::now() >= deadline {
                break;
            }
            std::thread::sleep(Duration::from_millis(50));
        }
        warn!(program = %self.program, "game ignored termination, killing");
        if let Err(e) = self.child.kill() {
            warn!(program = %self.program, error = %e, "kill failed");
        }
        match self.child.wait() {
            Ok(status) => debug!(program = %self.program, %status, "game process killed"),
            Err(e) => warn!(program = %self.program, error = %e, "wait after kill failed"),
        }
    }
}
