use std::io::Read;
use std::process::ChildStdout;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use tracing::debug;

/// Drains a game's stdout on a dedicated thread, forwarding raw chunks to
/// the session's queue. Exits on EOF (the child closed its end), on read
/// error, when the queue's receiver is gone, or when asked to stop.
pub struct OutputReader {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl OutputReader {
    pub fn spawn(mut stdout: ChildStdout, chunks: mpsc::Sender<Vec<u8>>) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let handle = thread::spawn(move || {
            let mut buf = [0u8; 256];
            loop {
                if stop_flag.load(Ordering::Relaxed) {
                    break;
                }
                match stdout.read(&mut buf) {
                    Ok(0) => break, // EOF
                    Ok(n) => {
                        if chunks.send(buf[..n].to_vec()).is_err() {
                            break; // session discarded
                        }
                    }
                    Err(e) => {
                        debug!("game stdout read error (process likely exited): {e}");
                        break;
                    }
                }
            }
            debug!("output reader exiting");
        });
        Self { stop, handle }
    }

    /// Ask the thread to stop at the next loop turn. A reader blocked in
    /// `read` only notices once the pipe closes, so terminate the game
    /// before joining.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    pub fn join(self) {
        let _ = self.handle.join();
    }
}
