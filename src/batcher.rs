use std::sync::mpsc;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

use crate::chat::ChatSink;

/// Collect one batch of game output from the session queue.
///
/// Keeps pulling chunks for as long as they arrive within `window` of each
/// other; the first quiet window ends the batch. Chunks already queued are
/// taken without waiting, so a burst that straddles packet boundaries comes
/// out as one batch. Returns the batch split into lines: bytes are decoded
/// lossily as UTF-8, a trailing newline does not produce an empty line, and
/// blank lines inside the batch survive.
pub fn drain(chunks: &mpsc::Receiver<Vec<u8>>, window: Duration) -> Vec<String> {
    let mut raw: Vec<u8> = Vec::new();
    while let Ok(chunk) = chunks.recv_timeout(window) {
        raw.extend_from_slice(&chunk);
    }
    if raw.is_empty() {
        return Vec::new();
    }
    let text = String::from_utf8_lossy(&raw);
    text.lines().map(str::to_string).collect()
}

/// Relay a batch to the chat, one message per line, pausing between lines
/// so the chat renders them in order without tripping rate limits. A line
/// that fails to send is logged and dropped; the rest of the batch still
/// goes out.
pub fn deliver(lines: &[String], sink: &dyn ChatSink, pause: Duration) {
    for (i, line) in lines.iter().enumerate() {
        if let Err(e) = sink.send_line(line) {
            warn!(error = %e, "dropping undeliverable line");
        }
        if i + 1 < lines.len() {
            thread::sleep(pause);
        }
    }
    if !lines.is_empty() {
        debug!(lines = lines.len(), "batch relayed");
    }
}
