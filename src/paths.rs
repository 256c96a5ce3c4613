use std::path::{Path, PathBuf};

/// Runtime directory for a bridge rooted at `base` (`.grue/`).
///
/// Holds the config file, the pidfile of a detached bridge, and the
/// log/transcript output. Created lazily by whichever component writes
/// into it first.
pub fn runtime_dir(base: &Path) -> PathBuf {
    base.join(".grue")
}

/// Default pidfile location for a detached bridge.
pub fn default_pidfile(base: &Path) -> PathBuf {
    runtime_dir(base).join("grue.pid")
}

/// Directory that detached-mode stdout/stderr logs are written into.
pub fn logs_dir(base: &Path) -> PathBuf {
    runtime_dir(base).join("logs")
}

/// Default transcript location when `[transcript]` enables logging but
/// gives no explicit path.
pub fn default_transcript(base: &Path) -> PathBuf {
    logs_dir(base).join("transcript.jsonl")
}
