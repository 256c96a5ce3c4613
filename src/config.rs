use anyhow::{Context, Result, ensure};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_FILENAME: &str = "config.toml";
const CONFIG_DIR: &str = ".grue";

/// Example config printed by `grue config --example`.
pub const EXAMPLE_CONFIG: &str = r#"# grue configuration
#
# Place this file at .grue/config.toml in the directory you run the
# bridge from (or any parent of it).

[chat]
# Bot token from @BotFather. Required.
token = "123456:ABC-DEF"
# The chat the game is bridged into. Required.
chat_id = -1001234567890
# Messages starting with this character are bridge commands
# ("!start", "!stop").
trigger = "!"
# Long-poll duration for getUpdates.
poll_timeout_secs = 30
# Optional: user id allowed to shut the bridge down with a direct
# "die" message.
# owner_id = 987654321

[game]
program = "dfrotz"
args = ["-h", "200", "-w", "120", "HITCHHIK.DAT"]
# Directory the interpreter runs in (story files resolve against it).
work_dir = "."

[timing]
# Wait after spawning before collecting the opening banner.
settle_delay_ms = 500
# Quiet window that ends an output batch.
drain_timeout_ms = 500
# Pause between chat messages when relaying a batch.
line_delay_ms = 250
# How long a terminated game gets to exit before it is killed.
stop_grace_ms = 2000

[transcript]
enabled = true
# path = ".grue/logs/transcript.jsonl"
"#;

#[derive(Debug, Clone, Deserialize)]
pub struct ChatConfig {
    /// Bot API token. Empty until supplied by config file or `--token`.
    #[serde(default)]
    pub token: String,
    /// The single chat the game is bridged into.
    #[serde(default)]
    pub chat_id: i64,
    #[serde(default = "default_trigger")]
    pub trigger: char,
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,
    /// User allowed to send the direct "die" shutdown message.
    #[serde(default)]
    pub owner_id: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GameConfig {
    #[serde(default = "default_game_program")]
    pub program: String,
    #[serde(default = "default_game_args")]
    pub args: Vec<String>,
    #[serde(default = "default_game_work_dir")]
    pub work_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimingConfig {
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,
    #[serde(default = "default_line_delay_ms")]
    pub line_delay_ms: u64,
    #[serde(default = "default_stop_grace_ms")]
    pub stop_grace_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TranscriptConfig {
    #[serde(default = "default_transcript_enabled")]
    pub enabled: bool,
    /// Defaults to `.grue/logs/transcript.jsonl` when enabled.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

fn default_trigger() -> char {
    '!'
}

fn default_poll_timeout_secs() -> u64 {
    30
}

fn default_game_program() -> String {
    "dfrotz".to_string()
}

fn default_game_args() -> Vec<String> {
    Vec::new()
}

fn default_game_work_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_settle_delay_ms() -> u64 {
    500
}

fn default_drain_timeout_ms() -> u64 {
    500
}

fn default_line_delay_ms() -> u64 {
    250
}

fn default_stop_grace_ms() -> u64 {
    2000
}

fn default_transcript_enabled() -> bool {
    true
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            chat_id: 0,
            trigger: default_trigger(),
            poll_timeout_secs: default_poll_timeout_secs(),
            owner_id: None,
        }
    }
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            program: default_game_program(),
            args: default_game_args(),
            work_dir: default_game_work_dir(),
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: default_settle_delay_ms(),
            drain_timeout_ms: default_drain_timeout_ms(),
            line_delay_ms: default_line_delay_ms(),
            stop_grace_ms: default_stop_grace_ms(),
        }
    }
}

impl Default for TranscriptConfig {
    fn default() -> Self {
        Self {
            enabled: default_transcript_enabled(),
            path: None,
        }
    }
}

impl TimingConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    pub fn line_delay(&self) -> Duration {
        Duration::from_millis(self.line_delay_ms)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct BridgeConfig {
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub game: GameConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub transcript: TranscriptConfig,
}

impl BridgeConfig {
    /// Search upward from `start` for a `.grue/config.toml` file and load it.
    /// Returns the default config if no file is found.
    pub fn load(start: &Path) -> Result<(Self, Option<PathBuf>)> {
        if let Some(path) = Self::find_config_file(start) {
            let config = Self::load_from(&path)?;
            Ok((config, Some(path)))
        } else {
            Ok((BridgeConfig::default(), None))
        }
    }

    /// Load an explicitly named config file. Unlike [`BridgeConfig::load`],
    /// a missing file is an error here.
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config: BridgeConfig = toml::from_str(&contents)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(config)
    }

    /// Reject configs that cannot produce a working bridge. Called after
    /// CLI overrides are applied, so a config file with no token is still
    /// fine for `grue config`.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            !self.chat.token.trim().is_empty(),
            "chat.token is required (set it in .grue/config.toml or pass --token)"
        );
        ensure!(
            self.chat.chat_id != 0,
            "chat.chat_id is required (set it in .grue/config.toml or pass --chat-id)"
        );
        ensure!(
            !self.game.program.trim().is_empty(),
            "game.program must not be empty"
        );
        ensure!(
            self.chat.poll_timeout_secs > 0,
            "chat.poll_timeout_secs must be at least 1"
        );
        Ok(())
    }

    /// Resolve the transcript path, if transcript logging is on.
    pub fn transcript_path(&self, base: &Path) -> Option<PathBuf> {
        if !self.transcript.enabled {
            return None;
        }
        Some(
            self.transcript
                .path
                .clone()
                .unwrap_or_else(|| crate::paths::default_transcript(base)),
        )
    }

    fn find_config_file(start: &Path) -> Option<PathBuf> {
        let mut dir = start.to_path_buf();
        loop {
            let candidate = dir.join(CONFIG_DIR).join(CONFIG_FILENAME);
            if candidate.is_file() {
                return Some(candidate);
            }
            if !dir.pop() {
                return None;
            }
        }
    }
}
