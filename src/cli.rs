use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "grue",
    about = "Bridge a line-oriented game interpreter into a Telegram chat",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the bridge (detached by default)
    Start {
        /// Run in the foreground instead of detaching
        #[arg(long)]
        foreground: bool,

        /// Config file (default: search upward for .grue/config.toml)
        #[arg(short = 'f', long)]
        config: Option<PathBuf>,

        /// Directory to run from (config search, pidfile, game working dir)
        #[arg(short = 'k', long)]
        workdir: Option<PathBuf>,

        /// Pidfile location (default: .grue/grue.pid)
        #[arg(short = 'i', long)]
        pidfile: Option<PathBuf>,

        /// Override the bot token from the config
        #[arg(long)]
        token: Option<String>,

        /// Override the bridged chat id from the config
        /// (group ids are negative, so "--chat-id=-100..." also works)
        #[arg(long, allow_negative_numbers = true)]
        chat_id: Option<i64>,

        /// Override the command trigger character
        #[arg(long)]
        trigger: Option<char>,
    },

    /// Stop a detached bridge
    Stop {
        /// Pidfile location (default: .grue/grue.pid)
        #[arg(short = 'i', long)]
        pidfile: Option<PathBuf>,
    },

    /// Report whether a detached bridge is running
    Status {
        /// Pidfile location (default: .grue/grue.pid)
        #[arg(short = 'i', long)]
        pidfile: Option<PathBuf>,
    },

    /// Show the effective configuration
    Config {
        /// Emit JSON instead of the human-readable listing
        #[arg(long)]
        json: bool,

        /// Print an example config file and exit
        #[arg(long)]
        example: bool,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: CompletionShell,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn start_flags_parse() {
        let cli = Cli::try_parse_from([
            "grue", "start", "--foreground", "-f", "alt.toml", "--chat-id", "-100", "-vv",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Command::Start {
                foreground,
                config,
                chat_id,
                ..
            } => {
                assert!(foreground);
                assert_eq!(config, Some(PathBuf::from("alt.toml")));
                assert_eq!(chat_id, Some(-100));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn stop_accepts_pidfile_override() {
        let cli = Cli::try_parse_from(["grue", "stop", "-i", "/tmp/x.pid"]).unwrap();
        match cli.command {
            Command::Stop { pidfile } => {
                assert_eq!(pidfile, Some(PathBuf::from("/tmp/x.pid")));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
