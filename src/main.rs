mod batcher;
mod bridge;
mod chat;
mod cli;
mod config;
mod daemon;
mod paths;
mod process;
mod reader;
mod session;
mod shell_completion;
mod transcript;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use cli::{Cli, Command};
use config::BridgeConfig;
use daemon::BridgeStatus;

/// How long `grue stop` waits for the bridge to exit.
const STOP_WAIT: Duration = Duration::from_secs(10);

fn config_source_label(config_path: Option<&Path>) -> String {
    config_path
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "(defaults — no .grue/config.toml found)".to_string())
}

fn token_label(token: &str) -> &'static str {
    if token.trim().is_empty() {
        "(not set)"
    } else {
        "(set)"
    }
}

fn push_kv(output: &mut String, key: &str, value: impl std::fmt::Display) {
    output.push_str(&format!("  {key:<20} {value}\n"));
}

fn render_config_human(config: &BridgeConfig, config_path: Option<&Path>) -> String {
    let mut output = String::new();
    output.push_str("Chat\n");
    push_kv(&mut output, "token", token_label(&config.chat.token));
    push_kv(&mut output, "chat_id", config.chat.chat_id);
    push_kv(&mut output, "trigger", config.chat.trigger);
    push_kv(
        &mut output,
        "poll_timeout",
        format!("{}s", config.chat.poll_timeout_secs),
    );
    match config.chat.owner_id {
        Some(id) => push_kv(&mut output, "owner_id", id),
        None => push_kv(&mut output, "owner_id", "(none)"),
    }
    output.push('\n');

    output.push_str("Game\n");
    push_kv(&mut output, "program", &config.game.program);
    if config.game.args.is_empty() {
        push_kv(&mut output, "args", "(none)");
    } else {
        push_kv(&mut output, "args", config.game.args.join(", "));
    }
    push_kv(&mut output, "work_dir", config.game.work_dir.display());
    output.push('\n');

    output.push_str("Timing\n");
    push_kv(
        &mut output,
        "settle_delay",
        format!("{}ms", config.timing.settle_delay_ms),
    );
    push_kv(
        &mut output,
        "drain_timeout",
        format!("{}ms", config.timing.drain_timeout_ms),
    );
    push_kv(
        &mut output,
        "line_delay",
        format!("{}ms", config.timing.line_delay_ms),
    );
    push_kv(
        &mut output,
        "stop_grace",
        format!("{}ms", config.timing.stop_grace_ms),
    );
    output.push('\n');

    output.push_str("Transcript\n");
    push_kv(&mut output, "enabled", config.transcript.enabled);
    match &config.transcript.path {
        Some(path) => push_kv(&mut output, "path", path.display()),
        None => push_kv(&mut output, "path", "(default: .grue/logs/transcript.jsonl)"),
    }
    output.push('\n');

    output.push_str("Source Path\n");
    push_kv(&mut output, "path", config_source_label(config_path));

    output
}

fn render_config_json(config: &BridgeConfig, config_path: Option<&Path>) -> Result<String> {
    let payload = serde_json::json!({
        "chat": {
            "token_set": !config.chat.token.trim().is_empty(),
            "chat_id": config.chat.chat_id,
            "trigger": config.chat.trigger.to_string(),
            "poll_timeout_secs": config.chat.poll_timeout_secs,
            "owner_id": config.chat.owner_id
        },
        "game": {
            "program": &config.game.program,
            "args": &config.game.args,
            "work_dir": config.game.work_dir.display().to_string()
        },
        "timing": {
            "settle_delay_ms": config.timing.settle_delay_ms,
            "drain_timeout_ms": config.timing.drain_timeout_ms,
            "line_delay_ms": config.timing.line_delay_ms,
            "stop_grace_ms": config.timing.stop_grace_ms
        },
        "transcript": {
            "enabled": config.transcript.enabled,
            "path": config.transcript.path.as_ref().map(|p| p.display().to_string())
        },
        "source_path": config_source_label(config_path)
    });

    serde_json::to_string_pretty(&payload).context("failed to serialize config to JSON")
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let is_config_command = matches!(&cli.command, Command::Config { .. });

    let filter = match cli.verbose {
        0 if is_config_command => "grue=warn",
        0 => "grue=info",
        1 => "grue=debug",
        _ => "grue=trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let verbose = cli.verbose;
    match cli.command {
        Command::Start {
            foreground,
            config,
            workdir,
            pidfile,
            token,
            chat_id,
            trigger,
        } => {
            if let Some(dir) = &workdir {
                std::env::set_current_dir(dir)
                    .with_context(|| format!("failed to enter workdir {}", dir.display()))?;
            }
            let cwd = std::env::current_dir()
                .context("failed to get current directory (was it deleted?)")?;

            let (mut bridge_config, config_path) = match &config {
                Some(path) => (BridgeConfig::load_from(path)?, Some(path.clone())),
                None => BridgeConfig::load(&cwd)?,
            };
            match &config_path {
                Some(p) => info!("loaded config from {}", p.display()),
                None => info!("no .grue/config.toml found, using defaults"),
            }

            if let Some(ref token) = token {
                bridge_config.chat.token = token.clone();
            }
            if let Some(chat_id) = chat_id {
                bridge_config.chat.chat_id = chat_id;
            }
            if let Some(trigger) = trigger {
                bridge_config.chat.trigger = trigger;
            }
            bridge_config.validate()?;

            let pidfile = pidfile.unwrap_or_else(|| paths::default_pidfile(&cwd));

            // Detached mode: spawn a background bridge and return immediately.
            // The child runs with --foreground to avoid recursive spawning.
            if !foreground {
                if let BridgeStatus::Running { pid } = daemon::status(&pidfile) {
                    anyhow::bail!(
                        "a bridge is already running (pid {pid}); stop it with: grue stop"
                    );
                }

                let mut forward: Vec<String> = Vec::new();
                if let Some(ref path) = config {
                    forward.push("--config".to_string());
                    forward.push(path.display().to_string());
                }
                forward.push("--pidfile".to_string());
                forward.push(pidfile.display().to_string());
                if let Some(ref token) = token {
                    forward.push("--token".to_string());
                    forward.push(token.clone());
                }
                if let Some(chat_id) = chat_id {
                    forward.push(format!("--chat-id={chat_id}"));
                }
                if let Some(trigger) = trigger {
                    forward.push("--trigger".to_string());
                    forward.push(trigger.to_string());
                }
                for _ in 0..verbose {
                    forward.push("-v".to_string());
                }

                let (pid, log_path) = daemon::spawn_detached(&paths::logs_dir(&cwd), &forward)?;
                println!("[grue] started detached in background (pid: {pid})");
                println!("[grue] stop with: grue stop");
                println!("[grue] detached log: {}", log_path.display());
                return Ok(());
            }

            daemon::write_pidfile(&pidfile)?;
            let result = bridge::run(&bridge_config, &cwd);
            daemon::remove_pidfile(&pidfile);
            result?;
        }
        Command::Stop { pidfile } => {
            let cwd = std::env::current_dir()
                .context("failed to get current directory (was it deleted?)")?;
            let pidfile = pidfile.unwrap_or_else(|| paths::default_pidfile(&cwd));
            let pid = daemon::stop(&pidfile, STOP_WAIT)?;
            println!("[grue] stopped bridge (pid: {pid})");
        }
        Command::Status { pidfile } => {
            let cwd = std::env::current_dir()
                .context("failed to get current directory (was it deleted?)")?;
            let pidfile = pidfile.unwrap_or_else(|| paths::default_pidfile(&cwd));
            match daemon::status(&pidfile) {
                BridgeStatus::Running { pid } => println!("[grue] running (pid: {pid})"),
                BridgeStatus::Stale { pid } => {
                    println!("[grue] not running (stale pidfile, pid {pid} is gone)");
                }
                BridgeStatus::NotRunning => println!("[grue] not running"),
            }
        }
        Command::Config { json, example } => {
            if example {
                print!("{}", config::EXAMPLE_CONFIG);
                return Ok(());
            }
            let cwd = std::env::current_dir()
                .context("failed to get current directory (was it deleted?)")?;
            let (bridge_config, config_path) = BridgeConfig::load(&cwd)?;
            if json {
                println!(
                    "{}",
                    render_config_json(&bridge_config, config_path.as_deref())?
                );
            } else {
                print!(
                    "{}",
                    render_config_human(&bridge_config, config_path.as_deref())
                );
            }
        }
        Command::Completions { shell } => {
            shell_completion::print(shell)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_config_human_groups_sections() {
        let config = BridgeConfig::default();
        let rendered = render_config_human(&config, None);

        assert!(rendered.contains("Chat\n"));
        assert!(rendered.contains("Game\n"));
        assert!(rendered.contains("Timing\n"));
        assert!(rendered.contains("Transcript\n"));
        assert!(rendered.contains("Source Path\n"));
        assert!(rendered.contains("dfrotz"));
        assert!(rendered.contains("(defaults — no .grue/config.toml found)"));
    }

    #[test]
    fn render_config_human_redacts_token() {
        let mut config = BridgeConfig::default();
        config.chat.token = "123456:ABC-DEF".to_string();
        let rendered = render_config_human(&config, None);

        assert!(rendered.contains("(set)"));
        assert!(!rendered.contains("123456:ABC-DEF"));
    }

    #[test]
    fn render_config_json_is_valid_and_redacts_token() {
        let mut config = BridgeConfig::default();
        config.chat.token = "123456:ABC-DEF".to_string();
        config.chat.chat_id = -100123;
        let json = render_config_json(&config, None).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["chat"]["token_set"], true);
        assert_eq!(value["chat"]["chat_id"], -100123);
        assert_eq!(value["chat"]["trigger"], "!");
        assert_eq!(value["game"]["program"], "dfrotz");
        assert_eq!(value["timing"]["line_delay_ms"], 250);
        assert_eq!(value["source_path"], "(defaults — no .grue/config.toml found)");
        assert!(!json.contains("123456:ABC-DEF"));
    }

    #[test]
    fn render_config_json_lists_game_args() {
        let mut config = BridgeConfig::default();
        config.game.args = vec!["-h".to_string(), "200".to_string()];
        let json = render_config_json(&config, None).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert!(value["game"]["args"].is_array());
        assert_eq!(value["game"]["args"][0], "-h");
    }
}
