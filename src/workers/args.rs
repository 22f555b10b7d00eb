//! Command-line argument parsing and configuration.
//!
//! Supports:
//! - CLI arguments via clap
//! - TOML configuration file (`--config`, or `ghoststream.toml` in the
//!   working directory)
//! - Merging CLI with file config (CLI takes precedence)

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::config::{DEFAULT_LISTEN_ADDR, TransferMode};
use crate::core::probe::ModePolicy;
use crate::core::session::SessionConfig;

const DEFAULT_CONFIG_FILE: &str = "ghoststream.toml";

/// GhostStream - ephemeral P2P file transfer and chat.
#[derive(Parser, Clone, Debug)]
#[command(author, version, about)]
#[command(propagate_version = true)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// TOML settings file.
    #[clap(long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbosity level (-v, -vv, -vvv).
    #[clap(short = 'v', long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Directory for logs and the transfer log. Defaults to ~/.ghoststream/
    #[clap(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Where received files are saved. Defaults to <data-dir>/downloads.
    #[clap(long, global = true)]
    pub out: Option<PathBuf>,

    /// Transfer profile; `auto` follows measured latency.
    #[clap(long, global = true)]
    pub mode: Option<ModeArg>,

    /// Close the session after this many quiet seconds.
    #[clap(long, global = true)]
    pub idle_timeout: Option<u64>,

    /// Seconds between queue completion and self-destruct.
    #[clap(long, global = true)]
    pub destruct_after: Option<u64>,

    /// Skip content hashing and verification.
    #[clap(long, global = true)]
    pub no_verify: bool,

    /// Accept incoming files without asking.
    #[clap(long, global = true)]
    pub auto_accept: bool,

    /// Name shown to the peer in file headers.
    #[clap(long, global = true)]
    pub label: Option<String>,
}

#[derive(Subcommand, Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Wait for one peer to connect.
    Listen {
        #[clap(long, default_value = DEFAULT_LISTEN_ADDR)]
        bind: String,
    },
    /// Dial a listening peer, optionally queueing files right away.
    Connect {
        addr: String,
        files: Vec<PathBuf>,
        /// Redial after a dropped connection and resume where it stopped.
        #[clap(long)]
        reconnect: bool,
    },
}

#[derive(ValueEnum, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ModeArg {
    Auto,
    Speed,
    Balanced,
    Stable,
}

impl From<ModeArg> for ModePolicy {
    fn from(value: ModeArg) -> Self {
        match value {
            ModeArg::Auto => ModePolicy::Auto,
            ModeArg::Speed => ModePolicy::Fixed(TransferMode::Speed),
            ModeArg::Balanced => ModePolicy::Fixed(TransferMode::Balanced),
            ModeArg::Stable => ModePolicy::Fixed(TransferMode::Stable),
        }
    }
}

/// Settings accepted from the TOML file. Same names as the long flags.
#[derive(Deserialize, Default, Clone, Debug, PartialEq, Eq)]
#[serde(default, rename_all = "kebab-case")]
pub struct FileSettings {
    pub verbose: u8,
    pub data_dir: Option<PathBuf>,
    pub out: Option<PathBuf>,
    pub mode: Option<ModeArg>,
    pub idle_timeout: Option<u64>,
    pub destruct_after: Option<u64>,
    pub no_verify: bool,
    pub auto_accept: bool,
    pub label: Option<String>,
}

impl Args {
    /// Load Args from CLI + TOML file (if it exists).
    /// CLI values override those from the file.
    pub fn load() -> Result<Self> {
        let mut cli_args = Args::parse();

        // Resolve relative paths to absolute before any working directory change
        cli_args.data_dir = cli_args.data_dir.map(Self::resolve_path);
        cli_args.out = cli_args.out.map(Self::resolve_path);

        let path = cli_args
            .config
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
        match Self::from_file(&path)? {
            Some(file) => Ok(Self::merge(file, cli_args)),
            None if cli_args.config.is_some() => {
                anyhow::bail!("config file {} does not exist", path.display())
            }
            None => Ok(cli_args),
        }
    }

    /// Resolve a potentially relative path to an absolute one.
    fn resolve_path(p: PathBuf) -> PathBuf {
        if p.is_absolute() {
            p
        } else {
            std::env::current_dir().unwrap_or_default().join(p)
        }
    }

    /// Load settings from a TOML file. A missing file is `None`; a
    /// malformed one is an error.
    fn from_file(path: &Path) -> Result<Option<FileSettings>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let settings = toml::from_str::<FileSettings>(&content)
            .with_context(|| format!("Invalid settings in {}", path.display()))?;
        Ok(Some(settings))
    }

    /// Merge file settings under CLI args (CLI takes precedence).
    fn merge(file: FileSettings, mut cli: Args) -> Args {
        if cli.verbose == 0 {
            cli.verbose = file.verbose;
        }
        if cli.data_dir.is_none() {
            cli.data_dir = file.data_dir;
        }
        if cli.out.is_none() {
            cli.out = file.out;
        }
        if cli.mode.is_none() {
            cli.mode = file.mode;
        }
        if cli.idle_timeout.is_none() {
            cli.idle_timeout = file.idle_timeout;
        }
        if cli.destruct_after.is_none() {
            cli.destruct_after = file.destruct_after;
        }
        if cli.label.is_none() {
            cli.label = file.label;
        }
        cli.no_verify |= file.no_verify;
        cli.auto_accept |= file.auto_accept;
        cli
    }

    pub fn mode_policy(&self) -> ModePolicy {
        self.mode.map(ModePolicy::from).unwrap_or(ModePolicy::Auto)
    }

    /// Per-session settings; unset values fall back to the defaults.
    pub fn session_config(&self) -> SessionConfig {
        let defaults = SessionConfig::default();
        SessionConfig {
            label: self.label.clone().unwrap_or(defaults.label),
            mode: self.mode_policy(),
            verify: !self.no_verify,
            auto_accept: self.auto_accept,
            idle_timeout: self
                .idle_timeout
                .map(Duration::from_secs)
                .unwrap_or(defaults.idle_timeout),
            destruct_after: self
                .destruct_after
                .map(Duration::from_secs)
                .unwrap_or(defaults.destruct_after),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{DESTRUCT_COUNTDOWN, IDLE_TIMEOUT};

    #[test]
    fn parses_connect_with_files() {
        let args = Args::parse_from([
            "ghoststream",
            "connect",
            "10.0.0.2:7878",
            "a.txt",
            "b.txt",
            "--reconnect",
            "--mode",
            "stable",
        ]);
        assert_eq!(
            args.command,
            Command::Connect {
                addr: "10.0.0.2:7878".into(),
                files: vec![PathBuf::from("a.txt"), PathBuf::from("b.txt")],
                reconnect: true,
            }
        );
        assert_eq!(args.mode_policy(), ModePolicy::Fixed(TransferMode::Stable));
    }

    #[test]
    fn defaults_produce_default_session() {
        let args = Args::parse_from(["ghoststream", "listen"]);
        assert_eq!(
            args.command,
            Command::Listen {
                bind: DEFAULT_LISTEN_ADDR.into()
            }
        );
        let config = args.session_config();
        assert!(config.verify);
        assert!(!config.auto_accept);
        assert_eq!(config.mode, ModePolicy::Auto);
        assert_eq!(config.idle_timeout, IDLE_TIMEOUT);
        assert_eq!(config.destruct_after, DESTRUCT_COUNTDOWN);
    }

    #[test]
    fn cli_overrides_file() {
        let file: FileSettings = toml::from_str(
            r#"
            mode = "speed"
            label = "laptop"
            idle-timeout = 60
            auto-accept = true
            "#,
        )
        .unwrap();
        let cli = Args::parse_from(["ghoststream", "listen", "--label", "desk", "--no-verify"]);
        let merged = Args::merge(file, cli);

        assert_eq!(merged.label.as_deref(), Some("desk"));
        assert_eq!(merged.mode, Some(ModeArg::Speed));
        let config = merged.session_config();
        assert_eq!(config.idle_timeout, Duration::from_secs(60));
        assert!(config.auto_accept);
        assert!(!config.verify);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = std::env::temp_dir().join("ghoststream_test").join("args");
        let _ = fs::create_dir_all(&dir);
        let path = dir.join("bad.toml");
        fs::write(&path, "mode = 12").unwrap();

        assert!(Args::from_file(&path).is_err());
        assert!(Args::from_file(&dir.join("missing.toml")).unwrap().is_none());

        let _ = fs::remove_dir_all(&dir);
    }
}
