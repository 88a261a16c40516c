use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::telemetry::logging::{LogConfig, LogLevel};

#[derive(Parser, Debug)]
#[command(
    name = "pastelink",
    about = "Peer-to-peer chat over WebRTC with copy/paste signaling",
    version
)]
pub struct Cli {
    #[command(flatten)]
    pub logging: LoggingArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug, Clone)]
pub struct LoggingArgs {
    #[arg(
        long = "log-level",
        global = true,
        value_enum,
        env = "PASTELINK_LOG_LEVEL",
        default_value_t = LogLevel::Warn,
        help = "Minimum log level (error, warn, info, debug, trace)"
    )]
    pub level: LogLevel,

    #[arg(
        long = "log-file",
        global = true,
        value_name = "PATH",
        env = "PASTELINK_LOG_FILE",
        help = "Write structured logs to the specified file instead of stderr"
    )]
    pub file: Option<PathBuf>,
}

impl LoggingArgs {
    pub fn to_config(&self) -> LogConfig {
        LogConfig {
            level: self.level,
            file: self.file.clone(),
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create the offer and wait for the peer's answer
    Offer(SessionArgs),
    /// Accept a peer's offer and produce the answer
    Answer(SessionArgs),
    /// Print a fresh random signaling key
    Keygen,
}

#[derive(Args, Debug, Clone, Default)]
pub struct SessionArgs {
    #[arg(
        long,
        env = "PASTELINK_KEY",
        value_name = "BASE64",
        conflicts_with = "passphrase",
        hide_env_values = true,
        help = "Shared 32-byte signaling key, base64 encoded (see `pastelink keygen`)"
    )]
    pub key: Option<String>,

    #[arg(
        long,
        env = "PASTELINK_PASSPHRASE",
        value_name = "TEXT",
        hide_env_values = true,
        help = "Shared passphrase to derive the signaling key from"
    )]
    pub passphrase: Option<String>,

    #[arg(
        long = "stun",
        value_name = "URL",
        help = "STUN/TURN server URL; repeat for several (default: the public Google STUN server)"
    )]
    pub stun: Vec<String>,

    #[arg(
        long = "no-stun",
        conflicts_with = "stun",
        help = "Use host candidates only"
    )]
    pub no_stun: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_offer_with_repeated_stun() {
        let cli = Cli::try_parse_from([
            "pastelink",
            "--log-level",
            "debug",
            "offer",
            "--key",
            "abc",
            "--stun",
            "stun:a:1",
            "--stun",
            "stun:b:2",
        ])
        .unwrap();
        assert_eq!(cli.logging.level, LogLevel::Debug);
        let Command::Offer(args) = cli.command else {
            panic!("expected offer");
        };
        assert_eq!(args.key.as_deref(), Some("abc"));
        assert_eq!(args.stun, vec!["stun:a:1".to_string(), "stun:b:2".to_string()]);
    }

    #[test]
    fn key_and_passphrase_conflict() {
        let result = Cli::try_parse_from([
            "pastelink",
            "answer",
            "--key",
            "abc",
            "--passphrase",
            "words",
        ]);
        assert!(result.is_err());
    }
}
