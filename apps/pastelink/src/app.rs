use std::sync::Arc;

use peer_transport::{PeerTransport, TransportError};
use thiserror::Error;
use tracing::info;
use transport_webrtc::{WebRtcConfig, WebRtcTransport};

use crate::cli::{Cli, Command, SessionArgs};
use crate::config::{Config, ConfigError};
use crate::console::{ConsoleInput, StdoutTerminal, Terminal};
use crate::session::{PeerRole, PeerSession, SessionError};
use crate::signaling::{SignalingCodec, SignalingKey};
use crate::telemetry::logging::{self, InitError};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Session(#[from] SessionError),
    #[error("{0}")]
    Config(#[from] ConfigError),
    #[error("logging initialization failed: {0}")]
    Logging(#[from] InitError),
    #[error("transport setup failed: {0}")]
    Transport(#[from] TransportError),
}

impl AppError {
    /// Process exit status for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            AppError::Config(_) => 2,
            _ => 1,
        }
    }
}

pub async fn run(cli: Cli) -> Result<(), AppError> {
    logging::init(&cli.logging.to_config())?;

    match cli.command {
        Command::Keygen => {
            println!("{}", SignalingKey::generate().to_base64());
            Ok(())
        }
        Command::Offer(args) => run_session(PeerRole::Initiator, args).await,
        Command::Answer(args) => run_session(PeerRole::Responder, args).await,
    }
}

pub fn resolve_key(args: &SessionArgs) -> Result<SignalingKey, ConfigError> {
    let key = match (args.key.as_deref(), args.passphrase.as_deref()) {
        (Some(key), _) => SignalingKey::from_base64(key),
        (None, Some(passphrase)) => SignalingKey::from_passphrase(passphrase),
        (None, None) => return Err(ConfigError::MissingKey),
    };
    key.map_err(|err| ConfigError::InvalidKey(err.to_string()))
}

async fn run_session(role: PeerRole, args: SessionArgs) -> Result<(), AppError> {
    let key = resolve_key(&args)?;
    let mut config = Config::from_env()?;
    config.apply_stun_overrides(&args.stun, args.no_stun);
    info!(
        target = "app",
        %role,
        stun = ?config.stun_urls,
        label = %config.channel_label,
        "starting session"
    );

    let transport: Arc<dyn PeerTransport> =
        Arc::new(WebRtcTransport::new(WebRtcConfig::new(config.stun_urls.clone())).await?);
    let terminal: Arc<dyn Terminal> = Arc::new(StdoutTerminal::new());
    let session = PeerSession::new(
        role,
        transport,
        SignalingCodec::new(&key),
        ConsoleInput::stdin(),
        terminal,
        config.session_settings(),
    );
    session.run().await?;
    Ok(())
}
