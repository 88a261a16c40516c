//! Manual offer/answer negotiation for one peer, and the session lifetime
//! around it.

mod context;
mod error;
mod state;

use std::sync::Arc;

use peer_transport::{DescriptionKind, PeerTransport, SessionDescription};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub use context::{ConsoleLaunch, SessionContext};
pub use error::SessionError;
pub use state::{PeerRole, SessionState};

use crate::channel::ChannelController;
use crate::console::{ConsoleInput, Terminal};
use crate::probe::{DEFAULT_PROBE_BYTES, SpeedProbe};
use crate::signaling::SignalingCodec;

pub const DEFAULT_CHANNEL_LABEL: &str = "chat";
pub const BANNER_END: &str = "=== End of Encrypted SDP ===";

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub channel_label: String,
    pub probe_bytes: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            channel_label: DEFAULT_CHANNEL_LABEL.to_string(),
            probe_bytes: DEFAULT_PROBE_BYTES,
        }
    }
}

/// Header printed above the local token.
pub fn banner_header(role: PeerRole) -> &'static str {
    match role {
        PeerRole::Initiator => "=== Encrypted SDP (send to callee) ===",
        PeerRole::Responder => "=== Encrypted SDP (send to caller) ===",
    }
}

pub struct PeerSession {
    transport: Arc<dyn PeerTransport>,
    codec: SignalingCodec,
    input: Option<ConsoleInput>,
    console_feed: Option<mpsc::Sender<String>>,
    terminal: Arc<dyn Terminal>,
    settings: SessionSettings,
    context: Arc<SessionContext>,
    controller: Arc<ChannelController>,
}

impl PeerSession {
    pub fn new(
        role: PeerRole,
        transport: Arc<dyn PeerTransport>,
        codec: SignalingCodec,
        input: ConsoleInput,
        terminal: Arc<dyn Terminal>,
        settings: SessionSettings,
    ) -> Self {
        let context = SessionContext::new(role);
        let controller = Arc::new(ChannelController::new(
            Arc::clone(&context),
            Arc::downgrade(&transport),
            Arc::clone(&terminal),
        ));
        Self {
            transport,
            codec,
            input: Some(input),
            console_feed: None,
            terminal,
            settings,
            context,
            controller,
        }
    }

    pub fn role(&self) -> PeerRole {
        self.context.role()
    }

    /// Shared state, for watching the session from outside.
    pub fn handle(&self) -> Arc<SessionContext> {
        Arc::clone(&self.context)
    }

    /// Run negotiation up to the point where only the channel is missing.
    /// The console is armed as soon as the peer token is in; [`Self::run`]
    /// feeds it the remaining operator input.
    pub async fn establish(&mut self) -> Result<(), SessionError> {
        info!(target = "session", role = %self.role(), "starting negotiation");
        match self.role() {
            PeerRole::Initiator => self.establish_initiator().await,
            PeerRole::Responder => self.establish_responder().await,
        }
    }

    /// Negotiate, then keep the session up until console input ends or the
    /// process is interrupted.
    pub async fn run(mut self) -> Result<(), SessionError> {
        self.establish().await?;

        let relay = relay_input(
            self.input.take(),
            self.console_feed.take(),
            Arc::clone(&self.context),
        );
        let finished = async {
            relay.await;
            self.context.console_finished().await;
        };
        tokio::select! {
            _ = finished => {
                debug!(target = "session", "console input ended");
            }
            signal = tokio::signal::ctrl_c() => {
                if let Err(err) = signal {
                    warn!(target = "session", error = %err, "failed to listen for ctrl-c");
                }
                info!(target = "session", "interrupted");
            }
        }

        if let Err(err) = self.transport.close().await {
            warn!(target = "session", error = %err, "transport close failed");
        }
        Ok(())
    }

    async fn establish_initiator(&mut self) -> Result<(), SessionError> {
        let sink = Arc::clone(&self.controller);
        self.transport
            .open_channel(&self.settings.channel_label, sink)
            .await?;

        let offer = self.transport.create_local_offer().await?;
        self.context.advance(SessionState::LocalOfferCreated)?;

        let token = self.codec.encrypt(&offer)?;
        self.display_token(&token);
        self.context.advance(SessionState::OfferEncryptedAndDisplayed)?;

        self.context.advance(SessionState::AwaitingEncryptedAnswer)?;
        let token = self.read_token("Paste encrypted SDP answer:").await?;
        let answer = self.codec.decrypt(&token)?;
        expect_kind(&answer, DescriptionKind::Answer)?;
        self.context.advance(SessionState::AnswerDecrypted)?;

        self.transport.set_remote_description(answer).await?;
        self.context.advance(SessionState::RemoteDescriptionSet)?;
        Ok(())
    }

    async fn establish_responder(&mut self) -> Result<(), SessionError> {
        let sink = Arc::clone(&self.controller);
        self.transport.accept_channels(sink);

        self.context.advance(SessionState::AwaitingEncryptedOffer)?;
        let token = self.read_token("Paste encrypted SDP offer:").await?;
        let offer = self.codec.decrypt(&token)?;
        expect_kind(&offer, DescriptionKind::Offer)?;
        self.context.advance(SessionState::OfferDecrypted)?;

        self.transport.set_remote_description(offer).await?;
        self.context.advance(SessionState::RemoteDescriptionSet)?;

        let answer = self.transport.create_local_answer().await?;
        self.context.advance(SessionState::LocalAnswerCreated)?;

        let token = self.codec.encrypt(&answer)?;
        self.display_token(&token);
        self.context.advance(SessionState::AnswerEncryptedAndDisplayed)?;
        Ok(())
    }

    fn display_token(&self, token: &str) {
        self.terminal.line("");
        self.terminal.line(banner_header(self.role()));
        self.terminal.line(token);
        self.terminal.line(BANNER_END);
        self.terminal.line("");
    }

    /// Wait for the first non-blank operator line, then release the input to
    /// the console.
    async fn read_token(&mut self, prompt: &str) -> Result<String, SessionError> {
        self.terminal.line(prompt);
        let input = self.input.as_mut().ok_or(SessionError::InputClosed)?;
        let token = loop {
            match input.next_line().await {
                Some(line) if line.trim().is_empty() => continue,
                Some(line) => {
                    self.terminal.prompt_answered();
                    break line;
                }
                None => return Err(SessionError::InputClosed),
            }
        };
        self.arm_console();
        Ok(token)
    }

    /// Lines after the token belong to the console; they are buffered in its
    /// feed until it starts.
    fn arm_console(&mut self) {
        if self.console_feed.is_some() {
            return;
        }
        let (feed, input) = ConsoleInput::channel();
        self.console_feed = Some(feed);
        self.context.arm_console(ConsoleLaunch {
            input,
            probe: SpeedProbe::new(self.settings.probe_bytes),
            terminal: Arc::clone(&self.terminal),
        });
    }
}

async fn relay_input(
    input: Option<ConsoleInput>,
    feed: Option<mpsc::Sender<String>>,
    context: Arc<SessionContext>,
) {
    if let (Some(mut input), Some(feed)) = (input, feed) {
        while let Some(line) = input.next_line().await {
            if feed.send(line).await.is_err() {
                break;
            }
        }
    }
    context.input_ended();
}

fn expect_kind(description: &SessionDescription, expected: DescriptionKind) -> Result<(), SessionError> {
    if description.kind == expected {
        Ok(())
    } else {
        Err(SessionError::MalformedDescription(format!(
            "expected an {expected}, got an {}",
            description.kind
        )))
    }
}
