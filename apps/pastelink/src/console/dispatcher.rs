use std::sync::Arc;
use std::time::Duration;

use peer_transport::{ChannelMessage, ChannelState, DataChannel};
use tracing::{debug, trace};

use super::{ConsoleInput, Terminal};
use crate::probe::SpeedProbe;

pub const USER_PROMPT: &str = "You: ";
/// Pause before the first prompt so the open/diagnostics output lands first.
pub const SETTLE_DELAY: Duration = Duration::from_millis(100);

const SPEED_TEST: &str = "speed_test()";

/// Commands handled locally; never sent to the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    SpeedTest,
}

impl ControlCommand {
    pub fn parse(line: &str) -> Option<Self> {
        match line.trim() {
            SPEED_TEST => Some(ControlCommand::SpeedTest),
            _ => None,
        }
    }
}

/// What happened to one operator line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Command(ControlCommand),
    Sent,
    Dropped,
}

pub struct ConsoleDispatcher {
    channel: Arc<dyn DataChannel>,
    probe: SpeedProbe,
    terminal: Arc<dyn Terminal>,
}

impl ConsoleDispatcher {
    pub fn new(channel: Arc<dyn DataChannel>, probe: SpeedProbe, terminal: Arc<dyn Terminal>) -> Self {
        Self {
            channel,
            probe,
            terminal,
        }
    }

    /// Prompt and route lines until input ends.
    pub async fn run(self, mut input: ConsoleInput) {
        tokio::time::sleep(SETTLE_DELAY).await;
        loop {
            self.terminal.prompt(USER_PROMPT);
            let Some(line) = input.next_line().await else {
                break;
            };
            self.terminal.prompt_answered();
            self.dispatch(&line);
        }
        debug!(target = "console", label = %self.channel.label(), "console loop finished");
    }

    pub fn dispatch(&self, line: &str) -> Dispatch {
        if let Some(command) = ControlCommand::parse(line) {
            match command {
                ControlCommand::SpeedTest => {
                    let _ = self.probe.run(self.channel.as_ref(), self.terminal.as_ref());
                }
            }
            return Dispatch::Command(command);
        }

        let state = self.channel.state();
        if state != ChannelState::Open {
            trace!(target = "console", %state, "channel not open; dropping line");
            return Dispatch::Dropped;
        }
        match self.channel.send(ChannelMessage::Text(line.to_string())) {
            Ok(()) => Dispatch::Sent,
            Err(err) => {
                debug!(target = "console", error = %err, "dropping line");
                Dispatch::Dropped
            }
        }
    }
}
