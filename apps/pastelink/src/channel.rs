use std::sync::{Arc, Weak};

use async_trait::async_trait;
use peer_transport::{ChannelEventSink, ChannelMessage, DataChannel, PeerTransport};
use tracing::{debug, trace};

use crate::console::Terminal;
use crate::diagnostics;
use crate::probe::MIB;
use crate::session::{PeerRole, SessionContext};

pub const OPEN_NOTICE: &str = "Data channel is open. Start chatting.";

/// Reacts to events on the session's data channel.
pub struct ChannelController {
    context: Arc<SessionContext>,
    transport: Weak<dyn PeerTransport>,
    terminal: Arc<dyn Terminal>,
}

impl ChannelController {
    pub fn new(
        context: Arc<SessionContext>,
        transport: Weak<dyn PeerTransport>,
        terminal: Arc<dyn Terminal>,
    ) -> Self {
        Self {
            context,
            transport,
            terminal,
        }
    }

    pub fn render(message: &ChannelMessage) -> String {
        match message {
            ChannelMessage::Binary(bytes) => {
                format!("Received binary data: {:.2} MB", bytes.len() as f64 / MIB as f64)
            }
            ChannelMessage::Text(text) => format!("Peer: {text}"),
        }
    }
}

#[async_trait]
impl ChannelEventSink for ChannelController {
    async fn on_open(&self, channel: Arc<dyn DataChannel>) {
        debug!(target = "channel", label = %channel.label(), "channel bound");
        self.context.bind_channel(channel);
        self.terminal.line(OPEN_NOTICE);

        if let Some(transport) = self.transport.upgrade() {
            let terminal = Arc::clone(&self.terminal);
            tokio::spawn(async move {
                diagnostics::describe(transport.as_ref(), terminal.as_ref()).await;
            });
        }

        if self.context.role() == PeerRole::Initiator {
            self.context.start_console();
        }
        self.context.mark_channel_open();
    }

    async fn on_message(&self, message: ChannelMessage) {
        trace!(
            target = "channel",
            bytes = message.len(),
            binary = message.is_binary(),
            "inbound message"
        );
        self.terminal.line(&Self::render(&message));

        if self.context.mark_peer_message() && self.context.role() == PeerRole::Responder {
            self.context.start_console();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn renders_binary_size_in_mib() {
        let message = ChannelMessage::Binary(Bytes::from(vec![0u8; MIB]));
        assert_eq!(ChannelController::render(&message), "Received binary data: 1.00 MB");
        let message = ChannelMessage::Binary(Bytes::from(vec![0u8; MIB / 2]));
        assert_eq!(ChannelController::render(&message), "Received binary data: 0.50 MB");
    }

    #[test]
    fn renders_text_as_chat_line() {
        let message = ChannelMessage::Text("hi there".into());
        assert_eq!(ChannelController::render(&message), "Peer: hi there");
    }
}
