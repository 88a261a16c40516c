use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use peer_transport::DataChannel;
use tokio::sync::{Notify, watch};
use tracing::{debug, info};

use super::{PeerRole, SessionError, SessionState};
use crate::console::{ConsoleDispatcher, ConsoleInput, Terminal};
use crate::probe::SpeedProbe;

/// Everything the console needs once it is allowed to start.
pub struct ConsoleLaunch {
    pub input: ConsoleInput,
    pub probe: SpeedProbe,
    pub terminal: Arc<dyn Terminal>,
}

/// The console runs once it has its input, a start request and a bound
/// channel, in whatever order those arrive.
enum ConsoleSlot {
    Pending {
        launch: Option<ConsoleLaunch>,
        requested: bool,
    },
    Launched,
    /// Input ended before the console ever ran.
    Abandoned,
}

struct Progress {
    state: SessionState,
    history: Vec<SessionState>,
    channel: Option<Arc<dyn DataChannel>>,
    channel_open: bool,
    peer_messaged: bool,
}

/// Per-session shared state, touched from negotiation, channel events and
/// the console task.
pub struct SessionContext {
    role: PeerRole,
    progress: Mutex<Progress>,
    state_tx: watch::Sender<SessionState>,
    console: Mutex<ConsoleSlot>,
    console_launches: AtomicUsize,
    console_done: Notify,
}

impl SessionContext {
    pub fn new(role: PeerRole) -> Arc<Self> {
        let (state_tx, _) = watch::channel(SessionState::Idle);
        Arc::new(Self {
            role,
            progress: Mutex::new(Progress {
                state: SessionState::Idle,
                history: vec![SessionState::Idle],
                channel: None,
                channel_open: false,
                peer_messaged: false,
            }),
            state_tx,
            console: Mutex::new(ConsoleSlot::Pending {
                launch: None,
                requested: false,
            }),
            console_launches: AtomicUsize::new(0),
            console_done: Notify::new(),
        })
    }

    pub fn role(&self) -> PeerRole {
        self.role
    }

    pub fn state(&self) -> SessionState {
        self.progress.lock().state
    }

    /// States entered so far, oldest first.
    pub fn history(&self) -> Vec<SessionState> {
        self.progress.lock().history.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    /// Resolve once the session has reached `target`.
    pub async fn wait_for(&self, target: SessionState) {
        let sequence = self.role.sequence();
        let Some(wanted) = sequence.iter().position(|state| *state == target) else {
            return;
        };
        let mut states = self.subscribe();
        let _ = states
            .wait_for(|state| {
                sequence
                    .iter()
                    .position(|candidate| candidate == state)
                    .is_some_and(|reached| reached >= wanted)
            })
            .await;
    }

    pub fn advance(&self, to: SessionState) -> Result<(), SessionError> {
        let mut progress = self.progress.lock();
        self.transition(&mut progress, to)?;
        self.promote_if_ready(&mut progress);
        Ok(())
    }

    pub fn channel(&self) -> Option<Arc<dyn DataChannel>> {
        self.progress.lock().channel.clone()
    }

    /// Make `channel` the one outgoing lines and probes go to. A console
    /// start requested before the bind happens now.
    pub fn bind_channel(self: &Arc<Self>, channel: Arc<dyn DataChannel>) {
        self.progress.lock().channel = Some(channel);
        self.launch_if_ready();
    }

    pub fn mark_channel_open(&self) {
        let mut progress = self.progress.lock();
        progress.channel_open = true;
        self.promote_if_ready(&mut progress);
    }

    /// Record an inbound message. Returns true only for the first one.
    pub fn mark_peer_message(&self) -> bool {
        let mut progress = self.progress.lock();
        if progress.peer_messaged {
            return false;
        }
        progress.peer_messaged = true;
        self.promote_if_ready(&mut progress);
        true
    }

    /// Hand over the console once negotiation no longer needs operator
    /// input. Starts it right away if a start was already requested.
    pub fn arm_console(self: &Arc<Self>, launch: ConsoleLaunch) {
        if let ConsoleSlot::Pending { launch: slot @ None, .. } = &mut *self.console.lock() {
            *slot = Some(launch);
        }
        self.launch_if_ready();
    }

    /// Start the console on the bound channel. Only the first call across
    /// the whole session does anything; returns whether this call started it.
    /// A request made before the input or channel is available is kept.
    pub fn start_console(self: &Arc<Self>) -> bool {
        if let ConsoleSlot::Pending { requested, .. } = &mut *self.console.lock() {
            *requested = true;
        }
        self.launch_if_ready()
    }

    /// Operator input ended. If the console never ran, the session is over.
    pub fn input_ended(&self) {
        let mut slot = self.console.lock();
        if matches!(*slot, ConsoleSlot::Pending { .. }) {
            *slot = ConsoleSlot::Abandoned;
            drop(slot);
            debug!(target = "session", role = %self.role, "input ended before the console started");
            self.console_done.notify_one();
        }
    }

    pub fn console_launches(&self) -> usize {
        self.console_launches.load(Ordering::SeqCst)
    }

    /// Resolve when the console loop has ended.
    pub async fn console_finished(&self) {
        self.console_done.notified().await;
    }

    fn launch_if_ready(self: &Arc<Self>) -> bool {
        let mut slot = self.console.lock();
        let ConsoleSlot::Pending {
            launch: Some(_),
            requested: true,
        } = &*slot
        else {
            return false;
        };
        let Some(channel) = self.channel() else {
            debug!(target = "session", "console requested before a channel was bound");
            return false;
        };
        let ConsoleSlot::Pending {
            launch: Some(launch),
            ..
        } = std::mem::replace(&mut *slot, ConsoleSlot::Launched)
        else {
            return false;
        };
        drop(slot);

        self.console_launches.fetch_add(1, Ordering::SeqCst);
        info!(target = "session", role = %self.role, "starting console");
        let context = Arc::clone(self);
        tokio::spawn(async move {
            ConsoleDispatcher::new(channel, launch.probe, launch.terminal)
                .run(launch.input)
                .await;
            context.console_done.notify_one();
        });
        true
    }

    fn transition(&self, progress: &mut Progress, to: SessionState) -> Result<(), SessionError> {
        let from = progress.state;
        if !self.role.permits(from, to) {
            return Err(SessionError::OutOfOrder { from, to });
        }
        progress.state = to;
        progress.history.push(to);
        debug!(target = "session", role = %self.role, %from, %to, "session state advanced");
        self.state_tx.send_replace(to);
        Ok(())
    }

    fn promote_if_ready(&self, progress: &mut Progress) {
        let ready = progress.state == self.role.ready_state()
            && progress.channel_open
            && (self.role == PeerRole::Initiator || progress.peer_messaged);
        if ready && self.transition(progress, SessionState::Connected).is_ok() {
            info!(target = "session", role = %self.role, "session connected");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::CaptureTerminal;
    use peer_transport::ChannelState;
    use peer_transport::loopback::LoopbackChannel;

    fn open_channel() -> Arc<dyn DataChannel> {
        let (channel, _rx) = LoopbackChannel::detached("chat", ChannelState::Open);
        channel
    }

    fn launch() -> (tokio::sync::mpsc::Sender<String>, ConsoleLaunch) {
        let (tx, input) = ConsoleInput::channel();
        (
            tx,
            ConsoleLaunch {
                input,
                probe: SpeedProbe::new(16),
                terminal: Arc::new(CaptureTerminal::new()),
            },
        )
    }

    fn drive(context: &SessionContext, states: &[SessionState]) {
        for state in states {
            context.advance(*state).unwrap();
        }
    }

    #[test]
    fn out_of_order_transition_is_rejected() {
        let context = SessionContext::new(PeerRole::Initiator);
        let err = context.advance(SessionState::AnswerDecrypted).unwrap_err();
        assert!(matches!(
            err,
            SessionError::OutOfOrder {
                from: SessionState::Idle,
                to: SessionState::AnswerDecrypted
            }
        ));
        assert_eq!(context.state(), SessionState::Idle);
    }

    #[test]
    fn initiator_connects_on_open_after_remote_set() {
        use SessionState::*;
        let context = SessionContext::new(PeerRole::Initiator);
        drive(
            &context,
            &[LocalOfferCreated, OfferEncryptedAndDisplayed, AwaitingEncryptedAnswer, AnswerDecrypted],
        );
        context.bind_channel(open_channel());
        context.mark_channel_open();
        assert_eq!(context.state(), AnswerDecrypted);
        context.advance(RemoteDescriptionSet).unwrap();
        assert_eq!(context.state(), Connected);
    }

    #[test]
    fn responder_needs_first_message_to_connect() {
        use SessionState::*;
        let context = SessionContext::new(PeerRole::Responder);
        drive(
            &context,
            &[
                AwaitingEncryptedOffer,
                OfferDecrypted,
                RemoteDescriptionSet,
                LocalAnswerCreated,
                AnswerEncryptedAndDisplayed,
            ],
        );
        context.bind_channel(open_channel());
        context.mark_channel_open();
        assert_eq!(context.state(), AnswerEncryptedAndDisplayed);
        assert!(context.mark_peer_message());
        assert!(!context.mark_peer_message());
        assert_eq!(context.state(), Connected);
    }

    #[tokio::test]
    async fn console_starts_once_under_concurrent_requests() {
        let context = SessionContext::new(PeerRole::Responder);
        context.bind_channel(open_channel());
        let (_tx, launch) = launch();
        context.arm_console(launch);

        let mut handles = Vec::new();
        for _ in 0..32 {
            let context = Arc::clone(&context);
            handles.push(tokio::spawn(async move { context.start_console() }));
        }
        let mut started = 0;
        for handle in handles {
            if handle.await.unwrap() {
                started += 1;
            }
        }
        assert_eq!(started, 1);
        assert_eq!(context.console_launches(), 1);
    }

    #[tokio::test]
    async fn first_message_before_open_still_starts_responder_console() {
        use SessionState::*;
        let context = SessionContext::new(PeerRole::Responder);
        let (_tx, launch) = launch();
        context.arm_console(launch);
        drive(
            &context,
            &[
                AwaitingEncryptedOffer,
                OfferDecrypted,
                RemoteDescriptionSet,
                LocalAnswerCreated,
                AnswerEncryptedAndDisplayed,
            ],
        );

        assert!(context.mark_peer_message());
        assert!(!context.start_console());
        assert_eq!(context.console_launches(), 0);

        context.bind_channel(open_channel());
        context.mark_channel_open();
        for _ in 0..3 {
            assert!(!context.mark_peer_message());
        }
        assert_eq!(context.state(), Connected);
        assert_eq!(context.console_launches(), 1);
    }

    #[tokio::test]
    async fn input_ending_before_launch_finishes_the_console() {
        let context = SessionContext::new(PeerRole::Responder);
        let (_tx, launch) = launch();
        context.arm_console(launch);
        context.input_ended();
        tokio::time::timeout(std::time::Duration::from_secs(2), context.console_finished())
            .await
            .unwrap();

        context.bind_channel(open_channel());
        assert!(!context.start_console());
        assert_eq!(context.console_launches(), 0);
    }

    #[tokio::test]
    async fn early_request_launches_when_armed() {
        let context = SessionContext::new(PeerRole::Initiator);
        context.bind_channel(open_channel());
        assert!(!context.start_console());
        assert_eq!(context.console_launches(), 0);

        let (tx, launch) = launch();
        context.arm_console(launch);
        assert_eq!(context.console_launches(), 1);

        drop(tx);
        tokio::time::timeout(std::time::Duration::from_secs(2), context.console_finished())
            .await
            .unwrap();
    }
}
