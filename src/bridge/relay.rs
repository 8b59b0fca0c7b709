//! Relay context: the isolated surface hosting the planning UI.
//!
//! The relay sits between the UI runtime and the host. UI commands become
//! host-bound messages; host replies become UI events. The relay also takes
//! part in the liveness handshake: it answers host pings and pings the host
//! once after loading.

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::mailbox::{ANY_ORIGIN, Mailbox, Port};
use super::protocol::{ErrorPayload, HostBound, RelayBound, SetIterationPayload, decode, encode};
use crate::ado::classification::{AreaRoot, PiRow};
use crate::ado::pipeline::PlanningData;
use crate::ado::workitems::TestTagUpdate;

/// Requests the UI runtime can issue.
#[derive(Debug, Clone, PartialEq)]
pub enum UiCommand {
    RequestIterations,
    RequestAreas,
    RequestData { area_root: String, pi_root: String },
    SetIteration { id: u64, iteration_path: String },
    SetTests(TestTagUpdate),
    OpenWorkItem { id: u64 },
}

impl From<UiCommand> for HostBound {
    fn from(command: UiCommand) -> Self {
        match command {
            UiCommand::RequestIterations => HostBound::ReqIterations,
            UiCommand::RequestAreas => HostBound::ReqAreas,
            UiCommand::RequestData { area_root, pi_root } => {
                HostBound::ReqData { area_root, pi_root }
            }
            UiCommand::SetIteration { id, iteration_path } => HostBound::SetIteration {
                payload: SetIterationPayload { id, iteration_path },
            },
            UiCommand::SetTests(payload) => HostBound::SetTests { payload },
            UiCommand::OpenWorkItem { id } => HostBound::OpenWorkItem { id },
        }
    }
}

/// Replies delivered to the UI runtime.
#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    /// The host is reachable and accepts requests.
    Connected,
    Areas(Vec<AreaRoot>),
    AreaFavorites(Vec<String>),
    PiMeta {
        meta: Vec<PiRow>,
        current: Option<String>,
        next: Option<String>,
    },
    Data(PlanningData),
    Updated { id: u64 },
    Error(ErrorPayload),
}

impl UiEvent {
    /// UI event for a host reply; handshake traffic has none.
    fn from_reply(message: RelayBound) -> Option<Self> {
        let event = match message {
            RelayBound::Areas { areas } => UiEvent::Areas(areas),
            RelayBound::AreaFavorites { favorites } => UiEvent::AreaFavorites(favorites),
            RelayBound::PiMeta {
                meta,
                current,
                next,
            } => UiEvent::PiMeta {
                meta,
                current,
                next,
            },
            RelayBound::Data { payload } => UiEvent::Data(payload),
            RelayBound::Updated { id } => UiEvent::Updated { id },
            RelayBound::Error { error } => UiEvent::Error(error),
            RelayBound::Ping | RelayBound::Pong => return None,
        };
        Some(event)
    }
}

/// The UI runtime's ends of the port channels.
#[derive(Debug)]
pub struct UiHandle {
    commands: mpsc::UnboundedSender<UiCommand>,
    events: mpsc::UnboundedReceiver<UiEvent>,
}

impl UiHandle {
    /// Issue a command. Returns false once the relay is gone.
    pub fn send(&self, command: UiCommand) -> bool {
        self.commands.send(command).is_ok()
    }

    /// Next event, or `None` once the relay is gone.
    pub async fn recv(&mut self) -> Option<UiEvent> {
        self.events.recv().await
    }

    /// Wait until the host accepts requests.
    pub async fn connected(&mut self) -> bool {
        while let Some(event) = self.recv().await {
            if event == UiEvent::Connected {
                return true;
            }
        }
        false
    }
}

/// A running relay context.
#[derive(Debug)]
pub struct Relay {
    pub port: Port,
    /// Resolves once the relay has loaded.
    pub loaded: oneshot::Receiver<()>,
    pub task: JoinHandle<()>,
}

/// Start a relay whose parent is `host`.
pub fn spawn_relay(mailbox: Mailbox, host: Port, cancel: CancellationToken) -> (Relay, UiHandle) {
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (loaded_tx, loaded_rx) = oneshot::channel();
    let port = mailbox.port();

    let task = tokio::spawn(run_relay(
        mailbox, host, command_rx, event_tx, loaded_tx, cancel,
    ));

    let relay = Relay {
        port,
        loaded: loaded_rx,
        task,
    };
    let ui = UiHandle {
        commands: command_tx,
        events: event_rx,
    };
    (relay, ui)
}

async fn run_relay(
    mut mailbox: Mailbox,
    host: Port,
    mut commands: mpsc::UnboundedReceiver<UiCommand>,
    events: mpsc::UnboundedSender<UiEvent>,
    loaded: oneshot::Sender<()>,
    cancel: CancellationToken,
) {
    let me = mailbox.port();
    let _ = loaded.send(());
    host.post(&me, encode(&HostBound::Ping), ANY_ORIGIN);

    let mut connected = false;
    let mut accepting = true;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            command = commands.recv(), if accepting => match command {
                Some(command) => {
                    tracing::debug!(?command, "relay forwarding command");
                    host.post(&me, encode(&HostBound::from(command)), ANY_ORIGIN);
                }
                // The UI is gone; keep answering the host until cancelled.
                None => accepting = false,
            },
            envelope = mailbox.recv() => {
                let Some(envelope) = envelope else { break };
                if envelope.source.id() != host.id() {
                    tracing::debug!(from = %envelope.source.id(), "relay ignoring foreign message");
                    continue;
                }
                let Some(message) = decode::<RelayBound>(&envelope.data) else {
                    continue;
                };
                match message {
                    RelayBound::Ping => {
                        envelope.reply_to(&me).post(encode(&RelayBound::Pong));
                        // Commands posted from now on queue behind this pong.
                        if !connected {
                            connected = true;
                            let _ = events.send(UiEvent::Connected);
                        }
                    }
                    RelayBound::Pong => tracing::debug!("relay got pong from host"),
                    reply => {
                        if let Some(event) = UiEvent::from_reply(reply) {
                            let _ = events.send(event);
                        }
                    }
                }
            }
        }
    }
    tracing::debug!(relay = %me.id(), "relay stopped");
}
