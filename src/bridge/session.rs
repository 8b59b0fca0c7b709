//! A planning session: one relay surface and one host listener.
//!
//! ```text
//! Closed ──open──▶ Opening ──relay loaded──▶ AwaitingHandshake ──SP_PONG──▶ Live
//!    ▲                                                                      │
//!    └──────────────────── backdrop click / page unload ◀──────────────────┘
//! ```
//!
//! While awaiting the handshake the host pings the relay on a fixed interval
//! with a bounded attempt budget. Requests are only served once `Live`.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::host::RequestHandler;
use super::mailbox::{Envelope, Mailbox, Port};
use super::protocol::{HostBound, RelayBound, decode, encode};
use super::relay::{UiHandle, spawn_relay};
use super::{HOST_ORIGIN, OVERLAY_ROOT_ID, OVERLAY_SURFACE_ID, RELAY_ORIGIN};
use crate::inject::{BODY, Element, HostPage};

/// Default interval between handshake pings.
pub const DEFAULT_HANDSHAKE_INTERVAL: Duration = Duration::from_millis(250);

/// Default number of handshake pings before giving up.
pub const DEFAULT_HANDSHAKE_MAX_ATTEMPTS: u32 = 20;

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Closed,
    Opening,
    AwaitingHandshake,
    Live,
}

impl SessionState {
    pub fn is_live(&self) -> bool {
        matches!(self, SessionState::Live)
    }

    pub fn is_open(&self) -> bool {
        !matches!(self, SessionState::Closed)
    }
}

/// Handshake ping schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeConfig {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_HANDSHAKE_INTERVAL,
            max_attempts: DEFAULT_HANDSHAKE_MAX_ATTEMPTS,
        }
    }
}

/// An open session. Dropping it closes the session.
pub struct Session {
    page: Arc<dyn HostPage>,
    cancel: CancellationToken,
    state: watch::Receiver<SessionState>,
    listener: Option<JoinHandle<()>>,
    relay: Option<JoinHandle<()>>,
}

impl Session {
    /// Attach a relay surface to `page` and start the host listener.
    ///
    /// Returns `None` when a surface is already attached.
    pub fn open(
        page: Arc<dyn HostPage>,
        handler: Arc<RequestHandler>,
        handshake: HandshakeConfig,
    ) -> Option<(Session, UiHandle)> {
        if page.contains(OVERLAY_ROOT_ID) {
            tracing::debug!("overlay already open");
            return None;
        }

        let (state_tx, state_rx) = watch::channel(SessionState::Opening);
        page.append_child(BODY, Element::new(OVERLAY_ROOT_ID));
        page.append_child(BODY, Element::new(OVERLAY_SURFACE_ID));

        let cancel = CancellationToken::new();
        let host = Mailbox::new(HOST_ORIGIN);
        let (relay, ui) = spawn_relay(Mailbox::new(RELAY_ORIGIN), host.port(), cancel.child_token());

        let listener = tokio::spawn(listen(
            host,
            relay.port,
            relay.loaded,
            handler,
            handshake,
            state_tx,
            cancel.clone(),
        ));
        tracing::info!("session opening");

        let session = Session {
            page,
            cancel,
            state: state_rx,
            listener: Some(listener),
            relay: Some(relay.task),
        };
        Some((session, ui))
    }

    pub fn state(&self) -> SessionState {
        if self.cancel.is_cancelled() {
            return SessionState::Closed;
        }
        *self.state.borrow()
    }

    /// Wait until the session is live. Returns false if it closes first.
    pub async fn wait_live(&mut self) -> bool {
        self.state
            .wait_for(|s| s.is_live())
            .await
            .is_ok()
    }

    /// Detach the listener and remove the surface from the page.
    pub fn close(&mut self) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.cancel.cancel();
        self.page.remove(OVERLAY_SURFACE_ID);
        self.page.remove(OVERLAY_ROOT_ID);
        tracing::info!("session closed");
    }

    /// Close and wait for the listener and relay to stop.
    pub async fn shutdown(mut self) {
        self.close();
        for task in [self.listener.take(), self.relay.take()].into_iter().flatten() {
            let _ = task.await;
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state())
            .finish()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

async fn listen(
    mut mailbox: Mailbox,
    relay: Port,
    loaded: oneshot::Receiver<()>,
    handler: Arc<RequestHandler>,
    handshake: HandshakeConfig,
    state: watch::Sender<SessionState>,
    cancel: CancellationToken,
) {
    let me = mailbox.port();

    tokio::select! {
        _ = cancel.cancelled() => return,
        result = loaded => if result.is_err() {
            tracing::warn!("relay stopped before loading");
            return;
        },
    }
    state.send_replace(SessionState::AwaitingHandshake);
    tracing::debug!("awaiting handshake");

    let mut ticker = tokio::time::interval(handshake.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut attempts = 0u32;
    let mut pinging = true;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick(), if pinging => {
                if attempts >= handshake.max_attempts {
                    tracing::warn!(attempts, "handshake timed out, relay never answered");
                    pinging = false;
                    continue;
                }
                attempts += 1;
                relay.post(&me, encode(&RelayBound::Ping), RELAY_ORIGIN);
            }
            envelope = mailbox.recv() => {
                let Some(envelope) = envelope else { break };
                if envelope.source.id() != relay.id() {
                    tracing::debug!(from = %envelope.source.id(), "ignoring message from outside the session");
                    continue;
                }
                let Some(message) = decode::<HostBound>(&envelope.data) else {
                    continue;
                };
                match message {
                    HostBound::Ping => {
                        envelope.reply_to(&me).post(encode(&RelayBound::Pong));
                    }
                    HostBound::Pong => {
                        pinging = false;
                        if !state.borrow().is_live() {
                            state.send_replace(SessionState::Live);
                            tracing::info!(attempts, "session live");
                        }
                    }
                    request => dispatch(&handler, &me, &envelope, request, *state.borrow()),
                }
            }
        }
    }

    state.send_replace(SessionState::Closed);
}

fn dispatch(
    handler: &Arc<RequestHandler>,
    me: &Port,
    envelope: &Envelope,
    request: HostBound,
    state: SessionState,
) {
    if !state.is_live() {
        tracing::debug!(?state, ?request, "dropping request before handshake");
        return;
    }
    let handler = Arc::clone(handler);
    let reply = envelope.reply_to(me);
    tokio::spawn(async move { handler.handle(request, reply).await });
}
