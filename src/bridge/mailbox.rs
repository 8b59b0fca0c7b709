//! Point-to-point message delivery between contexts.
//!
//! Each context owns a [`Mailbox`] and hands out [`Port`]s to it. A post
//! carries the sender's port and origin so the receiver can reply to exactly
//! that context. Posts are dropped when the target origin does not match the
//! receiving context or the receiving mailbox is gone.

use std::fmt;

use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Target origin that matches any receiving context.
pub const ANY_ORIGIN: &str = "*";

/// Unique identity of a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(Uuid);

impl ContextId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A delivered message.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub data: Value,
    /// Origin of the sending context.
    pub origin: String,
    /// Port back to the sending context.
    pub source: Port,
}

impl Envelope {
    /// Where replies to this message go.
    pub fn reply_to(&self, from: &Port) -> ReplyTo {
        ReplyTo {
            to: self.source.clone(),
            from: from.clone(),
            origin: self.origin.clone(),
        }
    }
}

/// Address of a context's mailbox.
#[derive(Debug, Clone)]
pub struct Port {
    id: ContextId,
    origin: String,
    tx: mpsc::UnboundedSender<Envelope>,
}

impl Port {
    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Post `data` to this port on behalf of `from`.
    ///
    /// Returns false when the message was dropped.
    pub fn post(&self, from: &Port, data: Value, target_origin: &str) -> bool {
        if target_origin != ANY_ORIGIN && target_origin != self.origin {
            tracing::debug!(
                target_origin,
                origin = %self.origin,
                "dropping post for another origin"
            );
            return false;
        }
        let envelope = Envelope {
            data,
            origin: from.origin.clone(),
            source: from.clone(),
        };
        self.tx.send(envelope).is_ok()
    }

    /// Whether the mailbox behind this port has been dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Reply route captured from an [`Envelope`].
#[derive(Debug, Clone)]
pub struct ReplyTo {
    to: Port,
    from: Port,
    origin: String,
}

impl ReplyTo {
    pub fn post(&self, data: Value) -> bool {
        let delivered = self.to.post(&self.from, data, &self.origin);
        if !delivered {
            tracing::debug!(to = %self.to.id(), "reply discarded");
        }
        delivered
    }
}

/// Receiving end of a context.
#[derive(Debug)]
pub struct Mailbox {
    port: Port,
    rx: mpsc::UnboundedReceiver<Envelope>,
}

impl Mailbox {
    pub fn new(origin: impl Into<String>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            port: Port {
                id: ContextId::new(),
                origin: origin.into(),
                tx,
            },
            rx,
        }
    }

    /// A port delivering to this mailbox.
    pub fn port(&self) -> Port {
        self.port.clone()
    }

    pub async fn recv(&mut self) -> Option<Envelope> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Envelope> {
        self.rx.try_recv().ok()
    }
}
