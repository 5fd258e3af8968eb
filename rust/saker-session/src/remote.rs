//! Remote peer handles.

use std::sync::Arc;

use saker_wire::{ArgKind, ArgValue, Message, PeerId};
use tokio::sync::{mpsc, watch};

use crate::errors::CallError;
use crate::interface::{InterfaceDef, Proxy};

/// Idempotent close signal shared between a connection's driver and
/// everything that may want to end it.
pub struct CloseSignal {
    tx: watch::Sender<bool>,
}

impl CloseSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// Request the connection to close. Safe to call any number of times,
    /// from any task.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once the signal has been triggered.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // wait_for cannot fail here: the sender lives at least as long as
        // this borrow of self.
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

impl Default for CloseSignal {
    fn default() -> Self {
        Self::new()
    }
}

struct RemoteInner {
    id: PeerId,
    remote_addr: String,
    outgoing: mpsc::UnboundedSender<Message>,
    close: Arc<CloseSignal>,
}

/// Handle to one connected peer.
///
/// Cheap to clone; all clones share the connection. A `Remote` exists only
/// once the peer's identity is known — it is created at handshake completion
/// and becomes unusable (sends fail with
/// [`CallError::ConnectionClosed`]) once the connection goes away.
#[derive(Clone)]
pub struct Remote {
    inner: Arc<RemoteInner>,
}

impl Remote {
    pub(crate) fn new(
        id: PeerId,
        remote_addr: String,
        outgoing: mpsc::UnboundedSender<Message>,
        close: Arc<CloseSignal>,
    ) -> Self {
        Self {
            inner: Arc::new(RemoteInner {
                id,
                remote_addr,
                outgoing,
                close,
            }),
        }
    }

    /// The peer's identity, assigned at handshake.
    pub fn id(&self) -> PeerId {
        self.inner.id
    }

    /// Transport-level address of the peer. Informational only.
    pub fn remote_addr(&self) -> &str {
        &self.inner.remote_addr
    }

    /// Obtain a typed proxy for an interface the peer serves.
    pub fn proxy<P: Proxy>(&self) -> P {
        P::bind(self.caller(P::INTERFACE))
    }

    /// Obtain an untyped caller for an interface the peer serves.
    pub fn caller(&self, def: &'static InterfaceDef) -> Caller {
        Caller {
            def,
            remote: self.clone(),
        }
    }

    /// Ask the connection to close. Idempotent.
    pub fn close(&self) {
        self.inner.close.trigger();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.close.is_triggered()
    }

    /// Enqueue a message on this connection's outgoing queue.
    ///
    /// Never blocks; the connection's driver serializes actual writes, so
    /// per-connection send order is enqueue order.
    pub(crate) fn send(&self, msg: Message) -> Result<(), CallError> {
        if self.inner.close.is_triggered() {
            return Err(CallError::ConnectionClosed);
        }
        self.inner
            .outgoing
            .send(msg)
            .map_err(|_| CallError::ConnectionClosed)
    }
}

impl std::fmt::Debug for Remote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Remote")
            .field("id", &self.inner.id)
            .field("remote_addr", &self.inner.remote_addr)
            .finish_non_exhaustive()
    }
}

/// Marshals calls for one interface onto one remote peer.
///
/// Fire-and-forget: `call` validates the signature, builds the
/// `InvocationRequest`, enqueues it, and returns. There is no reply to wait
/// for — failures on the remote side come back asynchronously as
/// `ExceptionNotify`.
#[derive(Clone)]
pub struct Caller {
    def: &'static InterfaceDef,
    remote: Remote,
}

impl Caller {
    pub fn interface(&self) -> &'static InterfaceDef {
        self.def
    }

    pub fn remote(&self) -> &Remote {
        &self.remote
    }

    /// Invoke `method` with `args` on the peer.
    ///
    /// Many tasks may call concurrently on clones of the same caller; each
    /// call builds and enqueues its own message.
    pub fn call(&self, method: &str, args: Vec<ArgValue>) -> Result<(), CallError> {
        let kinds: Vec<ArgKind> = args.iter().map(ArgValue::kind).collect();
        let def = self
            .def
            .method(method, &kinds)
            .ok_or_else(|| CallError::SignatureMismatch {
                interface: self.def.name,
                method: method.to_string(),
            })?;
        self.remote.send(Message::InvocationRequest {
            interface: self.def.name.to_string(),
            method: def.name.to_string(),
            params: def.params.to_vec(),
            args,
        })
    }
}
