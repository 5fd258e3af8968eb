//! Per-connection protocol driver.
//!
//! A connection moves through `Handshaking -> Active -> Closed`. The
//! handshake phase lives in [`accept_session`] / [`initiate_session`]; once
//! identity is established they hand back a [`Remote`] plus a [`Driver`]
//! whose `run` loop is the connection's single handler context: it owns the
//! transport, serializes all writes, interprets every incoming message, and
//! performs teardown exactly once on the way out.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use saker_wire::{ArgKind, ArgValue, Message, PeerId};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::errors::{ConnectError, ConnectionError, InvokeFault, RpcError};
use crate::interface::{CallArgs, ServiceImpl};
use crate::listener::Listeners;
use crate::provider::Bindings;
use crate::registry::ClientRegistry;
use crate::remote::{CloseSignal, Remote};
use crate::transport::MessageTransport;

/// Everything one endpoint's connections share: the binding table, the peer
/// registry, the listener snapshots, and the id allocator.
///
/// A server holds one `Endpoint` across all accepted connections; a client
/// holds one for its single connection. The registry is the only mutable
/// state here, and it is internally synchronized — per-connection state
/// lives in each connection's [`Driver`].
pub struct Endpoint {
    bindings: Bindings,
    registry: ClientRegistry,
    listeners: Listeners,
    next_peer_id: AtomicU64,
}

impl Endpoint {
    pub fn new(bindings: Bindings, listeners: Listeners) -> Self {
        Self {
            bindings,
            registry: ClientRegistry::new(),
            listeners,
            next_peer_id: AtomicU64::new(1),
        }
    }

    pub fn bindings(&self) -> &Bindings {
        &self.bindings
    }

    pub fn registry(&self) -> &ClientRegistry {
        &self.registry
    }

    pub fn listeners(&self) -> &Listeners {
        &self.listeners
    }

    fn allocate_peer_id(&self) -> PeerId {
        PeerId::new(self.next_peer_id.fetch_add(1, Ordering::Relaxed))
    }
}

/// Accept-side handshake.
///
/// Waits for `HandshakeFromClient`, then allocates an id, registers the
/// peer, fires connect listeners, and replies `HandshakeFromServer` — in
/// that order. Anything received before the handshake is logged and dropped
/// rather than treated as fatal: keepalives can race the handshake, and a
/// lenient accept loop keeps those connections alive.
pub async fn accept_session<T: MessageTransport>(
    mut transport: T,
    endpoint: Arc<Endpoint>,
    peer_addr: String,
    close: Arc<CloseSignal>,
) -> Result<(Remote, Driver<T>), ConnectionError> {
    use futures_util::FutureExt;

    loop {
        futures_util::select! {
            _ = close.wait().fuse() => {
                return Err(ConnectionError::Closed);
            }
            res = transport.recv().fuse() => {
                match res? {
                    None => return Err(ConnectionError::Closed),
                    Some(Message::HandshakeFromClient) => break,
                    Some(other) => {
                        warn!(
                            peer = %peer_addr,
                            kind = other.kind_name(),
                            "dropping message received before handshake"
                        );
                    }
                }
            }
        }
    }

    let id = endpoint.allocate_peer_id();
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let remote = Remote::new(id, peer_addr.clone(), out_tx, close.clone());
    endpoint
        .registry()
        .add(remote.clone())
        .map_err(|e| ConnectionError::Dispatch(e.to_string()))?;
    endpoint.listeners().fire_connect(&remote);

    if let Err(e) = transport.send(&Message::HandshakeFromServer { id }).await {
        endpoint.listeners().fire_disconnect(&remote);
        endpoint.registry().remove(id);
        return Err(ConnectionError::Io(e));
    }
    debug!(%id, peer = %peer_addr, "peer connected");

    let driver = Driver::new(transport, endpoint, remote.clone(), out_rx, close);
    Ok((remote, driver))
}

/// Initiate-side handshake.
///
/// Sends `HandshakeFromClient` and waits for `HandshakeFromServer`, dropping
/// anything else that arrives in between. The returned [`Remote`] is the
/// server's handle, carrying the identity the server assigned to this
/// session.
pub async fn initiate_session<T: MessageTransport>(
    mut transport: T,
    endpoint: Arc<Endpoint>,
    peer_addr: String,
    close: Arc<CloseSignal>,
    handshake_timeout: Duration,
) -> Result<(Remote, Driver<T>), ConnectError> {
    transport.send(&Message::HandshakeFromClient).await?;

    let deadline = Instant::now() + handshake_timeout;
    let id = loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(ConnectError::HandshakeTimeout);
        }
        match transport.recv_timeout(remaining).await? {
            Some(Message::HandshakeFromServer { id }) => break id,
            Some(other) => {
                warn!(
                    peer = %peer_addr,
                    kind = other.kind_name(),
                    "dropping message received before handshake completed"
                );
            }
            None => {
                if Instant::now() >= deadline {
                    return Err(ConnectError::HandshakeTimeout);
                }
                return Err(ConnectError::ConnectionClosed);
            }
        }
    };

    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let remote = Remote::new(id, peer_addr.clone(), out_tx, close.clone());
    if let Err(e) = endpoint.registry().add(remote.clone()) {
        // A single initiated connection cannot collide with itself; keep the
        // session usable either way.
        warn!(%e, "registry rejected the server remote");
    }
    endpoint.listeners().fire_connect(&remote);
    debug!(%id, peer = %peer_addr, "session established");

    let driver = Driver::new(transport, endpoint, remote.clone(), out_rx, close);
    Ok((remote, driver))
}

/// The Active-state message loop for one connection.
///
/// Owns the transport exclusively; the socket is closed exactly once, when
/// the driver is dropped after `run` returns. Holds the per-connection
/// implementation cache, so instance construction is single-flight per
/// (connection, interface) without any locking.
pub struct Driver<T> {
    io: T,
    endpoint: Arc<Endpoint>,
    remote: Remote,
    out_rx: mpsc::UnboundedReceiver<Message>,
    close: Arc<CloseSignal>,
    instances: HashMap<&'static str, Arc<dyn ServiceImpl>>,
}

impl<T: MessageTransport> Driver<T> {
    fn new(
        io: T,
        endpoint: Arc<Endpoint>,
        remote: Remote,
        out_rx: mpsc::UnboundedReceiver<Message>,
        close: Arc<CloseSignal>,
    ) -> Self {
        Self {
            io,
            endpoint,
            remote,
            out_rx,
            close,
            instances: HashMap::new(),
        }
    }

    /// The peer this driver serves.
    pub fn remote(&self) -> &Remote {
        &self.remote
    }

    /// Run until the connection ends, then tear down: fire disconnect
    /// listeners, drop the registry entry, release the instance cache.
    ///
    /// Every per-message failure is recovered inside the loop; only
    /// transport faults terminate it with an error.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        let result = self.run_loop().await;
        self.teardown();
        result
    }

    async fn run_loop(&mut self) -> Result<(), ConnectionError> {
        use futures_util::FutureExt;

        loop {
            futures_util::select! {
                _ = self.close.wait().fuse() => {
                    debug!(id = %self.remote.id(), "closing locally");
                    return Ok(());
                }
                out = self.out_rx.recv().fuse() => {
                    let Some(msg) = out else { return Ok(()) };
                    if let Err(e) = self.io.send(&msg).await {
                        self.report_transport_fault(&e);
                        return Err(ConnectionError::Io(e));
                    }
                }
                res = self.io.recv().fuse() => {
                    match res {
                        Ok(Some(msg)) => self.handle_message(msg).await?,
                        Ok(None) => {
                            debug!(id = %self.remote.id(), "peer closed the connection");
                            return Ok(());
                        }
                        Err(e) => {
                            self.report_transport_fault(&e);
                            return Err(ConnectionError::Io(e));
                        }
                    }
                }
            }
        }
    }

    async fn handle_message(&mut self, msg: Message) -> Result<(), ConnectionError> {
        trace!(id = %self.remote.id(), kind = msg.kind_name(), "message received");
        match msg {
            Message::InvocationRequest {
                interface,
                method,
                params,
                args,
            } => {
                if let Err(fault) = self.invoke(&interface, &method, &params, &args) {
                    warn!(%interface, %method, %fault, "invocation failed");
                    let notify = Message::ExceptionNotify {
                        fault: fault.to_remote_fault(),
                    };
                    if let Err(e) = self.io.send(&notify).await {
                        self.report_transport_fault(&e);
                        return Err(ConnectionError::Io(e));
                    }
                    self.endpoint
                        .listeners()
                        .fire_exception(&self.remote, &RpcError::Invoke(fault));
                }
            }
            Message::ExceptionNotify { fault } => {
                self.endpoint
                    .listeners()
                    .fire_exception(&self.remote, &RpcError::Remote(fault));
            }
            Message::KeepAlive => {
                // Receipt is the liveness signal; nothing to do.
            }
            other @ (Message::HandshakeFromClient | Message::HandshakeFromServer { .. }) => {
                warn!(
                    id = %self.remote.id(),
                    kind = other.kind_name(),
                    "protocol violation: handshake message on an active connection, dropping"
                );
            }
        }
        Ok(())
    }

    /// Resolve and execute one invocation, synchronously on this
    /// connection's handler context. A slow implementation stalls only this
    /// connection.
    fn invoke(
        &mut self,
        interface: &str,
        method: &str,
        params: &[ArgKind],
        args: &[ArgValue],
    ) -> Result<(), InvokeFault> {
        let binding = self.endpoint.bindings().get(interface).ok_or_else(|| {
            InvokeFault::UnregisteredInterface {
                interface: interface.to_string(),
            }
        })?;

        if binding.def.method(method, params).is_none() {
            return Err(InvokeFault::UnknownMethod {
                interface: interface.to_string(),
                method: method.to_string(),
            });
        }

        let kinds: Vec<ArgKind> = args.iter().map(ArgValue::kind).collect();
        if kinds != params {
            return Err(InvokeFault::InvalidArguments {
                detail: format!(
                    "{interface}.{method}: declared {params:?}, got {kinds:?}"
                ),
            });
        }

        let instance = match self.instances.get(binding.def.name) {
            Some(instance) => instance.clone(),
            None => {
                let instance = binding.provider.provide_for(&self.remote);
                self.instances.insert(binding.def.name, instance.clone());
                instance
            }
        };

        instance.invoke(CallArgs::new(method, args))
    }

    fn report_transport_fault(&self, e: &io::Error) {
        warn!(id = %self.remote.id(), error = %e, "transport fault");
        let carried = io::Error::new(e.kind(), e.to_string());
        self.endpoint
            .listeners()
            .fire_exception(&self.remote, &RpcError::Transport(carried));
    }

    fn teardown(&mut self) {
        self.close.trigger();
        self.endpoint.listeners().fire_disconnect(&self.remote);
        self.endpoint.registry().remove(self.remote.id());
        self.instances.clear();
        debug!(id = %self.remote.id(), "peer disconnected");
    }
}
