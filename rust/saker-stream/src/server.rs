//! TCP server: builder, accept loop, shutdown.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use saker_session::{
    accept_session, Bindings, ClientListener, CloseSignal, ConnectionError, Endpoint,
    ExceptionListener, FromRemote, InterfaceDef, KeepaliveMonitor, Listeners, RegistryError,
    Remote, ServiceImpl, ShutdownError, DEFAULT_KEEPALIVE_PERIOD,
};
use saker_wire::PeerId;
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::framing::LengthPrefixedFramed;

/// Configures and starts an [`RpcServer`].
///
/// Interfaces, listeners, and the keepalive period are fixed before the
/// server starts; registration problems surface from the `add_*` call
/// itself.
pub struct ServerBuilder {
    bindings: Bindings,
    client_listeners: Vec<Box<dyn ClientListener>>,
    exception_listeners: Vec<Box<dyn ExceptionListener>>,
    keepalive: Duration,
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self {
            bindings: Bindings::new(),
            client_listeners: Vec::new(),
            exception_listeners: Vec::new(),
            keepalive: DEFAULT_KEEPALIVE_PERIOD,
        }
    }

    /// Expose `def` served by one shared instance. The instance is used by
    /// every connection concurrently, so it must be thread-safe.
    pub fn add_object(
        mut self,
        def: &'static InterfaceDef,
        instance: Arc<dyn ServiceImpl>,
    ) -> Result<Self, RegistryError> {
        self.bindings.add_shared(def, instance)?;
        Ok(self)
    }

    /// Expose `def` served by a fresh `T` per connection, constructed with
    /// the owning [`Remote`] so the implementation can call back into its
    /// own client.
    pub fn add_class<T>(mut self, def: &'static InterfaceDef) -> Result<Self, RegistryError>
    where
        T: ServiceImpl + FromRemote + 'static,
    {
        self.bindings.add_constructed::<T>(def)?;
        Ok(self)
    }

    /// Expose `def` served by a fresh instance per connection, produced by
    /// `factory`.
    pub fn add_factory<F, T>(
        mut self,
        def: &'static InterfaceDef,
        factory: F,
    ) -> Result<Self, RegistryError>
    where
        F: Fn(Remote) -> T + Send + Sync + 'static,
        T: ServiceImpl + 'static,
    {
        self.bindings.add_factory(def, factory)?;
        Ok(self)
    }

    pub fn add_client_listener(mut self, listener: impl ClientListener + 'static) -> Self {
        self.client_listeners.push(Box::new(listener));
        self
    }

    pub fn add_exception_listener(mut self, listener: impl ExceptionListener + 'static) -> Self {
        self.exception_listeners.push(Box::new(listener));
        self
    }

    /// Interval between `KeepAlive` messages to every connected client.
    /// Zero disables keepalive entirely (not recommended: abrupt
    /// disconnects may go unnoticed until the next write).
    pub fn keepalive(mut self, period: Duration) -> Self {
        self.keepalive = period;
        self
    }

    /// Bind and start serving.
    pub async fn bind(self, addr: impl ToSocketAddrs) -> io::Result<RpcServer> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;

        let endpoint = Arc::new(Endpoint::new(
            self.bindings,
            Listeners::new(self.client_listeners, self.exception_listeners),
        ));
        let conn_tasks: Arc<Mutex<Vec<ConnTask>>> = Arc::new(Mutex::new(Vec::new()));

        let keepalive = KeepaliveMonitor::spawn(self.keepalive, {
            let endpoint = endpoint.clone();
            move || endpoint.registry().snapshot()
        });

        let accept_task = tokio::spawn(accept_loop(
            listener,
            endpoint.clone(),
            conn_tasks.clone(),
        ));
        debug!(%local_addr, "server listening");

        Ok(RpcServer {
            endpoint,
            local_addr,
            accept_task: Some(accept_task),
            keepalive,
            conn_tasks,
        })
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

struct ConnTask {
    close: Arc<CloseSignal>,
    handle: JoinHandle<Result<(), ConnectionError>>,
}

async fn accept_loop(
    listener: TcpListener,
    endpoint: Arc<Endpoint>,
    conn_tasks: Arc<Mutex<Vec<ConnTask>>>,
) {
    loop {
        match listener.accept().await {
            Ok((stream, peer_addr)) => {
                debug!(%peer_addr, "inbound connection");
                let close = Arc::new(CloseSignal::new());
                let handle = tokio::spawn({
                    let endpoint = endpoint.clone();
                    let close = close.clone();
                    async move {
                        let framed = LengthPrefixedFramed::new(stream);
                        match accept_session(framed, endpoint, peer_addr.to_string(), close).await
                        {
                            Ok((_remote, driver)) => driver.run().await,
                            // The peer (or a shutdown) went away before the
                            // handshake finished; nothing to clean up.
                            Err(ConnectionError::Closed) => Ok(()),
                            Err(e) => {
                                warn!(%peer_addr, error = %e, "handshake failed");
                                Err(e)
                            }
                        }
                    }
                });
                conn_tasks.lock().push(ConnTask { close, handle });
            }
            Err(e) => {
                warn!(error = %e, "accept failed");
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

/// A running server.
///
/// Owns the accept loop, the connected-peer registry, and the keepalive
/// monitor. Dropping it closes everything without waiting; call
/// [`shutdown`](RpcServer::shutdown) to wait for connections to drain and
/// observe failures.
pub struct RpcServer {
    endpoint: Arc<Endpoint>,
    local_addr: SocketAddr,
    accept_task: Option<JoinHandle<()>>,
    keepalive: Option<KeepaliveMonitor>,
    conn_tasks: Arc<Mutex<Vec<ConnTask>>>,
}

impl RpcServer {
    /// The address the server is listening on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Handle to a connected client, if it is currently connected.
    pub fn get_client(&self, id: PeerId) -> Option<Remote> {
        self.endpoint.registry().get(id)
    }

    /// Snapshot of all currently connected clients.
    pub fn clients(&self) -> Vec<Remote> {
        self.endpoint.registry().snapshot()
    }

    /// Stop the server: keepalive first, then the accept loop (no new
    /// connections admitted), then every live connection — closed in
    /// parallel and awaited to completion, wait-for-all.
    ///
    /// Failures closing individual connections are collected and surfaced;
    /// a partially-closed server is not silently ignored. Calling shutdown
    /// again is a no-op.
    pub async fn shutdown(&mut self) -> Result<(), ShutdownError> {
        if let Some(keepalive) = self.keepalive.take() {
            keepalive.shutdown().await;
        }

        if let Some(accept_task) = self.accept_task.take() {
            accept_task.abort();
            let _ = accept_task.await;
        }

        let tasks: Vec<ConnTask> = std::mem::take(&mut *self.conn_tasks.lock());
        let mut failures = Vec::new();
        let mut pending = Vec::new();
        for task in tasks {
            if task.handle.is_finished() {
                // Ended long before shutdown; its outcome was already
                // reported through the exception listeners.
                if let Ok(Err(e)) = task.handle.await {
                    debug!(error = %e, "connection had already ended");
                }
                continue;
            }
            task.close.trigger();
            pending.push(task.handle);
        }
        for handle in pending {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => failures.push(e),
                Err(join) => failures.push(ConnectionError::Dispatch(format!(
                    "connection task panicked: {join}"
                ))),
            }
        }
        debug!(failures = failures.len(), "server shut down");

        if failures.is_empty() {
            Ok(())
        } else {
            Err(ShutdownError { failures })
        }
    }
}

impl Drop for RpcServer {
    fn drop(&mut self) {
        if let Some(keepalive) = self.keepalive.take() {
            keepalive.stop();
        }
        if let Some(accept_task) = self.accept_task.take() {
            accept_task.abort();
        }
        for task in self.conn_tasks.lock().iter() {
            task.close.trigger();
        }
    }
}
