//! TCP client: builder, connect + handshake, shutdown.

use std::sync::Arc;
use std::time::Duration;

use saker_session::{
    initiate_session, Bindings, CloseSignal, ConnectError, ConnectionError, Endpoint,
    ExceptionListener, FromRemote, InterfaceDef, KeepaliveMonitor, Listeners, Proxy,
    RegistryError, Remote, ServiceImpl, ShutdownError, DEFAULT_KEEPALIVE_PERIOD,
};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::framing::LengthPrefixedFramed;

/// Default handshake timeout: 10 seconds.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Configures and connects an [`RpcClient`].
///
/// The protocol is symmetric, so a client may expose interfaces of its own:
/// the server can invoke them over the same connection.
pub struct ClientBuilder {
    bindings: Bindings,
    exception_listeners: Vec<Box<dyn ExceptionListener>>,
    keepalive: Duration,
    handshake_timeout: Duration,
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self {
            bindings: Bindings::new(),
            exception_listeners: Vec::new(),
            keepalive: DEFAULT_KEEPALIVE_PERIOD,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }

    /// Expose `def` served by one shared instance.
    pub fn add_object(
        mut self,
        def: &'static InterfaceDef,
        instance: Arc<dyn ServiceImpl>,
    ) -> Result<Self, RegistryError> {
        self.bindings.add_shared(def, instance)?;
        Ok(self)
    }

    /// Expose `def` served by a fresh `T`, constructed with the server's
    /// [`Remote`].
    pub fn add_class<T>(mut self, def: &'static InterfaceDef) -> Result<Self, RegistryError>
    where
        T: ServiceImpl + FromRemote + 'static,
    {
        self.bindings.add_constructed::<T>(def)?;
        Ok(self)
    }

    /// Expose `def` served by a factory-produced instance.
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

    pub fn add_exception_listener(mut self, listener: impl ExceptionListener + 'static) -> Self {
        self.exception_listeners.push(Box::new(listener));
        self
    }

    /// Interval between `KeepAlive` messages to the server. Zero disables
    /// keepalive entirely.
    pub fn keepalive(mut self, period: Duration) -> Self {
        self.keepalive = period;
        self
    }

    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Connect, perform the handshake, and start the connection's driver.
    pub async fn connect(self, addr: impl ToSocketAddrs) -> Result<RpcClient, ConnectError> {
        let stream = TcpStream::connect(addr).await?;
        let peer_addr = stream.peer_addr()?;
        let framed = LengthPrefixedFramed::new(stream);

        let endpoint = Arc::new(Endpoint::new(
            self.bindings,
            Listeners::new(Vec::new(), self.exception_listeners),
        ));
        let close = Arc::new(CloseSignal::new());

        let (server, driver) = initiate_session(
            framed,
            endpoint.clone(),
            peer_addr.to_string(),
            close.clone(),
            self.handshake_timeout,
        )
        .await?;
        debug!(id = %server.id(), %peer_addr, "connected");

        let driver_task = tokio::spawn(driver.run());
        let keepalive = KeepaliveMonitor::spawn(self.keepalive, {
            let server = server.clone();
            move || vec![server.clone()]
        });

        Ok(RpcClient {
            server,
            close,
            driver_task: Some(driver_task),
            keepalive,
        })
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A connected client.
///
/// Dropping it closes the connection without waiting; call
/// [`shutdown`](RpcClient::shutdown) to wait for the driver to finish and
/// observe failures.
pub struct RpcClient {
    server: Remote,
    close: Arc<CloseSignal>,
    driver_task: Option<JoinHandle<Result<(), ConnectionError>>>,
    keepalive: Option<KeepaliveMonitor>,
}

impl RpcClient {
    /// Handle to the server. Carries the identity the server assigned to
    /// this session.
    pub fn server(&self) -> &Remote {
        &self.server
    }

    /// Typed proxy for an interface the server exposes.
    pub fn proxy<P: Proxy>(&self) -> P {
        self.server.proxy()
    }

    /// Close the connection: keepalive first, then the driver, awaited to
    /// completion. Calling shutdown again is a no-op.
    pub async fn shutdown(&mut self) -> Result<(), ShutdownError> {
        if let Some(keepalive) = self.keepalive.take() {
            keepalive.shutdown().await;
        }
        self.close.trigger();
        let Some(driver_task) = self.driver_task.take() else {
            return Ok(());
        };
        match driver_task.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ShutdownError { failures: vec![e] }),
            Err(join) => Err(ShutdownError {
                failures: vec![ConnectionError::Dispatch(format!(
                    "driver task panicked: {join}"
                ))],
            }),
        }
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        if let Some(keepalive) = self.keepalive.take() {
            keepalive.stop();
        }
        self.close.trigger();
    }
}
