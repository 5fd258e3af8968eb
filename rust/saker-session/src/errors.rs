//! Error types for the session layer.

use std::io;

use saker_wire::{FaultKind, PeerId, RemoteFault};

/// Failure while dispatching an incoming invocation.
///
/// Every variant is recovered at the dispatch site: it becomes an
/// [`ExceptionNotify`](saker_wire::Message::ExceptionNotify) back to the
/// caller plus a local exception-listener notification. It never takes the
/// connection down.
#[derive(Debug)]
pub enum InvokeFault {
    /// No provider is registered for the requested interface.
    UnregisteredInterface { interface: String },
    /// The interface exists but has no method with this signature.
    UnknownMethod { interface: String, method: String },
    /// Argument values did not line up with the declared parameter kinds.
    InvalidArguments { detail: String },
    /// The implementation reported a failure.
    Failed { message: String },
}

impl InvokeFault {
    /// Shorthand for an implementation-reported failure.
    pub fn failed(message: impl Into<String>) -> Self {
        InvokeFault::Failed {
            message: message.into(),
        }
    }

    /// The wire-level fault value for this failure.
    pub fn to_remote_fault(&self) -> RemoteFault {
        match self {
            InvokeFault::UnregisteredInterface { interface } => RemoteFault::new(
                FaultKind::UnregisteredInterface,
                format!("interface is not registered: {interface}"),
            ),
            InvokeFault::UnknownMethod { interface, method } => RemoteFault::new(
                FaultKind::UnknownMethod,
                format!("no such method: {interface}.{method}"),
            ),
            InvokeFault::InvalidArguments { detail } => {
                RemoteFault::new(FaultKind::InvalidArguments, detail.clone())
            }
            InvokeFault::Failed { message } => {
                RemoteFault::new(FaultKind::Invocation, message.clone())
            }
        }
    }
}

impl std::fmt::Display for InvokeFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvokeFault::UnregisteredInterface { interface } => {
                write!(f, "interface is not registered: {interface}")
            }
            InvokeFault::UnknownMethod { interface, method } => {
                write!(f, "no such method: {interface}.{method}")
            }
            InvokeFault::InvalidArguments { detail } => {
                write!(f, "invalid arguments: {detail}")
            }
            InvokeFault::Failed { message } => write!(f, "invocation failed: {message}"),
        }
    }
}

impl std::error::Error for InvokeFault {}

/// Error attributed to a remote peer, delivered to exception listeners.
#[derive(Debug)]
pub enum RpcError {
    /// The peer reported a failure via `ExceptionNotify`.
    Remote(RemoteFault),
    /// A local invocation on the peer's behalf failed.
    Invoke(InvokeFault),
    /// The connection's transport faulted.
    Transport(io::Error),
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RpcError::Remote(fault) => write!(f, "remote fault: {fault}"),
            RpcError::Invoke(fault) => write!(f, "invocation fault: {fault}"),
            RpcError::Transport(e) => write!(f, "transport fault: {e}"),
        }
    }
}

impl std::error::Error for RpcError {}

/// Error from a proxy call.
///
/// A call never waits for the peer; the only failures are local.
#[derive(Debug)]
pub enum CallError {
    /// Argument encoding failed.
    Encode(postcard::Error),
    /// The arguments do not match any method declared by the interface.
    SignatureMismatch {
        interface: &'static str,
        method: String,
    },
    /// The connection is closed; the message was not sent.
    ConnectionClosed,
}

impl std::fmt::Display for CallError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CallError::Encode(e) => write!(f, "encode error: {e}"),
            CallError::SignatureMismatch { interface, method } => {
                write!(f, "no method on {interface} matches {method} with these arguments")
            }
            CallError::ConnectionClosed => write!(f, "connection closed"),
        }
    }
}

impl std::error::Error for CallError {}

impl From<postcard::Error> for CallError {
    fn from(e: postcard::Error) -> Self {
        CallError::Encode(e)
    }
}

/// Registration-time failure. Surfaced from the builder call itself, never
/// deferred to call time.
#[derive(Debug)]
pub enum RegistryError {
    /// The interface name is already bound.
    DuplicateInterface(String),
    /// The descriptor is unusable (empty name, no methods, duplicate
    /// signatures).
    InvalidInterface { interface: String, detail: String },
    /// A peer with this id is already registered.
    DuplicatePeer(PeerId),
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryError::DuplicateInterface(name) => {
                write!(f, "interface already registered: {name}")
            }
            RegistryError::InvalidInterface { interface, detail } => {
                write!(f, "invalid interface {interface}: {detail}")
            }
            RegistryError::DuplicatePeer(id) => write!(f, "peer already registered: {id}"),
        }
    }
}

impl std::error::Error for RegistryError {}

/// Error terminating a connection's driver.
#[derive(Debug)]
pub enum ConnectionError {
    /// IO error on the transport.
    Io(io::Error),
    /// Connection closed before the session was established.
    Closed,
    /// Internal dispatch failure (task panic, registry inconsistency).
    Dispatch(String),
}

impl std::fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionError::Io(e) => write!(f, "io error: {e}"),
            ConnectionError::Closed => write!(f, "connection closed"),
            ConnectionError::Dispatch(msg) => write!(f, "dispatch error: {msg}"),
        }
    }
}

impl std::error::Error for ConnectionError {}

impl From<io::Error> for ConnectionError {
    fn from(e: io::Error) -> Self {
        ConnectionError::Io(e)
    }
}

/// Error establishing an outgoing session.
#[derive(Debug)]
pub enum ConnectError {
    /// IO error while connecting or during handshake.
    Io(io::Error),
    /// The peer did not complete the handshake in time.
    HandshakeTimeout,
    /// The peer closed the connection before the handshake completed.
    ConnectionClosed,
}

impl std::fmt::Display for ConnectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectError::Io(e) => write!(f, "io error: {e}"),
            ConnectError::HandshakeTimeout => write!(f, "handshake timed out"),
            ConnectError::ConnectionClosed => write!(f, "connection closed during handshake"),
        }
    }
}

impl std::error::Error for ConnectError {}

impl From<io::Error> for ConnectError {
    fn from(e: io::Error) -> Self {
        ConnectError::Io(e)
    }
}

/// Shutdown did not complete cleanly.
///
/// A partially-closed endpoint is not safe to ignore, so every connection
/// that failed to close is surfaced to the shutdown caller. Closing is still
/// wait-for-all: one failure never stops the others from being closed.
#[derive(Debug)]
pub struct ShutdownError {
    pub failures: Vec<ConnectionError>,
}

impl std::fmt::Display for ShutdownError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} connection(s) failed to shut down cleanly",
            self.failures.len()
        )?;
        if let Some(first) = self.failures.first() {
            write!(f, " (first: {first})")?;
        }
        Ok(())
    }
}

impl std::error::Error for ShutdownError {}
