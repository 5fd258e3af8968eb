#![deny(unsafe_code)]

//! saker — bidirectional fire-and-forget RPC.
//!
//! A server accepts long-lived connections; either side registers interface
//! implementations and invokes the other's across the wire. Calls carry no
//! return value by contract — failures travel back asynchronously as fault
//! notifications.
//!
//! This crate is the unified API surface; depend on it rather than the
//! individual component crates.

// Wire-level types.
pub use saker_wire::{ArgKind, ArgValue, FaultKind, Message, PeerId, RemoteFault};

// Session layer: identity, descriptors, providers, dispatch, keepalive.
pub use saker_session::{
    accept_session, initiate_session, Binding, Bindings, CallArgs, CallError, Caller,
    ClientListener, ClientRegistry, CloseSignal, ConnectError, ConnectionError, Driver, Endpoint,
    ExceptionListener, FromRemote, InterfaceDef, InvokeFault, KeepaliveMonitor, Listeners,
    MessageTransport, MethodDef, Provider, Proxy, RegistryError, Remote, RpcError, ServiceImpl,
    ShutdownError, WireValue, DEFAULT_KEEPALIVE_PERIOD,
};

// Byte-stream transport: framing plus the TCP server and client.
pub use saker_stream::{
    ClientBuilder, LengthPrefixedFramed, RpcClient, RpcServer, ServerBuilder,
    DEFAULT_HANDSHAKE_TIMEOUT, MAX_FRAME_SIZE,
};

/// Prelude for the common user surface.
///
/// ```ignore
/// use saker::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        ArgKind, ArgValue, CallArgs, ClientBuilder, FromRemote, InterfaceDef, InvokeFault,
        MethodDef, Proxy, Remote, ServerBuilder, ServiceImpl, WireValue,
    };
}
