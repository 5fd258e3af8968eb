#![deny(unsafe_code)]

//! Session layer for saker RPC.
//!
//! Everything between the wire types and a concrete transport lives here:
//! peer identity ([`Remote`]), typed calling stubs ([`Proxy`], [`Caller`]),
//! interface descriptors and serving adapters ([`InterfaceDef`],
//! [`ServiceImpl`]), provider strategies ([`Provider`]), the connected-peer
//! registry ([`ClientRegistry`]), the per-connection protocol driver
//! ([`Driver`]), and the keepalive loop ([`KeepaliveMonitor`]).
//!
//! The crate is transport-agnostic: anything implementing
//! [`MessageTransport`] can carry a session. `saker-stream` provides the
//! byte-stream implementation.

mod driver;
mod errors;
mod interface;
mod keepalive;
mod listener;
mod provider;
mod registry;
mod remote;
mod transport;

pub use driver::{accept_session, initiate_session, Driver, Endpoint};
pub use errors::{
    CallError, ConnectError, ConnectionError, InvokeFault, RegistryError, RpcError, ShutdownError,
};
pub use interface::{CallArgs, InterfaceDef, MethodDef, Proxy, ServiceImpl, WireValue};
pub use keepalive::{KeepaliveMonitor, DEFAULT_KEEPALIVE_PERIOD};
pub use listener::{ClientListener, ExceptionListener, Listeners};
pub use provider::{Binding, Bindings, FromRemote, Provider};
pub use registry::ClientRegistry;
pub use remote::{Caller, CloseSignal, Remote};
pub use transport::MessageTransport;

#[cfg(test)]
mod tests;
