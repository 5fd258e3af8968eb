#![deny(unsafe_code)]

//! Byte-stream transport layer for saker RPC.
//!
//! Provides the machinery for running saker sessions over any async byte
//! stream:
//!
//! - Length-prefixed framing for message boundaries
//! - A TCP server with an accept loop, connection tracking, and ordered
//!   shutdown
//! - A TCP client with inline handshake and keepalive
//!
//! ```ignore
//! use saker_stream::{ServerBuilder, ClientBuilder};
//!
//! let server = ServerBuilder::new()
//!     .add_object(&ECHO, Arc::new(EchoService))?
//!     .bind("127.0.0.1:0")
//!     .await?;
//!
//! let client = ClientBuilder::new()
//!     .connect(server.local_addr())
//!     .await?;
//! let echo: EchoProxy = client.proxy();
//! echo.ping("hello")?;
//! ```

mod client;
mod framing;
mod server;

pub use client::{ClientBuilder, RpcClient, DEFAULT_HANDSHAKE_TIMEOUT};
pub use framing::{LengthPrefixedFramed, MAX_FRAME_SIZE};
pub use server::{RpcServer, ServerBuilder};

// Re-export session types for convenience.
pub use saker_session::{
    CallArgs, CallError, Caller, ClientListener, ClientRegistry, ConnectError, ConnectionError,
    ExceptionListener, FromRemote, InterfaceDef, InvokeFault, KeepaliveMonitor, MessageTransport,
    MethodDef, Proxy, Provider, RegistryError, Remote, RpcError, ServiceImpl, ShutdownError,
    WireValue, DEFAULT_KEEPALIVE_PERIOD,
};

// Re-export wire types for convenience.
pub use saker_wire::{ArgKind, ArgValue, FaultKind, Message, PeerId, RemoteFault};
