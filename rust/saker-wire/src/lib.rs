#![deny(unsafe_code)]

//! Wire-level types for the saker protocol.
//!
//! Everything that crosses a connection is a [`Message`]. Messages are
//! immutable value objects: constructed once, sent once, and reconstructible
//! from bytes without any state beyond the kind table in [`ArgKind`].

use serde::{Deserialize, Serialize};

/// Identity of one connected peer.
///
/// Assigned by the accepting side during handshake and carried back in
/// [`Message::HandshakeFromServer`]. Unique among all currently-connected
/// peers of one server; never reused while the originating connection is
/// open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct PeerId(pub u64);

impl PeerId {
    /// Create a new peer ID.
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw u64 value.
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl From<u64> for PeerId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "peer:{}", self.0)
    }
}

/// The closed set of parameter kinds the protocol admits.
///
/// Method signatures are expressed against this table, so "only serializable
/// argument types" is checked when an interface is registered, not when a
/// call arrives. `Encoded` covers user-defined types carried as postcard
/// bytes.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArgKind {
    Bool = 0,
    I8 = 1,
    I16 = 2,
    I32 = 3,
    I64 = 4,
    U8 = 5,
    U16 = 6,
    U32 = 7,
    U64 = 8,
    F32 = 9,
    F64 = 10,
    Str = 11,
    Bytes = 12,
    Encoded = 13,
}

impl std::fmt::Display for ArgKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ArgKind::Bool => "bool",
            ArgKind::I8 => "i8",
            ArgKind::I16 => "i16",
            ArgKind::I32 => "i32",
            ArgKind::I64 => "i64",
            ArgKind::U8 => "u8",
            ArgKind::U16 => "u16",
            ArgKind::U32 => "u32",
            ArgKind::U64 => "u64",
            ArgKind::F32 => "f32",
            ArgKind::F64 => "f64",
            ArgKind::Str => "str",
            ArgKind::Bytes => "bytes",
            ArgKind::Encoded => "encoded",
        };
        f.write_str(name)
    }
}

/// One serialized argument value.
///
/// Variant order is wire-significant (postcard enum discriminants) and
/// mirrors [`ArgKind`].
#[repr(u8)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ArgValue {
    Bool(bool) = 0,
    I8(i8) = 1,
    I16(i16) = 2,
    I32(i32) = 3,
    I64(i64) = 4,
    U8(u8) = 5,
    U16(u16) = 6,
    U32(u32) = 7,
    U64(u64) = 8,
    F32(f32) = 9,
    F64(f64) = 10,
    Str(String) = 11,
    Bytes(Vec<u8>) = 12,
    /// A user-defined value: a stable type name plus its postcard encoding.
    Encoded { type_name: String, bytes: Vec<u8> } = 13,
}

impl ArgValue {
    /// The kind of this value.
    pub fn kind(&self) -> ArgKind {
        match self {
            ArgValue::Bool(_) => ArgKind::Bool,
            ArgValue::I8(_) => ArgKind::I8,
            ArgValue::I16(_) => ArgKind::I16,
            ArgValue::I32(_) => ArgKind::I32,
            ArgValue::I64(_) => ArgKind::I64,
            ArgValue::U8(_) => ArgKind::U8,
            ArgValue::U16(_) => ArgKind::U16,
            ArgValue::U32(_) => ArgKind::U32,
            ArgValue::U64(_) => ArgKind::U64,
            ArgValue::F32(_) => ArgKind::F32,
            ArgValue::F64(_) => ArgKind::F64,
            ArgValue::Str(_) => ArgKind::Str,
            ArgValue::Bytes(_) => ArgKind::Bytes,
            ArgValue::Encoded { .. } => ArgKind::Encoded,
        }
    }

    /// Encode a user-defined value into an `Encoded` argument.
    pub fn encoded<T: Serialize>(
        type_name: impl Into<String>,
        value: &T,
    ) -> Result<Self, postcard::Error> {
        Ok(ArgValue::Encoded {
            type_name: type_name.into(),
            bytes: postcard::to_allocvec(value)?,
        })
    }

    /// Decode an `Encoded` argument back into a user-defined value.
    ///
    /// Returns `None` if this is not an `Encoded` value.
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> Option<Result<T, postcard::Error>> {
        match self {
            ArgValue::Encoded { bytes, .. } => Some(postcard::from_bytes(bytes)),
            _ => None,
        }
    }
}

/// The serialized error value carried by [`Message::ExceptionNotify`].
///
/// Faults nest: an invocation failure wrapping an underlying cause keeps the
/// chain across the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteFault {
    pub kind: FaultKind,
    pub message: String,
    pub cause: Option<Box<RemoteFault>>,
}

impl RemoteFault {
    /// Create a fault with no cause.
    pub fn new(kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            cause: None,
        }
    }

    /// Attach an underlying cause.
    pub fn with_cause(mut self, cause: RemoteFault) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }
}

impl std::fmt::Display for RemoteFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)?;
        if let Some(cause) = &self.cause {
            write!(f, " (caused by: {cause})")?;
        }
        Ok(())
    }
}

/// What went wrong on the remote side.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FaultKind {
    /// The named interface has no registered provider.
    UnregisteredInterface = 0,
    /// The interface exists but the method signature does not.
    UnknownMethod = 1,
    /// Argument kinds did not match the declared signature.
    InvalidArguments = 2,
    /// The implementation itself reported a failure.
    Invocation = 3,
    /// A transport-level fault, reported rather than invoked.
    Transport = 4,
}

/// Protocol message.
///
/// The variant set is closed: a peer sending anything else is a fatal
/// transport error for that connection. Variant order is wire-significant
/// (postcard enum discriminants).
#[repr(u8)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    /// First message from the connecting side.
    HandshakeFromClient = 0,

    /// Accepting side's reply, carrying the identity it assigned.
    HandshakeFromServer { id: PeerId } = 1,

    /// Invoke a method on the peer. Fire-and-forget: no reply on success.
    ///
    /// `(method, params)` identifies the method; `params` lists the declared
    /// kinds so overloads stay unambiguous, and `args` carries the values in
    /// declaration order.
    InvocationRequest {
        interface: String,
        method: String,
        params: Vec<ArgKind>,
        args: Vec<ArgValue>,
    } = 2,

    /// A failure travelling back to whoever caused it (or, for transport
    /// faults, to whoever should hear about it).
    ExceptionNotify { fault: RemoteFault } = 3,

    /// Periodic liveness signal; receipt itself is the information.
    KeepAlive = 4,
}

impl Message {
    /// Short name for logging.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Message::HandshakeFromClient => "HandshakeFromClient",
            Message::HandshakeFromServer { .. } => "HandshakeFromServer",
            Message::InvocationRequest { .. } => "InvocationRequest",
            Message::ExceptionNotify { .. } => "ExceptionNotify",
            Message::KeepAlive => "KeepAlive",
        }
    }
}
