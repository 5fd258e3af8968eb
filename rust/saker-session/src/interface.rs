//! Interface descriptors and the typed argument surface.
//!
//! An interface is described once, statically, next to the trait it exposes.
//! The descriptor is everything the wire needs: a name, and the method
//! signatures expressed against the closed [`ArgKind`] table. Proxies and
//! serving adapters are both built from it — there is no runtime type
//! synthesis anywhere.

use saker_wire::{ArgKind, ArgValue};

use crate::errors::InvokeFault;
use crate::remote::Caller;

/// One method signature: name plus declared parameter kinds.
///
/// `(name, params)` is the identity; two methods may share a name as long as
/// their parameter kinds differ.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodDef {
    pub name: &'static str,
    pub params: &'static [ArgKind],
}

/// A full interface descriptor.
///
/// ```
/// use saker_session::{InterfaceDef, MethodDef};
/// use saker_wire::ArgKind;
///
/// static ECHO: InterfaceDef = InterfaceDef {
///     name: "demo.Echo",
///     methods: &[MethodDef {
///         name: "ping",
///         params: &[ArgKind::Str],
///     }],
/// };
/// # let _ = &ECHO;
/// ```
#[derive(Debug, Clone, Copy)]
pub struct InterfaceDef {
    pub name: &'static str,
    pub methods: &'static [MethodDef],
}

impl InterfaceDef {
    /// Look up a method by its full signature.
    pub fn method(&self, name: &str, params: &[ArgKind]) -> Option<&MethodDef> {
        self.methods
            .iter()
            .find(|m| m.name == name && m.params == params)
    }

    /// Whether any overload with this name exists.
    pub fn has_method_named(&self, name: &str) -> bool {
        self.methods.iter().any(|m| m.name == name)
    }
}

/// A value that maps onto one of the wire's argument kinds.
pub trait WireValue: Sized {
    const KIND: ArgKind;

    fn into_arg(self) -> ArgValue;

    /// Extract a value of this type, if the argument carries one.
    fn from_arg(arg: &ArgValue) -> Option<Self>;
}

macro_rules! wire_value {
    ($ty:ty, $variant:ident) => {
        impl WireValue for $ty {
            const KIND: ArgKind = ArgKind::$variant;

            fn into_arg(self) -> ArgValue {
                ArgValue::$variant(self)
            }

            fn from_arg(arg: &ArgValue) -> Option<Self> {
                match arg {
                    ArgValue::$variant(v) => Some(v.clone()),
                    _ => None,
                }
            }
        }
    };
}

wire_value!(bool, Bool);
wire_value!(i8, I8);
wire_value!(i16, I16);
wire_value!(i32, I32);
wire_value!(i64, I64);
wire_value!(u8, U8);
wire_value!(u16, U16);
wire_value!(u32, U32);
wire_value!(u64, U64);
wire_value!(f32, F32);
wire_value!(f64, F64);
wire_value!(String, Str);
wire_value!(Vec<u8>, Bytes);

/// The argument view handed to a serving adapter's `invoke`.
#[derive(Debug, Clone, Copy)]
pub struct CallArgs<'a> {
    method: &'a str,
    args: &'a [ArgValue],
}

impl<'a> CallArgs<'a> {
    pub fn new(method: &'a str, args: &'a [ArgValue]) -> Self {
        Self { method, args }
    }

    /// The method name being invoked.
    pub fn method(&self) -> &str {
        self.method
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    /// The raw wire value at `idx`.
    pub fn raw(&self, idx: usize) -> Option<&ArgValue> {
        self.args.get(idx)
    }

    /// Extract the argument at `idx` as a typed value.
    pub fn arg<T: WireValue>(&self, idx: usize) -> Result<T, InvokeFault> {
        let raw = self.args.get(idx).ok_or_else(|| InvokeFault::InvalidArguments {
            detail: format!(
                "missing argument {idx} for {} (got {})",
                self.method,
                self.args.len()
            ),
        })?;
        T::from_arg(raw).ok_or_else(|| InvokeFault::InvalidArguments {
            detail: format!(
                "argument {idx} for {}: expected {}, got {}",
                self.method,
                T::KIND,
                raw.kind()
            ),
        })
    }

    /// Decode the `Encoded` argument at `idx` into a user-defined type.
    pub fn decode_arg<T: serde::de::DeserializeOwned>(&self, idx: usize) -> Result<T, InvokeFault> {
        let raw = self.args.get(idx).ok_or_else(|| InvokeFault::InvalidArguments {
            detail: format!(
                "missing argument {idx} for {} (got {})",
                self.method,
                self.args.len()
            ),
        })?;
        match raw.decode::<T>() {
            Some(Ok(value)) => Ok(value),
            Some(Err(e)) => Err(InvokeFault::InvalidArguments {
                detail: format!("argument {idx} for {}: decode failed: {e}", self.method),
            }),
            None => Err(InvokeFault::InvalidArguments {
                detail: format!(
                    "argument {idx} for {}: expected encoded value, got {}",
                    self.method,
                    raw.kind()
                ),
            }),
        }
    }
}

/// A serving adapter: forwards a decoded call onto a concrete
/// implementation.
///
/// Written by hand per interface (the dispatch engine stays free of type
/// machinery): match on the method name, pull typed arguments out of
/// [`CallArgs`], call the implementation. Methods return nothing — the
/// protocol's void contract is part of the trait's shape, so it cannot be
/// violated at registration time.
pub trait ServiceImpl: Send + Sync {
    fn invoke(&self, call: CallArgs<'_>) -> Result<(), InvokeFault>;
}

/// A typed calling stub bound to one remote peer.
///
/// The counterpart of [`ServiceImpl`]: a hand-written struct whose methods
/// marshal their arguments and hand the call to the peer's outgoing queue.
pub trait Proxy: Sized {
    /// The descriptor this proxy forwards calls against.
    const INTERFACE: &'static InterfaceDef;

    /// Bind a proxy to a caller. Obtained via
    /// [`Remote::proxy`](crate::Remote::proxy).
    fn bind(caller: Caller) -> Self;
}
