//! Message transport abstraction.
//!
//! Abstracts over the framing mechanism so the driver's protocol logic is
//! transport-agnostic: byte streams get length-prefixed framing (see
//! `saker-stream`); message-oriented transports bring their own.

use std::future::Future;
use std::io;
use std::time::Duration;

use saker_wire::Message;

/// A transport that can send and receive whole protocol messages.
///
/// `recv` returning `Ok(None)` means the peer closed the connection cleanly.
/// An unknown or malformed frame is an `Err` — the variant set is closed, so
/// an undecodable message is a fatal transport error for the connection.
pub trait MessageTransport: Send {
    /// Send one message.
    fn send(&mut self, msg: &Message) -> impl Future<Output = io::Result<()>> + Send;

    /// Receive one message, waiting until one arrives or the connection
    /// closes.
    fn recv(&mut self) -> impl Future<Output = io::Result<Option<Message>>> + Send;

    /// Receive one message, giving up after `timeout`. Returns `Ok(None)` on
    /// timeout as well as on clean close.
    fn recv_timeout(
        &mut self,
        timeout: Duration,
    ) -> impl Future<Output = io::Result<Option<Message>>> + Send;
}
