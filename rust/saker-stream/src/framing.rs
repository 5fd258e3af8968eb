//! Length-prefixed framing for async byte streams.
//!
//! Each frame is a 4-byte little-endian length prefix followed by one
//! postcard-encoded [`Message`]. Generic over the stream type: works with
//! `TcpStream`, `UnixStream`, `tokio::io::DuplexStream`, or anything else
//! implementing `AsyncRead + AsyncWrite`.

use std::io;
use std::time::Duration;

use saker_session::MessageTransport;
use saker_wire::Message;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const FRAME_LEN_PREFIX_SIZE: usize = 4;
const RECV_BUF_COMPACT_THRESHOLD: usize = 64 * 1024;

/// Upper bound on a single frame's body. A peer announcing more than this is
/// a protocol error, not a reason to allocate gigabytes.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

fn compact_recv_buffer(buf: &mut Vec<u8>, unread_start: &mut usize) {
    if *unread_start == buf.len() {
        buf.clear();
        *unread_start = 0;
        return;
    }

    if *unread_start >= RECV_BUF_COMPACT_THRESHOLD && *unread_start >= buf.len() / 2 {
        buf.drain(..*unread_start);
        *unread_start = 0;
    }
}

fn try_decode_one_from_buffer(
    buf: &mut Vec<u8>,
    unread_start: &mut usize,
) -> io::Result<Option<Message>> {
    let unread = &buf[*unread_start..];
    if unread.len() < FRAME_LEN_PREFIX_SIZE {
        return Ok(None);
    }

    let frame_len = u32::from_le_bytes([unread[0], unread[1], unread[2], unread[3]]) as usize;
    if frame_len > MAX_FRAME_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame of {frame_len} bytes exceeds the {MAX_FRAME_SIZE} byte limit"),
        ));
    }

    let frame_start = *unread_start + FRAME_LEN_PREFIX_SIZE;
    let frame_end = frame_start + frame_len;
    if frame_end > buf.len() {
        return Ok(None);
    }

    let frame = &buf[frame_start..frame_end];
    let msg = postcard::from_bytes::<Message>(frame)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("postcard: {e}")));

    *unread_start = frame_end;
    compact_recv_buffer(buf, unread_start);
    msg.map(Some)
}

/// A length-prefixed framed connection over an async byte stream.
pub struct LengthPrefixedFramed<S> {
    stream: S,
    buf: Vec<u8>,
    unread_start: usize,
}

impl<S> LengthPrefixedFramed<S> {
    /// Wrap an async stream.
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            buf: Vec::new(),
            unread_start: 0,
        }
    }

    /// Get a reference to the underlying stream.
    pub fn stream(&self) -> &S {
        &self.stream
    }

    /// Consume the wrapper and return the underlying stream.
    pub fn into_inner(self) -> S {
        self.stream
    }
}

impl<S> LengthPrefixedFramed<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Send one message: 4-byte little-endian length prefix, then the body.
    pub async fn send(&mut self, msg: &Message) -> io::Result<()> {
        let body = postcard::to_allocvec(msg)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("postcard: {e}")))?;
        let frame_len = u32::try_from(body.len()).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                "message too large for u32 length prefix",
            )
        })?;
        self.stream.write_all(&frame_len.to_le_bytes()).await?;
        self.stream.write_all(&body).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Receive one message, waiting until a full frame arrives or the stream
    /// closes. EOF at a frame boundary is a clean close (`Ok(None)`); EOF
    /// inside a frame is an error.
    pub async fn recv(&mut self) -> io::Result<Option<Message>> {
        loop {
            if let Some(msg) = try_decode_one_from_buffer(&mut self.buf, &mut self.unread_start)? {
                return Ok(Some(msg));
            }

            let mut tmp = [0u8; 4096];
            let n = self.stream.read(&mut tmp).await?;
            if n == 0 {
                let trailing = self.buf.len().saturating_sub(self.unread_start);
                if trailing != 0 {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("eof with {trailing} trailing bytes and no complete frame"),
                    ));
                }
                return Ok(None);
            }
            compact_recv_buffer(&mut self.buf, &mut self.unread_start);
            self.buf.extend_from_slice(&tmp[..n]);
        }
    }

    /// Receive with a timeout. `Ok(None)` on timeout as well as clean close.
    pub async fn recv_timeout(&mut self, timeout: Duration) -> io::Result<Option<Message>> {
        tokio::time::timeout(timeout, self.recv())
            .await
            .unwrap_or(Ok(None))
    }
}

impl<S> MessageTransport for LengthPrefixedFramed<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, msg: &Message) -> io::Result<()> {
        LengthPrefixedFramed::send(self, msg).await
    }

    async fn recv(&mut self) -> io::Result<Option<Message>> {
        LengthPrefixedFramed::recv(self).await
    }

    async fn recv_timeout(&mut self, timeout: Duration) -> io::Result<Option<Message>> {
        LengthPrefixedFramed::recv_timeout(self, timeout).await
    }
}
