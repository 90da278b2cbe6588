//! Length-prefix framing over a stream socket.
//!
//! Wire format, identical in both directions:
//!
//! ```text
//! ┌──────────────────────┬─────────────────────────────────┐
//! │ 4 bytes, big-endian  │ <length> bytes                  │
//! │ encoded message size │ protobuf-encoded message        │
//! └──────────────────────┴─────────────────────────────────┘
//! ```
//!
//! Three operations live here:
//!
//! - [`frame_send`] – the host's fan-out write: prefix and payload are
//!   combined into one contiguous buffer and sent with a single
//!   `MSG_NOSIGNAL | MSG_DONTWAIT` `send(2)`.  One syscall per frame means
//!   concurrent senders on the same stream can never interleave a half
//!   frame, and a full socket buffer can never leave a frame torn.
//! - [`frame_recv`] – blocking receive and decode of one frame, with
//!   oversize rejection before the body is read.
//! - [`frame_write`] – blocking client-side framing for injectors and
//!   observers, where backpressure is acceptable.
//!
//! Frames never span connections: a short read while either the prefix or
//! the body is outstanding means the peer closed the stream.

use std::io::{self, Read, Write};
use std::os::unix::io::AsRawFd;
use std::os::unix::net::UnixStream;

use nix::errno::Errno;
use nix::sys::socket::{send, MsgFlags};
use prost::Message;
use thiserror::Error;
use tracing::warn;

use crate::protocol::messages::{CLIENT_MESSAGE_MAX_SIZE, ZMK_EVENT_MAX_SIZE};

/// Size of the big-endian length prefix.
pub const FRAME_HEADER_SIZE: usize = 4;

/// Largest frame body either direction can carry.
const FRAME_BODY_MAX: usize = if ZMK_EVENT_MAX_SIZE > CLIENT_MESSAGE_MAX_SIZE {
    ZMK_EVENT_MAX_SIZE
} else {
    CLIENT_MESSAGE_MAX_SIZE
};

/// Largest complete host → observer frame.
pub const EVENT_FRAME_MAX: usize = FRAME_HEADER_SIZE + ZMK_EVENT_MAX_SIZE;

/// Largest complete injector → host frame.
pub const CLIENT_FRAME_MAX: usize = FRAME_HEADER_SIZE + CLIENT_MESSAGE_MAX_SIZE;

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors surfaced by [`frame_send`].
///
/// Every variant except a transient success poisons the stream from the
/// caller's point of view: the broadcaster evicts the client on any of them.
#[derive(Debug, Error)]
pub enum SendError {
    /// The payload does not fit in a maximum-size frame.
    #[error("payload of {len} bytes exceeds the frame body maximum of {max}")]
    TooLarge { len: usize, max: usize },

    /// The socket send buffer is full (`EAGAIN` on the non-blocking send).
    #[error("send would block: socket buffer full")]
    WouldBlock,

    /// The kernel accepted only part of the frame; the stream now carries a
    /// torn frame and cannot be resynchronised.
    #[error("short send: {sent} of {len} bytes written")]
    Truncated { sent: usize, len: usize },

    /// Any other socket error (`EPIPE`, `ECONNRESET`, …).
    #[error("send failed: {0}")]
    Io(#[from] io::Error),
}

/// Errors surfaced by [`frame_recv`].
#[derive(Debug, Error)]
pub enum RecvError {
    /// The peer closed the connection (zero-byte read).
    #[error("peer closed the connection")]
    PeerClosed,

    /// The length prefix exceeds the schema maximum.  The body is not read;
    /// the stream is unsynchronised and must be closed.
    #[error("incoming frame of {len} bytes exceeds the maximum of {max}")]
    TooLarge { len: usize, max: usize },

    /// The body was read in full but is not a valid message.  The stream
    /// itself is still framed correctly; the caller decides whether to keep
    /// it.
    #[error("frame decode failed: {0}")]
    Decode(#[from] prost::DecodeError),

    /// Any other read failure.
    #[error("recv failed: {0}")]
    Io(#[from] io::Error),
}

// ── Send path ─────────────────────────────────────────────────────────────────

/// Sends one length-prefixed frame with a single non-blocking write.
///
/// The prefix and payload are assembled into one contiguous stack buffer and
/// handed to `send(2)` with `MSG_NOSIGNAL | MSG_DONTWAIT`, so a write to a
/// vanished peer yields `EPIPE` instead of killing the process and a full
/// send buffer yields [`SendError::WouldBlock`] instead of stalling the
/// host's event path.
///
/// # Errors
///
/// - [`SendError::TooLarge`] if `payload` exceeds the frame body maximum.
/// - [`SendError::WouldBlock`] on `EAGAIN`.
/// - [`SendError::Truncated`] on a partial send; the stream is poisoned.
/// - [`SendError::Io`] for any other socket error.
pub fn frame_send(stream: &UnixStream, payload: &[u8]) -> Result<(), SendError> {
    let mut frame = [0u8; FRAME_HEADER_SIZE + FRAME_BODY_MAX];
    let total = FRAME_HEADER_SIZE + payload.len();
    if payload.len() > FRAME_BODY_MAX {
        return Err(SendError::TooLarge {
            len: payload.len(),
            max: FRAME_BODY_MAX,
        });
    }

    frame[..FRAME_HEADER_SIZE].copy_from_slice(&(payload.len() as u32).to_be_bytes());
    frame[FRAME_HEADER_SIZE..total].copy_from_slice(payload);

    match send(
        stream.as_raw_fd(),
        &frame[..total],
        MsgFlags::MSG_NOSIGNAL | MsgFlags::MSG_DONTWAIT,
    ) {
        Ok(sent) if sent == total => Ok(()),
        Ok(sent) => Err(SendError::Truncated { sent, len: total }),
        Err(Errno::EAGAIN) => Err(SendError::WouldBlock),
        Err(errno) => Err(SendError::Io(io::Error::from_raw_os_error(errno as i32))),
    }
}

/// Writes one length-prefixed frame with blocking semantics.
///
/// This is the client-side counterpart of [`frame_send`]: external injectors
/// and test peers have no fan-out contract to protect, so ordinary blocking
/// `write_all` backpressure is the right behaviour.
///
/// # Errors
///
/// Propagates any I/O error from the underlying writer.
pub fn frame_write<W: Write>(writer: &mut W, payload: &[u8]) -> io::Result<()> {
    let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(payload);
    writer.write_all(&frame)
}

// ── Receive path ──────────────────────────────────────────────────────────────

/// Blocking receive and decode of one frame.
///
/// Reads exactly [`FRAME_HEADER_SIZE`] bytes, rejects lengths above
/// `max_len` without touching the body, reads exactly that many body bytes
/// into a stack buffer, and decodes them as `M`.
///
/// `max_len` is the schema maximum for the expected direction
/// ([`CLIENT_MESSAGE_MAX_SIZE`] on the ingress,
/// [`ZMK_EVENT_MAX_SIZE`] on an observer connection).
///
/// # Errors
///
/// - [`RecvError::PeerClosed`] on a zero-byte read in either phase.
/// - [`RecvError::TooLarge`] when the prefix exceeds `max_len`; the stream
///   is unsynchronised and must be closed.
/// - [`RecvError::Decode`] when the body is not a valid `M`; the framing is
///   intact and the connection may be kept.
/// - [`RecvError::Io`] for any other read error.
pub fn frame_recv<M: Message + Default>(
    stream: &UnixStream,
    max_len: usize,
) -> Result<M, RecvError> {
    let mut reader = stream;

    let mut len_buf = [0u8; FRAME_HEADER_SIZE];
    read_exact_retrying(&mut reader, &mut len_buf)?;

    let len = u32::from_be_bytes(len_buf) as usize;
    let max = max_len.min(FRAME_BODY_MAX);
    if len > max {
        warn!("incoming frame too large: {len} > {max}");
        return Err(RecvError::TooLarge { len, max });
    }

    let mut body = [0u8; FRAME_BODY_MAX];
    read_exact_retrying(&mut reader, &mut body[..len])?;

    match M::decode(&body[..len]) {
        Ok(msg) => Ok(msg),
        Err(e) => {
            warn!("frame decode failed: {e}");
            Err(RecvError::Decode(e))
        }
    }
}

/// Reads exactly `buf.len()` bytes, absorbing short reads and retrying
/// `EINTR` transparently.  A zero-byte read at any point means the peer
/// closed the stream.
fn read_exact_retrying<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<(), RecvError> {
    let mut received = 0;
    while received < buf.len() {
        match reader.read(&mut buf[received..]) {
            Ok(0) => return Err(RecvError::PeerClosed),
            Ok(n) => received += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(RecvError::Io(e)),
        }
    }
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
