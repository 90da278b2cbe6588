//! Encoding and decoding of schema messages.
//!
//! The codec is a thin, typed layer over `prost`: [`encode_message`] writes
//! into a caller-supplied buffer (the framing layer owns fixed stack buffers
//! sized by the schema maxima), and [`decode_message`] materialises a typed
//! message from a payload slice.  No length prefix is handled here; that is
//! the framing layer's job.

use prost::Message;
use thiserror::Error;

/// Errors that can occur while encoding a message into a caller buffer.
#[derive(Debug, Error)]
pub enum EncodeError {
    /// The output buffer is smaller than the encoded message.
    #[error("encode buffer too small: need {needed} bytes, capacity is {capacity}")]
    BufferTooSmall { needed: usize, capacity: usize },

    /// The protobuf library rejected the message.
    #[error("protobuf encode failed: {0}")]
    Protobuf(#[from] prost::EncodeError),
}

/// Encodes `msg` into `out` and returns the number of bytes written.
///
/// No length prefix is written; pair with
/// [`frame_send`](crate::framing::frame_send) to put the result on the wire.
///
/// # Errors
///
/// Returns [`EncodeError::BufferTooSmall`] if `out` cannot hold the encoded
/// message.  Size the buffer from the schema maximum for the message
/// direction ([`ZMK_EVENT_MAX_SIZE`](super::messages::ZMK_EVENT_MAX_SIZE) or
/// [`CLIENT_MESSAGE_MAX_SIZE`](super::messages::CLIENT_MESSAGE_MAX_SIZE))
/// and this cannot happen.
pub fn encode_message<M: Message>(msg: &M, out: &mut [u8]) -> Result<usize, EncodeError> {
    let needed = msg.encoded_len();
    let capacity = out.len();
    if needed > capacity {
        return Err(EncodeError::BufferTooSmall { needed, capacity });
    }

    // `&mut [u8]` is a prost `BufMut`; with the capacity check above the
    // encode itself cannot fail.
    let mut cursor = out;
    msg.encode(&mut cursor)?;
    Ok(needed)
}

/// Decodes one message from `buf`.
///
/// The slice must contain exactly the payload of one frame; the decoder
/// consumes it fully and tolerates unknown trailing fields per protobuf
/// semantics.
///
/// # Errors
///
/// Returns the underlying [`prost::DecodeError`] when the bytes are not a
/// valid encoding of `M`.
pub fn decode_message<M: Message + Default>(buf: &[u8]) -> Result<M, prost::DecodeError> {
    M::decode(buf)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
