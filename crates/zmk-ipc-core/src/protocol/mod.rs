//! Protocol module containing the schema message types and the codec.
//!
//! - **`messages`** – All schema types (`ClientMessage`, `ZmkEvent`, their
//!   sub-records) as hand-derived `prost` messages, plus the maximum
//!   encoded-size constants that bound every wire buffer.
//! - **`codec`** – Encoding into caller-supplied buffers and decoding from
//!   byte slices.

pub mod codec;
pub mod messages;

pub use codec::{decode_message, encode_message, EncodeError};
pub use messages::*;
