//! # zmk-ipc-core
//!
//! Shared wire layer for the ZMK IPC bridge: the protobuf message schema,
//! the codec, and the length-prefix framing used on both Unix-socket
//! endpoints.
//!
//! This crate is used by both sides of the wire, the host bridge
//! (`zmk-ipc-bridge`) and external driver programs (`zmk-ipc-cli`).  It has
//! no dependency on the host's key-scan or HID subsystems.
//!
//! # Wire format
//!
//! Every message travels as one **frame**:
//!
//! ```text
//! ┌──────────────────────┬─────────────────────────────────┐
//! │ 4 bytes, big-endian  │ <length> bytes                  │
//! │ encoded message size │ protobuf-encoded message        │
//! └──────────────────────┴─────────────────────────────────┘
//! ```
//!
//! The same framing carries [`ClientMessage`] frames from an injector into
//! the host and [`ZmkEvent`] frames from the host out to observers.  The
//! canonical schema lives in `proto/zmk_ipc.proto` at the repository root;
//! the types in [`protocol::messages`] mirror it field number for field
//! number.

pub mod framing;
pub mod protocol;

// Re-export the most-used items at the crate root so callers can write
// `zmk_ipc_core::frame_recv` instead of the full module path.
pub use framing::{frame_recv, frame_send, frame_write, RecvError, SendError};
pub use protocol::codec::{decode_message, encode_message, EncodeError};
pub use protocol::messages::{ClientMessage, Endpoint, ZmkEvent};
