//! All ZMK IPC schema message types.
//!
//! The types here are hand-derived [`prost`] messages mirroring
//! `proto/zmk_ipc.proto` field number for field number.  Field numbers are
//! the binary compatibility contract with existing non-Rust clients: new
//! fields are only appended, oneof arms are additive, and unknown tags are
//! skipped by the decoder rather than rejected.
//!
//! Two top-level messages exist, one per direction:
//!
//! - [`ClientMessage`] – injector → host (key press/release events).
//! - [`ZmkEvent`] – host → observers (raw key-scan transitions and
//!   assembled HID reports).
//!
//! # Maximum encoded sizes
//!
//! The receive and send buffers on both endpoints are fixed stack buffers
//! sized by [`CLIENT_MESSAGE_MAX_SIZE`] and [`ZMK_EVENT_MAX_SIZE`].  These
//! constants are derived by hand from the schema (worst-case varint widths
//! for every field) and pinned by tests in this module; any schema change
//! must re-derive them.

use std::fmt;

// ── Schema size bounds ────────────────────────────────────────────────────────

/// Capacity of the HID key byte-arrays carried in keyboard and consumer
/// reports (the boot-protocol key array length).  Adapters truncate longer
/// host reports to this many bytes.
pub const HID_KEY_BYTES_MAX: usize = 6;

/// Maximum encoded size of a [`ClientMessage`].
///
/// Derivation: `KeyPosition` = 2 × (tag 1 + uint32 ≤ 5) = 12;
/// `KeyEvent` = action (1 + 1) + key_pos arm (1 + 1 + 12) = 16;
/// `ClientMessage` = payload (1 + 1 + 16) = 18.
pub const CLIENT_MESSAGE_MAX_SIZE: usize = 18;

/// Maximum encoded size of a [`ZmkEvent`].
///
/// The largest arm is `HidMouseReport`: endpoint (1 + 1 + 8) + buttons
/// (1 + 5) + four int32 fields (1 + 10 each) = 60; wrapped in the oneof
/// (1 + 1 + 60) = 62.
pub const ZMK_EVENT_MAX_SIZE: usize = 62;

// ── Client → host ─────────────────────────────────────────────────────────────

/// Top-level message sent by an external injector to the key-scan ingress
/// socket.
///
/// Currently carries a single payload arm; the oneof leaves room for
/// additive extension without breaking existing peers.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ClientMessage {
    #[prost(oneof = "client_message::Payload", tags = "1")]
    pub payload: Option<client_message::Payload>,
}

/// Nested types for [`ClientMessage`].
pub mod client_message {
    /// Payload arms of a [`super::ClientMessage`].
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Payload {
        /// A key press or release to feed into the host's key-scan driver.
        #[prost(message, tag = "1")]
        KeyEvent(super::KeyEvent),
    }
}

/// One injected key press or release.
///
/// The key can be addressed either by explicit matrix coordinates
/// ([`key_event::Address::KeyPos`]) or by a linear position that the host
/// expands as `row = position / columns`, `col = position % columns` using
/// its configured matrix width.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct KeyEvent {
    /// Press or release; see [`key_event::Action`].  Kept as the raw `i32`
    /// wire value; unknown values are dropped by the host with a warning.
    #[prost(enumeration = "key_event::Action", tag = "1")]
    pub action: i32,
    #[prost(oneof = "key_event::Address", tags = "2, 3")]
    pub address: Option<key_event::Address>,
}

/// Nested types for [`KeyEvent`].
pub mod key_event {
    /// Whether the key went down or up.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum Action {
        Press = 0,
        Release = 1,
    }

    /// How the key is addressed.
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Address {
        /// Explicit matrix coordinates.
        #[prost(message, tag = "2")]
        KeyPos(super::KeyPosition),
        /// Linear index, expanded against the host's configured column count.
        #[prost(uint32, tag = "3")]
        Position(u32),
    }
}

/// Explicit matrix coordinates of a key.
#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct KeyPosition {
    #[prost(uint32, tag = "1")]
    pub row: u32,
    #[prost(uint32, tag = "2")]
    pub col: u32,
}

impl ClientMessage {
    /// Wraps a [`KeyEvent`] in the top-level message.
    pub fn key_event(event: KeyEvent) -> Self {
        Self {
            payload: Some(client_message::Payload::KeyEvent(event)),
        }
    }
}

impl KeyEvent {
    /// Builds a key event addressed by explicit matrix coordinates.
    pub fn at_key_pos(action: key_event::Action, row: u32, col: u32) -> Self {
        Self {
            action: action as i32,
            address: Some(key_event::Address::KeyPos(KeyPosition { row, col })),
        }
    }

    /// Builds a key event addressed by linear position.
    pub fn at_position(action: key_event::Action, position: u32) -> Self {
        Self {
            action: action as i32,
            address: Some(key_event::Address::Position(position)),
        }
    }
}

// ── Host → clients ────────────────────────────────────────────────────────────

/// Top-level message broadcast by the host to every connected observer.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ZmkEvent {
    #[prost(oneof = "zmk_event::Payload", tags = "1, 2, 3, 4")]
    pub payload: Option<zmk_event::Payload>,
}

/// Nested types for [`ZmkEvent`].
pub mod zmk_event {
    /// Payload arms of a [`super::ZmkEvent`].
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Payload {
        /// Raw matrix transition, before keymap processing.
        #[prost(message, tag = "1")]
        KscanEvent(super::KscanEvent),
        /// Keyboard HID report, as committed to an endpoint.
        #[prost(message, tag = "2")]
        Keyboard(super::HidKeyboardReport),
        /// Consumer-control HID report.
        #[prost(message, tag = "3")]
        Consumer(super::HidConsumerReport),
        /// Pointing-device HID report.
        #[prost(message, tag = "4")]
        Mouse(super::HidMouseReport),
    }
}

impl ZmkEvent {
    /// Wraps a raw key-scan transition.
    pub fn kscan(event: KscanEvent) -> Self {
        Self {
            payload: Some(zmk_event::Payload::KscanEvent(event)),
        }
    }

    /// Wraps a keyboard HID report.
    pub fn keyboard(report: HidKeyboardReport) -> Self {
        Self {
            payload: Some(zmk_event::Payload::Keyboard(report)),
        }
    }

    /// Wraps a consumer HID report.
    pub fn consumer(report: HidConsumerReport) -> Self {
        Self {
            payload: Some(zmk_event::Payload::Consumer(report)),
        }
    }

    /// Wraps a mouse HID report.
    pub fn mouse(report: HidMouseReport) -> Self {
        Self {
            payload: Some(zmk_event::Payload::Mouse(report)),
        }
    }
}

/// Destination transport of an HID report.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum TransportType {
    None = 0,
    Usb = 1,
    Ble = 2,
}

/// Where an HID report was directed.
///
/// `ble_profile_idx` is meaningful only when `transport` is
/// [`TransportType::Ble`].
#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct Endpoint {
    #[prost(enumeration = "TransportType", tag = "1")]
    pub transport: i32,
    #[prost(uint32, tag = "2")]
    pub ble_profile_idx: u32,
}

impl Endpoint {
    /// Parses the host's endpoint label (e.g. `"USB"`, `"BLE:0"`, `"None"`)
    /// into a typed endpoint.
    ///
    /// Labels beginning with `"USB"` map to [`TransportType::Usb`]; labels
    /// beginning with `"BLE:"` map to [`TransportType::Ble`] with the
    /// remainder parsed as the profile index (0 when unparsable); anything
    /// else maps to [`TransportType::None`].
    pub fn from_transport_str(transport_str: &str) -> Self {
        if transport_str.starts_with("USB") {
            Self {
                transport: TransportType::Usb as i32,
                ble_profile_idx: 0,
            }
        } else if let Some(idx) = transport_str.strip_prefix("BLE:") {
            Self {
                transport: TransportType::Ble as i32,
                ble_profile_idx: idx.parse().unwrap_or(0),
            }
        } else {
            Self {
                transport: TransportType::None as i32,
                ble_profile_idx: 0,
            }
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match TransportType::try_from(self.transport) {
            Ok(TransportType::Usb) => write!(f, "USB"),
            Ok(TransportType::Ble) => write!(f, "BLE:{}", self.ble_profile_idx),
            _ => write!(f, "None"),
        }
    }
}

/// Raw matrix transition emitted by the key-scan subsystem, before keymap
/// processing.
#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct KscanEvent {
    /// Identifier of the scan source (split-keyboard half, peripheral, …).
    #[prost(uint32, tag = "1")]
    pub source: u32,
    /// Linear key position within the matrix.
    #[prost(uint32, tag = "2")]
    pub position: u32,
    #[prost(bool, tag = "3")]
    pub pressed: bool,
    /// Host uptime at the transition, in milliseconds.
    #[prost(uint32, tag = "4")]
    pub timestamp: u32,
}

/// Keyboard HID report as committed to an endpoint.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct HidKeyboardReport {
    #[prost(message, optional, tag = "1")]
    pub endpoint: Option<Endpoint>,
    /// HID modifier byte (bit per modifier key).
    #[prost(uint32, tag = "2")]
    pub modifiers: u32,
    /// Active key usage codes; at most [`HID_KEY_BYTES_MAX`] bytes.
    #[prost(bytes = "vec", tag = "3")]
    pub keys: Vec<u8>,
}

/// Consumer-control HID report (media keys and similar usages).
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct HidConsumerReport {
    #[prost(message, optional, tag = "1")]
    pub endpoint: Option<Endpoint>,
    /// Active usage codes; at most [`HID_KEY_BYTES_MAX`] bytes.
    #[prost(bytes = "vec", tag = "2")]
    pub keys: Vec<u8>,
}

/// Pointing-device HID report.
#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct HidMouseReport {
    #[prost(message, optional, tag = "1")]
    pub endpoint: Option<Endpoint>,
    /// Button bitmask.
    #[prost(uint32, tag = "2")]
    pub buttons: u32,
    #[prost(int32, tag = "3")]
    pub dx: i32,
    #[prost(int32, tag = "4")]
    pub dy: i32,
    #[prost(int32, tag = "5")]
    pub scroll_x: i32,
    #[prost(int32, tag = "6")]
    pub scroll_y: i32,
}

// ── Tests ─────────────────────────────────────────────────────────────────────
