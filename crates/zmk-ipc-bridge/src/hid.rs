//! The narrow seam to the host's HID subsystem.
//!
//! When the host commits an HID report to an endpoint it calls the
//! observer's `notify_*` functions; the observer then pulls the *current*
//! report snapshot back through [`HidReports`] and translates it into the
//! wire schema.  Pull-at-notify matches the original design: the report
//! registers live in the host, and the bridge copies whatever state is
//! current at commit time.
//!
//! The snapshot structs mirror the host's report bodies, not the wire
//! schema; widening to the schema's `u32`/`i32` fields happens in the
//! adapter.

/// Key array length of the boot-protocol keyboard report.
pub const KEYBOARD_KEYS: usize = 6;

/// Key array length of the consumer report.
pub const CONSUMER_KEYS: usize = 6;

/// Snapshot of the keyboard HID report body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeyboardReport {
    /// Modifier bitmask (left ctrl = bit 0 … right gui = bit 7).
    pub modifiers: u8,
    /// Active key usage codes, zero-padded.
    pub keys: [u8; KEYBOARD_KEYS],
}

/// Snapshot of the consumer-control HID report body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerReport {
    /// Active usage codes, zero-padded.
    pub keys: [u8; CONSUMER_KEYS],
}

/// Snapshot of the pointing-device HID report body.
#[cfg(feature = "pointing")]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MouseReport {
    /// Button bitmask.
    pub buttons: u8,
    pub dx: i16,
    pub dy: i16,
    pub scroll_x: i16,
    pub scroll_y: i16,
}

/// Accessors for the host's current HID report state.
///
/// Implementations must be cheap and must not block: they are called on the
/// host thread that commits the report, inside the notify path.
pub trait HidReports: Send + Sync {
    /// Current keyboard report.
    fn keyboard(&self) -> KeyboardReport;

    /// Current consumer report.
    fn consumer(&self) -> ConsumerReport;

    /// Current mouse report.
    #[cfg(feature = "pointing")]
    fn mouse(&self) -> MouseReport;
}
