//! # zmk-ipc-bridge
//!
//! Host-side Unix-socket servers that bridge a simulated keyboard firmware
//! to external driver programs:
//!
//! - [`KscanIpcServer`] (**ingress**) accepts one injector at a time and
//!   feeds decoded key press/release events into the host's key-scan
//!   subsystem through a registered callback.
//! - [`IpcObserver`] (**egress**) fans out raw key-scan transitions and
//!   assembled HID reports to every connected observer.
//!
//! Both speak the length-prefixed protobuf framing from [`zmk_ipc_core`].
//! The host's HID subsystem is reached through the narrow [`HidReports`]
//! accessor trait; its key-scan driver registers a plain callback.  Nothing
//! here knows about keymaps, endpoint selection, or scheduling; those
//! remain host concerns.
//!
//! ```text
//! external injector ──frames──► KscanIpcServer ──callback──► host key-scan
//!                                                                  │
//! host event bus ──notify_*──► IpcObserver ──frames──► external observers
//! ```

pub mod config;
pub mod hid;
pub mod kscan;
pub mod observer;
mod socket;

#[cfg(feature = "pointing")]
pub use hid::MouseReport;
pub use config::{EgressConfig, IngressConfig};
pub use hid::{ConsumerReport, HidReports, KeyboardReport};
pub use kscan::KscanIpcServer;
pub use observer::IpcObserver;
pub use socket::ServerError;
