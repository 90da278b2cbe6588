//! Event-observer egress broadcaster.
//!
//! Maintains a bounded table of connected observers and fans every host
//! event out to all of them.  Events are encoded exactly once per broadcast
//! regardless of client count; the encoded frame is then sent to each
//! occupied slot with the single-syscall non-blocking
//! [`frame_send`](zmk_ipc_core::frame_send).
//!
//! One mutex guards the client table.  Both mutators (the accept thread
//! inserting, broadcast callers iterating and evicting) hold it for the
//! duration of their short, non-blocking operation, which is what gives each
//! client a consistent total order of broadcasts and keeps every frame
//! contiguous on the stream.  A slow or vanished observer is evicted on its
//! first failed send; there are no per-client queues and no backpressure
//! toward the host.

use std::os::unix::net::{UnixListener, UnixStream};
use std::sync::{Arc, Mutex};
use std::thread;

use tracing::{debug, error, info, warn};

use zmk_ipc_core::encode_message;
use zmk_ipc_core::frame_send;
use zmk_ipc_core::protocol::messages::{
    Endpoint, HidConsumerReport, HidKeyboardReport, KscanEvent, ZmkEvent, HID_KEY_BYTES_MAX,
    ZMK_EVENT_MAX_SIZE,
};
#[cfg(feature = "pointing")]
use zmk_ipc_core::protocol::messages::HidMouseReport;

use crate::config::EgressConfig;
use crate::hid::HidReports;
use crate::socket::{bind_listener, ServerError, ACCEPT_RETRY_DELAY};

/// The egress broadcaster.
///
/// Cloning is cheap and yields another handle to the same broadcaster; the
/// accept thread lives for the process lifetime.
#[derive(Clone)]
pub struct IpcObserver {
    shared: Arc<ObserverShared>,
}

struct ObserverShared {
    config: EgressConfig,
    /// The only shared mutable structure: one slot per possible client,
    /// `None` = free.  Slot transitions happen exclusively under this lock.
    clients: Mutex<Vec<Option<UnixStream>>>,
    reports: Arc<dyn HidReports>,
}

impl IpcObserver {
    /// Binds the socket, initialises the client table, and spawns the
    /// accept thread.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError`] if the socket cannot be bound or the thread
    /// cannot be spawned.  Client behaviour after startup never fails the
    /// broadcaster.
    pub fn start(config: EgressConfig, reports: Arc<dyn HidReports>) -> Result<Self, ServerError> {
        let listener = bind_listener(&config.socket_path)?;
        info!(
            "ZMK IPC observer: listening on {} (max {} clients)",
            config.socket_path.display(),
            config.max_clients
        );

        let clients = Mutex::new((0..config.max_clients).map(|_| None).collect());
        let shared = Arc::new(ObserverShared {
            config,
            clients,
            reports,
        });

        let accept_shared = Arc::clone(&shared);
        thread::Builder::new()
            .name("zmk-ipc-accept".to_string())
            .spawn(move || accept_loop(listener, accept_shared))
            .map_err(|source| ServerError::ThreadSpawn {
                name: "zmk-ipc-accept",
                source,
            })?;

        Ok(Self { shared })
    }

    /// Number of currently connected observers.
    pub fn connected_clients(&self) -> usize {
        lock_clients(&self.shared)
            .iter()
            .filter(|slot| slot.is_some())
            .count()
    }

    // ── Push functions (called from host event sources) ──────────────────────

    /// Broadcasts a raw key-scan transition.
    ///
    /// Invoked from the host's position-state event subscriber, before any
    /// keymap processing.
    pub fn notify_kscan(&self, source: u32, position: u32, pressed: bool, timestamp: u32) {
        self.broadcast(&ZmkEvent::kscan(KscanEvent {
            source,
            position,
            pressed,
            timestamp,
        }));
    }

    /// Broadcasts the current keyboard HID report as committed to
    /// `transport_str` (e.g. `"USB"`, `"BLE:0"`).
    pub fn notify_keyboard_report(&self, transport_str: &str) {
        let report = self.shared.reports.keyboard();
        let keys_len = report.keys.len().min(HID_KEY_BYTES_MAX);
        self.broadcast(&ZmkEvent::keyboard(HidKeyboardReport {
            endpoint: Some(Endpoint::from_transport_str(transport_str)),
            modifiers: u32::from(report.modifiers),
            keys: report.keys[..keys_len].to_vec(),
        }));
    }

    /// Broadcasts the current consumer HID report.
    pub fn notify_consumer_report(&self, transport_str: &str) {
        let report = self.shared.reports.consumer();
        let keys_len = report.keys.len().min(HID_KEY_BYTES_MAX);
        self.broadcast(&ZmkEvent::consumer(HidConsumerReport {
            endpoint: Some(Endpoint::from_transport_str(transport_str)),
            keys: report.keys[..keys_len].to_vec(),
        }));
    }

    /// Broadcasts the current mouse HID report.
    #[cfg(feature = "pointing")]
    pub fn notify_mouse_report(&self, transport_str: &str) {
        let report = self.shared.reports.mouse();
        self.broadcast(&ZmkEvent::mouse(HidMouseReport {
            endpoint: Some(Endpoint::from_transport_str(transport_str)),
            buttons: u32::from(report.buttons),
            dx: i32::from(report.dx),
            dy: i32::from(report.dy),
            scroll_x: i32::from(report.scroll_x),
            scroll_y: i32::from(report.scroll_y),
        }));
    }

    /// Encodes `event` once and sends the frame to every connected client,
    /// evicting clients whose send fails.
    fn broadcast(&self, event: &ZmkEvent) {
        let mut buf = [0u8; ZMK_EVENT_MAX_SIZE];
        let len = match encode_message(event, &mut buf) {
            Ok(len) => len,
            Err(e) => {
                // No partial fan-out: if the event cannot be encoded, nobody
                // receives it.
                error!("IPC observer: failed to encode event: {e}");
                return;
            }
        };

        let mut clients = lock_clients(&self.shared);
        for (idx, slot) in clients.iter_mut().enumerate() {
            let Some(stream) = slot else { continue };
            if let Err(e) = frame_send(stream, &buf[..len]) {
                debug!("IPC observer: client in slot {idx} dropped: {e}");
                // Dropping the stream closes the connection.
                *slot = None;
            }
        }
    }
}

/// Locks the client table, recovering from poisoning: a panic elsewhere
/// while holding the lock leaves the table itself consistent (slots are
/// always either live or free).
fn lock_clients(shared: &ObserverShared) -> std::sync::MutexGuard<'_, Vec<Option<UnixStream>>> {
    shared
        .clients
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ── Accept thread ─────────────────────────────────────────────────────────────

fn accept_loop(listener: UnixListener, shared: Arc<ObserverShared>) {
    info!(
        "ZMK IPC observer: waiting for clients on {}",
        shared.config.socket_path.display()
    );

    loop {
        let stream = match listener.accept() {
            Ok((stream, _addr)) => stream,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                error!("IPC observer: accept failed: {e}");
                thread::sleep(ACCEPT_RETRY_DELAY);
                continue;
            }
        };

        register_client(stream, &shared);
    }
}

/// Inserts a new connection into the first free slot, or closes it when the
/// table is full.
fn register_client(stream: UnixStream, shared: &ObserverShared) {
    let mut clients = lock_clients(shared);
    if let Some(slot) = clients.iter_mut().find(|slot| slot.is_none()) {
        *slot = Some(stream);
        info!("IPC observer: client connected");
    } else {
        drop(clients);
        warn!(
            "IPC observer: max clients ({}) reached, rejecting connection",
            shared.config.max_clients
        );
        // The stream drops here, closing the rejected connection.
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
