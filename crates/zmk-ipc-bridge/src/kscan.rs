//! Key-scan ingress server.
//!
//! Accepts one external injector at a time on a Unix socket and feeds
//! decoded key events into the host's key-scan subsystem.  The reader runs
//! on its own thread and moves between two states:
//!
//! ```text
//!            ┌─────────────┐ accept error (not EINTR)
//!            │             ├──── sleep 100 ms ──┐
//!            │  WAIT_PEER  │                    │
//!            │             │◄───────────────────┘
//!            └──────┬──────┘
//!                   │ accept ok
//!                   ▼
//!            ┌─────────────┐ PeerClosed | TooLarge | Io
//!            │   SERVING   ├──── close peer, back to WAIT_PEER
//!            │             │
//!            └──────┬──────┘
//!          decode error │ ok
//!        (log, stay)    ▼
//!                   dispatch
//! ```
//!
//! A decode error skips the frame but keeps the connection: the length
//! prefix gives unambiguous resync, so one corrupt message does not
//! invalidate the stream.  An oversized prefix does invalidate it; the
//! stream cannot be resynchronised and the peer is dropped.

use std::os::unix::net::{UnixListener, UnixStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::thread;

use tracing::{debug, error, info, warn};

use zmk_ipc_core::frame_recv;
use zmk_ipc_core::framing::RecvError;
use zmk_ipc_core::protocol::messages::{
    client_message, key_event, ClientMessage, CLIENT_MESSAGE_MAX_SIZE,
};

use crate::config::IngressConfig;
use crate::socket::{bind_listener, ServerError, ACCEPT_RETRY_DELAY};

/// Host-supplied function invoked per decoded key event with
/// `(row, col, pressed)`.
///
/// The scan source identity is captured by the closure; each server
/// instance dispatches only its own events.
pub type KeyScanCallback = Box<dyn Fn(u32, u32, bool) + Send + Sync>;

/// One key-scan ingress instance.
///
/// Cloning is cheap and yields another handle to the same server; the
/// reader thread lives for the process lifetime.
#[derive(Clone)]
pub struct KscanIpcServer {
    shared: Arc<KscanShared>,
}

struct KscanShared {
    config: IngressConfig,
    callback: RwLock<Option<KeyScanCallback>>,
    enabled: AtomicBool,
}

impl KscanIpcServer {
    /// Binds the socket and spawns the reader thread.
    ///
    /// The stale socket path is unlinked first.  Dispatch starts disabled
    /// and without a callback; decoded events are dropped until
    /// [`configure`](Self::configure) and [`enable`](Self::enable) are
    /// called.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError`] if the socket cannot be bound or the thread
    /// cannot be spawned.  Peer behaviour after startup never fails the
    /// server.
    pub fn start(config: IngressConfig) -> Result<Self, ServerError> {
        let listener = bind_listener(&config.socket_path)?;
        info!(
            "kscan IPC: listening on {} ({}x{} matrix)",
            config.socket_path.display(),
            config.rows,
            config.columns
        );

        let shared = Arc::new(KscanShared {
            config,
            callback: RwLock::new(None),
            enabled: AtomicBool::new(false),
        });

        let reader_shared = Arc::clone(&shared);
        thread::Builder::new()
            .name("kscan-ipc".to_string())
            .spawn(move || read_loop(listener, reader_shared))
            .map_err(|source| ServerError::ThreadSpawn {
                name: "kscan-ipc",
                source,
            })?;

        Ok(Self { shared })
    }

    /// Registers the key-scan callback, replacing any previous one.
    ///
    /// The callback runs on the reader thread, outside any interrupt-like
    /// context; hosts with stricter threading rules interpose their own
    /// handoff.  Bounds checking of `(row, col)` is the host's
    /// responsibility.
    pub fn configure<F>(&self, callback: F)
    where
        F: Fn(u32, u32, bool) + Send + Sync + 'static,
    {
        let mut guard = self
            .shared
            .callback
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Some(Box::new(callback));
    }

    /// Starts dispatching decoded events to the callback, from the next
    /// received frame on.
    pub fn enable(&self) {
        self.shared.enabled.store(true, Ordering::Relaxed);
    }

    /// Stops dispatching.  Frames are still received and decoded; their
    /// events are dropped.
    pub fn disable(&self) {
        self.shared.enabled.store(false, Ordering::Relaxed);
    }
}

// ── Reader thread ─────────────────────────────────────────────────────────────

fn read_loop(listener: UnixListener, shared: Arc<KscanShared>) {
    loop {
        debug!(
            "kscan IPC: waiting for client on {}",
            shared.config.socket_path.display()
        );
        let stream = match listener.accept() {
            Ok((stream, _addr)) => stream,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                error!("kscan IPC: accept failed: {e}");
                thread::sleep(ACCEPT_RETRY_DELAY);
                continue;
            }
        };

        info!("kscan IPC: client connected");
        serve_peer(&stream, &shared);
        // The stream drops here, closing the peer; back to WAIT_PEER.
    }
}

/// Receives frames from one connected peer until the stream ends or is
/// poisoned.
fn serve_peer(stream: &UnixStream, shared: &KscanShared) {
    loop {
        match frame_recv::<ClientMessage>(stream, CLIENT_MESSAGE_MAX_SIZE) {
            Ok(msg) => dispatch(&msg, shared),
            Err(RecvError::Decode(e)) => {
                warn!("kscan IPC: decode error, skipping frame: {e}");
            }
            Err(RecvError::PeerClosed) => {
                info!("kscan IPC: client disconnected");
                return;
            }
            Err(RecvError::TooLarge { len, max }) => {
                warn!("kscan IPC: oversized frame ({len} > {max}), closing connection");
                return;
            }
            Err(RecvError::Io(e)) => {
                error!("kscan IPC: recv error, closing connection: {e}");
                return;
            }
        }
    }
}

fn dispatch(msg: &ClientMessage, shared: &KscanShared) {
    let Some((row, col, pressed)) = resolve_key_event(msg, shared.config.columns) else {
        return;
    };

    debug!("kscan IPC event: row={row} col={col} pressed={pressed}");

    if shared.enabled.load(Ordering::Relaxed) {
        let guard = shared
            .callback
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(callback) = guard.as_ref() {
            callback(row, col, pressed);
        }
    }
}

/// Validates a decoded message and resolves its address to matrix
/// coordinates.  Returns `None` (after logging) for anything malformed.
fn resolve_key_event(msg: &ClientMessage, columns: u32) -> Option<(u32, u32, bool)> {
    let Some(client_message::Payload::KeyEvent(ev)) = &msg.payload else {
        warn!("kscan IPC: ClientMessage without key_event payload");
        return None;
    };

    let pressed = match key_event::Action::try_from(ev.action) {
        Ok(key_event::Action::Press) => true,
        Ok(key_event::Action::Release) => false,
        Err(_) => {
            warn!("kscan IPC: unknown KeyEvent action {}", ev.action);
            return None;
        }
    };

    match &ev.address {
        Some(key_event::Address::KeyPos(pos)) => Some((pos.row, pos.col, pressed)),
        Some(key_event::Address::Position(position)) => {
            if columns == 0 {
                error!("kscan IPC: position event received but columns == 0");
                return None;
            }
            Some((position / columns, position % columns, pressed))
        }
        None => {
            warn!("kscan IPC: KeyEvent has no address field");
            None
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
