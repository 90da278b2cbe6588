//! Static per-instance configuration for the two servers.
//!
//! Hosts construct these directly or deserialise them from their own config
//! layer; `#[serde(default = "fn")]` keeps older config files working when
//! fields are absent.  There is no env or CLI parsing here; that is the
//! host's concern.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Conventional path of the key-scan injection socket.
pub const DEFAULT_KSCAN_SOCKET_PATH: &str = "/tmp/zmk_kscan_ipc.sock";

/// Conventional path of the event-observer socket.
pub const DEFAULT_OBSERVER_SOCKET_PATH: &str = "/tmp/zmk_ipc.sock";

/// Configuration of one key-scan ingress instance.
///
/// Multiple instances may coexist (split halves, test fixtures); they are
/// distinguished by socket path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngressConfig {
    /// Filesystem path of the listening socket.  Unlinked and re-created at
    /// startup.
    #[serde(default = "default_kscan_socket_path")]
    pub socket_path: PathBuf,
    /// Matrix row count.  Informational for hosts; row bounds checking of
    /// injected events is the host's responsibility.
    pub rows: u32,
    /// Matrix column count.  Required to expand linear `position` addresses;
    /// a zero value rejects every `position`-addressed event.
    pub columns: u32,
}

impl IngressConfig {
    /// Config for a `rows` × `columns` matrix on the conventional socket
    /// path.
    pub fn for_matrix(rows: u32, columns: u32) -> Self {
        Self {
            socket_path: default_kscan_socket_path(),
            rows,
            columns,
        }
    }
}

/// Configuration of the event-observer egress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EgressConfig {
    /// Filesystem path of the listening socket.  Unlinked and re-created at
    /// startup.
    #[serde(default = "default_observer_socket_path")]
    pub socket_path: PathBuf,
    /// Capacity of the client table.  Connections beyond this are accepted
    /// by the kernel and immediately closed with a warning.
    #[serde(default = "default_max_clients")]
    pub max_clients: usize,
}

impl Default for EgressConfig {
    fn default() -> Self {
        Self {
            socket_path: default_observer_socket_path(),
            max_clients: default_max_clients(),
        }
    }
}

fn default_kscan_socket_path() -> PathBuf {
    PathBuf::from(DEFAULT_KSCAN_SOCKET_PATH)
}

fn default_observer_socket_path() -> PathBuf {
    PathBuf::from(DEFAULT_OBSERVER_SOCKET_PATH)
}

fn default_max_clients() -> usize {
    4
}

// ── Tests ─────────────────────────────────────────────────────────────────────
