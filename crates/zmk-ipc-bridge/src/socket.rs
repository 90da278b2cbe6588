//! Listener setup shared by both servers.

use std::fs;
use std::io;
use std::os::unix::net::UnixListener;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

/// Backoff applied after a failed `accept` before retrying, so a persistent
/// error (EMFILE and friends) does not spin the accept thread.
pub(crate) const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Startup errors.  Peer-induced failures never surface here; only the
/// initial socket setup can fail a server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The listening socket could not be created or bound.
    #[error("failed to bind Unix socket at {path}: {source}")]
    Bind {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The service thread could not be spawned.
    #[error("failed to spawn {name} thread: {source}")]
    ThreadSpawn {
        name: &'static str,
        #[source]
        source: io::Error,
    },
}

/// Unlinks any stale socket file at `path` and binds a fresh listener.
///
/// The unlink reclaims paths left behind by a previous process; a listener
/// bound by a *live* process is also displaced, which matches the original
/// single-owner convention for these sockets.
pub(crate) fn bind_listener(path: &Path) -> Result<UnixListener, ServerError> {
    let _ = fs::remove_file(path);
    UnixListener::bind(path).map_err(|source| ServerError::Bind {
        path: path.to_path_buf(),
        source,
    })
}
