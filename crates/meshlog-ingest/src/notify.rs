//! Service-manager liveness notifications.
//!
//! Implements the systemd `NOTIFY_SOCKET` datagram protocol: `READY=1`
//! once the first device session is established, `WATCHDOG=1` on every
//! liveness pulse. When `NOTIFY_SOCKET` is unset (running outside
//! systemd, tests), every call is a no-op.
//!
//! Notification failures are logged at debug and never propagate; a
//! missing supervisor must not take the pipeline down.

use std::env;
use std::os::unix::net::UnixDatagram;
use std::path::PathBuf;
use tracing::debug;

/// Sends state notifications to the service manager, if one is listening.
#[derive(Debug)]
pub struct SystemdNotifier {
    socket_path: Option<PathBuf>,
}

impl SystemdNotifier {
    /// Build a notifier from the `NOTIFY_SOCKET` environment variable.
    pub fn from_env() -> Self {
        let socket_path = env::var_os("NOTIFY_SOCKET").map(PathBuf::from);
        match &socket_path {
            Some(path) => debug!("Service manager notifications to {}", path.display()),
            None => debug!("NOTIFY_SOCKET not set, liveness notifications disabled"),
        }
        Self::with_path(socket_path)
    }

    /// Build a notifier targeting an explicit socket path (`None` disables).
    pub fn with_path(socket_path: Option<PathBuf>) -> Self {
        Self { socket_path }
    }

    /// Announce that startup is complete and the first session is live.
    pub fn ready(&self) {
        self.send("READY=1");
    }

    /// Pulse the watchdog.
    pub fn watchdog(&self) {
        self.send("WATCHDOG=1");
    }

    fn send(&self, state: &str) {
        let Some(path) = &self.socket_path else {
            return;
        };
        // Abstract-namespace sockets (leading '@') are not representable as
        // a filesystem path; systemd passes a real path in practice.
        if path.to_string_lossy().starts_with('@') {
            debug!("Abstract NOTIFY_SOCKET is not supported, skipping {}", state);
            return;
        }
        let result = UnixDatagram::unbound().and_then(|sock| sock.send_to(state.as_bytes(), path));
        if let Err(e) = result {
            debug!("Failed to notify service manager ({}): {}", state, e);
        }
    }
}
