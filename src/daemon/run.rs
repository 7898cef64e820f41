//! Daemon runner.
//!
//! `watchman daemon run` binds the socket and serves until a signal or a
//! `shutdown-server` command arrives.

use std::os::unix::net::{UnixListener, UnixStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::config::Config;
use crate::daemon::ipc::{IpcError, ensure_socket_dir};
use crate::daemon::server::handle_client;
use crate::daemon::{Daemon, DaemonContext};
use crate::paths;
use crate::{Error, Result};

/// Run the daemon in the current process. Returns once a shutdown signal or
/// command has been handled.
pub fn run_daemon(config: Config) -> Result<()> {
    let dir = ensure_socket_dir().map_err(Error::from)?;
    let sock = dir.join("daemon.sock");

    // If another daemon is already listening, exit quietly.
    if UnixStream::connect(&sock).is_ok() {
        tracing::warn!("daemon already running on {}", sock.display());
        return Ok(());
    }
    let _ = std::fs::remove_file(&sock);

    let listener = UnixListener::bind(&sock).map_err(IpcError::from)?;
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = std::fs::set_permissions(&sock, std::fs::Permissions::from_mode(0o600));
    }
    tracing::info!("daemon listening on {}", sock.display());

    let context = Arc::new(DaemonContext {
        sock_path: sock.clone(),
        temp_dir: paths::temp_dir(),
    });
    let daemon = Daemon::new(config, context);

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let _ = signal_hook::flag::register(signal_hook::consts::SIGTERM, shutdown.clone());
        let _ = signal_hook::flag::register(signal_hook::consts::SIGINT, shutdown.clone());
    }

    // Non-blocking accept so shutdown requests are noticed promptly.
    listener.set_nonblocking(true).map_err(IpcError::from)?;

    loop {
        if shutdown.load(Ordering::Relaxed) || daemon.is_stopping() {
            break;
        }
        match listener.accept() {
            Ok((stream, _)) => {
                let daemon = Arc::clone(&daemon);
                std::thread::spawn(move || {
                    let _ = stream.set_nonblocking(false);
                    handle_client(stream, daemon);
                });
            }
            Err(ref err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(100));
            }
            Err(err) => {
                tracing::error!("accept error: {err}");
            }
        }
    }

    tracing::info!("shutting down");
    daemon.begin_shutdown();
    daemon.stop_all_roots();
    let _ = std::fs::remove_file(&sock);
    Ok(())
}
