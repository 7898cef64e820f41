use thiserror::Error;

use crate::config::ConfigError;
use crate::daemon::CommandError;
use crate::daemon::ipc::IpcError;

/// Crate-level convenience error: a thin wrapper over the subsystem errors.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Ipc(#[from] IpcError),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The server replied with an error PDU.
    #[error("{0}")]
    Server(String),
}
