//! Wire protocol and socket plumbing.
//!
//! Commands are newline-delimited JSON arrays `[commandName, root?, args...]`
//! over a Unix domain socket. Responses are JSON objects carrying the server
//! version; errors are objects with an `error` field. Server-initiated
//! payloads carry `unilateral: true`.

use std::io::{BufRead, BufReader, Write};
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::UnixStream;
use std::path::PathBuf;

use serde_json::{Value, json};
use thiserror::Error;

use crate::paths;

#[derive(Error, Debug)]
pub enum IpcError {
    #[error("parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed command: {0}")]
    Protocol(String),
    #[error("daemon unavailable: {0}")]
    DaemonUnavailable(String),
}

/// Start a response object. Every reply carries the server version.
pub fn make_response() -> Value {
    json!({ "version": env!("CARGO_PKG_VERSION") })
}

pub fn error_response(message: impl AsRef<str>) -> Value {
    json!({
        "version": env!("CARGO_PKG_VERSION"),
        "error": message.as_ref(),
    })
}

/// Decode one request line into its command array.
pub fn decode_command(line: &str) -> Result<Vec<Value>, IpcError> {
    let value: Value = serde_json::from_str(line)?;
    let Value::Array(args) = value else {
        return Err(IpcError::Protocol("command must be a JSON array".into()));
    };
    if args.is_empty() {
        return Err(IpcError::Protocol("command array is empty".into()));
    }
    if !args[0].is_string() {
        return Err(IpcError::Protocol(
            "first element must be the command name".into(),
        ));
    }
    Ok(args)
}

pub fn encode_pdu(value: &Value) -> Result<Vec<u8>, IpcError> {
    let mut bytes = serde_json::to_vec(value)?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Ensure the socket directory exists and is user-private.
pub fn ensure_socket_dir() -> Result<PathBuf, IpcError> {
    let dir = paths::runtime_dir();
    std::fs::create_dir_all(&dir)?;
    let mode = std::fs::metadata(&dir)?.permissions().mode() & 0o777;
    if mode != 0o700 {
        std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o700))?;
    }
    Ok(dir)
}

/// The daemon socket path. `WATCHMAN_SOCK` overrides for clients pointed at
/// a specific server.
pub fn socket_path() -> PathBuf {
    if let Ok(sock) = std::env::var("WATCHMAN_SOCK")
        && !sock.trim().is_empty()
    {
        return PathBuf::from(sock);
    }
    paths::runtime_dir().join("daemon.sock")
}

/// One-shot client: send a command array, read one response.
pub fn send_command(args: &[Value]) -> Result<Value, IpcError> {
    let sock = socket_path();
    let stream = UnixStream::connect(&sock).map_err(|err| {
        IpcError::DaemonUnavailable(format!("cannot connect to {}: {err}", sock.display()))
    })?;
    send_command_over(stream, args)
}

fn send_command_over(stream: UnixStream, args: &[Value]) -> Result<Value, IpcError> {
    let mut writer = stream;
    let reader = writer.try_clone()?;
    let mut reader = BufReader::new(reader);

    let mut line = serde_json::to_string(&Value::Array(args.to_vec()))?;
    line.push('\n');
    writer.write_all(line.as_bytes())?;
    writer.flush()?;

    let mut response = String::new();
    let n = reader.read_line(&mut response)?;
    if n == 0 || response.trim().is_empty() {
        return Err(IpcError::DaemonUnavailable(
            "daemon closed the connection".into(),
        ));
    }
    Ok(serde_json::from_str(&response)?)
}
