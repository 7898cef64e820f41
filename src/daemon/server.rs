//! Client connections and command dispatch.
//!
//! One thread per connection. Command handlers run on that thread and may
//! either return a response for the dispatcher to write or take over the
//! writer themselves (ack-then-continue commands). Unilateral payloads are
//! written through the same shared writer by subscription threads.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::sync::{Arc, Mutex, Weak};
use std::thread::JoinHandle;

use crossbeam::channel::Sender;
use serde_json::Value;

use super::ipc::{decode_command, encode_pdu, error_response};
use super::registry::CommandFlags;
use super::state::ClientStateAssertion;
use super::{CommandCtx, Daemon, commands};

/// Serialized access to one client's socket for responses and unilateral
/// payloads alike.
#[derive(Clone)]
pub struct ClientWriter {
    inner: Arc<Mutex<UnixStream>>,
}

impl ClientWriter {
    pub fn new(stream: UnixStream) -> Self {
        Self {
            inner: Arc::new(Mutex::new(stream)),
        }
    }

    pub fn send(&self, value: &Value) -> std::io::Result<()> {
        let bytes = encode_pdu(value).map_err(std::io::Error::other)?;
        let mut stream = self.inner.lock().expect("writer lock poisoned");
        stream.write_all(&bytes)?;
        stream.flush()
    }
}

/// Handle to a running subscription stream.
pub struct SubscriptionCtl {
    stop_tx: Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl SubscriptionCtl {
    pub fn new(stop_tx: Sender<()>, thread: JoinHandle<()>) -> Self {
        Self {
            stop_tx,
            thread: Some(thread),
        }
    }

    pub fn stop(mut self) {
        let _ = self.stop_tx.send(());
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Per-connection state.
pub struct ClientSession {
    pub writer: ClientWriter,
    /// Assertions this session entered; the root holds the strong refs.
    pub states: HashMap<String, Weak<ClientStateAssertion>>,
    pub subscriptions: HashMap<String, SubscriptionCtl>,
    /// Set when running inline in a client process rather than the daemon.
    pub client_mode: bool,
}

impl ClientSession {
    pub fn new(writer: ClientWriter) -> Self {
        Self {
            writer,
            states: HashMap::new(),
            subscriptions: HashMap::new(),
            client_mode: false,
        }
    }
}

/// Serve one connection until it closes or the daemon stops.
pub fn handle_client(stream: UnixStream, daemon: Arc<Daemon>) {
    let writer_stream = match stream.try_clone() {
        Ok(s) => s,
        Err(err) => {
            tracing::error!("failed to clone client stream: {err}");
            return;
        }
    };
    let writer = ClientWriter::new(writer_stream);
    let mut session = ClientSession::new(writer.clone());

    let reader = BufReader::new(stream);
    for line in reader.lines() {
        let Ok(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }
        let args = match decode_command(&line) {
            Ok(args) => args,
            Err(err) => {
                if writer.send(&error_response(err.to_string())).is_err() {
                    break;
                }
                continue;
            }
        };
        dispatch_command(&daemon, &mut session, &args, CommandFlags::DAEMON);
        if daemon.is_stopping() {
            break;
        }
    }

    // Abandon whatever the client left behind.
    commands::vacate_states(&mut session);
    for (_, ctl) in session.subscriptions.drain() {
        ctl.stop();
    }
}

/// Look up and run one command. Unknown names and handler errors become
/// error PDUs; nothing raises past this point.
pub fn dispatch_command(
    daemon: &Arc<Daemon>,
    session: &mut ClientSession,
    args: &[Value],
    mode: CommandFlags,
) {
    let name = args[0].as_str().unwrap_or_default();
    let Some(def) = daemon.registry.lookup(name, mode) else {
        let _ = session
            .writer
            .send(&error_response(format!("unknown command {name}")));
        return;
    };
    let handler = def.handler;
    let validator = def.validator;

    if let Some(validator) = validator
        && let Err(err) = validator(args)
    {
        let _ = session.writer.send(&error_response(err.to_string()));
        return;
    }

    let mut ctx = CommandCtx { daemon, session };
    match handler(&mut ctx, args) {
        Ok(Some(resp)) => {
            let _ = session.writer.send(&resp);
        }
        // The handler already wrote its ack.
        Ok(None) => {}
        Err(err) => {
            let _ = session.writer.send(&error_response(err.to_string()));
        }
    }
}
