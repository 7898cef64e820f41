//! `state-enter` / `state-leave` and the implicit vacate path.
//!
//! The synchronous ack always precedes any broadcast. Broadcasts ride on the
//! completion of a cookie sync so that subscribers observe a clock that is
//! consistent with the assertion, and only the head of a name's FIFO may
//! broadcast.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};

use crate::daemon::ipc::make_response;
use crate::daemon::registry::{CommandDef, CommandFlags, CommandRegistry};
use crate::daemon::root::Root;
use crate::daemon::server::ClientSession;
use crate::daemon::state::{ClientStateAssertion, ClientStateDisposition};
use crate::daemon::{CommandCtx, CommandError, cookies};
use crate::view::QueryableView;

use super::{resolve_root, validate_root_arg};

struct StateArg {
    name: String,
    metadata: Option<Value>,
    sync_timeout: Duration,
}

// Parses the args for state-enter and state-leave:
// [cmd, root, statename] or [cmd, root, {name, metadata?, sync_timeout?}]
fn parse_state_args(root: &Root, args: &[Value]) -> Result<StateArg, CommandError> {
    if args.len() != 3 {
        return Err(CommandError::validation(format!(
            "invalid number of arguments, expected 3, got {}",
            args.len()
        )));
    }
    match &args[2] {
        Value::String(name) => Ok(StateArg {
            name: name.clone(),
            metadata: None,
            sync_timeout: root.default_sync_timeout(),
        }),
        Value::Object(obj) => {
            let name = obj
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| CommandError::validation("missing state name"))?
                .to_string();
            let metadata = obj.get("metadata").cloned();
            let sync_timeout = match obj.get("sync_timeout") {
                None => root.default_sync_timeout(),
                Some(v) => {
                    let ms = v.as_i64().ok_or_else(|| {
                        CommandError::validation("sync_timeout must be an integer")
                    })?;
                    if ms < 0 {
                        return Err(CommandError::validation("sync_timeout must be >= 0"));
                    }
                    Duration::from_millis(ms as u64)
                }
            };
            Ok(StateArg {
                name,
                metadata,
                sync_timeout,
            })
        }
        _ => Err(CommandError::validation(
            "the third argument must be a state name or an object",
        )),
    }
}

fn cmd_state_enter(
    ctx: &mut CommandCtx<'_>,
    args: &[Value],
) -> Result<Option<Value>, CommandError> {
    let root = resolve_root(ctx, args)?;
    let parsed = parse_state_args(&root, args)?;

    if ctx.session.states.contains_key(&parsed.name) {
        return Err(CommandError::validation(format!(
            "state {} is already asserted",
            parsed.name
        )));
    }

    let assertion = ClientStateAssertion::new(&root, parsed.name.clone());

    // Queue on the root first; this fails if the state is already asserted
    // or pending, before we link anything to the client.
    root.asserted_states
        .lock()
        .expect("asserted states lock")
        .queue_assertion(Arc::clone(&assertion))?;

    root.bump_state_trans_count();
    ctx.session
        .states
        .insert(parsed.name.clone(), Arc::downgrade(&assertion));

    // Ack before any subscription PDU can mention this state.
    let mut resp = make_response();
    resp["root"] = json!(root.path().to_string_lossy());
    resp["state-enter"] = json!(parsed.name);
    let _ = ctx.session.writer.send(&resp);

    let handle = match root.cookies().sync() {
        Ok(handle) => handle,
        Err(err) => {
            // Past the ack: log, unclog the FIFO, no broadcast.
            tracing::error!("state-enter sync failed: {err}");
            root.remove_assertion(&assertion);
            return Ok(None);
        }
    };

    let name = parsed.name;
    let metadata = parsed.metadata;
    cookies::spawn_continuation(handle, parsed.sync_timeout, move |result| {
        if let Err(err) = result {
            // Don't allow this assertion to clog up and block further
            // attempts. The client side is cleaned up on disconnect or on
            // an attempted leave.
            tracing::error!("state-enter sync failed: {err}");
            root.remove_assertion(&assertion);
            return;
        }

        let mut payload = json!({
            "root": root.path().to_string_lossy(),
            "clock": root.view().current_clock_string(),
            "state-enter": name,
        });
        if let Some(metadata) = metadata {
            payload["metadata"] = metadata;
        }

        let states = root.asserted_states.lock().expect("asserted states lock");
        assertion.set_disposition(ClientStateDisposition::Asserted);
        if states.is_front(&assertion) {
            root.publisher().publish(payload);
        } else {
            // Defer until this assertion reaches the front of the queue;
            // remove_assertion broadcasts it then.
            assertion.set_enter_payload(payload);
        }
    });

    Ok(None)
}

fn cmd_state_leave(
    ctx: &mut CommandCtx<'_>,
    args: &[Value],
) -> Result<Option<Value>, CommandError> {
    let root = resolve_root(ctx, args)?;
    let parsed = parse_state_args(&root, args)?;

    let Some(weak) = ctx.session.states.get(&parsed.name) else {
        return Err(CommandError::validation(format!(
            "state {} is not asserted",
            parsed.name
        )));
    };
    let Some(assertion) = weak.upgrade() else {
        ctx.session.states.remove(&parsed.name);
        return Err(CommandError::validation(format!(
            "state {} was implicitly vacated",
            parsed.name
        )));
    };

    {
        let _states = root.asserted_states.lock().expect("asserted states lock");
        if assertion.disposition() == ClientStateDisposition::Done {
            return Err(CommandError::validation(format!(
                "state {} was implicitly vacated",
                parsed.name
            )));
        }
        // Not vacated until the cookie has round-tripped.
        assertion.set_disposition(ClientStateDisposition::PendingLeave);
    }

    // Unlink from the client now; the root keeps its strong reference until
    // the far side of the sync.
    ctx.session.states.remove(&parsed.name);

    let mut resp = make_response();
    resp["root"] = json!(root.path().to_string_lossy());
    resp["state-leave"] = json!(parsed.name);
    let _ = ctx.session.writer.send(&resp);

    let metadata = parsed.metadata;
    match root.cookies().sync() {
        Ok(handle) => {
            cookies::spawn_continuation(handle, parsed.sync_timeout, move |result| {
                if let Err(err) = result {
                    // A parked PendingLeave would block later assertions of
                    // this name, so fail it forward to Done.
                    tracing::error!("state-leave sync failed: {err}");
                    assertion.set_disposition(ClientStateDisposition::Done);
                    root.remove_assertion(&assertion);
                    return;
                }
                leave_state(None, &assertion, false, metadata);
            });
        }
        Err(err) => {
            tracing::error!("state-leave sync failed: {err}");
            assertion.set_disposition(ClientStateDisposition::Done);
            root.remove_assertion(&assertion);
        }
    }

    Ok(None)
}

/// Broadcast the leave and unlink the assertion from the root.
pub(crate) fn leave_state(
    session: Option<&mut ClientSession>,
    assertion: &Arc<ClientStateAssertion>,
    abandoned: bool,
    metadata: Option<Value>,
) {
    let Some(root) = assertion.root.upgrade() else {
        return;
    };

    let mut payload = json!({
        "root": root.path().to_string_lossy(),
        "clock": root.view().current_clock_string(),
        "state-leave": assertion.name,
    });
    if let Some(metadata) = metadata {
        payload["metadata"] = metadata;
    }
    if abandoned {
        payload["abandoned"] = json!(true);
    }

    assertion.set_disposition(ClientStateDisposition::Done);
    root.publisher().publish(payload);
    root.remove_assertion(assertion);

    if let Some(session) = session {
        session.states.remove(&assertion.name);
    }
}

/// Abandon any states the disconnecting client never explicitly vacated.
/// Broadcasts immediately; there is no cookie sync on the teardown path.
pub fn vacate_states(session: &mut ClientSession) {
    let names: Vec<String> = session.states.keys().cloned().collect();
    for name in names {
        let Some(weak) = session.states.remove(&name) else {
            continue;
        };
        let Some(assertion) = weak.upgrade() else {
            continue;
        };
        let Some(root) = assertion.root.upgrade() else {
            continue;
        };
        tracing::error!(
            "implicitly vacating state {name} on {} due to client disconnect",
            root.path().display()
        );
        leave_state(None, &assertion, true, None);
    }
}

pub(super) fn register(reg: &mut CommandRegistry) {
    reg.register(CommandDef {
        name: "state-enter",
        handler: cmd_state_enter,
        flags: CommandFlags::DAEMON,
        validator: Some(validate_root_arg),
    });
    reg.register(CommandDef {
        name: "state-leave",
        handler: cmd_state_leave,
        flags: CommandFlags::DAEMON,
        validator: Some(validate_root_arg),
    });
}
