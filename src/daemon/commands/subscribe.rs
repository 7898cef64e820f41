//! `subscribe` / `unsubscribe`: named stored queries pushed on settle.

use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::{Receiver, bounded};
use serde_json::{Value, json};

use crate::clock::ClockSpec;
use crate::daemon::ipc::make_response;
use crate::daemon::publisher::Subscription;
use crate::daemon::registry::{CommandDef, CommandFlags, CommandRegistry};
use crate::daemon::root::Root;
use crate::daemon::server::{ClientWriter, SubscriptionCtl};
use crate::daemon::{CommandCtx, CommandError};
use crate::query::{Query, execute, parse_query};

use super::{resolve_root, validate_root_arg};

fn cmd_subscribe(
    ctx: &mut CommandCtx<'_>,
    args: &[Value],
) -> Result<Option<Value>, CommandError> {
    let root = resolve_root(ctx, args)?;
    let name = args
        .get(2)
        .and_then(Value::as_str)
        .ok_or_else(|| CommandError::validation("expected 2nd parameter to be subscription name"))?
        .to_string();
    let spec = args.get(3).cloned().unwrap_or_else(|| json!({}));

    let query = parse_query(&ctx.daemon.terms, &spec, root.default_sync_timeout())?;
    let subscription = root
        .publisher()
        .subscribe()
        .map_err(|err| CommandError::validation(err.to_string()))?;

    // Ack before the stream thread can push anything.
    let mut resp = make_response();
    resp["subscribe"] = json!(name);
    let _ = ctx.session.writer.send(&resp);

    let (stop_tx, stop_rx) = bounded(1);
    let writer = ctx.session.writer.clone();
    let thread_name = name.clone();
    let thread_root = Arc::clone(&root);
    let thread = std::thread::Builder::new()
        .name(format!("subscription {name}"))
        .spawn(move || {
            run_subscription(thread_root, thread_name, query, subscription, stop_rx, writer)
        })
        .map_err(|err| CommandError::validation(format!("failed to start subscription: {err}")))?;

    // A re-subscribe under the same name supersedes the previous stream.
    if let Some(old) = ctx
        .session
        .subscriptions
        .insert(name, SubscriptionCtl::new(stop_tx, thread))
    {
        old.stop();
    }

    Ok(None)
}

fn cmd_unsubscribe(
    ctx: &mut CommandCtx<'_>,
    args: &[Value],
) -> Result<Option<Value>, CommandError> {
    let _root = resolve_root(ctx, args)?;
    let name = args
        .get(2)
        .and_then(Value::as_str)
        .ok_or_else(|| CommandError::validation("expected 2nd parameter to be subscription name"))?;

    let removed = ctx.session.subscriptions.remove(name);
    let deleted = removed.is_some();
    if let Some(ctl) = removed {
        ctl.stop();
    }

    let mut resp = make_response();
    resp["unsubscribe"] = json!(name);
    resp["deleted"] = json!(deleted);
    Ok(Some(resp))
}

fn run_subscription(
    root: Arc<Root>,
    name: String,
    mut query: Query,
    subscription: Subscription,
    stop_rx: Receiver<()>,
    writer: ClientWriter,
) {
    // Initial result set establishes the client's baseline position.
    if push_results(&root, &name, &mut query, &writer, true).is_err() {
        return;
    }

    loop {
        crossbeam::select! {
            recv(stop_rx) -> _ => return,

            recv(subscription.receiver()) -> msg => {
                let Ok(first) = msg else { return };
                subscription.acknowledge(&first);
                let mut items = vec![first];
                items.extend(subscription.drain_pending());

                let mut saw_settle = false;
                for item in items {
                    if item.get("settled").is_some() {
                        saw_settle = true;
                    } else if item.get("state-enter").is_some()
                        || item.get("state-leave").is_some()
                    {
                        let mut payload = (*item).clone();
                        payload["subscription"] = json!(name);
                        payload["unilateral"] = json!(true);
                        if writer.send(&payload).is_err() {
                            return;
                        }
                    }
                }
                if saw_settle && push_results(&root, &name, &mut query, &writer, false).is_err() {
                    return;
                }
            }
        }
    }
}

/// Re-run the stored query and push matches. Advances the query's since
/// position to the sampled clock on success.
fn push_results(
    root: &Arc<Root>,
    name: &str,
    query: &mut Query,
    writer: &ClientWriter,
    initial: bool,
) -> Result<(), ()> {
    // Settle points are already synchronized.
    query.sync_timeout = Duration::ZERO;
    let res = match execute(query, root) {
        Ok(res) => res,
        Err(err) => {
            tracing::error!("subscription {name} query failed: {err}");
            return Ok(());
        }
    };
    let fresh = res.is_fresh_instance;
    query.since_spec = Some(ClockSpec::Clock(res.clock_at_start_of_query));

    if initial || !res.results.is_empty() {
        let payload = json!({
            "subscription": name,
            "root": root.path().to_string_lossy(),
            "clock": res.clock_at_start_of_query.to_clock_string(),
            "files": res.results,
            "is_fresh_instance": fresh,
            "unilateral": true,
        });
        writer.send(&payload).map_err(|_| ())?;
    }
    Ok(())
}

pub(super) fn register(reg: &mut CommandRegistry) {
    reg.register(CommandDef {
        name: "subscribe",
        handler: cmd_subscribe,
        flags: CommandFlags::DAEMON,
        validator: Some(validate_root_arg),
    });
    reg.register(CommandDef {
        name: "unsubscribe",
        handler: cmd_unsubscribe,
        flags: CommandFlags::DAEMON,
        validator: Some(validate_root_arg),
    });
}
