//! `watch` / `watch-list` / `watch-del`.

use serde_json::{Value, json};

use crate::daemon::ipc::make_response;
use crate::daemon::registry::{CommandDef, CommandFlags, CommandRegistry};
use crate::daemon::{CommandCtx, CommandError};

use super::validate_root_arg;

fn cmd_watch(ctx: &mut CommandCtx<'_>, args: &[Value]) -> Result<Option<Value>, CommandError> {
    let path = args
        .get(1)
        .and_then(Value::as_str)
        .ok_or_else(|| CommandError::validation("wrong number of arguments to 'watch'"))?;
    let root = ctx.daemon.watch(std::path::Path::new(path))?;
    let mut resp = make_response();
    resp["watch"] = json!(root.path().to_string_lossy());
    resp["watcher"] = json!("notify");
    Ok(Some(resp))
}

fn cmd_watch_list(
    ctx: &mut CommandCtx<'_>,
    _args: &[Value],
) -> Result<Option<Value>, CommandError> {
    let roots: Vec<String> = ctx
        .daemon
        .watch_list()
        .into_iter()
        .map(|p| p.to_string_lossy().into_owned())
        .collect();
    let mut resp = make_response();
    resp["roots"] = json!(roots);
    Ok(Some(resp))
}

fn cmd_watch_del(
    ctx: &mut CommandCtx<'_>,
    args: &[Value],
) -> Result<Option<Value>, CommandError> {
    let path = args
        .get(1)
        .and_then(Value::as_str)
        .ok_or_else(|| CommandError::validation("wrong number of arguments to 'watch-del'"))?;
    let deleted = ctx.daemon.watch_del(path);
    let mut resp = make_response();
    resp["watch-del"] = json!(deleted);
    resp["root"] = json!(path);
    Ok(Some(resp))
}

pub(super) fn register(reg: &mut CommandRegistry) {
    reg.register(CommandDef {
        name: "watch",
        handler: cmd_watch,
        flags: CommandFlags::DAEMON | CommandFlags::ALLOW_ANY_USER,
        validator: Some(validate_root_arg),
    });
    reg.register(CommandDef {
        name: "watch-list",
        handler: cmd_watch_list,
        flags: CommandFlags::DAEMON | CommandFlags::ALLOW_ANY_USER,
        validator: None,
    });
    reg.register(CommandDef {
        name: "watch-del",
        handler: cmd_watch_del,
        flags: CommandFlags::DAEMON,
        validator: Some(validate_root_arg),
    });
}
