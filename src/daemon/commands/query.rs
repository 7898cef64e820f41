//! `query` and its legacy cousin `find`.

use std::time::Duration;

use serde_json::{Value, json};

use crate::daemon::ipc::make_response;
use crate::daemon::registry::{CommandDef, CommandFlags, CommandRegistry};
use crate::daemon::{CommandCtx, CommandError};
use crate::query::{execute, parse_query};

use super::{resolve_root, validate_root_arg};

/* query /root {query-spec} */
fn cmd_query(ctx: &mut CommandCtx<'_>, args: &[Value]) -> Result<Option<Value>, CommandError> {
    if args.len() != 3 {
        return Err(CommandError::validation(
            "wrong number of arguments for 'query'",
        ));
    }
    let root = resolve_root(ctx, args)?;

    let mut query = parse_query(&ctx.daemon.terms, &args[2], root.default_sync_timeout())?;
    if ctx.session.client_mode {
        query.sync_timeout = Duration::ZERO;
    }

    let res = execute(&query, &root)?;
    let mut resp = make_response();
    resp["is_fresh_instance"] = json!(res.is_fresh_instance);
    resp["clock"] = json!(res.clock_at_start_of_query.to_clock_string());
    resp["files"] = Value::Array(res.results);
    Ok(Some(resp))
}

/* find /root [patterns] */
fn cmd_find(ctx: &mut CommandCtx<'_>, args: &[Value]) -> Result<Option<Value>, CommandError> {
    if args.len() < 2 {
        return Err(CommandError::validation("not enough arguments for 'find'"));
    }
    let root = resolve_root(ctx, args)?;

    let mut spec = serde_json::Map::new();
    if args.len() > 2 {
        let mut terms = vec![json!("anyof")];
        for pattern in &args[2..] {
            let pattern = pattern
                .as_str()
                .ok_or_else(|| CommandError::validation("patterns must be strings"))?;
            terms.push(json!(["match", pattern, "wholename"]));
        }
        spec.insert("expression".to_string(), Value::Array(terms));
    }

    let mut query = parse_query(
        &ctx.daemon.terms,
        &Value::Object(spec),
        root.default_sync_timeout(),
    )?;
    if ctx.session.client_mode {
        query.sync_timeout = Duration::ZERO;
    }

    let res = execute(&query, &root)?;
    let mut resp = make_response();
    resp["clock"] = json!(res.clock_at_start_of_query.to_clock_string());
    resp["files"] = Value::Array(res.results);
    Ok(Some(resp))
}

pub(super) fn register(reg: &mut CommandRegistry) {
    reg.register(CommandDef {
        name: "query",
        handler: cmd_query,
        flags: CommandFlags::DAEMON | CommandFlags::CLIENT | CommandFlags::ALLOW_ANY_USER,
        validator: Some(validate_root_arg),
    });
    reg.register(CommandDef {
        name: "find",
        handler: cmd_find,
        flags: CommandFlags::DAEMON | CommandFlags::ALLOW_ANY_USER,
        validator: Some(validate_root_arg),
    });
}
