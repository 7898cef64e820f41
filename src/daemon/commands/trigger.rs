//! `trigger` / `trigger-del` / `trigger-list`.

use std::sync::Arc;

use serde_json::{Value, json};

use crate::daemon::ipc::make_response;
use crate::daemon::registry::{CommandDef, CommandFlags, CommandRegistry};
use crate::daemon::trigger::TriggerCommand;
use crate::daemon::{CommandCtx, CommandError};

use super::{resolve_root, validate_root_arg};

/* trigger /root triggername [watch patterns] -- cmd to run
 * or trigger /root {definition object} */
fn cmd_trigger(ctx: &mut CommandCtx<'_>, args: &[Value]) -> Result<Option<Value>, CommandError> {
    let root = resolve_root(ctx, args)?;
    if args.len() < 3 {
        return Err(CommandError::validation("not enough arguments"));
    }

    let definition = if args[2].is_string() {
        build_legacy_trigger(args)?
    } else {
        args[2].clone()
    };

    let cmd = Arc::new(TriggerCommand::parse(&root, &ctx.daemon.terms, definition)?);
    let mut resp = make_response();
    resp["triggerid"] = json!(cmd.name);

    {
        let mut triggers = root.triggers.lock().expect("triggers lock");
        let unchanged = triggers
            .get(&cmd.name)
            .is_some_and(|old| old.definition == cmd.definition);
        if unchanged {
            // Same definition: leave the existing trigger (and its clock)
            // alone so it does not re-fire immediately.
            resp["disposition"] = json!("already_defined");
        } else {
            let replaced = triggers.remove(&cmd.name);
            resp["disposition"] = json!(if replaced.is_some() {
                "replaced"
            } else {
                "created"
            });
            if let Some(old) = replaced {
                // The old thread must be stopped before the new one starts.
                old.stop();
            }
            cmd.start(&root)?;
            triggers.insert(cmd.name.clone(), Arc::clone(&cmd));
        }
    }

    Ok(Some(resp))
}

/// The legacy form packs patterns and the command into the argv tail,
/// separated by `--`.
fn build_legacy_trigger(args: &[Value]) -> Result<Value, CommandError> {
    let name = args[2]
        .as_str()
        .ok_or_else(|| CommandError::validation("expected trigger name"))?;

    let rest = &args[3..];
    let sep = rest
        .iter()
        .position(|v| v.as_str() == Some("--"))
        .ok_or_else(|| CommandError::validation("no command was specified"))?;

    let mut patterns = vec![json!("anyof")];
    for pattern in &rest[..sep] {
        let pattern = pattern
            .as_str()
            .ok_or_else(|| CommandError::validation("expected pattern to be a string"))?;
        patterns.push(json!(["match", pattern, "wholename"]));
    }
    let expression = if sep == 0 {
        json!("true")
    } else {
        Value::Array(patterns)
    };

    let command: Vec<&Value> = rest[sep + 1..].iter().collect();
    if command.is_empty() {
        return Err(CommandError::validation("no command was specified"));
    }
    for ele in &command {
        if !ele.is_string() {
            return Err(CommandError::validation(
                "expected command arguments to be strings",
            ));
        }
    }

    Ok(json!({
        "name": name,
        "append_files": true,
        "stdin": ["name", "exists", "new", "size", "mode"],
        "expression": expression,
        "command": command,
    }))
}

/* trigger-del /root triggername */
fn cmd_trigger_del(
    ctx: &mut CommandCtx<'_>,
    args: &[Value],
) -> Result<Option<Value>, CommandError> {
    let root = resolve_root(ctx, args)?;
    if args.len() != 3 {
        return Err(CommandError::validation("wrong number of arguments"));
    }
    let name = args[2]
        .as_str()
        .ok_or_else(|| CommandError::validation("expected 2nd parameter to be trigger name"))?;

    let removed = root
        .triggers
        .lock()
        .expect("triggers lock")
        .remove(name);
    let deleted = removed.is_some();
    if let Some(cmd) = removed {
        cmd.stop();
    }

    let mut resp = make_response();
    resp["deleted"] = json!(deleted);
    resp["trigger"] = json!(name);
    Ok(Some(resp))
}

/* trigger-list /root */
fn cmd_trigger_list(
    ctx: &mut CommandCtx<'_>,
    args: &[Value],
) -> Result<Option<Value>, CommandError> {
    let root = resolve_root(ctx, args)?;
    let mut definitions: Vec<(String, Value)> = root
        .triggers
        .lock()
        .expect("triggers lock")
        .iter()
        .map(|(name, cmd)| (name.clone(), cmd.definition.clone()))
        .collect();
    definitions.sort_by(|a, b| a.0.cmp(&b.0));

    let mut resp = make_response();
    resp["triggers"] = Value::Array(definitions.into_iter().map(|(_, def)| def).collect());
    Ok(Some(resp))
}

pub(super) fn register(reg: &mut CommandRegistry) {
    reg.register(CommandDef {
        name: "trigger",
        handler: cmd_trigger,
        flags: CommandFlags::DAEMON,
        validator: Some(validate_root_arg),
    });
    reg.register(CommandDef {
        name: "trigger-del",
        handler: cmd_trigger_del,
        flags: CommandFlags::DAEMON,
        validator: Some(validate_root_arg),
    });
    reg.register(CommandDef {
        name: "trigger-list",
        handler: cmd_trigger_list,
        flags: CommandFlags::DAEMON,
        validator: Some(validate_root_arg),
    });
}
