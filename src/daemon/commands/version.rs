//! `version`, `list-capabilities`, `shutdown-server`.

use serde_json::{Value, json};

use crate::daemon::ipc::make_response;
use crate::daemon::registry::{CommandDef, CommandFlags, CommandRegistry};
use crate::daemon::{CommandCtx, CommandError};

fn cmd_version(ctx: &mut CommandCtx<'_>, args: &[Value]) -> Result<Option<Value>, CommandError> {
    let mut resp = make_response();

    // Optional capability interrogation:
    // ["version", {"optional": [...], "required": [...]}]
    if let Some(Value::Object(obj)) = args.get(1) {
        let mut caps = serde_json::Map::new();
        for name in list_of_strings(obj.get("optional"))? {
            let supported = ctx.daemon.registry.capability_supported(&name);
            caps.insert(name, json!(supported));
        }
        for name in list_of_strings(obj.get("required"))? {
            let supported = ctx.daemon.registry.capability_supported(&name);
            if !supported {
                return Err(CommandError::validation(format!(
                    "client required capability '{name}' is not supported by this server"
                )));
            }
            caps.insert(name, json!(true));
        }
        resp["capabilities"] = Value::Object(caps);
    }

    Ok(Some(resp))
}

fn list_of_strings(value: Option<&Value>) -> Result<Vec<String>, CommandError> {
    match value {
        None => Ok(Vec::new()),
        Some(Value::Array(arr)) => arr
            .iter()
            .map(|v| {
                v.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| CommandError::validation("capability names must be strings"))
            })
            .collect(),
        Some(_) => Err(CommandError::validation(
            "capability lists must be arrays of strings",
        )),
    }
}

fn cmd_list_capabilities(
    ctx: &mut CommandCtx<'_>,
    _args: &[Value],
) -> Result<Option<Value>, CommandError> {
    let mut resp = make_response();
    resp["capabilities"] = json!(ctx.daemon.registry.capability_get_list());
    Ok(Some(resp))
}

fn cmd_shutdown_server(
    ctx: &mut CommandCtx<'_>,
    _args: &[Value],
) -> Result<Option<Value>, CommandError> {
    tracing::info!("shutdown-server requested");
    ctx.daemon.begin_shutdown();
    let mut resp = make_response();
    resp["shutdown-server"] = json!(true);
    Ok(Some(resp))
}

pub(super) fn register(reg: &mut CommandRegistry) {
    reg.register(CommandDef {
        name: "version",
        handler: cmd_version,
        flags: CommandFlags::DAEMON
            | CommandFlags::CLIENT
            | CommandFlags::ALLOW_ANY_USER
            | CommandFlags::POISON_IMMUNE,
        validator: None,
    });
    reg.register(CommandDef {
        name: "list-capabilities",
        handler: cmd_list_capabilities,
        flags: CommandFlags::DAEMON
            | CommandFlags::CLIENT
            | CommandFlags::ALLOW_ANY_USER
            | CommandFlags::POISON_IMMUNE,
        validator: None,
    });
    reg.register(CommandDef {
        name: "shutdown-server",
        handler: cmd_shutdown_server,
        flags: CommandFlags::DAEMON | CommandFlags::POISON_IMMUNE,
        validator: None,
    });
}
