//! `clock`: report the root's current position, optionally cookie-synced.

use std::time::Duration;

use serde_json::{Value, json};

use crate::daemon::cookies::CookieSyncError;
use crate::daemon::ipc::make_response;
use crate::daemon::registry::{CommandDef, CommandFlags, CommandRegistry};
use crate::daemon::{CommandCtx, CommandError};
use crate::query::{QueryExecError, QuerySyncTimeout};
use crate::view::QueryableView;

use super::{resolve_root, validate_root_arg};

fn cmd_clock(ctx: &mut CommandCtx<'_>, args: &[Value]) -> Result<Option<Value>, CommandError> {
    let root = resolve_root(ctx, args)?;

    let sync_timeout = match args.get(2) {
        None => Duration::ZERO,
        Some(Value::Object(obj)) => match obj.get("sync_timeout") {
            None => Duration::ZERO,
            Some(v) => {
                let ms = v
                    .as_i64()
                    .ok_or_else(|| CommandError::validation("sync_timeout must be an integer"))?;
                if ms < 0 {
                    return Err(CommandError::validation("sync_timeout must be >= 0"));
                }
                Duration::from_millis(ms as u64)
            }
        },
        Some(_) => {
            return Err(CommandError::validation(
                "the third argument to 'clock' must be an optional object",
            ));
        }
    };

    if sync_timeout > Duration::ZERO {
        let handle = root
            .cookies()
            .sync()
            .map_err(QueryExecError::Sync)?;
        match handle.wait(sync_timeout) {
            Ok(()) => {}
            Err(CookieSyncError::Timeout { .. }) => {
                return Err(QueryExecError::from(QuerySyncTimeout {
                    timeout: sync_timeout,
                })
                .into());
            }
            Err(other) => return Err(QueryExecError::Sync(other).into()),
        }
    }

    let mut resp = make_response();
    resp["clock"] = json!(root.view().current_clock_string());
    Ok(Some(resp))
}

pub(super) fn register(reg: &mut CommandRegistry) {
    reg.register(CommandDef {
        name: "clock",
        handler: cmd_clock,
        flags: CommandFlags::DAEMON | CommandFlags::ALLOW_ANY_USER,
        validator: Some(validate_root_arg),
    });
}
