//! `debug-ageout`: force an age-out sweep on a root.

use std::time::Duration;

use serde_json::{Value, json};

use crate::daemon::ipc::make_response;
use crate::daemon::registry::{CommandDef, CommandFlags, CommandRegistry};
use crate::daemon::{CommandCtx, CommandError};
use crate::view::QueryableView;

use super::{resolve_root, validate_root_arg};

/* debug-ageout /root min-age-seconds */
fn cmd_debug_ageout(
    ctx: &mut CommandCtx<'_>,
    args: &[Value],
) -> Result<Option<Value>, CommandError> {
    let root = resolve_root(ctx, args)?;
    let secs = args
        .get(2)
        .and_then(Value::as_u64)
        .ok_or_else(|| CommandError::validation("expected a non-negative number of seconds"))?;

    root.view().age_out(Duration::from_secs(secs));

    let mut resp = make_response();
    resp["ageout"] = json!(true);
    resp["last_age_out_tick"] = json!(root.view().last_age_out_tick());
    Ok(Some(resp))
}

pub(super) fn register(reg: &mut CommandRegistry) {
    reg.register(CommandDef {
        name: "debug-ageout",
        handler: cmd_debug_ageout,
        flags: CommandFlags::DAEMON,
        validator: Some(validate_root_arg),
    });
}
