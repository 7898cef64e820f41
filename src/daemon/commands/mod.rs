//! Command handlers and registry assembly.

mod clock;
mod debug;
mod query;
mod state;
mod subscribe;
mod trigger;
mod version;
mod watch;

use std::sync::Arc;

use serde_json::Value;

use crate::query::{KNOWN_FIELDS, TermRegistry};

use super::registry::CommandRegistry;
use super::root::Root;
use super::{CommandCtx, CommandError};

pub use state::vacate_states;

/// Build the process-wide command registry. Called once at daemon startup;
/// registration order is explicit here, so there is no init-order hazard.
pub fn build_registry(terms: &TermRegistry) -> CommandRegistry {
    let mut reg = CommandRegistry::new();
    watch::register(&mut reg);
    clock::register(&mut reg);
    query::register(&mut reg);
    state::register(&mut reg);
    trigger::register(&mut reg);
    subscribe::register(&mut reg);
    version::register(&mut reg);
    debug::register(&mut reg);

    for term in terms.term_names() {
        reg.capability_register(format!("term-{term}"));
    }
    for field in KNOWN_FIELDS {
        reg.capability_register(format!("field-{field}"));
    }
    reg.capability_register("relative_root");
    reg.capability_register("dedup_results");
    reg.capability_register("wildmatch");
    reg.capability_register("glob_generator");
    reg.capability_register("clock-sync-timeout");
    reg
}

/// Resolve `args[1]` to an established root.
pub(super) fn resolve_root(
    ctx: &CommandCtx<'_>,
    args: &[Value],
) -> Result<Arc<Root>, CommandError> {
    let path = args
        .get(1)
        .and_then(Value::as_str)
        .ok_or_else(|| CommandError::validation("missing root argument"))?;
    ctx.daemon.resolve_root(path)
}

/// Shared validator for commands shaped `[name, root, ...]`.
pub(super) fn validate_root_arg(args: &[Value]) -> Result<(), CommandError> {
    if args.len() < 2 || !args[1].is_string() {
        return Err(CommandError::validation(
            "wrong number of arguments: expected a root path",
        ));
    }
    Ok(())
}
