//! Command dispatch registry and capability set.

use std::collections::{BTreeSet, HashMap};
use std::ops::BitOr;

use serde_json::Value;

use super::{CommandCtx, CommandError};

/// Gating flags for command dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandFlags(u8);

impl CommandFlags {
    /// Served by the long-lived daemon.
    pub const DAEMON: CommandFlags = CommandFlags(1);
    /// May run inline in a client process with no daemon.
    pub const CLIENT: CommandFlags = CommandFlags(2);
    /// Still dispatched when the daemon has flagged itself poisoned.
    pub const POISON_IMMUNE: CommandFlags = CommandFlags(4);
    /// Exempt from the same-user check on the socket.
    pub const ALLOW_ANY_USER: CommandFlags = CommandFlags(8);

    pub fn intersects(self, other: CommandFlags) -> bool {
        self.0 & other.0 != 0
    }

    pub fn contains(self, other: CommandFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for CommandFlags {
    type Output = CommandFlags;

    fn bitor(self, rhs: CommandFlags) -> CommandFlags {
        CommandFlags(self.0 | rhs.0)
    }
}

pub type CommandHandler =
    fn(&mut CommandCtx<'_>, &[Value]) -> Result<Option<Value>, CommandError>;

/// Pre-dispatch argument check; failures become synchronous error PDUs.
pub type CommandValidator = fn(&[Value]) -> Result<(), CommandError>;

pub struct CommandDef {
    pub name: &'static str,
    pub handler: CommandHandler,
    pub flags: CommandFlags,
    pub validator: Option<CommandValidator>,
}

/// Process-wide command table, built once at startup.
pub struct CommandRegistry {
    commands: HashMap<&'static str, CommandDef>,
    capabilities: BTreeSet<String>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self {
            commands: HashMap::new(),
            capabilities: BTreeSet::new(),
        }
    }

    /// Register a command. Registering the same name twice is a programmer
    /// error and aborts the process.
    pub fn register(&mut self, def: CommandDef) {
        let name = def.name;
        if self.commands.insert(name, def).is_some() {
            panic!("duplicate registration of command '{name}'");
        }
        self.capability_register(format!("cmd-{name}"));
    }

    /// Find a command, but only if its flags intersect the dispatch mode.
    pub fn lookup(&self, name: &str, mode: CommandFlags) -> Option<&CommandDef> {
        self.commands
            .get(name)
            .filter(|def| def.flags.intersects(mode))
    }

    pub fn command_names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.commands.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Duplicate capability registration is tolerated.
    pub fn capability_register(&mut self, name: impl Into<String>) {
        self.capabilities.insert(name.into());
    }

    pub fn capability_supported(&self, name: &str) -> bool {
        self.capabilities.contains(name)
    }

    /// All capabilities, sorted.
    pub fn capability_get_list(&self) -> Vec<String> {
        self.capabilities.iter().cloned().collect()
    }
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new()
    }
}
