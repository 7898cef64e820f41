//! CLI surface.
//!
//! `watchman daemon run` starts the service; everything else is a one-shot
//! client that sends a command array over the socket and prints the reply.

use std::ffi::OsString;
use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};
use serde_json::{Value, json};

use crate::daemon::ipc;
use crate::{Error, Result};

#[derive(Parser, Debug)]
#[command(
    name = "watchman",
    version,
    about = "File watching service",
    arg_required_else_help = true
)]
pub struct Cli {
    /// Debug output (repeat for more).
    #[arg(short = 'v', long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Daemon lifecycle.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommands,
    },

    /// Watch a directory tree.
    Watch { path: PathBuf },

    /// List watched roots.
    WatchList,

    /// Stop watching a root.
    WatchDel { path: PathBuf },

    /// Print the root's current clock.
    Clock {
        root: PathBuf,
        /// Cookie-sync before sampling (milliseconds).
        #[arg(long)]
        sync_timeout: Option<u64>,
    },

    /// Run a query; the spec is a JSON object.
    Query { root: PathBuf, spec: String },

    /// Find files matching wildcard patterns.
    Find {
        root: PathBuf,
        patterns: Vec<String>,
    },

    /// Assert a named state on a root.
    StateEnter { root: PathBuf, name: String },

    /// Vacate a named state.
    StateLeave { root: PathBuf, name: String },

    /// Define a trigger; the definition is a JSON object.
    Trigger { root: PathBuf, definition: String },

    /// Delete a trigger.
    TriggerDel { root: PathBuf, name: String },

    /// List triggers on a root.
    TriggerList { root: PathBuf },

    /// Report the server version and capabilities.
    Version,

    /// List every capability the server advertises.
    ListCapabilities,

    /// Ask the server to shut down.
    ShutdownServer,
}

#[derive(Subcommand, Debug)]
pub enum DaemonCommands {
    /// Run the daemon in the foreground.
    Run,
}

pub fn parse_from<I, T>(args: I) -> Cli
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    Cli::parse_from(args)
}

pub fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Daemon {
            command: DaemonCommands::Run,
        } => {
            let config = crate::config::load_or_default();
            crate::daemon::run::run_daemon(config)
        }
        other => {
            let args = command_args(other)?;
            let response = ipc::send_command(&args)?;
            let rendered =
                serde_json::to_string_pretty(&response).map_err(ipc::IpcError::from)?;
            println!("{rendered}");
            match response.get("error").and_then(Value::as_str) {
                Some(message) => Err(Error::Server(message.to_string())),
                None => Ok(()),
            }
        }
    }
}

fn command_args(command: Commands) -> Result<Vec<Value>> {
    let args = match command {
        Commands::Daemon { .. } => unreachable!("handled by run"),
        Commands::Watch { path } => vec![json!("watch"), path_arg(&path)],
        Commands::WatchList => vec![json!("watch-list")],
        Commands::WatchDel { path } => vec![json!("watch-del"), path_arg(&path)],
        Commands::Clock { root, sync_timeout } => {
            let mut args = vec![json!("clock"), path_arg(&root)];
            if let Some(ms) = sync_timeout {
                args.push(json!({"sync_timeout": ms}));
            }
            args
        }
        Commands::Query { root, spec } => {
            let spec: Value = serde_json::from_str(&spec).map_err(ipc::IpcError::from)?;
            vec![json!("query"), path_arg(&root), spec]
        }
        Commands::Find { root, patterns } => {
            let mut args = vec![json!("find"), path_arg(&root)];
            args.extend(patterns.into_iter().map(Value::String));
            args
        }
        Commands::StateEnter { root, name } => {
            vec![json!("state-enter"), path_arg(&root), json!(name)]
        }
        Commands::StateLeave { root, name } => {
            vec![json!("state-leave"), path_arg(&root), json!(name)]
        }
        Commands::Trigger { root, definition } => {
            let definition: Value =
                serde_json::from_str(&definition).map_err(ipc::IpcError::from)?;
            vec![json!("trigger"), path_arg(&root), definition]
        }
        Commands::TriggerDel { root, name } => {
            vec![json!("trigger-del"), path_arg(&root), json!(name)]
        }
        Commands::TriggerList { root } => vec![json!("trigger-list"), path_arg(&root)],
        Commands::Version => vec![json!("version")],
        Commands::ListCapabilities => vec![json!("list-capabilities")],
        Commands::ShutdownServer => vec![json!("shutdown-server")],
    };
    Ok(args)
}

fn path_arg(path: &std::path::Path) -> Value {
    let resolved = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    json!(resolved.to_string_lossy())
}
