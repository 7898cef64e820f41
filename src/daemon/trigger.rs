//! Triggers: stored queries that spawn a command when matching changes
//! settle.
//!
//! Each trigger runs on its own thread, subscribed to the root's unilateral
//! publisher. On settle it re-runs its query since the last position and, if
//! anything matched, spawns at most one child process, feeding it the
//! matched names over stdin and/or argv.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam::channel::{Receiver, Sender, bounded};
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use serde_json::Value;
use thiserror::Error;

use crate::clock::ClockSpec;
use crate::daemon::DaemonContext;
use crate::daemon::publisher::Subscription;
use crate::daemon::root::Root;
use crate::query::{
    Query, QueryParseError, QueryResult, TermRegistry, execute, parse_field_list, parse_query,
};
use crate::view::QueryableView;

#[derive(Error, Debug)]
pub enum TriggerError {
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    QueryParse(#[from] QueryParseError),
}

fn validation(msg: impl Into<String>) -> TriggerError {
    TriggerError::Validation(msg.into())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StdinStyle {
    DevNull,
    JsonArray,
    NamePerLine,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Redirect {
    path: String,
    append: bool,
}

struct TriggerState {
    query: Query,
    env: BTreeMap<String, String>,
    current_proc: Option<Child>,
}

pub struct TriggerCommand {
    pub definition: Value,
    pub name: String,
    command: Vec<String>,
    append_files: bool,
    stdin_style: StdinStyle,
    max_files_stdin: usize,
    stdout_redirect: Option<Redirect>,
    stderr_redirect: Option<Redirect>,
    context: Arc<DaemonContext>,
    state: Mutex<TriggerState>,
    stop_flag: AtomicBool,
    stop_tx: Mutex<Option<Sender<()>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl TriggerCommand {
    pub fn parse(
        root: &Arc<Root>,
        terms: &TermRegistry,
        definition: Value,
    ) -> Result<TriggerCommand, TriggerError> {
        let obj = definition
            .as_object()
            .ok_or_else(|| validation("trigger definition must be an object"))?;

        let mut query_def = serde_json::Map::new();
        if let Some(expr) = obj.get("expression") {
            query_def.insert("expression".to_string(), expr.clone());
        }
        if let Some(rel) = obj.get("relative_root") {
            query_def.insert("relative_root".to_string(), rel.clone());
        }
        let mut query = parse_query(
            terms,
            &Value::Object(query_def),
            root.default_sync_timeout(),
        )?;

        let name = obj
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| validation("invalid or missing name"))?
            .to_string();

        let command = match obj.get("command") {
            Some(Value::Array(arr)) if !arr.is_empty() => arr
                .iter()
                .map(|v| {
                    v.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| validation("invalid command array"))
                })
                .collect::<Result<Vec<_>, _>>()?,
            _ => return Err(validation("invalid command array")),
        };

        let append_files = obj
            .get("append_files")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if append_files {
            // Appending needs the plain name list regardless of the stdin
            // field selection; the dedup bookkeeping captures it.
            query.dedup_results = true;
        }

        let stdin_style = match obj.get("stdin") {
            None => StdinStyle::DevNull,
            Some(Value::Array(_)) => {
                query.field_list = parse_field_list(obj.get("stdin").unwrap_or(&Value::Null))?;
                StdinStyle::JsonArray
            }
            Some(Value::String(s)) if s == "/dev/null" => StdinStyle::DevNull,
            Some(Value::String(s)) if s == "NAME_PER_LINE" => {
                query.field_list = vec!["name".to_string()];
                StdinStyle::NamePerLine
            }
            Some(Value::String(s)) => {
                return Err(validation(format!("invalid stdin value {s}")));
            }
            Some(_) => return Err(validation("invalid value for stdin")),
        };

        let max_files_stdin = match obj.get("max_files_stdin") {
            None => 0,
            Some(v) => {
                let n = v
                    .as_i64()
                    .ok_or_else(|| validation("max_files_stdin must be >= 0"))?;
                if n < 0 {
                    return Err(validation("max_files_stdin must be >= 0"));
                }
                n as usize
            }
        };

        let stdout_redirect = parse_redirection(obj, "stdout")?;
        let stderr_redirect = parse_redirection(obj, "stderr")?;

        let context = Arc::clone(root.context());
        // The child env is the daemon's, plus the standard trigger vars.
        let mut env: BTreeMap<String, String> = std::env::vars().collect();
        env.insert(
            "WATCHMAN_ROOT".to_string(),
            root.path().to_string_lossy().into_owned(),
        );
        env.insert(
            "WATCHMAN_SOCK".to_string(),
            context.sock_path.to_string_lossy().into_owned(),
        );
        env.insert("WATCHMAN_TRIGGER".to_string(), name.clone());

        Ok(TriggerCommand {
            definition,
            name,
            command,
            append_files,
            stdin_style,
            max_files_stdin,
            stdout_redirect,
            stderr_redirect,
            context,
            state: Mutex::new(TriggerState {
                query,
                env,
                current_proc: None,
            }),
            stop_flag: AtomicBool::new(false),
            stop_tx: Mutex::new(None),
            thread: Mutex::new(None),
        })
    }

    /// Subscribe to the root's publisher and start the trigger thread.
    pub fn start(self: &Arc<Self>, root: &Arc<Root>) -> Result<(), TriggerError> {
        let subscription = root
            .publisher()
            .subscribe()
            .map_err(|err| validation(err.to_string()))?;
        let (stop_tx, stop_rx) = bounded(1);
        *self.stop_tx.lock().expect("trigger lock") = Some(stop_tx);

        let this = Arc::clone(self);
        let root = Arc::clone(root);
        let thread = std::thread::Builder::new()
            .name(format!("trigger {}", self.name))
            .spawn(move || this.run(&root, subscription, stop_rx))
            .map_err(|err| validation(format!("failed to spawn trigger thread: {err}")))?;
        *self.thread.lock().expect("trigger lock") = Some(thread);
        Ok(())
    }

    fn run(&self, root: &Arc<Root>, subscription: Subscription, stop_rx: Receiver<()>) {
        tracing::debug!(trigger = %self.name, root = %root.path().display(), "waiting for settle");

        loop {
            if self.stopping() {
                break;
            }
            crossbeam::select! {
                recv(stop_rx) -> _ => break,

                recv(subscription.receiver()) -> msg => {
                    let Ok(first) = msg else { break };
                    subscription.acknowledge(&first);
                    if self.stopping() {
                        break;
                    }
                    let mut items = vec![first];
                    items.extend(subscription.drain_pending());
                    let seen_settle = items.iter().any(|item| item.get("settled").is_some());
                    if seen_settle && self.maybe_spawn(root) {
                        self.wait_no_intr();
                    }
                }

                // Long poll; also reaps a finished child.
                default(Duration::from_secs(86400)) => {
                    self.wait_no_intr();
                }
            }
        }

        let mut state = self.state.lock().expect("trigger lock");
        if let Some(mut child) = state.current_proc.take() {
            kill_and_wait(&mut child);
        }
        tracing::debug!(trigger = %self.name, "out of loop");
    }

    /// Re-run the stored query; spawn when it produced results. Returns
    /// whether a command ran.
    pub fn maybe_spawn(&self, root: &Arc<Root>) -> bool {
        // Defer while a VCS operation is rewriting the tree.
        if root.view().is_vcs_operation_in_progress() {
            tracing::debug!("deferring triggers until VCS operations complete");
            return false;
        }

        let mut state = self.state.lock().expect("trigger lock");
        let state = &mut *state;

        // Triggers never sync: settle points are already synchronized.
        state.query.sync_timeout = Duration::ZERO;
        tracing::debug!(trigger = %self.name, "assessing trigger");

        let mut res = match execute(&state.query, root) {
            Ok(res) => res,
            Err(err) => {
                tracing::error!(trigger = %self.name, "error running trigger query: {err}");
                return false;
            }
        };
        tracing::debug!(
            trigger = %self.name,
            results = res.results.len(),
            "trigger query generated results"
        );

        // The clock we just sampled is the since of the next run.
        let prior = state
            .query
            .since_spec
            .replace(ClockSpec::Clock(res.clock_at_start_of_query));

        if res.results.is_empty() {
            return false;
        }
        self.spawn_command(root, state, &mut res, prior.as_ref());
        true
    }

    fn spawn_command(
        &self,
        root: &Arc<Root>,
        state: &mut TriggerState,
        res: &mut QueryResult,
        prior: Option<&ClockSpec>,
    ) {
        // Allow some misc working overhead below the argv budget.
        let mut argspace = ARG_MAX.saturating_sub(32);

        // Record the overflow before prepare_stdin truncates the results.
        let mut file_overflow =
            self.max_files_stdin > 0 && res.results.len() > self.max_files_stdin;

        let stdin_file = match self.prepare_stdin(res) {
            Ok(file) => file,
            Err(err) => {
                tracing::error!(
                    "trigger {}:{} {err}",
                    root.path().display(),
                    self.name
                );
                return;
            }
        };

        // Only an absolute clock can be replayed; relative specs are not
        // meaningful as WATCHMAN_SINCE.
        if let Some(ClockSpec::Clock(pos)) = prior {
            state
                .env
                .insert("WATCHMAN_SINCE".to_string(), pos.to_clock_string());
        } else {
            state.env.remove("WATCHMAN_SINCE");
        }
        state.env.insert(
            "WATCHMAN_CLOCK".to_string(),
            res.clock_at_start_of_query.to_clock_string(),
        );
        if let Some(rel) = &state.query.relative_root {
            state
                .env
                .insert("WATCHMAN_RELATIVE_ROOT".to_string(), rel.clone());
        } else {
            state.env.remove("WATCHMAN_RELATIVE_ROOT");
        }

        let mut args = self.command.clone();
        if self.append_files {
            let (appended, exhausted) = append_within_argspace(
                &mut argspace,
                &args,
                &state.env,
                &res.deduped_file_names,
            );
            args.extend(appended);
            file_overflow = file_overflow || exhausted;
        }
        state.env.insert(
            "WATCHMAN_FILES_OVERFLOW".to_string(),
            if file_overflow { "true" } else { "false" }.to_string(),
        );

        let working_dir = self.working_dir(root, state);
        tracing::debug!("using {} for working dir", working_dir.display());

        let stdout = match open_redirect(self.stdout_redirect.as_ref()) {
            Ok(stdio) => stdio,
            Err(err) => {
                tracing::error!("trigger {}: unable to open stdout: {err}", self.name);
                return;
            }
        };
        let stderr = match open_redirect(self.stderr_redirect.as_ref()) {
            Ok(stdio) => stdio,
            Err(err) => {
                tracing::error!("trigger {}: unable to open stderr: {err}", self.name);
                return;
            }
        };

        let mut cmd = Command::new(&args[0]);
        cmd.args(&args[1..])
            .env_clear()
            .envs(&state.env)
            .stdin(Stdio::from(stdin_file))
            .stdout(stdout)
            .stderr(stderr)
            .current_dir(&working_dir)
            // Fresh process group so the whole job can be signaled as a unit.
            .process_group(0);

        if let Some(mut prev) = state.current_proc.take() {
            kill_and_wait(&mut prev);
        }
        match cmd.spawn() {
            Ok(child) => {
                tracing::debug!("spawned trigger {}: pid {}", self.name, child.id());
                state.current_proc = Some(child);
            }
            Err(err) => {
                tracing::error!(
                    "trigger {}:{} failed: {err}",
                    root.path().display(),
                    self.name
                );
            }
        }
    }

    fn working_dir(&self, root: &Arc<Root>, state: &TriggerState) -> std::path::PathBuf {
        let mut dir = match &state.query.relative_root {
            Some(rel) => {
                let p = Path::new(rel);
                if p.is_absolute() {
                    p.to_path_buf()
                } else {
                    root.path().join(rel)
                }
            }
            None => root.path().to_path_buf(),
        };
        if let Some(chdir) = self.definition.get("chdir").and_then(Value::as_str) {
            let target = Path::new(chdir);
            dir = if target.is_absolute() {
                target.to_path_buf()
            } else {
                dir.join(target)
            };
        }
        dir
    }

    /// Build the child's stdin: /dev/null, or an unlinked spool file holding
    /// the (possibly truncated) results.
    fn prepare_stdin(&self, res: &mut QueryResult) -> std::io::Result<File> {
        if self.stdin_style == StdinStyle::DevNull {
            return File::open("/dev/null");
        }

        if self.max_files_stdin > 0 {
            let keep = res.results.len().min(self.max_files_stdin);
            res.results.truncate(keep);
        }

        // Created unlinked: the descriptor is the only reference, so the
        // spool is reclaimed on every exit path including a crash.
        let mut file = tempfile::tempfile_in(&self.context.temp_dir)?;
        match self.stdin_style {
            StdinStyle::JsonArray => {
                serde_json::to_writer(&mut file, &res.results).map_err(std::io::Error::other)?;
            }
            StdinStyle::NamePerLine => {
                for value in &res.results {
                    if let Some(name) = value.as_str() {
                        file.write_all(name.as_bytes())?;
                        file.write_all(b"\n")?;
                    }
                }
            }
            StdinStyle::DevNull => unreachable!(),
        }
        file.seek(SeekFrom::Start(0))?;
        Ok(file)
    }

    /// Reap the child if it finished; never blocks.
    fn wait_no_intr(&self) -> bool {
        if self.stopping() {
            return false;
        }
        let mut state = self.state.lock().expect("trigger lock");
        if let Some(child) = state.current_proc.as_mut()
            && matches!(child.try_wait(), Ok(Some(_)))
        {
            state.current_proc = None;
            return true;
        }
        false
    }

    fn stopping(&self) -> bool {
        self.stop_flag.load(Ordering::Acquire)
    }

    /// Stop the trigger thread and join it. Must be called before drop.
    pub fn stop(&self) {
        self.stop_flag.store(true, Ordering::Release);
        if let Some(tx) = self.stop_tx.lock().expect("trigger lock").take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.lock().expect("trigger lock").take() {
            let _ = thread.join();
        }
    }

    #[cfg(test)]
    fn has_live_child(&self) -> bool {
        self.state
            .lock()
            .expect("trigger lock")
            .current_proc
            .is_some()
    }
}

impl Drop for TriggerCommand {
    fn drop(&mut self) {
        let running = self.thread.lock().expect("trigger lock").is_some();
        if running && !self.stopping() {
            panic!("destroying trigger {} without stopping it first", self.name);
        }
    }
}

fn parse_redirection(
    obj: &serde_json::Map<String, Value>,
    label: &str,
) -> Result<Option<Redirect>, TriggerError> {
    let Some(value) = obj.get(label) else {
        // Specifying a redirection is optional.
        return Ok(None);
    };
    let Some(s) = value.as_str() else {
        return Err(validation(format!("{label} must be a string")));
    };
    if !s.starts_with('>') {
        return Err(validation(format!(
            "{label}: must be prefixed with either > or >>, got {s}"
        )));
    }
    let (append, path) = match s.strip_prefix(">>") {
        Some(rest) => {
            if cfg!(windows) {
                return Err(validation(format!(
                    "{label}: this platform does not support append mode"
                )));
            }
            (true, rest)
        }
        None => (false, &s[1..]),
    };
    if path.is_empty() {
        return Err(validation(format!("{label}: missing redirection path")));
    }
    Ok(Some(Redirect {
        path: path.to_string(),
        append,
    }))
}

fn open_redirect(redirect: Option<&Redirect>) -> std::io::Result<Stdio> {
    match redirect {
        None => Ok(Stdio::inherit()),
        Some(r) => {
            let mut opts = OpenOptions::new();
            opts.create(true).write(true).mode(0o666);
            if r.append {
                opts.append(true);
            } else {
                opts.truncate(true);
            }
            Ok(Stdio::from(opts.open(&r.path)?))
        }
    }
}

// The smallest argv+env budget among the platforms we run on; staying under
// this floor is safe even where the kernel would allow more.
const ARG_MAX: usize = 128 * 1024;

/// Append as many deduped names as fit in the remaining argv budget.
/// Each element costs its bytes, a NUL, and a pointer slot; the environment
/// is charged up front. Returns the appended names and whether the budget
/// ran out early.
fn append_within_argspace(
    argspace: &mut usize,
    base_args: &[String],
    env: &BTreeMap<String, String>,
    names: &[String],
) -> (Vec<String>, bool) {
    let ptr = std::mem::size_of::<usize>();
    for arg in base_args {
        *argspace = argspace.saturating_sub(arg.len() + 1 + ptr);
    }
    for (key, value) in env {
        *argspace = argspace.saturating_sub(key.len() + 1 + value.len() + 1 + ptr);
    }

    let mut appended = Vec::new();
    let mut exhausted = false;
    for name in names {
        let size = name.len() + 1 + ptr;
        if *argspace < size {
            exhausted = true;
            break;
        }
        *argspace -= size;
        appended.push(name.clone());
    }
    (appended, exhausted)
}

fn kill_and_wait(child: &mut Child) {
    let pgid = Pid::from_raw(child.id() as i32);
    if killpg(pgid, Signal::SIGTERM).is_err() {
        let _ = child.kill();
    }
    let _ = child.wait();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::root::tests_support::fake_root;
    use serde_json::json;

    fn terms() -> TermRegistry {
        TermRegistry::with_default_terms()
    }

    fn trigger(root: &Arc<Root>, def: Value) -> Result<TriggerCommand, TriggerError> {
        TriggerCommand::parse(root, &terms(), def)
    }

    #[test]
    fn parse_requires_name_and_command() {
        let handle = fake_root();
        assert!(trigger(&handle.root, json!({"command": ["true"]})).is_err());
        assert!(trigger(&handle.root, json!({"name": "t", "command": []})).is_err());
        assert!(trigger(&handle.root, json!({"name": "t", "command": ["true", 3]})).is_err());
        assert!(trigger(&handle.root, json!({"name": "t", "command": ["true"]})).is_ok());
        handle.root.stop();
    }

    #[test]
    fn parse_stdin_styles() {
        let handle = fake_root();
        let t = trigger(&handle.root, json!({"name": "t", "command": ["true"]})).unwrap();
        assert_eq!(t.stdin_style, StdinStyle::DevNull);

        let t = trigger(
            &handle.root,
            json!({"name": "t", "command": ["true"], "stdin": "/dev/null"}),
        )
        .unwrap();
        assert_eq!(t.stdin_style, StdinStyle::DevNull);

        let t = trigger(
            &handle.root,
            json!({"name": "t", "command": ["true"], "stdin": "NAME_PER_LINE"}),
        )
        .unwrap();
        assert_eq!(t.stdin_style, StdinStyle::NamePerLine);
        assert_eq!(t.state.lock().unwrap().query.field_list, vec!["name"]);

        let t = trigger(
            &handle.root,
            json!({"name": "t", "command": ["true"], "stdin": ["name", "size"]}),
        )
        .unwrap();
        assert_eq!(t.stdin_style, StdinStyle::JsonArray);
        assert_eq!(
            t.state.lock().unwrap().query.field_list,
            vec!["name", "size"]
        );

        assert!(
            trigger(
                &handle.root,
                json!({"name": "t", "command": ["true"], "stdin": "SOMETHING"}),
            )
            .is_err()
        );
        assert!(
            trigger(
                &handle.root,
                json!({"name": "t", "command": ["true"], "stdin": 7}),
            )
            .is_err()
        );
        handle.root.stop();
    }

    #[test]
    fn parse_redirections() {
        let handle = fake_root();
        let t = trigger(
            &handle.root,
            json!({"name": "t", "command": ["true"], "stdout": ">/tmp/out", "stderr": ">>/tmp/err"}),
        )
        .unwrap();
        assert_eq!(
            t.stdout_redirect,
            Some(Redirect {
                path: "/tmp/out".into(),
                append: false
            })
        );
        assert_eq!(
            t.stderr_redirect,
            Some(Redirect {
                path: "/tmp/err".into(),
                append: true
            })
        );

        assert!(
            trigger(
                &handle.root,
                json!({"name": "t", "command": ["true"], "stdout": "/tmp/out"}),
            )
            .is_err()
        );
        assert!(
            trigger(
                &handle.root,
                json!({"name": "t", "command": ["true"], "stdout": 9}),
            )
            .is_err()
        );
        handle.root.stop();
    }

    #[test]
    fn parse_max_files_stdin() {
        let handle = fake_root();
        assert!(
            trigger(
                &handle.root,
                json!({"name": "t", "command": ["true"], "max_files_stdin": -1}),
            )
            .is_err()
        );
        let t = trigger(
            &handle.root,
            json!({"name": "t", "command": ["true"], "max_files_stdin": 5}),
        )
        .unwrap();
        assert_eq!(t.max_files_stdin, 5);
        handle.root.stop();
    }

    #[test]
    fn append_files_forces_dedup() {
        let handle = fake_root();
        let t = trigger(
            &handle.root,
            json!({"name": "t", "command": ["true"], "append_files": true}),
        )
        .unwrap();
        assert!(t.state.lock().unwrap().query.dedup_results);
        handle.root.stop();
    }

    #[test]
    fn argspace_accounting() {
        let env: BTreeMap<String, String> =
            [("K".to_string(), "V".to_string())].into_iter().collect();
        let base = vec!["cmd".to_string()];
        let names = vec!["aaaa".to_string(), "bbbb".to_string(), "cccc".to_string()];
        let ptr = std::mem::size_of::<usize>();

        // Budget for exactly two names after the base arg and env.
        let base_cost = 3 + 1 + ptr;
        let env_cost = 1 + 1 + 1 + 1 + ptr;
        let name_cost = 4 + 1 + ptr;
        let mut argspace = base_cost + env_cost + 2 * name_cost;

        let (appended, exhausted) = append_within_argspace(&mut argspace, &base, &env, &names);
        assert_eq!(appended, vec!["aaaa".to_string(), "bbbb".to_string()]);
        assert!(exhausted);

        // A roomy budget takes everything.
        let mut argspace = 1 << 20;
        let (appended, exhausted) = append_within_argspace(&mut argspace, &base, &env, &names);
        assert_eq!(appended.len(), 3);
        assert!(!exhausted);
    }

    #[test]
    fn name_per_line_stdin_truncates() {
        let handle = fake_root();
        let t = trigger(
            &handle.root,
            json!({
                "name": "t",
                "command": ["true"],
                "stdin": "NAME_PER_LINE",
                "max_files_stdin": 2,
            }),
        )
        .unwrap();

        let mut res = QueryResult {
            results: vec![json!("a"), json!("b"), json!("c")],
            clock_at_start_of_query: crate::clock::ClockPosition::new(3, 0),
            deduped_file_names: vec![],
            is_fresh_instance: true,
        };
        let mut file = t.prepare_stdin(&mut res).unwrap();
        let mut contents = String::new();
        use std::io::Read;
        file.read_to_string(&mut contents).unwrap();
        assert_eq!(contents, "a\nb\n");
        handle.root.stop();
    }

    #[test]
    fn json_array_stdin_is_identity_json() {
        let handle = fake_root();
        let t = trigger(
            &handle.root,
            json!({"name": "t", "command": ["true"], "stdin": ["name", "size"]}),
        )
        .unwrap();

        let records = vec![json!({"name": "a", "size": 1}), json!({"name": "b", "size": 2})];
        let mut res = QueryResult {
            results: records.clone(),
            clock_at_start_of_query: crate::clock::ClockPosition::new(2, 0),
            deduped_file_names: vec![],
            is_fresh_instance: true,
        };
        let mut file = t.prepare_stdin(&mut res).unwrap();
        let parsed: Value = serde_json::from_reader(&mut file).unwrap();
        assert_eq!(parsed, Value::Array(records));
        handle.root.stop();
    }

    #[test]
    fn overflow_flag_and_replay_env() {
        let handle = fake_root();
        let out = handle.dir.join("env.probe");
        let script = format!(
            "printf '%s|%s|%s' \"$WATCHMAN_FILES_OVERFLOW\" \"$WATCHMAN_SINCE\" \"$WATCHMAN_CLOCK\" > {}",
            out.display()
        );
        let t = trigger(
            &handle.root,
            json!({
                "name": "probe",
                "command": ["sh", "-c", script],
                "stdin": "NAME_PER_LINE",
                "max_files_stdin": 1,
            }),
        )
        .unwrap();

        let run = |results: Vec<Value>, prior: Option<ClockSpec>| {
            let mut res = QueryResult {
                results,
                clock_at_start_of_query: crate::clock::ClockPosition::new(2, 0),
                deduped_file_names: vec![],
                is_fresh_instance: prior.is_none(),
            };
            let mut state = t.state.lock().unwrap();
            t.spawn_command(&handle.root, &mut state, &mut res, prior.as_ref());
            let mut child = state.current_proc.take().expect("spawned");
            drop(state);
            child.wait().unwrap();
            std::fs::read_to_string(&out).unwrap()
        };

        // Two results against max_files_stdin = 1: the child learns it saw
        // a truncated list. An absolute prior clock is replayable.
        let probe = run(
            vec![json!("a"), json!("b")],
            Some(ClockSpec::Clock(crate::clock::ClockPosition::new(5, 100))),
        );
        assert_eq!(probe, "true|c:100:5|c:0:2");

        // Within the limit and with a relative prior, the overflow flag is
        // false and WATCHMAN_SINCE must not be set.
        let probe = run(
            vec![json!("a")],
            Some(ClockSpec::Relative { seconds: 30 }),
        );
        assert_eq!(probe, "false||c:0:2");

        handle.root.stop();
    }

    #[test]
    fn respawn_kills_previous_child() {
        use crate::watcher::{ChangeMeta, PendingChange};

        let handle = fake_root();
        let inject = |name: &str| {
            handle.watcher.inject(vec![PendingChange {
                path: handle.dir.join(name),
                exists: true,
                meta: Some(ChangeMeta {
                    size: 1,
                    mode: 0o100644,
                    mtime: 0,
                    file_type: crate::query::FileType::Regular,
                }),
            }]);
            let deadline = std::time::Instant::now() + Duration::from_secs(5);
            while !handle.root.view().files_exist(&[name]) {
                assert!(std::time::Instant::now() < deadline);
                std::thread::sleep(Duration::from_millis(5));
            }
        };

        let t = trigger(
            &handle.root,
            json!({"name": "t", "expression": ["suffix", "c"], "command": ["sleep", "60"]}),
        )
        .unwrap();

        inject("a.c");
        assert!(t.maybe_spawn(&handle.root));
        assert!(t.has_live_child());
        let pid1 = t.state.lock().unwrap().current_proc.as_ref().unwrap().id();

        inject("b.c");
        assert!(t.maybe_spawn(&handle.root));
        assert!(t.has_live_child());
        let pid2 = t.state.lock().unwrap().current_proc.as_ref().unwrap().id();
        assert_ne!(pid1, pid2);

        // The previous child was killed and reaped before the new spawn.
        let probe = nix::sys::signal::kill(Pid::from_raw(pid1 as i32), None);
        assert!(probe.is_err());

        if let Some(mut child) = t.state.lock().unwrap().current_proc.take() {
            kill_and_wait(&mut child);
        }
        handle.root.stop();
    }

    #[test]
    fn stop_before_drop_is_required() {
        let handle = fake_root();
        let t = Arc::new(
            trigger(&handle.root, json!({"name": "t", "command": ["true"]})).unwrap(),
        );
        t.start(&handle.root).unwrap();
        t.stop();
        drop(t);
        handle.root.stop();
    }
}
