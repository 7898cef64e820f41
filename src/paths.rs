//! Runtime and config directory helpers.

use std::path::PathBuf;

/// Candidate directories for the daemon socket, most preferred first.
fn runtime_dir_candidates() -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    if let Ok(dir) = std::env::var("XDG_RUNTIME_DIR")
        && !dir.trim().is_empty()
    {
        dirs.push(PathBuf::from(dir).join("watchman"));
    }
    if let Ok(home) = std::env::var("HOME")
        && !home.trim().is_empty()
    {
        dirs.push(PathBuf::from(home).join(".watchman"));
    }
    dirs.push(per_user_tmp_dir());
    dirs
}

pub(crate) fn per_user_tmp_dir() -> PathBuf {
    let uid = nix::unistd::geteuid();
    PathBuf::from("/tmp").join(format!("watchman-{}", uid))
}

/// The directory that will contain the daemon socket.
///
/// Uses `WATCHMAN_RUNTIME_DIR` if set, otherwise the first usable of
/// `$XDG_RUNTIME_DIR/watchman`, `~/.watchman`, `/tmp/watchman-<uid>`.
pub fn runtime_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("WATCHMAN_RUNTIME_DIR")
        && !dir.trim().is_empty()
    {
        return PathBuf::from(dir);
    }
    runtime_dir_candidates()
        .into_iter()
        .next()
        .unwrap_or_else(per_user_tmp_dir)
}

/// Directory for trigger stdin spool files.
pub fn temp_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("WATCHMAN_TMP_DIR")
        && !dir.trim().is_empty()
    {
        return PathBuf::from(dir);
    }
    std::env::temp_dir()
}

/// Base directory for configuration files.
///
/// Uses `WATCHMAN_CONFIG_DIR` if set, otherwise `$XDG_CONFIG_HOME/watchman`
/// or `~/.config/watchman`.
pub(crate) fn config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("WATCHMAN_CONFIG_DIR")
        && !dir.trim().is_empty()
    {
        return PathBuf::from(dir);
    }

    std::env::var("XDG_CONFIG_HOME")
        .ok()
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join(".config")
        })
        .join("watchman")
}
