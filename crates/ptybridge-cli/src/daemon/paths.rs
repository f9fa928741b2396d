//! Runtime file path resolution.
//!
//! Priority for the runtime directory:
//! 1. `PTYBRIDGE_RUNTIME_DIR` (explicit override)
//! 2. `XDG_RUNTIME_DIR/ptybridge` (Linux standard)
//! 3. `~/.ptybridge` (home directory fallback)
//! 4. `/tmp/ptybridge` (last resort)
//!
//! Several bridges can run side by side under different session names,
//! selected with `--session` or the `PTYBRIDGE_SESSION` env var (default:
//! "default"). Each session gets its own files:
//! `{runtime_dir}/{session}.ports`, `.pid` and `.log`.

use std::env;
use std::path::PathBuf;

/// Get current session name from env or default.
pub fn get_session() -> String {
    env::var("PTYBRIDGE_SESSION").unwrap_or_else(|_| "default".to_string())
}

/// Get runtime directory with priority fallback.
///
/// Priority:
/// 1. `PTYBRIDGE_RUNTIME_DIR` (explicit override, ignores empty string)
/// 2. `XDG_RUNTIME_DIR/ptybridge` (Linux standard, ignores empty string)
/// 3. `~/.ptybridge` (home directory fallback)
/// 4. System temp dir (last resort)
pub fn get_runtime_dir() -> PathBuf {
    if let Ok(dir) = env::var("PTYBRIDGE_RUNTIME_DIR") {
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
    }

    if let Ok(runtime_dir) = env::var("XDG_RUNTIME_DIR") {
        if !runtime_dir.is_empty() {
            return PathBuf::from(runtime_dir).join("ptybridge");
        }
    }

    if let Some(home) = dirs::home_dir() {
        return home.join(".ptybridge");
    }

    env::temp_dir().join("ptybridge")
}

/// Validate a session name to prevent path traversal attacks.
///
/// Session names must be non-empty, contain only alphanumeric characters,
/// hyphens and underscores, and not start with a hyphen.
///
/// Returns the name unchanged or a safe default if invalid.
pub(crate) fn sanitize_session_name(name: &str) -> String {
    let is_valid = !name.is_empty()
        && !name.starts_with('-')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');

    if is_valid {
        name.to_string()
    } else {
        tracing::warn!(
            "Invalid session name '{}', using 'default'. Names must contain only alphanumeric, hyphen, underscore.",
            name
        );
        "default".to_string()
    }
}

/// Resolve a session name, falling back to `get_session()`, and sanitize it.
pub fn resolve_session(session: Option<&str>) -> String {
    let sess = session.map(String::from).unwrap_or_else(get_session);
    sanitize_session_name(&sess)
}

fn session_file(session: Option<&str>, extension: &str) -> PathBuf {
    get_runtime_dir().join(format!("{}.{}", resolve_session(session), extension))
}

/// Path of the file listing a session's peer devices.
pub fn get_ports_path(session: Option<&str>) -> PathBuf {
    session_file(session, "ports")
}

/// Path of a session's PID file.
pub fn get_pid_path(session: Option<&str>) -> PathBuf {
    session_file(session, "pid")
}

/// Path of a detached session's log file.
pub fn get_log_path(session: Option<&str>) -> PathBuf {
    session_file(session, "log")
}

/// Ensure runtime directory exists with secure permissions (0700 on Unix).
pub fn ensure_runtime_dir() -> std::io::Result<()> {
    let dir = get_runtime_dir();
    std::fs::create_dir_all(&dir)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o700))?;
    }

    Ok(())
}
