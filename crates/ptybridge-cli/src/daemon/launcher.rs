//! Starting, stopping and querying detached bridges.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use ptybridge_core::ports::{BridgeStatus, PortListing};
use tracing::{debug, info};

use crate::args::RelayArgs;
use crate::daemon::bridge::{is_bridge_alive, is_process_alive, read_pid};
use crate::daemon::paths;

/// Maximum time to wait for a detached bridge to announce its ports.
const STARTUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Maximum time to wait for a bridge to exit after SIGTERM.
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Interval between checks while waiting.
const RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// Start a bridge in the background and return its ports once announced.
pub fn start(args: &RelayArgs) -> Result<PortListing> {
    paths::ensure_runtime_dir().context("Failed to create runtime directory")?;

    let session = paths::resolve_session(args.session.as_deref());
    let pid_path = paths::get_pid_path(Some(&session));
    if is_bridge_alive(&pid_path) {
        bail!(
            "Bridge '{}' is already running (run 'ptybridge stop -s {}' first)",
            session,
            session
        );
    }

    let ports_path = ports_path(&session, args.ports_file.as_deref());
    // A leftover listing from a crashed bridge would look like a fresh one.
    if ports_path.exists() {
        std::fs::remove_file(&ports_path)
            .with_context(|| format!("Failed to remove stale port listing: {:?}", ports_path))?;
    }

    let child = spawn_detached(&session, args)?;
    info!("Started bridge '{}' (PID {})", session, child.id());

    wait_for_ports(&ports_path, child, STARTUP_TIMEOUT).with_context(|| {
        format!(
            "see {:?} for the bridge log",
            paths::get_log_path(Some(&session))
        )
    })
}

/// Re-execute this binary as `ptybridge run --detached` in a new session.
///
/// The child has no controlling terminal and its standard I/O goes to
/// /dev/null; it runs the same entry point as a foreground bridge.
fn spawn_detached(session: &str, args: &RelayArgs) -> Result<std::process::Child> {
    use std::os::unix::process::CommandExt;

    let exe = std::env::current_exe().context("Failed to get current executable path")?;

    let mut command = std::process::Command::new(exe);
    command
        .arg("run")
        .arg("--detached")
        .arg("--session")
        .arg(session)
        .arg("--chunk-size")
        .arg(args.chunk_size.to_string());
    if let Some(ports_file) = &args.ports_file {
        command.arg("--ports-file").arg(ports_file);
    }

    command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());

    // SAFETY: setsid is async-signal-safe and touches no memory of the
    // parent; it detaches the child from our session and terminal.
    unsafe {
        command.pre_exec(|| {
            if libc::setsid() < 0 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }

    command.spawn().context("Failed to spawn bridge process")
}

/// Wait for the port listing to appear.
///
/// Checks if the bridge process dies early to fail fast instead of waiting
/// for the full timeout.
fn wait_for_ports(
    ports_path: &Path,
    mut child: std::process::Child,
    timeout: Duration,
) -> Result<PortListing> {
    let start = Instant::now();

    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                bail!("Bridge exited immediately with status: {}", status);
            }
            Ok(None) => {}
            Err(e) => {
                debug!("Error checking bridge status: {}", e);
            }
        }

        if let Ok(text) = std::fs::read_to_string(ports_path) {
            let listing = PortListing::parse(&text)
                .with_context(|| format!("Malformed port listing in {:?}", ports_path))?;
            info!("Bridge ready after {:?}", start.elapsed());
            return Ok(listing);
        }

        if start.elapsed() > timeout {
            bail!("Bridge did not announce its ports within {:?}", timeout);
        }
        std::thread::sleep(RETRY_INTERVAL);
    }
}

/// Stop a detached bridge with SIGTERM and wait for it to exit.
pub fn stop(session: Option<&str>) -> Result<()> {
    let session = paths::resolve_session(session);
    let pid_path = paths::get_pid_path(Some(&session));

    let Some(pid) = read_pid(&pid_path) else {
        bail!("No bridge '{}' is running (no PID file at {:?})", session, pid_path);
    };

    if !is_process_alive(pid) {
        info!("Bridge '{}' is not running, removing stale PID file", session);
        std::fs::remove_file(&pid_path)
            .with_context(|| format!("Failed to remove stale PID file: {:?}", pid_path))?;
        return Ok(());
    }

    // SAFETY: plain kill(2) on a PID read from our own PID file.
    if unsafe { libc::kill(pid, libc::SIGTERM) } != 0 {
        return Err(std::io::Error::last_os_error())
            .with_context(|| format!("Failed to signal bridge (PID {})", pid));
    }

    // The bridge removes its PID file on the way out.
    let start = Instant::now();
    while pid_path.exists() && is_process_alive(pid) {
        if start.elapsed() > STOP_TIMEOUT {
            bail!("Bridge (PID {}) did not exit within {:?}", pid, STOP_TIMEOUT);
        }
        std::thread::sleep(RETRY_INTERVAL);
    }

    info!("Stopped bridge '{}' (PID {})", session, pid);
    Ok(())
}

/// Report the ports of a detached bridge.
pub fn status(session: Option<&str>, ports_file: Option<&Path>) -> Result<BridgeStatus> {
    let session = paths::resolve_session(session);
    let ports_path = ports_path(&session, ports_file);

    let text = std::fs::read_to_string(&ports_path).with_context(|| {
        format!(
            "No bridge '{}' has announced ports (cannot read {:?})",
            session, ports_path
        )
    })?;
    let ports = PortListing::parse(&text)
        .with_context(|| format!("Malformed port listing in {:?}", ports_path))?;

    let pid = read_pid(&paths::get_pid_path(Some(&session)));
    Ok(BridgeStatus {
        session,
        pid: pid.and_then(|p| u32::try_from(p).ok()),
        alive: pid.is_some_and(is_process_alive),
        ports,
    })
}

fn ports_path(session: &str, explicit: Option<&Path>) -> PathBuf {
    explicit
        .map(Path::to_path_buf)
        .unwrap_or_else(|| paths::get_ports_path(Some(session)))
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::daemon::paths::test_env::EnvGuard;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "ptybridge-launcher-{}-{}",
            name,
            std::process::id()
        ))
    }

    #[test]
    fn test_wait_for_ports_reads_listing() {
        let ports = temp_path("ready.ports");
        let child = std::process::Command::new("sleep")
            .arg("5")
            .spawn()
            .expect("spawn sleep");
        let pid = child.id() as i32;

        let writer = {
            let ports = ports.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(100));
                std::fs::write(&ports, "/dev/pts/1\n/dev/pts/2\n").unwrap();
            })
        };

        let listing = wait_for_ports(&ports, child, Duration::from_secs(5)).expect("listing");
        assert_eq!(listing, PortListing::new("/dev/pts/1", "/dev/pts/2"));

        writer.join().unwrap();
        // SAFETY: terminating the sleep we spawned.
        unsafe { libc::kill(pid, libc::SIGKILL) };
        let _ = std::fs::remove_file(&ports);
    }

    #[test]
    fn test_wait_for_ports_fails_fast_when_child_exits() {
        let ports = temp_path("crash.ports");
        let child = std::process::Command::new("false")
            .spawn()
            .expect("spawn false");

        let started = Instant::now();
        let err = wait_for_ports(&ports, child, Duration::from_secs(5)).unwrap_err();
        assert!(err.to_string().contains("exited immediately"));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn test_wait_for_ports_times_out() {
        let ports = temp_path("never.ports");
        let child = std::process::Command::new("sleep")
            .arg("5")
            .spawn()
            .expect("spawn sleep");
        let pid = child.id() as i32;

        let err = wait_for_ports(&ports, child, Duration::from_millis(200)).unwrap_err();
        assert!(err.to_string().contains("did not announce"));

        // SAFETY: terminating the sleep we spawned.
        unsafe { libc::kill(pid, libc::SIGKILL) };
    }

    #[test]
    fn test_status_and_stop_without_bridge() {
        let _guard = EnvGuard::new(&["PTYBRIDGE_RUNTIME_DIR", "PTYBRIDGE_SESSION"]);
        let dir = temp_path("runtime");
        std::fs::create_dir_all(&dir).unwrap();

        // SAFETY: We hold ENV_MUTEX via _guard
        unsafe {
            std::env::set_var("PTYBRIDGE_RUNTIME_DIR", &dir);
            std::env::remove_var("PTYBRIDGE_SESSION");
        }

        assert!(status(Some("absent"), None).is_err());
        assert!(stop(Some("absent")).is_err());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_status_reports_listing_and_pid() {
        let _guard = EnvGuard::new(&["PTYBRIDGE_RUNTIME_DIR", "PTYBRIDGE_SESSION"]);
        let dir = temp_path("status");
        std::fs::create_dir_all(&dir).unwrap();

        // SAFETY: We hold ENV_MUTEX via _guard
        unsafe {
            std::env::set_var("PTYBRIDGE_RUNTIME_DIR", &dir);
            std::env::remove_var("PTYBRIDGE_SESSION");
        }

        std::fs::write(dir.join("modem.ports"), "/dev/pts/3\n/dev/pts/4\n").unwrap();
        std::fs::write(dir.join("modem.pid"), std::process::id().to_string()).unwrap();

        let status = status(Some("modem"), None).expect("status");
        assert_eq!(status.session, "modem");
        assert_eq!(status.pid, Some(std::process::id()));
        assert!(status.alive);
        assert_eq!(status.ports, PortListing::new("/dev/pts/3", "/dev/pts/4"));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_stop_removes_stale_pid_file() {
        let _guard = EnvGuard::new(&["PTYBRIDGE_RUNTIME_DIR", "PTYBRIDGE_SESSION"]);
        let dir = temp_path("stop");
        std::fs::create_dir_all(&dir).unwrap();

        // SAFETY: We hold ENV_MUTEX via _guard
        unsafe {
            std::env::set_var("PTYBRIDGE_RUNTIME_DIR", &dir);
            std::env::remove_var("PTYBRIDGE_SESSION");
        }

        // A reaped child's PID is no longer alive.
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let dead_pid = child.id();
        child.wait().unwrap();
        std::fs::write(dir.join("old.pid"), dead_pid.to_string()).unwrap();

        stop(Some("old")).expect("stale PID file is not an error");
        assert!(!dir.join("old.pid").exists());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_stop_terminates_process() {
        let _guard = EnvGuard::new(&["PTYBRIDGE_RUNTIME_DIR", "PTYBRIDGE_SESSION"]);
        let dir = temp_path("kill");
        std::fs::create_dir_all(&dir).unwrap();

        // SAFETY: We hold ENV_MUTEX via _guard
        unsafe {
            std::env::set_var("PTYBRIDGE_RUNTIME_DIR", &dir);
            std::env::remove_var("PTYBRIDGE_SESSION");
        }

        let mut child = std::process::Command::new("sleep").arg("30").spawn().unwrap();
        std::fs::write(dir.join("victim.pid"), child.id().to_string()).unwrap();

        // Reap in the background so the PID disappears once signalled.
        let reaper = std::thread::spawn(move || child.wait());

        stop(Some("victim")).expect("stop");
        assert!(reaper.join().unwrap().is_ok());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_stop_returns_once_bridge_is_unreaped() {
        let _guard = EnvGuard::new(&["PTYBRIDGE_RUNTIME_DIR", "PTYBRIDGE_SESSION"]);
        let dir = temp_path("zombie");
        std::fs::create_dir_all(&dir).unwrap();

        // SAFETY: We hold ENV_MUTEX via _guard
        unsafe {
            std::env::set_var("PTYBRIDGE_RUNTIME_DIR", &dir);
            std::env::remove_var("PTYBRIDGE_SESSION");
        }

        // Nobody waits on this child until stop has returned.
        let mut child = std::process::Command::new("sleep").arg("30").spawn().unwrap();
        std::fs::write(dir.join("orphan.pid"), child.id().to_string()).unwrap();

        let started = Instant::now();
        stop(Some("orphan")).expect("exited bridge counts as stopped");
        assert!(started.elapsed() < STOP_TIMEOUT);

        child.wait().unwrap();
        let _ = std::fs::remove_dir_all(&dir);
    }
}
