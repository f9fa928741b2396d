//! PTY pair allocation using portable-pty, and async controller handles.

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::path::{Path, PathBuf};

use portable_pty::{native_pty_system, MasterPty, PtySize, SlavePty};
use tokio::io::unix::AsyncFd;
use tracing::debug;

use crate::error::BridgeError;

/// One virtual serial line.
///
/// The master side stays with the bridge; the peer device at `peer_path` is
/// what client programs open. The pair keeps its own slave descriptor open so
/// that clients can come and go without the line hanging up.
pub struct PtyPair {
    master: Box<dyn MasterPty + Send>,
    _slave: Box<dyn SlavePty + Send>,
    peer_path: PathBuf,
}

impl PtyPair {
    /// Allocate a new PTY pair with its line discipline in raw mode.
    pub fn allocate() -> Result<Self, BridgeError> {
        let pair = native_pty_system()
            .openpty(PtySize::default())
            .map_err(BridgeError::allocation)?;

        let peer_path = pair.master.tty_name().ok_or_else(|| {
            BridgeError::ResourceExhaustion("allocated PTY has no peer device name".to_string())
        })?;

        let fd = pair.master.as_raw_fd().ok_or_else(|| {
            BridgeError::ResourceExhaustion("allocated PTY has no master descriptor".to_string())
        })?;

        // Termios is shared by both sides of the pair, so setting it through
        // the master applies to the peer device.
        set_raw_mode(fd).map_err(|e| {
            BridgeError::ResourceExhaustion(format!("failed to set raw mode on PTY: {}", e))
        })?;

        debug!("Allocated PTY with peer {:?}", peer_path);

        Ok(Self {
            master: pair.master,
            _slave: pair.slave,
            peer_path,
        })
    }

    /// Path of the device node client programs open.
    pub fn peer_path(&self) -> &Path {
        &self.peer_path
    }

    /// Create an async handle onto the master side for relaying.
    ///
    /// The handle owns a duplicate of the master descriptor; dropping it does
    /// not release the pair.
    pub fn controller(&self) -> Result<Controller, BridgeError> {
        let fd = self
            .master
            .as_raw_fd()
            .ok_or_else(|| BridgeError::InvalidHandle("PTY master has been closed".to_string()))?;
        let owned = dup_fd(fd).map_err(|e| {
            BridgeError::InvalidHandle(format!("failed to duplicate PTY master: {}", e))
        })?;
        Controller::from_fd(owned)
    }
}

/// What a controller refers to, used to reject relaying a device to itself.
///
/// Every descriptor onto one PTY master reports the same index, however it
/// was obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Identity {
    /// PTY master, named by its index.
    #[cfg_attr(not(target_os = "linux"), allow(dead_code))]
    PtyIndex(u32),
    /// Anything else, named by its inode.
    Inode { dev: u64, ino: u64 },
}

/// Non-blocking handle registered with the tokio reactor.
///
/// Reads and writes wait for readiness and then issue a single non-blocking
/// system call, so at most one chunk is in flight per call.
pub struct Controller {
    fd: AsyncFd<OwnedFd>,
    identity: Identity,
}

impl Controller {
    /// Wrap an already-open descriptor.
    ///
    /// Fails with `InvalidHandle` if the descriptor is closed or cannot be
    /// polled (regular files, for instance).
    pub fn from_fd(fd: OwnedFd) -> Result<Self, BridgeError> {
        let identity = identify(fd.as_raw_fd())?;
        set_nonblocking(fd.as_raw_fd())
            .map_err(|e| BridgeError::InvalidHandle(format!("failed to set non-blocking: {}", e)))?;
        let fd = AsyncFd::try_new(fd).map_err(|e| {
            let (_, cause) = e.into_parts();
            BridgeError::InvalidHandle(format!("descriptor cannot be polled: {}", cause))
        })?;
        Ok(Self { fd, identity })
    }

    /// Whether both handles refer to the same device.
    pub fn same_device(&self, other: &Controller) -> bool {
        self.identity == other.identity
    }

    /// Read up to `buf.len()` bytes, waiting until data is available.
    ///
    /// Returns `Ok(0)` at end of file.
    pub async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let mut guard = self.fd.readable().await?;
            match guard.try_io(|inner| read_fd(inner.as_raw_fd(), buf)) {
                Ok(result) => return result,
                Err(_would_block) => continue,
            }
        }
    }

    /// Write all of `buf`, looping over partial writes.
    pub async fn write_all(&self, mut buf: &[u8]) -> io::Result<()> {
        while !buf.is_empty() {
            let mut guard = self.fd.writable().await?;
            match guard.try_io(|inner| write_fd(inner.as_raw_fd(), buf)) {
                Ok(Ok(0)) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "device accepted no bytes",
                    ));
                }
                Ok(Ok(n)) => buf = &buf[n..],
                Ok(Err(e)) => return Err(e),
                Err(_would_block) => continue,
            }
        }
        Ok(())
    }
}

fn identify(fd: RawFd) -> Result<Identity, BridgeError> {
    // SAFETY: fstat only writes into the zeroed stat buffer we own. An invalid
    // fd is reported as EBADF rather than undefined behavior.
    let mut stat: libc::stat = unsafe { std::mem::zeroed() };
    if unsafe { libc::fstat(fd, &mut stat) } != 0 {
        return Err(BridgeError::InvalidHandle(format!(
            "descriptor {} is not open: {}",
            fd,
            io::Error::last_os_error()
        )));
    }

    #[cfg(target_os = "linux")]
    {
        let mut index: libc::c_uint = 0;
        // SAFETY: TIOCGPTN writes one unsigned int and fails with ENOTTY on
        // anything that is not a PTY master.
        if unsafe { libc::ioctl(fd, libc::TIOCGPTN, &mut index) } == 0 {
            return Ok(Identity::PtyIndex(index));
        }
    }

    #[allow(clippy::unnecessary_cast)]
    let identity = Identity::Inode {
        dev: stat.st_dev as u64,
        ino: stat.st_ino as u64,
    };
    Ok(identity)
}

fn set_raw_mode(fd: RawFd) -> io::Result<()> {
    // SAFETY: termios is a plain C struct; tcgetattr fills it before
    // cfmakeraw and tcsetattr read it.
    unsafe {
        let mut termios: libc::termios = std::mem::zeroed();
        if libc::tcgetattr(fd, &mut termios) != 0 {
            return Err(io::Error::last_os_error());
        }
        libc::cfmakeraw(&mut termios);
        if libc::tcsetattr(fd, libc::TCSANOW, &termios) != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    // SAFETY: F_GETFL/F_SETFL only read and update the descriptor's status flags.
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        if flags < 0 {
            return Err(io::Error::last_os_error());
        }
        if libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

fn dup_fd(fd: RawFd) -> io::Result<OwnedFd> {
    // SAFETY: F_DUPFD_CLOEXEC returns a new descriptor sharing the open file
    // description; ownership of it passes to the OwnedFd.
    let dup = unsafe { libc::fcntl(fd, libc::F_DUPFD_CLOEXEC, 0) };
    if dup < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(unsafe { OwnedFd::from_raw_fd(dup) })
}

fn read_fd(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        // SAFETY: reading into a valid buffer of the given length.
        let n = unsafe { libc::read(fd, buf.as_mut_ptr().cast::<libc::c_void>(), buf.len()) };
        if n >= 0 {
            return Ok(n as usize);
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

fn write_fd(fd: RawFd, buf: &[u8]) -> io::Result<usize> {
    loop {
        // SAFETY: writing from a valid buffer of the given length.
        let n = unsafe { libc::write(fd, buf.as_ptr().cast::<libc::c_void>(), buf.len()) };
        if n >= 0 {
            return Ok(n as usize);
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

/// Open a peer device the way a client program would.
#[cfg(test)]
pub(crate) fn open_peer(path: &Path) -> Controller {
    use std::os::unix::fs::OpenOptionsExt;

    let file = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(libc::O_NOCTTY)
        .open(path)
        .expect("Failed to open peer device");
    Controller::from_fd(OwnedFd::from(file)).expect("Failed to wrap peer device")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use ptybridge_core::config::RelayConfig;
    use ptybridge_core::error::ErrorKind;

    use crate::daemon::relay::Relay;

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[test]
    fn test_allocate_gives_distinct_peer_devices() {
        let first = PtyPair::allocate().expect("Failed to allocate first PTY");
        let second = PtyPair::allocate().expect("Failed to allocate second PTY");

        assert_ne!(first.peer_path(), second.peer_path());
        assert!(first.peer_path().is_absolute());
        assert!(first.peer_path().exists(), "peer device should be visible");
    }

    #[tokio::test]
    async fn test_peer_and_controller_talk_without_translation() {
        let pair = PtyPair::allocate().expect("allocate");
        let controller = pair.controller().expect("controller");
        let peer = open_peer(pair.peer_path());

        // Raw mode: no echo, no CR/LF mapping, control bytes pass through.
        let payload = b"line\r\n\x03\x04\x11\x13\0end";
        peer.write_all(payload).await.expect("write to peer");

        let mut received = Vec::new();
        let mut buf = [0u8; 64];
        tokio::time::timeout(TIMEOUT, async {
            while received.len() < payload.len() {
                let n = controller.read(&mut buf).await.expect("read controller");
                received.extend_from_slice(&buf[..n]);
            }
        })
        .await
        .expect("Timed out reading from controller");
        assert_eq!(received, payload);

        controller.write_all(b"back").await.expect("write controller");
        let mut buf = [0u8; 4];
        let n = tokio::time::timeout(TIMEOUT, peer.read(&mut buf))
            .await
            .expect("Timed out reading from peer")
            .expect("read peer");
        assert_eq!(&buf[..n], &b"back"[..n]);
    }

    #[tokio::test]
    async fn test_controllers_of_same_pair_are_same_device() {
        let pair = PtyPair::allocate().expect("allocate");
        let other = PtyPair::allocate().expect("allocate");

        let first = pair.controller().expect("controller");
        let again = pair.controller().expect("controller");
        let distinct = other.controller().expect("controller");

        assert!(first.same_device(&again));
        assert!(!first.same_device(&distinct));
    }

    #[tokio::test]
    async fn test_any_descriptor_onto_a_master_is_same_device() {
        let pair = PtyPair::allocate().expect("allocate");
        let raw = pair.master.as_raw_fd().expect("master fd");

        let from_pair = pair.controller().expect("controller");
        let from_dup = Controller::from_fd(dup_fd(raw).expect("dup")).expect("wrap dup");
        assert!(from_pair.same_device(&from_dup));

        let err = match Relay::new(from_pair, from_dup, RelayConfig::default()) {
            Ok(_) => panic!("one master on both sides must be rejected"),
            Err(e) => e,
        };
        assert_eq!(err.kind(), ErrorKind::InvalidHandle);
    }

    #[tokio::test]
    async fn test_regular_file_is_rejected() {
        let path = std::env::temp_dir().join(format!("ptybridge-pty-test-{}", std::process::id()));
        let file = std::fs::File::create(&path).expect("create temp file");

        let err = match Controller::from_fd(OwnedFd::from(file)) {
            Ok(_) => panic!("regular files cannot be polled"),
            Err(e) => e,
        };
        assert_eq!(err.kind(), ErrorKind::InvalidHandle);

        let _ = std::fs::remove_file(&path);
    }
}
