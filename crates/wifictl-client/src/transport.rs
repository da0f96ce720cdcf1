//! Control-socket transport.
//!
//! The supplicant serves its control protocol over per-interface datagram
//! sockets. A client endpoint binds its own local socket, connects to the
//! daemon's, and exchanges plain-text datagrams: commands get a direct
//! reply, while an attached endpoint additionally receives unsolicited
//! event datagrams. [`ControlSocket`]/[`ControlTransport`] capture that
//! surface so the session logic can run against a test double.

use std::fmt;
use std::fs;
use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixDatagram;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use thiserror::Error;

use crate::config::ClientConfig;
use crate::events::IFNAME_PREFIX;
use crate::supervisor::pid_alive;

/// Prefix for the client's own socket endpoints in the runtime directory.
const LOCAL_SOCKET_PREFIX: &str = "wifictl_";

static LOCAL_SOCKET_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Where the daemon's control endpoint for an interface lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlPath {
    /// Socket file under the supplicant's socket directory.
    Filesystem(PathBuf),
    /// Abstract-namespace name, used when the socket directory is absent.
    Abstract(String),
}

impl ControlPath {
    /// Resolve the control path for the configured interface: the socket
    /// directory when it exists, an abstract-namespace name otherwise.
    pub fn resolve(config: &ClientConfig) -> Self {
        if config.socket_dir.is_dir() {
            ControlPath::Filesystem(config.socket_dir.join(&config.interface))
        } else {
            ControlPath::Abstract(format!("wifictl/{}", config.interface))
        }
    }
}

impl fmt::Display for ControlPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlPath::Filesystem(path) => write!(f, "{}", path.display()),
            ControlPath::Abstract(name) => write!(f, "@{name}"),
        }
    }
}

/// Outcome classification for a single request, distinguishing the
/// transport's own reply timeout from I/O failure.
#[derive(Error, Debug)]
pub enum RequestError {
    #[error("timed out waiting for reply")]
    Timeout,

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl From<RequestError> for io::Error {
    fn from(err: RequestError) -> Self {
        match err {
            RequestError::Timeout => io::Error::new(io::ErrorKind::TimedOut, "reply timed out"),
            RequestError::Io(err) => err,
        }
    }
}

pub trait ControlSocket: Send {
    /// Send a command and block for its reply, skipping any unsolicited
    /// event datagrams that arrive in between.
    fn request(&mut self, cmd: &str, reply: &mut [u8]) -> Result<usize, RequestError>;

    /// Receive one datagram. Callers poll [`ControlSocket::wait_fd`] first,
    /// so this only blocks momentarily.
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Subscribe this endpoint to unsolicited event datagrams.
    fn attach(&mut self) -> io::Result<()>;

    fn detach(&mut self) -> io::Result<()>;

    /// Descriptor to multiplex on while waiting for events.
    fn wait_fd(&self) -> RawFd;
}

pub trait ControlTransport {
    type Socket: ControlSocket;

    fn open(&self, path: &ControlPath) -> io::Result<Self::Socket>;
}

/// Factory for [`UnixCtrlSocket`] endpoints.
#[derive(Debug, Clone)]
pub struct UnixCtrlTransport {
    local_dir: PathBuf,
    request_timeout: Duration,
}

impl UnixCtrlTransport {
    pub fn new(local_dir: impl Into<PathBuf>, request_timeout: Duration) -> Self {
        Self {
            local_dir: local_dir.into(),
            request_timeout,
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(&config.runtime_dir, config.request_timeout)
    }
}

impl ControlTransport for UnixCtrlTransport {
    type Socket = UnixCtrlSocket;

    fn open(&self, path: &ControlPath) -> io::Result<UnixCtrlSocket> {
        let id = LOCAL_SOCKET_COUNTER.fetch_add(1, Ordering::SeqCst);
        let local_path = self
            .local_dir
            .join(format!("{LOCAL_SOCKET_PREFIX}{}-{id}", process::id()));

        let socket = UnixCtrlSocket {
            socket: UnixDatagram::bind(&local_path)?,
            local_path,
            request_timeout: self.request_timeout,
        };

        // From here on an early return drops `socket`, which unlinks the
        // local endpoint.
        match path {
            ControlPath::Filesystem(path) => socket.socket.connect(path)?,
            ControlPath::Abstract(name) => connect_abstract(&socket.socket, name)?,
        }

        Ok(socket)
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn connect_abstract(socket: &UnixDatagram, name: &str) -> io::Result<()> {
    use std::os::linux::net::SocketAddrExt;
    use std::os::unix::net::SocketAddr;

    let addr = SocketAddr::from_abstract_name(name.as_bytes())?;
    socket.connect_addr(&addr)
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn connect_abstract(_socket: &UnixDatagram, _name: &str) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "abstract socket namespace is not available on this platform",
    ))
}

/// One endpoint of the control protocol, bound to its own local socket file.
pub struct UnixCtrlSocket {
    socket: UnixDatagram,
    local_path: PathBuf,
    request_timeout: Duration,
}

impl ControlSocket for UnixCtrlSocket {
    fn request(&mut self, cmd: &str, reply: &mut [u8]) -> Result<usize, RequestError> {
        self.socket.send(cmd.as_bytes()).map_err(RequestError::Io)?;

        loop {
            if !wait_readable(self.socket.as_raw_fd(), self.request_timeout)? {
                return Err(RequestError::Timeout);
            }
            let n = self.socket.recv(reply).map_err(RequestError::Io)?;
            if is_unsolicited(&reply[..n]) {
                continue;
            }
            return Ok(n);
        }
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.socket.recv(buf)
    }

    fn attach(&mut self) -> io::Result<()> {
        self.subscription("ATTACH")
    }

    fn detach(&mut self) -> io::Result<()> {
        self.subscription("DETACH")
    }

    fn wait_fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }
}

impl UnixCtrlSocket {
    fn subscription(&mut self, cmd: &str) -> io::Result<()> {
        let mut reply = [0u8; 16];
        let n = self.request(cmd, &mut reply)?;
        if reply[..n].starts_with(b"OK") {
            Ok(())
        } else {
            Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "{cmd} rejected: {}",
                    String::from_utf8_lossy(&reply[..n]).trim_end()
                ),
            ))
        }
    }
}

impl Drop for UnixCtrlSocket {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.local_path);
    }
}

/// Events may arrive on the command endpoint between a request and its
/// reply; they carry the event framing rather than reply text.
fn is_unsolicited(msg: &[u8]) -> bool {
    msg.first() == Some(&b'<') || msg.starts_with(IFNAME_PREFIX.as_bytes())
}

/// Remove local socket files left behind by clients that are no longer
/// running, so a restarted daemon does not accumulate dead endpoints.
pub fn cleanup_stale_sockets(local_dir: &Path) -> io::Result<()> {
    for entry in fs::read_dir(local_dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(rest) = name.to_str().and_then(|n| n.strip_prefix(LOCAL_SOCKET_PREFIX)) else {
            continue;
        };
        let Some(pid) = rest.split('-').next().and_then(|p| p.parse::<i32>().ok()) else {
            continue;
        };
        if !pid_alive(pid) {
            let _ = fs::remove_file(entry.path());
        }
    }
    Ok(())
}

fn wait_readable(fd: RawFd, timeout: Duration) -> io::Result<bool> {
    let mut pollfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };

    loop {
        let result = unsafe { libc::poll(&mut pollfd, 1, timeout.as_millis() as i32) };
        if result < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }
        if result == 0 {
            return Ok(false);
        }
        if pollfd.revents & (libc::POLLERR | libc::POLLNVAL) != 0 {
            return Err(io::Error::other("poll error on control socket"));
        }
        return Ok(pollfd.revents & libc::POLLIN != 0);
    }
}
