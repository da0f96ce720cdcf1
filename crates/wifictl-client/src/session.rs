//! The control-channel session: one command connection and one attached
//! event connection to the same control endpoint, plus the cancellation
//! pair that lets a command timeout (or any other thread) unblock a
//! pending event wait.

use std::io;
use std::io::{Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::error::CtrlError;
use crate::events::{normalize, terminating_event};
use crate::supervisor::{ServiceStatus, ServiceSupervisor};
use crate::transport::{ControlPath, ControlSocket, ControlTransport, RequestError};

const REPLY_BUF_LEN: usize = 4096;
const EVENT_BUF_LEN: usize = 2048;

/// Everything a live channel owns. Either all four resources exist or the
/// session holds no connection at all; the fields drop in declaration
/// order on teardown.
struct Connection<S> {
    cmd: S,
    event: S,
    cancel_rx: UnixStream,
    cancel_tx: UnixStream,
}

impl<S> Connection<S> {
    /// The single-byte cancel protocol: the reader only cares that a byte
    /// arrived, never which one.
    fn signal_cancel(&self) {
        let _ = (&self.cancel_tx).write_all(b"T");
    }
}

/// Client session for the supplicant's control channel.
///
/// Commands and event waits may run on different threads by routing the
/// event side through [`SupplicantClient::cancel_handle`]; within one
/// session there is at most one in-flight command and one outstanding wait.
pub struct SupplicantClient<T: ControlTransport> {
    transport: T,
    supervisor: Arc<dyn ServiceSupervisor>,
    config: ClientConfig,
    conn: Option<Connection<T::Socket>>,
}

impl<T: ControlTransport> SupplicantClient<T> {
    pub fn new(
        transport: T,
        supervisor: Arc<dyn ServiceSupervisor>,
        config: ClientConfig,
    ) -> Self {
        Self {
            transport,
            supervisor,
            config,
            conn: None,
        }
    }

    pub fn interface(&self) -> &str {
        &self.config.interface
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    /// Establish the command and event connections.
    ///
    /// Requires the supervisor to report the daemon running. Any failure
    /// part-way releases everything opened so far; nothing is stored until
    /// all four channel resources exist.
    pub fn connect(&mut self) -> Result<(), CtrlError> {
        if self.conn.is_some() {
            return Ok(());
        }

        if self.supervisor.status(&self.config.service_name) != ServiceStatus::Running {
            warn!("supplicant not running, cannot connect");
            return Err(CtrlError::NotRunning);
        }

        let path = ControlPath::resolve(&self.config);

        let cmd = self
            .transport
            .open(&path)
            .map_err(|source| CtrlError::OpenFailed {
                path: path.to_string(),
                source,
            })?;

        let mut event = self
            .transport
            .open(&path)
            .map_err(|source| CtrlError::OpenFailed {
                path: path.to_string(),
                source,
            })?;

        event
            .attach()
            .map_err(|err| CtrlError::AttachFailed(err.to_string()))?;

        let (cancel_tx, cancel_rx) = UnixStream::pair()?;

        self.conn = Some(Connection {
            cmd,
            event,
            cancel_rx,
            cancel_tx,
        });
        info!(path = %path, interface = %self.config.interface, "connected to supplicant");
        Ok(())
    }

    /// Release the channel. Safe to call repeatedly and regardless of how
    /// much of a previous `connect` succeeded.
    pub fn disconnect(&mut self) {
        if self.conn.take().is_some() {
            debug!("control channel closed");
        }
    }

    /// Handle for unblocking a pending [`SupplicantClient::wait_for_event`]
    /// from another thread. `None` while disconnected.
    pub fn cancel_handle(&self) -> Option<CancelHandle> {
        let conn = self.conn.as_ref()?;
        let tx = conn.cancel_tx.try_clone().ok()?;
        Some(CancelHandle { tx })
    }

    /// Execute one command and classify the reply.
    ///
    /// A transport-level timeout additionally fires the cancellation signal
    /// so a concurrent event wait does not stay blocked on a dead daemon.
    pub fn command(&mut self, cmd: &str) -> Result<String, CtrlError> {
        let Some(conn) = self.conn.as_mut() else {
            // Commands issued outside the channel's lifetime are dropped,
            // not crashed on.
            debug!(command = cmd, "not connected, command dropped");
            return Err(CtrlError::NotConnected);
        };

        let mut reply = [0u8; REPLY_BUF_LEN];
        match conn.cmd.request(cmd, &mut reply) {
            Ok(n) => {
                let text = String::from_utf8_lossy(&reply[..n]).into_owned();
                if text.as_bytes().starts_with(b"FAIL") {
                    Err(CtrlError::Rejected(text.trim_end().to_string()))
                } else {
                    Ok(text)
                }
            }
            Err(RequestError::Timeout) => {
                debug!(command = cmd, "command timed out");
                conn.signal_cancel();
                Err(CtrlError::Timeout)
            }
            Err(RequestError::Io(err)) => Err(CtrlError::Rejected(err.to_string())),
        }
    }

    /// Liveness probe against the daemon itself rather than the supervisor.
    pub fn ping(&mut self) -> Result<(), CtrlError> {
        let reply = self.command("PING")?;
        if reply.starts_with("PONG") {
            Ok(())
        } else {
            Err(CtrlError::Rejected(reply.trim_end().to_string()))
        }
    }

    /// Block until the next event and return it normalized.
    ///
    /// Never fails: when the channel is down or dies, a synthetic
    /// `CTRL-EVENT-TERMINATING` event is returned instead so callers see
    /// one uniform event stream. The wait multiplexes the event descriptor
    /// with the cancellation descriptor, re-checking daemon liveness on
    /// every `event_poll_timeout` elapse rather than giving up on a daemon
    /// that is merely quiet.
    pub fn wait_for_event(&mut self) -> String {
        let Self {
            supervisor,
            config,
            conn,
            ..
        } = self;
        let iface = config.interface.as_str();

        let Some(conn) = conn.as_mut() else {
            return terminating_event(iface, "connection closed");
        };

        loop {
            let readiness = wait_readiness(
                conn.event.wait_fd(),
                conn.cancel_rx.as_raw_fd(),
                config.event_poll_timeout,
            );
            match readiness {
                Err(err) => {
                    warn!(error = %err, "event wait failed");
                    return terminating_event(iface, "recv error");
                }
                Ok(Readiness::TimedOut) => {
                    if supervisor.status(&config.service_name) == ServiceStatus::Stopped {
                        return terminating_event(iface, "connection closed");
                    }
                    // Daemon alive but quiet; keep waiting.
                }
                Ok(Readiness::Cancel) => {
                    let mut byte = [0u8; 1];
                    let _ = (&conn.cancel_rx).read(&mut byte);
                    return terminating_event(iface, "connection closed");
                }
                Ok(Readiness::Broken) => {
                    return terminating_event(iface, "connection closed");
                }
                Ok(Readiness::Event) => {
                    let mut buf = [0u8; EVENT_BUF_LEN];
                    match conn.event.recv(&mut buf) {
                        Err(err) => {
                            debug!(error = %err, "event receive failed");
                            return terminating_event(iface, "recv error");
                        }
                        Ok(0) => {
                            // Daemon-side EOF.
                            debug!("received EOF on event socket");
                            return terminating_event(iface, "signal 0 received");
                        }
                        Ok(n) => {
                            let raw = String::from_utf8_lossy(&buf[..n]);
                            return normalize(&raw).into_owned();
                        }
                    }
                }
            }
        }
    }
}

impl SupplicantClient<crate::transport::UnixCtrlTransport> {
    /// Session over the real Unix-socket transport.
    pub fn open_unix(supervisor: Arc<dyn ServiceSupervisor>, config: ClientConfig) -> Self {
        let transport = crate::transport::UnixCtrlTransport::from_config(&config);
        Self::new(transport, supervisor, config)
    }
}

/// Unblocks a pending event wait from another thread by writing one byte
/// to the session's cancellation pair.
pub struct CancelHandle {
    tx: UnixStream,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = (&self.tx).write_all(b"T");
    }
}

enum Readiness {
    TimedOut,
    Event,
    Cancel,
    /// An error condition on either descriptor without data to read.
    Broken,
}

fn wait_readiness(event_fd: RawFd, cancel_fd: RawFd, timeout: Duration) -> io::Result<Readiness> {
    let mut fds = [
        libc::pollfd {
            fd: event_fd,
            events: libc::POLLIN,
            revents: 0,
        },
        libc::pollfd {
            fd: cancel_fd,
            events: libc::POLLIN,
            revents: 0,
        },
    ];

    loop {
        let result = unsafe { libc::poll(fds.as_mut_ptr(), 2, timeout.as_millis() as i32) };
        if result < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }
        if result == 0 {
            return Ok(Readiness::TimedOut);
        }
        if fds[0].revents & libc::POLLIN != 0 {
            return Ok(Readiness::Event);
        }
        if fds[1].revents & libc::POLLIN != 0 {
            return Ok(Readiness::Cancel);
        }
        return Ok(Readiness::Broken);
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Instant;

    use super::*;
    use crate::mock::{MockSocket, MockSupervisor, MockTransport};
    use crate::supervisor::ServiceStatus::{Running, Stopped, Unknown};

    fn test_config() -> ClientConfig {
        ClientConfig::from_env()
            .with_service_name("wpa_supplicant")
            .with_interface("wlan0")
            .with_event_poll_timeout(Duration::from_secs(5))
    }

    fn connected_client(
        transport: MockTransport,
        supervisor: Arc<MockSupervisor>,
    ) -> SupplicantClient<MockTransport> {
        let mut client = SupplicantClient::new(transport, supervisor, test_config());
        client.connect().unwrap();
        client
    }

    #[test]
    fn test_connect_requires_running_daemon() {
        let supervisor = Arc::new(MockSupervisor::new().with_status(Unknown));
        let mut client =
            SupplicantClient::new(MockTransport::new(), supervisor, test_config());

        assert!(matches!(client.connect(), Err(CtrlError::NotRunning)));
        assert!(!client.is_connected());
    }

    #[test]
    fn test_connect_fails_when_command_socket_cannot_open() {
        let supervisor = Arc::new(MockSupervisor::new().with_status(Running));
        let transport = MockTransport::new().with_open_error();
        let mut client = SupplicantClient::new(transport, supervisor, test_config());

        assert!(matches!(client.connect(), Err(CtrlError::OpenFailed { .. })));
        assert!(!client.is_connected());
    }

    #[test]
    fn test_connect_fails_when_event_socket_cannot_open() {
        let supervisor = Arc::new(MockSupervisor::new().with_status(Running));
        let transport = MockTransport::new()
            .with_socket(MockSocket::new())
            .with_open_error();
        let mut client = SupplicantClient::new(transport, supervisor, test_config());

        assert!(matches!(client.connect(), Err(CtrlError::OpenFailed { .. })));
        assert!(!client.is_connected());
    }

    #[test]
    fn test_connect_fails_when_attach_is_refused() {
        let supervisor = Arc::new(MockSupervisor::new().with_status(Running));
        let transport = MockTransport::new()
            .with_socket(MockSocket::new())
            .with_socket(MockSocket::new().with_attach_error());
        let mut client = SupplicantClient::new(transport, supervisor, test_config());

        assert!(matches!(client.connect(), Err(CtrlError::AttachFailed(_))));
        assert!(!client.is_connected());
    }

    #[test]
    fn test_connect_is_idempotent() {
        let supervisor = Arc::new(MockSupervisor::new().with_status(Running));
        let transport = MockTransport::new()
            .with_socket(MockSocket::new())
            .with_socket(MockSocket::new());
        let mut client = connected_client(transport, supervisor);

        // No third socket scripted: a second connect must not reopen.
        client.connect().unwrap();
        assert!(client.is_connected());
    }

    #[test]
    fn test_command_without_connection_is_dropped() {
        let supervisor = Arc::new(MockSupervisor::new().with_status(Unknown));
        let mut client =
            SupplicantClient::new(MockTransport::new(), supervisor, test_config());

        assert!(matches!(
            client.command("STATUS"),
            Err(CtrlError::NotConnected)
        ));
    }

    #[test]
    fn test_command_round_trip() {
        let supervisor = Arc::new(MockSupervisor::new().with_status(Running));
        let cmd_socket = MockSocket::new().with_reply(b"OK\n");
        let log = cmd_socket.request_log();
        let transport = MockTransport::new()
            .with_socket(cmd_socket)
            .with_socket(MockSocket::new());
        let mut client = connected_client(transport, supervisor);

        assert_eq!(client.command("SCAN").unwrap(), "OK\n");
        assert_eq!(log.commands(), vec!["SCAN"]);
    }

    #[test]
    fn test_command_fail_reply_is_rejected() {
        let supervisor = Arc::new(MockSupervisor::new().with_status(Running));
        let transport = MockTransport::new()
            .with_socket(MockSocket::new().with_reply(b"FAIL\n"))
            .with_socket(MockSocket::new());
        let mut client = connected_client(transport, supervisor);

        assert!(matches!(
            client.command("SELECT_NETWORK 7"),
            Err(CtrlError::Rejected(reply)) if reply == "FAIL"
        ));
    }

    #[test]
    fn test_ping_checks_for_pong() {
        let supervisor = Arc::new(MockSupervisor::new().with_status(Running));
        let transport = MockTransport::new()
            .with_socket(MockSocket::new().with_reply(b"PONG\n").with_reply(b"huh?"))
            .with_socket(MockSocket::new());
        let mut client = connected_client(transport, supervisor);

        client.ping().unwrap();
        assert!(matches!(client.ping(), Err(CtrlError::Rejected(_))));
    }

    #[test]
    fn test_command_timeout_unblocks_subsequent_wait() {
        let supervisor = Arc::new(MockSupervisor::new().with_status(Running));
        let transport = MockTransport::new()
            .with_socket(MockSocket::new().with_timeout())
            .with_socket(MockSocket::new());
        let mut client = connected_client(transport, supervisor);

        assert!(matches!(client.command("SCAN"), Err(CtrlError::Timeout)));

        // The timeout queued the cancel byte, so the wait returns without
        // any event arriving.
        assert_eq!(
            client.wait_for_event(),
            "IFNAME=wlan0 CTRL-EVENT-TERMINATING - connection closed"
        );
        assert!(client.is_connected());
    }

    #[test]
    fn test_cancel_handle_unblocks_wait_across_threads() {
        let supervisor = Arc::new(MockSupervisor::new().with_status(Running));
        let transport = MockTransport::new()
            .with_socket(MockSocket::new())
            .with_socket(MockSocket::new());
        let mut client = connected_client(transport, supervisor);

        let handle = client.cancel_handle().unwrap();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            handle.cancel();
        });

        let start = Instant::now();
        let event = client.wait_for_event();
        assert_eq!(
            event,
            "IFNAME=wlan0 CTRL-EVENT-TERMINATING - connection closed"
        );
        assert!(start.elapsed() < Duration::from_secs(2));
        canceller.join().unwrap();
    }

    #[test]
    fn test_wait_without_connection_synthesizes_closed_event() {
        let supervisor = Arc::new(MockSupervisor::new().with_status(Unknown));
        let mut client =
            SupplicantClient::new(MockTransport::new(), supervisor, test_config());

        assert_eq!(
            client.wait_for_event(),
            "IFNAME=wlan0 CTRL-EVENT-TERMINATING - connection closed"
        );
    }

    #[test]
    fn test_wait_normalizes_received_events() {
        let supervisor = Arc::new(MockSupervisor::new().with_status(Running));
        let event_socket = MockSocket::new();
        let injector = event_socket.injector();
        let transport = MockTransport::new()
            .with_socket(MockSocket::new())
            .with_socket(event_socket);
        let mut client = connected_client(transport, supervisor);

        injector.push(b"IFNAME=wlan0 <3>CTRL-EVENT-CONNECTED");
        assert_eq!(client.wait_for_event(), "IFNAME=wlan0 CTRL-EVENT-CONNECTED");

        injector.push(b"<2>CTRL-EVENT-DISCONNECTED");
        assert_eq!(client.wait_for_event(), "CTRL-EVENT-DISCONNECTED");
    }

    #[test]
    fn test_wait_reports_daemon_eof() {
        let supervisor = Arc::new(MockSupervisor::new().with_status(Running));
        let event_socket = MockSocket::new();
        let injector = event_socket.injector();
        let transport = MockTransport::new()
            .with_socket(MockSocket::new())
            .with_socket(event_socket);
        let mut client = connected_client(transport, supervisor);

        injector.push_eof();
        assert_eq!(
            client.wait_for_event(),
            "IFNAME=wlan0 CTRL-EVENT-TERMINATING - signal 0 received"
        );
    }

    #[test]
    fn test_wait_reports_receive_errors() {
        let supervisor = Arc::new(MockSupervisor::new().with_status(Running));
        let event_socket = MockSocket::new();
        let injector = event_socket.injector();
        let transport = MockTransport::new()
            .with_socket(MockSocket::new())
            .with_socket(event_socket);
        let mut client = connected_client(transport, supervisor);

        injector.push_error();
        assert_eq!(
            client.wait_for_event(),
            "IFNAME=wlan0 CTRL-EVENT-TERMINATING - recv error"
        );
    }

    #[test]
    fn test_wait_detects_stopped_daemon_on_poll_timeout() {
        let supervisor = Arc::new(
            MockSupervisor::new().with_timeline(vec![(0, Running), (0, Stopped)]),
        );
        let transport = MockTransport::new()
            .with_socket(MockSocket::new())
            .with_socket(MockSocket::new());
        let mut client = SupplicantClient::new(
            transport,
            supervisor,
            test_config().with_event_poll_timeout(Duration::from_millis(30)),
        );
        client.connect().unwrap();

        let start = Instant::now();
        assert_eq!(
            client.wait_for_event(),
            "IFNAME=wlan0 CTRL-EVENT-TERMINATING - connection closed"
        );
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_wait_keeps_waiting_while_daemon_is_quiet() {
        let supervisor = Arc::new(MockSupervisor::new().with_status(Running));
        let event_socket = MockSocket::new();
        let injector = event_socket.injector();
        let transport = MockTransport::new()
            .with_socket(MockSocket::new())
            .with_socket(event_socket);
        let mut client = SupplicantClient::new(
            transport,
            supervisor,
            test_config().with_event_poll_timeout(Duration::from_millis(20)),
        );
        client.connect().unwrap();

        // Event lands after a couple of poll timeouts; the loop must ride
        // them out instead of failing.
        let pusher = thread::spawn(move || {
            thread::sleep(Duration::from_millis(70));
            injector.push(b"<3>CTRL-EVENT-SCAN-RESULTS");
        });

        assert_eq!(client.wait_for_event(), "CTRL-EVENT-SCAN-RESULTS");
        pusher.join().unwrap();
    }

    #[test]
    fn test_disconnect_is_idempotent_and_quiets_the_channel() {
        let supervisor = Arc::new(MockSupervisor::new().with_status(Running));
        let transport = MockTransport::new()
            .with_socket(MockSocket::new())
            .with_socket(MockSocket::new());
        let mut client = connected_client(transport, supervisor);

        client.disconnect();
        client.disconnect();

        assert!(!client.is_connected());
        assert!(client.cancel_handle().is_none());
        assert!(matches!(client.command("PING"), Err(CtrlError::NotConnected)));
        assert_eq!(
            client.wait_for_event(),
            "IFNAME=wlan0 CTRL-EVENT-TERMINATING - connection closed"
        );
    }
}
