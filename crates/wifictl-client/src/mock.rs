//! Test doubles for the supervisor and transport seams.
//!
//! `MockSupervisor` replays a scripted timeline of status snapshots;
//! `MockSocket` replays scripted command replies and lets tests inject
//! events through a real socket pair, so the event loop's descriptor
//! polling runs unmodified.

use std::collections::VecDeque;
use std::io;
use std::io::{Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::sync::{Arc, Mutex};

use crate::supervisor::{ServiceStatus, ServiceSupervisor};
use crate::transport::{ControlPath, ControlSocket, ControlTransport, RequestError};

/// Supervisor double driven by a scripted timeline of `(serial, status)`
/// snapshots. Every `status()` or `status_serial()` call observes the
/// current snapshot and advances the cursor; the last snapshot repeats.
#[derive(Default)]
pub struct MockSupervisor {
    timeline: Mutex<Timeline>,
    started: Mutex<Vec<String>>,
    stopped: Mutex<Vec<String>>,
    start_error: Mutex<Option<io::Error>>,
}

struct Timeline {
    snapshots: Vec<(u64, ServiceStatus)>,
    cursor: usize,
}

impl Default for Timeline {
    fn default() -> Self {
        Self {
            snapshots: vec![(0, ServiceStatus::Unknown)],
            cursor: 0,
        }
    }
}

impl MockSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeline(self, snapshots: Vec<(u64, ServiceStatus)>) -> Self {
        assert!(!snapshots.is_empty(), "timeline must have a first snapshot");
        *self.timeline.lock().unwrap() = Timeline {
            snapshots,
            cursor: 0,
        };
        self
    }

    /// Convenience for a supervisor that reports one status forever.
    pub fn with_status(self, status: ServiceStatus) -> Self {
        self.with_timeline(vec![(0, status)])
    }

    pub fn with_start_error(self, error: io::Error) -> Self {
        *self.start_error.lock().unwrap() = Some(error);
        self
    }

    pub fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }

    pub fn stopped(&self) -> Vec<String> {
        self.stopped.lock().unwrap().clone()
    }

    fn advance(&self) -> (u64, ServiceStatus) {
        let mut timeline = self.timeline.lock().unwrap();
        let snapshot = timeline.snapshots[timeline.cursor];
        if timeline.cursor + 1 < timeline.snapshots.len() {
            timeline.cursor += 1;
        }
        snapshot
    }
}

impl ServiceSupervisor for MockSupervisor {
    fn start(&self, service: &str) -> io::Result<()> {
        if let Some(err) = self.start_error.lock().unwrap().take() {
            return Err(err);
        }
        self.started.lock().unwrap().push(service.to_string());
        Ok(())
    }

    fn stop(&self, service: &str) -> io::Result<()> {
        self.stopped.lock().unwrap().push(service.to_string());
        Ok(())
    }

    fn status(&self, _service: &str) -> ServiceStatus {
        self.advance().1
    }

    fn status_serial(&self, _service: &str) -> u64 {
        self.advance().0
    }
}

/// What a scripted [`MockSocket`] does with one request.
pub enum ScriptedReply {
    Reply(Vec<u8>),
    Timeout,
    IoError,
}

/// Control-socket double. Command replies are scripted; events are pushed
/// through an [`EventInjector`] backed by a real socket pair so `wait_fd`
/// becomes readable exactly when an event is queued.
pub struct MockSocket {
    replies: Mutex<VecDeque<ScriptedReply>>,
    requests: RequestLog,
    attach_error: Option<io::Error>,
    events: Arc<Mutex<VecDeque<io::Result<Vec<u8>>>>>,
    wake_rx: UnixStream,
    wake_tx: UnixStream,
}

impl MockSocket {
    pub fn new() -> Self {
        let (wake_tx, wake_rx) = UnixStream::pair().expect("socket pair");
        Self {
            replies: Mutex::new(VecDeque::new()),
            requests: RequestLog::default(),
            attach_error: None,
            events: Arc::new(Mutex::new(VecDeque::new())),
            wake_rx,
            wake_tx,
        }
    }

    pub fn with_reply(self, reply: &[u8]) -> Self {
        self.replies
            .lock()
            .unwrap()
            .push_back(ScriptedReply::Reply(reply.to_vec()));
        self
    }

    pub fn with_timeout(self) -> Self {
        self.replies
            .lock()
            .unwrap()
            .push_back(ScriptedReply::Timeout);
        self
    }

    pub fn with_io_error(self) -> Self {
        self.replies
            .lock()
            .unwrap()
            .push_back(ScriptedReply::IoError);
        self
    }

    pub fn with_attach_error(mut self) -> Self {
        self.attach_error = Some(io::Error::other("attach refused"));
        self
    }

    /// Handle for pushing events into this socket after it has been moved
    /// into a client.
    pub fn injector(&self) -> EventInjector {
        EventInjector {
            events: Arc::clone(&self.events),
            wake_tx: self.wake_tx.try_clone().expect("clone wake socket"),
        }
    }

    /// Handle on the log of commands sent through this socket.
    pub fn request_log(&self) -> RequestLog {
        self.requests.clone()
    }
}

impl Default for MockSocket {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlSocket for MockSocket {
    fn request(&mut self, cmd: &str, reply: &mut [u8]) -> Result<usize, RequestError> {
        self.requests.0.lock().unwrap().push(cmd.to_string());
        match self.replies.lock().unwrap().pop_front() {
            Some(ScriptedReply::Reply(data)) => {
                let n = data.len().min(reply.len());
                reply[..n].copy_from_slice(&data[..n]);
                Ok(n)
            }
            Some(ScriptedReply::Timeout) => Err(RequestError::Timeout),
            Some(ScriptedReply::IoError) => {
                Err(RequestError::Io(io::Error::other("scripted I/O error")))
            }
            None => Err(RequestError::Io(io::Error::other("no scripted reply"))),
        }
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut wake = [0u8; 1];
        self.wake_rx.read_exact(&mut wake)?;
        match self.events.lock().unwrap().pop_front() {
            Some(Ok(data)) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                Ok(n)
            }
            Some(Err(err)) => Err(err),
            None => Err(io::Error::other("no event queued")),
        }
    }

    fn attach(&mut self) -> io::Result<()> {
        match self.attach_error.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn detach(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn wait_fd(&self) -> RawFd {
        self.wake_rx.as_raw_fd()
    }
}

/// Pushes events into a [`MockSocket`]'s queue and wakes its descriptor.
pub struct EventInjector {
    events: Arc<Mutex<VecDeque<io::Result<Vec<u8>>>>>,
    wake_tx: UnixStream,
}

impl EventInjector {
    pub fn push(&self, data: &[u8]) {
        self.events.lock().unwrap().push_back(Ok(data.to_vec()));
        self.wake();
    }

    /// Queue a zero-byte datagram, the daemon-side EOF signal.
    pub fn push_eof(&self) {
        self.events.lock().unwrap().push_back(Ok(Vec::new()));
        self.wake();
    }

    pub fn push_error(&self) {
        self.events
            .lock()
            .unwrap()
            .push_back(Err(io::Error::other("scripted recv error")));
        self.wake();
    }

    fn wake(&self) {
        (&self.wake_tx).write_all(&[1]).expect("wake event socket");
    }
}

/// Shared log of the commands a [`MockSocket`] was asked to send.
#[derive(Clone, Default)]
pub struct RequestLog(Arc<Mutex<Vec<String>>>);

impl RequestLog {
    pub fn commands(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

/// Transport double handing out pre-built sockets in order.
#[derive(Default)]
pub struct MockTransport {
    sockets: Mutex<VecDeque<io::Result<MockSocket>>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_socket(self, socket: MockSocket) -> Self {
        self.sockets.lock().unwrap().push_back(Ok(socket));
        self
    }

    pub fn with_open_error(self) -> Self {
        self.sockets
            .lock()
            .unwrap()
            .push_back(Err(io::Error::other("scripted open failure")));
        self
    }
}

impl ControlTransport for MockTransport {
    type Socket = MockSocket;

    fn open(&self, _path: &ControlPath) -> io::Result<MockSocket> {
        self.sockets
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(io::Error::other("no scripted socket")))
    }
}
