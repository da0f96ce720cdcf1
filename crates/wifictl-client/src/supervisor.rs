//! Service-supervisor seam.
//!
//! The supplicant is started and stopped through whatever supervises system
//! services on the host. The lifecycle controller only needs the small
//! surface captured by [`ServiceSupervisor`]: issue start/stop, read the
//! current status, and read a per-service change serial that advances when
//! the status does — polling the serial is how the controller tells
//! "transitioned and settled" apart from "never transitioned at all".

use std::collections::HashMap;
use std::fs;
use std::fs::OpenOptions;
use std::io;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::Mutex;

use serde::Serialize;
use tracing::{debug, warn};

/// Externally observed state of a supervised service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Unknown,
    Starting,
    Running,
    Stopped,
}

impl ServiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceStatus::Unknown => "unknown",
            ServiceStatus::Starting => "starting",
            ServiceStatus::Running => "running",
            ServiceStatus::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub trait ServiceSupervisor: Send + Sync {
    fn start(&self, service: &str) -> io::Result<()>;

    fn stop(&self, service: &str) -> io::Result<()>;

    fn status(&self, service: &str) -> ServiceStatus;

    /// Change serial for the service's status key. Monotonically increasing;
    /// advances whenever the observed status differs from the previous
    /// observation.
    fn status_serial(&self, service: &str) -> u64;
}

#[derive(Debug, Clone)]
struct ServiceCommand {
    program: PathBuf,
    args: Vec<String>,
}

#[derive(Debug, Clone, Copy)]
struct Observation {
    status: ServiceStatus,
    serial: u64,
}

/// Supervisor that runs services as detached child processes with pid files
/// under a runtime directory.
///
/// A service with a live pid file reads as `Running`, a pid file whose
/// process is gone reads as `Stopped`, and a service that was never started
/// (no pid file) reads as `Unknown`.
pub struct ProcessSupervisor {
    runtime_dir: PathBuf,
    commands: HashMap<String, ServiceCommand>,
    children: Mutex<HashMap<String, Child>>,
    observed: Mutex<HashMap<String, Observation>>,
}

impl ProcessSupervisor {
    pub fn new(runtime_dir: impl Into<PathBuf>) -> Self {
        Self {
            runtime_dir: runtime_dir.into(),
            commands: HashMap::new(),
            children: Mutex::new(HashMap::new()),
            observed: Mutex::new(HashMap::new()),
        }
    }

    /// Register the command line a service is launched with. Unregistered
    /// services are launched as `<service>` resolved from `PATH`, with no
    /// arguments.
    pub fn with_command(
        mut self,
        service: impl Into<String>,
        program: impl Into<PathBuf>,
        args: &[&str],
    ) -> Self {
        self.commands.insert(
            service.into(),
            ServiceCommand {
                program: program.into(),
                args: args.iter().map(|a| a.to_string()).collect(),
            },
        );
        self
    }

    fn pid_file(&self, service: &str) -> PathBuf {
        self.runtime_dir.join(format!("{service}.pid"))
    }

    fn read_pid(&self, service: &str) -> Option<i32> {
        let contents = fs::read_to_string(self.pid_file(service)).ok()?;
        contents.trim().parse().ok()
    }

    fn probe(&self, service: &str) -> ServiceStatus {
        // Reap our own children first; a terminated child stays a zombie
        // (and still answers a signal-0 probe) until waited on.
        let mut children = self.children.lock().unwrap();
        if let Some(child) = children.get_mut(service) {
            match child.try_wait() {
                Ok(Some(_)) => {
                    children.remove(service);
                    return ServiceStatus::Stopped;
                }
                Ok(None) => return ServiceStatus::Running,
                Err(_) => {}
            }
        }
        drop(children);

        match self.read_pid(service) {
            None => ServiceStatus::Unknown,
            Some(pid) if pid_alive(pid) => ServiceStatus::Running,
            Some(_) => ServiceStatus::Stopped,
        }
    }

    fn observe(&self, service: &str) -> Observation {
        let status = self.probe(service);
        let mut observed = self.observed.lock().unwrap();
        let entry = observed
            .entry(service.to_string())
            .or_insert(Observation { status, serial: 0 });
        if entry.status != status {
            entry.status = status;
            entry.serial += 1;
        }
        *entry
    }
}

impl ServiceSupervisor for ProcessSupervisor {
    fn start(&self, service: &str) -> io::Result<()> {
        let command = self.commands.get(service).cloned().unwrap_or_else(|| {
            ServiceCommand {
                program: PathBuf::from(service),
                args: Vec::new(),
            }
        });

        let log_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.runtime_dir.join(format!("{service}.log")))
            .ok();
        let stderr = match log_file {
            Some(f) => Stdio::from(f),
            None => Stdio::null(),
        };

        let child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(stderr)
            .spawn()?;

        fs::write(self.pid_file(service), child.id().to_string())?;
        debug!(service, pid = child.id(), "launched service");
        self.children
            .lock()
            .unwrap()
            .insert(service.to_string(), child);
        Ok(())
    }

    fn stop(&self, service: &str) -> io::Result<()> {
        let Some(pid) = self.read_pid(service) else {
            return Ok(());
        };

        let result = unsafe { libc::kill(pid, libc::SIGTERM) };
        if result != 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::ESRCH) {
                return Ok(());
            }
            warn!(service, pid, error = %err, "failed to signal service");
            return Err(err);
        }
        debug!(service, pid, "signalled service to stop");
        Ok(())
    }

    fn status(&self, service: &str) -> ServiceStatus {
        self.observe(service).status
    }

    fn status_serial(&self, service: &str) -> u64 {
        self.observe(service).serial
    }
}

/// Signal-0 liveness probe. A process we lack permission to signal still
/// exists.
pub(crate) fn pid_alive(pid: i32) -> bool {
    let result = unsafe { libc::kill(pid, 0) };
    if result == 0 {
        return true;
    }
    io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}
