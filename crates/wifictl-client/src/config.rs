use std::env;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_SERVICE_NAME: &str = "wpa_supplicant";
const DEFAULT_INTERFACE: &str = "wlan0";
const DEFAULT_SOCKET_DIR: &str = "/var/run/wpa_supplicant";
const DEFAULT_CONFIG_FILE: &str = "/etc/wifi/wpa_supplicant.conf";
const DEFAULT_CONFIG_TEMPLATE: &str = "/usr/share/wifi/wpa_supplicant.conf";
const DEFAULT_P2P_CONFIG_FILE: &str = "/etc/wifi/p2p_supplicant.conf";
const DEFAULT_ENTROPY_FILE: &str = "/var/lib/wifi/entropy.bin";

const DEFAULT_POLL_INTERVAL_MS: u64 = 100;
const DEFAULT_START_TIMEOUT_SECS: u64 = 20;
const DEFAULT_STOP_TIMEOUT_SECS: u64 = 5;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
const DEFAULT_EVENT_POLL_TIMEOUT_SECS: u64 = 30;

/// Client configuration: daemon identity, filesystem layout, and the polling
/// intervals and ceilings used by the lifecycle controller and event loop.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Name the supplicant is registered under with the service supervisor.
    pub service_name: String,
    /// Interface whose control socket the client talks to.
    pub interface: String,
    /// Directory the supplicant creates per-interface control sockets in.
    pub socket_dir: PathBuf,
    /// Directory for pid files and the client's own local socket endpoints.
    pub runtime_dir: PathBuf,
    pub config_file: PathBuf,
    pub config_template: PathBuf,
    pub p2p_config_file: PathBuf,
    pub entropy_file: PathBuf,
    /// Owner applied to provisioned files, when set.
    pub file_owner: Option<(u32, u32)>,
    /// Interval between supervisor status polls during start/stop.
    pub poll_interval: Duration,
    /// Ceiling for the daemon to reach "running" after a start.
    pub start_timeout: Duration,
    /// Ceiling for the daemon to reach "stopped" after a stop.
    pub stop_timeout: Duration,
    /// Transport-level reply timeout for a single command.
    pub request_timeout: Duration,
    /// Bound on each blocking wait in the event loop before re-checking liveness.
    pub event_poll_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl ClientConfig {
    pub fn from_env() -> Self {
        Self {
            service_name: env::var("WIFICTL_SERVICE")
                .unwrap_or_else(|_| DEFAULT_SERVICE_NAME.to_string()),
            interface: env::var("WIFICTL_INTERFACE")
                .unwrap_or_else(|_| DEFAULT_INTERFACE.to_string()),
            socket_dir: env::var("WIFICTL_SOCKET_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_SOCKET_DIR)),
            runtime_dir: runtime_dir_from_env(),
            config_file: PathBuf::from(DEFAULT_CONFIG_FILE),
            config_template: PathBuf::from(DEFAULT_CONFIG_TEMPLATE),
            p2p_config_file: PathBuf::from(DEFAULT_P2P_CONFIG_FILE),
            entropy_file: PathBuf::from(DEFAULT_ENTROPY_FILE),
            file_owner: None,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            start_timeout: Duration::from_secs(DEFAULT_START_TIMEOUT_SECS),
            stop_timeout: Duration::from_secs(DEFAULT_STOP_TIMEOUT_SECS),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            event_poll_timeout: Duration::from_secs(DEFAULT_EVENT_POLL_TIMEOUT_SECS),
        }
    }

    pub fn with_service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = name.into();
        self
    }

    pub fn with_interface(mut self, interface: impl Into<String>) -> Self {
        self.interface = interface.into();
        self
    }

    pub fn with_socket_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.socket_dir = dir.into();
        self
    }

    pub fn with_runtime_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.runtime_dir = dir.into();
        self
    }

    pub fn with_config_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_file = path.into();
        self
    }

    pub fn with_config_template(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_template = path.into();
        self
    }

    pub fn with_p2p_config_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.p2p_config_file = path.into();
        self
    }

    pub fn with_entropy_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.entropy_file = path.into();
        self
    }

    pub fn with_file_owner(mut self, uid: u32, gid: u32) -> Self {
        self.file_owner = Some((uid, gid));
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_start_timeout(mut self, timeout: Duration) -> Self {
        self.start_timeout = timeout;
        self
    }

    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_event_poll_timeout(mut self, timeout: Duration) -> Self {
        self.event_poll_timeout = timeout;
        self
    }
}

fn runtime_dir_from_env() -> PathBuf {
    env::var("XDG_RUNTIME_DIR")
        .or_else(|_| env::var("TMPDIR"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}
