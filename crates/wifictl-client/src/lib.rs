#![deny(clippy::all)]

//! Client for a supervised Wi-Fi supplicant daemon's control channel:
//! daemon lifecycle through a service-supervisor seam, a dual-socket
//! command/event session with cancelable blocking waits, and the event
//! normalization protocol.

mod config;
mod error;
pub mod events;
mod lifecycle;
pub mod mock;
mod provision;
mod session;
mod sleeper;
mod supervisor;
mod transport;

pub use config::ClientConfig;
pub use error::CtrlError;
pub use error::LifecycleError;
pub use events::normalize;
pub use events::terminating_event;
pub use lifecycle::start_supplicant;
pub use lifecycle::stop_supplicant;
pub use provision::ensure_config_file;
pub use provision::ensure_entropy_file;
pub use session::CancelHandle;
pub use session::SupplicantClient;
pub use sleeper::MockSleeper;
pub use sleeper::RealSleeper;
pub use sleeper::Sleeper;
pub use supervisor::ProcessSupervisor;
pub use supervisor::ServiceStatus;
pub use supervisor::ServiceSupervisor;
pub use transport::cleanup_stale_sockets;
pub use transport::ControlPath;
pub use transport::ControlSocket;
pub use transport::ControlTransport;
pub use transport::RequestError;
pub use transport::UnixCtrlSocket;
pub use transport::UnixCtrlTransport;

pub type Result<T> = std::result::Result<T, CtrlError>;
