//! Daemon lifecycle: starting and stopping the supplicant through the
//! service supervisor, with bounded polling.
//!
//! The supervisor's status updates on its own cadence, so both operations
//! poll. Start additionally records the status change-serial before issuing
//! the start: a serial that never moved means the daemon never transitioned
//! at all, while a serial that moved to "stopped" means it started and died
//! right away. Reading status alone cannot tell those apart.

use std::thread;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::config::ClientConfig;
use crate::error::LifecycleError;
use crate::provision;
use crate::sleeper::Sleeper;
use crate::supervisor::{ServiceStatus, ServiceSupervisor};
use crate::transport;

/// Start the supplicant and wait for the supervisor to report it running.
///
/// Succeeds immediately if it already is. Provisions the daemon's required
/// files first; only the primary configuration file is fatal when it cannot
/// be ensured.
pub fn start_supplicant<S: ServiceSupervisor + ?Sized>(
    supervisor: &S,
    config: &ClientConfig,
    sleeper: &dyn Sleeper,
) -> Result<(), LifecycleError> {
    let service = config.service_name.as_str();

    if supervisor.status(service) == ServiceStatus::Running {
        debug!(service, "supplicant already running");
        return Ok(());
    }

    if let Err(source) = provision::ensure_config_file(
        &config.config_file,
        &config.config_template,
        config.file_owner,
    ) {
        error!(service, error = %source, "config file unavailable, supplicant will not be enabled");
        return Err(LifecycleError::Provision {
            path: config.config_file.clone(),
            source,
        });
    }

    // Some setups carry a second configuration file for the P2P interface.
    // Not all do; when it cannot be provisioned the daemon itself will
    // complain if it actually needed it.
    if let Err(err) = provision::ensure_config_file(
        &config.p2p_config_file,
        &config.config_template,
        config.file_owner,
    ) {
        debug!(path = %config.p2p_config_file.display(), error = %err, "p2p config not provisioned");
    }

    if let Err(err) = provision::ensure_entropy_file(&config.entropy_file, config.file_owner) {
        warn!(path = %config.entropy_file.display(), error = %err, "entropy file was not created");
    }

    if let Err(err) = transport::cleanup_stale_sockets(&config.runtime_dir) {
        debug!(error = %err, "stale socket cleanup failed");
    }

    // Recorded before issuing start, so a transition that lands between the
    // start and our first poll still shows up as a serial change.
    let serial = supervisor.status_serial(service);

    supervisor
        .start(service)
        .map_err(|source| LifecycleError::Supervisor {
            action: "start",
            service: service.to_string(),
            source,
        })?;
    thread::yield_now();

    for _ in 0..attempts(config.start_timeout, config.poll_interval) {
        if supervisor.status_serial(service) != serial {
            match supervisor.status(service) {
                ServiceStatus::Running => {
                    info!(service, "supplicant running");
                    return Ok(());
                }
                ServiceStatus::Stopped => {
                    error!(service, "supplicant started and exited");
                    return Err(LifecycleError::StartFailed {
                        service: service.to_string(),
                    });
                }
                _ => {}
            }
        }
        sleeper.sleep(config.poll_interval);
    }

    Err(LifecycleError::Timeout {
        service: service.to_string(),
        target: ServiceStatus::Running,
    })
}

/// Stop the supplicant and wait for the supervisor to report it stopped.
///
/// A timeout here is reported but is often tolerable for callers shutting
/// down anyway; retrying is their call.
pub fn stop_supplicant<S: ServiceSupervisor + ?Sized>(
    supervisor: &S,
    config: &ClientConfig,
    sleeper: &dyn Sleeper,
) -> Result<(), LifecycleError> {
    let service = config.service_name.as_str();

    if supervisor.status(service) == ServiceStatus::Stopped {
        debug!(service, "supplicant already stopped");
        return Ok(());
    }

    supervisor
        .stop(service)
        .map_err(|source| LifecycleError::Supervisor {
            action: "stop",
            service: service.to_string(),
            source,
        })?;
    thread::yield_now();

    for _ in 0..attempts(config.stop_timeout, config.poll_interval) {
        if supervisor.status(service) == ServiceStatus::Stopped {
            info!(service, "supplicant stopped");
            return Ok(());
        }
        sleeper.sleep(config.poll_interval);
    }

    warn!(service, "supplicant did not stop within the ceiling");
    Err(LifecycleError::Timeout {
        service: service.to_string(),
        target: ServiceStatus::Stopped,
    })
}

fn attempts(ceiling: Duration, interval: Duration) -> u64 {
    (ceiling.as_millis() / interval.as_millis().max(1)).max(1) as u64
}
