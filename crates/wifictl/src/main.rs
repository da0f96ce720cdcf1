mod commands;
mod telemetry;

use std::process;
use std::sync::Arc;
use std::thread;

use clap::CommandFactory;
use clap::Parser;
use clap_complete::generate;
use serde::Serialize;
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;

use commands::Cli;
use commands::Commands;
use wifictl_client::events;
use wifictl_client::start_supplicant;
use wifictl_client::stop_supplicant;
use wifictl_client::ClientConfig;
use wifictl_client::ControlPath;
use wifictl_client::CtrlError;
use wifictl_client::LifecycleError;
use wifictl_client::ProcessSupervisor;
use wifictl_client::RealSleeper;
use wifictl_client::ServiceStatus;
use wifictl_client::ServiceSupervisor;
use wifictl_client::SupplicantClient;
use wifictl_client::UnixCtrlTransport;

fn main() {
    let cli = Cli::parse();
    let _telemetry = telemetry::init_tracing("warn");

    if let Err(err) = run(cli) {
        eprintln!("Error: {err}");
        process::exit(exit_code(err.as_ref()));
    }
}

fn exit_code(err: &(dyn std::error::Error + 'static)) -> i32 {
    if let Some(ctrl) = err.downcast_ref::<CtrlError>() {
        return match ctrl {
            CtrlError::NotRunning => 69, // EX_UNAVAILABLE
            CtrlError::Timeout => 75,    // EX_TEMPFAIL
            _ => 74,                     // EX_IOERR
        };
    }
    if let Some(lifecycle) = err.downcast_ref::<LifecycleError>() {
        return match lifecycle {
            LifecycleError::Timeout { .. } => 75,
            _ => 74,
        };
    }
    1
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = ClientConfig::from_env();
    if let Some(interface) = &cli.interface {
        config = config.with_interface(interface.clone());
    }
    if let Some(dir) = &cli.socket_dir {
        config = config.with_socket_dir(dir.clone());
    }

    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        generate(*shell, &mut cmd, "wifictl", &mut std::io::stdout());
        return Ok(());
    }

    let supervisor = Arc::new(supervisor_for(&config));

    match cli.command {
        Commands::Completions { .. } => unreachable!(),

        Commands::Start => {
            start_supplicant(supervisor.as_ref(), &config, &RealSleeper)?;
            println!("{} running", config.service_name);
        }

        Commands::Stop => {
            stop_supplicant(supervisor.as_ref(), &config, &RealSleeper)?;
            println!("{} stopped", config.service_name);
        }

        Commands::Status { json } => {
            let status = supervisor.status(&config.service_name);
            let report = StatusReport {
                service: &config.service_name,
                status,
                interface: &config.interface,
                control_path: ControlPath::resolve(&config).to_string(),
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!(
                    "{} is {} (interface {}, control socket {})",
                    report.service, report.status, report.interface, report.control_path
                );
            }
        }

        Commands::Ping => {
            let mut client = connect(supervisor, &config)?;
            client.ping()?;
            println!("PONG");
        }

        Commands::Cmd { command } => {
            let mut client = connect(supervisor, &config)?;
            let reply = client.command(&command.join(" "))?;
            if reply.ends_with('\n') {
                print!("{reply}");
            } else {
                println!("{reply}");
            }
        }

        Commands::Monitor { count } => monitor(supervisor, config, count)?,
    }

    Ok(())
}

#[derive(Serialize)]
struct StatusReport<'a> {
    service: &'a str,
    status: ServiceStatus,
    interface: &'a str,
    control_path: String,
}

/// Supervise the supplicant as a child process launched with the
/// conventional interface/config arguments.
fn supervisor_for(config: &ClientConfig) -> ProcessSupervisor {
    let config_file = config.config_file.to_string_lossy().into_owned();
    ProcessSupervisor::new(&config.runtime_dir).with_command(
        &config.service_name,
        &config.service_name,
        &["-i", &config.interface, "-c", &config_file],
    )
}

fn connect(
    supervisor: Arc<dyn ServiceSupervisor>,
    config: &ClientConfig,
) -> Result<SupplicantClient<UnixCtrlTransport>, CtrlError> {
    let mut client = SupplicantClient::open_unix(supervisor, config.clone());
    client.connect()?;
    Ok(client)
}

/// Follow the event stream until a terminating event, a signal, or the
/// requested event count. A signal fires the session's cancel handle, which
/// surfaces as a terminating event rather than interrupting mid-print.
fn monitor(
    supervisor: Arc<dyn ServiceSupervisor>,
    config: ClientConfig,
    count: Option<usize>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut client = SupplicantClient::open_unix(supervisor, config);
    client.connect()?;

    let handle = client.cancel_handle().ok_or(CtrlError::NotConnected)?;
    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    thread::Builder::new()
        .name("signal-handler".to_string())
        .spawn(move || {
            if signals.forever().next().is_some() {
                handle.cancel();
            }
        })?;

    let mut seen = 0usize;
    loop {
        let event = client.wait_for_event();
        println!("{event}");
        if event.contains(events::EVENT_TERMINATING) {
            break;
        }
        seen += 1;
        if count.is_some_and(|limit| seen >= limit) {
            break;
        }
    }
    client.disconnect();
    Ok(())
}
