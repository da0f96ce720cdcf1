use std::path::PathBuf;

use clap::Parser;
use clap::Subcommand;
pub use clap_complete::Shell;

const LONG_ABOUT: &str = r#"wifictl drives a supervised Wi-Fi supplicant daemon: it starts and
stops the daemon, talks to its control socket, and follows the event
stream.

EXAMPLES:
    # Bring the daemon up and check it answers
    wifictl start
    wifictl ping

    # Raw control commands
    wifictl cmd STATUS
    wifictl cmd SET_NETWORK 0 ssid '"home"'

    # Follow events until the daemon goes away (Ctrl-C to stop)
    wifictl monitor"#;

#[derive(Parser)]
#[command(name = "wifictl")]
#[command(author, version)]
#[command(about = "Control a supervised Wi-Fi supplicant daemon")]
#[command(long_about = LONG_ABOUT)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Interface whose control socket to use
    #[arg(short, long, global = true, env = "WIFICTL_INTERFACE")]
    pub interface: Option<String>,

    /// Directory the supplicant creates control sockets in
    #[arg(long, global = true, env = "WIFICTL_SOCKET_DIR")]
    pub socket_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the supplicant and wait until it reports running
    Start,

    /// Stop the supplicant and wait until it reports stopped
    Stop,

    /// Report the supervisor's view of the daemon
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Round-trip liveness probe over the control socket
    Ping,

    /// Send a raw control command and print the reply
    Cmd {
        /// Command words, joined with spaces before sending
        #[arg(required = true)]
        command: Vec<String>,
    },

    /// Print normalized events as they arrive
    Monitor {
        /// Exit after this many events instead of running until terminated
        #[arg(short, long)]
        count: Option<usize>,
    },

    /// Generate shell completions
    Completions { shell: Shell },
}
