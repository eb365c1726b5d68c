use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "relay-ctl", about = "Manage edge forwarding endpoints")]
pub struct Args {
    /// Path to the credentials config (default: edgerelay.json, then
    /// ~/.edgerelay.json)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Deploy new forwarding endpoints
    Create {
        /// How many endpoints to deploy
        #[arg(long, default_value_t = 1)]
        count: usize,
    },
    /// List known endpoints
    List,
    /// Reconcile local state with the control plane
    Sync,
    /// Relay a probe request through every endpoint
    Test {
        /// Target URL to probe against
        #[arg(long, default_value = "https://api.ipify.org?format=json")]
        url: String,
        /// HTTP method for the probe
        #[arg(long, default_value = "GET")]
        method: String,
        /// Per-probe timeout in seconds
        #[arg(long, default_value_t = 15)]
        timeout: u64,
    },
    /// Delete every known endpoint, remotely and locally
    Cleanup,
    /// Show where credentials are read from
    Config,
}
