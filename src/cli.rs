//! CLI command definitions using clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use converge_engine::executor::DEFAULT_MAX_NOTIFICATIONS;

/// converge - idempotent host convergence
#[derive(Parser, Debug)]
#[command(name = "converge")]
#[command(version)]
#[command(about = "Converge a host to the chef-server wrapper recipe")]
#[command(
    long_about = "Installs and bootstraps a Chef Infra Server from a layered attribute document. Every run is idempotent: re-running against a converged host changes nothing."
)]
pub struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true, default_value_t = false)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Where attributes come from.
#[derive(Args, Debug, Clone, Default)]
pub struct AttributeArgs {
    /// Attribute document (.json, .yaml, .yml or .toml)
    #[arg(short, long)]
    pub attributes: Option<PathBuf>,

    /// Override an attribute, e.g. chef_server_wrapper.fqdn=host.example.com
    #[arg(long = "set", value_name = "PATH=VALUE")]
    pub set: Vec<String>,

    /// Override an attribute without merging into lower layers, e.g.
    /// chef_server_wrapper.frontend_secrets={} to drop document secrets
    #[arg(long = "replace", value_name = "PATH=VALUE")]
    pub replace: Vec<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Converge the host
    Run {
        #[command(flatten)]
        attributes: AttributeArgs,

        /// Directory every resource path is resolved under
        #[arg(long, default_value = "/")]
        root: PathBuf,

        /// How often one resource may be re-run by notifications
        #[arg(long, default_value_t = DEFAULT_MAX_NOTIFICATIONS)]
        max_notifications: u32,

        /// Print the run report as JSON
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Print the resolved hostname and server configuration
    ShowConfig {
        #[command(flatten)]
        attributes: AttributeArgs,
    },

    /// List the resources a run would visit, in order
    Plan {
        #[command(flatten)]
        attributes: AttributeArgs,
    },
}
