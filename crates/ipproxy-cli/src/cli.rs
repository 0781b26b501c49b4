// SPDX-License-Identifier: PMPL-1.0-or-later
//
// Command-line surface (spec §6): `run` starts the proxy, `probe` dry-runs
// the local device's capability probe without touching the infrastructure
// printer.

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "ipproxy", about = "IPP Infrastructure Proxy", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Increase log verbosity; repeat for more detail (-v, -vv, -vvv).
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

impl Cli {
    pub fn verbosity(&self) -> u8 {
        self.verbose
    }
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the proxy until terminated.
    Run(RunArgs),
    /// Probe the local output device's capabilities and print them, without
    /// contacting the infrastructure printer.
    Probe(ProbeArgs),
}

#[derive(Args)]
pub struct RunArgs {
    /// URI of the cloud-side Infrastructure Printer.
    #[arg(long, env = "IPPROXY_INFRASTRUCTURE_URI")]
    pub infrastructure_uri: String,

    /// URI of the local output device: ipp://, ipps://, or socket://.
    #[arg(long, env = "IPPROXY_DEVICE_URI")]
    pub device_uri: String,

    /// Output document format to advertise, overriding auto-negotiation.
    #[arg(long, env = "IPPROXY_OUTPUT_FORMAT")]
    pub output_format: Option<String>,

    /// Username presented to the Infrastructure Printer.
    #[arg(long, env = "IPPROXY_USERNAME")]
    pub username: Option<String>,

    /// Password for the local output device, supplied inline.
    // TODO: wire this through once the engine's session layer grows HTTP
    // basic-auth support; the `ipp` crate's client has no credential hook yet.
    #[arg(long, env = "IPPROXY_DEVICE_PASSWORD", hide_env_values = true)]
    pub device_password: Option<String>,
}

#[derive(Args)]
pub struct ProbeArgs {
    /// URI of the local output device to probe.
    #[arg(long, env = "IPPROXY_DEVICE_URI")]
    pub device_uri: String,
}
