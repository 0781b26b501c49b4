// SPDX-License-Identifier: PMPL-1.0-or-later
//
// Entry point. Initialises logging, parses the command surface (spec §6),
// and runs the proxy (or a one-shot capability probe) to completion.

mod cli;

use std::process::ExitCode;

use clap::Parser;
use ipp::prelude::Uri;
use ipproxy_core::{DeviceScheme, PasswordSource, PasswordSupplier};
use ipproxy_engine::{ProxyRuntimeConfig, ShutdownFlag};
use tracing::{error, info};

use cli::{Cli, Command};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(verbosity_filter(cli.verbosity()))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "ipproxy exited with an error");
            ExitCode::FAILURE
        }
    }
}

fn verbosity_filter(verbosity: u8) -> tracing_subscriber::EnvFilter {
    if let Ok(filter) = tracing_subscriber::EnvFilter::try_from_default_env() {
        return filter;
    }
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::EnvFilter::new(level)
}

async fn run(cli: Cli) -> ipproxy_core::Result<()> {
    match cli.command {
        Command::Run(args) => run_proxy(args).await,
        Command::Probe(args) => run_probe(args).await,
    }
}

async fn run_proxy(args: cli::RunArgs) -> ipproxy_core::Result<()> {
    let infrastructure_uri: Uri = args.infrastructure_uri.parse().map_err(|e| {
        ipproxy_core::ProxyError::InvalidUri {
            uri: args.infrastructure_uri.clone(),
            detail: format!("{e}"),
        }
    })?;

    let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
    let device_uuid = ipproxy_engine::device_uuid(&args.device_uri, &hostname);
    let requesting_user_name = args.username.unwrap_or_else(|| "ipproxy".to_string());

    let shutdown = ShutdownFlag::new();
    let shutdown_signal = shutdown.clone();
    tokio::spawn(async move {
        wait_for_termination().await;
        info!("shutdown signal received");
        shutdown_signal.set();
    });

    info!(
        infrastructure_uri = %infrastructure_uri,
        device_uri = %args.device_uri,
        device_uuid = %device_uuid,
        "starting ipproxy"
    );

    ipproxy_engine::run(
        ProxyRuntimeConfig {
            infrastructure_uri,
            device_uri: args.device_uri,
            device_uuid,
            preferred_output_format: args.output_format,
            requesting_user_name,
        },
        shutdown,
    )
    .await
}

async fn run_probe(args: cli::ProbeArgs) -> ipproxy_core::Result<()> {
    let scheme = args
        .device_uri
        .split(':')
        .next()
        .and_then(DeviceScheme::from_scheme)
        .unwrap_or(DeviceScheme::Ipp);

    let attrs = if scheme.is_ipp() {
        let uri: Uri = args.device_uri.parse().map_err(|e| ipproxy_core::ProxyError::InvalidUri {
            uri: args.device_uri.clone(),
            detail: format!("{e}"),
        })?;
        ipproxy_engine::capabilities::probe(&uri, scheme).await
    } else {
        let placeholder: Uri = "socket://probe".parse().expect("static URI");
        ipproxy_engine::capabilities::probe(&placeholder, scheme).await
    };

    for (name, value) in &attrs {
        println!("{name}: {value:?}");
    }
    Ok(())
}

#[cfg(unix)]
async fn wait_for_termination() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut term = signal(SignalKind::terminate()).expect("install SIGTERM handler");
    let mut int = signal(SignalKind::interrupt()).expect("install SIGINT handler");
    tokio::select! {
        _ = term.recv() => {}
        _ = int.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_termination() {
    let _ = tokio::signal::ctrl_c().await;
}

/// Resolved once at startup and handed to the engine as a trait object;
/// not yet consumed anywhere (see the TODO on `RunArgs::device_password`),
/// but kept here so the supplier boundary matches where it will plug in.
#[allow(dead_code)]
fn password_supplier(args: &cli::RunArgs) -> Box<dyn PasswordSupplier> {
    Box::new(match &args.device_password {
        Some(value) => PasswordSource::Inline(value.clone()),
        None => PasswordSource::None,
    })
}
