// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Incus Provider - external runner provider binary.
//!
//! Invoked once per command by the orchestrator: the command and its
//! arguments arrive in `GARM_*` environment variables (and stdin for
//! `CreateInstance`), the result is printed to stdout, and failures are
//! reported on stderr with a non-zero exit status.

use std::process::ExitCode;
use tracing::{debug, info, warn};

use incus_provider::{IncusProvider, ProviderConfig};
use runner_provider_common::Environment;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    if std::env::args().skip(1).any(|arg| arg == "--version" || arg == "-version") {
        println!("v{}", env!("CARGO_PKG_VERSION"));
        return Ok(ExitCode::SUCCESS);
    }

    // stdout carries the command result, so logs go to stderr
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "incus_provider=info,runner_provider_common=info".into()),
        )
        .init();

    if let Err(e) = dotenvy::dotenv() {
        debug!("No .env file loaded: {}", e);
    }

    let env = match Environment::from_env() {
        Ok(env) => env,
        Err(e) => return Ok(failure(&e.to_string(), e.exit_code())),
    };

    let provider = match build_provider(&env) {
        Ok(provider) => provider,
        Err(e) => return Ok(failure(&e.to_string(), e.kind().exit_code())),
    };

    info!(command = %env.command, "Running command");

    let result = tokio::select! {
        result = env.run(&provider) => result,
        signal = shutdown_signal() => {
            signal?;
            warn!(command = %env.command, "Interrupted");
            return Ok(failure("interrupted", 1));
        }
    };

    match result {
        Ok(output) => {
            if !output.is_empty() {
                print!("{output}");
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => Ok(failure(
            &format!("failed to run command: {e}"),
            e.exit_code(),
        )),
    }
}

fn build_provider(env: &Environment) -> incus_provider::Result<IncusProvider> {
    let config = ProviderConfig::load(&env.provider_config_file)?;
    IncusProvider::builder()
        .config(config)
        .controller_id(env.controller_id.clone())
        .build()
}

fn failure(message: &str, code: i32) -> ExitCode {
    eprintln!("{message}");
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}

#[cfg(unix)]
async fn shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result,
        _ = terminate.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
