mod arch;
mod cli;
mod config;
mod constants;
mod fetch;
mod guard;
mod host;
mod node;
mod packages;
mod patch;
mod paths;
mod provision;
mod proxy;
#[cfg(test)]
mod testing;
mod tunnel;
mod utils;

use anyhow::Result;
use std::process::ExitCode;
use tracing::{error, info};

use crate::cli::{Cli, Invocation};
use crate::config::{load_config, resolve_config_source};
use crate::host::LocalHost;
use crate::provision::RunContext;

fn init_tracing() -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,vpsctl=info".into());
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .try_init()
        .map_err(|err| anyhow::anyhow!(err.to_string()))?;
    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    let host = LocalHost::new()?;
    guard::ensure_root(&host)?;
    let arch = guard::detect_arch(&host)?;

    let source = resolve_config_source(cli.config.clone());
    let config = load_config(&source)?;
    info!(config = %source.path().display(), "configuration loaded");

    let ctx = RunContext {
        selection: cli.selection(),
        arch,
        config,
        options: cli.options(),
    };
    provision::provision(&ctx, &host)
}

fn main() -> ExitCode {
    if let Err(err) = init_tracing() {
        eprintln!("vpsctl: failed to initialise logging: {err}");
    }

    let outcome = cli::parse_args(std::env::args_os()).and_then(|invocation| match invocation {
        Invocation::Print(text) => {
            print!("{text}");
            Ok(())
        }
        Invocation::Run(cli) => run(cli),
    });
    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let detail = format!("{err:#}");
            error!(error = %detail, "vpsctl failed");
            ExitCode::FAILURE
        }
    }
}
