use anyhow::{bail, Result};
use clap::error::{ContextKind, ContextValue, ErrorKind};
use clap::Parser;
use std::ffi::OsString;
use std::path::PathBuf;

use crate::provision::{RunOptions, Selection};

/// With no selection flag, all three installers run (node, tunnel, proxy).
#[derive(Parser, Debug)]
#[command(
    name = "vpsctl",
    version,
    about = "Provision a VPS: proxy node agent, WireGuard tunnel, TLS reverse proxy",
    args_override_self = true
)]
pub struct Cli {
    /// Install the proxy node agent.
    #[arg(short = 'm')]
    pub node: bool,
    /// Install the outbound WireGuard tunnel.
    #[arg(short = 'w')]
    pub tunnel: bool,
    /// Install the nginx reverse proxy with a certbot certificate.
    #[arg(short = 'n')]
    pub proxy: bool,
    /// Config file (defaults to $VPSCTL_CONFIG, then /etc/vpsctl/config.json).
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,
    /// Domain for the reverse proxy; prompted for when omitted.
    #[arg(long)]
    pub domain: Option<String>,
    /// PEM installed as the node client certificate when none is present.
    #[arg(long, value_name = "PATH")]
    pub node_cert: Option<PathBuf>,
    /// ACME account email.
    #[arg(long)]
    pub email: Option<String>,
}

impl Cli {
    pub fn selection(&self) -> Selection {
        Selection::from_flags(self.node, self.tunnel, self.proxy)
    }

    pub fn options(&self) -> RunOptions {
        RunOptions {
            domain: self.domain.clone(),
            node_cert: self.node_cert.clone(),
            email: self.email.clone(),
        }
    }
}

#[derive(Debug)]
pub enum Invocation {
    Run(Cli),
    /// Help or version text; printed to stdout with exit status 0.
    Print(String),
}

pub fn parse_args<I, T>(args: I) -> Result<Invocation>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let err = match Cli::try_parse_from(args) {
        Ok(cli) => return Ok(Invocation::Run(cli)),
        Err(err) => err,
    };
    match err.kind() {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
            Ok(Invocation::Print(err.render().to_string()))
        }
        ErrorKind::UnknownArgument => {
            let token = match err.get(ContextKind::InvalidArg) {
                Some(ContextValue::String(token)) => token.clone(),
                _ => String::from("?"),
            };
            bail!("unknown option: {token}")
        }
        _ => bail!("{}", err.render().to_string().trim_end()),
    }
}
