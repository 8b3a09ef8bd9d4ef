use anyhow::Result;
use std::fmt;
use std::path::PathBuf;
use tracing::info;

use crate::arch::Arch;
use crate::config::VpsConfig;
use crate::host::Host;
use crate::{node, packages, proxy, tunnel};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    Node,
    Tunnel,
    Proxy,
}

impl Component {
    pub fn as_str(self) -> &'static str {
        match self {
            Component::Node => "node",
            Component::Tunnel => "tunnel",
            Component::Proxy => "proxy",
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which installers run. Order of execution is fixed regardless of how the
/// selection was expressed on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    pub node: bool,
    pub tunnel: bool,
    pub proxy: bool,
}

impl Selection {
    /// No flags at all selects everything.
    pub fn from_flags(node: bool, tunnel: bool, proxy: bool) -> Self {
        if !(node || tunnel || proxy) {
            return Self::all();
        }
        Self {
            node,
            tunnel,
            proxy,
        }
    }

    pub fn all() -> Self {
        Self {
            node: true,
            tunnel: true,
            proxy: true,
        }
    }

    pub fn components(&self) -> Vec<Component> {
        [
            (self.node, Component::Node),
            (self.tunnel, Component::Tunnel),
            (self.proxy, Component::Proxy),
        ]
        .into_iter()
        .filter_map(|(selected, component)| selected.then_some(component))
        .collect()
    }
}

#[cfg(test)]
impl Selection {
    pub fn only_node() -> Self {
        Self::from_flags(true, false, false)
    }

    pub fn only_tunnel() -> Self {
        Self::from_flags(false, true, false)
    }

    pub fn only_proxy() -> Self {
        Self::from_flags(false, false, true)
    }
}

/// Values supplied on the command line that installers may need.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOptions {
    pub domain: Option<String>,
    pub node_cert: Option<PathBuf>,
    pub email: Option<String>,
}

/// Everything an installer needs, built once at startup and never mutated.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub selection: Selection,
    pub arch: Arch,
    pub config: VpsConfig,
    pub options: RunOptions,
}

pub fn provision(ctx: &RunContext, host: &dyn Host) -> Result<()> {
    let components = ctx.selection.components();
    let names: Vec<&str> = components.iter().map(|component| component.as_str()).collect();
    info!(arch = %ctx.arch, components = ?names, "starting provisioning");

    packages::refresh_index(&ctx.config, host)?;
    for component in components {
        info!(%component, "installing");
        match component {
            Component::Node => node::install(ctx, host)?,
            Component::Tunnel => tunnel::install(ctx, host)?,
            Component::Proxy => proxy::install(ctx, host)?,
        }
        info!(%component, "installed");
    }
    info!("provisioning complete");
    Ok(())
}
