//! WireGuard outbound tunnel registered through wgcf.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::arch::Arch;
use crate::config::VpsConfig;
use crate::constants::TUNNEL_NAMESERVERS;
use crate::fetch::download_executable;
use crate::host::{run_checked, CommandSpec, Host};
use crate::packages;
use crate::patch::{Anchor, LineMatch, Patch, PatchOutcome};
use crate::paths::{
    tunnel_unit_config, tunnel_unit_name, wgcf_account_path, wgcf_profile_path, wgcf_work_dir,
};
use crate::provision::RunContext;
use crate::utils::{move_file, set_mode, tolerate, write_file};

const TABLE_OFF: &str = "Table = off";

pub fn install(ctx: &RunContext, host: &dyn Host) -> Result<()> {
    let config = &ctx.config;
    packages::install(host, &["wireguard", "wireguard-tools"])?;

    let wgcf = Path::new(&config.wgcf_bin_path);
    download_executable(host, &wgcf_download_url(config, ctx.arch), wgcf)?;

    let work_dir = wgcf_work_dir(config);
    fs::create_dir_all(&work_dir)
        .with_context(|| format!("Failed to create {}", work_dir.display()))?;
    register(config, host);
    let profile = generate_profile(config, host)?;

    match profile_patch().apply_file(&profile)? {
        PatchOutcome::Inserted { used_fallback } => {
            info!(used_fallback, "disabled routing table management in tunnel profile")
        }
        PatchOutcome::AlreadyApplied => info!("tunnel profile already patched"),
        PatchOutcome::AnchorNotFound => bail!(
            "Could not place `{TABLE_OFF}` in {}: no [Interface] section",
            profile.display()
        ),
    }

    // The profile holds the private key; restrict it before it lands in place.
    set_mode(&profile, 0o600)?;
    let unit_config = tunnel_unit_config(config);
    move_file(&profile, &unit_config)?;
    info!(path = %unit_config.display(), "installed tunnel profile");

    rewrite_resolver(config, host)?;

    let unit = tunnel_unit_name(config);
    run_checked(
        host,
        &CommandSpec::new("systemctl").args(["enable", "--now", unit.as_str()]),
    )
    .with_context(|| format!("Failed to enable {unit}"))?;
    tolerate(
        "tunnel status report",
        run_checked(
            host,
            &CommandSpec::new("systemctl")
                .args(["status", unit.as_str(), "--no-pager"])
                .ok_codes(&[0, 3]),
        ),
    );
    Ok(())
}

pub fn wgcf_download_url(config: &VpsConfig, arch: Arch) -> String {
    let version = config.wgcf_version.trim_start_matches('v');
    format!(
        "{base}/v{version}/wgcf_{version}_linux_{arch}",
        base = config.wgcf_release_base.trim_end_matches('/'),
    )
}

fn wgcf(config: &VpsConfig, subcommand: &[&str]) -> CommandSpec {
    CommandSpec::new(config.wgcf_bin_path.as_str())
        .args(subcommand.iter().copied())
        .cwd(wgcf_work_dir(config))
}

/// Registration failures are tolerated; profile generation catches the fallout.
fn register(config: &VpsConfig, host: &dyn Host) {
    let account = wgcf_account_path(config);
    if account.exists() {
        info!(path = %account.display(), "wgcf account exists; skipping registration");
        return;
    }
    let register = wgcf(config, &["register", "--accept-tos"]);
    let piped = run_checked(host, &register.clone().stdin("\n"));
    if piped.is_ok() {
        return;
    }
    warn!("wgcf registration with piped input failed; retrying once");
    tolerate("wgcf registration", run_checked(host, &register));
}

fn generate_profile(config: &VpsConfig, host: &dyn Host) -> Result<PathBuf> {
    tolerate(
        "wgcf profile generation",
        run_checked(host, &wgcf(config, &["generate"])),
    );
    let profile = wgcf_profile_path(config);
    if !profile.exists() {
        bail!(
            "wgcf did not produce {}; registration may have failed",
            profile.display()
        );
    }
    Ok(profile)
}

pub fn profile_patch() -> Patch {
    Patch {
        name: "tunnel-profile",
        marker: TABLE_OFF,
        strip: &[LineMatch::Directive("DNS")],
        insert: TABLE_OFF.to_string(),
        anchor: Anchor::After {
            line: LineMatch::Directive("MTU"),
            section: Some("Interface"),
        },
        fallback: Some(Anchor::After {
            line: LineMatch::Section("Interface"),
            section: None,
        }),
    }
}

pub fn resolver_contents() -> String {
    TUNNEL_NAMESERVERS
        .iter()
        .map(|server| format!("nameserver {server}\n"))
        .collect()
}

fn chattr(path: &Path, flag: &str) -> CommandSpec {
    CommandSpec::new("chattr").arg(flag).path_arg(path)
}

fn rewrite_resolver(config: &VpsConfig, host: &dyn Host) -> Result<()> {
    let path = Path::new(&config.resolv_conf_path);
    if path.exists() {
        tolerate("clearing resolver immutability", run_checked(host, &chattr(path, "-i")));
    }
    if path.exists() || path.is_symlink() {
        fs::remove_file(path).with_context(|| format!("Failed to remove {}", path.display()))?;
    }
    write_file(path, resolver_contents().as_bytes(), 0o644)?;
    tolerate("locking resolver file", run_checked(host, &chattr(path, "+i")));
    info!(path = %path.display(), "pinned resolver nameservers");
    Ok(())
}
