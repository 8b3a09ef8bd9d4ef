use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime};
use tracing::info;

use crate::config::VpsConfig;
use crate::host::{run_checked, CommandSpec, Host};
use crate::utils::write_file;

/// A refresh is due when the marker is missing or strictly older than `max_age`.
pub fn needs_refresh(marker_age: Option<Duration>, max_age: Duration) -> bool {
    match marker_age {
        None => true,
        Some(age) => age > max_age,
    }
}

pub fn marker_age(path: &Path, now: SystemTime) -> Option<Duration> {
    let modified = fs::metadata(path).ok()?.modified().ok()?;
    // A marker from the future counts as fresh.
    Some(now.duration_since(modified).unwrap_or(Duration::ZERO))
}

/// Runs `apt-get update` unless the freshness marker says the index is recent.
/// Returns whether a refresh happened.
pub fn refresh_index(config: &VpsConfig, host: &dyn Host) -> Result<bool> {
    let marker = Path::new(&config.package_index_stamp);
    let max_age = Duration::from_secs(config.package_index_max_age_secs);
    let age = marker_age(marker, SystemTime::now());

    if !needs_refresh(age, max_age) {
        info!(
            marker = %marker.display(),
            age_secs = age.map(|age| age.as_secs()).unwrap_or_default(),
            "package index is fresh; skipping apt-get update"
        );
        return Ok(false);
    }

    info!(
        marker = %marker.display(),
        age_secs = ?age.map(|age| age.as_secs()),
        "refreshing package index"
    );
    run_checked(host, &apt_spec(&["update"])).context("Failed to refresh package index")?;
    write_file(marker, b"", 0o644)
        .with_context(|| format!("Failed to touch freshness marker {}", marker.display()))?;
    Ok(true)
}

pub fn install(host: &dyn Host, packages: &[&str]) -> Result<()> {
    let mut args = vec!["install", "-y"];
    args.extend_from_slice(packages);
    run_checked(host, &apt_spec(&args))
        .with_context(|| format!("Failed to install {}", packages.join(", ")))?;
    Ok(())
}

fn apt_spec(args: &[&str]) -> CommandSpec {
    CommandSpec::new("apt-get")
        .args(args.iter().copied())
        .env("DEBIAN_FRONTEND", "noninteractive")
}
