use anyhow::{bail, Context, Result};
use std::fs;
use std::io;
use std::path::Path;
use tracing::{info, warn};

use crate::host::Host;
use crate::utils::{ensure_parent, set_mode, sha256_file, write_file};

pub fn download(host: &dyn Host, url: &str, dest: &Path) -> Result<()> {
    info!(url, dest = %dest.display(), "downloading");
    host.download(url, dest)
        .with_context(|| format!("Failed to download {url}"))
}

/// Tries each URL in order; every failure but the last is logged and skipped.
/// Returns the URL that succeeded.
pub fn download_first<'a>(host: &dyn Host, urls: &[&'a str], dest: &Path) -> Result<&'a str> {
    let Some((last, earlier)) = urls.split_last() else {
        bail!("No download URL configured for {}", dest.display());
    };
    for url in earlier {
        match download(host, url, dest) {
            Ok(()) => return Ok(*url),
            Err(err) => {
                let detail = format!("{err:#}");
                warn!(url, error = %detail, "download failed; trying next source");
            }
        }
    }
    download(host, last, dest)?;
    Ok(*last)
}

pub fn download_executable(host: &dyn Host, url: &str, dest: &Path) -> Result<()> {
    download(host, url, dest)?;
    set_mode(dest, 0o755)?;
    log_digest(dest);
    Ok(())
}

/// Copies one member of a zip archive to `dest` with the given mode.
pub fn extract_zip_member(archive: &Path, member: &str, dest: &Path, mode: u32) -> Result<()> {
    let file = fs::File::open(archive)
        .with_context(|| format!("Failed to open archive {}", archive.display()))?;
    let mut zip = zip::ZipArchive::new(file)
        .with_context(|| format!("{} is not a valid zip archive", archive.display()))?;
    let mut entry = zip
        .by_name(member)
        .with_context(|| format!("{member} not found in {}", archive.display()))?;
    let mut contents = Vec::with_capacity(entry.size() as usize);
    io::copy(&mut entry, &mut contents)
        .with_context(|| format!("Failed to extract {member} from {}", archive.display()))?;
    ensure_parent(dest)?;
    write_file(dest, &contents, mode)?;
    log_digest(dest);
    Ok(())
}

fn log_digest(path: &Path) {
    if let Ok(digest) = sha256_file(path) {
        info!(path = %path.display(), sha256 = %digest, "installed");
    }
}
