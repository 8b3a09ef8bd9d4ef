use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::ffi::OsStr;
use std::fs;
use std::io::{Read, Write};
use std::os::unix::fs::{symlink, PermissionsExt};
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub command: String,
    pub ok: bool,
    pub stdout: String,
    pub stderr: String,
    pub returncode: i32,
}

impl CommandResult {
    pub fn failure_summary(&self) -> String {
        let detail = if self.stderr.is_empty() {
            &self.stdout
        } else {
            &self.stderr
        };
        if detail.is_empty() {
            format!("`{}` exited with {}", self.command, self.returncode)
        } else {
            format!(
                "`{}` exited with {}: {}",
                self.command, self.returncode, detail
            )
        }
    }
}

pub fn which<S: AsRef<OsStr>>(cmd: S) -> Option<PathBuf> {
    let cmd_ref = cmd.as_ref();
    std::env::var_os("PATH").and_then(|paths| {
        std::env::split_paths(&paths).find_map(|dir| {
            let candidate = dir.join(cmd_ref);
            if candidate.is_file() {
                Some(candidate)
            } else {
                None
            }
        })
    })
}

/// Logs a tolerated failure and drops it. Returns the value on success.
pub fn tolerate<T>(what: &str, result: Result<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(err) => {
            let detail = format!("{err:#}");
            warn!(error = %detail, "{what} failed; continuing");
            None
        }
    }
}

pub fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }
    }
    Ok(())
}

/// Writes `contents` to a sibling temp file and renames it over `path`.
pub fn write_file(path: &Path, contents: &[u8], mode: u32) -> Result<()> {
    ensure_parent(path)?;
    let dir = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut temp = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to create temp file in {}", dir.display()))?;
    temp.write_all(contents)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    temp.as_file()
        .set_permissions(fs::Permissions::from_mode(mode))
        .with_context(|| format!("Failed to chmod {} to {:o}", path.display(), mode))?;
    temp.persist(path)
        .with_context(|| format!("Failed to move file into place at {}", path.display()))?;
    Ok(())
}

pub fn set_mode(path: &Path, mode: u32) -> Result<()> {
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
        .with_context(|| format!("Failed to chmod {} to {:o}", path.display(), mode))
}

pub fn symlink_force(target: &Path, link: &Path) -> Result<()> {
    if link.exists() || link.is_symlink() {
        fs::remove_file(link)?;
    }
    ensure_parent(link)?;
    symlink(target, link)?;
    Ok(())
}

pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Moves a file, falling back to copy + remove across filesystems.
pub fn move_file(src: &Path, dst: &Path) -> Result<()> {
    ensure_parent(dst)?;
    if fs::rename(src, dst).is_ok() {
        return Ok(());
    }
    fs::copy(src, dst)
        .with_context(|| format!("Failed to copy {} -> {}", src.display(), dst.display()))?;
    fs::remove_file(src).with_context(|| format!("Failed to remove {}", src.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_file_replaces_contents_and_sets_mode() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("nested/dir/file.conf");
        write_file(&path, b"first", 0o600).unwrap();
        write_file(&path, b"second", 0o644).unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "second");
        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o644);
    }

    #[test]
    fn tolerate_swallows_errors() {
        let value: Option<u8> = tolerate("probe", Err(anyhow::anyhow!("boom")));
        assert!(value.is_none());
        assert_eq!(tolerate("probe", Ok(7u8)), Some(7));
    }

    #[test]
    fn failure_summary_prefers_stderr() {
        let result = CommandResult {
            command: "apt-get update".to_string(),
            ok: false,
            stdout: "partial".to_string(),
            stderr: "lock held".to_string(),
            returncode: 100,
        };
        assert_eq!(
            result.failure_summary(),
            "`apt-get update` exited with 100: lock held"
        );
    }

    #[test]
    fn move_file_relocates_contents() {
        let temp = tempfile::tempdir().unwrap();
        let src = temp.path().join("a.conf");
        let dst = temp.path().join("out/b.conf");
        fs::write(&src, "x").unwrap();
        move_file(&src, &dst).unwrap();
        assert!(!src.exists());
        assert_eq!(fs::read_to_string(&dst).unwrap(), "x");
    }
}
