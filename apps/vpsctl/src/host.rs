//! Every side effect that leaves the filesystem goes through [`Host`]: external
//! commands, HTTP downloads, the privilege probe and interactive prompts.

use anyhow::{bail, Context, Result};
use reqwest::blocking::Client;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{debug, info};

use crate::utils::{ensure_parent, which, CommandResult};

/// A typed external command: binary, arguments, and the exit codes that count as success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub stdin: Option<Vec<u8>>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    pub ok_codes: Vec<i32>,
    pub capture: bool,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdin: None,
            cwd: None,
            env: Vec::new(),
            ok_codes: vec![0],
            capture: false,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn path_arg(self, path: &Path) -> Self {
        self.arg(path.display().to_string())
    }

    pub fn stdin(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn ok_codes(mut self, codes: &[i32]) -> Self {
        self.ok_codes = codes.to_vec();
        self
    }

    pub fn capture(mut self) -> Self {
        self.capture = true;
        self
    }

    pub fn display(&self) -> String {
        let mut out = self.program.clone();
        for arg in &self.args {
            out.push(' ');
            out.push_str(arg);
        }
        out
    }
}

pub trait Host {
    /// Runs a command to completion. `Err` means the command could not be started;
    /// a non-accepted exit code is reported through `CommandResult::ok`.
    fn run(&self, spec: &CommandSpec) -> Result<CommandResult>;
    fn which(&self, program: &str) -> Option<PathBuf>;
    fn download(&self, url: &str, dest: &Path) -> Result<()>;
    fn effective_uid(&self) -> u32;
    fn prompt(&self, message: &str) -> Result<String>;
}

/// Runs `spec` and turns a rejected exit code into an error.
pub fn run_checked(host: &dyn Host, spec: &CommandSpec) -> Result<CommandResult> {
    info!(command = %spec.display(), "running");
    let result = host
        .run(spec)
        .with_context(|| format!("Failed to start `{}`", spec.display()))?;
    if !result.ok {
        bail!("{}", result.failure_summary());
    }
    Ok(result)
}

pub struct LocalHost {
    http: Client,
}

impl LocalHost {
    pub fn new() -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("vpsctl/", env!("CARGO_PKG_VERSION")))
            .timeout(None::<std::time::Duration>)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { http })
    }
}

impl Host for LocalHost {
    fn run(&self, spec: &CommandSpec) -> Result<CommandResult> {
        let mut command = Command::new(&spec.program);
        command.args(&spec.args);
        for (key, value) in &spec.env {
            command.env(key, value);
        }
        if let Some(dir) = &spec.cwd {
            command.current_dir(dir);
        }
        command.stdin(if spec.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::inherit()
        });
        if spec.capture {
            command.stdout(Stdio::piped()).stderr(Stdio::piped());
        }

        let mut child = command.spawn()?;
        if let (Some(input), Some(mut pipe)) = (spec.stdin.as_ref(), child.stdin.take()) {
            // The child may exit without reading; a broken pipe is not our failure.
            if let Err(err) = pipe.write_all(input) {
                if err.kind() != io::ErrorKind::BrokenPipe {
                    return Err(err.into());
                }
            }
        }
        let output = child.wait_with_output()?;
        let returncode = output.status.code().unwrap_or(-1);
        Ok(CommandResult {
            command: spec.display(),
            ok: spec.ok_codes.contains(&returncode),
            stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            returncode,
        })
    }

    fn which(&self, program: &str) -> Option<PathBuf> {
        which(program)
    }

    fn download(&self, url: &str, dest: &Path) -> Result<()> {
        ensure_parent(dest)?;
        let mut response = self
            .http
            .get(url)
            .send()
            .with_context(|| format!("Failed to download {url}"))?;
        if !response.status().is_success() {
            bail!("Download failed for {} ({})", url, response.status());
        }
        let dir = dest.parent().unwrap_or_else(|| Path::new("."));
        let mut file = tempfile::NamedTempFile::new_in(dir)
            .with_context(|| format!("Failed to create temp file in {}", dir.display()))?;
        let bytes = io::copy(&mut response, &mut file)
            .with_context(|| format!("Failed while streaming {url}"))?;
        file.persist(dest)
            .with_context(|| format!("Failed to move download into {}", dest.display()))?;
        debug!(url, bytes, dest = %dest.display(), "download complete");
        Ok(())
    }

    fn effective_uid(&self) -> u32 {
        unsafe { libc::geteuid() }
    }

    fn prompt(&self, message: &str) -> Result<String> {
        let mut stderr = io::stderr();
        write!(stderr, "{message}")?;
        stderr.flush()?;
        let mut line = String::new();
        io::stdin()
            .lock()
            .read_line(&mut line)
            .context("Failed to read from stdin")?;
        Ok(line.trim().to_string())
    }
}
