use anyhow::{bail, Result};
use tracing::info;

use crate::arch::Arch;
use crate::host::{run_checked, CommandSpec, Host};

pub fn ensure_root(host: &dyn Host) -> Result<()> {
    let euid = host.effective_uid();
    if euid != 0 {
        bail!("vpsctl must run as root (effective uid {euid}); re-run with sudo");
    }
    Ok(())
}

pub fn detect_arch(host: &dyn Host) -> Result<Arch> {
    let result = run_checked(host, &CommandSpec::new("uname").arg("-m").capture())?;
    let arch = Arch::from_machine(&result.stdout)?;
    info!(machine = %result.stdout, %arch, "detected architecture");
    Ok(arch)
}
