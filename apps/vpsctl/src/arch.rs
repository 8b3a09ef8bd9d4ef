use anyhow::{bail, Result};

/// CPU architectures with published node-core and wgcf builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arch {
    Amd64,
    Arm64,
}

impl Arch {
    /// Maps the identifier reported by `uname -m` (or dpkg) to a supported tag.
    pub fn from_machine(raw: &str) -> Result<Self> {
        match raw.trim() {
            "x86_64" | "amd64" => Ok(Self::Amd64),
            "aarch64" | "arm64" => Ok(Self::Arm64),
            other => bail!("Unsupported CPU architecture: {other:?} (expected x86_64/amd64 or aarch64/arm64)"),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Amd64 => "amd64",
            Self::Arm64 => "arm64",
        }
    }
}

impl std::fmt::Display for Arch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_machine_names_map_to_two_tags() {
        assert_eq!(Arch::from_machine("x86_64").unwrap(), Arch::Amd64);
        assert_eq!(Arch::from_machine("amd64\n").unwrap(), Arch::Amd64);
        assert_eq!(Arch::from_machine("aarch64").unwrap(), Arch::Arm64);
        assert_eq!(Arch::from_machine("arm64").unwrap(), Arch::Arm64);
    }

    #[test]
    fn other_machine_names_are_rejected() {
        for raw in ["armv7l", "i686", "riscv64", ""] {
            let err = Arch::from_machine(raw).unwrap_err();
            assert!(err.to_string().contains("Unsupported CPU architecture"));
        }
    }
}
