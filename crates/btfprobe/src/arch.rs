//! Architecture tags and the kprobe argument register tables.
//!
//! The kernel's kprobe fetch syntax names registers per architecture; a
//! parameter index maps to the calling-convention register that carries that
//! argument at function entry, and return probes read the return-value
//! register. Entries past the register file (386) spill to `$stackN`.

use std::fmt;
use std::str::FromStr;

use crate::errors::Error;

/// A supported target architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arch {
    /// x86-64.
    Amd64,
    /// 64-bit ARM.
    Arm64,
    /// 32-bit x86.
    I386,
}

const AMD64_PARAMS: [&str; 6] = ["%di", "%si", "%dx", "%cx", "%r8", "%r9"];
const ARM64_PARAMS: [&str; 6] = ["%x0", "%x1", "%x2", "%x3", "%x4", "%x5"];
const I386_PARAMS: [&str; 6] = ["%ax", "%dx", "%cx", "$stack1", "$stack2", "$stack3"];

impl Arch {
    /// Detect the architecture this binary runs on.
    pub fn host() -> Result<Arch, Error> {
        match std::env::consts::ARCH {
            "x86_64" => Ok(Arch::Amd64),
            "aarch64" => Ok(Arch::Arm64),
            "x86" => Ok(Arch::I386),
            other => Err(Error::UnsupportedArch(other.to_string())),
        }
    }

    /// The register holding the function parameter at `index`.
    pub(crate) fn param_register(self, index: usize) -> Result<&'static str, Error> {
        let table = match self {
            Arch::Amd64 => &AMD64_PARAMS,
            Arch::Arm64 => &ARM64_PARAMS,
            Arch::I386 => &I386_PARAMS,
        };
        table
            .get(index)
            .copied()
            .ok_or(Error::UnsupportedParamIndex(index))
    }

    /// The register holding the function return value.
    pub(crate) fn return_register(self) -> &'static str {
        match self {
            Arch::Amd64 => "%ax",
            Arch::Arm64 => "%x0",
            Arch::I386 => "%ax",
        }
    }
}

impl FromStr for Arch {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "amd64" => Ok(Arch::Amd64),
            "arm64" => Ok(Arch::Arm64),
            "386" => Ok(Arch::I386),
            other => Err(Error::UnsupportedArch(other.to_string())),
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arch::Amd64 => f.write_str("amd64"),
            Arch::Arm64 => f.write_str("arm64"),
            Arch::I386 => f.write_str("386"),
        }
    }
}
