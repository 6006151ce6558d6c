//! Symbols: candidate function names plus their attached probes.

use log::debug;

use crate::arch::Arch;
use crate::btf::{Btf, Kind, TypeId};
use crate::errors::Error;
use crate::probe::Probe;

/// A function symbol to probe, tried under one or more candidate names.
///
/// Kernels rename and inline; declaring several candidates (for example
/// `vfs_getattr_nosec` then `vfs_getattr`) lets one declaration cover a range
/// of kernel versions. The first candidate that resolves to a BTF `Func`
/// wins, and BTF's spelling of the name is authoritative.
#[derive(Debug, Clone)]
pub struct Symbol {
    names: Vec<String>,
    probes: Vec<Probe>,
    skip_validation: bool,
    resolved_name: String,
}

impl Symbol {
    /// Declare a symbol with candidate names, tried in order. Names are
    /// trimmed; whitespace-only entries are dropped.
    pub fn new<I, S>(names: I) -> Symbol
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Symbol {
            names: collect_names(names),
            probes: Vec::new(),
            skip_validation: false,
            resolved_name: String::new(),
        }
    }

    /// Declare a symbol that is assumed to exist: resolution skips the BTF
    /// lookup and the name is used verbatim. Only works when no attached
    /// probe needs the function prototype.
    pub fn without_validation(name: &str) -> Symbol {
        Symbol {
            names: collect_names([name]),
            probes: Vec::new(),
            skip_validation: true,
            resolved_name: String::new(),
        }
    }

    /// Attach probes, keeping order.
    pub fn add_probes(mut self, probes: impl IntoIterator<Item = Probe>) -> Symbol {
        self.probes.extend(probes);
        self
    }

    /// The resolved symbol name; empty before a successful build.
    pub fn symbol_name(&self) -> &str {
        &self.resolved_name
    }

    pub fn probes(&self) -> &[Probe] {
        &self.probes
    }

    pub(crate) fn build(&mut self, btf: &Btf, arch: Arch) -> Result<(), Error> {
        if self.names.is_empty() {
            return Err(Error::MissingSymbolNames);
        }

        let mut func: Option<TypeId> = None;
        if self.skip_validation {
            self.resolved_name = self.names[0].clone();
        } else {
            let mut errors = Vec::new();
            for name in &self.names {
                match btf.type_by_name(name, Kind::Func) {
                    Ok(id) => {
                        func = Some(id);
                        break;
                    }
                    Err(err) => {
                        debug!("symbol candidate '{name}' not in BTF: {err}");
                        errors.push(Error::SymbolNotFound(name.clone()));
                    }
                }
            }
            let Some(func_id) = func else {
                return Err(Error::from_vec(errors));
            };
            self.resolved_name = btf.type_name(func_id).to_string();
            debug!("symbol resolved to '{}'", self.resolved_name);
        }

        let resolved = self.resolved_name.clone();
        for probe in &mut self.probes {
            probe.build(&resolved, btf, func, arch)?;
        }
        Ok(())
    }
}

fn collect_names<I, S>(names: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    names
        .into_iter()
        .filter_map(|name| {
            let trimmed = name.as_ref().trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        })
        .collect()
}
