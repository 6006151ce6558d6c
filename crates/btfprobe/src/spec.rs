//! The public entry point: a BTF universe plus a target architecture.

use std::fs::{self, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;

use log::debug;

use crate::arch::Arch;
use crate::btf::{Btf, BtfBuilder, Kind};
use crate::errors::Error;
use crate::strip;
use crate::symbol::Symbol;

const KERNEL_BTF_PATH: &str = "/sys/kernel/btf/vmlinux";

/// Options for constructing a [`Spec`].
#[derive(Debug, Clone, Default)]
pub struct SpecOptions {
    /// Target architecture; defaults to the host.
    pub arch: Option<Arch>,
}

/// A loaded BTF universe bound to a target architecture.
///
/// A `Spec` is single-threaded: building reads the universe on the caller's
/// thread, and [`Spec::strip_and_save`] consumes it destructively while
/// installing a deep copy, so the `Spec` stays usable afterwards. Issue
/// builds serially before stripping.
#[derive(Debug)]
pub struct Spec {
    btf: Btf,
    arch: Arch,
}

impl Spec {
    /// Load the running kernel's BTF, with the host architecture.
    pub fn from_kernel() -> Result<Spec, Error> {
        let data = fs::read(KERNEL_BTF_PATH).map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                Error::KernelBtfNotSupported
            } else {
                Error::Io(err)
            }
        })?;
        Spec::from_bytes(&data, Arch::host()?)
    }

    /// Load BTF from a file.
    pub fn from_file(path: impl AsRef<Path>, opts: SpecOptions) -> Result<Spec, Error> {
        let data = fs::read(path)?;
        Spec::from_bytes(&data, resolve_arch(opts)?)
    }

    /// Load BTF from a reader.
    pub fn from_reader<R: Read>(mut reader: R, opts: SpecOptions) -> Result<Spec, Error> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        Spec::from_bytes(&data, resolve_arch(opts)?)
    }

    fn from_bytes(data: &[u8], arch: Arch) -> Result<Spec, Error> {
        let btf = crate::btf::parse(data)?;
        debug!("loaded BTF universe with {} types for {arch}", btf.len());
        Ok(Spec { btf, arch })
    }

    #[cfg(test)]
    pub(crate) fn with_universe(btf: Btf, arch: Arch) -> Spec {
        Spec { btf, arch }
    }

    /// The architecture this spec compiles registers for.
    pub fn arch(&self) -> Arch {
        self.arch
    }

    /// Resolve the symbol and compile all of its probes. On success the
    /// probes' tracing event strings are available through
    /// [`Symbol::probes`].
    pub fn build_symbol(&self, symbol: &mut Symbol) -> Result<(), Error> {
        symbol.build(&self.btf, self.arch)
    }

    /// Whether a function with this name exists in the universe.
    pub fn contains_symbol(&self, name: &str) -> bool {
        self.btf.type_by_name(name, Kind::Func).is_ok()
    }

    /// Prune the universe down to the types and members used by the given
    /// already-built symbols and write it, in BTF wire format, to `path`
    /// (created or truncated, mode 0644).
    ///
    /// The `Spec` keeps a pre-strip copy of the universe, so further builds
    /// against it behave as before; only the file contents are narrowed.
    pub fn strip_and_save(
        &mut self,
        path: impl AsRef<Path>,
        symbols: &[&Symbol],
    ) -> Result<(), Error> {
        let keep = strip::plan(&self.btf, symbols)?;

        // narrow the current universe, serve callers from the copy
        let snapshot = self.btf.clone();
        let mut doomed = std::mem::replace(&mut self.btf, snapshot);
        strip::execute(&mut doomed, &keep);

        let mut builder = BtfBuilder::new(&doomed);
        for id in keep.ids() {
            builder.add(id);
        }
        let bytes = builder.marshal();

        let mut opts = OpenOptions::new();
        opts.create(true).write(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            opts.mode(0o644);
        }
        let mut file = opts.open(path.as_ref())?;
        file.write_all(&bytes)?;
        debug!(
            "stripped BTF written to {} ({} bytes)",
            path.as_ref().display(),
            bytes.len()
        );
        Ok(())
    }
}

fn resolve_arch(opts: SpecOptions) -> Result<Arch, Error> {
    match opts.arch {
        Some(arch) => Ok(arch),
        None => Arch::host(),
    }
}
