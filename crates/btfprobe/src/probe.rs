//! Probes: an ordered bundle of fetch args compiled against one symbol.

use crate::arch::Arch;
use crate::btf::{Btf, TypeId};
use crate::errors::Error;
use crate::fetch_arg::FetchArg;

/// The probe flavor, deciding which registers and builder variants apply.
///
/// See the kernel's kprobetrace documentation for the event syntax the
/// compiled strings target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeKind {
    /// Function-entry probe; fetch args read parameter registers.
    KProbe,
    /// Function-return probe; fetch args read the return register.
    KRetProbe,
}

/// A single kprobe or kretprobe declaration.
///
/// Decorate with [`Probe::set_ref`] / [`Probe::set_filter`] and attach fetch
/// args, then hand it to a [`crate::Symbol`]; building the symbol fills in
/// the compiled tracing event string.
#[derive(Debug, Clone)]
pub struct Probe {
    kind: ProbeKind,
    ref_name: String,
    symbol_name: String,
    duplicate_fetch_args: bool,
    fetch_args: Vec<FetchArg>,
    tracing_event_probe: String,
    tracing_event_filter: String,
}

impl Probe {
    /// Declare a function-entry probe.
    pub fn kprobe() -> Probe {
        Probe::new(ProbeKind::KProbe)
    }

    /// Declare a function-return probe.
    pub fn kretprobe() -> Probe {
        Probe::new(ProbeKind::KRetProbe)
    }

    fn new(kind: ProbeKind) -> Probe {
        Probe {
            kind,
            ref_name: String::new(),
            symbol_name: String::new(),
            duplicate_fetch_args: false,
            fetch_args: Vec::new(),
            tracing_event_probe: String::new(),
            tracing_event_filter: String::new(),
        }
    }

    /// Set a reference name distinguishing this probe from others on the same
    /// symbol; it replaces the symbol name in [`Probe::id`].
    pub fn set_ref(mut self, ref_name: impl Into<String>) -> Probe {
        self.ref_name = ref_name.into();
        self
    }

    /// Attach a tracing event filter string. It is stored verbatim; validity
    /// is the caller's concern.
    pub fn set_filter(mut self, filter: impl Into<String>) -> Probe {
        self.tracing_event_filter = filter.into();
        self
    }

    /// Attach fetch args, keeping insertion order. Reusing a name flags the
    /// probe, and building it fails with [`Error::DuplicateFetchArgs`].
    pub fn add_fetch_args(mut self, args: impl IntoIterator<Item = FetchArg>) -> Probe {
        for arg in args {
            if self.fetch_args.iter().any(|a| a.name() == arg.name()) {
                self.duplicate_fetch_args = true;
            }
            self.fetch_args.push(arg);
        }
        self
    }

    /// The symbol this probe was built against; empty before a successful
    /// build.
    pub fn symbol_name(&self) -> &str {
        &self.symbol_name
    }

    /// The compiled tracing event probe string; empty before a successful
    /// build.
    pub fn tracing_event_probe(&self) -> &str {
        &self.tracing_event_probe
    }

    /// The filter string set on this probe, or empty.
    pub fn tracing_event_filter(&self) -> &str {
        &self.tracing_event_filter
    }

    pub fn kind(&self) -> ProbeKind {
        self.kind
    }

    /// Probe identifier: `kprobe_`/`kretprobe_` plus the ref name if set,
    /// else the resolved symbol name.
    pub fn id(&self) -> String {
        let prefix = match self.kind {
            ProbeKind::KProbe => "kprobe_",
            ProbeKind::KRetProbe => "kretprobe_",
        };
        let tail = if self.ref_name.is_empty() {
            &self.symbol_name
        } else {
            &self.ref_name
        };
        format!("{prefix}{tail}")
    }

    pub(crate) fn fetch_args(&self) -> &[FetchArg] {
        &self.fetch_args
    }

    /// Compile every fetch arg in insertion order and join the fragments with
    /// single spaces.
    pub(crate) fn build(
        &mut self,
        symbol_name: &str,
        btf: &Btf,
        func: Option<TypeId>,
        arch: Arch,
    ) -> Result<(), Error> {
        if self.duplicate_fetch_args {
            return Err(Error::DuplicateFetchArgs);
        }

        self.symbol_name = symbol_name.to_string();
        self.tracing_event_probe.clear();

        let kind = self.kind;
        let mut fragments = Vec::with_capacity(self.fetch_args.len());
        for arg in &mut self.fetch_args {
            let fragment = arg.build(btf, kind, func, arch)?;
            if fragment.is_empty() {
                return Err(Error::EmptyFetchArg(arg.name().to_string()));
            }
            fragments.push(fragment);
        }

        self.tracing_event_probe = fragments.join(" ");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btf::Kind;
    use crate::errors::ErrorKind;
    use crate::fetch_arg::Wrap;
    use crate::testutil::test_universe;

    fn build(probe: &mut Probe, symbol: &str) -> Result<(), Error> {
        let btf = test_universe();
        let func = btf.type_by_name(symbol, Kind::Func).ok();
        probe.build(symbol, &btf, func, Arch::Amd64)
    }

    #[test]
    fn test_kprobe_named_params() {
        let mut probe = Probe::kprobe().add_fetch_args([
            FetchArg::new("fa1", "u32").func_param_with_name("dentry_param", &["d_inode", "i_ino"]),
            FetchArg::new("fa2", "string").func_param_with_name("dentry_param", &["d_name", "name"]),
            FetchArg::new("fa3", "u32").func_param_with_name("inode_param", &["i_ino"]),
        ]);
        build(&mut probe, "test_function").unwrap();

        assert_eq!(
            probe.tracing_event_probe(),
            "fa1=+64(+48(%di)):u32 fa2=+0(+40(%di)):string fa3=+64(%si):u32"
        );
        assert_eq!(probe.symbol_name(), "test_function");
        assert_eq!(probe.id(), "kprobe_test_function");
        assert_eq!(probe.kind(), ProbeKind::KProbe);
    }

    #[test]
    fn test_kprobe_arbitrary_and_wrapped_params() {
        let mut probe = Probe::kprobe().add_fetch_args([
            FetchArg::new("fa1", "u32").func_param_arbitrary(
                0,
                Wrap::None,
                &["dentry", "d_inode", "i_ino"],
            ),
            FetchArg::new("fa2", "string").func_param_arbitrary(
                0,
                Wrap::None,
                &["dentry", "d_name", "name"],
            ),
            FetchArg::new("fa3", "u32").func_param_arbitrary(1, Wrap::None, &["inode", "i_ino"]),
            FetchArg::new("fa4", "u32").func_param_arbitrary(
                1,
                Wrap::Pointer,
                &["dentry", "d_inode", "i_ino"],
            ),
            FetchArg::new("fa5", "u32").func_param_arbitrary(
                0,
                Wrap::StructPointer,
                &["dentry", "d_inode", "i_ino"],
            ),
        ]);
        build(&mut probe, "test_function").unwrap();

        assert_eq!(
            probe.tracing_event_probe(),
            "fa1=+64(+48(%di)):u32 fa2=+0(+40(%di)):string fa3=+64(%si):u32 \
             fa4=+64(+48(%si)):u32 fa5=+64(+48(+0(%di))):u32"
        );
    }

    #[test]
    fn test_kprobe_custom_type_params() {
        let mut probe = Probe::kprobe().add_fetch_args([
            FetchArg::new("fa1", "u32").func_param_with_custom_type(
                "dentry_param",
                Wrap::None,
                &["inode", "i_ino"],
            ),
            FetchArg::new("fa2", "u32").func_param_with_custom_type(
                "dentry_param",
                Wrap::Pointer,
                &["inode", "i_ino"],
            ),
            FetchArg::new("fa3", "string").func_param_with_custom_type(
                "dentry_param",
                Wrap::StructPointer,
                &["inode", "i_ino"],
            ),
        ]);
        build(&mut probe, "test_function").unwrap();

        assert_eq!(
            probe.tracing_event_probe(),
            "fa1=+64(%di):u32 fa2=+64(%di):u32 fa3=+0(+64(+0(%di))):string"
        );
    }

    #[test]
    fn test_duplicate_fetch_args() {
        let mut probe = Probe::kprobe().add_fetch_args([
            FetchArg::new("fa1", "u32").func_param_with_name("dentry_param", &["d_inode", "i_ino"]),
            FetchArg::new("fa1", "string").func_param_with_name("dentry_param", &["d_name", "name"]),
        ]);
        let err = build(&mut probe, "test_function").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DuplicateFetchArgs);
    }

    #[test]
    fn test_param_not_found() {
        let mut probe = Probe::kprobe().add_fetch_args([
            FetchArg::new("fa1", "u32").func_param_with_name("unknown", &["i_ino"])
        ]);
        let err = build(&mut probe, "test_function").unwrap_err();
        assert!(err.has_kind(ErrorKind::FuncParamNotFound));
    }

    #[test]
    fn test_field_not_found() {
        let mut probe = Probe::kprobe().add_fetch_args([
            FetchArg::new("fa1", "u32").func_param_with_name("dentry_param", &["unknown", "i_ino"])
        ]);
        let err = build(&mut probe, "test_function").unwrap_err();
        assert!(err.has_kind(ErrorKind::FieldNotFound));

        let mut probe = Probe::kprobe().add_fetch_args([
            FetchArg::new("fa1", "u32").func_param_arbitrary(
                0,
                Wrap::None,
                &["dentry", "unknown", "i_ino"],
            ),
        ]);
        let err = build(&mut probe, "test_function").unwrap_err();
        assert!(err.has_kind(ErrorKind::FieldNotFound));
    }

    #[test]
    fn test_ref_replaces_symbol_in_id() {
        let mut probe = Probe::kprobe()
            .set_ref("test_probe_id")
            .add_fetch_args([FetchArg::new("fa1", "u32")
                .func_param_with_name("dentry_param", &["d_inode", "i_ino"])]);
        build(&mut probe, "test_function").unwrap();
        assert_eq!(probe.id(), "kprobe_test_probe_id");
    }

    #[test]
    fn test_kretprobe_bare_return() {
        let mut probe = Probe::kretprobe()
            .add_fetch_args([FetchArg::new("fa1", "u32").func_return(&[])]);
        build(&mut probe, "test_function").unwrap();
        assert_eq!(probe.tracing_event_probe(), "fa1=%ax:u32");
        assert_eq!(probe.id(), "kretprobe_test_function");
    }

    #[test]
    fn test_kretprobe_return_walk() {
        let mut probe = Probe::kretprobe()
            .add_fetch_args([FetchArg::new("fa1", "u32").func_return(&["d_inode", "i_ino"])]);
        build(&mut probe, "test_function_with_ret").unwrap();
        assert_eq!(probe.tracing_event_probe(), "fa1=+64(+48(%ax)):u32");
    }

    #[test]
    fn test_kretprobe_arbitrary_return_walk() {
        let mut probe = Probe::kretprobe().add_fetch_args([FetchArg::new("fa1", "u32")
            .func_return_arbitrary(Wrap::None, &["dentry", "d_inode", "i_ino"])]);
        build(&mut probe, "test_function_with_ret").unwrap();
        assert_eq!(probe.tracing_event_probe(), "fa1=+64(+48(%ax)):u32");
    }

    #[test]
    fn test_filter_is_stored_verbatim() {
        let mut probe = Probe::kprobe().set_filter("fa1==1").add_fetch_args([
            FetchArg::new("fa1", "u32").func_param_with_name("dentry_param", &["d_inode", "i_ino"]),
        ]);
        build(&mut probe, "test_function").unwrap();
        assert_eq!(probe.tracing_event_filter(), "fa1==1");
    }

    #[test]
    fn test_enum_indexed_array_chain() {
        let mut probe = Probe::kprobe().add_fetch_args([FetchArg::new("pgid", "s32")
            .func_param_with_name(
                "tsk_param",
                &["", "numbers", "enum:an_enum:ENUM_VAL_2", "val"],
            )]);
        build(&mut probe, "test_function_with_ret").unwrap();
        assert_eq!(probe.tracing_event_probe(), "pgid=+4(+48(+4(%dx))):s32");
    }

    #[test]
    fn test_rebuild_produces_identical_output() {
        let mut probe = Probe::kprobe().add_fetch_args([
            FetchArg::new("fa1", "u32").func_param_with_name("dentry_param", &["d_inode", "i_ino"]),
        ]);
        build(&mut probe, "test_function").unwrap();
        let first = probe.tracing_event_probe().to_string();
        build(&mut probe, "test_function").unwrap();
        assert_eq!(probe.tracing_event_probe(), first);
    }
}
