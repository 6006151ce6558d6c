#![doc = include_str!("../README.md")]

mod arch;
mod bitfield;
mod btf;
mod errors;
mod fetch_arg;
mod fields;
mod probe;
mod spec;
mod strip;
mod symbol;
#[cfg(test)]
pub(crate) mod testutil;

pub use arch::Arch;
pub use bitfield::{bit_field_type_mask, BitMask};
pub use errors::{Error, ErrorKind};
pub use fetch_arg::{FetchArg, Wrap};
pub use probe::{Probe, ProbeKind};
pub use spec::{Spec, SpecOptions};
pub use symbol::Symbol;
