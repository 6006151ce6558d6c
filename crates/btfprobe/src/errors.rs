//! Error types for probe building and BTF handling.

use thiserror::Error;

/// Errors that can occur while building probes or stripping BTF.
#[derive(Debug, Error)]
pub enum Error {
    /// The running kernel does not expose BTF.
    #[error("running kernel does not support BTF")]
    KernelBtfNotSupported,

    /// No candidate function name matched a `Func` in the BTF universe.
    #[error("symbol not found in BTF: {0}")]
    SymbolNotFound(String),

    /// A named parameter was not in the prototype, or the function carries no
    /// usable prototype.
    #[error("function parameter not found: {0}")]
    FuncParamNotFound(String),

    /// A member or array element did not exist on the parent type.
    #[error("field not found: {0}")]
    FieldNotFound(String),

    /// A type name did not resolve in the BTF universe.
    #[error("type not found in BTF: {0}")]
    TypeNotFound(String),

    /// The requested parameter index exceeds the architecture register table.
    #[error("unsupported function parameter index: {0}")]
    UnsupportedParamIndex(usize),

    /// The architecture tag is not in the supported set.
    #[error("unsupported architecture: {0}")]
    UnsupportedArch(String),

    /// A fetch-arg builder variant was combined with the wrong probe type,
    /// e.g. a function-return builder on a kprobe.
    #[error("fetch arg incompatible with probe type")]
    IncompatibleFetchArg,

    /// A fetch arg was built without any field builders attached.
    #[error("fetch arg '{0}' has no field builders")]
    MissingFieldBuilders(String),

    /// A builder that derives its start type from its fields got none.
    #[error("missing fields")]
    MissingFields,

    /// Two fetch args on the same probe share a name.
    #[error("duplicate fetch args")]
    DuplicateFetchArgs,

    /// A symbol was declared without any usable candidate names.
    #[error("missing symbol names")]
    MissingSymbolNames,

    /// An array selector was not of the form `index:<N>` or
    /// `enum:<Enum>:<Value>`.
    #[error("invalid array index field: {0}")]
    ArrayIndexInvalidField(String),

    /// A fetch arg compiled to an empty tracing expression.
    #[error("fetch arg '{0}' compiled to an empty tracing expression")]
    EmptyFetchArg(String),

    /// The BTF blob could not be decoded.
    #[error("invalid BTF: {0}")]
    InvalidBtf(String),

    /// File or reader I/O failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Several alternatives failed; all of their errors, in order.
    #[error("{}", join(.0))]
    Multiple(Vec<Error>),
}

/// Discriminant-only view of [`Error`], for membership checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    KernelBtfNotSupported,
    SymbolNotFound,
    FuncParamNotFound,
    FieldNotFound,
    TypeNotFound,
    UnsupportedParamIndex,
    UnsupportedArch,
    IncompatibleFetchArg,
    MissingFieldBuilders,
    MissingFields,
    DuplicateFetchArgs,
    MissingSymbolNames,
    ArrayIndexInvalidField,
    EmptyFetchArg,
    InvalidBtf,
    Io,
    Multiple,
}

impl Error {
    /// The kind of this error, ignoring any payload.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::KernelBtfNotSupported => ErrorKind::KernelBtfNotSupported,
            Error::SymbolNotFound(_) => ErrorKind::SymbolNotFound,
            Error::FuncParamNotFound(_) => ErrorKind::FuncParamNotFound,
            Error::FieldNotFound(_) => ErrorKind::FieldNotFound,
            Error::TypeNotFound(_) => ErrorKind::TypeNotFound,
            Error::UnsupportedParamIndex(_) => ErrorKind::UnsupportedParamIndex,
            Error::UnsupportedArch(_) => ErrorKind::UnsupportedArch,
            Error::IncompatibleFetchArg => ErrorKind::IncompatibleFetchArg,
            Error::MissingFieldBuilders(_) => ErrorKind::MissingFieldBuilders,
            Error::MissingFields => ErrorKind::MissingFields,
            Error::DuplicateFetchArgs => ErrorKind::DuplicateFetchArgs,
            Error::MissingSymbolNames => ErrorKind::MissingSymbolNames,
            Error::ArrayIndexInvalidField(_) => ErrorKind::ArrayIndexInvalidField,
            Error::EmptyFetchArg(_) => ErrorKind::EmptyFetchArg,
            Error::InvalidBtf(_) => ErrorKind::InvalidBtf,
            Error::Io(_) => ErrorKind::Io,
            Error::Multiple(_) => ErrorKind::Multiple,
        }
    }

    /// Whether this error, or any error joined into it, has the given kind.
    ///
    /// Builder alternatives and symbol candidates accumulate their failures
    /// into [`Error::Multiple`]; this recurses through those.
    pub fn has_kind(&self, kind: ErrorKind) -> bool {
        if self.kind() == kind {
            return true;
        }
        match self {
            Error::Multiple(errs) => errs.iter().any(|e| e.has_kind(kind)),
            _ => false,
        }
    }

    /// Collapse accumulated errors: one error stays itself, several join
    /// into [`Error::Multiple`].
    pub(crate) fn from_vec(mut errs: Vec<Error>) -> Error {
        match errs.len() {
            1 => errs.remove(0),
            _ => Error::Multiple(errs),
        }
    }
}

fn join(errs: &[Error]) -> String {
    errs.iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_kind_flattens_joined_errors() {
        let err = Error::Multiple(vec![
            Error::SymbolNotFound("a".into()),
            Error::Multiple(vec![Error::FieldNotFound("b".into())]),
        ]);

        assert!(err.has_kind(ErrorKind::Multiple));
        assert!(err.has_kind(ErrorKind::SymbolNotFound));
        assert!(err.has_kind(ErrorKind::FieldNotFound));
        assert!(!err.has_kind(ErrorKind::DuplicateFetchArgs));
    }

    #[test]
    fn test_from_vec_keeps_single_error_flat() {
        let err = Error::from_vec(vec![Error::MissingFields]);
        assert_eq!(err.kind(), ErrorKind::MissingFields);
    }

    #[test]
    fn test_joined_display() {
        let err = Error::Multiple(vec![
            Error::SymbolNotFound("foo".into()),
            Error::SymbolNotFound("bar".into()),
        ]);
        assert_eq!(
            err.to_string(),
            "symbol not found in BTF: foo; symbol not found in BTF: bar"
        );
    }
}
