//! Fetch args and their field builders.
//!
//! A fetch arg names one value captured at the probe site and carries an
//! ordered list of builder alternatives. Builders resolve a selector chain
//! against the BTF universe in different ways: from a prototype parameter,
//! from an arbitrary register index, or from the return value, optionally
//! re-framing the start type when the prototype is missing or lies (`void *`
//! parameters). The first alternative that resolves wins.

use log::debug;

use crate::arch::Arch;
use crate::btf::{Btf, FuncParam, TypeId, TypeNode};
use crate::errors::Error;
use crate::fields::{
    build_fields, build_fields_with_wrap, fields_from_names, tracing_event_from_fields, Field,
};
use crate::probe::ProbeKind;

/// How the starting type of a selector chain is framed when it is synthesized
/// from a field name instead of taken from a function prototype.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Wrap {
    /// The named type is used as-is.
    #[default]
    None,
    /// The named type is wrapped in a pointer to it.
    Pointer,
    /// The named type becomes the pointer-typed sole member, at offset 0, of
    /// a synthetic struct; this forces an extra dereference.
    StructPointer,
}

/// One way of resolving a fetch arg's selector chain.
#[derive(Debug, Clone)]
pub(crate) enum FieldsBuilder {
    /// Prototype parameter matched by name; walk starts at its declared type.
    ParamByName {
        param: String,
        found_index: Option<usize>,
        fields: Vec<Field>,
    },
    /// Arbitrary parameter index; the first field names the starting type.
    ParamAtIndex {
        index: usize,
        wrap: Wrap,
        fields: Vec<Field>,
    },
    /// Prototype parameter matched by name for the register index only; the
    /// declared type is discarded and the first field names the real one.
    ParamCustomType {
        param: String,
        found_index: Option<usize>,
        wrap: Wrap,
        fields: Vec<Field>,
    },
    /// Return value; walk starts at the prototype's return type.
    Return { fields: Vec<Field> },
    /// Return value with the first field naming the starting type.
    ReturnArbitrary { wrap: Wrap, fields: Vec<Field> },
}

impl FieldsBuilder {
    fn build(
        &mut self,
        btf: &Btf,
        probe_kind: ProbeKind,
        func: Option<TypeId>,
        arch: Arch,
    ) -> Result<String, Error> {
        match self {
            FieldsBuilder::ParamByName {
                param,
                found_index,
                fields,
            } => {
                if probe_kind != ProbeKind::KProbe {
                    return Err(Error::IncompatibleFetchArg);
                }
                let (_, params) = resolve_proto(btf, func)?;
                let (index, param_type) = named_param(params, param)?;
                *found_index = Some(index);
                build_fields(btf, param_type, fields)?;
                tracing_event_from_fields(probe_kind, index, fields, arch)
            }
            FieldsBuilder::ParamAtIndex {
                index,
                wrap,
                fields,
            } => {
                if probe_kind != ProbeKind::KProbe {
                    return Err(Error::IncompatibleFetchArg);
                }
                build_fields_with_wrap(btf, *wrap, fields)?;
                tracing_event_from_fields(probe_kind, *index, fields, arch)
            }
            FieldsBuilder::ParamCustomType {
                param,
                found_index,
                wrap,
                fields,
            } => {
                if probe_kind != ProbeKind::KProbe {
                    return Err(Error::IncompatibleFetchArg);
                }
                let (_, params) = resolve_proto(btf, func)?;
                let (index, _) = named_param(params, param)?;
                *found_index = Some(index);
                build_fields_with_wrap(btf, *wrap, fields)?;
                tracing_event_from_fields(probe_kind, index, fields, arch)
            }
            FieldsBuilder::Return { fields } => {
                if probe_kind != ProbeKind::KRetProbe {
                    return Err(Error::IncompatibleFetchArg);
                }
                let (ret, _) = resolve_proto(btf, func)?;
                build_fields(btf, ret, fields)?;
                tracing_event_from_fields(probe_kind, 0, fields, arch)
            }
            FieldsBuilder::ReturnArbitrary { wrap, fields } => {
                if probe_kind != ProbeKind::KRetProbe {
                    return Err(Error::IncompatibleFetchArg);
                }
                build_fields_with_wrap(btf, *wrap, fields)?;
                tracing_event_from_fields(probe_kind, 0, fields, arch)
            }
        }
    }

    pub(crate) fn fields(&self) -> &[Field] {
        match self {
            FieldsBuilder::ParamByName { fields, .. }
            | FieldsBuilder::ParamAtIndex { fields, .. }
            | FieldsBuilder::ParamCustomType { fields, .. }
            | FieldsBuilder::Return { fields }
            | FieldsBuilder::ReturnArbitrary { fields, .. } => fields,
        }
    }

    pub(crate) fn wrap(&self) -> Wrap {
        match self {
            FieldsBuilder::ParamAtIndex { wrap, .. }
            | FieldsBuilder::ParamCustomType { wrap, .. }
            | FieldsBuilder::ReturnArbitrary { wrap, .. } => *wrap,
            _ => Wrap::None,
        }
    }
}

/// The function's prototype: return type and parameters.
fn resolve_proto<'a>(
    btf: &'a Btf,
    func: Option<TypeId>,
) -> Result<(TypeId, &'a [FuncParam]), Error> {
    let func_id = func.ok_or_else(|| {
        Error::FuncParamNotFound("function prototype unavailable".to_string())
    })?;
    let TypeNode::Func { name, proto, .. } = btf.node(func_id) else {
        return Err(Error::FuncParamNotFound(format!(
            "'{}' is not a function",
            btf.type_name(func_id)
        )));
    };
    match btf.node(*proto) {
        TypeNode::FuncProto { ret, params } => Ok((*ret, params.as_slice())),
        _ => Err(Error::FuncParamNotFound(format!(
            "'{name}' has no function prototype"
        ))),
    }
}

fn named_param(params: &[FuncParam], name: &str) -> Result<(usize, TypeId), Error> {
    params
        .iter()
        .enumerate()
        .find(|(_, p)| p.name == name)
        .map(|(index, p)| (index, p.type_id))
        .ok_or_else(|| Error::FuncParamNotFound(name.to_string()))
}

/// A named value captured at the probe site, with builder alternatives.
#[derive(Debug, Clone)]
pub struct FetchArg {
    name: String,
    arg_type: String,
    builders: Vec<FieldsBuilder>,
    btf_func: Option<TypeId>,
    successful: Option<usize>,
}

impl FetchArg {
    /// Declare a fetch arg with a tracefs type tag: one of the primitive
    /// tokens (`u8` … `s64`, `string`) or a bitfield tag from
    /// [`crate::bit_field_type_mask`].
    ///
    /// Builders must be attached before the probe is built; a fetch arg with
    /// none fails with [`Error::MissingFieldBuilders`]. Alternatives are
    /// tried in the order they were attached and the first that resolves
    /// wins.
    pub fn new(name: impl Into<String>, arg_type: impl Into<String>) -> FetchArg {
        FetchArg {
            name: name.into(),
            arg_type: arg_type.into(),
            builders: Vec::new(),
            btf_func: None,
            successful: None,
        }
    }

    /// Resolve a prototype parameter by name and walk `fields` from its
    /// declared type. KProbe only.
    pub fn func_param_with_name(mut self, param_name: &str, fields: &[&str]) -> FetchArg {
        self.builders.push(FieldsBuilder::ParamByName {
            param: param_name.to_string(),
            found_index: None,
            fields: fields_from_names(fields),
        });
        self
    }

    /// Use an arbitrary parameter index without consulting the prototype;
    /// `fields[0]` names the starting type, framed by `wrap`. KProbe only.
    pub fn func_param_arbitrary(
        mut self,
        param_index: usize,
        wrap: Wrap,
        fields: &[&str],
    ) -> FetchArg {
        self.builders.push(FieldsBuilder::ParamAtIndex {
            index: param_index,
            wrap,
            fields: fields_from_names(fields),
        });
        self
    }

    /// Resolve a prototype parameter by name for its index only, overriding
    /// its declared type with `fields[0]`. Useful for `void *` parameters.
    /// KProbe only.
    pub fn func_param_with_custom_type(
        mut self,
        param_name: &str,
        wrap: Wrap,
        fields: &[&str],
    ) -> FetchArg {
        self.builders.push(FieldsBuilder::ParamCustomType {
            param: param_name.to_string(),
            found_index: None,
            wrap,
            fields: fields_from_names(fields),
        });
        self
    }

    /// Walk `fields` from the prototype's return type. KRetProbe only.
    pub fn func_return(mut self, fields: &[&str]) -> FetchArg {
        self.builders.push(FieldsBuilder::Return {
            fields: fields_from_names(fields),
        });
        self
    }

    /// Walk the return value with `fields[0]` naming its type. KRetProbe
    /// only.
    pub fn func_return_arbitrary(mut self, wrap: Wrap, fields: &[&str]) -> FetchArg {
        self.builders.push(FieldsBuilder::ReturnArbitrary {
            wrap,
            fields: fields_from_names(fields),
        });
        self
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn btf_func(&self) -> Option<TypeId> {
        self.btf_func
    }

    pub(crate) fn successful_builder(&self) -> Option<&FieldsBuilder> {
        self.successful.map(|index| &self.builders[index])
    }

    /// Try each builder in order; the first fragment that resolves becomes
    /// this arg's fetch expression, formatted with the type tag. `string`
    /// args gain the leading `+0(…)` dereference the kernel requires.
    pub(crate) fn build(
        &mut self,
        btf: &Btf,
        probe_kind: ProbeKind,
        func: Option<TypeId>,
        arch: Arch,
    ) -> Result<String, Error> {
        if self.builders.is_empty() {
            return Err(Error::MissingFieldBuilders(self.name.clone()));
        }

        self.btf_func = func;
        self.successful = None;

        let mut errors = Vec::new();
        for (index, builder) in self.builders.iter_mut().enumerate() {
            match builder.build(btf, probe_kind, func, arch) {
                Ok(expr) => {
                    self.successful = Some(index);
                    let rendered = if self.arg_type == "string" {
                        format!("{}=+0({}):string", self.name, expr)
                    } else {
                        format!("{}={}:{}", self.name, expr, self.arg_type)
                    };
                    return Ok(rendered);
                }
                Err(err) => {
                    debug!(
                        "fetch arg '{}': builder {} failed: {}",
                        self.name, index, err
                    );
                    errors.push(err);
                }
            }
        }

        Err(Error::from_vec(errors))
    }
}
