//! Resolving selector chains over BTF types into byte offsets.
//!
//! A selector chain addresses one value reachable from a starting type:
//! struct/union members by name, array elements by `index:<N>` or
//! `enum:<Enum>:<Value>`, with pointers opening a new dereference frame.
//! Offsets accumulate in bits while walking (BTF member offsets are bits) and
//! convert to bytes at each dereference boundary.

use log::trace;

use crate::arch::Arch;
use crate::btf::{Btf, Kind, TypeId, TypeNode};
use crate::errors::Error;
use crate::fetch_arg::Wrap;
use crate::probe::ProbeKind;

/// One resolved step of a selector chain.
#[derive(Debug, Clone, Default)]
pub(crate) struct Field {
    pub name: String,
    /// Byte offset inside the current dereference frame.
    pub offset: u32,
    pub seen: bool,
    /// Whether this step contributes a `+off(` dereference to the fetch
    /// expression. Composite steps merge into their parent's frame instead.
    pub include_in_offset: bool,
    /// The type owning the member this step selected; `None` for synthetic
    /// wrap frames, which exist in no universe.
    pub parent_type: Option<TypeId>,
    /// The type this step resolved to (pointers already dereferenced).
    pub target_type: Option<TypeId>,
}

impl Field {
    fn reset(&mut self) {
        self.offset = 0;
        self.seen = false;
        self.include_in_offset = false;
        self.parent_type = None;
        self.target_type = None;
    }
}

/// Initialize a selector chain from field names.
pub(crate) fn fields_from_names(names: &[&str]) -> Vec<Field> {
    names
        .iter()
        .map(|name| Field {
            name: (*name).to_string(),
            ..Field::default()
        })
        .collect()
}

/// Resolve `fields` starting from an existing BTF type.
pub(crate) fn build_fields(btf: &Btf, start: TypeId, fields: &mut [Field]) -> Result<(), Error> {
    for field in fields.iter_mut() {
        field.reset();
    }
    build_fields_recursive(btf, start, 0, fields)
}

/// Resolve `fields` where the first field names the starting type, framed
/// according to `wrap`.
///
/// When several types share the name, a struct wins over the rest; otherwise
/// the first match is used.
pub(crate) fn build_fields_with_wrap(
    btf: &Btf,
    wrap: Wrap,
    fields: &mut [Field],
) -> Result<(), Error> {
    for field in fields.iter_mut() {
        field.reset();
    }
    let Some((first, rest)) = fields.split_first_mut() else {
        return Err(Error::MissingFields);
    };

    let candidates = btf.any_types_by_name(&first.name).map_err(|err| {
        Error::Multiple(vec![Error::FieldNotFound(first.name.clone()), err])
    })?;
    let target = candidates
        .iter()
        .copied()
        .find(|id| matches!(btf.node(*id), TypeNode::Struct { .. }))
        .unwrap_or(candidates[0]);

    match wrap {
        // The first field only names the type. A pointer wrap dereferences
        // into the same type without adding an offset term, so both frames
        // walk identically.
        Wrap::None | Wrap::Pointer => {
            first.seen = true;
            first.include_in_offset = false;
            first.target_type = Some(target);
            build_fields_recursive(btf, target, 0, rest)
        }
        // The first field doubles as the single member of a synthetic
        // struct, a pointer to the target at offset 0. Landing on that
        // pointer member emits the extra `+0(` frame.
        Wrap::StructPointer => {
            first.seen = true;
            first.include_in_offset = true;
            first.offset = 0;
            first.target_type = Some(target);
            build_fields_recursive(btf, target, 0, rest)
        }
    }
}

fn build_fields_recursive(
    btf: &Btf,
    parent: TypeId,
    parent_off_bits: u64,
    fields: &mut [Field],
) -> Result<(), Error> {
    if fields.is_empty() {
        return Ok(());
    }

    match btf.node(parent) {
        // entering a pointee starts a fresh frame
        TypeNode::Pointer { target } => build_fields_recursive(btf, *target, 0, fields),
        TypeNode::Const { inner } | TypeNode::Typedef { inner, .. } => {
            build_fields_recursive(btf, *inner, parent_off_bits, fields)
        }
        TypeNode::Struct { members, .. } | TypeNode::Union { members, .. } => {
            let member = members
                .iter()
                .find(|m| m.name == fields[0].name)
                .ok_or_else(|| Error::FieldNotFound(fields[0].name.clone()))?;
            trace!(
                "field '{}' of '{}': member at {} bits",
                fields[0].name,
                btf.type_name(parent),
                member.offset_bits
            );
            step_into(
                btf,
                parent,
                member.type_id,
                parent_off_bits + member.offset_bits as u64,
                fields,
            )
        }
        TypeNode::Array { elem, nelems, .. } => {
            let index = array_index(btf, &fields[0].name)?;
            if index >= *nelems {
                return Err(Error::FieldNotFound(fields[0].name.clone()));
            }
            let stride_bits = btf.elem_size_bytes(*elem) as u64 * 8;
            trace!(
                "field '{}': array element {} of {}, stride {} bits",
                fields[0].name,
                index,
                nelems,
                stride_bits
            );
            step_into(
                btf,
                parent,
                *elem,
                parent_off_bits + stride_bits * index as u64,
                fields,
            )
        }
        _ => Err(Error::FieldNotFound(fields[0].name.clone())),
    }
}

/// Record the step landing on `target` and continue or terminate depending on
/// its kind.
fn step_into(
    btf: &Btf,
    parent: TypeId,
    target: TypeId,
    total_off_bits: u64,
    fields: &mut [Field],
) -> Result<(), Error> {
    let (field, rest) = match fields.split_first_mut() {
        Some(split) => split,
        None => return Ok(()),
    };

    match btf.node(target) {
        TypeNode::Pointer { target: pointee } => {
            field.offset = bits_to_bytes(total_off_bits)?;
            field.seen = true;
            field.include_in_offset = true;
            field.target_type = Some(*pointee);
            field.parent_type = Some(parent);
            build_fields_recursive(btf, *pointee, 0, rest)
        }
        TypeNode::Struct { .. }
        | TypeNode::Union { .. }
        | TypeNode::Array { .. }
        | TypeNode::Const { .. }
        | TypeNode::Typedef { .. } => {
            field.seen = true;
            field.include_in_offset = false;
            field.target_type = Some(target);
            field.parent_type = Some(parent);
            build_fields_recursive(btf, target, total_off_bits, rest)
        }
        _ => {
            field.offset = bits_to_bytes(total_off_bits)?;
            field.seen = true;
            field.include_in_offset = true;
            field.target_type = Some(target);
            field.parent_type = Some(parent);
            Ok(())
        }
    }
}

/// Parse an array selector: `index:<N>` or `enum:<Enum>:<Value>`.
fn array_index(btf: &Btf, selector: &str) -> Result<u32, Error> {
    if let Some(literal) = selector.strip_prefix("index:") {
        return literal
            .parse::<u32>()
            .map_err(|_| Error::ArrayIndexInvalidField(selector.to_string()));
    }
    if let Some(spec) = selector.strip_prefix("enum:") {
        let (enum_name, value_name) = spec
            .split_once(':')
            .filter(|(name, value)| !name.is_empty() && !value.contains(':') && !value.is_empty())
            .ok_or_else(|| Error::ArrayIndexInvalidField(selector.to_string()))?;
        let enum_id = btf.type_by_name(enum_name, Kind::Enum)?;
        let TypeNode::Enum { values, .. } = btf.node(enum_id) else {
            return Err(Error::TypeNotFound(enum_name.to_string()));
        };
        let value = values
            .iter()
            .find(|v| v.name == value_name)
            .ok_or_else(|| Error::FieldNotFound(selector.to_string()))?;
        return u32::try_from(value.value)
            .map_err(|_| Error::ArrayIndexInvalidField(selector.to_string()));
    }
    Err(Error::ArrayIndexInvalidField(selector.to_string()))
}

/// BTF member offsets are byte-aligned unless the member is a bitfield; a
/// non-aligned offset reaching the emitter means the chain landed inside a
/// bitfield, which the fetch syntax cannot address by offset.
fn bits_to_bytes(bits: u64) -> Result<u32, Error> {
    if bits % 8 != 0 {
        return Err(Error::InvalidBtf(format!(
            "offset {bits} bits is not byte-aligned"
        )));
    }
    Ok((bits / 8) as u32)
}

/// Render resolved fields plus the chosen register as a fetch expression:
/// `+o_k(…+o_1(REG)…)`, innermost offset first in the walk order.
pub(crate) fn tracing_event_from_fields(
    probe_kind: ProbeKind,
    param_index: usize,
    fields: &[Field],
    arch: Arch,
) -> Result<String, Error> {
    let register = match probe_kind {
        ProbeKind::KRetProbe => arch.return_register(),
        ProbeKind::KProbe => arch.param_register(param_index)?,
    };

    let mut expr = String::new();
    let mut opened = 0;
    for field in fields.iter().rev() {
        if !field.seen {
            return Err(Error::FieldNotFound(field.name.clone()));
        }
        if !field.include_in_offset {
            continue;
        }
        expr.push('+');
        expr.push_str(&field.offset.to_string());
        expr.push('(');
        opened += 1;
    }
    expr.push_str(register);
    for _ in 0..opened {
        expr.push(')');
    }
    Ok(expr)
}
