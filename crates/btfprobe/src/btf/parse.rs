//! BTF wire-format decoder.
//!
//! Layout: a 24-byte header (magic selects the byte order), a type section of
//! variable-length `btf_type` records, and a NUL-terminated string section.
//! Section offsets are relative to the end of the header. Record references
//! use the implicit sequential type IDs, with 0 reserved for `Void`, which is
//! exactly how the arena indexes its nodes.

use nom::error::ErrorKind;
use nom::multi::count;
use nom::number::complete::{i32, u16, u32, u8};
use nom::number::Endianness;
use nom::sequence::tuple;
use nom::{Finish, IResult};

use super::{Btf, EnumValue, FuncParam, Linkage, Member, TypeId, TypeNode, VarSecInfo};
use crate::errors::Error;

const MAGIC_LE: u16 = 0xeb9f;
const MAGIC_BE: u16 = 0x9feb;
const HEADER_LEN: usize = 24;

const KIND_INT: u32 = 1;
const KIND_PTR: u32 = 2;
const KIND_ARRAY: u32 = 3;
const KIND_STRUCT: u32 = 4;
const KIND_UNION: u32 = 5;
const KIND_ENUM: u32 = 6;
const KIND_FWD: u32 = 7;
const KIND_TYPEDEF: u32 = 8;
const KIND_VOLATILE: u32 = 9;
const KIND_CONST: u32 = 10;
const KIND_RESTRICT: u32 = 11;
const KIND_FUNC: u32 = 12;
const KIND_FUNC_PROTO: u32 = 13;
const KIND_VAR: u32 = 14;
const KIND_DATASEC: u32 = 15;
const KIND_FLOAT: u32 = 16;
const KIND_DECL_TAG: u32 = 17;
const KIND_TYPE_TAG: u32 = 18;
const KIND_ENUM64: u32 = 19;

struct Header {
    version: u8,
    hdr_len: u32,
    type_off: u32,
    type_len: u32,
    str_off: u32,
    str_len: u32,
}

/// Decode a BTF blob into a universe.
pub(crate) fn parse(data: &[u8]) -> Result<Btf, Error> {
    let (after_magic, en) = finish(parse_magic(data))?;
    let (after_header, hdr) = finish(parse_header(after_magic, en))?;

    if hdr.version != 1 {
        return Err(invalid(format!("unsupported BTF version {}", hdr.version)));
    }
    let extra = (hdr.hdr_len as usize)
        .checked_sub(HEADER_LEN)
        .ok_or_else(|| invalid(format!("header length {} too short", hdr.hdr_len)))?;
    let body = after_header
        .get(extra..)
        .ok_or_else(|| invalid("truncated header".to_string()))?;

    let types = section(body, hdr.type_off, hdr.type_len, "type")?;
    let strings = section(body, hdr.str_off, hdr.str_len, "string")?;
    if strings.first() != Some(&0) {
        return Err(invalid("string section must start with NUL".to_string()));
    }

    let mut btf = Btf::new();
    let mut input = types;
    while !input.is_empty() {
        input = parse_type(&mut btf, input, strings, en)?;
    }
    validate_references(&btf)?;
    Ok(btf)
}

fn parse_magic(input: &[u8]) -> IResult<&[u8], Endianness> {
    let (input, magic) = u16(Endianness::Little)(input)?;
    match magic {
        MAGIC_LE => Ok((input, Endianness::Little)),
        MAGIC_BE => Ok((input, Endianness::Big)),
        _ => Err(nom::Err::Error(nom::error::Error::new(
            input,
            ErrorKind::Tag,
        ))),
    }
}

fn parse_header(input: &[u8], en: Endianness) -> IResult<&[u8], Header> {
    let (input, (version, _flags, hdr_len, type_off, type_len, str_off, str_len)) =
        tuple((u8, u8, u32(en), u32(en), u32(en), u32(en), u32(en)))(input)?;
    Ok((
        input,
        Header {
            version,
            hdr_len,
            type_off,
            type_len,
            str_off,
            str_len,
        },
    ))
}

fn section<'a>(body: &'a [u8], off: u32, len: u32, what: &str) -> Result<&'a [u8], Error> {
    let start = off as usize;
    let end = start
        .checked_add(len as usize)
        .filter(|end| *end <= body.len())
        .ok_or_else(|| invalid(format!("{what} section out of bounds")))?;
    Ok(&body[start..end])
}

/// Decode one `btf_type` record plus its kind-specific trailer.
fn parse_type<'a>(
    btf: &mut Btf,
    input: &'a [u8],
    strings: &[u8],
    en: Endianness,
) -> Result<&'a [u8], Error> {
    let (input, (name_off, info, size_or_type)) =
        finish(tuple((u32(en), u32(en), u32(en)))(input))?;
    let name = lookup_str(strings, name_off)?;
    let kind = (info >> 24) & 0x1f;
    let vlen = (info & 0xffff) as usize;
    let kflag = (info >> 31) != 0;

    let (input, node) = match kind {
        KIND_INT => {
            let (input, enc) = finish(u32(en)(input))?;
            let encoding = (enc >> 24) & 0xf;
            (
                input,
                TypeNode::Int {
                    name,
                    size: size_or_type,
                    signed: encoding & 0x1 != 0,
                    is_char: encoding & 0x2 != 0,
                    is_bool: encoding & 0x4 != 0,
                    nr_bits: (enc & 0xff) as u8,
                },
            )
        }
        KIND_PTR => (
            input,
            TypeNode::Pointer {
                target: TypeId(size_or_type),
            },
        ),
        KIND_ARRAY => {
            let (input, (elem, index, nelems)) = finish(tuple((u32(en), u32(en), u32(en)))(input))?;
            (
                input,
                TypeNode::Array {
                    elem: TypeId(elem),
                    index: TypeId(index),
                    nelems,
                },
            )
        }
        KIND_STRUCT | KIND_UNION => {
            let (input, members) =
                finish(count(|i| parse_member(i, strings, en, kflag), vlen)(input))?;
            let node = if kind == KIND_STRUCT {
                TypeNode::Struct {
                    name,
                    size: size_or_type,
                    members,
                }
            } else {
                TypeNode::Union {
                    name,
                    size: size_or_type,
                    members,
                }
            };
            (input, node)
        }
        KIND_ENUM => {
            let (input, values) =
                finish(count(|i| parse_enum_value32(i, strings, en), vlen)(input))?;
            (
                input,
                TypeNode::Enum {
                    name,
                    size: size_or_type,
                    signed: kflag,
                    is64: false,
                    values,
                },
            )
        }
        KIND_ENUM64 => {
            let (input, values) =
                finish(count(|i| parse_enum_value64(i, strings, en), vlen)(input))?;
            (
                input,
                TypeNode::Enum {
                    name,
                    size: size_or_type,
                    signed: kflag,
                    is64: true,
                    values,
                },
            )
        }
        KIND_FWD => (
            input,
            TypeNode::Fwd {
                name,
                is_union: kflag,
            },
        ),
        KIND_TYPEDEF => (
            input,
            TypeNode::Typedef {
                name,
                inner: TypeId(size_or_type),
            },
        ),
        KIND_VOLATILE => (
            input,
            TypeNode::Volatile {
                inner: TypeId(size_or_type),
            },
        ),
        KIND_CONST => (
            input,
            TypeNode::Const {
                inner: TypeId(size_or_type),
            },
        ),
        KIND_RESTRICT => (
            input,
            TypeNode::Restrict {
                inner: TypeId(size_or_type),
            },
        ),
        KIND_FUNC => {
            let linkage = Linkage::from_wire(vlen as u32)
                .ok_or_else(|| invalid(format!("function '{name}' has invalid linkage {vlen}")))?;
            (
                input,
                TypeNode::Func {
                    name,
                    linkage,
                    proto: TypeId(size_or_type),
                },
            )
        }
        KIND_FUNC_PROTO => {
            let (input, params) = finish(count(|i| parse_param(i, strings, en), vlen)(input))?;
            (
                input,
                TypeNode::FuncProto {
                    ret: TypeId(size_or_type),
                    params,
                },
            )
        }
        KIND_VAR => {
            let (input, raw) = finish(u32(en)(input))?;
            let linkage = Linkage::from_wire(raw)
                .ok_or_else(|| invalid(format!("variable '{name}' has invalid linkage {raw}")))?;
            (
                input,
                TypeNode::Var {
                    name,
                    linkage,
                    inner: TypeId(size_or_type),
                },
            )
        }
        KIND_DATASEC => {
            let (input, entries) = finish(count(|i| parse_secinfo(i, en), vlen)(input))?;
            (
                input,
                TypeNode::Datasec {
                    name,
                    size: size_or_type,
                    entries,
                },
            )
        }
        KIND_FLOAT => (
            input,
            TypeNode::Float {
                name,
                size: size_or_type,
            },
        ),
        KIND_DECL_TAG => {
            let (input, component_index) = finish(u32(en)(input))?;
            (
                input,
                TypeNode::DeclTag {
                    name,
                    target: TypeId(size_or_type),
                    component_index,
                },
            )
        }
        KIND_TYPE_TAG => (
            input,
            TypeNode::TypeTag {
                name,
                inner: TypeId(size_or_type),
            },
        ),
        other => return Err(invalid(format!("unsupported BTF kind {other}"))),
    };

    btf.add(node);
    Ok(input)
}

fn parse_member<'a>(
    input: &'a [u8],
    strings: &[u8],
    en: Endianness,
    kflag: bool,
) -> IResult<&'a [u8], Member> {
    let (input, (name_off, type_id, off_word)) = tuple((u32(en), u32(en), u32(en)))(input)?;
    let name = read_str(input, strings, name_off)?.1;
    let (offset_bits, bitfield_size) = if kflag {
        (off_word & 0x00ff_ffff, off_word >> 24)
    } else {
        (off_word, 0)
    };
    Ok((
        input,
        Member {
            name,
            type_id: TypeId(type_id),
            offset_bits,
            bitfield_size,
        },
    ))
}

fn parse_param<'a>(
    input: &'a [u8],
    strings: &[u8],
    en: Endianness,
) -> IResult<&'a [u8], FuncParam> {
    let (input, (name_off, type_id)) = tuple((u32(en), u32(en)))(input)?;
    let name = read_str(input, strings, name_off)?.1;
    Ok((
        input,
        FuncParam {
            name,
            type_id: TypeId(type_id),
        },
    ))
}

fn parse_enum_value32<'a>(
    input: &'a [u8],
    strings: &[u8],
    en: Endianness,
) -> IResult<&'a [u8], EnumValue> {
    let (input, (name_off, value)) = tuple((u32(en), i32(en)))(input)?;
    let name = read_str(input, strings, name_off)?.1;
    Ok((
        input,
        EnumValue {
            name,
            value: value as i64,
        },
    ))
}

fn parse_enum_value64<'a>(
    input: &'a [u8],
    strings: &[u8],
    en: Endianness,
) -> IResult<&'a [u8], EnumValue> {
    let (input, (name_off, lo, hi)) = tuple((u32(en), u32(en), u32(en)))(input)?;
    let name = read_str(input, strings, name_off)?.1;
    let value = (((hi as u64) << 32) | lo as u64) as i64;
    Ok((input, EnumValue { name, value }))
}

fn parse_secinfo(input: &[u8], en: Endianness) -> IResult<&[u8], VarSecInfo> {
    let (input, (type_id, offset, size)) = tuple((u32(en), u32(en), u32(en)))(input)?;
    Ok((
        input,
        VarSecInfo {
            type_id: TypeId(type_id),
            offset,
            size,
        },
    ))
}

/// String lookup for use inside nom parsers; failures surface as nom errors
/// positioned at the current record.
fn read_str<'a>(prev: &'a [u8], strings: &[u8], offset: u32) -> IResult<&'a [u8], String> {
    match lookup_str(strings, offset) {
        Ok(s) => Ok((prev, s)),
        Err(_) => Err(nom::Err::Error(nom::error::Error::new(
            prev,
            ErrorKind::Tag,
        ))),
    }
}

fn lookup_str(strings: &[u8], offset: u32) -> Result<String, Error> {
    let tail = strings
        .get(offset as usize..)
        .ok_or_else(|| invalid(format!("string offset {offset} out of range")))?;
    let end = tail
        .iter()
        .position(|b| *b == 0)
        .ok_or_else(|| invalid("unterminated string".to_string()))?;
    std::str::from_utf8(&tail[..end])
        .map(str::to_string)
        .map_err(|_| invalid(format!("non-UTF-8 string at offset {offset}")))
}

/// Every type reference must point inside the arena; checked once up front so
/// later graph walks can index without bounds surprises.
fn validate_references(btf: &Btf) -> Result<(), Error> {
    let len = btf.len() as u32;
    let check = |id: TypeId| -> Result<(), Error> {
        if id.0 < len {
            Ok(())
        } else {
            Err(invalid(format!("type reference {} out of range", id.0)))
        }
    };

    for idx in 0..len {
        match btf.node(TypeId(idx)) {
            TypeNode::Pointer { target } => check(*target)?,
            TypeNode::Array { elem, index, .. } => {
                check(*elem)?;
                check(*index)?;
            }
            TypeNode::Struct { members, .. } | TypeNode::Union { members, .. } => {
                for m in members {
                    check(m.type_id)?;
                }
            }
            TypeNode::Typedef { inner, .. }
            | TypeNode::Volatile { inner }
            | TypeNode::Const { inner }
            | TypeNode::Restrict { inner }
            | TypeNode::TypeTag { inner, .. } => check(*inner)?,
            TypeNode::Func { proto, .. } => check(*proto)?,
            TypeNode::FuncProto { ret, params } => {
                check(*ret)?;
                for p in params {
                    check(p.type_id)?;
                }
            }
            TypeNode::Var { inner, .. } => check(*inner)?,
            TypeNode::Datasec { entries, .. } => {
                for e in entries {
                    check(e.type_id)?;
                }
            }
            TypeNode::DeclTag { target, .. } => check(*target)?,
            _ => {}
        }
    }
    Ok(())
}

fn finish<'a, O>(res: IResult<&'a [u8], O>) -> Result<(&'a [u8], O), Error> {
    res.finish().map_err(|e| {
        invalid(format!(
            "malformed record with {} bytes left ({:?})",
            e.input.len(),
            e.code
        ))
    })
}

fn invalid(msg: String) -> Error {
    Error::InvalidBtf(msg)
}
