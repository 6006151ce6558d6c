//! BTF wire-format encoder.
//!
//! Streams a chosen set of types, plus everything reachable from them, into a
//! fresh blob. New compact IDs are assigned in first-visit order; references
//! to `Void` stay 0. Output is native-endian, the decoder detects either.

use std::collections::HashMap;

use log::debug;

use super::{Btf, Member, TypeId, TypeNode, VOID};

const MAGIC: u16 = 0xeb9f;
const HEADER_LEN: u32 = 24;

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

/// Serializes a subset of a universe back to the wire format.
pub(crate) struct BtfBuilder<'a> {
    btf: &'a Btf,
    ids: HashMap<TypeId, u32>,
    order: Vec<TypeId>,
}

impl<'a> BtfBuilder<'a> {
    pub fn new(btf: &'a Btf) -> BtfBuilder<'a> {
        BtfBuilder {
            btf,
            ids: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Add a type and, transitively, every type it references. Returns the
    /// ID the type will have in the emitted blob.
    pub fn add(&mut self, id: TypeId) -> u32 {
        if id == VOID {
            return 0;
        }
        if let Some(new_id) = self.ids.get(&id) {
            return *new_id;
        }
        // register before recursing so pointer cycles terminate
        let new_id = (self.order.len() + 1) as u32;
        self.ids.insert(id, new_id);
        self.order.push(id);

        let btf = self.btf;
        match btf.node(id) {
            TypeNode::Pointer { target } => {
                self.add(*target);
            }
            TypeNode::Array { elem, index, .. } => {
                self.add(*elem);
                self.add(*index);
            }
            TypeNode::Struct { members, .. } | TypeNode::Union { members, .. } => {
                for m in members {
                    self.add(m.type_id);
                }
            }
            TypeNode::Typedef { inner, .. }
            | TypeNode::Volatile { inner }
            | TypeNode::Const { inner }
            | TypeNode::Restrict { inner }
            | TypeNode::TypeTag { inner, .. } => {
                self.add(*inner);
            }
            TypeNode::Func { proto, .. } => {
                self.add(*proto);
            }
            TypeNode::FuncProto { ret, params } => {
                self.add(*ret);
                for p in params {
                    self.add(p.type_id);
                }
            }
            TypeNode::Var { inner, .. } => {
                self.add(*inner);
            }
            TypeNode::Datasec { entries, .. } => {
                for e in entries {
                    self.add(e.type_id);
                }
            }
            TypeNode::DeclTag { target, .. } => {
                self.add(*target);
            }
            _ => {}
        }
        new_id
    }

    /// Serialize everything added so far.
    pub fn marshal(&self) -> Vec<u8> {
        let mut strings = StringTable::new();
        let mut types = Vec::new();
        for id in &self.order {
            self.emit_type(*id, &mut types, &mut strings);
        }
        debug!(
            "marshalled {} BTF types ({} type bytes, {} string bytes)",
            self.order.len(),
            types.len(),
            strings.buf.len()
        );

        let mut out = Vec::with_capacity(HEADER_LEN as usize + types.len() + strings.buf.len());
        put_u16(&mut out, MAGIC);
        out.push(1); // version
        out.push(0); // flags
        put_u32(&mut out, HEADER_LEN);
        put_u32(&mut out, 0); // type_off
        put_u32(&mut out, types.len() as u32);
        put_u32(&mut out, types.len() as u32); // str_off
        put_u32(&mut out, strings.buf.len() as u32);
        out.extend_from_slice(&types);
        out.extend_from_slice(&strings.buf);
        out
    }

    fn new_id(&self, id: TypeId) -> u32 {
        // references outside the reachability closure collapse to void
        self.ids.get(&id).copied().unwrap_or(0)
    }

    fn emit_type(&self, id: TypeId, out: &mut Vec<u8>, strings: &mut StringTable) {
        match self.btf.node(id) {
            TypeNode::Void => {}
            TypeNode::Int {
                name,
                size,
                signed,
                is_char,
                is_bool,
                nr_bits,
            } => {
                self.record(out, strings, name, KIND_INT, 0, false, *size);
                let mut encoding = 0u32;
                if *signed {
                    encoding |= 0x1;
                }
                if *is_char {
                    encoding |= 0x2;
                }
                if *is_bool {
                    encoding |= 0x4;
                }
                put_u32(out, (encoding << 24) | *nr_bits as u32);
            }
            TypeNode::Pointer { target } => {
                self.record(out, strings, "", KIND_PTR, 0, false, self.new_id(*target));
            }
            TypeNode::Array {
                elem,
                index,
                nelems,
            } => {
                self.record(out, strings, "", KIND_ARRAY, 0, false, 0);
                put_u32(out, self.new_id(*elem));
                put_u32(out, self.new_id(*index));
                put_u32(out, *nelems);
            }
            TypeNode::Struct {
                name,
                size,
                members,
            } => self.emit_composite(out, strings, name, KIND_STRUCT, *size, members),
            TypeNode::Union {
                name,
                size,
                members,
            } => self.emit_composite(out, strings, name, KIND_UNION, *size, members),
            TypeNode::Enum {
                name,
                size,
                signed,
                is64,
                values,
            } => {
                let kind = if *is64 { KIND_ENUM64 } else { KIND_ENUM };
                self.record(out, strings, name, kind, values.len(), *signed, *size);
                for v in values {
                    put_u32(out, strings.offset(&v.name));
                    if *is64 {
                        put_u32(out, v.value as u64 as u32);
                        put_u32(out, ((v.value as u64) >> 32) as u32);
                    } else {
                        put_u32(out, v.value as i32 as u32);
                    }
                }
            }
            TypeNode::Fwd { name, is_union } => {
                self.record(out, strings, name, KIND_FWD, 0, *is_union, 0);
            }
            TypeNode::Typedef { name, inner } => {
                self.record(out, strings, name, KIND_TYPEDEF, 0, false, self.new_id(*inner));
            }
            TypeNode::Volatile { inner } => {
                self.record(out, strings, "", KIND_VOLATILE, 0, false, self.new_id(*inner));
            }
            TypeNode::Const { inner } => {
                self.record(out, strings, "", KIND_CONST, 0, false, self.new_id(*inner));
            }
            TypeNode::Restrict { inner } => {
                self.record(out, strings, "", KIND_RESTRICT, 0, false, self.new_id(*inner));
            }
            TypeNode::Func {
                name,
                linkage,
                proto,
            } => {
                self.record(
                    out,
                    strings,
                    name,
                    KIND_FUNC,
                    linkage.to_wire() as usize,
                    false,
                    self.new_id(*proto),
                );
            }
            TypeNode::FuncProto { ret, params } => {
                self.record(
                    out,
                    strings,
                    "",
                    KIND_FUNC_PROTO,
                    params.len(),
                    false,
                    self.new_id(*ret),
                );
                for p in params {
                    put_u32(out, strings.offset(&p.name));
                    put_u32(out, self.new_id(p.type_id));
                }
            }
            TypeNode::Var {
                name,
                linkage,
                inner,
            } => {
                self.record(out, strings, name, KIND_VAR, 0, false, self.new_id(*inner));
                put_u32(out, linkage.to_wire());
            }
            TypeNode::Datasec {
                name,
                size,
                entries,
            } => {
                self.record(out, strings, name, KIND_DATASEC, entries.len(), false, *size);
                for e in entries {
                    put_u32(out, self.new_id(e.type_id));
                    put_u32(out, e.offset);
                    put_u32(out, e.size);
                }
            }
            TypeNode::Float { name, size } => {
                self.record(out, strings, name, KIND_FLOAT, 0, false, *size);
            }
            TypeNode::DeclTag {
                name,
                target,
                component_index,
            } => {
                self.record(out, strings, name, KIND_DECL_TAG, 0, false, self.new_id(*target));
                put_u32(out, *component_index);
            }
            TypeNode::TypeTag { name, inner } => {
                self.record(out, strings, name, KIND_TYPE_TAG, 0, false, self.new_id(*inner));
            }
        }
    }

    fn emit_composite(
        &self,
        out: &mut Vec<u8>,
        strings: &mut StringTable,
        name: &str,
        kind: u32,
        size: u32,
        members: &[Member],
    ) {
        let kflag = members.iter().any(|m| m.bitfield_size != 0);
        self.record(out, strings, name, kind, members.len(), kflag, size);
        for m in members {
            put_u32(out, strings.offset(&m.name));
            put_u32(out, self.new_id(m.type_id));
            let off_word = if kflag {
                (m.bitfield_size << 24) | (m.offset_bits & 0x00ff_ffff)
            } else {
                m.offset_bits
            };
            put_u32(out, off_word);
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn record(
        &self,
        out: &mut Vec<u8>,
        strings: &mut StringTable,
        name: &str,
        kind: u32,
        vlen: usize,
        kflag: bool,
        size_or_type: u32,
    ) {
        put_u32(out, strings.offset(name));
        let info = ((kflag as u32) << 31) | (kind << 24) | (vlen as u32 & 0xffff);
        put_u32(out, info);
        put_u32(out, size_or_type);
    }
}

struct StringTable {
    buf: Vec<u8>,
    index: HashMap<String, u32>,
}

impl StringTable {
    fn new() -> StringTable {
        StringTable {
            buf: vec![0],
            index: HashMap::new(),
        }
    }

    fn offset(&mut self, s: &str) -> u32 {
        if s.is_empty() {
            return 0;
        }
        if let Some(off) = self.index.get(s) {
            return *off;
        }
        let off = self.buf.len() as u32;
        self.buf.extend_from_slice(s.as_bytes());
        self.buf.push(0);
        self.index.insert(s.to_string(), off);
        off
    }
}

fn put_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_ne_bytes());
}

fn put_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_ne_bytes());
}

#[cfg(test)]
mod tests {
    use super::super::{parse, EnumValue, FuncParam, Kind, Linkage};
    use super::*;

    fn universe() -> (Btf, TypeId) {
        let mut btf = Btf::new();
        let u32t = btf.add(TypeNode::Int {
            name: "u32".into(),
            size: 4,
            signed: false,
            is_char: false,
            is_bool: false,
            nr_bits: 32,
        });
        let flags = btf.add(TypeNode::Struct {
            name: "flags".into(),
            size: 4,
            members: vec![
                Member {
                    name: "low".into(),
                    type_id: u32t,
                    offset_bits: 0,
                    bitfield_size: 3,
                },
                Member {
                    name: "high".into(),
                    type_id: u32t,
                    offset_bits: 3,
                    bitfield_size: 29,
                },
            ],
        });
        let e = btf.add(TypeNode::Enum {
            name: "mode".into(),
            size: 4,
            signed: false,
            is64: false,
            values: vec![
                EnumValue {
                    name: "MODE_A".into(),
                    value: 0,
                },
                EnumValue {
                    name: "MODE_B".into(),
                    value: 7,
                },
            ],
        });
        let holder = btf.add(TypeNode::Struct {
            name: "holder".into(),
            size: 16,
            members: vec![
                Member {
                    name: "f".into(),
                    type_id: flags,
                    offset_bits: 0,
                    bitfield_size: 0,
                },
                Member {
                    name: "m".into(),
                    type_id: e,
                    offset_bits: 32,
                    bitfield_size: 0,
                },
            ],
        });
        // unreachable from holder; must not be emitted
        btf.add(TypeNode::Struct {
            name: "orphan".into(),
            size: 0,
            members: vec![],
        });
        (btf, holder)
    }

    #[test]
    fn test_round_trip_drops_unreachable_types() {
        let (btf, holder) = universe();
        let mut builder = BtfBuilder::new(&btf);
        builder.add(holder);
        let blob = builder.marshal();

        let reloaded = parse(&blob).unwrap();
        assert!(reloaded.type_by_name("holder", Kind::Struct).is_ok());
        assert!(reloaded.type_by_name("flags", Kind::Struct).is_ok());
        assert!(reloaded.type_by_name("mode", Kind::Enum).is_ok());
        assert!(reloaded.any_types_by_name("orphan").is_err());
    }

    #[test]
    fn test_bitfield_members_round_trip() {
        let (btf, holder) = universe();
        let mut builder = BtfBuilder::new(&btf);
        builder.add(holder);
        let reloaded = parse(&builder.marshal()).unwrap();

        let flags = reloaded.type_by_name("flags", Kind::Struct).unwrap();
        let TypeNode::Struct { members, .. } = reloaded.node(flags) else {
            panic!("flags is not a struct");
        };
        assert_eq!(members.len(), 2);
        assert_eq!(members[0].bitfield_size, 3);
        assert_eq!(members[0].offset_bits, 0);
        assert_eq!(members[1].bitfield_size, 29);
        assert_eq!(members[1].offset_bits, 3);
    }

    #[test]
    fn test_func_and_proto_round_trip() {
        let mut btf = Btf::new();
        let u64t = btf.add(TypeNode::Int {
            name: "u64".into(),
            size: 8,
            signed: false,
            is_char: false,
            is_bool: false,
            nr_bits: 64,
        });
        let proto = btf.add(TypeNode::FuncProto {
            ret: u64t,
            params: vec![FuncParam {
                name: "x".into(),
                type_id: u64t,
            }],
        });
        let func = btf.add(TypeNode::Func {
            name: "do_thing".into(),
            linkage: Linkage::Global,
            proto,
        });

        let mut builder = BtfBuilder::new(&btf);
        builder.add(func);
        let reloaded = parse(&builder.marshal()).unwrap();

        let f = reloaded.type_by_name("do_thing", Kind::Func).unwrap();
        let TypeNode::Func { linkage, proto, .. } = reloaded.node(f) else {
            panic!("not a func");
        };
        assert_eq!(*linkage, Linkage::Global);
        let TypeNode::FuncProto { ret, params } = reloaded.node(*proto) else {
            panic!("not a proto");
        };
        assert_eq!(params.len(), 1);
        assert_eq!(params[0].name, "x");
        assert_eq!(reloaded.type_name(*ret), "u64");
    }

    #[test]
    fn test_enum64_round_trip() {
        let mut btf = Btf::new();
        let e = btf.add(TypeNode::Enum {
            name: "big".into(),
            size: 8,
            signed: true,
            is64: true,
            values: vec![EnumValue {
                name: "HUGE".into(),
                value: -5_000_000_000,
            }],
        });
        let mut builder = BtfBuilder::new(&btf);
        builder.add(e);
        let reloaded = parse(&builder.marshal()).unwrap();

        let got = reloaded.type_by_name("big", Kind::Enum).unwrap();
        let TypeNode::Enum {
            signed,
            is64,
            values,
            ..
        } = reloaded.node(got)
        else {
            panic!("not an enum");
        };
        assert!(*signed);
        assert!(*is64);
        assert_eq!(values[0].value, -5_000_000_000);
    }
}
