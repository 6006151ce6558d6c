//! BTF node kinds.
//!
//! The type universe is a closed sum held in an arena ([`super::Btf`]); every
//! cross-type reference is a [`TypeId`], which is the node's arena index and
//! doubles as its stable identity. ID 0 is always `Void`, matching the wire
//! format.

/// Identity of a type inside one universe (and its deep copies).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct TypeId(pub(crate) u32);

/// The void type, wire ID 0.
pub(crate) const VOID: TypeId = TypeId(0);

/// A struct or union member. Offsets are in bits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Member {
    pub name: String,
    pub type_id: TypeId,
    pub offset_bits: u32,
    pub bitfield_size: u32,
}

/// A function prototype parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FuncParam {
    pub name: String,
    pub type_id: TypeId,
}

/// A named enum value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct EnumValue {
    pub name: String,
    pub value: i64,
}

/// A variable placed in a data section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct VarSecInfo {
    pub type_id: TypeId,
    pub offset: u32,
    pub size: u32,
}

/// Function and variable linkage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Linkage {
    Static,
    Global,
    Extern,
}

impl Linkage {
    pub fn from_wire(raw: u32) -> Option<Linkage> {
        match raw {
            0 => Some(Linkage::Static),
            1 => Some(Linkage::Global),
            2 => Some(Linkage::Extern),
            _ => None,
        }
    }

    pub fn to_wire(self) -> u32 {
        match self {
            Linkage::Static => 0,
            Linkage::Global => 1,
            Linkage::Extern => 2,
        }
    }
}

/// One node of the BTF type graph.
///
/// Anonymous types and members carry an empty name; that is meaningful, since
/// selector chains may address anonymous members by the empty string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TypeNode {
    Void,
    Int {
        name: String,
        size: u32,
        signed: bool,
        is_char: bool,
        is_bool: bool,
        nr_bits: u8,
    },
    Pointer {
        target: TypeId,
    },
    Array {
        elem: TypeId,
        index: TypeId,
        nelems: u32,
    },
    Struct {
        name: String,
        size: u32,
        members: Vec<Member>,
    },
    Union {
        name: String,
        size: u32,
        members: Vec<Member>,
    },
    Enum {
        name: String,
        size: u32,
        signed: bool,
        is64: bool,
        values: Vec<EnumValue>,
    },
    Fwd {
        name: String,
        is_union: bool,
    },
    Typedef {
        name: String,
        inner: TypeId,
    },
    Volatile {
        inner: TypeId,
    },
    Const {
        inner: TypeId,
    },
    Restrict {
        inner: TypeId,
    },
    Func {
        name: String,
        linkage: Linkage,
        proto: TypeId,
    },
    FuncProto {
        ret: TypeId,
        params: Vec<FuncParam>,
    },
    Var {
        name: String,
        linkage: Linkage,
        inner: TypeId,
    },
    Datasec {
        name: String,
        size: u32,
        entries: Vec<VarSecInfo>,
    },
    Float {
        name: String,
        size: u32,
    },
    DeclTag {
        name: String,
        target: TypeId,
        component_index: u32,
    },
    TypeTag {
        name: String,
        inner: TypeId,
    },
}

/// Logical type kind, used for kind-constrained lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Kind {
    Void,
    Int,
    Pointer,
    Array,
    Struct,
    Union,
    Enum,
    Fwd,
    Typedef,
    Volatile,
    Const,
    Restrict,
    Func,
    FuncProto,
    Var,
    Datasec,
    Float,
    DeclTag,
    TypeTag,
}

impl TypeNode {
    pub fn kind(&self) -> Kind {
        match self {
            TypeNode::Void => Kind::Void,
            TypeNode::Int { .. } => Kind::Int,
            TypeNode::Pointer { .. } => Kind::Pointer,
            TypeNode::Array { .. } => Kind::Array,
            TypeNode::Struct { .. } => Kind::Struct,
            TypeNode::Union { .. } => Kind::Union,
            TypeNode::Enum { .. } => Kind::Enum,
            TypeNode::Fwd { .. } => Kind::Fwd,
            TypeNode::Typedef { .. } => Kind::Typedef,
            TypeNode::Volatile { .. } => Kind::Volatile,
            TypeNode::Const { .. } => Kind::Const,
            TypeNode::Restrict { .. } => Kind::Restrict,
            TypeNode::Func { .. } => Kind::Func,
            TypeNode::FuncProto { .. } => Kind::FuncProto,
            TypeNode::Var { .. } => Kind::Var,
            TypeNode::Datasec { .. } => Kind::Datasec,
            TypeNode::Float { .. } => Kind::Float,
            TypeNode::DeclTag { .. } => Kind::DeclTag,
            TypeNode::TypeTag { .. } => Kind::TypeTag,
        }
    }

    /// The declared name; empty for anonymous and unnamed kinds.
    pub fn name(&self) -> &str {
        match self {
            TypeNode::Int { name, .. }
            | TypeNode::Struct { name, .. }
            | TypeNode::Union { name, .. }
            | TypeNode::Enum { name, .. }
            | TypeNode::Fwd { name, .. }
            | TypeNode::Typedef { name, .. }
            | TypeNode::Func { name, .. }
            | TypeNode::Var { name, .. }
            | TypeNode::Datasec { name, .. }
            | TypeNode::Float { name, .. }
            | TypeNode::DeclTag { name, .. }
            | TypeNode::TypeTag { name, .. } => name,
            _ => "",
        }
    }
}
