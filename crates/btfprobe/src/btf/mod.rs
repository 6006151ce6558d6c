//! The BTF type universe.
//!
//! Nodes live in an arena; their indices are the identity tokens used by the
//! strip planner, so a deep copy is a plain clone with IDs stable within the
//! copy. Lookup by name goes through an index built at insertion time.

use std::collections::HashMap;

use crate::errors::Error;

mod emit;
mod parse;
mod types;

pub(crate) use emit::BtfBuilder;
pub(crate) use parse::parse;
pub(crate) use types::{
    EnumValue, FuncParam, Kind, Linkage, Member, TypeId, TypeNode, VarSecInfo, VOID,
};

/// An in-memory BTF type universe.
#[derive(Debug, Clone)]
pub(crate) struct Btf {
    types: Vec<TypeNode>,
    by_name: HashMap<String, Vec<TypeId>>,
}

impl Btf {
    /// An empty universe holding only `Void` at ID 0.
    pub fn new() -> Btf {
        Btf {
            types: vec![TypeNode::Void],
            by_name: HashMap::new(),
        }
    }

    /// Append a node and index its name. Returns the node's identity.
    pub fn add(&mut self, node: TypeNode) -> TypeId {
        let id = TypeId(self.types.len() as u32);
        let name = node.name();
        if !name.is_empty() {
            self.by_name.entry(name.to_string()).or_default().push(id);
        }
        self.types.push(node);
        id
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn node(&self, id: TypeId) -> &TypeNode {
        &self.types[id.0 as usize]
    }

    pub fn node_mut(&mut self, id: TypeId) -> &mut TypeNode {
        &mut self.types[id.0 as usize]
    }

    /// The declared name of `id`, empty for anonymous types.
    pub fn type_name(&self, id: TypeId) -> &str {
        self.node(id).name()
    }

    /// The first type named `name` of the given kind.
    pub fn type_by_name(&self, name: &str, kind: Kind) -> Result<TypeId, Error> {
        self.by_name
            .get(name)
            .into_iter()
            .flatten()
            .copied()
            .find(|id| self.node(*id).kind() == kind)
            .ok_or_else(|| Error::TypeNotFound(name.to_string()))
    }

    /// All types named `name`, in insertion order.
    pub fn any_types_by_name(&self, name: &str) -> Result<Vec<TypeId>, Error> {
        match self.by_name.get(name) {
            Some(ids) if !ids.is_empty() => Ok(ids.clone()),
            _ => Err(Error::TypeNotFound(name.to_string())),
        }
    }

    /// Size in bytes of one element of type `id`, as used for array index
    /// strides. Sizeless kinds (`Void`, functions, tags) count as 0.
    pub fn elem_size_bytes(&self, id: TypeId) -> u32 {
        match self.node(id) {
            TypeNode::Int { size, .. }
            | TypeNode::Float { size, .. }
            | TypeNode::Enum { size, .. }
            | TypeNode::Struct { size, .. }
            | TypeNode::Union { size, .. }
            | TypeNode::Datasec { size, .. } => *size,
            TypeNode::Pointer { .. } => 8,
            TypeNode::Typedef { inner, .. }
            | TypeNode::Volatile { inner }
            | TypeNode::Const { inner }
            | TypeNode::Restrict { inner } => self.elem_size_bytes(*inner),
            TypeNode::Array { elem, nelems, .. } => self.elem_size_bytes(*elem) * nelems,
            _ => 0,
        }
    }

    /// Strip pointers, qualifiers, typedefs and arrays down to the underlying
    /// nominal type, the granularity at which the strip planner keys types.
    pub fn underlying(&self, id: TypeId) -> TypeId {
        match self.node(id) {
            TypeNode::Pointer { target } => self.underlying(*target),
            TypeNode::Const { inner }
            | TypeNode::Typedef { inner, .. }
            | TypeNode::Volatile { inner }
            | TypeNode::Restrict { inner } => self.underlying(*inner),
            TypeNode::Array { elem, .. } => self.underlying(*elem),
            _ => id,
        }
    }
}
