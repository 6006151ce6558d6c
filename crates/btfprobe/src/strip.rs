//! Pruning a BTF universe down to what compiled probes actually touch.
//!
//! Planning collects, per underlying nominal type, the set of member names
//! that some resolved field chain walked, plus the probed functions and
//! their prototypes. Execution then narrows struct/union member lists to the
//! kept names and rewrites unplanned prototype parameter/return types to
//! `*void`, which preserves arity while shedding the types behind them.

use std::collections::{HashMap, HashSet};

use log::debug;

use crate::btf::{Btf, Kind, TypeId, TypeNode, VOID};
use crate::errors::Error;
use crate::fetch_arg::Wrap;
use crate::symbol::Symbol;

/// Per-type keep decisions, keyed by the underlying nominal type's identity.
///
/// An empty member name means "keep the type itself"; it never matches a
/// named member during execution.
#[derive(Debug, Default)]
pub(crate) struct KeepMap {
    entries: HashMap<TypeId, HashSet<String>>,
}

impl KeepMap {
    fn add_type(&mut self, btf: &Btf, id: TypeId) -> Result<(), Error> {
        self.add_type_member(btf, id, "")
    }

    fn add_type_member(&mut self, btf: &Btf, id: TypeId, member: &str) -> Result<(), Error> {
        let id = btf.underlying(id);

        // an enum-indexed array selector keeps the enum it names alive too
        if member.starts_with("enum:") && !matches!(btf.node(id), TypeNode::Enum { .. }) {
            let tokens: Vec<&str> = member.split(':').collect();
            if tokens.len() != 3 {
                return Err(Error::ArrayIndexInvalidField(member.to_string()));
            }
            let enum_id = btf.type_by_name(tokens[1], Kind::Enum)?;
            self.add_type_member(btf, enum_id, member)?;
        }

        self.entries.entry(id).or_default().insert(member.to_string());
        Ok(())
    }

    fn contains(&self, btf: &Btf, id: TypeId) -> bool {
        self.entries.contains_key(&btf.underlying(id))
    }

    fn members(&self, id: TypeId) -> Option<&HashSet<String>> {
        self.entries.get(&id)
    }

    /// Planned type identities in ascending order, for deterministic output.
    pub(crate) fn ids(&self) -> Vec<TypeId> {
        let mut ids: Vec<TypeId> = self.entries.keys().copied().collect();
        ids.sort();
        ids
    }
}

/// Collect every type and member the winning builders of `symbols` resolved.
pub(crate) fn plan(btf: &Btf, symbols: &[&Symbol]) -> Result<KeepMap, Error> {
    let mut keep = KeepMap::default();
    for symbol in symbols {
        for probe in symbol.probes() {
            for arg in probe.fetch_args() {
                if let Some(builder) = arg.successful_builder() {
                    let wrap = builder.wrap();
                    for (index, field) in builder.fields().iter().enumerate() {
                        // a wrapped first field is a synthetic frame, not a
                        // member of any universe type
                        if wrap != Wrap::None && index == 0 {
                            continue;
                        }
                        if let Some(parent) = field.parent_type {
                            keep.add_type_member(btf, parent, &field.name)?;
                        }
                        if let Some(target) = field.target_type {
                            keep.add_type(btf, target)?;
                        }
                    }
                }
                if let Some(func) = arg.btf_func() {
                    keep.add_type(btf, func)?;
                    if let TypeNode::Func { proto, .. } = btf.node(func) {
                        keep.add_type(btf, *proto)?;
                    }
                }
            }
        }
    }
    debug!("strip plan keeps {} types", keep.entries.len());
    Ok(keep)
}

/// Narrow the universe in place according to the plan.
pub(crate) fn execute(btf: &mut Btf, keep: &KeepMap) {
    let mut void_ptr: Option<TypeId> = None;

    for id in keep.ids() {
        match btf.node(id).kind() {
            Kind::Struct | Kind::Union => {
                let kept = match keep.members(id) {
                    Some(names) => names.clone(),
                    None => continue,
                };
                if let TypeNode::Struct { members, .. } | TypeNode::Union { members, .. } =
                    btf.node_mut(id)
                {
                    let before = members.len();
                    members.retain(|m| kept.contains(&m.name));
                    debug!(
                        "stripped type {}: kept {} of {} members",
                        id.0,
                        members.len(),
                        before
                    );
                }
            }
            Kind::FuncProto => {
                let (ret, param_types) = match btf.node(id) {
                    TypeNode::FuncProto { ret, params } => {
                        (*ret, params.iter().map(|p| p.type_id).collect::<Vec<_>>())
                    }
                    _ => continue,
                };
                let replace_ret = ret != VOID && !keep.contains(btf, ret);
                let replace: Vec<bool> = param_types
                    .iter()
                    .map(|t| !keep.contains(btf, *t))
                    .collect();
                if !replace_ret && !replace.iter().any(|r| *r) {
                    continue;
                }
                let vp =
                    *void_ptr.get_or_insert_with(|| btf.add(TypeNode::Pointer { target: VOID }));
                if let TypeNode::FuncProto { ret, params } = btf.node_mut(id) {
                    if replace_ret {
                        *ret = vp;
                    }
                    for (param, void_this) in params.iter_mut().zip(&replace) {
                        if *void_this {
                            param.type_id = vp;
                        }
                    }
                }
            }
            _ => {}
        }
    }
}
