//! Instance arena
//!
//! Every live instance sits in a slot of an [`InstanceArena`] and is named by
//! an [`InstanceId`] (slot index plus generation). Freeing a slot bumps its
//! generation, so a handle held by an external consumer after its instance
//! was destroyed resolves to nothing instead of to whatever reused the slot.
//!
//! When ARE_THE_SAME merges two instances the loser's slot becomes
//! `Forwarded` to the survivor. Lookups follow forwarding transparently, so
//! handles to the merged instance stay valid without being rewritten. Each
//! merge is also queued for [`RelocationListener`]s that keep their own
//! per-instance state.

use std::fmt;
use std::sync::Arc;

use ascend_core::{BitList, BinOp, LogicalOp, MathFunc, RelOp, Symbol, SymbolTable, TypeDescription};
use indexmap::IndexMap;
use serde::Serialize;

use crate::error::CompileError;
use crate::units::Dimensions;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct InstanceId {
    index: u32,
    generation: u32,
}

impl InstanceId {
    pub fn index(self) -> usize {
        self.index as usize
    }

    pub fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}v{}", self.index, self.generation)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum InstanceKind {
    Real,
    Integer,
    Boolean,
    Symbol,
    Set,
    Relation,
    LogRelation,
    When,
    Model,
    Array,
    Simulation,
}

impl InstanceKind {
    pub fn is_atom(self) -> bool {
        matches!(
            self,
            InstanceKind::Real
                | InstanceKind::Integer
                | InstanceKind::Boolean
                | InstanceKind::Symbol
        )
    }
}

/// Key of a child within its parent: a part name or an array subscript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChildKey {
    Name(Symbol),
    Int(i64),
    Sym(Symbol),
}

impl ChildKey {
    pub fn describe(&self, symbols: &SymbolTable) -> String {
        match self {
            ChildKey::Name(s) => symbols.resolve(*s).unwrap_or("?").to_string(),
            ChildKey::Int(i) => format!("[{}]", i),
            ChildKey::Sym(s) => format!("['{}']", symbols.resolve(*s).unwrap_or("?")),
        }
    }

    pub fn is_subscript(&self) -> bool {
        !matches!(self, ChildKey::Name(_))
    }
}

/// Symbols print as their table index; use [`ChildKey::describe`] when a
/// [`SymbolTable`] is at hand.
impl fmt::Display for ChildKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChildKey::Name(s) => write!(f, "{}", s),
            ChildKey::Int(i) => write!(f, "[{}]", i),
            ChildKey::Sym(s) => write!(f, "['{}']", s),
        }
    }
}

/// Resolved arithmetic expression of a relation side.
#[derive(Debug, Clone, PartialEq)]
pub enum Term {
    Num(f64),
    /// An incident variable.
    Var(InstanceId),
    /// A constant instance kept symbolic because folding was disabled.
    Const(InstanceId),
    Neg(Box<Term>),
    Binary {
        op: BinOp,
        lhs: Box<Term>,
        rhs: Box<Term>,
    },
    Func {
        func: MathFunc,
        arg: Box<Term>,
    },
}

impl Term {
    /// Append incident variables in left-to-right occurrence order.
    pub fn collect_vars(&self, out: &mut Vec<InstanceId>) {
        match self {
            Term::Var(id) => out.push(*id),
            Term::Num(_) | Term::Const(_) => {}
            Term::Neg(t) | Term::Func { arg: t, .. } => t.collect_vars(out),
            Term::Binary { lhs, rhs, .. } => {
                lhs.collect_vars(out);
                rhs.collect_vars(out);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RelationForm {
    Token {
        lhs: Term,
        rhs: Term,
    },
    /// Output `output` of an external black box.
    Blackbox {
        function: String,
        inputs: Vec<InstanceId>,
        outputs: Vec<InstanceId>,
        output: usize,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RelationData {
    pub op: RelOp,
    pub form: RelationForm,
    pub conditional: bool,
}

impl RelationData {
    /// Variables referenced by the relation, in first-occurrence order with
    /// repeats kept.
    pub fn incidence(&self) -> Vec<InstanceId> {
        let mut out = Vec::new();
        match &self.form {
            RelationForm::Token { lhs, rhs } => {
                lhs.collect_vars(&mut out);
                rhs.collect_vars(&mut out);
            }
            RelationForm::Blackbox {
                inputs,
                outputs,
                output,
                ..
            } => {
                out.extend(inputs.iter().copied());
                if let Some(o) = outputs.get(*output) {
                    out.push(*o);
                }
            }
        }
        out
    }

    pub fn is_blackbox(&self) -> bool {
        matches!(self.form, RelationForm::Blackbox { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LogTerm {
    Bool(bool),
    Var(InstanceId),
    Not(Box<LogTerm>),
    Binary {
        op: LogicalOp,
        lhs: Box<LogTerm>,
        rhs: Box<LogTerm>,
    },
    Satisfied {
        relation: InstanceId,
        tolerance: f64,
    },
}

impl LogTerm {
    pub fn collect_vars(&self, out: &mut Vec<InstanceId>) {
        match self {
            LogTerm::Var(id) => out.push(*id),
            LogTerm::Not(t) => t.collect_vars(out),
            LogTerm::Binary { lhs, rhs, .. } => {
                lhs.collect_vars(out);
                rhs.collect_vars(out);
            }
            LogTerm::Bool(_) | LogTerm::Satisfied { .. } => {}
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogRelData {
    pub expr: LogTerm,
    pub conditional: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WhenCaseData {
    /// `None` is OTHERWISE.
    pub values: Option<Vec<Value>>,
    pub members: Vec<InstanceId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WhenData {
    pub vars: Vec<InstanceId>,
    pub cases: Vec<WhenCaseData>,
}

/// Claim on an instance's interface slot by an external consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InterfaceToken {
    pub owner: u64,
    pub index: u32,
}

#[derive(Debug, Clone)]
pub struct Instance {
    pub kind: InstanceKind,
    /// Type the instance was made from. Arrays carry their element type.
    pub desc: Arc<TypeDescription>,
    pub children: IndexMap<ChildKey, InstanceId>,
    pub parents: Vec<InstanceId>,
    pub value: Value,
    pub dims: Dimensions,
    /// Value still comes from the type's default.
    pub defaulted: bool,
    /// Element type of a set instance.
    pub of_type: Option<String>,
    pub relation: Option<RelationData>,
    pub logrel: Option<LogRelData>,
    pub when: Option<WhenData>,
    complete: bool,
    interface: Option<InterfaceToken>,
    /// Slots forwarded to this instance by merges.
    merged: Vec<u32>,
}

impl Instance {
    pub fn new(kind: InstanceKind, desc: Arc<TypeDescription>) -> Self {
        Self {
            kind,
            desc,
            children: IndexMap::new(),
            parents: Vec::new(),
            value: Value::Undefined,
            dims: Dimensions::dimensionless(),
            defaulted: false,
            of_type: None,
            relation: None,
            logrel: None,
            when: None,
            complete: false,
            interface: None,
            merged: Vec::new(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn mark_complete(&mut self) {
        self.complete = true;
    }

    /// Allow further children, for refinement of a finished instance.
    pub fn reopen(&mut self) {
        self.complete = false;
    }

    pub fn child(&self, key: &ChildKey) -> Option<InstanceId> {
        self.children.get(key).copied()
    }

    pub fn is_constant(&self) -> bool {
        self.desc.is_constant() || self.kind == InstanceKind::Set
    }

    pub fn interface(&self) -> Option<InterfaceToken> {
        self.interface
    }
}

#[derive(Debug)]
enum Slot {
    Occupied { generation: u32, instance: Box<Instance> },
    Forwarded { generation: u32, target: InstanceId },
    Vacant { generation: u32 },
}

impl Slot {
    fn generation(&self) -> u32 {
        match self {
            Slot::Occupied { generation, .. }
            | Slot::Forwarded { generation, .. }
            | Slot::Vacant { generation } => *generation,
        }
    }
}

/// Receives notice that an instance was merged into another.
pub trait RelocationListener {
    fn relocated(&mut self, from: InstanceId, to: InstanceId);
}

#[derive(Debug, Default)]
pub struct InstanceArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
    relocations: Vec<(InstanceId, InstanceId)>,
}

/// Forwarding chains are short; this bound only guards against a corrupt
/// cycle.
const MAX_FORWARD_HOPS: usize = 64;

impl InstanceArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self, instance: Instance) -> InstanceId {
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let generation = self.slots[index as usize].generation();
            self.slots[index as usize] = Slot::Occupied {
                generation,
                instance: Box::new(instance),
            };
            InstanceId { index, generation }
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot::Occupied {
                generation: 0,
                instance: Box::new(instance),
            });
            InstanceId {
                index,
                generation: 0,
            }
        }
    }

    /// Canonical handle of a live instance, following merges.
    pub fn resolve(&self, id: InstanceId) -> Option<InstanceId> {
        let mut current = id;
        for _ in 0..MAX_FORWARD_HOPS {
            match self.slots.get(current.index())? {
                Slot::Occupied { generation, .. } if *generation == current.generation => {
                    return Some(current)
                }
                Slot::Forwarded { generation, target } if *generation == current.generation => {
                    current = *target;
                }
                _ => return None,
            }
        }
        None
    }

    pub fn contains(&self, id: InstanceId) -> bool {
        self.resolve(id).is_some()
    }

    pub fn get(&self, id: InstanceId) -> Option<&Instance> {
        let id = self.resolve(id)?;
        match &self.slots[id.index()] {
            Slot::Occupied { instance, .. } => Some(instance),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, id: InstanceId) -> Option<&mut Instance> {
        let id = self.resolve(id)?;
        match &mut self.slots[id.index()] {
            Slot::Occupied { instance, .. } => Some(instance),
            _ => None,
        }
    }

    pub fn instance(&self, id: InstanceId) -> Result<&Instance, CompileError> {
        self.get(id).ok_or(CompileError::StaleHandle(id))
    }

    pub fn instance_mut(&mut self, id: InstanceId) -> Result<&mut Instance, CompileError> {
        self.get_mut(id).ok_or(CompileError::StaleHandle(id))
    }

    /// Number of slots ever allocated; slot indices are below this.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn live_count(&self) -> usize {
        self.live
    }

    pub fn child(&self, parent: InstanceId, key: &ChildKey) -> Option<InstanceId> {
        self.get(parent)?.child(key).and_then(|c| self.resolve(c))
    }

    /// Attach `child` under `key`. Fails on a complete parent or a taken key.
    pub fn add_child(
        &mut self,
        parent: InstanceId,
        key: ChildKey,
        child: InstanceId,
    ) -> Result<(), CompileError> {
        let p = self.instance(parent)?;
        if p.is_complete() {
            return Err(CompileError::AlreadyComplete(p.desc.name.clone()));
        }
        if p.children.contains_key(&key) {
            return Err(CompileError::NameConflict {
                name: key.to_string(),
                owner: p.desc.name.clone(),
            });
        }
        self.link(parent, key, child)
    }

    /// Attach without the completion check, used when merging.
    pub(crate) fn link(
        &mut self,
        parent: InstanceId,
        key: ChildKey,
        child: InstanceId,
    ) -> Result<(), CompileError> {
        let parent = self.resolve(parent).ok_or(CompileError::StaleHandle(parent))?;
        let child = self.resolve(child).ok_or(CompileError::StaleHandle(child))?;
        self.instance_mut(parent)?.children.insert(key, child);
        let c = self.instance_mut(child)?;
        if !c.parents.contains(&parent) {
            c.parents.push(parent);
        }
        Ok(())
    }

    /// Remove every child entry of `parent` that refers to `child`.
    pub fn unlink(&mut self, parent: InstanceId, child: InstanceId) {
        let target = self.resolve(child).unwrap_or(child);
        if let Some(p) = self.get_mut(parent) {
            p.children.retain(|_, c| *c != target && *c != child);
        }
        let parent = self.resolve(parent).unwrap_or(parent);
        if let Some(c) = self.get_mut(child) {
            c.parents.retain(|p| *p != parent);
        }
    }

    /// Remove the entry `key` of `parent`, dropping the back reference too.
    pub fn remove_child(&mut self, parent: InstanceId, key: &ChildKey) -> Option<InstanceId> {
        let parent = self.resolve(parent)?;
        let child = self.get_mut(parent)?.children.shift_remove(key)?;
        let still_linked = self
            .get(parent)
            .map(|p| p.children.values().any(|c| *c == child))
            .unwrap_or(false);
        if !still_linked {
            if let Some(c) = self.get_mut(child) {
                c.parents.retain(|p| *p != parent);
            }
        }
        Some(child)
    }

    /// Point every child entry of `parent` that names `from` at `to`.
    pub fn replace_child_refs(&mut self, parent: InstanceId, from: InstanceId, to: InstanceId) {
        let Some(p) = self.get_mut(parent) else {
            return;
        };
        let mut replaced = false;
        for child in p.children.values_mut() {
            if *child == from {
                *child = to;
                replaced = true;
            }
        }
        if replaced {
            let parent = self.resolve(parent).unwrap_or(parent);
            if let Some(t) = self.get_mut(to) {
                if !t.parents.contains(&parent) {
                    t.parents.push(parent);
                }
            }
        }
    }

    pub fn interface(&self, id: InstanceId) -> Option<InterfaceToken> {
        self.get(id).and_then(|i| i.interface)
    }

    /// Claim the interface slot, returning the previous holder if any.
    pub fn set_interface(
        &mut self,
        id: InstanceId,
        token: InterfaceToken,
    ) -> Result<Option<InterfaceToken>, CompileError> {
        let inst = self.instance_mut(id)?;
        Ok(inst.interface.replace(token))
    }

    /// Clear the interface slot only if it still holds `token`.
    pub fn clear_interface_if(&mut self, id: InstanceId, token: InterfaceToken) -> bool {
        match self.get_mut(id) {
            Some(inst) if inst.interface == Some(token) => {
                inst.interface = None;
                true
            }
            _ => false,
        }
    }

    /// Retire `from` in favour of `to`: the slot forwards from now on, the
    /// retired instance's interface claim is dropped and the move is queued
    /// for relocation listeners. Returns the retired instance.
    pub fn forward(&mut self, from: InstanceId, to: InstanceId) -> Result<Instance, CompileError> {
        let from = self.resolve(from).ok_or(CompileError::StaleHandle(from))?;
        let to = self.resolve(to).ok_or(CompileError::StaleHandle(to))?;
        if from == to {
            return Err(CompileError::StructuralMismatch(
                "cannot merge an instance with itself".to_string(),
            ));
        }
        let slot = std::mem::replace(
            &mut self.slots[from.index()],
            Slot::Forwarded {
                generation: from.generation,
                target: to,
            },
        );
        let mut retired = match slot {
            Slot::Occupied { instance, .. } => *instance,
            _ => return Err(CompileError::StaleHandle(from)),
        };
        retired.interface = None;
        self.live -= 1;
        let mut merged = std::mem::take(&mut retired.merged);
        merged.push(from.index);
        self.instance_mut(to)?.merged.extend(merged);
        self.relocations.push((from, to));
        Ok(retired)
    }

    /// Free one slot (and the slots forwarded to it). Children are not
    /// touched.
    pub fn free(&mut self, id: InstanceId) {
        let Some(slot) = self.slots.get_mut(id.index()) else {
            return;
        };
        if slot.generation() != id.generation {
            return;
        }
        let old = std::mem::replace(
            slot,
            Slot::Vacant {
                generation: id.generation.wrapping_add(1),
            },
        );
        match old {
            Slot::Occupied { instance, .. } => {
                self.live -= 1;
                self.free.push(id.index);
                for index in instance.merged {
                    let generation = self.slots[index as usize].generation();
                    if let Slot::Forwarded { .. } = self.slots[index as usize] {
                        self.slots[index as usize] = Slot::Vacant {
                            generation: generation.wrapping_add(1),
                        };
                        self.free.push(index);
                    }
                }
            }
            Slot::Forwarded { .. } => self.free.push(id.index),
            Slot::Vacant { .. } => {
                // Nothing was there; keep the generation unchanged.
                *slot = old;
            }
        }
    }

    /// Free `root` and everything reachable below it. Returns the number of
    /// instances freed.
    pub fn destroy_tree(&mut self, root: InstanceId) -> usize {
        let Some(root) = self.resolve(root) else {
            return 0;
        };
        let mut visited = BitList::new(self.capacity());
        let mut order = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            if visited.read(id.index()).unwrap_or(true) {
                continue;
            }
            let _ = visited.set(id.index());
            order.push(id);
            if let Some(inst) = self.get(id) {
                stack.extend(inst.children.values().filter_map(|c| self.resolve(*c)));
            }
        }
        for id in &order {
            self.free(*id);
        }
        order.len()
    }

    /// Every live instance in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (InstanceId, &Instance)> {
        self.slots.iter().enumerate().filter_map(|(i, s)| match s {
            Slot::Occupied {
                generation,
                instance,
            } => Some((
                InstanceId {
                    index: i as u32,
                    generation: *generation,
                },
                instance.as_ref(),
            )),
            _ => None,
        })
    }

    pub fn pending_relocations(&self) -> &[(InstanceId, InstanceId)] {
        &self.relocations
    }

    /// Deliver queued merges to `listener` and clear the queue.
    pub fn notify(&mut self, listener: &mut dyn RelocationListener) {
        for (from, to) in self.relocations.drain(..) {
            listener.relocated(from, to);
        }
    }

    /// Dotted path of `id` following first parents up to a root.
    pub fn path(&self, id: InstanceId, symbols: &SymbolTable) -> String {
        let mut parts = Vec::new();
        let mut current = self.resolve(id);
        let mut hops = 0;
        while let Some(cur) = current {
            let Some(inst) = self.get(cur) else { break };
            let Some(parent) = inst.parents.first().and_then(|p| self.resolve(*p)) else {
                break;
            };
            let key = self
                .get(parent)
                .and_then(|p| p.children.iter().find(|(_, c)| **c == cur).map(|(k, _)| *k));
            match key {
                Some(k) => parts.push(k),
                None => break,
            }
            current = Some(parent);
            hops += 1;
            if hops > 10_000 {
                break;
            }
        }
        let mut out = String::new();
        for key in parts.iter().rev() {
            if !key.is_subscript() && !out.is_empty() {
                out.push('.');
            }
            out.push_str(&key.describe(symbols));
        }
        out
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.relocations.clear();
        self.live = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ascend_core::BaseKind;

    fn model_desc() -> Arc<TypeDescription> {
        Arc::new(TypeDescription::new("m", BaseKind::Model))
    }

    fn model(arena: &mut InstanceArena) -> InstanceId {
        arena.alloc(Instance::new(InstanceKind::Model, model_desc()))
    }

    #[test]
    fn test_stale_handle_after_free() {
        let mut arena = InstanceArena::new();
        let a = model(&mut arena);
        arena.free(a);
        assert!(arena.get(a).is_none());
        let b = model(&mut arena);
        assert_eq!(a.index(), b.index());
        assert_ne!(a.generation(), b.generation());
        assert!(arena.get(a).is_none());
        assert!(matches!(arena.instance(a), Err(CompileError::StaleHandle(_))));
        assert!(arena.get(b).is_some());
    }

    #[test]
    fn test_add_child_rules() {
        let mut symbols = SymbolTable::new();
        let mut arena = InstanceArena::new();
        let parent = model(&mut arena);
        let child = model(&mut arena);
        let key = ChildKey::Name(symbols.intern("x"));
        arena.add_child(parent, key, child).unwrap();
        assert_eq!(arena.child(parent, &key), Some(child));
        assert_eq!(arena.get(child).unwrap().parents, vec![parent]);
        assert!(matches!(
            arena.add_child(parent, key, child),
            Err(CompileError::NameConflict { .. })
        ));
        let element = model(&mut arena);
        arena.add_child(parent, ChildKey::Int(3), element).unwrap();
        match arena.add_child(parent, ChildKey::Int(3), element) {
            Err(CompileError::NameConflict { name, .. }) => assert_eq!(name, "[3]"),
            other => panic!("unexpected result {:?}", other),
        }
        arena.get_mut(parent).unwrap().mark_complete();
        let other = ChildKey::Name(symbols.intern("y"));
        assert!(matches!(
            arena.add_child(parent, other, child),
            Err(CompileError::AlreadyComplete(_))
        ));
        assert_eq!(arena.path(child, &symbols), "x");
    }

    #[test]
    fn test_forwarding_and_relocation() {
        struct Log(Vec<(InstanceId, InstanceId)>);
        impl RelocationListener for Log {
            fn relocated(&mut self, from: InstanceId, to: InstanceId) {
                self.0.push((from, to));
            }
        }

        let mut arena = InstanceArena::new();
        let keep = model(&mut arena);
        let lose = model(&mut arena);
        let token = InterfaceToken { owner: 7, index: 0 };
        arena.set_interface(lose, token).unwrap();
        let retired = arena.forward(lose, keep).unwrap();
        assert_eq!(retired.interface(), None);
        assert_eq!(arena.resolve(lose), Some(keep));
        assert_eq!(arena.live_count(), 1);

        let mut log = Log(Vec::new());
        arena.notify(&mut log);
        assert_eq!(log.0, vec![(lose, keep)]);
        assert!(arena.pending_relocations().is_empty());

        arena.free(keep);
        assert!(arena.get(lose).is_none());
        assert_eq!(arena.live_count(), 0);
    }

    #[test]
    fn test_interface_cleared_only_by_holder() {
        let mut arena = InstanceArena::new();
        let a = model(&mut arena);
        let old = InterfaceToken { owner: 1, index: 3 };
        let new = InterfaceToken { owner: 2, index: 0 };
        assert_eq!(arena.set_interface(a, old).unwrap(), None);
        assert_eq!(arena.set_interface(a, new).unwrap(), Some(old));
        assert!(!arena.clear_interface_if(a, old));
        assert_eq!(arena.interface(a), Some(new));
        assert!(arena.clear_interface_if(a, new));
        assert_eq!(arena.interface(a), None);
    }

    #[test]
    fn test_destroy_tree_handles_shared_children() {
        let mut symbols = SymbolTable::new();
        let mut arena = InstanceArena::new();
        let root = model(&mut arena);
        let a = model(&mut arena);
        let shared = model(&mut arena);
        arena.add_child(root, ChildKey::Name(symbols.intern("a")), a).unwrap();
        arena.add_child(root, ChildKey::Name(symbols.intern("s")), shared).unwrap();
        arena.add_child(a, ChildKey::Name(symbols.intern("s")), shared).unwrap();
        let outside = model(&mut arena);

        assert_eq!(arena.destroy_tree(root), 3);
        assert_eq!(arena.live_count(), 1);
        assert!(arena.get(outside).is_some());
    }
}
