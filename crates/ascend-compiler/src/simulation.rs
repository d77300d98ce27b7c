//! Simulations and their registry

use std::collections::HashMap;

use ascend_core::{Diagnostic, SymbolTable};
use indexmap::IndexMap;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::CompileError;
use crate::instance::{InstanceArena, InstanceId, InstanceKind};

/// A named instantiation of a model type. `root` is the simulation
/// instance whose single child, `model`, is the instantiated model.
#[derive(Debug, Clone, Serialize)]
pub struct Simulation {
    pub name: String,
    pub type_name: String,
    pub root: InstanceId,
    pub model: InstanceId,
    /// False when some statements failed under the best-effort policy.
    pub complete: bool,
    /// Diagnostics reported while the simulation was built.
    pub diagnostics: Vec<Diagnostic>,
}

impl Simulation {
    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(Diagnostic::is_error)
    }
}

#[derive(Debug, Default)]
pub struct SimulationRegistry {
    simulations: IndexMap<String, Simulation>,
}

impl SimulationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.simulations.contains_key(name)
    }

    pub fn insert(&mut self, sim: Simulation) -> Result<(), CompileError> {
        if self.simulations.contains_key(&sim.name) {
            return Err(CompileError::DuplicateSimulation(sim.name));
        }
        self.simulations.insert(sim.name.clone(), sim);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Simulation> {
        self.simulations.get(name)
    }

    /// Simulation names in creation order.
    pub fn names(&self) -> Vec<&str> {
        self.simulations.keys().map(String::as_str).collect()
    }

    pub fn remove(&mut self, name: &str) -> Option<Simulation> {
        self.simulations.shift_remove(name)
    }

    /// Remove every simulation, most recent first.
    pub fn drain(&mut self) -> Vec<Simulation> {
        let mut all: Vec<Simulation> = self.simulations.drain(..).map(|(_, s)| s).collect();
        all.reverse();
        all
    }

    pub fn len(&self) -> usize {
        self.simulations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.simulations.is_empty()
    }
}

/// One line per instance reachable from `root`, depth first in child
/// order: path, kind, type and (for relations) the incidence count. An
/// instance reached a second time is listed as an alias of its first path.
pub fn describe_tree(
    arena: &InstanceArena,
    symbols: &SymbolTable,
    root: InstanceId,
) -> Vec<String> {
    let mut lines = Vec::new();
    let mut seen: HashMap<InstanceId, String> = HashMap::new();
    let Some(root) = arena.resolve(root) else {
        return lines;
    };
    let mut stack = vec![(root, String::new())];
    while let Some((id, path)) = stack.pop() {
        let Some(id) = arena.resolve(id) else { continue };
        if let Some(first) = seen.get(&id) {
            lines.push(format!("{} -> {}", path, first));
            continue;
        }
        seen.insert(id, path.clone());
        let Some(inst) = arena.get(id) else { continue };
        let mut line = format!("{} : {:?} {}", path, inst.kind, inst.desc.name);
        if let Some(rel) = &inst.relation {
            line.push_str(&format!(" incidence={}", rel.incidence().len()));
        }
        if inst.kind.is_atom() && inst.is_constant() {
            line.push_str(&format!(" = {}", inst.value));
        }
        lines.push(line);
        for (key, child) in inst.children.iter().rev() {
            let name = key.describe(symbols);
            let child_path = if path.is_empty() {
                name
            } else if key.is_subscript() {
                format!("{}{}", path, name)
            } else {
                format!("{}.{}", path, name)
            };
            stack.push((*child, child_path));
        }
    }
    lines
}

/// SHA-256 over [`describe_tree`]. Two instantiations of the same type with
/// the same arguments have the same fingerprint.
pub fn fingerprint(arena: &InstanceArena, symbols: &SymbolTable, root: InstanceId) -> String {
    let mut hasher = Sha256::new();
    for line in describe_tree(arena, symbols, root) {
        hasher.update(line.as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}

/// Count the instances of each kind reachable from `root`.
pub fn kind_counts(arena: &InstanceArena, root: InstanceId) -> IndexMap<InstanceKind, usize> {
    let mut counts = IndexMap::new();
    let mut seen = std::collections::HashSet::new();
    let mut stack: Vec<InstanceId> = arena.resolve(root).into_iter().collect();
    while let Some(id) = stack.pop() {
        if !seen.insert(id) {
            continue;
        }
        if let Some(inst) = arena.get(id) {
            *counts.entry(inst.kind).or_insert(0) += 1;
            stack.extend(inst.children.values().filter_map(|c| arena.resolve(*c)));
        }
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use ascend_core::{BaseKind, TypeDescription};

    use crate::instance::{ChildKey, Instance};

    fn model(arena: &mut InstanceArena, name: &str) -> InstanceId {
        arena.alloc(Instance::new(
            InstanceKind::Model,
            Arc::new(TypeDescription::new(name, BaseKind::Model)),
        ))
    }

    #[test]
    fn test_registry_rejects_duplicates() {
        let mut arena = InstanceArena::new();
        let root = model(&mut arena, "sim");
        let sim = Simulation {
            name: "s".to_string(),
            type_name: "m".to_string(),
            root,
            model: root,
            complete: true,
            diagnostics: Vec::new(),
        };
        let mut registry = SimulationRegistry::new();
        registry.insert(sim.clone()).unwrap();
        assert_eq!(
            registry.insert(sim),
            Err(CompileError::DuplicateSimulation("s".to_string()))
        );
        assert_eq!(registry.names(), vec!["s"]);
        assert!(registry.remove("s").is_some());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_describe_tree_lists_aliases_once() {
        let mut arena = InstanceArena::new();
        let mut symbols = SymbolTable::new();
        let root = model(&mut arena, "top");
        let part = model(&mut arena, "part");
        arena
            .add_child(root, ChildKey::Name(symbols.intern("a")), part)
            .unwrap();
        arena
            .add_child(root, ChildKey::Name(symbols.intern("b")), part)
            .unwrap();

        let lines = describe_tree(&arena, &symbols, root);
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1], "a : Model part");
        assert_eq!(lines[2], "b -> a");
        assert_eq!(fingerprint(&arena, &symbols, root).len(), 64);
    }
}
