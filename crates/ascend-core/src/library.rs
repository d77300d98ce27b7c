//! Type library: every type description known to the compiler, keyed by name
//!
//! Types are immutable once added and shared as `Arc<TypeDescription>` with
//! the instances created from them. A refining type must be added after the
//! type it refines, so ancestry walks never see a missing link.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use indexmap::IndexMap;
use petgraph::algo::{is_cyclic_directed, kosaraju_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::CoreError;
use crate::notes::NotesDatabase;
use crate::statement::{Statement, StatementKind};
use crate::types::{Method, TypeDescription};

/// Section of a type definition that is inherited along the refinement chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Parameters,
    Where,
    Reductions,
    Body,
}

impl Section {
    fn of(self, desc: &TypeDescription) -> &[Statement] {
        match self {
            Section::Parameters => &desc.parameters,
            Section::Where => &desc.where_clauses,
            Section::Reductions => &desc.reductions,
            Section::Body => &desc.body,
        }
    }
}

/// Serialized form of a library file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LibraryDocument {
    #[serde(default)]
    pub types: Vec<TypeDescription>,
}

impl LibraryDocument {
    pub fn from_json(text: &str) -> Result<Self, CoreError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> Result<String, CoreError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyKind {
    Refines,
    Contains,
}

/// Graph of which types need which other types to instantiate.
#[derive(Debug)]
pub struct TypeDependencyGraph {
    graph: DiGraph<String, DependencyKind>,
    indices: HashMap<String, NodeIndex>,
}

impl TypeDependencyGraph {
    fn node(&self, name: &str) -> Option<NodeIndex> {
        self.indices.get(name).copied()
    }

    /// Types in an order where every type follows the types it depends on.
    pub fn dependency_order(&self) -> Result<Vec<String>, CoreError> {
        if is_cyclic_directed(&self.graph) {
            return Err(CoreError::CircularDependency(
                "type definitions contain themselves".to_string(),
            ));
        }
        toposort(&self.graph, None)
            .map(|order| {
                order
                    .into_iter()
                    .rev()
                    .map(|idx| self.graph[idx].clone())
                    .collect()
            })
            .map_err(|_| CoreError::CircularDependency("failed to order types".to_string()))
    }

    /// Groups of types that contain each other, directly or indirectly.
    /// A type that contains itself is reported as a group of one.
    pub fn detect_cycles(&self) -> Vec<Vec<String>> {
        kosaraju_scc(&self.graph)
            .into_iter()
            .filter(|scc| {
                scc.len() > 1 || self.graph.find_edge(scc[0], scc[0]).is_some()
            })
            .map(|scc| {
                let mut names: Vec<String> =
                    scc.into_iter().map(|idx| self.graph[idx].clone()).collect();
                names.sort();
                names
            })
            .collect()
    }

    /// Direct dependencies of `name`.
    pub fn dependencies(&self, name: &str) -> Vec<String> {
        match self.node(name) {
            Some(idx) => self
                .graph
                .neighbors(idx)
                .map(|n| self.graph[n].clone())
                .collect(),
            None => Vec::new(),
        }
    }
}

#[derive(Debug, Default)]
pub struct TypeLibrary {
    types: IndexMap<String, Arc<TypeDescription>>,
    notes: NotesDatabase,
}

impl TypeLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a type. Fails if the name is taken or the refined type is unknown
    /// or of a different kind.
    pub fn add(&mut self, desc: TypeDescription) -> Result<Arc<TypeDescription>, CoreError> {
        if self.types.contains_key(&desc.name) {
            return Err(CoreError::DuplicateType(desc.name));
        }
        if let Some(parent) = &desc.refines {
            let parent_desc = self
                .types
                .get(parent)
                .ok_or_else(|| CoreError::TypeNotFound(parent.clone()))?;
            if parent_desc.kind != desc.kind {
                return Err(CoreError::InvalidArgument(format!(
                    "{} '{}' cannot refine {} '{}'",
                    desc.kind, desc.name, parent_desc.kind, parent
                )));
            }
        }
        for note in &desc.notes {
            self.notes.add(&desc.name, note.clone());
        }
        debug!("Adding type '{}' ({})", desc.name, desc.kind);
        let desc = Arc::new(desc);
        self.types.insert(desc.name.clone(), Arc::clone(&desc));
        Ok(desc)
    }

    /// Add every type of a document, in order.
    pub fn add_document(&mut self, doc: LibraryDocument) -> Result<usize, CoreError> {
        let count = doc.types.len();
        for desc in doc.types {
            self.add(desc)?;
        }
        Ok(count)
    }

    pub fn find(&self, name: &str) -> Option<Arc<TypeDescription>> {
        self.types.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<TypeDescription>> {
        self.types.values()
    }

    pub fn notes(&self) -> &NotesDatabase {
        &self.notes
    }

    pub fn clear(&mut self) {
        self.types.clear();
        self.notes.clear();
    }

    /// The refinement chain of `name`, root ancestor first.
    pub fn ancestry(&self, name: &str) -> Result<Vec<Arc<TypeDescription>>, CoreError> {
        let mut chain = Vec::new();
        let mut current = Some(name.to_string());
        while let Some(n) = current {
            let desc = self.find(&n).ok_or(CoreError::TypeNotFound(n))?;
            current = desc.refines.clone();
            chain.push(desc);
        }
        chain.reverse();
        Ok(chain)
    }

    /// True when `name` is `ancestor` or refines it, directly or indirectly.
    pub fn refines_from(&self, name: &str, ancestor: &str) -> bool {
        let mut current = self.types.get(name);
        while let Some(desc) = current {
            if desc.name == ancestor {
                return true;
            }
            current = desc.refines.as_ref().and_then(|p| self.types.get(p));
        }
        false
    }

    /// The more refined of two types, or `None` when neither refines the other.
    pub fn more_refined(&self, a: &str, b: &str) -> Option<Arc<TypeDescription>> {
        if self.refines_from(a, b) {
            self.find(a)
        } else if self.refines_from(b, a) {
            self.find(b)
        } else {
            None
        }
    }

    /// Statements of `section` contributed by the types strictly after
    /// `ancestor` up to and including `descendant`. With no ancestor this is
    /// the full inherited section.
    pub fn statements_between(
        &self,
        ancestor: Option<&str>,
        descendant: &str,
        section: Section,
    ) -> Result<Vec<Statement>, CoreError> {
        let chain = self.ancestry(descendant)?;
        let start = match ancestor {
            Some(a) => {
                let pos = chain.iter().position(|d| d.name == a).ok_or_else(|| {
                    CoreError::InvalidArgument(format!("'{}' does not refine '{}'", descendant, a))
                })?;
                pos + 1
            }
            None => 0,
        };
        Ok(chain[start..]
            .iter()
            .flat_map(|d| section.of(d).iter().cloned())
            .collect())
    }

    /// Full inherited section of a type.
    pub fn full_section(&self, name: &str, section: Section) -> Result<Vec<Statement>, CoreError> {
        self.statements_between(None, name, section)
    }

    /// Find a method by name, most refined implementation first. Returns the
    /// type that defines it along with the method.
    pub fn find_method(
        &self,
        type_name: &str,
        method: &str,
    ) -> Option<(Arc<TypeDescription>, Method)> {
        let chain = self.ancestry(type_name).ok()?;
        chain
            .into_iter()
            .rev()
            .find_map(|d| d.method(method).cloned().map(|m| (Arc::clone(&d), m)))
    }

    pub fn dependency_graph(&self) -> TypeDependencyGraph {
        let mut graph = DiGraph::new();
        let mut indices = HashMap::new();
        for name in self.types.keys() {
            indices.insert(name.clone(), graph.add_node(name.clone()));
        }
        for desc in self.types.values() {
            let from = indices[&desc.name];
            if let Some(parent) = desc.refines.as_ref().and_then(|p| indices.get(p)) {
                graph.add_edge(from, *parent, DependencyKind::Refines);
            }
            let mut referenced = HashSet::new();
            for stmt in desc.parameters.iter().chain(&desc.body) {
                collect_type_refs(stmt, &mut referenced);
            }
            for name in referenced {
                if let Some(to) = indices.get(&name) {
                    graph.add_edge(from, *to, DependencyKind::Contains);
                }
            }
        }
        TypeDependencyGraph { graph, indices }
    }

    pub fn detect_cycles(&self) -> Vec<Vec<String>> {
        self.dependency_graph().detect_cycles()
    }

    pub fn dependency_order(&self) -> Result<Vec<String>, CoreError> {
        self.dependency_graph().dependency_order()
    }
}

fn collect_type_refs(stmt: &Statement, out: &mut HashSet<String>) {
    match &stmt.kind {
        StatementKind::IsA { type_name, .. }
        | StatementKind::WillBe { type_name, .. }
        | StatementKind::IsRefinedTo { type_name, .. } => {
            out.insert(type_name.clone());
        }
        _ => {}
    }
    for list in stmt.sub_statements() {
        for s in list {
            collect_type_refs(s, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{fundamental_types, BaseKind};
    use pretty_assertions::assert_eq;

    fn base_library() -> TypeLibrary {
        let mut lib = TypeLibrary::new();
        for t in fundamental_types() {
            lib.add(t).unwrap();
        }
        lib
    }

    fn model(name: &str, refines: Option<&str>, body: Vec<Statement>) -> TypeDescription {
        let mut desc = TypeDescription::new(name, BaseKind::Model);
        desc.refines = refines.map(str::to_string);
        desc.body = body;
        desc
    }

    #[test]
    fn test_duplicate_type_rejected() {
        let mut lib = base_library();
        lib.add(model("a", None, vec![])).unwrap();
        assert_eq!(
            lib.add(model("a", None, vec![])).unwrap_err(),
            CoreError::DuplicateType("a".to_string())
        );
    }

    #[test]
    fn test_refines_requires_known_parent_of_same_kind() {
        let mut lib = base_library();
        assert_eq!(
            lib.add(model("b", Some("a"), vec![])).unwrap_err(),
            CoreError::TypeNotFound("a".to_string())
        );
        assert!(matches!(
            lib.add(model("c", Some("real"), vec![])),
            Err(CoreError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_ancestry_and_statements_between() {
        let mut lib = base_library();
        lib.add(model("a", None, vec![Statement::is_a(&["x"], "real")])).unwrap();
        lib.add(model("b", Some("a"), vec![Statement::is_a(&["y"], "real")])).unwrap();
        lib.add(model("c", Some("b"), vec![Statement::is_a(&["z"], "real")])).unwrap();

        let names: Vec<_> = lib.ancestry("c").unwrap().iter().map(|d| d.name.clone()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);

        assert!(lib.refines_from("c", "a"));
        assert!(!lib.refines_from("a", "c"));
        assert_eq!(lib.more_refined("a", "c").unwrap().name, "c");
        assert!(lib.more_refined("a", "real").is_none());

        let between = lib.statements_between(Some("a"), "c", Section::Body).unwrap();
        assert_eq!(between, vec![Statement::is_a(&["y"], "real"), Statement::is_a(&["z"], "real")]);
        assert_eq!(lib.full_section("c", Section::Body).unwrap().len(), 3);
    }

    #[test]
    fn test_find_method_prefers_most_refined() {
        let mut lib = base_library();
        let mut a = model("a", None, vec![]);
        a.methods.push(Method { name: "default_self".into(), body: vec![] });
        a.methods.push(Method { name: "specify".into(), body: vec![] });
        lib.add(a).unwrap();
        let mut b = model("b", Some("a"), vec![]);
        b.methods.push(Method { name: "specify".into(), body: vec![] });
        lib.add(b).unwrap();

        assert_eq!(lib.find_method("b", "specify").unwrap().0.name, "b");
        assert_eq!(lib.find_method("b", "default_self").unwrap().0.name, "a");
        assert!(lib.find_method("b", "on_load").is_none());
    }

    #[test]
    fn test_cycles_and_order() {
        let mut lib = base_library();
        lib.add(model("leaf", None, vec![Statement::is_a(&["x"], "real")])).unwrap();
        lib.add(model("top", None, vec![Statement::is_a(&["l"], "leaf")])).unwrap();
        assert!(lib.detect_cycles().is_empty());
        let order = lib.dependency_order().unwrap();
        let pos = |n: &str| order.iter().position(|o| o == n).unwrap();
        assert!(pos("real") < pos("leaf"));
        assert!(pos("leaf") < pos("top"));

        lib.add(model("selfish", None, vec![Statement::is_a(&["me"], "selfish")])).unwrap();
        assert_eq!(lib.detect_cycles(), vec![vec!["selfish".to_string()]]);
        assert!(matches!(lib.dependency_order(), Err(CoreError::CircularDependency(_))));
    }

    #[test]
    fn test_document_round_trip() {
        let doc = LibraryDocument {
            types: vec![model("a", None, vec![Statement::is_a(&["x"], "real")])],
        };
        let json = doc.to_json().unwrap();
        let mut lib = base_library();
        let added = lib.add_document(LibraryDocument::from_json(&json).unwrap()).unwrap();
        assert_eq!(added, 1);
        assert!(lib.contains("a"));
    }
}
