//! Instantiation engine
//!
//! Turns a type description into an instance subtree. For a model the order
//! is: arity check, parameter binding, reductions, WHERE checks, then the
//! body statements in declaration order, then completion. Refinement
//! (IS_REFINED_TO, ARE_THE_SAME, ARE_ALIKE) reruns the same steps for the
//! statements the more refined type adds.
//!
//! Errors raised while expanding a statement are reported to the
//! [`Reporter`] at the innermost statement list that sees them. Under
//! [`InstantiationPolicy::FailFast`] the first error unwinds the whole
//! instantiation and everything created so far is freed. Under
//! [`InstantiationPolicy::BestEffort`] only the failing statement's partial
//! result is removed and expansion continues with the next statement.
//! Merges performed by ARE_THE_SAME are not undone, and an instance that
//! outlives the rollback keeps whatever its refinements added.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use ascend_core::{
    BaseKind, Case, Diagnostic, DiagnosticLocation, DiagnosticSink, Expr, ExtMode, ForKind, Literal,
    Name, NamePart, RelOp, Reporter, Section, SetExpr, SetItem, Statement, StatementKind,
    SymbolTable, TypeDescription, TypeLibrary, ValueType,
};
use tracing::{debug, info};

use crate::config::{CompilerConfig, InstantiationPolicy};
use crate::error::CompileError;
use crate::evaluate::{EvalMode, Evaluator, Scope};
use crate::extfunc::ExternalLibrary;
use crate::instance::{
    ChildKey, Instance, InstanceArena, InstanceId, InstanceKind, RelationData, RelationForm,
    WhenCaseData, WhenData,
};
use crate::relation::RelationBuilder;
use crate::units::{Dimensions, UnitsTable};
use crate::value::{SetValue, Value};

/// An actual argument of a parameterized type, evaluated in the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    /// Bound to a WILL_BE parameter.
    Instance(InstanceId),
    /// Bound to an IS_A (constant or set) parameter.
    Value(Value),
}

/// A parameter that callers must supply.
#[derive(Debug, Clone)]
struct Formal {
    name: String,
    will_be: bool,
    default: Option<Expr>,
}

/// Lexical state of the statement list being expanded.
#[derive(Debug, Clone, Default)]
struct Frame {
    bindings: Vec<(String, Value)>,
    in_for: bool,
    conditional: bool,
}

#[derive(Debug, Clone, Copy, Default)]
struct Mark {
    created: usize,
    links: usize,
    refinements: usize,
}

/// Links a successful refinement added below `survivor`. They outlive a
/// rollback as long as the survivor does.
#[derive(Debug, Clone)]
struct Refinement {
    survivor: InstanceId,
    links: Vec<(InstanceId, ChildKey)>,
}

pub struct Instantiator<'a> {
    library: &'a TypeLibrary,
    arena: &'a mut InstanceArena,
    symbols: &'a mut SymbolTable,
    units: &'a UnitsTable,
    externals: &'a ExternalLibrary,
    config: &'a CompilerConfig,
    reporter: &'a mut Reporter,
    created: Vec<InstanceId>,
    links: Vec<(InstanceId, ChildKey)>,
    refinements: Vec<Refinement>,
    type_stack: Vec<String>,
    universals: HashMap<String, InstanceId>,
    auto_names: HashMap<(InstanceId, &'static str), usize>,
    aborting: bool,
    errors: usize,
}

impl<'a> Instantiator<'a> {
    pub fn new(
        library: &'a TypeLibrary,
        arena: &'a mut InstanceArena,
        symbols: &'a mut SymbolTable,
        units: &'a UnitsTable,
        externals: &'a ExternalLibrary,
        config: &'a CompilerConfig,
        reporter: &'a mut Reporter,
    ) -> Self {
        Self {
            library,
            arena,
            symbols,
            units,
            externals,
            config,
            reporter,
            created: Vec::new(),
            links: Vec::new(),
            refinements: Vec::new(),
            type_stack: Vec::new(),
            universals: HashMap::new(),
            auto_names: HashMap::new(),
            aborting: false,
            errors: 0,
        }
    }

    /// Errors reported so far.
    pub fn error_count(&self) -> usize {
        self.errors
    }

    /// Instances allocated so far (aliases are not counted).
    pub fn created_count(&self) -> usize {
        self.created.len()
    }

    /// Instantiate `type_name` as a root. Parameters take their WITH_VALUE
    /// defaults, evaluated in the scope of `holder`.
    ///
    /// An `Err` means nothing was kept: every instance created on the way
    /// has been freed. With the best-effort policy an `Ok` tree may still
    /// be missing the parts whose statements failed; see
    /// [`Instantiator::error_count`].
    pub fn instantiate(
        &mut self,
        holder: InstanceId,
        type_name: &str,
    ) -> Result<InstanceId, CompileError> {
        info!("Instantiating type '{}'", type_name);
        let result = self
            .find_type(type_name)
            .and_then(|desc| {
                let args = self.default_args(holder, &desc)?;
                self.create_instance(&desc, &args, None)
            });
        match result {
            Ok(id) => {
                debug!(
                    "Instantiated '{}': {} instance(s), {} error(s)",
                    type_name,
                    self.created.len(),
                    self.errors
                );
                Ok(id)
            }
            Err(err) => {
                if !self.aborting {
                    self.errors += 1;
                    self.reporter.report(
                        Diagnostic::error(err.code(), err.to_string())
                            .at(DiagnosticLocation::new().in_type(type_name)),
                    );
                }
                self.rollback(Mark::default());
                Err(err)
            }
        }
    }

    fn find_type(&self, name: &str) -> Result<Arc<TypeDescription>, CompileError> {
        self.library
            .find(name)
            .ok_or_else(|| CompileError::TypeResolutionFailure(name.to_string()))
    }

    fn evaluator(&self, mode: EvalMode) -> Evaluator<'_> {
        Evaluator::new(&*self.arena, &*self.symbols, self.units, self.externals, mode)
    }

    fn eval(
        &self,
        owner: InstanceId,
        frame: &Frame,
        expr: &Expr,
        mode: EvalMode,
    ) -> Result<Value, CompileError> {
        self.evaluator(mode).eval(Scope::new(owner, &frame.bindings), expr)
    }

    fn resolve(
        &self,
        owner: InstanceId,
        frame: &Frame,
        name: &Name,
    ) -> Result<InstanceId, CompileError> {
        self.evaluator(EvalMode::Constant)
            .resolve(Scope::new(owner, &frame.bindings), name)
    }

    fn leaves(
        &self,
        owner: InstanceId,
        frame: &Frame,
        name: &Name,
    ) -> Result<Vec<InstanceId>, CompileError> {
        self.evaluator(EvalMode::Constant)
            .leaves(Scope::new(owner, &frame.bindings), name)
    }

    fn type_name_of(&self, id: InstanceId) -> String {
        self.arena
            .get(id)
            .map(|i| i.desc.name.clone())
            .unwrap_or_else(|| "?".to_string())
    }

    fn alloc(&mut self, kind: InstanceKind, desc: &Arc<TypeDescription>) -> InstanceId {
        let id = self.arena.alloc(Instance::new(kind, Arc::clone(desc)));
        self.created.push(id);
        id
    }

    fn link(
        &mut self,
        parent: InstanceId,
        key: ChildKey,
        child: InstanceId,
    ) -> Result<(), CompileError> {
        self.arena.add_child(parent, key, child).map_err(|err| match err {
            CompileError::NameConflict { owner, .. } => CompileError::NameConflict {
                name: key.describe(self.symbols),
                owner,
            },
            other => other,
        })?;
        self.links.push((parent, key));
        Ok(())
    }

    fn mark(&self) -> Mark {
        Mark {
            created: self.created.len(),
            links: self.links.len(),
            refinements: self.refinements.len(),
        }
    }

    /// Undo everything since `mark`, except what refinements of surviving
    /// instances attached: a refined instance keeps its new type, so it
    /// keeps the parts that type added too.
    fn rollback(&mut self, mark: Mark) {
        let created: Vec<InstanceId> = self.created.drain(mark.created..).collect();
        let links: Vec<(InstanceId, ChildKey)> = self.links.drain(mark.links..).collect();
        let links: Vec<(InstanceId, ChildKey)> = links
            .into_iter()
            .map(|(parent, key)| (self.arena.resolve(parent).unwrap_or(parent), key))
            .collect();
        let refinements: Vec<Refinement> = self.refinements.drain(mark.refinements..).collect();

        let mut doomed: HashSet<InstanceId> = created.iter().copied().collect();
        let tracked: HashSet<(InstanceId, ChildKey)> = links.iter().copied().collect();
        let mut kept_links: HashSet<(InstanceId, ChildKey)> = HashSet::new();
        let mut applied = vec![false; refinements.len()];
        loop {
            let mut stack = Vec::new();
            for (refinement, done) in refinements.iter().zip(applied.iter_mut()) {
                let survivor = self
                    .arena
                    .resolve(refinement.survivor)
                    .unwrap_or(refinement.survivor);
                if *done || doomed.contains(&survivor) {
                    continue;
                }
                *done = true;
                for (parent, key) in &refinement.links {
                    let parent = self.arena.resolve(*parent).unwrap_or(*parent);
                    kept_links.insert((parent, *key));
                }
                stack.push(survivor);
            }
            if stack.is_empty() {
                break;
            }
            while let Some(id) = stack.pop() {
                let Some(inst) = self.arena.get(id) else {
                    continue;
                };
                for (key, child) in &inst.children {
                    let edge = (id, *key);
                    if tracked.contains(&edge) && !kept_links.contains(&edge) {
                        continue;
                    }
                    let child = self.arena.resolve(*child).unwrap_or(*child);
                    if doomed.remove(&child) {
                        stack.push(child);
                    }
                }
            }
        }

        let mut kept = Vec::new();
        for edge in links.into_iter().rev() {
            if kept_links.contains(&edge) {
                kept.push(edge);
            } else {
                self.arena.remove_child(edge.0, &edge.1);
            }
        }
        self.links.extend(kept.into_iter().rev());
        let mut kept = Vec::new();
        for id in created.into_iter().rev() {
            let target = self.arena.resolve(id).unwrap_or(id);
            if doomed.contains(&target) {
                // A merged-away slot is freed along with its target.
                if target == id {
                    self.arena.free(id);
                }
            } else {
                kept.push(id);
            }
        }
        self.created.extend(kept.into_iter().rev());
        for (refinement, done) in refinements.into_iter().zip(applied) {
            if done {
                self.refinements.push(refinement);
            }
        }
        self.universals.retain(|_, id| self.arena.contains(*id));
    }

    fn report(&mut self, owner: InstanceId, stmt: &Statement, err: &CompileError) {
        self.errors += 1;
        let location = DiagnosticLocation::new()
            .in_type(self.type_name_of(owner))
            .in_instance(self.arena.path(owner, self.symbols));
        self.reporter.report(
            Diagnostic::error(err.code(), err.to_string())
                .at(location)
                .with_statement(stmt),
        );
    }

    // Parameters

    /// Parameters a caller must supply: all inherited parameters from
    /// `since` (exclusive) to `desc`, minus the ones fixed by reductions.
    fn formals(
        &self,
        desc: &TypeDescription,
        since: Option<&str>,
    ) -> Result<Vec<Formal>, CompileError> {
        let params = self.library.statements_between(since, &desc.name, Section::Parameters)?;
        let reductions = self.library.full_section(&desc.name, Section::Reductions)?;
        let reduced: Vec<&str> = reductions
            .iter()
            .filter_map(|s| match &s.kind {
                StatementKind::ConstAssign { target, .. } => target.base_id(),
                _ => None,
            })
            .collect();
        let mut formals = Vec::new();
        for stmt in &params {
            let (names, will_be, default) = match &stmt.kind {
                StatementKind::IsA { names, value, .. } => (names, false, value.clone()),
                StatementKind::WillBe { names, .. } => (names, true, None),
                _ => continue,
            };
            for name in names {
                let Some(id) = name.base_id() else { continue };
                if !reduced.contains(&id) {
                    formals.push(Formal {
                        name: id.to_string(),
                        will_be,
                        default: default.clone(),
                    });
                }
            }
        }
        Ok(formals)
    }

    fn default_args(
        &self,
        holder: InstanceId,
        desc: &TypeDescription,
    ) -> Result<Vec<Arg>, CompileError> {
        if desc.kind != BaseKind::Model {
            return Ok(Vec::new());
        }
        let formals = self.formals(desc, None)?;
        let frame = Frame::default();
        let mut args = Vec::with_capacity(formals.len());
        for formal in &formals {
            if let (Some(expr), false) = (&formal.default, formal.will_be) {
                args.push(Arg::Value(self.eval(holder, &frame, expr, EvalMode::Constant)?));
            }
        }
        if args.len() != formals.len() {
            return Err(CompileError::ArityMismatch {
                type_name: desc.name.clone(),
                expected: formals.len(),
                found: args.len(),
            });
        }
        Ok(args)
    }

    fn bind_args(
        &self,
        owner: InstanceId,
        frame: &Frame,
        desc: &TypeDescription,
        formals: &[Formal],
        args: &[Expr],
    ) -> Result<Vec<Arg>, CompileError> {
        if formals.len() != args.len() {
            return Err(CompileError::ArityMismatch {
                type_name: desc.name.clone(),
                expected: formals.len(),
                found: args.len(),
            });
        }
        formals
            .iter()
            .zip(args)
            .map(|(formal, arg)| match (formal.will_be, arg) {
                (true, Expr::Name(name)) => self.resolve(owner, frame, name).map(Arg::Instance),
                (true, other) => Err(CompileError::StructuralMismatch(format!(
                    "argument '{}' for WILL_BE parameter '{}' of '{}' is not an instance name",
                    other, formal.name, desc.name
                ))),
                (false, expr) => self.eval(owner, frame, expr, EvalMode::Constant).map(Arg::Value),
            })
            .collect()
    }

    fn bind_parameters(
        &mut self,
        model: InstanceId,
        desc: &TypeDescription,
        since: Option<&str>,
        args: &[Arg],
    ) -> Result<(), CompileError> {
        let formals = self.formals(desc, since)?;
        let params = self.library.statements_between(since, &desc.name, Section::Parameters)?;
        let mut next = 0;
        for stmt in &params {
            let (names, type_name, of_type, will_be) = match &stmt.kind {
                StatementKind::IsA {
                    names,
                    type_name,
                    of_type,
                    ..
                } => (names, type_name, of_type, false),
                StatementKind::WillBe { names, type_name, .. } => (names, type_name, &None, true),
                other => {
                    return Err(CompileError::IllegalContext(format!(
                        "{} in the parameter list of '{}'",
                        other.keyword(),
                        desc.name
                    )))
                }
            };
            let param_desc = self.find_type(type_name)?;
            for name in names {
                let Some(id) = name.base_id() else { continue };
                let arg = match formals.get(next) {
                    Some(f) if f.name == id => {
                        next += 1;
                        args.get(next - 1)
                    }
                    _ => None,
                };
                let key = ChildKey::Name(self.symbols.intern(id));
                if self.arena.child(model, &key).is_some() {
                    return Err(CompileError::NameConflict {
                        name: id.to_string(),
                        owner: desc.name.clone(),
                    });
                }
                match (will_be, arg) {
                    (true, Some(Arg::Instance(target))) => {
                        let target_type = self.type_name_of(*target);
                        if !self.library.refines_from(&target_type, type_name) {
                            return Err(CompileError::StructuralMismatch(format!(
                                "argument for '{}' is a '{}', which is not a '{}'",
                                id, target_type, type_name
                            )));
                        }
                        self.link(model, key, *target)?;
                    }
                    (true, _) => {
                        return Err(CompileError::StructuralMismatch(format!(
                            "WILL_BE parameter '{}' of '{}' is not bound to an instance",
                            id, desc.name
                        )))
                    }
                    (false, arg) => {
                        let child = self.create_instance(&param_desc, &[], of_type.as_deref())?;
                        self.link(model, key, child)?;
                        if let Some(Arg::Value(v)) = arg {
                            self.assign_constant(child, v.clone())?;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    // Instance creation

    fn create_instance(
        &mut self,
        desc: &Arc<TypeDescription>,
        args: &[Arg],
        of_type: Option<&str>,
    ) -> Result<InstanceId, CompileError> {
        if desc.universal {
            if let Some(id) = self.universals.get(&desc.name) {
                return Ok(*id);
            }
        }
        if desc.kind != BaseKind::Model && !args.is_empty() {
            return Err(CompileError::ArityMismatch {
                type_name: desc.name.clone(),
                expected: 0,
                found: args.len(),
            });
        }
        let id = match desc.kind {
            BaseKind::Model => self.create_model(desc, args)?,
            BaseKind::Atom | BaseKind::Constant => self.create_atom(desc)?,
            BaseKind::Set => {
                let id = self.alloc(InstanceKind::Set, desc);
                let inst = self.arena.instance_mut(id)?;
                inst.of_type = of_type.map(str::to_string);
                inst.mark_complete();
                id
            }
            BaseKind::Relation | BaseKind::LogRelation | BaseKind::When => {
                let kind = match desc.kind {
                    BaseKind::Relation => InstanceKind::Relation,
                    BaseKind::LogRelation => InstanceKind::LogRelation,
                    _ => InstanceKind::When,
                };
                let id = self.alloc(kind, desc);
                let body = self.library.full_section(&desc.name, Section::Body)?;
                self.expand_list(id, &body, &Frame::default())?;
                self.finish(id)?;
                id
            }
            BaseKind::Array | BaseKind::Patch => {
                return Err(CompileError::IllegalContext(format!(
                    "'{}' is a {} and cannot be instantiated",
                    desc.name, desc.kind
                )))
            }
        };
        if desc.universal {
            self.universals.insert(desc.name.clone(), id);
        }
        Ok(id)
    }

    fn create_model(
        &mut self,
        desc: &Arc<TypeDescription>,
        args: &[Arg],
    ) -> Result<InstanceId, CompileError> {
        if self.type_stack.contains(&desc.name) {
            return Err(CompileError::StructuralMismatch(format!(
                "type '{}' contains itself",
                desc.name
            )));
        }
        let expected = self.formals(desc, None)?.len();
        if expected != args.len() {
            return Err(CompileError::ArityMismatch {
                type_name: desc.name.clone(),
                expected,
                found: args.len(),
            });
        }
        let id = self.alloc(InstanceKind::Model, desc);
        self.type_stack.push(desc.name.clone());
        let result = self.build_model(id, desc, None, args);
        self.type_stack.pop();
        result.map(|_| id)
    }

    /// Run the statements `desc` adds after `since` on `model`.
    fn build_model(
        &mut self,
        model: InstanceId,
        desc: &Arc<TypeDescription>,
        since: Option<&str>,
        args: &[Arg],
    ) -> Result<(), CompileError> {
        debug!("Building '{}' ({})", desc.name, since.unwrap_or("new"));
        self.bind_parameters(model, desc, since, args)?;
        let root = Frame::default();
        for stmt in self.library.statements_between(since, &desc.name, Section::Reductions)? {
            self.expand(model, &stmt, &root)?;
        }
        let where_clauses = self.library.statements_between(since, &desc.name, Section::Where)?;
        self.check_where(model, &where_clauses, &root)?;
        let body = self.library.statements_between(since, &desc.name, Section::Body)?;
        self.expand_list(model, &body, &root)?;
        self.finish(model)
    }

    fn create_atom(&mut self, desc: &Arc<TypeDescription>) -> Result<InstanceId, CompileError> {
        let value_type = self.value_type_of(desc)?;
        let kind = match value_type {
            ValueType::Real => InstanceKind::Real,
            ValueType::Integer => InstanceKind::Integer,
            ValueType::Boolean => InstanceKind::Boolean,
            ValueType::Symbol => InstanceKind::Symbol,
        };
        let (value, dims) = self.atom_default(desc)?;
        let id = self.alloc(kind, desc);
        {
            let inst = self.arena.instance_mut(id)?;
            inst.defaulted = value.is_defined() && !desc.is_constant();
            inst.value = value;
            inst.dims = dims;
        }
        let body = self.library.full_section(&desc.name, Section::Body)?;
        if !body.is_empty() {
            self.type_stack.push(desc.name.clone());
            let result = self.expand_list(id, &body, &Frame::default());
            self.type_stack.pop();
            result?;
        }
        self.finish(id)?;
        Ok(id)
    }

    fn value_type_of(&self, desc: &TypeDescription) -> Result<ValueType, CompileError> {
        self.library
            .ancestry(&desc.name)?
            .iter()
            .rev()
            .find_map(|d| d.value_type())
            .ok_or_else(|| {
                CompileError::StructuralMismatch(format!("atom '{}' has no value type", desc.name))
            })
    }

    /// Default value (in SI) and dimensions of an atom, taken from the most
    /// refined ancestor that declares them.
    fn atom_default(&self, desc: &TypeDescription) -> Result<(Value, Dimensions), CompileError> {
        let chain = self.library.ancestry(&desc.name)?;
        let atoms = chain.iter().rev().filter_map(|d| d.atom.as_ref());
        let default = atoms.clone().find_map(|a| a.default.as_ref());
        let units = atoms.clone().find_map(|a| a.units.as_deref());
        let dims = match units {
            Some(u) => self.units.parse(u)?.dims,
            None => Dimensions::dimensionless(),
        };
        let value = match (default, units) {
            (Some(Literal::Real(r)), Some(u)) => Value::Real(self.units.to_si(*r, u)?.0),
            (Some(lit), _) => Value::from(lit),
            (None, _) => Value::Undefined,
        };
        Ok((value, dims))
    }

    /// Mark `id` complete, together with any still open arrays below it.
    fn finish(&mut self, id: InstanceId) -> Result<(), CompileError> {
        let open_arrays: Vec<InstanceId> = {
            let inst = self.arena.instance(id)?;
            inst.children
                .values()
                .filter_map(|c| self.arena.get(*c).map(|ci| (*c, ci)))
                .filter(|(_, ci)| ci.kind == InstanceKind::Array && !ci.is_complete())
                .map(|(c, _)| c)
                .collect()
        };
        for array in open_arrays {
            self.finish(array)?;
        }
        self.arena.instance_mut(id)?.mark_complete();
        Ok(())
    }

    // Declarations

    /// Create the instance(s) a declared name denotes under `owner`. Plain
    /// names add one child; subscripted names create or extend arrays.
    /// Returns every instance produced by `make`.
    fn declare<F>(
        &mut self,
        owner: InstanceId,
        name: &Name,
        frame: &Frame,
        element: &Arc<TypeDescription>,
        mut make: F,
    ) -> Result<Vec<InstanceId>, CompileError>
    where
        F: FnMut(&mut Self) -> Result<InstanceId, CompileError>,
    {
        let mut parts = name.parts.iter();
        let (Some(NamePart::Id(base)), subscripts) = (parts.next(), parts) else {
            return Err(CompileError::IllegalContext(format!("'{}' cannot be declared", name)));
        };
        let subscripts: Vec<&SetExpr> = subscripts
            .map(|p| match p {
                NamePart::Subscript(s) => Ok(s),
                NamePart::Id(_) => Err(CompileError::IllegalContext(format!(
                    "compound name '{}' cannot be declared",
                    name
                ))),
            })
            .collect::<Result<_, _>>()?;
        if frame.bindings.iter().any(|(b, _)| b == base) {
            return Err(CompileError::IllegalContext(format!(
                "'{}' is a FOR index and cannot be declared",
                base
            )));
        }
        let owner_type = self.type_name_of(owner);
        let key = ChildKey::Name(self.symbols.intern(base));
        let mut made = Vec::new();

        if subscripts.is_empty() {
            if self.arena.child(owner, &key).is_some() {
                return Err(CompileError::NameConflict {
                    name: base.clone(),
                    owner: owner_type,
                });
            }
            let child = make(self)?;
            self.link(owner, key, child)?;
            made.push(child);
            return Ok(made);
        }

        let mut slots = vec![(owner, key)];
        let mut dense_arrays = Vec::new();
        for (depth, items) in subscripts.iter().enumerate() {
            let last = depth + 1 == subscripts.len();
            let (values, dense) = self.subscript_values(owner, frame, items)?;
            let mut next = Vec::new();
            for (parent, slot_key) in slots {
                let array = self.array_at(parent, slot_key, element, name, &owner_type)?;
                if dense {
                    dense_arrays.push(array);
                }
                for value in &values {
                    let element_key = self.key_for(value)?;
                    if last {
                        if self.arena.child(array, &element_key).is_some() {
                            return Err(CompileError::NameConflict {
                                name: format!("{}[{}]", base, value),
                                owner: owner_type.clone(),
                            });
                        }
                        let child = make(self)?;
                        self.link(array, element_key, child)?;
                        made.push(child);
                    } else {
                        next.push((array, element_key));
                    }
                }
            }
            slots = next;
        }
        for array in dense_arrays.into_iter().rev() {
            self.arena.instance_mut(array)?.mark_complete();
        }
        Ok(made)
    }

    /// Subscript values of one `[...]`, and whether it declares the whole
    /// index set at once (a dense array) rather than one element.
    fn subscript_values(
        &self,
        owner: InstanceId,
        frame: &Frame,
        items: &SetExpr,
    ) -> Result<(Vec<Value>, bool), CompileError> {
        if let [SetItem::Single(expr)] = items.as_slice() {
            return match self.eval(owner, frame, expr, EvalMode::Constant)? {
                Value::Set(s) => Ok((s.elements(), true)),
                v => Ok((vec![v], false)),
            };
        }
        let set = self
            .evaluator(EvalMode::Constant)
            .eval_set(Scope::new(owner, &frame.bindings), items)?;
        Ok((set.elements(), true))
    }

    fn key_for(&mut self, value: &Value) -> Result<ChildKey, CompileError> {
        match value {
            Value::Int(i) => Ok(ChildKey::Int(*i)),
            Value::Sym(s) => Ok(ChildKey::Sym(self.symbols.intern(s))),
            v => Err(CompileError::Evaluation(format!(
                "a {} value cannot be an array subscript",
                v.type_name()
            ))),
        }
    }

    /// The array stored at `parent[key]`, created if absent. An existing
    /// sparse array is extended; a finished one is a name conflict.
    fn array_at(
        &mut self,
        parent: InstanceId,
        key: ChildKey,
        element: &Arc<TypeDescription>,
        name: &Name,
        owner_type: &str,
    ) -> Result<InstanceId, CompileError> {
        if let Some(existing) = self.arena.child(parent, &key) {
            let inst = self.arena.instance(existing)?;
            if inst.kind != InstanceKind::Array || inst.is_complete() {
                return Err(CompileError::NameConflict {
                    name: name.to_string(),
                    owner: owner_type.to_string(),
                });
            }
            return Ok(existing);
        }
        let array = self.alloc(InstanceKind::Array, element);
        self.link(parent, key, array)?;
        Ok(array)
    }

    fn auto_name(&mut self, owner: InstanceId, prefix: &'static str) -> Name {
        let counter = self.auto_names.entry((owner, prefix)).or_insert(0);
        loop {
            *counter += 1;
            let candidate = format!("{}_{}", prefix, counter);
            let taken = self
                .symbols
                .find(&candidate)
                .and_then(|s| self.arena.child(owner, &ChildKey::Name(s)))
                .is_some();
            if !taken {
                return Name::id(candidate);
            }
        }
    }

    // Values

    fn assign_default(&mut self, id: InstanceId, value: Value) -> Result<(), CompileError> {
        let inst = self.arena.instance_mut(id)?;
        if inst.is_constant() {
            return Err(CompileError::IllegalContext(format!(
                "':=' cannot assign the constant '{}'; use ':=='",
                inst.desc.name
            )));
        }
        let value_type = atom_value_type(inst.kind).ok_or_else(|| {
            CompileError::Evaluation(format!("a {:?} instance cannot be assigned", inst.kind))
        })?;
        inst.value = value.coerce(value_type).map_err(CompileError::Evaluation)?;
        inst.defaulted = false;
        Ok(())
    }

    fn assign_constant(&mut self, id: InstanceId, value: Value) -> Result<(), CompileError> {
        let inst = self.arena.instance_mut(id)?;
        let value = match inst.kind {
            InstanceKind::Set => match value {
                Value::Set(s) => Value::Set(s),
                v => {
                    return Err(CompileError::Evaluation(format!(
                        "a set cannot be assigned a {} value",
                        v.type_name()
                    )))
                }
            },
            kind if inst.is_constant() => {
                let value_type = atom_value_type(kind).ok_or_else(|| {
                    CompileError::Evaluation(format!("a {:?} instance cannot be assigned", kind))
                })?;
                value.coerce(value_type).map_err(CompileError::Evaluation)?
            }
            _ => {
                return Err(CompileError::IllegalContext(format!(
                    "':==' needs a constant, '{}' is a variable",
                    inst.desc.name
                )))
            }
        };
        if inst.value.is_defined() && inst.value != value {
            return Err(CompileError::StructuralMismatch(format!(
                "constant '{}' is already {} and cannot become {}",
                inst.desc.name, inst.value, value
            )));
        }
        inst.value = value;
        Ok(())
    }

    fn assign_initial(&mut self, id: InstanceId, value: Value) -> Result<(), CompileError> {
        if self.arena.instance(id)?.is_constant() {
            self.assign_constant(id, value)
        } else {
            self.assign_default(id, value)
        }
    }

    // Statement expansion

    fn expand_list(
        &mut self,
        owner: InstanceId,
        stmts: &[Statement],
        frame: &Frame,
    ) -> Result<(), CompileError> {
        for stmt in stmts {
            let mark = self.mark();
            if let Err(err) = self.expand(owner, stmt, frame) {
                if !self.aborting {
                    self.report(owner, stmt, &err);
                }
                match self.config.policy {
                    InstantiationPolicy::FailFast => {
                        self.aborting = true;
                        return Err(err);
                    }
                    InstantiationPolicy::BestEffort => self.rollback(mark),
                }
            }
        }
        Ok(())
    }

    fn expand(
        &mut self,
        owner: InstanceId,
        stmt: &Statement,
        frame: &Frame,
    ) -> Result<(), CompileError> {
        debug!("Expanding {} in '{}'", stmt.keyword(), self.type_name_of(owner));
        if frame.conditional
            && !matches!(
                stmt.kind,
                StatementKind::Relation { .. }
                    | StatementKind::LogRelation { .. }
                    | StatementKind::For { .. }
            )
        {
            return Err(CompileError::IllegalContext(format!(
                "{} is not allowed inside CONDITIONAL",
                stmt.keyword()
            )));
        }
        match &stmt.kind {
            StatementKind::IsA {
                names,
                type_name,
                args,
                of_type,
                value,
            } => self.expand_is_a(
                owner,
                frame,
                names,
                type_name,
                args,
                of_type.as_deref(),
                value.as_ref(),
            ),
            StatementKind::WillBe { .. } => Err(CompileError::IllegalContext(
                "WILL_BE is only allowed in parameter lists".to_string(),
            )),
            StatementKind::Aliases { names, target } => {
                let target = self.resolve(owner, frame, target)?;
                let desc = Arc::clone(&self.arena.instance(target)?.desc);
                for name in names {
                    self.declare(owner, name, frame, &desc, |_| Ok(target))?;
                }
                Ok(())
            }
            StatementKind::AliasArray {
                array,
                sources,
                set_name,
                set_type,
                values,
            } => self.expand_alias_array(
                owner,
                frame,
                array,
                sources,
                set_name,
                set_type,
                values.as_ref(),
            ),
            StatementKind::IsRefinedTo { names, type_name, args } => {
                let desc = self.find_type(type_name)?;
                for name in names {
                    for id in self.leaves(owner, frame, name)? {
                        self.refine(id, &desc, args, owner, frame)?;
                    }
                }
                Ok(())
            }
            StatementKind::AreTheSame { names } => {
                let ids = names
                    .iter()
                    .map(|n| self.resolve(owner, frame, n))
                    .collect::<Result<Vec<_>, _>>()?;
                let Some((first, rest)) = ids.split_first() else {
                    return Ok(());
                };
                let mut survivor = *first;
                for other in rest {
                    survivor = self.merge(survivor, *other)?;
                }
                Ok(())
            }
            StatementKind::AreAlike { names } => self.expand_are_alike(owner, frame, names),
            StatementKind::WillBeTheSame { names } | StatementKind::WillNotBeTheSame { names } => {
                self.check_identity(owner, frame, stmt, names)
            }
            StatementKind::Relation { name, expr } => {
                let data = {
                    let ev = self.evaluator(EvalMode::Constant);
                    RelationBuilder::new(&ev, self.config.simplify_relations).build(
                        Scope::new(owner, &frame.bindings),
                        expr,
                        frame.conditional,
                    )?
                };
                let desc = self.find_type("relation")?;
                let name = match name {
                    Some(n) => n.clone(),
                    None => self.auto_name(owner, "_rel"),
                };
                self.declare(owner, &name, frame, &desc, |this| {
                    let id = this.create_instance(&desc, &[], None)?;
                    this.arena.instance_mut(id)?.relation = Some(data.clone());
                    Ok(id)
                })?;
                Ok(())
            }
            StatementKind::LogRelation { name, expr } => {
                let data = {
                    let ev = self.evaluator(EvalMode::Constant);
                    RelationBuilder::new(&ev, self.config.simplify_relations).build_logrel(
                        Scope::new(owner, &frame.bindings),
                        expr,
                        frame.conditional,
                    )?
                };
                let desc = self.find_type("logic_relation")?;
                let name = match name {
                    Some(n) => n.clone(),
                    None => self.auto_name(owner, "_logrel"),
                };
                self.declare(owner, &name, frame, &desc, |this| {
                    let id = this.create_instance(&desc, &[], None)?;
                    this.arena.instance_mut(id)?.logrel = Some(data.clone());
                    Ok(id)
                })?;
                Ok(())
            }
            StatementKind::For { index, set, kind, body } => {
                if *kind != ForKind::Create {
                    return Err(CompileError::IllegalContext(format!(
                        "FOR/{:?} is not allowed in a declarative body",
                        kind
                    )));
                }
                let shadows_part = self
                    .symbols
                    .find(index)
                    .and_then(|s| self.arena.child(owner, &ChildKey::Name(s)))
                    .is_some();
                if shadows_part || frame.bindings.iter().any(|(b, _)| b == index) {
                    return Err(CompileError::IllegalContext(format!(
                        "FOR index '{}' shadows an existing name",
                        index
                    )));
                }
                let set = self
                    .evaluator(EvalMode::Constant)
                    .eval_set(Scope::new(owner, &frame.bindings), set)?;
                for element in set.elements() {
                    let mut inner = frame.clone();
                    inner.bindings.push((index.clone(), element));
                    inner.in_for = true;
                    self.expand_list(owner, body, &inner)?;
                }
                Ok(())
            }
            StatementKind::When { name, vars, cases } => {
                self.expand_when(owner, frame, name.as_ref(), vars, cases).map(|_| ())
            }
            StatementKind::Use { .. } => Err(CompileError::IllegalContext(
                "USE is only allowed inside WHEN".to_string(),
            )),
            StatementKind::Select { vars, cases } => {
                if frame.in_for {
                    return Err(CompileError::IllegalContext(
                        "SELECT is not allowed inside FOR".to_string(),
                    ));
                }
                let selectors = vars
                    .iter()
                    .map(|v| self.eval(owner, frame, &Expr::Name(v.clone()), EvalMode::Constant))
                    .collect::<Result<Vec<_>, _>>()?;
                for case in cases {
                    let matched = match &case.values {
                        None => true,
                        Some(values) => {
                            if values.len() != selectors.len() {
                                return Err(CompileError::StructuralMismatch(format!(
                                    "SELECT case has {} value(s) for {} selector(s)",
                                    values.len(),
                                    selectors.len()
                                )));
                            }
                            let mut all = true;
                            for (selector, value) in selectors.iter().zip(values) {
                                let case_value =
                                    self.eval(owner, frame, value, EvalMode::Constant)?;
                                all &= selector.matches(&case_value);
                            }
                            all
                        }
                    };
                    if matched {
                        return self.expand_list(owner, &case.body, frame);
                    }
                }
                Ok(())
            }
            StatementKind::Conditional { body } => {
                let mut inner = frame.clone();
                inner.conditional = true;
                self.expand_list(owner, body, &inner)
            }
            StatementKind::Assign { target, value } => {
                let value = self.eval(owner, frame, value, EvalMode::Procedural)?;
                for id in self.leaves(owner, frame, target)? {
                    self.assign_default(id, value.clone())?;
                }
                Ok(())
            }
            StatementKind::ConstAssign { target, value } => {
                let value = self.eval(owner, frame, value, EvalMode::Constant)?;
                for id in self.leaves(owner, frame, target)? {
                    self.assign_constant(id, value.clone())?;
                }
                Ok(())
            }
            StatementKind::External {
                name,
                function,
                mode,
                inputs,
                outputs,
                ..
            } => match mode {
                ExtMode::Method => Err(CompileError::IllegalContext(
                    "EXTERNAL method calls are only allowed in methods".to_string(),
                )),
                ExtMode::Blackbox => {
                    self.expand_blackbox(owner, frame, name.as_ref(), function, inputs, outputs)
                }
            },
            StatementKind::Switch { .. }
            | StatementKind::If { .. }
            | StatementKind::While { .. }
            | StatementKind::Run { .. }
            | StatementKind::Call { .. }
            | StatementKind::Fix { .. }
            | StatementKind::Free { .. }
            | StatementKind::Flow { .. }
            | StatementKind::Assert { .. } => Err(CompileError::IllegalContext(format!(
                "{} is only allowed in methods",
                stmt.keyword()
            ))),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn expand_is_a(
        &mut self,
        owner: InstanceId,
        frame: &Frame,
        names: &[Name],
        type_name: &str,
        args: &[Expr],
        of_type: Option<&str>,
        value: Option<&Expr>,
    ) -> Result<(), CompileError> {
        let desc = self.find_type(type_name)?;
        if desc.kind == BaseKind::Patch {
            return Err(CompileError::IllegalContext(format!(
                "'{}' is a patch and cannot be instantiated",
                type_name
            )));
        }
        let bound = if desc.kind == BaseKind::Model {
            let formals = self.formals(&desc, None)?;
            self.bind_args(owner, frame, &desc, &formals, args)?
        } else if !args.is_empty() {
            return Err(CompileError::ArityMismatch {
                type_name: type_name.to_string(),
                expected: 0,
                found: args.len(),
            });
        } else {
            Vec::new()
        };
        let initial = match value {
            Some(expr) => Some(self.eval(owner, frame, expr, EvalMode::Constant)?),
            None => None,
        };
        for name in names {
            self.declare(owner, name, frame, &desc, |this| {
                let id = this.create_instance(&desc, &bound, of_type)?;
                if let Some(v) = &initial {
                    this.assign_initial(id, v.clone())?;
                }
                Ok(id)
            })?;
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn expand_alias_array(
        &mut self,
        owner: InstanceId,
        frame: &Frame,
        array: &Name,
        sources: &[Name],
        set_name: &str,
        set_type: &str,
        values: Option<&SetExpr>,
    ) -> Result<(), CompileError> {
        let subscript_is_set = matches!(
            array.last_subscript().map(Vec::as_slice),
            Some([SetItem::Single(Expr::Name(n))]) if n.simple_id() == Some(set_name)
        );
        let two_parts = array.parts.len() == 2;
        let (Some(base), true) = (array.base_id(), subscript_is_set && two_parts) else {
            return Err(CompileError::StructuralMismatch(format!(
                "alias array '{}' must be subscripted by its set '{}'",
                array, set_name
            )));
        };
        let mut members = Vec::new();
        for source in sources {
            members.extend(self.leaves(owner, frame, source)?);
        }
        let set = match values {
            Some(items) => self
                .evaluator(EvalMode::Constant)
                .eval_set(Scope::new(owner, &frame.bindings), items)?,
            None => SetValue::Ints((1..=members.len() as i64).collect()),
        };
        if set.len() != members.len() {
            return Err(CompileError::StructuralMismatch(format!(
                "'{}' has {} element(s) but {} alias(es) were given",
                set_name,
                set.len(),
                members.len()
            )));
        }
        let Some(first) = members.first() else {
            return Err(CompileError::StructuralMismatch(format!(
                "alias array '{}' has no members",
                array
            )));
        };
        let element = Arc::clone(&self.arena.instance(*first)?.desc);

        let set_desc = self.find_type("set")?;
        let set_value = Value::Set(set.clone());
        self.declare(owner, &Name::id(set_name), frame, &set_desc, |this| {
            let id = this.create_instance(&set_desc, &[], Some(set_type))?;
            this.assign_constant(id, set_value.clone())?;
            Ok(id)
        })?;

        let key = ChildKey::Name(self.symbols.intern(base));
        if self.arena.child(owner, &key).is_some() {
            return Err(CompileError::NameConflict {
                name: base.to_string(),
                owner: self.type_name_of(owner),
            });
        }
        let array_id = self.alloc(InstanceKind::Array, &element);
        self.link(owner, key, array_id)?;
        for (value, member) in set.elements().iter().zip(members) {
            let element_key = self.key_for(value)?;
            self.link(array_id, element_key, member)?;
        }
        self.arena.instance_mut(array_id)?.mark_complete();
        Ok(())
    }

    fn expand_when(
        &mut self,
        owner: InstanceId,
        frame: &Frame,
        name: Option<&Name>,
        vars: &[Name],
        cases: &[Case],
    ) -> Result<InstanceId, CompileError> {
        let mut var_ids = Vec::with_capacity(vars.len());
        for var in vars {
            let id = self.resolve(owner, frame, var)?;
            let kind = self.arena.instance(id)?.kind;
            if !matches!(
                kind,
                InstanceKind::Boolean | InstanceKind::Integer | InstanceKind::Symbol
            ) {
                return Err(CompileError::StructuralMismatch(format!(
                    "WHEN variable '{}' is a {:?} instance",
                    var, kind
                )));
            }
            var_ids.push(id);
        }
        let mut case_data = Vec::with_capacity(cases.len());
        for case in cases {
            let values = match &case.values {
                Some(exprs) => {
                    if exprs.len() != vars.len() {
                        return Err(CompileError::StructuralMismatch(format!(
                            "WHEN case has {} value(s) for {} variable(s)",
                            exprs.len(),
                            vars.len()
                        )));
                    }
                    Some(
                        exprs
                            .iter()
                            .map(|e| self.eval(owner, frame, e, EvalMode::Constant))
                            .collect::<Result<Vec<_>, _>>()?,
                    )
                }
                None => None,
            };
            let mut members = Vec::new();
            for stmt in &case.body {
                match &stmt.kind {
                    StatementKind::Use { name } => {
                        let ev = self.evaluator(EvalMode::Constant);
                        members.extend(ev.resolve_all(Scope::new(owner, &frame.bindings), name)?);
                    }
                    StatementKind::When { name, vars, cases } => {
                        members.push(self.expand_when(owner, frame, name.as_ref(), vars, cases)?);
                    }
                    other => {
                        return Err(CompileError::IllegalContext(format!(
                            "{} is not allowed inside a WHEN case",
                            other.keyword()
                        )))
                    }
                }
            }
            case_data.push(WhenCaseData { values, members });
        }
        let desc = self.find_type("when")?;
        let name = match name {
            Some(n) => n.clone(),
            None => self.auto_name(owner, "_when"),
        };
        let data = WhenData {
            vars: var_ids,
            cases: case_data,
        };
        let made = self.declare(owner, &name, frame, &desc, |this| {
            let id = this.create_instance(&desc, &[], None)?;
            this.arena.instance_mut(id)?.when = Some(data.clone());
            Ok(id)
        })?;
        made.first().copied().ok_or_else(|| {
            CompileError::StructuralMismatch(format!("WHEN '{}' declared nothing", name))
        })
    }

    fn expand_blackbox(
        &mut self,
        owner: InstanceId,
        frame: &Frame,
        name: Option<&Name>,
        function: &str,
        inputs: &[Name],
        outputs: &[Name],
    ) -> Result<(), CompileError> {
        let (n_inputs, n_outputs) = {
            let bb = self.externals.blackbox(function).ok_or_else(|| {
                CompileError::External(format!("no black box named '{}'", function))
            })?;
            (bb.n_inputs, bb.n_outputs)
        };
        let mut input_ids = Vec::new();
        for n in inputs {
            input_ids.extend(self.leaves(owner, frame, n)?);
        }
        let mut output_ids = Vec::new();
        for n in outputs {
            output_ids.extend(self.leaves(owner, frame, n)?);
        }
        if input_ids.len() != n_inputs || output_ids.len() != n_outputs {
            return Err(CompileError::External(format!(
                "'{}' takes {} input(s) and {} output(s), given {} and {}",
                function,
                n_inputs,
                n_outputs,
                input_ids.len(),
                output_ids.len()
            )));
        }
        let desc = self.find_type("relation")?;
        let name = match name {
            Some(n) => n.clone(),
            None => self.auto_name(owner, "_ext"),
        };
        let base = name.simple_id().ok_or_else(|| {
            CompileError::IllegalContext(format!("EXTERNAL name '{}' must be simple", name))
        })?;
        let key = ChildKey::Name(self.symbols.intern(base));
        if self.arena.child(owner, &key).is_some() {
            return Err(CompileError::NameConflict {
                name: base.to_string(),
                owner: self.type_name_of(owner),
            });
        }
        let array = self.alloc(InstanceKind::Array, &desc);
        self.link(owner, key, array)?;
        for output in 0..n_outputs {
            let rel = self.create_instance(&desc, &[], None)?;
            self.arena.instance_mut(rel)?.relation = Some(RelationData {
                op: RelOp::Equal,
                form: RelationForm::Blackbox {
                    function: function.to_string(),
                    inputs: input_ids.clone(),
                    outputs: output_ids.clone(),
                    output,
                },
                conditional: frame.conditional,
            });
            self.link(array, ChildKey::Int(output as i64 + 1), rel)?;
        }
        self.arena.instance_mut(array)?.mark_complete();
        Ok(())
    }

    fn check_identity(
        &mut self,
        owner: InstanceId,
        frame: &Frame,
        stmt: &Statement,
        names: &[Name],
    ) -> Result<(), CompileError> {
        let mut ids = Vec::with_capacity(names.len());
        for name in names {
            let id = self.resolve(owner, frame, name)?;
            ids.push(self.arena.resolve(id).unwrap_or(id));
        }
        let same = matches!(stmt.kind, StatementKind::WillBeTheSame { .. });
        let holds = if same {
            ids.windows(2).all(|w| w[0] == w[1])
        } else {
            let mut sorted = ids.clone();
            sorted.sort();
            sorted.dedup();
            sorted.len() == ids.len()
        };
        if holds {
            return Ok(());
        }
        let listed: Vec<String> = names.iter().map(|n| n.to_string()).collect();
        Err(CompileError::StructuralMismatch(format!(
            "{} does not hold for ({})",
            stmt.keyword(),
            listed.join(", ")
        )))
    }

    fn check_where(
        &mut self,
        owner: InstanceId,
        stmts: &[Statement],
        frame: &Frame,
    ) -> Result<(), CompileError> {
        for stmt in stmts {
            match &stmt.kind {
                StatementKind::WillBeTheSame { names }
                | StatementKind::WillNotBeTheSame { names } => {
                    self.check_identity(owner, frame, stmt, names)?;
                }
                StatementKind::Relation { expr, .. } => {
                    let holds = self
                        .evaluator(EvalMode::Constant)
                        .eval_bool(Scope::new(owner, &frame.bindings), expr)?;
                    if !holds {
                        return Err(CompileError::StructuralMismatch(format!(
                            "WHERE condition '{}' does not hold in '{}'",
                            expr,
                            self.type_name_of(owner)
                        )));
                    }
                }
                StatementKind::For {
                    index,
                    set,
                    kind: ForKind::Check,
                    body,
                } => {
                    let set = self
                        .evaluator(EvalMode::Constant)
                        .eval_set(Scope::new(owner, &frame.bindings), set)?;
                    for element in set.elements() {
                        let mut inner = frame.clone();
                        inner.bindings.push((index.clone(), element));
                        self.check_where(owner, body, &inner)?;
                    }
                }
                other => {
                    return Err(CompileError::IllegalContext(format!(
                        "{} is not allowed in a WHERE clause",
                        other.keyword()
                    )))
                }
            }
        }
        Ok(())
    }

    // Refinement

    fn refine(
        &mut self,
        id: InstanceId,
        target: &Arc<TypeDescription>,
        args: &[Expr],
        owner: InstanceId,
        frame: &Frame,
    ) -> Result<(), CompileError> {
        let current = Arc::clone(&self.arena.instance(id)?.desc);
        if current.name == target.name || self.library.refines_from(&current.name, &target.name) {
            return Ok(());
        }
        if !self.library.refines_from(&target.name, &current.name) {
            return Err(CompileError::StructuralMismatch(format!(
                "'{}' cannot be refined to '{}'",
                current.name, target.name
            )));
        }
        let bound = if target.kind == BaseKind::Model {
            let formals = self.formals(target, Some(&current.name))?;
            self.bind_args(owner, frame, target, &formals, args)?
        } else {
            Vec::new()
        };
        self.reshape(id, &current, target, &bound)
    }

    /// Retype `id` from `from` to the more refined `to` and add what `to`
    /// declares beyond `from`. On success the added parts are recorded so a
    /// later rollback leaves them with `id`; on failure `id` gets its old
    /// type back.
    fn reshape(
        &mut self,
        id: InstanceId,
        from: &Arc<TypeDescription>,
        to: &Arc<TypeDescription>,
        args: &[Arg],
    ) -> Result<(), CompileError> {
        let start = self.links.len();
        let saved = {
            let inst = self.arena.instance(id)?;
            (inst.value.clone(), inst.dims, inst.defaulted, inst.is_complete())
        };
        match self.reshape_parts(id, from, to, args) {
            Ok(()) => {
                let links = self.links[start..].to_vec();
                self.refinements.push(Refinement { survivor: id, links });
                Ok(())
            }
            Err(err) => {
                // The partial parts go with the statement's rollback.
                if let Some(inst) = self.arena.get_mut(id) {
                    let (value, dims, defaulted, complete) = saved;
                    inst.desc = Arc::clone(from);
                    inst.value = value;
                    inst.dims = dims;
                    inst.defaulted = defaulted;
                    if complete {
                        inst.mark_complete();
                    }
                }
                Err(err)
            }
        }
    }

    fn reshape_parts(
        &mut self,
        id: InstanceId,
        from: &Arc<TypeDescription>,
        to: &Arc<TypeDescription>,
        args: &[Arg],
    ) -> Result<(), CompileError> {
        debug!("Refining '{}' to '{}'", from.name, to.name);
        {
            let inst = self.arena.instance_mut(id)?;
            inst.reopen();
            inst.desc = Arc::clone(to);
        }
        match to.kind {
            BaseKind::Model => {
                if self.type_stack.contains(&to.name) {
                    return Err(CompileError::StructuralMismatch(format!(
                        "type '{}' contains itself",
                        to.name
                    )));
                }
                self.type_stack.push(to.name.clone());
                let result = self.build_model(id, to, Some(&from.name), args);
                self.type_stack.pop();
                result
            }
            BaseKind::Atom | BaseKind::Constant => {
                let (value, dims) = self.atom_default(to)?;
                {
                    let inst = self.arena.instance_mut(id)?;
                    if inst.defaulted && value.is_defined() {
                        inst.value = value;
                    }
                    inst.dims = dims;
                }
                let body =
                    self.library.statements_between(Some(&from.name), &to.name, Section::Body)?;
                self.expand_list(id, &body, &Frame::default())?;
                self.finish(id)
            }
            kind => Err(CompileError::StructuralMismatch(format!(
                "a {} instance cannot be refined",
                kind
            ))),
        }
    }

    fn refine_to(
        &mut self,
        id: InstanceId,
        target: &Arc<TypeDescription>,
    ) -> Result<(), CompileError> {
        let current = Arc::clone(&self.arena.instance(id)?.desc);
        if current.name == target.name {
            return Ok(());
        }
        if target.kind == BaseKind::Model {
            let formals = self.formals(target, Some(&current.name))?;
            if !formals.is_empty() {
                return Err(CompileError::ArityMismatch {
                    type_name: target.name.clone(),
                    expected: formals.len(),
                    found: 0,
                });
            }
        }
        self.reshape(id, &current, target, &[])
    }

    fn expand_are_alike(
        &mut self,
        owner: InstanceId,
        frame: &Frame,
        names: &[Name],
    ) -> Result<(), CompileError> {
        let ids = names
            .iter()
            .map(|n| self.resolve(owner, frame, n))
            .collect::<Result<Vec<_>, _>>()?;
        let mut best: Option<Arc<TypeDescription>> = None;
        for id in &ids {
            let desc = Arc::clone(&self.arena.instance(*id)?.desc);
            best = Some(match best {
                None => desc,
                Some(b) => self.library.more_refined(&b.name, &desc.name).ok_or_else(|| {
                    CompileError::StructuralMismatch(format!(
                        "'{}' and '{}' cannot be made alike",
                        b.name, desc.name
                    ))
                })?,
            });
        }
        if let Some(best) = best {
            for id in ids {
                self.refine_to(id, &best)?;
            }
        }
        Ok(())
    }

    /// Merge `b` into `a` and return the surviving handle. Both are first
    /// refined to the more refined of their types; children are merged
    /// recursively by key and `b` then forwards to `a`.
    fn merge(&mut self, a: InstanceId, b: InstanceId) -> Result<InstanceId, CompileError> {
        let a = self.arena.resolve(a).ok_or(CompileError::StaleHandle(a))?;
        let b = self.arena.resolve(b).ok_or(CompileError::StaleHandle(b))?;
        if a == b {
            return Ok(a);
        }
        let (kind_a, type_a) = {
            let i = self.arena.instance(a)?;
            (i.kind, i.desc.name.clone())
        };
        let (kind_b, type_b) = {
            let i = self.arena.instance(b)?;
            (i.kind, i.desc.name.clone())
        };
        if kind_a != kind_b {
            return Err(CompileError::StructuralMismatch(format!(
                "cannot merge a {:?} with a {:?}",
                kind_a, kind_b
            )));
        }
        if matches!(
            kind_a,
            InstanceKind::Relation
                | InstanceKind::LogRelation
                | InstanceKind::When
                | InstanceKind::Simulation
        ) {
            return Err(CompileError::StructuralMismatch(format!(
                "{:?} instances cannot be merged",
                kind_a
            )));
        }
        let target = self.library.more_refined(&type_a, &type_b).ok_or_else(|| {
            CompileError::StructuralMismatch(format!(
                "'{}' and '{}' are unrelated types and cannot be merged",
                type_a, type_b
            ))
        })?;
        self.refine_to(a, &target)?;
        self.refine_to(b, &target)?;
        self.merge_values(a, b)?;

        let b_children: Vec<(ChildKey, InstanceId)> = self
            .arena
            .instance(b)?
            .children
            .iter()
            .map(|(k, c)| (*k, *c))
            .collect();
        for (key, child_b) in b_children {
            match self.arena.child(a, &key) {
                Some(child_a) => {
                    self.merge(child_a, child_b)?;
                }
                None => {
                    self.arena.link(a, key, child_b)?;
                    if let Some(c) = self.arena.get_mut(child_b) {
                        c.parents.retain(|p| *p != b);
                    }
                }
            }
        }
        let b_parents = self.arena.instance(b)?.parents.clone();
        for parent in b_parents {
            self.arena.replace_child_refs(parent, b, a);
        }
        self.arena.forward(b, a)?;
        debug!("Merged {} into {} ('{}')", b, a, target.name);
        Ok(a)
    }

    fn merge_values(&mut self, a: InstanceId, b: InstanceId) -> Result<(), CompileError> {
        let (value_b, defaulted_b) = {
            let i = self.arena.instance(b)?;
            (i.value.clone(), i.defaulted)
        };
        let inst = self.arena.instance_mut(a)?;
        if !value_b.is_defined() {
            return Ok(());
        }
        if inst.is_constant() {
            if inst.value.is_defined() && inst.value != value_b {
                return Err(CompileError::StructuralMismatch(format!(
                    "merged constants of '{}' disagree: {} and {}",
                    inst.desc.name, inst.value, value_b
                )));
            }
            inst.value = value_b;
        } else if (inst.defaulted || !inst.value.is_defined()) && !defaulted_b {
            inst.value = value_b;
            inst.defaulted = false;
        }
        Ok(())
    }
}

fn atom_value_type(kind: InstanceKind) -> Option<ValueType> {
    match kind {
        InstanceKind::Real => Some(ValueType::Real),
        InstanceKind::Integer => Some(ValueType::Integer),
        InstanceKind::Boolean => Some(ValueType::Boolean),
        InstanceKind::Symbol => Some(ValueType::Symbol),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use ascend_core::{Expr, ForKind, Name, SetItem, Statement, TypeBuilder};
    use pretty_assertions::assert_eq;

    use crate::config::{CompilerConfig, InstantiationPolicy};
    use crate::context::CompilerContext;
    use crate::error::CompileError;
    use crate::instance::InstanceKind;
    use crate::value::Value;

    fn context(policy: InstantiationPolicy) -> CompilerContext {
        let config = CompilerConfig::default().with_policy(policy);
        let mut ctx = CompilerContext::with_config(config).unwrap();
        for desc in ascend_test_fixtures::atoms()
            .into_iter()
            .chain(ascend_test_fixtures::models())
            .chain(ascend_test_fixtures::broken_models())
        {
            ctx.add_type(desc).unwrap();
        }
        ctx
    }

    #[test]
    fn test_for_create_unrolls_distinct_children() {
        let mut ctx = context(InstantiationPolicy::FailFast);
        ctx.add_type(
            TypeBuilder::model("row")
                .statement(Statement::for_each(
                    "i",
                    vec![SetItem::Range(Expr::Int(1), Expr::Int(5))],
                    ForKind::Create,
                    vec![Statement::is_a_named(
                        vec![Name::id("x").sub(Expr::name("i"))],
                        "real",
                        Vec::new(),
                    )],
                ))
                .build(),
        )
        .unwrap();
        ctx.create_simulation("s", "row").unwrap();

        let array = ctx.find_instance("s", &Name::id("x")).unwrap();
        let state = ctx.state().unwrap();
        let arr = state.arena.instance(array).unwrap();
        assert_eq!(arr.kind, InstanceKind::Array);
        assert_eq!(arr.children.len(), 5);

        let mut ids: Vec<_> = arr.children.values().copied().collect();
        ids.sort_by_key(|id| id.index());
        ids.dedup();
        assert_eq!(ids.len(), 5);
        for id in ids {
            assert_eq!(state.arena.instance(id).unwrap().kind, InstanceKind::Real);
        }
    }

    #[test]
    fn test_fail_fast_frees_everything() {
        let mut ctx = context(InstantiationPolicy::FailFast);
        let err = ctx.create_simulation("s", "conflict").unwrap_err();
        assert!(matches!(
            err,
            CompileError::Instantiation { ref type_name, .. } if type_name == "conflict"
        ));
        assert_eq!(ctx.state().unwrap().arena.live_count(), 0);
        assert!(ctx.simulation_names().unwrap().is_empty());
    }

    #[test]
    fn test_best_effort_keeps_partial_tree() {
        let mut ctx = context(InstantiationPolicy::BestEffort);
        let sim = ctx.create_simulation("s", "conflict").unwrap();
        assert!(!sim.complete);
        assert!(sim.has_errors());

        let y = ctx.find_instance("s", &Name::id("y")).unwrap();
        let x = ctx.find_instance("s", &Name::id("x")).unwrap();
        let state = ctx.state().unwrap();
        assert_eq!(state.arena.instance(y).unwrap().kind, InstanceKind::Real);
        assert_eq!(state.arena.instance(x).unwrap().desc.name, "solver_var");
    }

    #[test]
    fn test_arity_mismatch_is_reported() {
        let mut ctx = context(InstantiationPolicy::FailFast);
        let err = ctx.create_simulation("s", "bad_arity").unwrap_err();
        match err {
            CompileError::Instantiation { summary, .. } => {
                assert!(summary.contains("Arity mismatch"))
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_where_clause_rejects_argument() {
        let mut ctx = context(InstantiationPolicy::FailFast);
        assert!(ctx.create_simulation("s", "bad_where").is_err());
        assert_eq!(ctx.state().unwrap().arena.live_count(), 0);
    }

    #[test]
    fn test_root_parameters_take_defaults() {
        let mut ctx = context(InstantiationPolicy::FailFast);
        ctx.create_simulation("s", "tank").unwrap();

        let n = ctx.find_instance("s", &Name::id("n")).unwrap();
        assert_eq!(ctx.value_of(n).unwrap(), Value::Int(3));

        let holdup = ctx.find_instance("s", &Name::id("holdup")).unwrap();
        let total = ctx.find_instance("s", &Name::id("sum_holdup")).unwrap();
        let state = ctx.state().unwrap();
        assert_eq!(state.arena.instance(holdup).unwrap().children.len(), 3);
        let rel = state.arena.instance(total).unwrap().relation.clone().unwrap();
        assert_eq!(rel.incidence().len(), 4);
    }

    #[test]
    fn test_refinement_keeps_parts() {
        let mut ctx = context(InstantiationPolicy::FailFast);
        ctx.add_type(
            TypeBuilder::model("refiner")
                .is_a(&["v"], "solver_var")
                .statement(Statement::refine(&["v"], "temperature"))
                .build(),
        )
        .unwrap();
        ctx.create_simulation("s", "refiner").unwrap();

        let v = ctx.find_instance("s", &Name::id("v")).unwrap();
        let fixed = ctx.find_instance("s", &Name::path("v.fixed")).unwrap();
        let state = ctx.state().unwrap();
        assert_eq!(state.arena.instance(v).unwrap().desc.name, "temperature");
        assert_eq!(state.arena.instance(fixed).unwrap().kind, InstanceKind::Boolean);
        assert_eq!(ctx.value_of(v).unwrap(), Value::Real(298.15));
    }

    #[test]
    fn test_are_the_same_merges() {
        let mut ctx = context(InstantiationPolicy::FailFast);
        ctx.add_type(
            TypeBuilder::model("merged")
                .is_a(&["a", "b"], "solver_var")
                .statement(Statement::are_the_same(vec![Name::id("a"), Name::id("b")]))
                .build(),
        )
        .unwrap();
        ctx.create_simulation("s", "merged").unwrap();

        let a = ctx.find_instance("s", &Name::id("a")).unwrap();
        let b = ctx.find_instance("s", &Name::id("b")).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_failed_merge_keeps_refined_parts() {
        let mut ctx = context(InstantiationPolicy::BestEffort);
        ctx.add_type(TypeBuilder::model("base").is_a(&["p"], "solver_var").build()).unwrap();
        ctx.add_type(
            TypeBuilder::model("wide")
                .refines("base")
                .is_a(&["extra"], "solver_var")
                .build(),
        )
        .unwrap();
        // Merging `u` with `w` refines `u` to `wide`; `q` then fails the
        // statement.
        ctx.add_type(
            TypeBuilder::model("joined")
                .is_a(&["u"], "base")
                .is_a(&["w"], "wide")
                .is_a(&["q"], "solver_var")
                .statement(Statement::are_the_same(vec![
                    Name::id("u"),
                    Name::id("w"),
                    Name::id("q"),
                ]))
                .build(),
        )
        .unwrap();
        let sim = ctx.create_simulation("s", "joined").unwrap();
        assert!(sim.has_errors());

        let u = ctx.find_instance("s", &Name::id("u")).unwrap();
        let w = ctx.find_instance("s", &Name::id("w")).unwrap();
        assert_eq!(u, w);
        let extra = ctx.find_instance("s", &Name::path("u.extra")).unwrap();
        let fixed = ctx.find_instance("s", &Name::path("u.extra.fixed")).unwrap();
        let state = ctx.state().unwrap();
        assert_eq!(state.arena.instance(u).unwrap().desc.name, "wide");
        assert_eq!(state.arena.instance(extra).unwrap().kind, InstanceKind::Real);
        assert_eq!(state.arena.instance(fixed).unwrap().kind, InstanceKind::Boolean);
    }

    #[test]
    fn test_relation_incidence_keeps_repeats() {
        let mut ctx = context(InstantiationPolicy::FailFast);
        ctx.add_type(
            TypeBuilder::model("product")
                .is_a(&["a", "b"], "solver_var")
                .relation("r", (Expr::name("a") * Expr::name("b")).equals(Expr::name("a")))
                .build(),
        )
        .unwrap();
        ctx.create_simulation("s", "product").unwrap();

        let a = ctx.find_instance("s", &Name::id("a")).unwrap();
        let b = ctx.find_instance("s", &Name::id("b")).unwrap();
        let r = ctx.find_instance("s", &Name::id("r")).unwrap();
        let state = ctx.state().unwrap();
        let rel = state.arena.instance(r).unwrap().relation.clone().unwrap();
        assert_eq!(rel.incidence(), vec![a, b, a]);
    }

    #[test]
    fn test_blackbox_requires_registered_function() {
        let mut ctx = context(InstantiationPolicy::FailFast);
        assert!(ctx.create_simulation("s", "blackbox_model").is_err());

        ctx.externals_mut()
            .unwrap()
            .register_blackbox("double", 1, 1, ascend_test_fixtures::double_blackbox)
            .unwrap();
        ctx.create_simulation("s", "blackbox_model").unwrap();
        let rel = ctx.find_instance("s", &Name::id("bb").sub(Expr::Int(1))).unwrap();
        let state = ctx.state().unwrap();
        assert!(state.arena.instance(rel).unwrap().relation.as_ref().unwrap().is_blackbox());
    }
}
