//! Procedural method interpreter
//!
//! Methods run against an existing instance tree and never create or remove
//! instances; they only assign values, fix and free variables, call external
//! methods and run other methods.

use ascend_core::{
    Case, Diagnostic, DiagnosticCode, DiagnosticLocation, DiagnosticSink, Expr, ExtMode, FlowKind,
    ForKind, Name, NamePart, Reporter, Statement, StatementKind, SymbolTable, TypeLibrary,
    ValueType,
};
use serde::Serialize;
use tracing::debug;

use crate::config::CompilerConfig;
use crate::error::CompileError;
use crate::evaluate::{EvalMode, Evaluator, Scope};
use crate::extfunc::ExternalLibrary;
use crate::instance::{ChildKey, InstanceArena, InstanceId, InstanceKind};
use crate::units::UnitsTable;
use crate::value::Value;

/// Nested RUN statements deeper than this are treated as runaway recursion.
const MAX_RUN_DEPTH: usize = 256;

/// Outcome of running a method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcStatus {
    AllOk,
    MethodNotFound,
    NameNotFound,
    TypeMismatch,
    AssertionFailed,
    CallFailed,
    LoopLimit,
    Stopped,
    Error,
}

impl ProcStatus {
    pub fn is_ok(self) -> bool {
        self == ProcStatus::AllOk
    }
}

/// How a statement list was left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Normal,
    Break,
    Continue,
    FallThrough,
    Return,
    Stop,
}

#[derive(Debug)]
struct Failure {
    status: ProcStatus,
    error: CompileError,
    reported: bool,
}

impl From<CompileError> for Failure {
    fn from(error: CompileError) -> Self {
        let status = match &error {
            CompileError::UndefinedName(_) | CompileError::StaleHandle(_) => {
                ProcStatus::NameNotFound
            }
            CompileError::Evaluation(_) | CompileError::Units(_) => ProcStatus::TypeMismatch,
            CompileError::External(_) => ProcStatus::CallFailed,
            _ => ProcStatus::Error,
        };
        Self {
            status,
            error,
            reported: false,
        }
    }
}

impl Failure {
    fn new(status: ProcStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            error: CompileError::IllegalContext(message.into()),
            reported: false,
        }
    }
}

pub struct MethodRunner<'a> {
    library: &'a TypeLibrary,
    arena: &'a mut InstanceArena,
    symbols: &'a SymbolTable,
    units: &'a UnitsTable,
    externals: &'a ExternalLibrary,
    config: &'a CompilerConfig,
    reporter: &'a mut Reporter,
    depth: usize,
}

impl<'a> MethodRunner<'a> {
    pub fn new(
        library: &'a TypeLibrary,
        arena: &'a mut InstanceArena,
        symbols: &'a SymbolTable,
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
            depth: 0,
        }
    }

    /// Run `method` on `instance`, looking the method up through the
    /// instance's type ancestry, most refined first.
    pub fn run(&mut self, instance: InstanceId, method: &str) -> ProcStatus {
        let type_name = match self.arena.instance(instance) {
            Ok(inst) => inst.desc.name.clone(),
            Err(err) => {
                self.reporter
                    .report(Diagnostic::error(DiagnosticCode::Method, err.to_string()));
                return ProcStatus::NameNotFound;
            }
        };
        match self.library.find_method(&type_name, method) {
            Some((_, m)) => self.run_body(instance, &type_name, method, &m.body),
            None => {
                self.reporter.report(
                    Diagnostic::error(
                        DiagnosticCode::Method,
                        format!("method '{}' not found in '{}'", method, type_name),
                    )
                    .at(DiagnosticLocation::new().in_type(type_name.as_str())),
                );
                ProcStatus::MethodNotFound
            }
        }
    }

    fn run_body(
        &mut self,
        instance: InstanceId,
        type_name: &str,
        method: &str,
        body: &[Statement],
    ) -> ProcStatus {
        debug!("Running {}::{} on {}", type_name, method, instance);
        let mut bindings = Vec::new();
        match self.exec_list(instance, body, &mut bindings) {
            Ok(Flow::Stop) => ProcStatus::Stopped,
            Ok(_) => ProcStatus::AllOk,
            Err(failure) => failure.status,
        }
    }

    fn evaluator(&self) -> Evaluator<'_> {
        Evaluator::new(&*self.arena, self.symbols, self.units, self.externals, EvalMode::Procedural)
    }

    fn exec_list(
        &mut self,
        owner: InstanceId,
        stmts: &[Statement],
        bindings: &mut Vec<(String, Value)>,
    ) -> Result<Flow, Failure> {
        for stmt in stmts {
            match self.exec(owner, stmt, bindings) {
                Ok(Flow::Normal) => {}
                Ok(flow) => return Ok(flow),
                Err(mut failure) => {
                    // Reported once, by the innermost list.
                    if !failure.reported {
                        self.report(owner, stmt, &failure);
                        failure.reported = true;
                    }
                    return Err(failure);
                }
            }
        }
        Ok(Flow::Normal)
    }

    fn report(&mut self, owner: InstanceId, stmt: &Statement, failure: &Failure) {
        let type_name = self
            .arena
            .get(owner)
            .map(|i| i.desc.name.clone())
            .unwrap_or_default();
        let location = DiagnosticLocation::new()
            .in_type(type_name)
            .in_instance(self.arena.path(owner, self.symbols));
        self.reporter.report(
            Diagnostic::error(DiagnosticCode::Method, failure.error.to_string())
                .at(location)
                .with_statement(stmt),
        );
    }

    fn exec(
        &mut self,
        owner: InstanceId,
        stmt: &Statement,
        bindings: &mut Vec<(String, Value)>,
    ) -> Result<Flow, Failure> {
        match &stmt.kind {
            StatementKind::Assign { target, value } => {
                let (value, targets) = {
                    let ev = self.evaluator();
                    let scope = Scope::new(owner, bindings);
                    (ev.eval(scope, value)?, ev.leaves(scope, target)?)
                };
                for id in targets {
                    self.assign(id, value.clone())?;
                }
                Ok(Flow::Normal)
            }
            StatementKind::Fix { names } => self.set_fixed(owner, names, bindings, true),
            StatementKind::Free { names } => self.set_fixed(owner, names, bindings, false),
            StatementKind::For { index, set, kind, body } => {
                if *kind == ForKind::Create {
                    return Err(Failure::new(
                        ProcStatus::Error,
                        "FOR/CREATE is not allowed in methods",
                    ));
                }
                let set = self.evaluator().eval_set(Scope::new(owner, bindings), set)?;
                for element in set.elements() {
                    bindings.push((index.clone(), element));
                    let flow = self.exec_list(owner, body, bindings);
                    bindings.pop();
                    match flow? {
                        Flow::Break => break,
                        Flow::Normal | Flow::Continue => {}
                        other => return Ok(other),
                    }
                }
                Ok(Flow::Normal)
            }
            StatementKind::If {
                test,
                then_body,
                else_body,
            } => {
                let holds = self.evaluator().eval_bool(Scope::new(owner, bindings), test)?;
                match (holds, else_body) {
                    (true, _) => self.exec_list(owner, then_body, bindings),
                    (false, Some(body)) => self.exec_list(owner, body, bindings),
                    (false, None) => Ok(Flow::Normal),
                }
            }
            StatementKind::Switch { vars, cases } => self.exec_switch(owner, vars, cases, bindings),
            StatementKind::While { test, body } => {
                let mut iterations = 0;
                while self.evaluator().eval_bool(Scope::new(owner, bindings), test)? {
                    iterations += 1;
                    if iterations > self.config.max_while_iterations {
                        let limit = self.config.max_while_iterations;
                        return Err(Failure::new(
                            ProcStatus::LoopLimit,
                            format!("WHILE exceeded {} iterations", limit),
                        ));
                    }
                    match self.exec_list(owner, body, bindings)? {
                        Flow::Break => break,
                        Flow::Normal | Flow::Continue => {}
                        other => return Ok(other),
                    }
                }
                Ok(Flow::Normal)
            }
            StatementKind::Run { target, type_access } => {
                self.exec_run(owner, target, type_access.as_deref(), bindings)
            }
            StatementKind::Call { function, args } => {
                let mut targets = Vec::new();
                for arg in args {
                    targets.extend(self.evaluator().leaves(Scope::new(owner, bindings), arg)?);
                }
                self.call_external(function, &targets)?;
                Ok(Flow::Normal)
            }
            StatementKind::External {
                function,
                mode,
                inputs,
                outputs,
                ..
            } => {
                if *mode == ExtMode::Blackbox {
                    return Err(Failure::new(
                        ProcStatus::Error,
                        "EXTERNAL black boxes are only allowed in declarative bodies",
                    ));
                }
                let mut targets = Vec::new();
                for name in inputs.iter().chain(outputs) {
                    targets.extend(self.evaluator().leaves(Scope::new(owner, bindings), name)?);
                }
                self.call_external(function, &targets)?;
                Ok(Flow::Normal)
            }
            StatementKind::Assert { test } => {
                if self.evaluator().eval_bool(Scope::new(owner, bindings), test)? {
                    Ok(Flow::Normal)
                } else {
                    Err(Failure::new(
                        ProcStatus::AssertionFailed,
                        format!("ASSERT '{}' failed", test),
                    ))
                }
            }
            StatementKind::Flow { flow, message } => {
                if let Some(text) = message {
                    self.reporter.report(
                        Diagnostic::note(DiagnosticCode::Method, text.clone())
                            .at(DiagnosticLocation::new().at_statement(stmt)),
                    );
                }
                Ok(match flow {
                    FlowKind::Break => Flow::Break,
                    FlowKind::Continue => Flow::Continue,
                    FlowKind::FallThrough => Flow::FallThrough,
                    FlowKind::Return => Flow::Return,
                    FlowKind::Stop => Flow::Stop,
                })
            }
            _ => Err(Failure::new(
                ProcStatus::Error,
                format!("{} is not allowed in methods", stmt.keyword()),
            )),
        }
    }

    fn assign(&mut self, id: InstanceId, value: Value) -> Result<(), Failure> {
        let inst = self.arena.instance_mut(id)?;
        let value_type = match inst.kind {
            InstanceKind::Real => ValueType::Real,
            InstanceKind::Integer => ValueType::Integer,
            InstanceKind::Boolean => ValueType::Boolean,
            InstanceKind::Symbol => ValueType::Symbol,
            kind => {
                return Err(Failure::new(
                    ProcStatus::TypeMismatch,
                    format!("a {:?} instance cannot be assigned", kind),
                ))
            }
        };
        let value = value
            .coerce(value_type)
            .map_err(|msg| Failure::from(CompileError::Evaluation(msg)))?;
        if inst.is_constant() && inst.value.is_defined() && inst.value != value {
            return Err(Failure::new(
                ProcStatus::TypeMismatch,
                format!("constant '{}' is already {}", inst.desc.name, inst.value),
            ));
        }
        inst.value = value;
        inst.defaulted = false;
        Ok(())
    }

    fn set_fixed(
        &mut self,
        owner: InstanceId,
        names: &[Name],
        bindings: &[(String, Value)],
        fixed: bool,
    ) -> Result<Flow, Failure> {
        let fixed_key = self.symbols.find("fixed").map(ChildKey::Name);
        let mut targets = Vec::new();
        for name in names {
            targets.extend(self.evaluator().leaves(Scope::new(owner, bindings), name)?);
        }
        for id in targets {
            let flag = fixed_key.and_then(|k| self.arena.child(id, &k)).ok_or_else(|| {
                Failure::new(
                    ProcStatus::TypeMismatch,
                    format!("'{}' has no 'fixed' part", self.arena.path(id, self.symbols)),
                )
            })?;
            self.assign(flag, Value::Bool(fixed))?;
        }
        Ok(Flow::Normal)
    }

    fn exec_switch(
        &mut self,
        owner: InstanceId,
        vars: &[Name],
        cases: &[Case],
        bindings: &mut Vec<(String, Value)>,
    ) -> Result<Flow, Failure> {
        let selectors = {
            let ev = self.evaluator();
            let scope = Scope::new(owner, bindings);
            vars.iter()
                .map(|v| ev.eval(scope, &Expr::Name(v.clone())))
                .collect::<Result<Vec<_>, _>>()?
        };
        let mut falling = false;
        for case in cases {
            let matched = falling
                || match &case.values {
                    None => true,
                    Some(values) => {
                        let ev = self.evaluator();
                        let scope = Scope::new(owner, bindings);
                        let mut all = values.len() == selectors.len();
                        for (selector, value) in selectors.iter().zip(values) {
                            all &= selector.matches(&ev.eval(scope, value)?);
                        }
                        all
                    }
                };
            if !matched {
                continue;
            }
            match self.exec_list(owner, &case.body, bindings)? {
                Flow::FallThrough => falling = true,
                Flow::Break | Flow::Normal => return Ok(Flow::Normal),
                other => return Ok(other),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_run(
        &mut self,
        owner: InstanceId,
        target: &Name,
        type_access: Option<&str>,
        bindings: &[(String, Value)],
    ) -> Result<Flow, Failure> {
        if self.depth >= MAX_RUN_DEPTH {
            return Err(Failure::new(
                ProcStatus::LoopLimit,
                format!("RUN nested deeper than {}", MAX_RUN_DEPTH),
            ));
        }
        let (prefix, method) = split_method_name(target).ok_or_else(|| {
            Failure::new(
                ProcStatus::NameNotFound,
                format!("'{}' does not name a method", target),
            )
        })?;

        let mut runs = Vec::new();
        match type_access {
            Some(type_name) => {
                let owner_type = self.arena.instance(owner)?.desc.name.clone();
                if !self.library.refines_from(&owner_type, type_name) {
                    return Err(Failure::new(
                        ProcStatus::TypeMismatch,
                        format!("'{}' is not an ancestor of '{}'", type_name, owner_type),
                    ));
                }
                let (_, m) = self.library.find_method(type_name, method).ok_or_else(|| {
                    Failure::new(
                        ProcStatus::MethodNotFound,
                        format!("method '{}' not found in '{}'", method, type_name),
                    )
                })?;
                runs.push((owner, m.body));
            }
            None => {
                let targets = match &prefix {
                    Some(p) => self.evaluator().leaves(Scope::new(owner, bindings), p)?,
                    None => vec![owner],
                };
                for id in targets {
                    let type_name = self.arena.instance(id)?.desc.name.clone();
                    let (_, m) = self.library.find_method(&type_name, method).ok_or_else(|| {
                        Failure::new(
                            ProcStatus::MethodNotFound,
                            format!("method '{}' not found in '{}'", method, type_name),
                        )
                    })?;
                    runs.push((id, m.body));
                }
            }
        }

        for (id, body) in runs {
            self.depth += 1;
            let mut inner = Vec::new();
            let flow = self.exec_list(id, &body, &mut inner);
            self.depth -= 1;
            if flow? == Flow::Stop {
                return Ok(Flow::Stop);
            }
        }
        Ok(Flow::Normal)
    }

    fn call_external(&mut self, function: &str, targets: &[InstanceId]) -> Result<(), Failure> {
        let mut values = Vec::with_capacity(targets.len());
        for id in targets {
            let value = self.arena.instance(*id)?.value.as_f64().unwrap_or(0.0);
            values.push(value);
        }
        self.externals.call(function, &mut values)?;
        for (id, value) in targets.iter().zip(values) {
            let inst = self.arena.instance_mut(*id)?;
            if inst.kind == InstanceKind::Real && !inst.is_constant() {
                inst.value = Value::Real(value);
                inst.defaulted = false;
            }
        }
        Ok(())
    }
}

/// Split `a.b.method` into the instance name `a.b` and `method`.
fn split_method_name(name: &Name) -> Option<(Option<Name>, &str)> {
    let (last, prefix) = name.parts.split_last()?;
    let NamePart::Id(method) = last else {
        return None;
    };
    let prefix = if prefix.is_empty() {
        None
    } else {
        Some(Name {
            parts: prefix.to_vec(),
        })
    };
    Some((prefix, method.as_str()))
}
