//! Expression and name evaluation against the instance tree

use ascend_core::{
    BinOp, Expr, LogicalOp, Name, NamePart, RelOp, SetExpr, SetItem, SymbolTable, UnaryOp,
};

use crate::error::CompileError;
use crate::extfunc::ExternalLibrary;
use crate::instance::{
    ChildKey, InstanceArena, InstanceId, InstanceKind, LogTerm, RelationData, RelationForm, Term,
};
use crate::units::UnitsTable;
use crate::value::{SetValue, Value};

/// Default tolerance of `SATISFIED` when none is given.
pub const DEFAULT_SATISFIED_TOLERANCE: f64 = 1e-8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalMode {
    /// Only constants and sets may be read; used while instantiating.
    Constant,
    /// Any atom with a value may be read; used by methods and WHEN tests.
    Procedural,
}

/// Where names are looked up: an instance plus loop index bindings, the
/// innermost binding last.
#[derive(Debug, Clone, Copy)]
pub struct Scope<'b> {
    pub instance: InstanceId,
    pub bindings: &'b [(String, Value)],
}

impl<'b> Scope<'b> {
    pub fn new(instance: InstanceId, bindings: &'b [(String, Value)]) -> Self {
        Self { instance, bindings }
    }

    pub fn binding(&self, id: &str) -> Option<&Value> {
        self.bindings.iter().rev().find(|(n, _)| n == id).map(|(_, v)| v)
    }

    /// The loop index a simple name refers to, if any.
    fn binding_base(&self, name: &Name) -> Option<&Value> {
        name.simple_id().and_then(|id| self.binding(id))
    }
}

pub struct Evaluator<'a> {
    pub arena: &'a InstanceArena,
    pub symbols: &'a SymbolTable,
    pub units: &'a UnitsTable,
    pub externals: &'a ExternalLibrary,
    pub mode: EvalMode,
}

impl<'a> Evaluator<'a> {
    pub fn new(
        arena: &'a InstanceArena,
        symbols: &'a SymbolTable,
        units: &'a UnitsTable,
        externals: &'a ExternalLibrary,
        mode: EvalMode,
    ) -> Self {
        Self {
            arena,
            symbols,
            units,
            externals,
            mode,
        }
    }

    pub fn eval(&self, scope: Scope<'_>, expr: &Expr) -> Result<Value, CompileError> {
        match expr {
            Expr::Real { value, units } => match units {
                Some(u) => Ok(Value::Real(self.units.to_si(*value, u)?.0)),
                None => Ok(Value::Real(*value)),
            },
            Expr::Int(i) => Ok(Value::Int(*i)),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Sym(s) => Ok(Value::Sym(s.clone())),
            Expr::Name(name) => self.eval_name(scope, name),
            Expr::Unary { op, arg } => {
                let v = self.eval(scope, arg)?;
                match (op, v) {
                    (UnaryOp::Neg, Value::Int(i)) => i
                        .checked_neg()
                        .map(Value::Int)
                        .ok_or_else(|| CompileError::Evaluation(format!("-({}) overflows", i))),
                    (UnaryOp::Neg, Value::Real(r)) => Ok(Value::Real(-r)),
                    (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
                    (op, v) => Err(CompileError::Evaluation(format!(
                        "cannot apply {:?} to a {} value",
                        op,
                        v.type_name()
                    ))),
                }
            }
            Expr::Binary { op, lhs, rhs } => {
                let l = self.eval(scope, lhs)?;
                let r = self.eval(scope, rhs)?;
                arithmetic(*op, l, r)
            }
            Expr::Compare { op, lhs, rhs } => {
                let l = self.eval(scope, lhs)?;
                let r = self.eval(scope, rhs)?;
                compare(*op, &l, &r).map(Value::Bool)
            }
            Expr::Logical { op, lhs, rhs } => {
                let l = self.eval(scope, lhs)?;
                let r = self.eval(scope, rhs)?;
                match (l.as_bool(), r.as_bool()) {
                    (Some(a), Some(b)) => Ok(Value::Bool(op.apply(a, b))),
                    _ => Err(CompileError::Evaluation(format!(
                        "'{}' needs boolean operands",
                        op.symbol()
                    ))),
                }
            }
            Expr::Func { func, arg } => {
                let v = self.eval(scope, arg)?;
                let x = v.as_f64().ok_or_else(|| {
                    CompileError::Evaluation(format!("{}() needs a numeric argument", func.name()))
                })?;
                Ok(Value::Real(func.apply(x)))
            }
            Expr::Sum(terms) => {
                let mut total = Value::Int(0);
                for term in terms {
                    match term {
                        Expr::Name(name) if scope.binding_base(name).is_none() => {
                            for leaf in self.leaves(scope, name)? {
                                total = arithmetic(BinOp::Add, total, self.value_of(leaf)?)?;
                            }
                        }
                        other => total = arithmetic(BinOp::Add, total, self.eval(scope, other)?)?,
                    }
                }
                Ok(total)
            }
            Expr::SumOver { index, set, body } => {
                let set = self.eval_set(scope, set)?;
                let mut total = Value::Int(0);
                for element in set.elements() {
                    let mut bindings = scope.bindings.to_vec();
                    bindings.push((index.clone(), element));
                    let inner = Scope::new(scope.instance, &bindings);
                    total = arithmetic(BinOp::Add, total, self.eval(inner, body)?)?;
                }
                Ok(total)
            }
            Expr::Card(set) => Ok(Value::Int(self.eval_set(scope, set)?.len() as i64)),
            Expr::Satisfied { name, tolerance } => {
                let rel = self.resolve(scope, name)?;
                let tol = tolerance.unwrap_or(DEFAULT_SATISFIED_TOLERANCE);
                Ok(Value::Bool(self.relation_satisfied(rel, tol)?))
            }
            Expr::Set(items) => Ok(Value::Set(self.eval_set(scope, items)?)),
        }
    }

    /// Evaluate to a boolean, as WHERE checks and IF tests require.
    pub fn eval_bool(&self, scope: Scope<'_>, expr: &Expr) -> Result<bool, CompileError> {
        let v = self.eval(scope, expr)?;
        v.as_bool().ok_or_else(|| {
            CompileError::Evaluation(format!("'{}' is {}, not boolean", expr, v.type_name()))
        })
    }

    pub fn eval_set(&self, scope: Scope<'_>, items: &SetExpr) -> Result<SetValue, CompileError> {
        let mut set = SetValue::default();
        for item in items {
            match item {
                SetItem::Single(expr) => match self.eval(scope, expr)? {
                    Value::Set(s) => set = set.union(&s).map_err(CompileError::Evaluation)?,
                    v @ (Value::Int(_) | Value::Sym(_)) => {
                        set.insert(v).map_err(CompileError::Evaluation)?
                    }
                    v => {
                        return Err(CompileError::Evaluation(format!(
                            "a {} value cannot be a set element",
                            v.type_name()
                        )))
                    }
                },
                SetItem::Range(lo, hi) => {
                    let (lo, hi) = (self.eval_int(scope, lo)?, self.eval_int(scope, hi)?);
                    for i in lo..=hi {
                        set.insert(Value::Int(i)).map_err(CompileError::Evaluation)?;
                    }
                }
            }
        }
        Ok(set)
    }

    fn eval_int(&self, scope: Scope<'_>, expr: &Expr) -> Result<i64, CompileError> {
        match self.eval(scope, expr)? {
            Value::Int(i) => Ok(i),
            Value::Real(r) if r.fract() == 0.0 => Ok(r as i64),
            v => Err(CompileError::Evaluation(format!(
                "range bound '{}' is {}, not integer",
                expr,
                v.type_name()
            ))),
        }
    }

    /// Subscript keys selected by one `[...]` part, in set order.
    pub fn eval_subscript(
        &self,
        scope: Scope<'_>,
        items: &SetExpr,
    ) -> Result<Vec<Value>, CompileError> {
        if let [SetItem::Single(expr)] = items.as_slice() {
            return match self.eval(scope, expr)? {
                Value::Set(s) => Ok(s.elements()),
                v @ (Value::Int(_) | Value::Sym(_)) => Ok(vec![v]),
                v => Err(CompileError::Evaluation(format!(
                    "subscript '{}' is {}",
                    expr,
                    v.type_name()
                ))),
            };
        }
        Ok(self.eval_set(scope, items)?.elements())
    }

    /// Key used to look up an array element by a subscript value.
    pub fn subscript_key(&self, value: &Value) -> Option<ChildKey> {
        match value {
            Value::Int(i) => Some(ChildKey::Int(*i)),
            Value::Sym(s) => self.symbols.find(s).map(ChildKey::Sym),
            _ => None,
        }
    }

    fn eval_name(&self, scope: Scope<'_>, name: &Name) -> Result<Value, CompileError> {
        if let Some(id) = name.simple_id() {
            if let Some(v) = scope.binding(id) {
                return Ok(v.clone());
            }
        }
        let ids = self.resolve_all(scope, name)?;
        match ids.as_slice() {
            [one] => self.value_of(*one),
            _ => Err(CompileError::Evaluation(format!(
                "'{}' names {} instances where one value is needed",
                name,
                ids.len()
            ))),
        }
    }

    /// Resolve a name that must denote exactly one instance.
    pub fn resolve(&self, scope: Scope<'_>, name: &Name) -> Result<InstanceId, CompileError> {
        let ids = self.resolve_all(scope, name)?;
        match ids.as_slice() {
            [one] => Ok(*one),
            _ => Err(CompileError::UndefinedName(format!(
                "'{}' does not name a single instance",
                name
            ))),
        }
    }

    /// Resolve a name to every instance it denotes. Subscripts with sets or
    /// ranges select several array elements.
    pub fn resolve_all(
        &self,
        scope: Scope<'_>,
        name: &Name,
    ) -> Result<Vec<InstanceId>, CompileError> {
        let mut current = vec![scope.instance];
        for part in &name.parts {
            let mut next = Vec::with_capacity(current.len());
            match part {
                NamePart::Id(id) => {
                    let sym = self
                        .symbols
                        .find(id)
                        .ok_or_else(|| CompileError::UndefinedName(name.to_string()))?;
                    for parent in &current {
                        let child = self
                            .arena
                            .child(*parent, &ChildKey::Name(sym))
                            .ok_or_else(|| CompileError::UndefinedName(name.to_string()))?;
                        next.push(child);
                    }
                }
                NamePart::Subscript(items) => {
                    let keys = self.eval_subscript(scope, items)?;
                    for parent in &current {
                        if self.arena.instance(*parent)?.kind != InstanceKind::Array {
                            return Err(CompileError::UndefinedName(format!(
                                "'{}' subscripts something that is not an array",
                                name
                            )));
                        }
                        for key in &keys {
                            let child = self
                                .subscript_key(key)
                                .and_then(|k| self.arena.child(*parent, &k))
                                .ok_or_else(|| {
                                    CompileError::UndefinedName(format!(
                                        "{} (no element [{}])",
                                        name, key
                                    ))
                                })?;
                            next.push(child);
                        }
                    }
                }
            }
            current = next;
        }
        Ok(current)
    }

    /// Resolve a name and expand any arrays it denotes into their elements,
    /// depth first in element order.
    pub fn leaves(&self, scope: Scope<'_>, name: &Name) -> Result<Vec<InstanceId>, CompileError> {
        let mut out = Vec::new();
        for id in self.resolve_all(scope, name)? {
            self.collect_leaves(id, &mut out)?;
        }
        Ok(out)
    }

    fn collect_leaves(
        &self,
        id: InstanceId,
        out: &mut Vec<InstanceId>,
    ) -> Result<(), CompileError> {
        let inst = self.arena.instance(id)?;
        if inst.kind == InstanceKind::Array {
            for child in inst.children.values() {
                self.collect_leaves(*child, out)?;
            }
        } else {
            out.push(id);
        }
        Ok(())
    }

    /// Value of an atom, constant or set instance.
    pub fn value_of(&self, id: InstanceId) -> Result<Value, CompileError> {
        let inst = self.arena.instance(id)?;
        if !(inst.kind.is_atom() || inst.kind == InstanceKind::Set) {
            return Err(CompileError::Evaluation(format!(
                "a {:?} instance of '{}' has no value",
                inst.kind, inst.desc.name
            )));
        }
        if self.mode == EvalMode::Constant && !inst.is_constant() {
            return Err(CompileError::Evaluation(format!(
                "'{}' is not a constant",
                inst.desc.name
            )));
        }
        if !inst.value.is_defined() {
            return Err(CompileError::Evaluation(format!(
                "a '{}' instance has not been assigned",
                inst.desc.name
            )));
        }
        Ok(inst.value.clone())
    }

    pub fn residual(&self, id: InstanceId) -> Result<f64, CompileError> {
        let inst = self.arena.instance(id)?;
        let rel = inst.relation.as_ref().ok_or_else(|| {
            CompileError::Evaluation(format!("'{}' instance is not a relation", inst.desc.name))
        })?;
        relation_residual(self.arena, self.externals, rel)
    }

    pub fn relation_satisfied(&self, id: InstanceId, tolerance: f64) -> Result<bool, CompileError> {
        let inst = self.arena.instance(id)?;
        let rel = inst.relation.as_ref().ok_or_else(|| {
            CompileError::Evaluation(format!("'{}' instance is not a relation", inst.desc.name))
        })?;
        relation_satisfied(self.arena, self.externals, rel, tolerance)
    }
}

/// Arithmetic on values. Integer `+ - *` stays integer; sets use `+ * -` as
/// union, intersection and difference.
pub fn arithmetic(op: BinOp, lhs: Value, rhs: Value) -> Result<Value, CompileError> {
    match (op, &lhs, &rhs) {
        (_, Value::Set(a), Value::Set(b)) => {
            let r = match op {
                BinOp::Add => a.union(b),
                BinOp::Mul => a.intersection(b),
                BinOp::Sub => a.difference(b),
                _ => Err(format!("'{}' is not a set operation", op.symbol())),
            };
            r.map(Value::Set).map_err(CompileError::Evaluation)
        }
        (BinOp::Add | BinOp::Sub | BinOp::Mul, Value::Int(a), Value::Int(b)) => {
            let result = match op {
                BinOp::Add => a.checked_add(*b),
                BinOp::Sub => a.checked_sub(*b),
                _ => a.checked_mul(*b),
            };
            result.map(Value::Int).ok_or_else(|| {
                CompileError::Evaluation(format!("{} {} {} overflows", a, op.symbol(), b))
            })
        }
        (BinOp::Pow, Value::Int(a), Value::Int(b)) if *b >= 0 => u32::try_from(*b)
            .ok()
            .and_then(|e| a.checked_pow(e))
            .map(Value::Int)
            .ok_or_else(|| CompileError::Evaluation(format!("{}^{} overflows", a, b))),
        _ => match (lhs.as_f64(), rhs.as_f64()) {
            (Some(a), Some(b)) => Ok(Value::Real(op.apply(a, b))),
            _ => Err(CompileError::Evaluation(format!(
                "cannot apply '{}' to {} and {}",
                op.symbol(),
                lhs.type_name(),
                rhs.type_name()
            ))),
        },
    }
}

pub fn compare(op: RelOp, lhs: &Value, rhs: &Value) -> Result<bool, CompileError> {
    if let (Some(a), Some(b)) = (lhs.as_f64(), rhs.as_f64()) {
        return Ok(op.holds(a, b));
    }
    let equal = match (lhs, rhs) {
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Sym(a), Value::Sym(b)) => a == b,
        (Value::Set(a), Value::Set(b)) => a == b,
        _ => {
            return Err(CompileError::Evaluation(format!(
                "cannot compare {} with {}",
                lhs.type_name(),
                rhs.type_name()
            )))
        }
    };
    match op {
        RelOp::Equal => Ok(equal),
        RelOp::NotEqual => Ok(!equal),
        _ => Err(CompileError::Evaluation(format!(
            "'{}' needs numeric operands",
            op.symbol()
        ))),
    }
}

fn real_of(arena: &InstanceArena, id: InstanceId) -> Result<f64, CompileError> {
    let inst = arena.instance(id)?;
    inst.value.as_f64().ok_or_else(|| {
        CompileError::Evaluation(format!("a '{}' instance has no numeric value", inst.desc.name))
    })
}

pub fn term_value(arena: &InstanceArena, term: &Term) -> Result<f64, CompileError> {
    Ok(match term {
        Term::Num(x) => *x,
        Term::Var(id) | Term::Const(id) => real_of(arena, *id)?,
        Term::Neg(t) => -term_value(arena, t)?,
        Term::Binary { op, lhs, rhs } => op.apply(term_value(arena, lhs)?, term_value(arena, rhs)?),
        Term::Func { func, arg } => func.apply(term_value(arena, arg)?),
    })
}

/// Both sides of a relation at the current variable values.
pub fn relation_sides(
    arena: &InstanceArena,
    externals: &ExternalLibrary,
    rel: &RelationData,
) -> Result<(f64, f64), CompileError> {
    match &rel.form {
        RelationForm::Token { lhs, rhs } => Ok((term_value(arena, lhs)?, term_value(arena, rhs)?)),
        RelationForm::Blackbox {
            function,
            inputs,
            outputs,
            output,
        } => {
            let args = inputs
                .iter()
                .map(|i| real_of(arena, *i))
                .collect::<Result<Vec<_>, _>>()?;
            let results = externals.evaluate(function, &args)?;
            let computed = results.get(*output).copied().ok_or_else(|| {
                CompileError::External(format!("'{}' has no output {}", function, output + 1))
            })?;
            let target = outputs.get(*output).ok_or_else(|| {
                CompileError::External(format!("'{}' output {} is unbound", function, output + 1))
            })?;
            Ok((computed, real_of(arena, *target)?))
        }
    }
}

/// `lhs - rhs` of a relation.
pub fn relation_residual(
    arena: &InstanceArena,
    externals: &ExternalLibrary,
    rel: &RelationData,
) -> Result<f64, CompileError> {
    let (l, r) = relation_sides(arena, externals, rel)?;
    Ok(l - r)
}

pub fn relation_satisfied(
    arena: &InstanceArena,
    externals: &ExternalLibrary,
    rel: &RelationData,
    tolerance: f64,
) -> Result<bool, CompileError> {
    let (l, r) = relation_sides(arena, externals, rel)?;
    Ok(match rel.op {
        RelOp::Equal => (l - r).abs() <= tolerance,
        RelOp::NotEqual => (l - r).abs() > tolerance,
        op => op.holds(l, r) || (l - r).abs() <= tolerance,
    })
}

pub fn logrel_value(
    arena: &InstanceArena,
    externals: &ExternalLibrary,
    term: &LogTerm,
) -> Result<bool, CompileError> {
    Ok(match term {
        LogTerm::Bool(b) => *b,
        LogTerm::Var(id) => {
            let inst = arena.instance(*id)?;
            inst.value.as_bool().ok_or_else(|| {
                CompileError::Evaluation(format!(
                    "a '{}' instance has no boolean value",
                    inst.desc.name
                ))
            })?
        }
        LogTerm::Not(t) => !logrel_value(arena, externals, t)?,
        LogTerm::Binary { op, lhs, rhs } => {
            let a = logrel_value(arena, externals, lhs)?;
            let b = logrel_value(arena, externals, rhs)?;
            match op {
                LogicalOp::And => a && b,
                LogicalOp::Or => a || b,
                LogicalOp::BoolEq => a == b,
                LogicalOp::BoolNe => a != b,
            }
        }
        LogTerm::Satisfied { relation, tolerance } => {
            let inst = arena.instance(*relation)?;
            let rel = inst.relation.as_ref().ok_or_else(|| {
                CompileError::Evaluation("SATISFIED needs a relation".to_string())
            })?;
            relation_satisfied(arena, externals, rel, *tolerance)?
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::Instance;
    use ascend_core::{BaseKind, TypeDescription};
    use std::sync::Arc;

    struct Fixture {
        arena: InstanceArena,
        symbols: SymbolTable,
        units: UnitsTable,
        externals: ExternalLibrary,
        root: InstanceId,
    }

    impl Fixture {
        fn new() -> Self {
            let mut arena = InstanceArena::new();
            let root = arena.alloc(Instance::new(
                InstanceKind::Model,
                Arc::new(TypeDescription::new("m", BaseKind::Model)),
            ));
            Self {
                arena,
                symbols: SymbolTable::new(),
                units: UnitsTable::new(),
                externals: ExternalLibrary::new(),
                root,
            }
        }

        fn add(
            &mut self,
            parent: InstanceId,
            key: ChildKey,
            kind: InstanceKind,
            constant: bool,
            value: Value,
        ) -> InstanceId {
            let base = if constant { BaseKind::Constant } else { BaseKind::Atom };
            let mut inst = Instance::new(kind, Arc::new(TypeDescription::new("t", base)));
            inst.value = value;
            let id = self.arena.alloc(inst);
            self.arena.add_child(parent, key, id).unwrap();
            id
        }

        fn named(
            &mut self,
            name: &str,
            kind: InstanceKind,
            constant: bool,
            value: Value,
        ) -> InstanceId {
            let key = ChildKey::Name(self.symbols.intern(name));
            self.add(self.root, key, kind, constant, value)
        }

        fn eval(&self, mode: EvalMode) -> Evaluator<'_> {
            Evaluator::new(&self.arena, &self.symbols, &self.units, &self.externals, mode)
        }
    }

    #[test]
    fn test_integer_arithmetic_stays_integer() {
        let fx = Fixture::new();
        let ev = fx.eval(EvalMode::Constant);
        let scope = Scope::new(fx.root, &[]);
        let expr = Expr::Int(2) * Expr::Int(3) + Expr::Int(1);
        assert_eq!(ev.eval(scope, &expr).unwrap(), Value::Int(7));
        assert_eq!(ev.eval(scope, &(Expr::Int(3) / Expr::Int(2))).unwrap(), Value::Real(1.5));
        assert_eq!(ev.eval(scope, &Expr::real_units(2.0, "km")).unwrap(), Value::Real(2000.0));
    }

    #[test]
    fn test_integer_overflow_is_an_error() {
        let fx = Fixture::new();
        let ev = fx.eval(EvalMode::Constant);
        let scope = Scope::new(fx.root, &[]);
        let overflowing = [
            Expr::Int(i64::MAX) + Expr::Int(1),
            Expr::Int(i64::MIN) - Expr::Int(1),
            Expr::Int(i64::MAX) * Expr::Int(2),
            Expr::Int(2).pow(Expr::Int(1 << 32)),
            Expr::Int(2).pow(Expr::Int(64)),
            -Expr::Int(i64::MIN),
        ];
        for expr in &overflowing {
            assert!(
                matches!(ev.eval(scope, expr), Err(CompileError::Evaluation(_))),
                "{:?}",
                expr
            );
        }
        assert_eq!(ev.eval(scope, &Expr::Int(2).pow(Expr::Int(62))).unwrap(), Value::Int(1 << 62));
        let expr = Expr::Int(i64::MIN) + Expr::Int(1);
        assert_eq!(ev.eval(scope, &expr).unwrap(), Value::Int(i64::MIN + 1));
    }

    #[test]
    fn test_constant_mode_rejects_variables() {
        let mut fx = Fixture::new();
        fx.named("n", InstanceKind::Integer, true, Value::Int(4));
        fx.named("x", InstanceKind::Real, false, Value::Real(1.0));
        fx.named("k", InstanceKind::Integer, true, Value::Undefined);
        let scope = Scope::new(fx.root, &[]);

        let ev = fx.eval(EvalMode::Constant);
        assert_eq!(ev.eval(scope, &Expr::name("n")).unwrap(), Value::Int(4));
        assert!(matches!(ev.eval(scope, &Expr::name("x")), Err(CompileError::Evaluation(_))));
        assert!(matches!(ev.eval(scope, &Expr::name("k")), Err(CompileError::Evaluation(_))));
        assert!(matches!(ev.eval(scope, &Expr::name("nope")), Err(CompileError::UndefinedName(_))));

        let ev = fx.eval(EvalMode::Procedural);
        assert_eq!(ev.eval(scope, &Expr::name("x")).unwrap(), Value::Real(1.0));
    }

    #[test]
    fn test_sets_and_bindings() {
        let fx = Fixture::new();
        let ev = fx.eval(EvalMode::Constant);
        let bindings = vec![("i".to_string(), Value::Int(3))];
        let scope = Scope::new(fx.root, &bindings);
        let items = vec![
            SetItem::Range(Expr::Int(1), Expr::name("i")),
            SetItem::Single(Expr::Int(7)),
        ];
        let set = ev.eval_set(scope, &items).unwrap();
        assert_eq!(set.len(), 4);
        let empty = Expr::Card(vec![SetItem::Range(Expr::Int(5), Expr::Int(4))]);
        assert_eq!(ev.eval(scope, &empty).unwrap(), Value::Int(0));

        let sum = Expr::SumOver {
            index: "j".into(),
            set: vec![SetItem::Range(Expr::Int(1), Expr::Int(4))],
            body: Box::new(Expr::name("j") * Expr::name("i")),
        };
        assert_eq!(ev.eval(scope, &sum).unwrap(), Value::Int(30));
    }

    #[test]
    fn test_array_resolution_and_sum() {
        let mut fx = Fixture::new();
        let arr = Instance::new(
            InstanceKind::Array,
            Arc::new(TypeDescription::new("real", BaseKind::Atom)),
        );
        let arr = fx.arena.alloc(arr);
        let key = ChildKey::Name(fx.symbols.intern("x"));
        fx.arena.add_child(fx.root, key, arr).unwrap();
        for i in 1..=3 {
            fx.add(arr, ChildKey::Int(i), InstanceKind::Real, false, Value::Real(i as f64));
        }
        let scope = Scope::new(fx.root, &[]);
        let ev = fx.eval(EvalMode::Procedural);

        let x2 = Name::id("x").sub(Expr::Int(2));
        assert_eq!(ev.eval(scope, &Expr::Name(x2)).unwrap(), Value::Real(2.0));
        let range = Name::id("x").sub_range(Expr::Int(2), Expr::Int(3));
        assert_eq!(ev.resolve_all(scope, &range).unwrap().len(), 2);
        assert_eq!(ev.leaves(scope, &Name::id("x")).unwrap().len(), 3);
        assert_eq!(ev.eval(scope, &Expr::Sum(vec![Expr::name("x")])).unwrap(), Value::Real(6.0));
        assert!(ev.resolve(scope, &Name::id("x").sub(Expr::Int(9))).is_err());
    }

    #[test]
    fn test_term_residual() {
        let mut fx = Fixture::new();
        let a = fx.named("a", InstanceKind::Real, false, Value::Real(2.0));
        let b = fx.named("b", InstanceKind::Real, false, Value::Real(5.0));
        let rel = RelationData {
            op: RelOp::Equal,
            form: RelationForm::Token {
                lhs: Term::Binary {
                    op: BinOp::Mul,
                    lhs: Box::new(Term::Var(a)),
                    rhs: Box::new(Term::Var(b)),
                },
                rhs: Term::Num(10.0),
            },
            conditional: false,
        };
        assert_eq!(relation_residual(&fx.arena, &fx.externals, &rel).unwrap(), 0.0);
        assert!(relation_satisfied(&fx.arena, &fx.externals, &rel, 1e-9).unwrap());
        assert_eq!(rel.incidence(), vec![a, b]);
    }
}
