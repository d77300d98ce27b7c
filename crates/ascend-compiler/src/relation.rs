//! Construction of relation payloads from declared expressions
//!
//! Names are resolved once, when the relation instance is created. Real and
//! integer variables become incident [`Term::Var`] leaves; constants are
//! folded to numbers when simplification is on.

use ascend_core::{Expr, Name, UnaryOp};

use crate::error::CompileError;
use crate::evaluate::{Evaluator, Scope, DEFAULT_SATISFIED_TOLERANCE};
use crate::instance::{
    InstanceId, InstanceKind, LogRelData, LogTerm, RelationData, RelationForm, Term,
};
use crate::value::Value;

pub struct RelationBuilder<'e, 'a> {
    eval: &'e Evaluator<'a>,
    simplify: bool,
}

impl<'e, 'a> RelationBuilder<'e, 'a> {
    pub fn new(eval: &'e Evaluator<'a>, simplify: bool) -> Self {
        Self { eval, simplify }
    }

    /// Build a real relation. The expression must be exactly one comparison
    /// at the top level.
    pub fn build(
        &self,
        scope: Scope<'_>,
        expr: &Expr,
        conditional: bool,
    ) -> Result<RelationData, CompileError> {
        let count = expr.relop_count();
        let Expr::Compare { op, lhs, rhs } = expr else {
            return Err(CompileError::InvalidRelation(format!(
                "'{}' is not an equation or inequality",
                expr
            )));
        };
        if count != 1 {
            return Err(CompileError::InvalidRelation(format!(
                "'{}' has {} relational operators, expected 1",
                expr, count
            )));
        }
        let lhs = self.term(scope, lhs)?;
        let rhs = self.term(scope, rhs)?;
        let (lhs, rhs) = if self.simplify {
            (fold(lhs), fold(rhs))
        } else {
            (lhs, rhs)
        };
        Ok(RelationData {
            op: *op,
            form: RelationForm::Token { lhs, rhs },
            conditional,
        })
    }

    fn term(&self, scope: Scope<'_>, expr: &Expr) -> Result<Term, CompileError> {
        match expr {
            Expr::Real { .. } | Expr::Int(_) | Expr::Card(_) => {
                let v = self.eval.eval(scope, expr)?;
                numeric(expr, &v).map(Term::Num)
            }
            Expr::Name(name) => {
                if let Some(v) = name.simple_id().and_then(|id| scope.binding(id)) {
                    return numeric(expr, v).map(Term::Num);
                }
                let id = self.eval.resolve(scope, name)?;
                self.leaf(name, id)
            }
            Expr::Unary { op: UnaryOp::Neg, arg } => {
                Ok(Term::Neg(Box::new(self.term(scope, arg)?)))
            }
            Expr::Binary { op, lhs, rhs } => Ok(Term::Binary {
                op: *op,
                lhs: Box::new(self.term(scope, lhs)?),
                rhs: Box::new(self.term(scope, rhs)?),
            }),
            Expr::Func { func, arg } => Ok(Term::Func {
                func: *func,
                arg: Box::new(self.term(scope, arg)?),
            }),
            Expr::Sum(items) => {
                let unbound =
                    |name: &Name| name.simple_id().and_then(|id| scope.binding(id)).is_none();
                let mut terms = Vec::new();
                for item in items {
                    match item {
                        Expr::Name(name) if unbound(name) => {
                            for leaf in self.eval.leaves(scope, name)? {
                                terms.push(self.leaf(name, leaf)?);
                            }
                        }
                        other => terms.push(self.term(scope, other)?),
                    }
                }
                Ok(sum(terms))
            }
            Expr::SumOver { index, set, body } => {
                let set = self.eval.eval_set(scope, set)?;
                let mut terms = Vec::with_capacity(set.len());
                for element in set.elements() {
                    let mut bindings = scope.bindings.to_vec();
                    bindings.push((index.clone(), element));
                    terms.push(self.term(Scope::new(scope.instance, &bindings), body)?);
                }
                Ok(sum(terms))
            }
            other => Err(CompileError::InvalidRelation(format!(
                "'{}' cannot appear in a real relation",
                other
            ))),
        }
    }

    fn leaf(&self, name: &Name, id: InstanceId) -> Result<Term, CompileError> {
        let inst = self.eval.arena.instance(id)?;
        match inst.kind {
            InstanceKind::Real | InstanceKind::Integer if inst.is_constant() => {
                match (self.simplify, inst.value.as_f64()) {
                    (true, Some(x)) => Ok(Term::Num(x)),
                    _ => Ok(Term::Const(id)),
                }
            }
            InstanceKind::Real | InstanceKind::Integer => Ok(Term::Var(id)),
            InstanceKind::Array => Err(CompileError::InvalidRelation(format!(
                "'{}' is an array; use SUM to combine its elements",
                name
            ))),
            kind => Err(CompileError::InvalidRelation(format!(
                "'{}' is a {:?} instance, not a real variable",
                name, kind
            ))),
        }
    }

    /// Build a logical relation over boolean variables and SATISFIED terms.
    pub fn build_logrel(
        &self,
        scope: Scope<'_>,
        expr: &Expr,
        conditional: bool,
    ) -> Result<LogRelData, CompileError> {
        Ok(LogRelData {
            expr: self.log_term(scope, expr)?,
            conditional,
        })
    }

    fn log_term(&self, scope: Scope<'_>, expr: &Expr) -> Result<LogTerm, CompileError> {
        match expr {
            Expr::Bool(b) => Ok(LogTerm::Bool(*b)),
            Expr::Name(name) => {
                if let Some(v) = name.simple_id().and_then(|id| scope.binding(id)) {
                    return v.as_bool().map(LogTerm::Bool).ok_or_else(|| {
                        CompileError::InvalidRelation(format!("'{}' is not boolean", name))
                    });
                }
                let id = self.eval.resolve(scope, name)?;
                let inst = self.eval.arena.instance(id)?;
                match inst.kind {
                    InstanceKind::Boolean if inst.is_constant() && self.simplify => {
                        match inst.value.as_bool() {
                            Some(b) => Ok(LogTerm::Bool(b)),
                            None => Ok(LogTerm::Var(id)),
                        }
                    }
                    InstanceKind::Boolean => Ok(LogTerm::Var(id)),
                    kind => Err(CompileError::InvalidRelation(format!(
                        "'{}' is a {:?} instance, not a boolean variable",
                        name, kind
                    ))),
                }
            }
            Expr::Unary { op: UnaryOp::Not, arg } => {
                Ok(LogTerm::Not(Box::new(self.log_term(scope, arg)?)))
            }
            Expr::Logical { op, lhs, rhs } => Ok(LogTerm::Binary {
                op: *op,
                lhs: Box::new(self.log_term(scope, lhs)?),
                rhs: Box::new(self.log_term(scope, rhs)?),
            }),
            Expr::Satisfied { name, tolerance } => {
                let relation = self.eval.resolve(scope, name)?;
                if self.eval.arena.instance(relation)?.kind != InstanceKind::Relation {
                    return Err(CompileError::InvalidRelation(format!(
                        "SATISFIED({}) does not name a relation",
                        name
                    )));
                }
                Ok(LogTerm::Satisfied {
                    relation,
                    tolerance: tolerance.unwrap_or(DEFAULT_SATISFIED_TOLERANCE),
                })
            }
            other => Err(CompileError::InvalidRelation(format!(
                "'{}' cannot appear in a logical relation",
                other
            ))),
        }
    }
}

fn numeric(expr: &Expr, value: &Value) -> Result<f64, CompileError> {
    value.as_f64().ok_or_else(|| {
        CompileError::InvalidRelation(format!("'{}' is {}, not numeric", expr, value.type_name()))
    })
}

fn sum(mut terms: Vec<Term>) -> Term {
    if terms.is_empty() {
        return Term::Num(0.0);
    }
    let first = terms.remove(0);
    terms.into_iter().fold(first, |acc, t| Term::Binary {
        op: ascend_core::BinOp::Add,
        lhs: Box::new(acc),
        rhs: Box::new(t),
    })
}

/// Collapse subexpressions whose operands are all numbers.
pub fn fold(term: Term) -> Term {
    match term {
        Term::Neg(t) => match fold(*t) {
            Term::Num(x) => Term::Num(-x),
            t => Term::Neg(Box::new(t)),
        },
        Term::Binary { op, lhs, rhs } => match (fold(*lhs), fold(*rhs)) {
            (Term::Num(a), Term::Num(b)) => Term::Num(op.apply(a, b)),
            (l, r) => Term::Binary {
                op,
                lhs: Box::new(l),
                rhs: Box::new(r),
            },
        },
        Term::Func { func, arg } => match fold(*arg) {
            Term::Num(x) => Term::Num(func.apply(x)),
            a => Term::Func {
                func,
                arg: Box::new(a),
            },
        },
        t => t,
    }
}
