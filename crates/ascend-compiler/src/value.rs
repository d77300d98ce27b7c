//! Values held by atoms, constants and sets, and produced by evaluation

use std::collections::BTreeSet;
use std::fmt;

use ascend_core::{Literal, ValueType};
use serde::Serialize;

/// Ordered set of integers or symbols.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum SetValue {
    Ints(BTreeSet<i64>),
    Syms(BTreeSet<String>),
}

impl Default for SetValue {
    fn default() -> Self {
        SetValue::Ints(BTreeSet::new())
    }
}

impl SetValue {
    pub fn len(&self) -> usize {
        match self {
            SetValue::Ints(s) => s.len(),
            SetValue::Syms(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Elements in set order.
    pub fn elements(&self) -> Vec<Value> {
        match self {
            SetValue::Ints(s) => s.iter().map(|i| Value::Int(*i)).collect(),
            SetValue::Syms(s) => s.iter().map(|x| Value::Sym(x.clone())).collect(),
        }
    }

    pub fn contains(&self, value: &Value) -> bool {
        match (self, value) {
            (SetValue::Ints(s), Value::Int(i)) => s.contains(i),
            (SetValue::Syms(s), Value::Sym(x)) => s.contains(x),
            _ => false,
        }
    }

    /// Add one element; fails when mixing integers and symbols.
    pub fn insert(&mut self, value: Value) -> Result<(), String> {
        if self.is_empty() {
            if let Value::Sym(_) = value {
                *self = SetValue::Syms(BTreeSet::new());
            }
        }
        match (self, value) {
            (SetValue::Ints(s), Value::Int(i)) => {
                s.insert(i);
                Ok(())
            }
            (SetValue::Syms(s), Value::Sym(x)) => {
                s.insert(x);
                Ok(())
            }
            (_, other) => Err(format!("cannot add {} to a set of another element type", other)),
        }
    }

    fn combine(
        &self,
        other: &SetValue,
        ints: impl Fn(&BTreeSet<i64>, &BTreeSet<i64>) -> BTreeSet<i64>,
        syms: impl Fn(&BTreeSet<String>, &BTreeSet<String>) -> BTreeSet<String>,
    ) -> Result<SetValue, String> {
        match (self, other) {
            (SetValue::Ints(a), SetValue::Ints(b)) => Ok(SetValue::Ints(ints(a, b))),
            (SetValue::Syms(a), SetValue::Syms(b)) => Ok(SetValue::Syms(syms(a, b))),
            (SetValue::Ints(a), SetValue::Syms(b)) if a.is_empty() => {
                Ok(SetValue::Syms(syms(&BTreeSet::new(), b)))
            }
            (SetValue::Syms(a), SetValue::Ints(b)) if b.is_empty() => {
                Ok(SetValue::Syms(syms(a, &BTreeSet::new())))
            }
            _ => Err("set operation on sets of different element types".to_string()),
        }
    }

    pub fn union(&self, other: &SetValue) -> Result<SetValue, String> {
        self.combine(
            other,
            |a, b| a.union(b).copied().collect(),
            |a, b| a.union(b).cloned().collect(),
        )
    }

    pub fn intersection(&self, other: &SetValue) -> Result<SetValue, String> {
        self.combine(
            other,
            |a, b| a.intersection(b).copied().collect(),
            |a, b| a.intersection(b).cloned().collect(),
        )
    }

    pub fn difference(&self, other: &SetValue) -> Result<SetValue, String> {
        self.combine(
            other,
            |a, b| a.difference(b).copied().collect(),
            |a, b| a.difference(b).cloned().collect(),
        )
    }
}

impl fmt::Display for SetValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let items: Vec<String> = self.elements().iter().map(|v| v.to_string()).collect();
        write!(f, "[{}]", items.join(","))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub enum Value {
    #[default]
    Undefined,
    Real(f64),
    Int(i64),
    Bool(bool),
    Sym(String),
    Set(SetValue),
}

impl Value {
    pub fn is_defined(&self) -> bool {
        !matches!(self, Value::Undefined)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Real(r) => Some(*r),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_set(&self) -> Option<&SetValue> {
        match self {
            Value::Set(s) => Some(s),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Real(_) => "real",
            Value::Int(_) => "integer",
            Value::Bool(_) => "boolean",
            Value::Sym(_) => "symbol",
            Value::Set(_) => "set",
        }
    }

    /// Convert to the representation stored by an atom of `value_type`.
    pub fn coerce(self, value_type: ValueType) -> Result<Value, String> {
        match (value_type, self) {
            (ValueType::Real, Value::Real(r)) => Ok(Value::Real(r)),
            (ValueType::Real, Value::Int(i)) => Ok(Value::Real(i as f64)),
            (ValueType::Integer, Value::Int(i)) => Ok(Value::Int(i)),
            (ValueType::Integer, Value::Real(r)) if r.fract() == 0.0 => Ok(Value::Int(r as i64)),
            (ValueType::Boolean, Value::Bool(b)) => Ok(Value::Bool(b)),
            (ValueType::Symbol, Value::Sym(s)) => Ok(Value::Sym(s)),
            (vt, v) => Err(format!("cannot store a {} value in a {:?} atom", v.type_name(), vt)),
        }
    }

    /// Equality used by SELECT/SWITCH/WHEN case matching. A set case value
    /// matches any of its members.
    pub fn matches(&self, case: &Value) -> bool {
        match (self, case) {
            (v, Value::Set(s)) => s.contains(v),
            (Value::Int(a), Value::Real(b)) | (Value::Real(b), Value::Int(a)) => *a as f64 == *b,
            (a, b) => a == b,
        }
    }
}

impl From<&Literal> for Value {
    fn from(lit: &Literal) -> Self {
        match lit {
            Literal::Real(r) => Value::Real(*r),
            Literal::Int(i) => Value::Int(*i),
            Literal::Bool(b) => Value::Bool(*b),
            Literal::Sym(s) => Value::Sym(s.clone()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "UNDEFINED"),
            Value::Real(r) => write!(f, "{}", r),
            Value::Int(i) => write!(f, "{}", i),
            Value::Bool(b) => write!(f, "{}", if *b { "TRUE" } else { "FALSE" }),
            Value::Sym(s) => write!(f, "'{}'", s),
            Value::Set(s) => write!(f, "{}", s),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ints(v: &[i64]) -> SetValue {
        SetValue::Ints(v.iter().copied().collect())
    }

    #[test]
    fn test_set_arithmetic() {
        let a = ints(&[1, 2, 3]);
        let b = ints(&[3, 4]);
        assert_eq!(a.union(&b).unwrap(), ints(&[1, 2, 3, 4]));
        assert_eq!(a.intersection(&b).unwrap(), ints(&[3]));
        assert_eq!(a.difference(&b).unwrap(), ints(&[1, 2]));
    }

    #[test]
    fn test_mixed_sets_rejected() {
        let mut syms = SetValue::default();
        syms.insert(Value::Sym("water".into())).unwrap();
        assert!(syms.insert(Value::Int(1)).is_err());
        assert!(ints(&[1]).union(&syms).is_err());
        assert_eq!(SetValue::default().union(&syms).unwrap(), syms);
    }

    #[test]
    fn test_coerce() {
        assert_eq!(Value::Int(3).coerce(ValueType::Real), Ok(Value::Real(3.0)));
        assert_eq!(Value::Real(2.0).coerce(ValueType::Integer), Ok(Value::Int(2)));
        assert!(Value::Real(2.5).coerce(ValueType::Integer).is_err());
        assert!(Value::Bool(true).coerce(ValueType::Real).is_err());
    }

    #[test]
    fn test_case_matching() {
        assert!(Value::Int(2).matches(&Value::Set(ints(&[1, 2]))));
        assert!(Value::Sym("a".into()).matches(&Value::Sym("a".into())));
        assert!(!Value::Bool(true).matches(&Value::Bool(false)));
    }
}
