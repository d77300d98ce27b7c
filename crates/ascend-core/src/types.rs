//! Type descriptions and the fundamental built-in types

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::expr::Expr;
use crate::name::Name;
use crate::statement::{Statement, StatementKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaseKind {
    Model,
    Atom,
    Constant,
    Relation,
    LogRelation,
    When,
    Set,
    Array,
    Patch,
}

impl fmt::Display for BaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BaseKind::Model => "MODEL",
            BaseKind::Atom => "ATOM",
            BaseKind::Constant => "CONSTANT",
            BaseKind::Relation => "relation",
            BaseKind::LogRelation => "logic_relation",
            BaseKind::When => "when",
            BaseKind::Set => "set",
            BaseKind::Array => "array",
            BaseKind::Patch => "PATCH",
        };
        write!(f, "{}", s)
    }
}

/// Value carried by an atom or constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Real,
    Integer,
    Boolean,
    Symbol,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Literal {
    Real(f64),
    Int(i64),
    Bool(bool),
    Sym(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AtomSpec {
    pub value_type: ValueType,
    /// Default value, expressed in `units`.
    #[serde(default)]
    pub default: Option<Literal>,
    #[serde(default)]
    pub units: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Method {
    pub name: String,
    #[serde(default)]
    pub body: Vec<Statement>,
}

/// Documentation note attached to a type or one of its parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    #[serde(default)]
    pub part: Option<String>,
    #[serde(default = "Note::default_lang")]
    pub lang: String,
    pub text: String,
}

impl Note {
    fn default_lang() -> String {
        "inline".to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeDescription {
    pub name: String,
    pub kind: BaseKind,
    #[serde(default)]
    pub refines: Option<String>,
    #[serde(default)]
    pub parameters: Vec<Statement>,
    #[serde(default)]
    pub where_clauses: Vec<Statement>,
    #[serde(default)]
    pub reductions: Vec<Statement>,
    #[serde(default)]
    pub body: Vec<Statement>,
    #[serde(default)]
    pub methods: Vec<Method>,
    #[serde(default)]
    pub atom: Option<AtomSpec>,
    #[serde(default)]
    pub notes: Vec<Note>,
    #[serde(default)]
    pub universal: bool,
}

impl TypeDescription {
    pub fn new(name: impl Into<String>, kind: BaseKind) -> Self {
        Self {
            name: name.into(),
            kind,
            refines: None,
            parameters: Vec::new(),
            where_clauses: Vec::new(),
            reductions: Vec::new(),
            body: Vec::new(),
            methods: Vec::new(),
            atom: None,
            notes: Vec::new(),
            universal: false,
        }
    }

    /// Number of names declared by this type's own parameter statements.
    pub fn parameter_count(&self) -> usize {
        self.parameters
            .iter()
            .map(|s| match &s.kind {
                StatementKind::IsA { names, .. } | StatementKind::WillBe { names, .. } => {
                    names.len()
                }
                _ => 0,
            })
            .sum()
    }

    pub fn method(&self, name: &str) -> Option<&Method> {
        self.methods.iter().find(|m| m.name.eq_ignore_ascii_case(name))
    }

    pub fn is_constant(&self) -> bool {
        self.kind == BaseKind::Constant
    }

    pub fn value_type(&self) -> Option<ValueType> {
        self.atom.as_ref().map(|a| a.value_type)
    }
}

fn atom(
    name: &str,
    kind: BaseKind,
    value_type: ValueType,
    default: Option<Literal>,
) -> TypeDescription {
    let mut desc = TypeDescription::new(name, kind);
    desc.atom = Some(AtomSpec {
        value_type,
        default,
        units: None,
    });
    desc
}

/// Types every library starts with.
///
/// `relation` carries an `included` boolean part that defaults to TRUE; the
/// solver layer reads and writes it through the relation wrapper.
pub fn fundamental_types() -> Vec<TypeDescription> {
    let mut relation = TypeDescription::new("relation", BaseKind::Relation);
    relation.body = vec![
        Statement::is_a(&["included"], "boolean"),
        Statement::assign(Name::id("included"), Expr::Bool(true)),
    ];
    let mut logic_relation = TypeDescription::new("logic_relation", BaseKind::LogRelation);
    logic_relation.body = vec![
        Statement::is_a(&["included"], "boolean"),
        Statement::assign(Name::id("included"), Expr::Bool(true)),
    ];

    vec![
        atom("real", BaseKind::Atom, ValueType::Real, Some(Literal::Real(0.0))),
        atom("integer", BaseKind::Atom, ValueType::Integer, Some(Literal::Int(0))),
        atom("boolean", BaseKind::Atom, ValueType::Boolean, Some(Literal::Bool(false))),
        atom("symbol", BaseKind::Atom, ValueType::Symbol, None),
        atom("real_constant", BaseKind::Constant, ValueType::Real, None),
        atom("integer_constant", BaseKind::Constant, ValueType::Integer, None),
        atom("boolean_constant", BaseKind::Constant, ValueType::Boolean, None),
        atom("symbol_constant", BaseKind::Constant, ValueType::Symbol, None),
        TypeDescription::new("set", BaseKind::Set),
        relation,
        logic_relation,
        TypeDescription::new("when", BaseKind::When),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parameter_count_counts_names() {
        let mut desc = TypeDescription::new("mixer", BaseKind::Model);
        desc.parameters = vec![
            Statement::will_be(&["feed1", "feed2"], "stream"),
            Statement::is_a(&["n"], "integer_constant"),
        ];
        assert_eq!(desc.parameter_count(), 3);
    }

    #[test]
    fn test_fundamentals() {
        let types = fundamental_types();
        let names: Vec<_> = types.iter().map(|t| t.name.as_str()).collect();
        assert!(names.contains(&"real"));
        assert!(names.contains(&"symbol_constant"));
        let rel = types.iter().find(|t| t.name == "relation").unwrap();
        assert_eq!(rel.body.len(), 2);
        assert!(types.iter().find(|t| t.name == "integer_constant").unwrap().is_constant());
    }
}
