//! Statement data model
//!
//! Statements are produced by the parser and never mutated afterwards. Every
//! compound form that requires a body stores it as a plain `Vec`; only the
//! optional `ELSE` branch of `IF` is an `Option`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::expr::Expr;
use crate::name::{Name, SetExpr};

/// Where a statement was written.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLoc {
    #[serde(default)]
    pub module: String,
    #[serde(default)]
    pub line: u32,
}

impl SourceLoc {
    pub fn new(module: impl Into<String>, line: u32) -> Self {
        Self {
            module: module.into(),
            line,
        }
    }
}

impl fmt::Display for SourceLoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.module.is_empty() {
            write!(f, "line {}", self.line)
        } else {
            write!(f, "{}:{}", self.module, self.line)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForKind {
    Create,
    Do,
    Check,
    Expect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowKind {
    Break,
    Continue,
    FallThrough,
    Return,
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtMode {
    Method,
    Blackbox,
}

/// One `CASE` arm of a WHEN, SELECT or SWITCH. `values == None` is
/// `OTHERWISE`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Case {
    #[serde(default)]
    pub values: Option<Vec<Expr>>,
    pub body: Vec<Statement>,
}

impl Case {
    pub fn matching(values: Vec<Expr>, body: Vec<Statement>) -> Self {
        Self {
            values: Some(values),
            body,
        }
    }

    pub fn otherwise(body: Vec<Statement>) -> Self {
        Self { values: None, body }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stmt", rename_all = "snake_case")]
pub enum StatementKind {
    IsA {
        names: Vec<Name>,
        type_name: String,
        #[serde(default)]
        args: Vec<Expr>,
        /// Element type of `set OF ...`.
        #[serde(default)]
        of_type: Option<String>,
        /// `WITH_VALUE`
        #[serde(default)]
        value: Option<Expr>,
    },
    WillBe {
        names: Vec<Name>,
        type_name: String,
        #[serde(default)]
        args: Vec<Expr>,
        #[serde(default)]
        of_type: Option<String>,
        #[serde(default)]
        value: Option<Expr>,
    },
    Aliases {
        names: Vec<Name>,
        target: Name,
    },
    /// `array[S] ALIASES (sources) WHERE S IS_A set OF set_type WITH_VALUE (...)`
    AliasArray {
        array: Name,
        sources: Vec<Name>,
        set_name: String,
        set_type: String,
        #[serde(default)]
        values: Option<SetExpr>,
    },
    IsRefinedTo {
        names: Vec<Name>,
        type_name: String,
        #[serde(default)]
        args: Vec<Expr>,
    },
    AreTheSame {
        names: Vec<Name>,
    },
    AreAlike {
        names: Vec<Name>,
    },
    WillBeTheSame {
        names: Vec<Name>,
    },
    WillNotBeTheSame {
        names: Vec<Name>,
    },
    Relation {
        #[serde(default)]
        name: Option<Name>,
        expr: Expr,
    },
    LogRelation {
        #[serde(default)]
        name: Option<Name>,
        expr: Expr,
    },
    For {
        index: String,
        set: SetExpr,
        kind: ForKind,
        body: Vec<Statement>,
    },
    When {
        #[serde(default)]
        name: Option<Name>,
        vars: Vec<Name>,
        cases: Vec<Case>,
    },
    Use {
        name: Name,
    },
    Select {
        vars: Vec<Name>,
        cases: Vec<Case>,
    },
    Switch {
        vars: Vec<Name>,
        cases: Vec<Case>,
    },
    Conditional {
        body: Vec<Statement>,
    },
    Assign {
        target: Name,
        value: Expr,
    },
    ConstAssign {
        target: Name,
        value: Expr,
    },
    External {
        #[serde(default)]
        name: Option<Name>,
        function: String,
        mode: ExtMode,
        #[serde(default)]
        inputs: Vec<Name>,
        #[serde(default)]
        outputs: Vec<Name>,
        #[serde(default)]
        data: Option<Name>,
    },
    /// `RUN target` or `RUN Type::method` when `type_access` is set.
    Run {
        target: Name,
        #[serde(default)]
        type_access: Option<String>,
    },
    Call {
        function: String,
        #[serde(default)]
        args: Vec<Name>,
    },
    Fix {
        names: Vec<Name>,
    },
    Free {
        names: Vec<Name>,
    },
    Flow {
        flow: FlowKind,
        #[serde(default)]
        message: Option<String>,
    },
    If {
        test: Expr,
        then_body: Vec<Statement>,
        #[serde(default)]
        else_body: Option<Vec<Statement>>,
    },
    While {
        test: Expr,
        body: Vec<Statement>,
    },
    Assert {
        test: Expr,
    },
}

impl StatementKind {
    /// Keyword used in diagnostics.
    pub fn keyword(&self) -> &'static str {
        match self {
            StatementKind::IsA { .. } => "IS_A",
            StatementKind::WillBe { .. } => "WILL_BE",
            StatementKind::Aliases { .. } => "ALIASES",
            StatementKind::AliasArray { .. } => "ALIASES/IS_A",
            StatementKind::IsRefinedTo { .. } => "IS_REFINED_TO",
            StatementKind::AreTheSame { .. } => "ARE_THE_SAME",
            StatementKind::AreAlike { .. } => "ARE_ALIKE",
            StatementKind::WillBeTheSame { .. } => "WILL_BE_THE_SAME",
            StatementKind::WillNotBeTheSame { .. } => "WILL_NOT_BE_THE_SAME",
            StatementKind::Relation { .. } => "relation",
            StatementKind::LogRelation { .. } => "logical relation",
            StatementKind::For { .. } => "FOR",
            StatementKind::When { .. } => "WHEN",
            StatementKind::Use { .. } => "USE",
            StatementKind::Select { .. } => "SELECT",
            StatementKind::Switch { .. } => "SWITCH",
            StatementKind::Conditional { .. } => "CONDITIONAL",
            StatementKind::Assign { .. } => ":=",
            StatementKind::ConstAssign { .. } => ":==",
            StatementKind::External { .. } => "EXTERNAL",
            StatementKind::Run { .. } => "RUN",
            StatementKind::Call { .. } => "CALL",
            StatementKind::Fix { .. } => "FIX",
            StatementKind::Free { .. } => "FREE",
            StatementKind::Flow { flow, .. } => match flow {
                FlowKind::Break => "BREAK",
                FlowKind::Continue => "CONTINUE",
                FlowKind::FallThrough => "FALL_THROUGH",
                FlowKind::Return => "RETURN",
                FlowKind::Stop => "STOP",
            },
            StatementKind::If { .. } => "IF",
            StatementKind::While { .. } => "WHILE",
            StatementKind::Assert { .. } => "ASSERT",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    #[serde(flatten)]
    pub kind: StatementKind,
    #[serde(default)]
    pub loc: SourceLoc,
}

impl Statement {
    pub fn new(kind: StatementKind) -> Self {
        Self {
            kind,
            loc: SourceLoc::default(),
        }
    }

    pub fn at(mut self, loc: SourceLoc) -> Self {
        self.loc = loc;
        self
    }

    pub fn keyword(&self) -> &'static str {
        self.kind.keyword()
    }

    /// Nested statement lists of a compound statement, in declaration order.
    pub fn sub_statements(&self) -> Vec<&[Statement]> {
        match &self.kind {
            StatementKind::For { body, .. }
            | StatementKind::Conditional { body }
            | StatementKind::While { body, .. } => vec![body.as_slice()],
            StatementKind::When { cases, .. }
            | StatementKind::Select { cases, .. }
            | StatementKind::Switch { cases, .. } => {
                cases.iter().map(|c| c.body.as_slice()).collect()
            }
            StatementKind::If {
                then_body,
                else_body,
                ..
            } => {
                let mut lists = vec![then_body.as_slice()];
                if let Some(e) = else_body {
                    lists.push(e.as_slice());
                }
                lists
            }
            _ => Vec::new(),
        }
    }

    // Constructors for the common declarative forms.

    pub fn is_a(names: &[&str], type_name: &str) -> Self {
        Self::new(StatementKind::IsA {
            names: names.iter().map(|n| Name::id(*n)).collect(),
            type_name: type_name.to_string(),
            args: Vec::new(),
            of_type: None,
            value: None,
        })
    }

    pub fn is_a_named(names: Vec<Name>, type_name: &str, args: Vec<Expr>) -> Self {
        Self::new(StatementKind::IsA {
            names,
            type_name: type_name.to_string(),
            args,
            of_type: None,
            value: None,
        })
    }

    pub fn set_of(name: &str, of_type: &str, value: Option<Expr>) -> Self {
        Self::new(StatementKind::IsA {
            names: vec![Name::id(name)],
            type_name: "set".to_string(),
            args: Vec::new(),
            of_type: Some(of_type.to_string()),
            value,
        })
    }

    pub fn will_be(names: &[&str], type_name: &str) -> Self {
        Self::new(StatementKind::WillBe {
            names: names.iter().map(|n| Name::id(*n)).collect(),
            type_name: type_name.to_string(),
            args: Vec::new(),
            of_type: None,
            value: None,
        })
    }

    pub fn aliases(names: &[&str], target: Name) -> Self {
        Self::new(StatementKind::Aliases {
            names: names.iter().map(|n| Name::id(*n)).collect(),
            target,
        })
    }

    pub fn relation(name: Option<&str>, expr: Expr) -> Self {
        Self::new(StatementKind::Relation {
            name: name.map(Name::id),
            expr,
        })
    }

    pub fn relation_named(name: Name, expr: Expr) -> Self {
        Self::new(StatementKind::Relation {
            name: Some(name),
            expr,
        })
    }

    pub fn log_relation(name: Option<&str>, expr: Expr) -> Self {
        Self::new(StatementKind::LogRelation {
            name: name.map(Name::id),
            expr,
        })
    }

    pub fn for_each(index: &str, set: SetExpr, kind: ForKind, body: Vec<Statement>) -> Self {
        Self::new(StatementKind::For {
            index: index.to_string(),
            set,
            kind,
            body,
        })
    }

    pub fn assign(target: Name, value: Expr) -> Self {
        Self::new(StatementKind::Assign { target, value })
    }

    pub fn const_assign(target: Name, value: Expr) -> Self {
        Self::new(StatementKind::ConstAssign { target, value })
    }

    pub fn refine(names: &[&str], type_name: &str) -> Self {
        Self::new(StatementKind::IsRefinedTo {
            names: names.iter().map(|n| Name::id(*n)).collect(),
            type_name: type_name.to_string(),
            args: Vec::new(),
        })
    }

    pub fn are_the_same(names: Vec<Name>) -> Self {
        Self::new(StatementKind::AreTheSame { names })
    }

    pub fn fix(names: Vec<Name>) -> Self {
        Self::new(StatementKind::Fix { names })
    }

    pub fn free(names: Vec<Name>) -> Self {
        Self::new(StatementKind::Free { names })
    }

    pub fn run(target: Name) -> Self {
        Self::new(StatementKind::Run {
            target,
            type_access: None,
        })
    }

    pub fn flow(flow: FlowKind) -> Self {
        Self::new(StatementKind::Flow {
            flow,
            message: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::name::SetItem;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_statement_json_shape() {
        let stmt = Statement::is_a(&["T", "P"], "solver_var").at(SourceLoc::new("flash.a4c", 12));
        let value = serde_json::to_value(&stmt).unwrap();
        assert_eq!(value["stmt"], "is_a");
        assert_eq!(value["type_name"], "solver_var");
        assert_eq!(value["loc"]["line"], 12);

        let back: Statement = serde_json::from_value(value).unwrap();
        assert_eq!(back, stmt);
    }

    #[test]
    fn test_minimal_json_uses_defaults() {
        let stmt: Statement = serde_json::from_str(
            r#"{"stmt":"is_a","names":[[{"id":"x"}]],"type_name":"real"}"#,
        )
        .unwrap();
        assert_eq!(stmt, Statement::is_a(&["x"], "real"));
    }

    #[test]
    fn test_sub_statements() {
        let body = vec![Statement::is_a_named(
            vec![Name::id("x").sub(Expr::name("i"))],
            "real",
            vec![],
        )];
        let stmt = Statement::for_each(
            "i",
            vec![SetItem::Range(Expr::Int(1), Expr::Int(5))],
            ForKind::Create,
            body.clone(),
        );
        assert_eq!(stmt.sub_statements(), vec![body.as_slice()]);
        assert_eq!(stmt.keyword(), "FOR");
        assert!(Statement::is_a(&["a"], "real").sub_statements().is_empty());
    }
}
