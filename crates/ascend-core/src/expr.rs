//! Expression trees used by relations, assignments, set definitions and
//! conditions

use std::fmt;
use std::ops::{Add, Div, Mul, Neg, Sub};

use serde::{Deserialize, Serialize};

use crate::name::{fmt_set, Name, SetExpr};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelOp {
    Equal,
    NotEqual,
    Less,
    LessEq,
    Greater,
    GreaterEq,
}

impl RelOp {
    pub fn symbol(self) -> &'static str {
        match self {
            RelOp::Equal => "=",
            RelOp::NotEqual => "<>",
            RelOp::Less => "<",
            RelOp::LessEq => "<=",
            RelOp::Greater => ">",
            RelOp::GreaterEq => ">=",
        }
    }

    /// Apply the comparison to two numbers.
    pub fn holds(self, lhs: f64, rhs: f64) -> bool {
        match self {
            RelOp::Equal => lhs == rhs,
            RelOp::NotEqual => lhs != rhs,
            RelOp::Less => lhs < rhs,
            RelOp::LessEq => lhs <= rhs,
            RelOp::Greater => lhs > rhs,
            RelOp::GreaterEq => lhs >= rhs,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Pow => "^",
        }
    }

    pub fn apply(self, lhs: f64, rhs: f64) -> f64 {
        match self {
            BinOp::Add => lhs + rhs,
            BinOp::Sub => lhs - rhs,
            BinOp::Mul => lhs * rhs,
            BinOp::Div => lhs / rhs,
            BinOp::Pow => lhs.powf(rhs),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOp {
    Neg,
    Not,
}

/// Boolean connectives and boolean comparison (`==`, `!=`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogicalOp {
    And,
    Or,
    BoolEq,
    BoolNe,
}

impl LogicalOp {
    pub fn symbol(self) -> &'static str {
        match self {
            LogicalOp::And => "AND",
            LogicalOp::Or => "OR",
            LogicalOp::BoolEq => "==",
            LogicalOp::BoolNe => "!=",
        }
    }

    pub fn apply(self, lhs: bool, rhs: bool) -> bool {
        match self {
            LogicalOp::And => lhs && rhs,
            LogicalOp::Or => lhs || rhs,
            LogicalOp::BoolEq => lhs == rhs,
            LogicalOp::BoolNe => lhs != rhs,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MathFunc {
    Exp,
    Ln,
    Log10,
    Sqrt,
    Sqr,
    Cube,
    Abs,
    Sin,
    Cos,
    Tan,
    Arcsin,
    Arccos,
    Arctan,
    Sinh,
    Cosh,
    Tanh,
}

impl MathFunc {
    pub fn apply(self, x: f64) -> f64 {
        match self {
            MathFunc::Exp => x.exp(),
            MathFunc::Ln => x.ln(),
            MathFunc::Log10 => x.log10(),
            MathFunc::Sqrt => x.sqrt(),
            MathFunc::Sqr => x * x,
            MathFunc::Cube => x * x * x,
            MathFunc::Abs => x.abs(),
            MathFunc::Sin => x.sin(),
            MathFunc::Cos => x.cos(),
            MathFunc::Tan => x.tan(),
            MathFunc::Arcsin => x.asin(),
            MathFunc::Arccos => x.acos(),
            MathFunc::Arctan => x.atan(),
            MathFunc::Sinh => x.sinh(),
            MathFunc::Cosh => x.cosh(),
            MathFunc::Tanh => x.tanh(),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            MathFunc::Exp => "exp",
            MathFunc::Ln => "ln",
            MathFunc::Log10 => "log10",
            MathFunc::Sqrt => "sqrt",
            MathFunc::Sqr => "sqr",
            MathFunc::Cube => "cube",
            MathFunc::Abs => "abs",
            MathFunc::Sin => "sin",
            MathFunc::Cos => "cos",
            MathFunc::Tan => "tan",
            MathFunc::Arcsin => "arcsin",
            MathFunc::Arccos => "arccos",
            MathFunc::Arctan => "arctan",
            MathFunc::Sinh => "sinh",
            MathFunc::Cosh => "cosh",
            MathFunc::Tanh => "tanh",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expr {
    Real {
        value: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        units: Option<String>,
    },
    Int(i64),
    Bool(bool),
    Sym(String),
    Name(Name),
    Unary {
        op: UnaryOp,
        arg: Box<Expr>,
    },
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    /// Relational comparison. At the top of a relation this is the
    /// relation's operator.
    Compare {
        op: RelOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Logical {
        op: LogicalOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Func {
        func: MathFunc,
        arg: Box<Expr>,
    },
    /// `SUM(t1, t2, ...)`; a term naming an array sums all of its elements.
    Sum(Vec<Expr>),
    /// `SUM(body | index IN set)`
    SumOver {
        index: String,
        set: SetExpr,
        body: Box<Expr>,
    },
    Card(SetExpr),
    Satisfied {
        name: Name,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tolerance: Option<f64>,
    },
    Set(SetExpr),
}

impl Expr {
    pub fn real(value: f64) -> Self {
        Expr::Real { value, units: None }
    }

    pub fn real_units(value: f64, units: impl Into<String>) -> Self {
        Expr::Real {
            value,
            units: Some(units.into()),
        }
    }

    pub fn sym(s: impl Into<String>) -> Self {
        Expr::Sym(s.into())
    }

    /// Reference to a simple or dotted name, e.g. `"x"` or `"feed.T"`.
    pub fn name(dotted: &str) -> Self {
        Expr::Name(Name::path(dotted))
    }

    pub fn compare(self, op: RelOp, rhs: Expr) -> Self {
        Expr::Compare {
            op,
            lhs: Box::new(self),
            rhs: Box::new(rhs),
        }
    }

    pub fn equals(self, rhs: Expr) -> Self {
        self.compare(RelOp::Equal, rhs)
    }

    pub fn pow(self, rhs: Expr) -> Self {
        Expr::Binary {
            op: BinOp::Pow,
            lhs: Box::new(self),
            rhs: Box::new(rhs),
        }
    }

    pub fn logical(self, op: LogicalOp, rhs: Expr) -> Self {
        Expr::Logical {
            op,
            lhs: Box::new(self),
            rhs: Box::new(rhs),
        }
    }

    pub fn not(self) -> Self {
        Expr::Unary {
            op: UnaryOp::Not,
            arg: Box::new(self),
        }
    }

    pub fn call(func: MathFunc, arg: Expr) -> Self {
        Expr::Func {
            func,
            arg: Box::new(arg),
        }
    }

    /// Number of relational operators anywhere in the tree.
    pub fn relop_count(&self) -> usize {
        match self {
            Expr::Compare { lhs, rhs, .. } => 1 + lhs.relop_count() + rhs.relop_count(),
            Expr::Unary { arg, .. } | Expr::Func { arg, .. } => arg.relop_count(),
            Expr::Binary { lhs, rhs, .. } | Expr::Logical { lhs, rhs, .. } => {
                lhs.relop_count() + rhs.relop_count()
            }
            Expr::Sum(terms) => terms.iter().map(Expr::relop_count).sum(),
            Expr::SumOver { body, .. } => body.relop_count(),
            _ => 0,
        }
    }

    fn binary(op: BinOp, lhs: Expr, rhs: Expr) -> Self {
        Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }
}

impl From<Name> for Expr {
    fn from(name: Name) -> Self {
        Expr::Name(name)
    }
}

impl From<f64> for Expr {
    fn from(value: f64) -> Self {
        Expr::real(value)
    }
}

impl From<i64> for Expr {
    fn from(value: i64) -> Self {
        Expr::Int(value)
    }
}

impl Add for Expr {
    type Output = Expr;
    fn add(self, rhs: Expr) -> Expr {
        Expr::binary(BinOp::Add, self, rhs)
    }
}

impl Sub for Expr {
    type Output = Expr;
    fn sub(self, rhs: Expr) -> Expr {
        Expr::binary(BinOp::Sub, self, rhs)
    }
}

impl Mul for Expr {
    type Output = Expr;
    fn mul(self, rhs: Expr) -> Expr {
        Expr::binary(BinOp::Mul, self, rhs)
    }
}

impl Div for Expr {
    type Output = Expr;
    fn div(self, rhs: Expr) -> Expr {
        Expr::binary(BinOp::Div, self, rhs)
    }
}

impl Neg for Expr {
    type Output = Expr;
    fn neg(self) -> Expr {
        Expr::Unary {
            op: UnaryOp::Neg,
            arg: Box::new(self),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Real { value, units } => match units {
                Some(u) => write!(f, "{} {{{}}}", value, u),
                None => write!(f, "{}", value),
            },
            Expr::Int(i) => write!(f, "{}", i),
            Expr::Bool(b) => write!(f, "{}", if *b { "TRUE" } else { "FALSE" }),
            Expr::Sym(s) => write!(f, "'{}'", s),
            Expr::Name(n) => write!(f, "{}", n),
            Expr::Unary { op: UnaryOp::Neg, arg } => write!(f, "-{}", arg),
            Expr::Unary { op: UnaryOp::Not, arg } => write!(f, "NOT {}", arg),
            Expr::Binary { op, lhs, rhs } => write!(f, "({} {} {})", lhs, op.symbol(), rhs),
            Expr::Compare { op, lhs, rhs } => write!(f, "{} {} {}", lhs, op.symbol(), rhs),
            Expr::Logical { op, lhs, rhs } => write!(f, "({} {} {})", lhs, op.symbol(), rhs),
            Expr::Func { func, arg } => write!(f, "{}({})", func.name(), arg),
            Expr::Sum(terms) => {
                write!(f, "SUM[")?;
                for (i, t) in terms.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", t)?;
                }
                write!(f, "]")
            }
            Expr::SumOver { index, set, body } => {
                write!(f, "SUM[{} | {} IN [", body, index)?;
                fmt_set(f, set)?;
                write!(f, "]]")
            }
            Expr::Card(set) => {
                write!(f, "CARD[")?;
                fmt_set(f, set)?;
                write!(f, "]")
            }
            Expr::Satisfied { name, tolerance } => match tolerance {
                Some(t) => write!(f, "SATISFIED({}, {})", name, t),
                None => write!(f, "SATISFIED({})", name),
            },
            Expr::Set(set) => {
                write!(f, "[")?;
                fmt_set(f, set)?;
                write!(f, "]")
            }
        }
    }
}
