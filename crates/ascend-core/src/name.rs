//! Qualified names such as `a.b[i][1..3]`

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::expr::Expr;

/// One element of a set expression: a single value or an integer range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SetItem {
    Single(Expr),
    Range(Expr, Expr),
}

/// Comma separated list of set items, as written inside `[...]`.
pub type SetExpr = Vec<SetItem>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NamePart {
    Id(String),
    Subscript(SetExpr),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Name {
    pub parts: Vec<NamePart>,
}

impl Name {
    pub fn id(id: impl Into<String>) -> Self {
        Self {
            parts: vec![NamePart::Id(id.into())],
        }
    }

    /// Append `.id`.
    pub fn dot(mut self, id: impl Into<String>) -> Self {
        self.parts.push(NamePart::Id(id.into()));
        self
    }

    /// Append `[expr]`.
    pub fn sub(mut self, index: Expr) -> Self {
        self.parts.push(NamePart::Subscript(vec![SetItem::Single(index)]));
        self
    }

    /// Append `[lo..hi]`.
    pub fn sub_range(mut self, lo: Expr, hi: Expr) -> Self {
        self.parts.push(NamePart::Subscript(vec![SetItem::Range(lo, hi)]));
        self
    }

    /// Append an arbitrary subscript set.
    pub fn sub_set(mut self, set: SetExpr) -> Self {
        self.parts.push(NamePart::Subscript(set));
        self
    }

    /// Parse a dotted name with no subscripts, e.g. `feed.T`.
    pub fn path(dotted: &str) -> Self {
        Self {
            parts: dotted
                .split('.')
                .map(|p| NamePart::Id(p.to_string()))
                .collect(),
        }
    }

    /// A name is compound when it crosses a `.`, i.e. holds more than one
    /// identifier part.
    pub fn is_compound(&self) -> bool {
        self.parts
            .iter()
            .filter(|p| matches!(p, NamePart::Id(_)))
            .count()
            > 1
    }

    /// The plain identifier when the name is exactly one id with no subscripts.
    pub fn simple_id(&self) -> Option<&str> {
        match self.parts.as_slice() {
            [NamePart::Id(id)] => Some(id),
            _ => None,
        }
    }

    /// The leading identifier.
    pub fn base_id(&self) -> Option<&str> {
        match self.parts.first() {
            Some(NamePart::Id(id)) => Some(id),
            _ => None,
        }
    }

    pub fn has_subscripts(&self) -> bool {
        self.parts
            .iter()
            .any(|p| matches!(p, NamePart::Subscript(_)))
    }

    /// The last subscript, if the name ends in one.
    pub fn last_subscript(&self) -> Option<&SetExpr> {
        match self.parts.last() {
            Some(NamePart::Subscript(set)) => Some(set),
            _ => None,
        }
    }
}

impl fmt::Display for SetItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SetItem::Single(e) => write!(f, "{}", e),
            SetItem::Range(lo, hi) => write!(f, "{}..{}", lo, hi),
        }
    }
}

pub(crate) fn fmt_set(f: &mut fmt::Formatter<'_>, set: &[SetItem]) -> fmt::Result {
    for (i, item) in set.iter().enumerate() {
        if i > 0 {
            write!(f, ",")?;
        }
        write!(f, "{}", item)?;
    }
    Ok(())
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, part) in self.parts.iter().enumerate() {
            match part {
                NamePart::Id(id) => {
                    if i > 0 {
                        write!(f, ".")?;
                    }
                    write!(f, "{}", id)?;
                }
                NamePart::Subscript(set) => {
                    write!(f, "[")?;
                    fmt_set(f, set)?;
                    write!(f, "]")?;
                }
            }
        }
        Ok(())
    }
}
