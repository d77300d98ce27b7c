//! Builder for type descriptions, used by library loaders and tests

use crate::expr::Expr;
use crate::name::Name;
use crate::statement::Statement;
use crate::types::{AtomSpec, BaseKind, Literal, Method, Note, TypeDescription, ValueType};

pub struct TypeBuilder {
    desc: TypeDescription,
}

impl TypeBuilder {
    pub fn new(name: impl Into<String>, kind: BaseKind) -> Self {
        Self {
            desc: TypeDescription::new(name, kind),
        }
    }

    pub fn model(name: impl Into<String>) -> Self {
        Self::new(name, BaseKind::Model)
    }

    /// An atom of the given value type with an optional default.
    pub fn atom(name: impl Into<String>, value_type: ValueType) -> Self {
        let mut builder = Self::new(name, BaseKind::Atom);
        builder.desc.atom = Some(AtomSpec {
            value_type,
            default: None,
            units: None,
        });
        builder
    }

    pub fn constant(name: impl Into<String>, value_type: ValueType) -> Self {
        let mut builder = Self::new(name, BaseKind::Constant);
        builder.desc.atom = Some(AtomSpec {
            value_type,
            default: None,
            units: None,
        });
        builder
    }

    pub fn refines(mut self, parent: impl Into<String>) -> Self {
        self.desc.refines = Some(parent.into());
        self
    }

    pub fn default_value(mut self, value: Literal) -> Self {
        if let Some(atom) = self.desc.atom.as_mut() {
            atom.default = Some(value);
        }
        self
    }

    pub fn units(mut self, units: impl Into<String>) -> Self {
        if let Some(atom) = self.desc.atom.as_mut() {
            atom.units = Some(units.into());
        }
        self
    }

    pub fn param(mut self, stmt: Statement) -> Self {
        self.desc.parameters.push(stmt);
        self
    }

    pub fn where_clause(mut self, stmt: Statement) -> Self {
        self.desc.where_clauses.push(stmt);
        self
    }

    pub fn reduce(mut self, target: &str, value: Expr) -> Self {
        self.desc
            .reductions
            .push(Statement::const_assign(Name::id(target), value));
        self
    }

    pub fn statement(mut self, stmt: Statement) -> Self {
        self.desc.body.push(stmt);
        self
    }

    pub fn statements(mut self, stmts: impl IntoIterator<Item = Statement>) -> Self {
        self.desc.body.extend(stmts);
        self
    }

    pub fn is_a(self, names: &[&str], type_name: &str) -> Self {
        self.statement(Statement::is_a(names, type_name))
    }

    pub fn relation(self, name: &str, expr: Expr) -> Self {
        self.statement(Statement::relation(Some(name), expr))
    }

    pub fn method(mut self, name: impl Into<String>, body: Vec<Statement>) -> Self {
        self.desc.methods.push(Method {
            name: name.into(),
            body,
        });
        self
    }

    pub fn note(mut self, part: Option<&str>, text: impl Into<String>) -> Self {
        self.desc.notes.push(Note {
            part: part.map(str::to_string),
            lang: "inline".to_string(),
            text: text.into(),
        });
        self
    }

    pub fn universal(mut self) -> Self {
        self.desc.universal = true;
        self
    }

    pub fn build(self) -> TypeDescription {
        self.desc
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_builder() {
        let desc = TypeBuilder::atom("temperature", ValueType::Real)
            .refines("solver_var")
            .default_value(Literal::Real(298.15))
            .units("K")
            .note(None, "absolute temperature")
            .build();
        assert_eq!(desc.kind, BaseKind::Atom);
        assert_eq!(desc.refines.as_deref(), Some("solver_var"));
        let atom = desc.atom.unwrap();
        assert_eq!(atom.units.as_deref(), Some("K"));
        assert_eq!(atom.default, Some(Literal::Real(298.15)));
        assert_eq!(desc.notes.len(), 1);
    }

    #[test]
    fn test_model_builder_keeps_order() {
        let desc = TypeBuilder::model("pair")
            .is_a(&["a", "b"], "real")
            .relation("r1", Expr::name("a").equals(Expr::name("b")))
            .method("on_load", vec![])
            .build();
        assert_eq!(desc.body.len(), 2);
        assert_eq!(desc.body[0].keyword(), "IS_A");
        assert_eq!(desc.body[1].keyword(), "relation");
        assert!(desc.method("ON_LOAD").is_some());
    }
}
