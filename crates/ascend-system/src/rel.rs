//! Solver view of a relation instance
//!
//! A [`RelRelation`] refers to its instance and to the system's variables by
//! index; it owns neither. While a system is alive it holds the relation
//! instance's interface slot, and gives the slot back on destruction only if
//! no later scan has claimed it since.

use ascend_compiler::evaluate::{relation_residual, relation_satisfied};
use ascend_compiler::{
    CompilerState, InstanceArena, InstanceId, InterfaceToken, RelationData, Value,
};
use ascend_core::RelOp;
use serde::Serialize;

use crate::error::SystemError;
use crate::flags::{RelFilter, RelFlags};
use crate::var::{part, VarVariable};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RelKind {
    Token,
    Blackbox,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelRelation {
    pub instance: InstanceId,
    pub kind: RelKind,
    op: RelOp,
    /// Indices into the system's variable list, one per occurrence.
    incidence: Vec<usize>,
    /// Position in the system's master relation list.
    pub mindex: usize,
    /// Position in the solver's own ordering; equal to `mindex` until a
    /// solver reorders.
    pub sindex: usize,
    pub model: usize,
    pub flags: RelFlags,
    residual: f64,
    multiplier: f64,
    nominal: f64,
}

/// `(less, equal, greater)` for a relational operator.
pub fn comparator(op: RelOp) -> (bool, bool, bool) {
    match op {
        RelOp::NotEqual => (true, false, true),
        RelOp::Less => (true, false, false),
        RelOp::LessEq => (true, true, false),
        RelOp::Equal => (false, true, false),
        RelOp::GreaterEq => (false, true, true),
        RelOp::Greater => (false, false, true),
    }
}

impl RelRelation {
    /// Wrap relation instance `instance`. Flags start as INCLUDED and
    /// ACTIVE plus whatever the relation's structure implies; the
    /// `included` part is read separately by [`RelRelation::included`].
    pub fn new(
        instance: InstanceId,
        data: &RelationData,
        incidence: Vec<usize>,
        mindex: usize,
        model: usize,
    ) -> Self {
        let mut flags = RelFlags::INCLUDED;
        flags.set(RelFlags::ACTIVE, !data.conditional);
        flags.set(RelFlags::EQUALITY, data.op == RelOp::Equal);
        flags.set(RelFlags::BLACKBOX, data.is_blackbox());
        flags.set(RelFlags::CONDITIONAL, data.conditional);
        Self {
            instance,
            kind: if data.is_blackbox() {
                RelKind::Blackbox
            } else {
                RelKind::Token
            },
            op: data.op,
            incidence,
            mindex,
            sindex: mindex,
            model,
            flags,
            residual: 0.0,
            multiplier: 0.0,
            nominal: 1.0,
        }
    }

    pub fn relop(&self) -> RelOp {
        self.op
    }

    pub fn less(&self) -> bool {
        comparator(self.op).0
    }

    pub fn equal(&self) -> bool {
        comparator(self.op).1
    }

    pub fn greater(&self) -> bool {
        comparator(self.op).2
    }

    pub fn incidence(&self) -> &[usize] {
        &self.incidence
    }

    pub fn n_incidences(&self) -> usize {
        self.incidence.len()
    }

    pub(crate) fn incidence_mut(&mut self) -> &mut Vec<usize> {
        &mut self.incidence
    }

    pub fn apply_filter(&self, filter: &RelFilter) -> bool {
        filter.apply(self.flags)
    }

    pub fn differential(&self) -> bool {
        self.flags.contains(RelFlags::DIFFERENTIAL)
    }

    /// Flag the relation DIFFERENTIAL when any incident variable is a
    /// derivative. Meaningful only after the derivative flags have been
    /// set on `vars`; before that it always answers false.
    pub fn classify_differential(&mut self, vars: &[VarVariable]) -> bool {
        let diff = self
            .incidence
            .iter()
            .any(|v| vars.get(*v).is_some_and(VarVariable::deriv));
        self.flags.set(RelFlags::DIFFERENTIAL, diff);
        diff
    }

    /// Read the `included` part and bring the INCLUDED flag in line with it.
    pub fn included(&mut self, state: &CompilerState) -> Result<bool, SystemError> {
        let id = part(state, self.instance, "included")
            .ok_or(SystemError::MissingPart(self.instance, "included"))?;
        let included = state.arena.instance(id)?.value.as_bool().unwrap_or(false);
        self.flags.set(RelFlags::INCLUDED, included);
        Ok(included)
    }

    pub fn set_included(
        &mut self,
        state: &mut CompilerState,
        included: bool,
    ) -> Result<(), SystemError> {
        let id = part(state, self.instance, "included")
            .ok_or(SystemError::MissingPart(self.instance, "included"))?;
        state.arena.instance_mut(id)?.value = Value::Bool(included);
        self.flags.set(RelFlags::INCLUDED, included);
        Ok(())
    }

    /// Evaluate `lhs - rhs` at the current variable values, caching the
    /// result and updating SATISFIED.
    pub fn calc_residual(
        &mut self,
        state: &CompilerState,
        tolerance: f64,
    ) -> Result<f64, SystemError> {
        let data = relation_data(&state.arena, self.instance)?;
        let residual = relation_residual(&state.arena, &state.externals, data)?;
        let satisfied = relation_satisfied(&state.arena, &state.externals, data, tolerance)?;
        self.residual = residual;
        self.flags.set(RelFlags::SATISFIED, satisfied);
        Ok(residual)
    }

    /// Residual from the last evaluation.
    pub fn residual(&self) -> f64 {
        self.residual
    }

    pub fn set_residual(&mut self, residual: f64) {
        self.residual = residual;
    }

    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    pub fn set_multiplier(&mut self, multiplier: f64) {
        self.multiplier = multiplier;
    }

    pub fn nominal(&self) -> f64 {
        self.nominal
    }

    pub fn set_nominal(&mut self, nominal: f64) {
        self.nominal = nominal;
    }

    /// Give the interface slot back if `token` still holds it. Returns
    /// whether the slot was cleared.
    pub fn release(&self, arena: &mut InstanceArena, token: InterfaceToken) -> bool {
        arena.clear_interface_if(self.instance, token)
    }
}

pub(crate) fn relation_data(
    arena: &InstanceArena,
    id: InstanceId,
) -> Result<&RelationData, SystemError> {
    arena
        .instance(id)?
        .relation
        .as_ref()
        .ok_or(SystemError::NotARelation(id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ascend_compiler::{RelationForm, Term};
    use pretty_assertions::assert_eq;

    fn data(op: RelOp) -> RelationData {
        RelationData {
            op,
            form: RelationForm::Token {
                lhs: Term::Num(0.0),
                rhs: Term::Num(0.0),
            },
            conditional: false,
        }
    }

    fn rel(op: RelOp) -> RelRelation {
        let mut arena = InstanceArena::new();
        let id = arena.alloc(ascend_compiler::Instance::new(
            ascend_compiler::InstanceKind::Relation,
            std::sync::Arc::new(ascend_core::TypeDescription::new(
                "relation",
                ascend_core::BaseKind::Relation,
            )),
        ));
        RelRelation::new(id, &data(op), vec![0, 1, 0], 0, 0)
    }

    #[test]
    fn test_comparator_table() {
        let table = [
            (RelOp::NotEqual, (true, false, true)),
            (RelOp::Less, (true, false, false)),
            (RelOp::LessEq, (true, true, false)),
            (RelOp::Equal, (false, true, false)),
            (RelOp::GreaterEq, (false, true, true)),
            (RelOp::Greater, (false, false, true)),
        ];
        for (op, expected) in table {
            let r = rel(op);
            assert_eq!((r.less(), r.equal(), r.greater()), expected, "{}", op.symbol());
        }
    }

    #[test]
    fn test_initial_flags() {
        let r = rel(RelOp::Equal);
        assert!(r.flags.contains(RelFlags::INCLUDED | RelFlags::ACTIVE | RelFlags::EQUALITY));
        assert!(!r.flags.contains(RelFlags::BLACKBOX));
        assert_eq!(r.kind, RelKind::Token);
        assert!(!rel(RelOp::Less).flags.contains(RelFlags::EQUALITY));
    }

    #[test]
    fn test_classify_differential_needs_deriv_flags() {
        let mut r = rel(RelOp::Equal);
        let id = r.instance;
        let mut vars = vec![VarVariable::new(id, 0, 0), VarVariable::new(id, 1, 0)];
        assert!(!r.classify_differential(&vars));

        vars[1].flags.insert(crate::flags::VarFlags::DERIV);
        assert!(r.classify_differential(&vars));
        assert!(r.differential());
        assert_eq!(r.n_incidences(), 3);
    }
}
