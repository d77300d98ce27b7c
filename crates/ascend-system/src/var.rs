//! Solver view of a real (or integer) variable instance

use ascend_compiler::{ChildKey, CompilerState, InstanceId, Value};
use serde::Serialize;

use crate::error::SystemError;
use crate::flags::{VarFilter, VarFlags};

/// Child instance `name` of `id`, if the instance has one.
pub(crate) fn part(state: &CompilerState, id: InstanceId, name: &str) -> Option<InstanceId> {
    let key = ChildKey::Name(state.symbols.find(name)?);
    state.arena.child(id, &key)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VarVariable {
    pub instance: InstanceId,
    /// Position in the system's master variable list.
    pub mindex: usize,
    /// Position in the solver's own ordering; equal to `mindex` until a
    /// solver reorders.
    pub sindex: usize,
    /// Index of the model the variable was found in.
    pub model: usize,
    pub flags: VarFlags,
}

impl VarVariable {
    pub fn new(instance: InstanceId, mindex: usize, model: usize) -> Self {
        Self {
            instance,
            mindex,
            sindex: mindex,
            model,
            flags: VarFlags::ACTIVE,
        }
    }

    pub fn apply_filter(&self, filter: &VarFilter) -> bool {
        filter.apply(self.flags)
    }

    pub fn incident(&self) -> bool {
        self.flags.contains(VarFlags::INCIDENT)
    }

    pub fn deriv(&self) -> bool {
        self.flags.contains(VarFlags::DERIV)
    }

    pub fn indep(&self) -> bool {
        self.flags.contains(VarFlags::INDEP)
    }

    pub fn value(&self, state: &CompilerState) -> Result<f64, SystemError> {
        let inst = state.arena.instance(self.instance)?;
        inst.value
            .as_f64()
            .ok_or(SystemError::MissingPart(self.instance, "value"))
    }

    pub fn set_value(&self, state: &mut CompilerState, value: f64) -> Result<(), SystemError> {
        let inst = state.arena.instance_mut(self.instance)?;
        inst.value = match inst.value {
            Value::Int(_) => Value::Int(value.round() as i64),
            _ => Value::Real(value),
        };
        inst.defaulted = false;
        Ok(())
    }

    /// Read the `fixed` part and bring the FIXED flag in line with it.
    /// Variables without a `fixed` part are free.
    pub fn fixed(&mut self, state: &CompilerState) -> Result<bool, SystemError> {
        let fixed = match part(state, self.instance, "fixed") {
            Some(id) => state.arena.instance(id)?.value.as_bool().unwrap_or(false),
            None => false,
        };
        self.flags.set(VarFlags::FIXED, fixed);
        Ok(fixed)
    }

    pub fn set_fixed(&mut self, state: &mut CompilerState, fixed: bool) -> Result<(), SystemError> {
        let id = part(state, self.instance, "fixed")
            .ok_or(SystemError::MissingPart(self.instance, "fixed"))?;
        state.arena.instance_mut(id)?.value = Value::Bool(fixed);
        self.flags.set(VarFlags::FIXED, fixed);
        Ok(())
    }

    /// `ode_type` part: 0 algebraic, 1 state, 2 or more a derivative, -1 the
    /// independent variable.
    pub fn ode_type(&self, state: &CompilerState) -> Result<i64, SystemError> {
        match part(state, self.instance, "ode_type") {
            Some(id) => Ok(state.arena.instance(id)?.value.as_int().unwrap_or(0)),
            None => Ok(0),
        }
    }

    fn real_part(&self, state: &CompilerState, name: &'static str) -> Result<f64, SystemError> {
        let id = part(state, self.instance, name)
            .ok_or(SystemError::MissingPart(self.instance, name))?;
        state.arena
            .instance(id)?
            .value
            .as_f64()
            .ok_or(SystemError::MissingPart(self.instance, name))
    }

    pub fn lower_bound(&self, state: &CompilerState) -> Result<f64, SystemError> {
        self.real_part(state, "lower_bound")
    }

    pub fn upper_bound(&self, state: &CompilerState) -> Result<f64, SystemError> {
        self.real_part(state, "upper_bound")
    }

    pub fn nominal(&self, state: &CompilerState) -> Result<f64, SystemError> {
        self.real_part(state, "nominal")
    }
}
