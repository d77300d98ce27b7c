//! Scanning a simulation into solver-facing variable and relation lists

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use ascend_compiler::evaluate::DEFAULT_SATISFIED_TOLERANCE;
use ascend_compiler::{
    CompilerContext, CompilerState, InstanceId, InstanceKind, InterfaceToken, RelocationListener,
};
use ascend_core::BitList;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::SystemError;
use crate::flags::{RelFilter, RelFlags, VarFilter, VarFlags};
use crate::rel::{relation_data, RelRelation};
use crate::var::VarVariable;

static NEXT_SYSTEM: AtomicU64 = AtomicU64::new(1);

/// Variables, relations and models reachable from one root instance.
#[derive(Debug)]
pub struct SlvSystem {
    id: u64,
    root: InstanceId,
    vars: Vec<VarVariable>,
    rels: Vec<RelRelation>,
    models: Vec<InstanceId>,
    var_index: HashMap<InstanceId, usize>,
    rel_index: HashMap<InstanceId, usize>,
}

/// Compressed sparse rows: row `r` holds the distinct variable indices of
/// relation `rows[r]`, ascending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IncidenceMatrix {
    pub rows: Vec<usize>,
    pub n_cols: usize,
    pub row_ptr: Vec<usize>,
    pub col_idx: Vec<usize>,
}

impl IncidenceMatrix {
    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn nnz(&self) -> usize {
        self.col_idx.len()
    }

    pub fn row(&self, r: usize) -> &[usize] {
        match (self.row_ptr.get(r), self.row_ptr.get(r + 1)) {
            (Some(start), Some(end)) => &self.col_idx[*start..*end],
            _ => &[],
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SystemStats {
    pub models: usize,
    pub vars: usize,
    pub incident_vars: usize,
    pub fixed_vars: usize,
    pub rels: usize,
    pub included_rels: usize,
    pub equalities: usize,
    pub blackbox_rels: usize,
    pub differential_rels: usize,
    pub nonzeros: usize,
}

impl SlvSystem {
    /// Scan the tree under `root` depth first, in child order.
    ///
    /// Every non-constant real atom becomes a variable and every relation
    /// instance a relation; atoms and relations are not descended into.
    /// Incidence keeps repeated occurrences. Each relation instance's
    /// interface slot is claimed for this system, superseding any earlier
    /// claim.
    pub fn build(ctx: &mut CompilerContext, root: InstanceId) -> Result<Self, SystemError> {
        let state = ctx.state_mut()?;
        let root = state
            .arena
            .resolve(root)
            .ok_or(ascend_compiler::CompileError::StaleHandle(root))?;
        if !matches!(
            state.arena.instance(root)?.kind,
            InstanceKind::Model | InstanceKind::Simulation
        ) {
            return Err(SystemError::BadRoot(root));
        }

        let mut system = Self {
            id: NEXT_SYSTEM.fetch_add(1, Ordering::Relaxed),
            root,
            vars: Vec::new(),
            rels: Vec::new(),
            models: Vec::new(),
            var_index: HashMap::new(),
            rel_index: HashMap::new(),
        };

        let mut visited = BitList::new(state.arena.capacity());
        let mut pending_rels = Vec::new();
        let mut stack = vec![(root, 0usize)];
        while let Some((id, model)) = stack.pop() {
            let Some(id) = state.arena.resolve(id) else { continue };
            if visited.read(id.index())? {
                continue;
            }
            visited.set(id.index())?;
            let inst = state.arena.instance(id)?;
            let model = match inst.kind {
                InstanceKind::Model | InstanceKind::Simulation => {
                    system.models.push(id);
                    system.models.len() - 1
                }
                InstanceKind::Real if !inst.is_constant() => {
                    system.add_var(id, model);
                    continue;
                }
                InstanceKind::Relation => {
                    pending_rels.push((id, model));
                    continue;
                }
                k if k.is_atom() => continue,
                _ => model,
            };
            stack.extend(inst.children.values().rev().map(|c| (*c, model)));
        }

        for (id, model) in pending_rels {
            system.add_rel(state, id, model)?;
        }
        for var in &mut system.vars {
            var.fixed(state)?;
        }
        for rel in &mut system.rels {
            rel.included(state)?;
        }
        info!(
            "Built system {} with {} variable(s), {} relation(s), {} model(s)",
            system.id,
            system.vars.len(),
            system.rels.len(),
            system.models.len()
        );
        Ok(system)
    }

    /// Scan the model of simulation `sim`.
    pub fn for_simulation(ctx: &mut CompilerContext, sim: &str) -> Result<Self, SystemError> {
        let model = ctx.simulation(sim)?.model;
        Self::build(ctx, model)
    }

    fn add_var(&mut self, id: InstanceId, model: usize) -> usize {
        if let Some(index) = self.var_index.get(&id) {
            return *index;
        }
        let index = self.vars.len();
        self.vars.push(VarVariable::new(id, index, model));
        self.var_index.insert(id, index);
        index
    }

    fn add_rel(
        &mut self,
        state: &mut CompilerState,
        id: InstanceId,
        model: usize,
    ) -> Result<(), SystemError> {
        let data = relation_data(&state.arena, id)?.clone();
        let mut incidence = Vec::new();
        for var in data.incidence() {
            let var = state.arena.resolve(var).unwrap_or(var);
            // Variables passed in from outside the root still belong to
            // the system.
            let index = self.add_var(var, model);
            self.vars[index].flags.insert(VarFlags::INCIDENT);
            incidence.push(index);
        }
        let index = self.rels.len();
        let token = self.token(index);
        if let Some(previous) = state.arena.set_interface(id, token)? {
            if previous.owner != self.id {
                warn!(
                    "Relation {} was claimed by system {}; system {} takes it over",
                    id, previous.owner, self.id
                );
            }
        }
        debug!("Relation {} has {} incidence(s)", id, incidence.len());
        self.rels.push(RelRelation::new(id, &data, incidence, index, model));
        self.rel_index.insert(id, index);
        Ok(())
    }

    fn token(&self, index: usize) -> InterfaceToken {
        InterfaceToken {
            owner: self.id,
            index: index as u32,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn root(&self) -> InstanceId {
        self.root
    }

    pub fn vars(&self) -> &[VarVariable] {
        &self.vars
    }

    pub fn vars_mut(&mut self) -> &mut [VarVariable] {
        &mut self.vars
    }

    pub fn rels(&self) -> &[RelRelation] {
        &self.rels
    }

    pub fn rels_mut(&mut self) -> &mut [RelRelation] {
        &mut self.rels
    }

    pub fn models(&self) -> &[InstanceId] {
        &self.models
    }

    pub fn var_of(&self, id: InstanceId) -> Option<&VarVariable> {
        self.var_index.get(&id).map(|i| &self.vars[*i])
    }

    pub fn rel_of(&self, id: InstanceId) -> Option<&RelRelation> {
        self.rel_index.get(&id).map(|i| &self.rels[*i])
    }

    pub fn rel_of_mut(&mut self, id: InstanceId) -> Option<&mut RelRelation> {
        self.rel_index.get(&id).map(|i| &mut self.rels[*i])
    }

    /// Include or exclude the relation instance `id`, writing through to its
    /// `included` part.
    pub fn set_rel_included(
        &mut self,
        ctx: &mut CompilerContext,
        id: InstanceId,
        included: bool,
    ) -> Result<(), SystemError> {
        let state = ctx.state_mut()?;
        let id = state.arena.resolve(id).unwrap_or(id);
        let index = *self.rel_index.get(&id).ok_or(SystemError::UnknownRelation(id))?;
        self.rels[index].set_included(state, included)
    }

    /// Set DERIV and INDEP from each variable's `ode_type` part. Returns the
    /// number of derivatives found. Run this before
    /// [`SlvSystem::classify_differential`].
    pub fn analyse_derivatives(&mut self, state: &CompilerState) -> Result<usize, SystemError> {
        let mut derivs = 0;
        for var in &mut self.vars {
            let ode_type = var.ode_type(state)?;
            var.flags.set(VarFlags::DERIV, ode_type >= 2);
            var.flags.set(VarFlags::INDEP, ode_type == -1);
            if ode_type >= 2 {
                derivs += 1;
            }
        }
        debug!("System {}: {} derivative variable(s)", self.id, derivs);
        Ok(derivs)
    }

    /// Classify every relation; returns how many are differential.
    pub fn classify_differential(&mut self) -> usize {
        let vars = &self.vars;
        self.rels
            .iter_mut()
            .map(|r| r.classify_differential(vars))
            .filter(|d| *d)
            .count()
    }

    pub fn count_rels(&self, filter: &RelFilter) -> usize {
        self.rels.iter().filter(|r| r.apply_filter(filter)).count()
    }

    /// Master indices of the relations passing `filter`.
    pub fn rels_matching(&self, filter: &RelFilter) -> Vec<usize> {
        self.rels
            .iter()
            .filter(|r| r.apply_filter(filter))
            .map(|r| r.mindex)
            .collect()
    }

    /// One bit per relation, set where `filter` matches.
    pub fn rel_bitlist(&self, filter: &RelFilter) -> Result<BitList, SystemError> {
        let mut bits = BitList::new(self.rels.len());
        for (i, rel) in self.rels.iter().enumerate() {
            bits.set_if(i, rel.apply_filter(filter))?;
        }
        Ok(bits)
    }

    pub fn count_vars(&self, filter: &VarFilter) -> usize {
        self.vars.iter().filter(|v| v.apply_filter(filter)).count()
    }

    pub fn vars_matching(&self, filter: &VarFilter) -> Vec<usize> {
        self.vars
            .iter()
            .filter(|v| v.apply_filter(filter))
            .map(|v| v.mindex)
            .collect()
    }

    pub fn var_bitlist(&self, filter: &VarFilter) -> Result<BitList, SystemError> {
        let mut bits = BitList::new(self.vars.len());
        for (i, var) in self.vars.iter().enumerate() {
            bits.set_if(i, var.apply_filter(filter))?;
        }
        Ok(bits)
    }

    /// Residuals of the relations passing `filter`, in master order.
    pub fn residuals(
        &mut self,
        state: &CompilerState,
        filter: &RelFilter,
    ) -> Result<Vec<f64>, SystemError> {
        let mut out = Vec::new();
        for rel in self.rels.iter_mut().filter(|r| r.apply_filter(filter)) {
            out.push(rel.calc_residual(state, DEFAULT_SATISFIED_TOLERANCE)?);
        }
        Ok(out)
    }

    /// Incidence of the relations passing `filter` with repeated variables
    /// collapsed.
    pub fn incidence_matrix(&self, filter: &RelFilter) -> IncidenceMatrix {
        let mut matrix = IncidenceMatrix {
            rows: Vec::new(),
            n_cols: self.vars.len(),
            row_ptr: vec![0],
            col_idx: Vec::new(),
        };
        for rel in self.rels.iter().filter(|r| r.apply_filter(filter)) {
            let mut cols = rel.incidence().to_vec();
            cols.sort_unstable();
            cols.dedup();
            matrix.col_idx.extend(cols);
            matrix.row_ptr.push(matrix.col_idx.len());
            matrix.rows.push(rel.mindex);
        }
        matrix
    }

    pub fn stats(&self) -> SystemStats {
        let count = |flag: RelFlags| self.rels.iter().filter(|r| r.flags.contains(flag)).count();
        SystemStats {
            models: self.models.len(),
            vars: self.vars.len(),
            incident_vars: self.vars.iter().filter(|v| v.incident()).count(),
            fixed_vars: self.vars.iter().filter(|v| v.flags.contains(VarFlags::FIXED)).count(),
            rels: self.rels.len(),
            included_rels: count(RelFlags::INCLUDED),
            equalities: count(RelFlags::EQUALITY),
            blackbox_rels: count(RelFlags::BLACKBOX),
            differential_rels: count(RelFlags::DIFFERENTIAL),
            nonzeros: self.incidence_matrix(&RelFilter::all()).nnz(),
        }
    }

    /// Deliver merges queued by the arena since the scan.
    pub fn sync_relocations(&mut self, ctx: &mut CompilerContext) -> Result<(), SystemError> {
        ctx.state_mut()?.arena.notify(self);
        Ok(())
    }

    /// Release the interface slots this system still holds. Returns the
    /// number released; slots claimed by a later scan are left alone.
    pub fn destroy(self, ctx: &mut CompilerContext) -> Result<usize, SystemError> {
        let state = ctx.state_mut()?;
        let mut released = 0;
        for (index, rel) in self.rels.iter().enumerate() {
            if rel.release(&mut state.arena, self.token(index)) {
                released += 1;
            }
        }
        info!("Destroyed system {} ({} relation slot(s) released)", self.id, released);
        Ok(released)
    }
}

impl RelocationListener for SlvSystem {
    fn relocated(&mut self, from: InstanceId, to: InstanceId) {
        if let Some(old) = self.var_index.remove(&from) {
            match self.var_index.get(&to).copied() {
                Some(survivor) => {
                    // Both sides were scanned: point incidence at the
                    // survivor and retire the merged variable.
                    for rel in &mut self.rels {
                        for v in rel.incidence_mut().iter_mut().filter(|v| **v == old) {
                            *v = survivor;
                        }
                    }
                    self.vars[old].flags.remove(VarFlags::ACTIVE | VarFlags::INCIDENT);
                    self.vars[survivor].flags.insert(VarFlags::INCIDENT);
                }
                None => {
                    self.vars[old].instance = to;
                    self.var_index.insert(to, old);
                }
            }
        }
        if let Some(index) = self.rel_index.remove(&from) {
            self.rels[index].instance = to;
            self.rel_index.insert(to, index);
        }
    }
}
