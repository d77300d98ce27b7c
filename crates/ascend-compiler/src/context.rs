//! Compiler lifecycle
//!
//! A [`CompilerContext`] owns everything the compiler needs between `init`
//! and `destroy`: symbols, units, external functions, the type library, the
//! instance arena and the simulations built in it. Nothing is global; two
//! contexts never share state.

use std::path::Path;
use std::sync::Arc;

use ascend_core::{
    fundamental_types, BaseKind, Diagnostic, LibraryDocument, Name, Reporter, SymbolTable,
    TypeDescription, TypeLibrary,
};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{CompilerConfig, InstantiationPolicy};
use crate::error::CompileError;
use crate::evaluate::{EvalMode, Evaluator, Scope};
use crate::extfunc::ExternalLibrary;
use crate::instance::{ChildKey, Instance, InstanceArena, InstanceId, InstanceKind};
use crate::instantiate::Instantiator;
use crate::method::{MethodRunner, ProcStatus};
use crate::simulation::{self, Simulation, SimulationRegistry};
use crate::typelint::Linter;
use crate::units::UnitsTable;
use crate::value::Value;

/// Setup steps in the order `init` performs them. `destroy` undoes them in
/// reverse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum InitStage {
    Symbols,
    Units,
    Externals,
    Library,
    FundamentalTypes,
    Instances,
    Simulations,
}

/// Everything owned by an initialized compiler.
#[derive(Debug)]
pub struct CompilerState {
    pub config: CompilerConfig,
    pub symbols: SymbolTable,
    pub units: UnitsTable,
    pub externals: ExternalLibrary,
    pub library: TypeLibrary,
    pub arena: InstanceArena,
    pub simulations: SimulationRegistry,
    stages: Vec<InitStage>,
}

impl CompilerState {
    fn new(config: CompilerConfig) -> Result<Self, CompileError> {
        let mut stages = Vec::new();
        let symbols = SymbolTable::new();
        stages.push(InitStage::Symbols);
        let units = UnitsTable::new();
        stages.push(InitStage::Units);
        let externals = ExternalLibrary::new();
        stages.push(InitStage::Externals);
        let mut library = TypeLibrary::new();
        stages.push(InitStage::Library);
        for desc in fundamental_types() {
            library.add(desc)?;
        }
        stages.push(InitStage::FundamentalTypes);
        let arena = InstanceArena::new();
        stages.push(InitStage::Instances);
        let simulations = SimulationRegistry::new();
        stages.push(InitStage::Simulations);

        Ok(Self {
            config,
            symbols,
            units,
            externals,
            library,
            arena,
            simulations,
            stages,
        })
    }

    fn teardown(mut self) {
        // Larger structures go before the pieces they are built from.
        while let Some(stage) = self.stages.pop() {
            match stage {
                InitStage::Simulations => {
                    for sim in self.simulations.drain() {
                        let freed = self.arena.destroy_tree(sim.root);
                        debug!("Destroyed simulation '{}' ({} instances)", sim.name, freed);
                    }
                }
                InitStage::Instances => {
                    if self.arena.live_count() > 0 {
                        warn!("{} instance(s) outlived their simulations", self.arena.live_count());
                    }
                    self.arena.clear();
                }
                InitStage::FundamentalTypes | InitStage::Library => self.library.clear(),
                InitStage::Externals => self.externals.clear(),
                InitStage::Units => self.units.clear(),
                InitStage::Symbols => self.symbols.clear(),
            }
            debug!("Tore down {:?}", stage);
        }
    }
}

/// Format of a serialized type library.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LibraryFormat {
    Json,
    Yaml,
}

impl LibraryFormat {
    /// `.yaml`/`.yml` files are YAML, anything else JSON.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => LibraryFormat::Yaml,
            _ => LibraryFormat::Json,
        }
    }
}

/// Result of running a method.
#[derive(Debug, Clone, Serialize)]
pub struct MethodReport {
    pub status: ProcStatus,
    pub diagnostics: Vec<Diagnostic>,
}

/// The compiler. Starts uninitialized; `init` and `destroy` must alternate.
#[derive(Debug, Default)]
pub struct CompilerContext {
    state: Option<CompilerState>,
    cycles: usize,
}

impl CompilerContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// A context that is already initialized with `config`.
    pub fn with_config(config: CompilerConfig) -> Result<Self, CompileError> {
        let mut ctx = Self::new();
        ctx.init(config)?;
        Ok(ctx)
    }

    pub fn init(&mut self, config: CompilerConfig) -> Result<(), CompileError> {
        if self.state.is_some() {
            return Err(CompileError::AlreadyInitialized);
        }
        info!(
            "Initializing compiler (simplify_relations={}, policy={:?})",
            config.simplify_relations, config.policy
        );
        self.state = Some(CompilerState::new(config)?);
        self.cycles += 1;
        Ok(())
    }

    pub fn destroy(&mut self) -> Result<(), CompileError> {
        let state = self.state.take().ok_or(CompileError::NotInitialized)?;
        info!("Destroying compiler ({} simulation(s))", state.simulations.len());
        state.teardown();
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.state.is_some()
    }

    /// Number of `init` calls that succeeded.
    pub fn init_count(&self) -> usize {
        self.cycles
    }

    /// Setup steps completed by the current `init`.
    pub fn stages(&self) -> &[InitStage] {
        self.state.as_ref().map(|s| s.stages.as_slice()).unwrap_or(&[])
    }

    pub fn state(&self) -> Result<&CompilerState, CompileError> {
        self.state.as_ref().ok_or(CompileError::NotInitialized)
    }

    pub fn state_mut(&mut self) -> Result<&mut CompilerState, CompileError> {
        self.state.as_mut().ok_or(CompileError::NotInitialized)
    }

    pub fn config(&self) -> Result<&CompilerConfig, CompileError> {
        Ok(&self.state()?.config)
    }

    pub fn library(&self) -> Result<&TypeLibrary, CompileError> {
        Ok(&self.state()?.library)
    }

    pub fn externals_mut(&mut self) -> Result<&mut ExternalLibrary, CompileError> {
        Ok(&mut self.state_mut()?.externals)
    }

    // Library

    pub fn add_type(
        &mut self,
        desc: TypeDescription,
    ) -> Result<Arc<TypeDescription>, CompileError> {
        Ok(self.state_mut()?.library.add(desc)?)
    }

    /// Add every type of a serialized library. Returns the number of types.
    pub fn load_library_str(
        &mut self,
        text: &str,
        format: LibraryFormat,
    ) -> Result<usize, CompileError> {
        let doc = match format {
            LibraryFormat::Json => LibraryDocument::from_json(text)?,
            LibraryFormat::Yaml => serde_yaml::from_str::<LibraryDocument>(text)?,
        };
        let count = self.state_mut()?.library.add_document(doc)?;
        debug!("Loaded {} type(s)", count);
        Ok(count)
    }

    /// Load a library file, searching the configured library path.
    pub fn load_library_file(&mut self, path: &Path) -> Result<usize, CompileError> {
        let found = self.config()?.find_library_file(path).ok_or_else(|| {
            CompileError::Io(format!("library file not found: {}", path.display()))
        })?;
        info!("Loading library {}", found.display());
        let text = std::fs::read_to_string(&found)?;
        self.load_library_str(&text, LibraryFormat::from_path(&found))
    }

    /// Run the legality checker over one type, or over the whole library
    /// when `type_name` is `None`.
    pub fn lint(&self, type_name: Option<&str>) -> Result<Reporter, CompileError> {
        let state = self.state()?;
        let mut reporter = Reporter::new(state.config.warning_level);
        let mut linter = Linter::new(&state.library, &mut reporter);
        match type_name {
            Some(name) => {
                let desc = state
                    .library
                    .find(name)
                    .ok_or_else(|| CompileError::TypeResolutionFailure(name.to_string()))?;
                linter.check_type(&desc);
            }
            None => {
                linter.check_library();
            }
        }
        Ok(reporter)
    }

    // Simulations

    /// Instantiate `type_name` as simulation `name`.
    ///
    /// With [`InstantiationPolicy::FailFast`] any error destroys everything
    /// that was built and the diagnostics come back in the error. With
    /// [`InstantiationPolicy::BestEffort`] the failed statements are left
    /// out and the simulation is registered with `complete == false`.
    pub fn create_simulation(
        &mut self,
        name: &str,
        type_name: &str,
    ) -> Result<&Simulation, CompileError> {
        let state = self.state_mut()?;
        if state.simulations.contains(name) {
            return Err(CompileError::DuplicateSimulation(name.to_string()));
        }
        let desc = state
            .library
            .find(type_name)
            .ok_or_else(|| CompileError::TypeResolutionFailure(type_name.to_string()))?;
        if desc.kind != BaseKind::Model {
            return Err(CompileError::IllegalContext(format!(
                "simulations are made from models; '{}' is {}",
                type_name, desc.kind
            )));
        }
        info!("Creating simulation '{}' of type '{}'", name, type_name);

        let mut reporter = Reporter::new(state.config.warning_level);
        let root = state.arena.alloc(Instance::new(InstanceKind::Simulation, Arc::clone(&desc)));
        let (result, errors) = {
            let mut inst = Instantiator::new(
                &state.library,
                &mut state.arena,
                &mut state.symbols,
                &state.units,
                &state.externals,
                &state.config,
                &mut reporter,
            );
            let result = inst.instantiate(root, type_name);
            (result, inst.error_count())
        };

        let lenient = state.config.policy == InstantiationPolicy::BestEffort;
        let model = match result {
            Ok(model) if errors == 0 || lenient => model,
            Ok(model) => {
                state.arena.destroy_tree(model);
                state.arena.free(root);
                return Err(instantiation_error(type_name, errors, &reporter));
            }
            Err(_) => {
                state.arena.free(root);
                return Err(instantiation_error(type_name, errors.max(1), &reporter));
            }
        };
        let key = ChildKey::Name(state.symbols.intern(name));
        state.arena.add_child(root, key, model)?;
        state.arena.instance_mut(root)?.mark_complete();

        let has_on_load = state.library.find_method(type_name, "on_load").is_some();
        if state.config.default_on_load && has_on_load {
            let status = MethodRunner::new(
                &state.library,
                &mut state.arena,
                &state.symbols,
                &state.units,
                &state.externals,
                &state.config,
                &mut reporter,
            )
            .run(model, "on_load");
            if !status.is_ok() {
                warn!("on_load of '{}' finished with {:?}", name, status);
            }
        }

        let sim = Simulation {
            name: name.to_string(),
            type_name: type_name.to_string(),
            root,
            model,
            complete: errors == 0,
            diagnostics: reporter.take(),
        };
        info!(
            "Simulation '{}' created ({} error(s), complete={})",
            name, errors, sim.complete
        );
        state.simulations.insert(sim)?;
        self.simulation(name)
    }

    pub fn simulation(&self, name: &str) -> Result<&Simulation, CompileError> {
        self.state()?
            .simulations
            .get(name)
            .ok_or_else(|| CompileError::SimulationNotFound(name.to_string()))
    }

    pub fn simulation_names(&self) -> Result<Vec<&str>, CompileError> {
        Ok(self.state()?.simulations.names())
    }

    /// Destroy a simulation and every instance only it holds. Returns the
    /// number of instances freed.
    pub fn destroy_simulation(&mut self, name: &str) -> Result<usize, CompileError> {
        let state = self.state_mut()?;
        let sim = state
            .simulations
            .remove(name)
            .ok_or_else(|| CompileError::SimulationNotFound(name.to_string()))?;
        let freed = state.arena.destroy_tree(sim.root);
        info!("Destroyed simulation '{}' ({} instances)", name, freed);
        Ok(freed)
    }

    /// Run `method` on the model of simulation `sim`.
    pub fn run_method(&mut self, sim: &str, method: &str) -> Result<MethodReport, CompileError> {
        let model = self.simulation(sim)?.model;
        self.run_method_on(model, method)
    }

    /// Run `method` on any live instance.
    pub fn run_method_on(
        &mut self,
        instance: InstanceId,
        method: &str,
    ) -> Result<MethodReport, CompileError> {
        let state = self.state_mut()?;
        if !state.arena.contains(instance) {
            return Err(CompileError::StaleHandle(instance));
        }
        let mut reporter = Reporter::new(state.config.warning_level);
        let status = MethodRunner::new(
            &state.library,
            &mut state.arena,
            &state.symbols,
            &state.units,
            &state.externals,
            &state.config,
            &mut reporter,
        )
        .run(instance, method);
        debug!("Method '{}' on {} finished with {:?}", method, instance, status);
        Ok(MethodReport {
            status,
            diagnostics: reporter.take(),
        })
    }

    /// Find the instance named `name` inside the model of simulation `sim`.
    pub fn find_instance(&self, sim: &str, name: &Name) -> Result<InstanceId, CompileError> {
        let model = self.simulation(sim)?.model;
        let state = self.state()?;
        Evaluator::new(
            &state.arena,
            &state.symbols,
            &state.units,
            &state.externals,
            EvalMode::Procedural,
        )
        .resolve(Scope::new(model, &[]), name)
    }

    /// Current value of an instance.
    pub fn value_of(&self, id: InstanceId) -> Result<Value, CompileError> {
        Ok(self.state()?.arena.instance(id)?.value.clone())
    }

    pub fn describe(&self, sim: &str) -> Result<Vec<String>, CompileError> {
        let model = self.simulation(sim)?.model;
        let state = self.state()?;
        Ok(simulation::describe_tree(&state.arena, &state.symbols, model))
    }

    /// Structural fingerprint of a simulation's model tree.
    pub fn fingerprint(&self, sim: &str) -> Result<String, CompileError> {
        let model = self.simulation(sim)?.model;
        let state = self.state()?;
        Ok(simulation::fingerprint(&state.arena, &state.symbols, model))
    }
}

fn instantiation_error(type_name: &str, count: usize, reporter: &Reporter) -> CompileError {
    CompileError::Instantiation {
        type_name: type_name.to_string(),
        count,
        summary: reporter.format_compact(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ascend_core::TypeBuilder;

    #[test]
    fn test_init_destroy_alternate() {
        let mut ctx = CompilerContext::new();
        assert_eq!(ctx.destroy(), Err(CompileError::NotInitialized));
        for _ in 0..3 {
            ctx.init(CompilerConfig::default()).unwrap();
            assert_eq!(ctx.init(CompilerConfig::default()), Err(CompileError::AlreadyInitialized));
            assert!(ctx.library().unwrap().contains("real"));
            ctx.destroy().unwrap();
            assert!(!ctx.is_initialized());
        }
        assert_eq!(ctx.init_count(), 3);
    }

    #[test]
    fn test_stage_order() {
        let ctx = CompilerContext::with_config(CompilerConfig::default()).unwrap();
        assert_eq!(
            ctx.stages(),
            &[
                InitStage::Symbols,
                InitStage::Units,
                InitStage::Externals,
                InitStage::Library,
                InitStage::FundamentalTypes,
                InitStage::Instances,
                InitStage::Simulations,
            ]
        );
    }

    #[test]
    fn test_calls_after_destroy_fail() {
        let mut ctx = CompilerContext::with_config(CompilerConfig::default()).unwrap();
        ctx.destroy().unwrap();
        assert!(matches!(
            ctx.add_type(TypeBuilder::model("m").build()),
            Err(CompileError::NotInitialized)
        ));
        assert!(matches!(ctx.simulation("s"), Err(CompileError::NotInitialized)));
    }

    #[test]
    fn test_fresh_state_after_reinit() {
        let mut ctx = CompilerContext::with_config(CompilerConfig::default()).unwrap();
        ctx.add_type(TypeBuilder::model("m").is_a(&["x"], "real").build())
            .unwrap();
        ctx.create_simulation("s", "m").unwrap();
        ctx.destroy().unwrap();

        ctx.init(CompilerConfig::default()).unwrap();
        assert!(!ctx.library().unwrap().contains("m"));
        assert!(ctx.simulation_names().unwrap().is_empty());
        assert_eq!(ctx.state().unwrap().arena.live_count(), 0);
    }

    #[test]
    fn test_library_format_from_extension() {
        assert_eq!(LibraryFormat::from_path(Path::new("a.yaml")), LibraryFormat::Yaml);
        assert_eq!(LibraryFormat::from_path(Path::new("a.yml")), LibraryFormat::Yaml);
        assert_eq!(LibraryFormat::from_path(Path::new("a.json")), LibraryFormat::Json);
    }
}
