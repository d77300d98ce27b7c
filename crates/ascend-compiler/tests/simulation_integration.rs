//! End-to-end tests: load the fixture library, build simulations, run
//! methods and tear the compiler down again.

use ascend_compiler::{
    CompileError, CompilerConfig, CompilerContext, InitStage, InstanceKind, InstantiationPolicy,
    ProcStatus, Value,
};
use ascend_core::{Name, Severity};
use ascend_test_fixtures::{broken_models, double_blackbox, library_document, scale_method};
use pretty_assertions::assert_eq;

fn loaded(config: CompilerConfig) -> Result<CompilerContext, CompileError> {
    let mut ctx = CompilerContext::with_config(config)?;
    ctx.externals_mut()?.register_blackbox("double", 1, 1, double_blackbox)?;
    ctx.externals_mut()?.register_method("scale", Some(1), scale_method)?;
    ctx.state_mut()?.library.add_document(library_document())?;
    Ok(ctx)
}

#[test]
fn test_same_type_same_fingerprint() -> Result<(), CompileError> {
    let mut ctx = loaded(CompilerConfig::default())?;
    ctx.create_simulation("a", "flowsheet")?;
    ctx.create_simulation("b", "flowsheet")?;
    ctx.create_simulation("c", "mixer")?;

    assert_eq!(ctx.fingerprint("a")?, ctx.fingerprint("b")?);
    assert_ne!(ctx.fingerprint("a")?, ctx.fingerprint("c")?);
    assert_eq!(ctx.describe("a")?, ctx.describe("b")?);
    assert_eq!(ctx.simulation_names()?, vec!["a", "b", "c"]);
    Ok(())
}

#[test]
fn test_fingerprint_survives_reinit() -> Result<(), CompileError> {
    let mut ctx = loaded(CompilerConfig::default())?;
    ctx.create_simulation("s", "tank")?;
    let first = ctx.fingerprint("s")?;
    ctx.destroy()?;

    ctx.init(CompilerConfig::default())?;
    ctx.state_mut()?.library.add_document(library_document())?;
    ctx.create_simulation("s", "tank")?;
    assert_eq!(ctx.fingerprint("s")?, first);
    assert_eq!(ctx.init_count(), 2);
    Ok(())
}

#[test]
fn test_lifecycle_alternates() -> Result<(), CompileError> {
    let mut ctx = CompilerContext::new();
    assert_eq!(ctx.destroy(), Err(CompileError::NotInitialized));
    for _ in 0..3 {
        ctx.init(CompilerConfig::default())?;
        assert_eq!(ctx.init(CompilerConfig::default()), Err(CompileError::AlreadyInitialized));
        assert_eq!(ctx.stages().first(), Some(&InitStage::Symbols));
        ctx.destroy()?;
        assert!(!ctx.is_initialized());
        assert!(matches!(
            ctx.create_simulation("s", "mixer"),
            Err(CompileError::NotInitialized)
        ));
    }
    assert_eq!(ctx.init_count(), 3);
    Ok(())
}

#[test]
fn test_destroy_frees_simulations() -> Result<(), CompileError> {
    let mut ctx = loaded(CompilerConfig::default())?;
    ctx.create_simulation("fs", "flowsheet")?;
    let live = ctx.state()?.arena.live_count();
    assert!(live > 0);

    let freed = ctx.destroy_simulation("fs")?;
    assert_eq!(freed, live);
    assert_eq!(ctx.state()?.arena.live_count(), 0);
    assert!(matches!(
        ctx.simulation("fs"),
        Err(CompileError::SimulationNotFound(_))
    ));
    Ok(())
}

#[test]
fn test_policies_on_broken_model() -> Result<(), CompileError> {
    let mut strict = loaded(CompilerConfig::default())?;
    let mut lenient =
        loaded(CompilerConfig::default().with_policy(InstantiationPolicy::BestEffort))?;
    for desc in broken_models() {
        strict.add_type(desc.clone())?;
        lenient.add_type(desc)?;
    }

    let err = strict.create_simulation("s", "conflict").unwrap_err();
    assert!(matches!(err, CompileError::Instantiation { count: 1, .. }));
    assert_eq!(strict.state()?.arena.live_count(), 0);

    let sim = lenient.create_simulation("s", "conflict")?;
    assert!(!sim.complete);
    assert_eq!(
        sim.diagnostics
            .iter()
            .filter(|d| d.severity >= Severity::Error)
            .count(),
        1
    );
    Ok(())
}

#[test]
fn test_non_model_and_duplicate_simulations() -> Result<(), CompileError> {
    let mut ctx = loaded(CompilerConfig::default())?;
    assert!(matches!(
        ctx.create_simulation("s", "temperature"),
        Err(CompileError::IllegalContext(_))
    ));
    assert!(matches!(
        ctx.create_simulation("s", "no_such_type"),
        Err(CompileError::TypeResolutionFailure(_))
    ));
    ctx.create_simulation("s", "mixer")?;
    assert_eq!(
        ctx.create_simulation("s", "mixer").unwrap_err(),
        CompileError::DuplicateSimulation("s".to_string())
    );
    Ok(())
}

#[test]
fn test_on_load_can_be_disabled() -> Result<(), CompileError> {
    let config = CompilerConfig {
        default_on_load: false,
        ..CompilerConfig::default()
    };
    let mut ctx = loaded(config)?;
    ctx.create_simulation("m", "mixer")?;
    let fixed = ctx.find_instance("m", &Name::path("feed1.fixed"))?;
    assert_eq!(ctx.value_of(fixed)?, Value::Bool(false));

    let report = ctx.run_method("m", "on_load")?;
    assert_eq!(report.status, ProcStatus::AllOk);
    assert_eq!(ctx.value_of(fixed)?, Value::Bool(true));
    Ok(())
}

#[test]
fn test_blackbox_relations_and_external_calls() -> Result<(), CompileError> {
    let mut ctx = loaded(CompilerConfig::default())?;
    ctx.create_simulation("b", "blackbox_model")?;

    let bb = ctx.find_instance("b", &Name::id("bb"))?;
    {
        let state = ctx.state()?;
        let array = state.arena.instance(bb)?;
        assert_eq!(array.kind, InstanceKind::Array);
        assert_eq!(array.children.len(), 1);
    }

    assert_eq!(ctx.run_method("b", "scale")?.status, ProcStatus::AllOk);
    let x = ctx.find_instance("b", &Name::id("x"))?;
    assert_eq!(ctx.value_of(x)?, Value::Real(5.0));
    Ok(())
}

#[test]
fn test_stale_handles_are_rejected() -> Result<(), CompileError> {
    let mut ctx = loaded(CompilerConfig::default())?;
    ctx.create_simulation("m", "mixer")?;
    let feed = ctx.find_instance("m", &Name::id("feed1"))?;
    ctx.destroy_simulation("m")?;

    assert_eq!(
        ctx.run_method_on(feed, "specify").unwrap_err(),
        CompileError::StaleHandle(feed)
    );
    Ok(())
}
