//! Scanning fixture simulations into solver systems.

use ascend_compiler::{CompilerConfig, CompilerContext};
use ascend_core::{Expr, Name};
use ascend_system::{RelFilter, RelFlags, RelKind, SlvSystem, SystemError, VarFilter, VarFlags};
use ascend_test_fixtures::{double_blackbox, library_document, scale_method};
use pretty_assertions::assert_eq;

fn loaded() -> Result<CompilerContext, SystemError> {
    let mut ctx = CompilerContext::with_config(CompilerConfig::default())?;
    ctx.externals_mut()?.register_blackbox("double", 1, 1, double_blackbox)?;
    ctx.externals_mut()?.register_method("scale", Some(1), scale_method)?;
    ctx.state_mut()?.library.add_document(library_document())?;
    Ok(ctx)
}

#[test]
fn test_mixer_system() -> Result<(), SystemError> {
    let mut ctx = loaded()?;
    ctx.create_simulation("m", "mixer")?;
    let mut system = SlvSystem::for_simulation(&mut ctx, "m")?;

    assert_eq!(system.vars().len(), 3);
    assert_eq!(system.rels().len(), 1);
    assert_eq!(system.models().len(), 1);

    let fixed = VarFilter::new(VarFlags::FIXED, VarFlags::FIXED);
    assert_eq!(system.count_vars(&fixed), 2);
    assert_eq!(system.vars_matching(&fixed), vec![0, 1]);

    let rel = &system.rels()[0];
    assert_eq!(rel.kind, RelKind::Token);
    assert!(rel.equal() && !rel.less() && !rel.greater());
    assert_eq!(rel.incidence(), &[2, 0, 1]);

    let residuals = system.residuals(ctx.state()?, &RelFilter::solved())?;
    assert_eq!(residuals.len(), 1);
    assert!((residuals[0] - (0.001 - 0.005)).abs() < 1e-12);
    assert!(!system.rels()[0].flags.contains(RelFlags::SATISFIED));

    let stats = system.stats();
    assert_eq!(stats.vars, 3);
    assert_eq!(stats.incident_vars, 3);
    assert_eq!(stats.fixed_vars, 2);
    assert_eq!(stats.equalities, 1);
    assert_eq!(stats.nonzeros, 3);
    Ok(())
}

#[test]
fn test_satisfied_after_assignment() -> Result<(), SystemError> {
    let mut ctx = loaded()?;
    ctx.create_simulation("m", "mixer")?;
    let mut system = SlvSystem::for_simulation(&mut ctx, "m")?;

    let product = system.vars()[2].clone();
    product.set_value(ctx.state_mut()?, 0.005)?;
    let residuals = system.residuals(ctx.state()?, &RelFilter::all())?;
    assert!(residuals[0].abs() < 1e-12);
    assert!(system.rels()[0].flags.contains(RelFlags::SATISFIED));
    Ok(())
}

#[test]
fn test_nested_models_share_one_system() -> Result<(), SystemError> {
    let mut ctx = loaded()?;
    ctx.create_simulation("f", "flowsheet")?;
    let system = SlvSystem::for_simulation(&mut ctx, "f")?;

    // flowsheet, m, t
    assert_eq!(system.models().len(), 3);
    // m: 3 flows; t: 2 holdups and a total
    assert_eq!(system.vars().len(), 6);
    // balance, sum_holdup, link
    assert_eq!(system.rels().len(), 3);

    let holdup = ctx.find_instance("f", &Name::id("t").dot("holdup").sub(Expr::Int(1)))?;
    let product = ctx.find_instance("f", &Name::path("m.product"))?;
    let link = system
        .rels()
        .iter()
        .find(|r| r.model == 0)
        .ok_or(SystemError::UnknownRelation(holdup))?;
    let linked: Vec<_> = link.incidence().iter().map(|i| system.vars()[*i].instance).collect();
    assert_eq!(linked, vec![holdup, product]);
    Ok(())
}

#[test]
fn test_interface_slot_goes_to_latest_scan() -> Result<(), SystemError> {
    let mut ctx = loaded()?;
    ctx.create_simulation("m", "mixer")?;
    let first = SlvSystem::for_simulation(&mut ctx, "m")?;
    let second = SlvSystem::for_simulation(&mut ctx, "m")?;
    assert_ne!(first.id(), second.id());

    let balance = second.rels()[0].instance;
    assert_eq!(ctx.state()?.arena.interface(balance).map(|t| t.owner), Some(second.id()));

    assert_eq!(first.destroy(&mut ctx)?, 0);
    assert_eq!(second.destroy(&mut ctx)?, 1);
    assert_eq!(ctx.state()?.arena.interface(balance), None);
    Ok(())
}

#[test]
fn test_derivative_analysis() -> Result<(), SystemError> {
    let mut ctx = loaded()?;
    ctx.create_simulation("d", "dynamic_tank")?;
    let mut system = SlvSystem::for_simulation(&mut ctx, "d")?;

    assert_eq!(system.classify_differential(), 0);
    assert_eq!(system.analyse_derivatives(ctx.state()?)?, 1);
    assert_eq!(system.classify_differential(), 1);

    let deriv = VarFilter::new(VarFlags::DERIV, VarFlags::DERIV);
    let indep = VarFilter::new(VarFlags::INDEP, VarFlags::INDEP);
    assert_eq!(system.vars_matching(&deriv), vec![1]);
    assert_eq!(system.vars_matching(&indep), vec![2]);

    let differential = RelFilter::new(RelFlags::DIFFERENTIAL, RelFlags::DIFFERENTIAL);
    assert_eq!(system.count_rels(&differential), 1);
    assert!(system.rels()[0].differential());
    Ok(())
}

#[test]
fn test_blackbox_rows() -> Result<(), SystemError> {
    let mut ctx = loaded()?;
    ctx.create_simulation("b", "blackbox_model")?;
    let mut system = SlvSystem::for_simulation(&mut ctx, "b")?;

    assert_eq!(system.rels().len(), 1);
    assert_eq!(system.rels()[0].kind, RelKind::Blackbox);
    assert!(system.rels()[0].flags.contains(RelFlags::BLACKBOX));
    assert_eq!(system.rels()[0].incidence(), &[0, 1]);

    // 2x - y with both at the solver_var default
    let residuals = system.residuals(ctx.state()?, &RelFilter::all())?;
    assert!((residuals[0] - 0.5).abs() < 1e-12);
    Ok(())
}

#[test]
fn test_excluded_relations_drop_out_of_solved_rows() -> Result<(), SystemError> {
    let mut ctx = loaded()?;
    ctx.create_simulation("t", "tank")?;
    let mut system = SlvSystem::for_simulation(&mut ctx, "t")?;
    assert_eq!(system.count_rels(&RelFilter::solved()), 1);

    let sum = system.rels()[0].instance;
    system.set_rel_included(&mut ctx, sum, false)?;
    assert_eq!(system.count_rels(&RelFilter::solved()), 0);
    assert_eq!(system.rel_bitlist(&RelFilter::solved())?.count_ones(), 0);
    assert_eq!(system.incidence_matrix(&RelFilter::solved()).n_rows(), 0);

    // The part was written through, so a rescan agrees.
    let rescanned = SlvSystem::for_simulation(&mut ctx, "t")?;
    assert_eq!(rescanned.count_rels(&RelFilter::solved()), 0);

    let holdup = ctx.find_instance("t", &Name::id("holdup").sub(Expr::Int(1)))?;
    assert_eq!(
        system.set_rel_included(&mut ctx, holdup, true).unwrap_err(),
        SystemError::UnknownRelation(holdup)
    );
    Ok(())
}

#[test]
fn test_systems_need_a_live_compiler() -> Result<(), SystemError> {
    let mut ctx = loaded()?;
    ctx.create_simulation("m", "mixer")?;
    let system = SlvSystem::for_simulation(&mut ctx, "m")?;
    ctx.destroy()?;
    assert!(matches!(system.destroy(&mut ctx), Err(SystemError::Compile(_))));
    Ok(())
}
