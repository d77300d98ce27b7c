//! Command handlers driven against fixture libraries on disk.

use std::path::PathBuf;

use ascend_cli::{check, instantiate, open, system_stats};
use ascend_compiler::ProcStatus;
use ascend_test_fixtures::{FixtureType, TestFixtures};
use pretty_assertions::assert_eq;

#[test]
fn test_check_clean_library() -> anyhow::Result<()> {
    let mut fixtures = TestFixtures::new();
    let dir = fixtures.setup(FixtureType::JsonLibrary);
    let ctx = open(None, &[dir.join("library.json")], false)?;

    let reporter = check(&ctx, None)?;
    assert!(!reporter.has_errors());
    assert!(check(&ctx, Some("no_such_type")).is_err());
    Ok(())
}

#[test]
fn test_instantiate_with_method() -> anyhow::Result<()> {
    let mut fixtures = TestFixtures::new();
    let dir = fixtures.setup(FixtureType::YamlLibrary);
    let mut ctx = open(None, &[dir.join("library.yaml")], false)?;

    let outcome = instantiate(&mut ctx, "mixer", "m", Some("specify"))?;
    assert_eq!(outcome.simulation, "m");
    assert!(outcome.complete);
    assert_eq!(outcome.method, Some(ProcStatus::AllOk));
    assert!(!outcome.tree.is_empty());
    assert_eq!(outcome.fingerprint.len(), 64);

    let missing = instantiate(&mut ctx, "mixer", "n", Some("nope"))?;
    assert_eq!(missing.method, Some(ProcStatus::MethodNotFound));
    Ok(())
}

#[test]
fn test_config_file_supplies_library_path_and_policy() -> anyhow::Result<()> {
    let mut fixtures = TestFixtures::new();
    let dir = fixtures.setup(FixtureType::ConfiguredProject);
    let mut ctx = open(
        Some(&dir.join("ascend.toml")),
        &[PathBuf::from("library.json")],
        false,
    )?;

    let stats = system_stats(&mut ctx, "flowsheet")?;
    assert_eq!(stats.models, 3);
    assert_eq!(stats.rels, 3);
    Ok(())
}

#[test]
fn test_broken_models_fail_unless_best_effort() -> anyhow::Result<()> {
    let mut fixtures = TestFixtures::new();
    let dir = fixtures.setup(FixtureType::BrokenLibrary);
    let library = [dir.join("broken.json")];

    let mut strict = open(None, &library, false)?;
    assert!(instantiate(&mut strict, "conflict", "c", None).is_err());

    let mut lenient = open(None, &library, true)?;
    let outcome = instantiate(&mut lenient, "conflict", "c", None)?;
    assert!(!outcome.complete);
    assert!(!outcome.diagnostics.is_empty());
    assert!(system_stats(&mut lenient, "conflict").is_err());
    Ok(())
}

#[test]
fn test_missing_inputs_are_reported() {
    let missing = PathBuf::from("/nonexistent/ascend.toml");
    assert!(open(Some(&missing), &[], false).is_err());
    assert!(open(None, &[PathBuf::from("nowhere.json")], false).is_err());
}
