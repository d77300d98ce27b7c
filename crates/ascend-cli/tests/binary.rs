//! Runs the `ascend` binary against library files written to a temp dir.

use std::fs;
use std::process::Command;

use ascend_core::LibraryDocument;
use ascend_test_fixtures::{atoms, broken_models, library_json};
use pretty_assertions::assert_eq;

fn ascend() -> Command {
    Command::new(env!("CARGO_BIN_EXE_ascend"))
}

#[test]
fn test_system_command_prints_stats() {
    let dir = tempfile::tempdir().unwrap();
    let library = dir.path().join("library.json");
    fs::write(&library, library_json()).unwrap();

    let output = ascend()
        .args(["--json", "system"])
        .arg(&library)
        .args(["--type", "mixer"])
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let stats: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(stats["vars"], 3);
    assert_eq!(stats["rels"], 1);
    assert_eq!(stats["fixed_vars"], 2);
}

#[test]
fn test_instantiate_failure_sets_exit_status() {
    let dir = tempfile::tempdir().unwrap();
    let library = dir.path().join("broken.json");
    let doc = LibraryDocument {
        types: atoms().into_iter().chain(broken_models()).collect(),
    };
    fs::write(&library, doc.to_json().unwrap()).unwrap();

    let strict = ascend()
        .arg("instantiate")
        .arg(&library)
        .args(["--type", "bad_arity"])
        .output()
        .unwrap();
    assert!(!strict.status.success());

    let lenient = ascend()
        .args(["--json", "instantiate"])
        .arg(&library)
        .args(["--type", "conflict", "--best-effort"])
        .output()
        .unwrap();
    assert!(lenient.status.success(), "{}", String::from_utf8_lossy(&lenient.stderr));
    let outcome: serde_json::Value = serde_json::from_slice(&lenient.stdout).unwrap();
    assert_eq!(outcome["complete"], false);
}
