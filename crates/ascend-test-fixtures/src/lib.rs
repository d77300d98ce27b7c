//! Test fixtures for the ASCEND compiler crates
//!
//! A small library of atoms and models that exercise arrays, parameters,
//! relations, methods and black boxes, plus helpers that write it to disk.

use std::fs;
use std::path::{Path, PathBuf};

use ascend_core::{
    Case, Expr, ExtMode, FlowKind, ForKind, LibraryDocument, Literal, Name, RelOp, SetItem,
    Statement, StatementKind, TypeBuilder, TypeDescription, ValueType,
};

/// Test fixture categories
pub enum FixtureType {
    /// `library.json` holding [`library_document`]
    JsonLibrary,
    /// `library.yaml` holding [`library_document`]
    YamlLibrary,
    /// A JSON library plus `ascend.toml` whose library path points at it
    ConfiguredProject,
    /// `broken.json` holding [`broken_models`] on top of the atoms
    BrokenLibrary,
}

/// Main test fixtures provider
pub struct TestFixtures {
    temp_dir: Option<tempfile::TempDir>,
}

impl Default for TestFixtures {
    fn default() -> Self {
        Self::new()
    }
}

impl TestFixtures {
    pub fn new() -> Self {
        Self { temp_dir: None }
    }

    /// Create a temporary directory with test fixtures
    pub fn setup(&mut self, fixture_type: FixtureType) -> PathBuf {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_path_buf();

        match fixture_type {
            FixtureType::JsonLibrary => {
                fs::write(path.join("library.json"), library_json()).unwrap();
            }
            FixtureType::YamlLibrary => {
                fs::write(path.join("library.yaml"), library_yaml()).unwrap();
            }
            FixtureType::ConfiguredProject => self.setup_configured_project(&path),
            FixtureType::BrokenLibrary => {
                let mut types = atoms();
                types.extend(broken_models());
                let doc = LibraryDocument { types };
                fs::write(path.join("broken.json"), doc.to_json().unwrap()).unwrap();
            }
        }

        self.temp_dir = Some(dir);
        path
    }

    fn setup_configured_project(&self, base: &Path) {
        let lib_dir = base.join("models");
        fs::create_dir_all(&lib_dir).unwrap();
        fs::write(lib_dir.join("library.json"), library_json()).unwrap();
        fs::write(
            base.join("ascend.toml"),
            format!(
                r#"simplify_relations = true
warning_level = "warnings"
policy = "best-effort"
library_path = ["{}"]
max_while_iterations = 50
"#,
                lib_dir.display()
            ),
        )
        .unwrap();
    }
}

/// `solver_var` and a handful of dimensioned refinements of it.
pub fn atoms() -> Vec<TypeDescription> {
    let solver_var = TypeBuilder::atom("solver_var", ValueType::Real)
        .refines("real")
        .default_value(Literal::Real(0.5))
        .is_a(&["fixed"], "boolean")
        .is_a(&["lower_bound", "upper_bound", "nominal"], "real")
        .is_a(&["ode_type", "ode_id"], "integer")
        .statement(Statement::assign(Name::id("lower_bound"), Expr::real(-1e20)))
        .statement(Statement::assign(Name::id("upper_bound"), Expr::real(1e20)))
        .statement(Statement::assign(Name::id("nominal"), Expr::real(1.0)))
        .note(None, "variable the solver may compute")
        .build();

    let derived = |name: &str, units: &str, default: f64| {
        TypeBuilder::atom(name, ValueType::Real)
            .refines("solver_var")
            .units(units)
            .default_value(Literal::Real(default))
            .build()
    };

    vec![
        solver_var,
        derived("temperature", "K", 298.15),
        derived("pressure", "Pa", 101325.0),
        derived("molar_flow", "mol/s", 1.0),
        derived("time", "s", 0.0),
        TypeBuilder::atom("factor", ValueType::Real)
            .refines("solver_var")
            .default_value(Literal::Real(1.0))
            .build(),
    ]
}

/// Models built on [`atoms`].
pub fn models() -> Vec<TypeDescription> {
    let mixer = TypeBuilder::model("mixer")
        .is_a(&["feed1", "feed2", "product"], "molar_flow")
        .relation(
            "balance",
            Expr::name("product").equals(Expr::name("feed1") + Expr::name("feed2")),
        )
        .method(
            "specify",
            vec![Statement::fix(vec![Name::id("feed1"), Name::id("feed2")])],
        )
        .method(
            "values",
            vec![
                Statement::assign(Name::id("feed1"), Expr::real_units(2.0, "mol/s")),
                Statement::assign(Name::id("feed2"), Expr::real_units(3.0, "mol/s")),
            ],
        )
        .method(
            "on_load",
            vec![
                Statement::run(Name::id("specify")),
                Statement::run(Name::id("values")),
            ],
        )
        .build();

    let tank = TypeBuilder::model("tank")
        .param(Statement::new(StatementKind::IsA {
            names: vec![Name::id("n")],
            type_name: "integer_constant".to_string(),
            args: Vec::new(),
            of_type: None,
            value: Some(Expr::Int(3)),
        }))
        .where_clause(Statement::relation(
            None,
            Expr::name("n").compare(RelOp::GreaterEq, Expr::Int(1)),
        ))
        .statement(Statement::for_each(
            "i",
            vec![SetItem::Range(Expr::Int(1), Expr::name("n"))],
            ForKind::Create,
            vec![Statement::is_a_named(
                vec![Name::id("holdup").sub(Expr::name("i"))],
                "molar_flow",
                Vec::new(),
            )],
        ))
        .is_a(&["total"], "molar_flow")
        .relation(
            "sum_holdup",
            Expr::name("total").equals(Expr::Sum(vec![Expr::name("holdup")])),
        )
        .build();

    let flowsheet = TypeBuilder::model("flowsheet")
        .is_a(&["m"], "mixer")
        .statement(Statement::is_a_named(vec![Name::id("t")], "tank", vec![Expr::Int(2)]))
        .statement(Statement::relation_named(
            Name::id("link"),
            Expr::Name(Name::id("t").dot("holdup").sub(Expr::Int(1)))
                .equals(Expr::name("m.product")),
        ))
        .method("on_load", vec![Statement::run(Name::path("m.on_load"))])
        .build();

    let dynamic_tank = TypeBuilder::model("dynamic_tank")
        .is_a(&["x", "dx_dt"], "solver_var")
        .is_a(&["t"], "time")
        .relation("decay", Expr::name("dx_dt").equals(-Expr::name("x")))
        .method(
            "on_load",
            vec![
                Statement::assign(Name::path("x.ode_type"), Expr::Int(1)),
                Statement::assign(Name::path("x.ode_id"), Expr::Int(1)),
                Statement::assign(Name::path("dx_dt.ode_type"), Expr::Int(2)),
                Statement::assign(Name::path("dx_dt.ode_id"), Expr::Int(1)),
                Statement::assign(Name::path("t.ode_type"), Expr::Int(-1)),
            ],
        )
        .build();

    let blackbox_model = TypeBuilder::model("blackbox_model")
        .is_a(&["x", "y"], "solver_var")
        .statement(Statement::new(StatementKind::External {
            name: Some(Name::id("bb")),
            function: "double".to_string(),
            mode: ExtMode::Blackbox,
            inputs: vec![Name::id("x")],
            outputs: vec![Name::id("y")],
            data: None,
        }))
        .method(
            "scale",
            vec![Statement::new(StatementKind::Call {
                function: "scale".to_string(),
                args: vec![Name::id("x")],
            })],
        )
        .build();

    let switcher = TypeBuilder::model("switcher")
        .is_a(&["mode"], "integer")
        .is_a(&["a", "b"], "solver_var")
        .method(
            "pick",
            vec![Statement::new(StatementKind::Switch {
                vars: vec![Name::id("mode")],
                cases: vec![
                    Case::matching(
                        vec![Expr::Int(1)],
                        vec![
                            Statement::assign(Name::id("a"), Expr::real(1.0)),
                            Statement::flow(FlowKind::FallThrough),
                        ],
                    ),
                    Case::matching(
                        vec![Expr::Int(2)],
                        vec![Statement::assign(Name::id("b"), Expr::real(2.0))],
                    ),
                    Case::otherwise(vec![Statement::assign(Name::id("a"), Expr::real(-1.0))]),
                ],
            })],
        )
        .build();

    vec![mixer, tank, flowsheet, dynamic_tank, blackbox_model, switcher]
}

/// Models that fail to instantiate, one failure each.
pub fn broken_models() -> Vec<TypeDescription> {
    vec![
        // `x` is declared twice; `y` instantiates before the conflict.
        TypeBuilder::model("conflict")
            .is_a(&["y"], "solver_var")
            .is_a(&["x"], "solver_var")
            .is_a(&["x"], "real")
            .build(),
        TypeBuilder::model("bad_arity")
            .statement(Statement::is_a_named(
                vec![Name::id("t")],
                "tank",
                vec![Expr::Int(1), Expr::Int(2)],
            ))
            .build(),
        TypeBuilder::model("bad_where")
            .statement(Statement::is_a_named(vec![Name::id("t")], "tank", vec![Expr::Int(0)]))
            .build(),
    ]
}

/// Atoms and models as a loadable document.
pub fn library_document() -> LibraryDocument {
    let mut types = atoms();
    types.extend(models());
    LibraryDocument { types }
}

pub fn library_json() -> String {
    serde_json::to_string_pretty(&library_document()).unwrap()
}

pub fn library_yaml() -> String {
    serde_yaml::to_string(&library_document()).unwrap()
}

/// Black box `double`: y = 2x.
pub fn double_blackbox(inputs: &[f64], outputs: &mut [f64]) -> Result<(), String> {
    match (inputs.first(), outputs.first_mut()) {
        (Some(x), Some(y)) => {
            *y = 2.0 * x;
            Ok(())
        }
        _ => Err("double takes one input and one output".to_string()),
    }
}

/// External method `scale`: multiplies every argument by ten.
pub fn scale_method(args: &mut [f64]) -> Result<(), String> {
    if args.is_empty() {
        return Err("scale needs at least one argument".to_string());
    }
    for a in args.iter_mut() {
        *a *= 10.0;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_document_serializes_both_ways() {
        let from_json = LibraryDocument::from_json(&library_json()).unwrap();
        let from_yaml: LibraryDocument = serde_yaml::from_str(&library_yaml()).unwrap();
        assert_eq!(from_json.types, library_document().types);
        assert_eq!(from_yaml.types, from_json.types);
    }

    #[test]
    fn test_setup_writes_files() {
        let mut fixtures = TestFixtures::new();
        let dir = fixtures.setup(FixtureType::ConfiguredProject);
        assert!(dir.join("ascend.toml").exists());
        assert!(dir.join("models").join("library.json").exists());
    }

    #[test]
    fn test_external_functions() {
        let mut out = [0.0];
        double_blackbox(&[2.5], &mut out).unwrap();
        assert_eq!(out[0], 5.0);
        assert!(double_blackbox(&[], &mut out).is_err());

        let mut args = [1.0, 2.0];
        scale_method(&mut args).unwrap();
        assert_eq!(args, [10.0, 20.0]);
    }
}
