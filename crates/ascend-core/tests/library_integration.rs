//! Building, serializing and querying a type library

use ascend_core::{
    fundamental_types, BaseKind, BitList, Expr, LibraryDocument, Literal, Section, Statement,
    TypeBuilder, TypeLibrary, ValueType,
};
use pretty_assertions::assert_eq;
use proptest::prelude::*;

fn library() -> TypeLibrary {
    let mut lib = TypeLibrary::new();
    for desc in fundamental_types() {
        lib.add(desc).unwrap();
    }
    let doc = LibraryDocument {
        types: vec![
            TypeBuilder::atom("solver_var", ValueType::Real)
                .refines("real")
                .default_value(Literal::Real(0.5))
                .is_a(&["fixed"], "boolean")
                .build(),
            TypeBuilder::atom("temperature", ValueType::Real)
                .refines("solver_var")
                .units("K")
                .build(),
            TypeBuilder::model("vessel")
                .is_a(&["t"], "temperature")
                .method("specify", vec![Statement::fix(vec![ascend_core::Name::id("t")])])
                .build(),
            TypeBuilder::model("heated_vessel")
                .refines("vessel")
                .is_a(&["q"], "solver_var")
                .relation("duty", Expr::name("q").equals(Expr::name("t") * Expr::real(2.0)))
                .build(),
        ],
    };
    let text = doc.to_json().unwrap();
    lib.add_document(LibraryDocument::from_json(&text).unwrap()).unwrap();
    lib
}

#[test]
fn test_refinement_chain_and_sections() {
    let lib = library();
    let chain: Vec<String> = lib
        .ancestry("temperature")
        .unwrap()
        .iter()
        .map(|d| d.name.clone())
        .collect();
    assert_eq!(chain, vec!["real", "solver_var", "temperature"]);
    assert!(lib.refines_from("heated_vessel", "vessel"));
    assert_eq!(lib.more_refined("vessel", "heated_vessel").unwrap().name, "heated_vessel");
    assert!(lib.more_refined("vessel", "temperature").is_none());

    assert_eq!(lib.full_section("heated_vessel", Section::Body).unwrap().len(), 3);
    let added = lib
        .statements_between(Some("vessel"), "heated_vessel", Section::Body)
        .unwrap();
    assert_eq!(added.len(), 2);

    let (owner, method) = lib.find_method("heated_vessel", "SPECIFY").unwrap();
    assert_eq!(owner.name, "vessel");
    assert_eq!(method.body.len(), 1);
}

#[test]
fn test_dependency_order_puts_parts_first() {
    let lib = library();
    let order = lib.dependency_order().unwrap();
    let pos = |name: &str| order.iter().position(|n| n == name).unwrap();
    assert!(pos("real") < pos("solver_var"));
    assert!(pos("temperature") < pos("vessel"));
    assert!(pos("vessel") < pos("heated_vessel"));
    assert!(lib.detect_cycles().is_empty());
}

#[test]
fn test_self_containing_types_are_cycles() {
    let mut lib = library();
    lib.add(TypeBuilder::model("ouroboros").is_a(&["tail"], "ouroboros").build())
        .unwrap();
    assert_eq!(lib.detect_cycles(), vec![vec!["ouroboros".to_string()]]);
    assert!(lib.dependency_order().is_err());
}

#[test]
fn test_library_rejects_bad_additions() {
    let mut lib = library();
    assert!(lib.add(TypeBuilder::model("vessel").build()).is_err());
    assert!(lib
        .add(TypeBuilder::model("orphan").refines("nowhere").build())
        .is_err());
    // A model cannot refine an atom.
    assert!(lib
        .add(TypeBuilder::model("odd").refines("solver_var").build())
        .is_err());
    assert_eq!(lib.find("relation").unwrap().kind, BaseKind::Relation);
}

proptest! {
    #[test]
    fn prop_bitlist_ones_match_positions(
        len in 1usize..200,
        picks in prop::collection::vec(0usize..200, 0..40),
    ) {
        let mut bits = BitList::new(len);
        let mut expected: Vec<usize> = picks.into_iter().filter(|p| *p < len).collect();
        for p in &expected {
            bits.set(*p).unwrap();
        }
        expected.sort_unstable();
        expected.dedup();
        prop_assert_eq!(bits.iter_ones().collect::<Vec<_>>(), expected.clone());
        prop_assert_eq!(bits.count_ones(), expected.len());
        prop_assert_eq!(bits.is_empty(), expected.is_empty());
    }

    #[test]
    fn prop_bitlist_union_then_intersect(
        len in 1usize..150,
        a in prop::collection::vec(any::<bool>(), 150),
        b in prop::collection::vec(any::<bool>(), 150),
    ) {
        let mut x = BitList::new(len);
        let mut y = BitList::new(len);
        for i in 0..len {
            x.set_if(i, a[i]).unwrap();
            y.set_if(i, b[i]).unwrap();
        }
        let mut u = x.clone();
        u.union(&y).unwrap();
        let mut n = x.clone();
        n.intersect(&y).unwrap();
        for i in 0..len {
            prop_assert_eq!(u.read(i).unwrap(), a[i] || b[i]);
            prop_assert_eq!(n.read(i).unwrap(), a[i] && b[i]);
        }
    }
}
