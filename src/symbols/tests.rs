use super::*;
use crate::types::{ScalarType, TupleField, Type};

#[test]
fn test_dense_symbol_ids() {
    let mut table = SymbolTable::new();
    let a = table.define_variable("a", Type::Integer, Specifier::Var, ScopeKind::Global);
    let b = table.define_variable("b", Type::Real, Specifier::Const, ScopeKind::Local);
    let c = table.define_variable("c", Type::Interval, Specifier::Var, ScopeKind::Local);

    assert_eq!(a, SymbolId(0));
    assert_eq!(b, SymbolId(1));
    assert_eq!(c, SymbolId(2));
    assert_eq!(table.len(), 3);
    for id in [a, b, c] {
        assert_eq!(table.lookup(id).unwrap().id(), id);
    }
}

#[test]
fn test_storage_class_follows_scope() {
    let mut table = SymbolTable::new();
    let g = table.define_variable("g", Type::Integer, Specifier::Var, ScopeKind::Global);
    let l = table.define_variable("l", Type::Integer, Specifier::Var, ScopeKind::Local);
    let m = table.define_variable("m", Type::Integer, Specifier::Const, ScopeKind::Method);

    assert_eq!(table.variable(g).unwrap().storage_class(), StorageClass::Global);
    assert_eq!(table.variable(l).unwrap().storage_class(), StorageClass::Local);
    assert_eq!(table.variable(m).unwrap().storage_class(), StorageClass::Local);
}

#[test]
fn test_globals_preserve_definition_order() {
    let mut table = SymbolTable::new();
    table.define_variable("first", Type::Integer, Specifier::Var, ScopeKind::Global);
    table.define_variable("hidden", Type::Integer, Specifier::Var, ScopeKind::Local);
    table.define_method("second", Some(Type::Integer), vec![]);
    table.define_variable("third", Type::Real, Specifier::Const, ScopeKind::Global);

    let names: Vec<&str> = table.globals().map(|s| s.name()).collect();
    assert_eq!(names, vec!["first", "second", "third"]);
}

#[test]
fn test_method_definition() {
    let mut table = SymbolTable::new();
    let id = table.define_method(
        "scale",
        Some(Type::Vector(ScalarType::Real)),
        vec![
            ("v".to_string(), Type::Vector(ScalarType::Real)),
            ("factor".to_string(), Type::Real),
        ],
    );

    let method = table.method(id).unwrap();
    assert_eq!(method.name, "scale");
    assert_eq!(method.params.len(), 2);
    assert_eq!(method.params[0].name, "v");
    assert_eq!(method.params[0].scope, ScopeKind::Method);
    // Parameter symbols are registered in the table too.
    assert!(table.variable(method.params[1].id).is_some());
    // A method id does not resolve as a variable.
    assert!(table.variable(id).is_none());
}

#[test]
fn test_procedure_has_no_return_type() {
    let mut table = SymbolTable::new();
    let id = table.define_method("emit", None, vec![]);
    assert!(table.method(id).unwrap().return_type.is_none());
}

#[test]
fn test_tuple_registry_indices_are_stable() {
    let mut table = SymbolTable::new();
    let first = table.register_tuple(vec![TupleField {
        name: None,
        ty: ScalarType::Integer,
    }]);
    let second = table.register_tuple(vec![
        TupleField {
            name: Some("x".to_string()),
            ty: ScalarType::Real,
        },
        TupleField {
            name: Some("y".to_string()),
            ty: ScalarType::Real,
        },
    ]);

    assert_eq!(first.index, 0);
    assert_eq!(second.index, 1);
    assert_eq!(table.tuples().len(), 2);
    assert_eq!(table.tuple(1).unwrap().fields.len(), 2);
    assert!(table.tuple(2).is_none());
}

#[test]
fn test_builtin_names() {
    assert_eq!(Builtin::from_name("length"), Some(Builtin::Length));
    assert_eq!(Builtin::from_name("rows"), Some(Builtin::Rows));
    assert_eq!(Builtin::from_name("columns"), Some(Builtin::Columns));
    assert_eq!(Builtin::from_name("reverse"), Some(Builtin::Reverse));
    assert_eq!(Builtin::from_name("stream_state"), Some(Builtin::StreamState));
    assert_eq!(Builtin::from_name("main"), None);
}

#[test]
fn test_const_specifier() {
    let mut table = SymbolTable::new();
    let c = table.define_variable("c", Type::Integer, Specifier::Const, ScopeKind::Global);
    let v = table.define_variable("v", Type::Integer, Specifier::Var, ScopeKind::Global);
    assert!(table.variable(c).unwrap().is_const());
    assert!(!table.variable(v).unwrap().is_const());
}
