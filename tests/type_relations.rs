mod common;

use common::{class, extend, generic_class, signature};
use ember_asm::{ClassId, Format, Module, Relation, TypeId};

/// `Box<T>` with a native getter, setter, or both.
fn boxed(module: &mut Module, get: bool, set: bool) -> ClassId {
    let (class, t) = generic_class(module, "Box");
    if get {
        module
            .classes
            .add_method(class, signature("get", &[], &[t]).as_native())
            .expect("add get");
    }
    if set {
        module
            .classes
            .add_method(class, signature("set", &[t], &[]).as_native())
            .expect("add set");
    }
    class
}

#[test]
fn producer_only_box_is_covariant() {
    common::init_tracing();
    let mut module = Module::new("test");
    let class = boxed(&mut module, true, false);
    let of_string = module.pool.parameterized(class, &[TypeId::STRING]);
    let of_object = module.pool.parameterized(class, &[TypeId::OBJECT]);

    let mut ts = module.type_system();
    assert_eq!(ts.calculate_relation(of_object, of_string), Relation::IsA);
    assert_eq!(ts.calculate_relation(of_string, of_object), Relation::Incompatible);
}

#[test]
fn consumer_only_box_needs_congruent_types() {
    let mut module = Module::new("test");
    let class = boxed(&mut module, false, true);
    let of_string = module.pool.parameterized(class, &[TypeId::STRING]);
    let of_object = module.pool.parameterized(class, &[TypeId::OBJECT]);

    let mut ts = module.type_system();
    assert_eq!(ts.calculate_relation(of_string, of_object), Relation::Incompatible);
    assert_eq!(ts.calculate_relation(of_object, of_string), Relation::Incompatible);
    assert_eq!(ts.calculate_relation(of_string, of_string), Relation::IsA);
}

#[test]
fn producing_and_consuming_box_is_weak() {
    let mut module = Module::new("test");
    let class = boxed(&mut module, true, true);
    let of_string = module.pool.parameterized(class, &[TypeId::STRING]);
    let of_object = module.pool.parameterized(class, &[TypeId::OBJECT]);

    let mut ts = module.type_system();
    assert_eq!(ts.calculate_relation(of_object, of_string), Relation::IsAWeak);
    assert_eq!(ts.calculate_relation(of_string, of_object), Relation::Incompatible);
}

#[test]
fn identical_parameter_lists_are_reflexive() {
    let mut module = Module::new("test");
    let class = boxed(&mut module, true, true);
    let mut ts = module.type_system();
    for params in [&[][..], &[TypeId::STRING][..], &[TypeId::INT][..]] {
        assert_eq!(ts.calculate_assignability(class, params, params), Relation::IsA);
    }
}

#[test]
fn producer_only_generics_are_never_weak() {
    let mut module = Module::new("test");
    let class = boxed(&mut module, true, false);
    let mut ts = module.type_system();
    for (left, right) in [
        (TypeId::OBJECT, TypeId::STRING),
        (TypeId::STRING, TypeId::OBJECT),
        (TypeId::INT, TypeId::STRING),
        (TypeId::INT, TypeId::INT),
    ] {
        let relation = ts.calculate_assignability(class, &[left], &[right]);
        assert_ne!(relation, Relation::IsAWeak, "{left:?} <- {right:?}");
    }
}

#[test]
fn subclass_reaches_the_box_through_its_contribution() {
    let mut module = Module::new("test");
    let boxed = boxed(&mut module, true, false);
    let of_string = module.pool.parameterized(boxed, &[TypeId::STRING]);
    let of_object = module.pool.parameterized(boxed, &[TypeId::OBJECT]);
    let labelled = module
        .classes
        .add_class("Labelled", Format::Class, None)
        .expect("declare class");
    extend(&mut module, labelled, of_string);
    let labelled = module.pool.class_type(labelled);

    let mut ts = module.type_system();
    assert_eq!(ts.calculate_relation(of_object, labelled), Relation::IsA);
    assert_eq!(ts.calculate_relation(labelled, of_object), Relation::Incompatible);
}

#[test]
fn object_accepts_every_user_type() {
    let mut module = Module::new("test");
    let point = class(&mut module, "Point", Format::Const);
    let boxed = boxed(&mut module, true, true);
    let point = module.pool.class_type(point);
    let of_point = module.pool.parameterized(boxed, &[point]);

    let mut ts = module.type_system();
    for ty in [point, of_point] {
        assert_eq!(ts.calculate_relation(TypeId::OBJECT, ty), Relation::IsA);
        assert_eq!(ts.calculate_relation(ty, TypeId::OBJECT), Relation::Incompatible);
    }
}
