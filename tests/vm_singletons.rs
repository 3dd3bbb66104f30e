mod common;

use common::{class, method, signature};
use ember_asm::{
    core, Argument, ClassId, Format, MethodId, MethodStructure, Module, Op, Parameter,
    PropertyStructure, Reg, TypeId,
};
use ember_vm::{Runtime, Value};

/// A static method on `owner` returning the singleton `target`.
fn add_reader(module: &mut Module, owner: ClassId, target: ClassId) -> MethodId {
    let sig = signature("read", &[], &[TypeId::OBJECT]).as_static();
    method(module, owner, sig, |code, pool| {
        let singleton = pool.singleton(target);
        code.add(Op::Return1 {
            value: Argument::Constant(singleton),
        })
    })
}

/// A constructor on `class` that touches the singleton `other` before returning.
fn add_constructor_touching(module: &mut Module, class: ClassId, other: ClassId) {
    method(module, class, signature("construct", &[], &[]), |code, pool| {
        let singleton = pool.singleton(other);
        let seen = code.declare(TypeId::OBJECT)?;
        code.add(Op::Move {
            src: Argument::Constant(singleton),
            dst: seen,
        })?;
        code.add(Op::Return0)
    });
}

#[test]
fn singletons_are_constructed_before_first_use() {
    common::init_tracing();
    let mut module = Module::new("test");
    let settings = class(&mut module, "Settings", Format::Module);
    module
        .classes
        .add_property(settings, PropertyStructure::new("level", TypeId::INT))
        .expect("add property");
    method(&mut module, settings, signature("construct", &[], &[]), |code, pool| {
        let level = pool.string("level");
        let seven = pool.int(7);
        code.add(Op::PSet {
            target: Argument::This,
            property: level,
            value: Argument::Constant(seven),
        })?;
        code.add(Op::Return0)
    });
    let app = class(&mut module, "App", Format::Class);
    let sig = signature("level", &[], &[TypeId::INT]).as_static();
    let level = method(&mut module, app, sig, |code, pool| {
        let singleton = pool.singleton(settings);
        let name = pool.string("level");
        let value = code.declare(TypeId::INT)?;
        code.add(Op::PGet {
            target: Argument::Constant(singleton),
            property: name,
            dst: value,
        })?;
        code.add(Op::Return1 {
            value: value.into(),
        })
    });
    let mut runtime = Runtime::new(module).expect("load");
    assert!(runtime.singleton(settings).is_none());

    let outcome = runtime.call(level, Value::Null, vec![]).expect("run");
    assert_eq!(outcome.value(), Some(&Value::Int(7)));
    let instance = runtime.singleton(settings).cloned().expect("initialized");
    assert_eq!(instance.class(), settings);

    // Later uses see the same instance.
    let outcome = runtime.call(level, Value::Null, vec![]).expect("run");
    assert_eq!(outcome.value(), Some(&Value::Int(7)));
    assert_eq!(runtime.singleton(settings), Some(&instance));
}

#[test]
fn reentrant_initialization_is_circular() {
    let mut module = Module::new("test");
    let a = class(&mut module, "A", Format::Module);
    let b = class(&mut module, "B", Format::Module);
    add_constructor_touching(&mut module, a, b);
    add_constructor_touching(&mut module, b, a);
    let app = class(&mut module, "App", Format::Class);
    let read = add_reader(&mut module, app, a);
    let mut runtime = Runtime::new(module).expect("load");

    let outcome = runtime.call(read, Value::Null, vec![]).expect("run");
    let exception = outcome.exception().expect("an exception");
    assert_eq!(exception.class(), core::ILLEGAL_STATE);
    assert_eq!(exception.message().as_deref(), Some("Circular initialization"));
    assert!(runtime.singleton(a).is_none());
    assert!(runtime.singleton(b).is_none());
}

#[test]
fn self_reference_in_a_constructor_is_circular() {
    let mut module = Module::new("test");
    let lonely = class(&mut module, "Lonely", Format::Module);
    add_constructor_touching(&mut module, lonely, lonely);
    let app = class(&mut module, "App", Format::Class);
    let read = add_reader(&mut module, app, lonely);
    let mut runtime = Runtime::new(module).expect("load");

    let outcome = runtime.call(read, Value::Null, vec![]).expect("run");
    assert_eq!(
        outcome.exception().and_then(Value::message).as_deref(),
        Some("Circular initialization")
    );
}

#[test]
fn failed_initialization_is_retried_on_next_use() {
    let mut module = Module::new("test");
    let broken = class(&mut module, "Broken", Format::Module);
    method(&mut module, broken, signature("construct", &[], &[]), |code, pool| {
        let message = pool.string("no configuration");
        let exception = code.declare(TypeId::EXCEPTION)?;
        code.add(Op::New {
            class: core::ILLEGAL_STATE,
            args: vec![Argument::Constant(message)],
            dst: exception,
        })?;
        code.add(Op::Throw {
            value: exception.into(),
        })
    });
    let app = class(&mut module, "App", Format::Class);
    let read = add_reader(&mut module, app, broken);
    let mut runtime = Runtime::new(module).expect("load");

    for _ in 0..2 {
        let outcome = runtime.call(read, Value::Null, vec![]).expect("run");
        let exception = outcome.exception().expect("an exception");
        assert_eq!(exception.class(), core::ILLEGAL_STATE);
        assert_eq!(exception.message().as_deref(), Some("no configuration"));
        assert!(runtime.singleton(broken).is_none());
    }
}

#[test]
fn singletons_inside_array_constants_are_initialized() {
    let mut module = Module::new("test");
    let settings = class(&mut module, "Settings", Format::Module);
    let app = class(&mut module, "App", Format::Class);
    let sig = signature("all", &[], &[TypeId::OBJECT]).as_static();
    let all = method(&mut module, app, sig, |code, pool| {
        let singleton = pool.singleton(settings);
        let one = pool.int(1);
        let array = pool.array(TypeId::OBJECT, vec![one, singleton]);
        code.add(Op::Return1 {
            value: Argument::Constant(array),
        })
    });
    let mut runtime = Runtime::new(module).expect("load");

    let outcome = runtime.call(all, Value::Null, vec![]).expect("run");
    let instance = runtime.singleton(settings).cloned().expect("initialized");
    let Some(Value::Array(items)) = outcome.value() else {
        panic!("expected an array, got {outcome:?}");
    };
    assert_eq!(*items.borrow(), vec![Value::Int(1), instance]);
}

#[test]
fn parameter_defaults_initialize_their_singletons() {
    common::init_tracing();
    let mut module = Module::new("test");
    let settings = class(&mut module, "Settings", Format::Module);
    let app = class(&mut module, "App", Format::Class);
    let default = module.pool.singleton(settings);
    let params = vec![Parameter::value("settings", TypeId::OBJECT).with_default(default)];
    let sig = MethodStructure::new("choose", params, vec![Parameter::ret(TypeId::OBJECT)])
        .expect("valid parameters")
        .as_static();
    let choose = method(&mut module, app, sig, |code, _| {
        code.add(Op::Return1 {
            value: Argument::Register(Reg(0)),
        })
    });
    let mut runtime = Runtime::new(module).expect("load");

    let outcome = runtime.call(choose, Value::Null, vec![]).expect("run");
    let instance = runtime.singleton(settings).cloned().expect("initialized");
    assert_eq!(outcome.value(), Some(&instance));

    // An explicit argument still wins.
    let outcome = runtime
        .call(choose, Value::Null, vec![Value::Int(3)])
        .expect("run");
    assert_eq!(outcome.value(), Some(&Value::Int(3)));
}

#[test]
fn property_initials_initialize_their_singletons() {
    let mut module = Module::new("test");
    let settings = class(&mut module, "Settings", Format::Module);
    let holder = class(&mut module, "Holder", Format::Class);
    let initial = module.pool.singleton(settings);
    module
        .classes
        .add_property(
            holder,
            PropertyStructure::new("settings", TypeId::OBJECT).with_initial(initial),
        )
        .expect("add property");
    let mut runtime = Runtime::new(module).expect("load");

    let outcome = runtime.instantiate(holder, vec![]).expect("instantiate");
    let instance = runtime.singleton(settings).cloned().expect("initialized");
    let Some(Value::Object(object)) = outcome.value() else {
        panic!("expected an instance, got {outcome:?}");
    };
    assert_eq!(object.borrow().fields.get("settings"), Some(&instance));

    // A positional argument replaces the initial value.
    let outcome = runtime
        .instantiate(holder, vec![Value::Int(1)])
        .expect("instantiate");
    let Some(Value::Object(object)) = outcome.value() else {
        panic!("expected an instance, got {outcome:?}");
    };
    assert_eq!(object.borrow().fields.get("settings"), Some(&Value::Int(1)));
}

#[test]
fn a_singleton_initial_naming_itself_is_circular() {
    let mut module = Module::new("test");
    let settings = class(&mut module, "Settings", Format::Module);
    let me = module.pool.singleton(settings);
    module
        .classes
        .add_property(
            settings,
            PropertyStructure::new("me", TypeId::OBJECT).with_initial(me),
        )
        .expect("add property");
    let app = class(&mut module, "App", Format::Class);
    let read = add_reader(&mut module, app, settings);
    let mut runtime = Runtime::new(module).expect("load");

    let outcome = runtime.call(read, Value::Null, vec![]).expect("run");
    let exception = outcome.exception().expect("an exception");
    assert_eq!(exception.class(), core::ILLEGAL_STATE);
    assert!(runtime.singleton(settings).is_none());
}
