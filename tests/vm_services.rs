mod common;

use common::{class, method, signature};
use ember_asm::{
    core, Argument, ClassId, Format, MethodId, Module, Op, PropertyStructure, Reg, TypeId,
};
use ember_vm::{Runtime, Value};

/// A `Counter` service with a `count` field and `increment(by)`.
fn add_counter(module: &mut Module) -> ClassId {
    let counter = class(module, "Counter", Format::Service);
    let zero = module.pool.int(0);
    module
        .classes
        .add_property(
            counter,
            PropertyStructure::new("count", TypeId::INT).with_initial(zero),
        )
        .expect("add property");
    let sig = signature("increment", &[TypeId::INT], &[TypeId::INT]);
    method(module, counter, sig, |code, pool| {
        let count = pool.string("count");
        let value = code.declare(TypeId::INT)?;
        code.add(Op::PGet {
            target: Argument::This,
            property: count,
            dst: value,
        })?;
        code.add(Op::Add {
            a: value.into(),
            b: Argument::Register(Reg(0)),
            dst: value,
        })?;
        code.add(Op::PSet {
            target: Argument::This,
            property: count,
            value: value.into(),
        })?;
        code.add(Op::Return1 {
            value: value.into(),
        })
    });
    counter
}

fn new_service(runtime: &mut Runtime, class: ClassId) -> Value {
    let outcome = runtime.instantiate(class, vec![]).expect("instantiate");
    outcome.value().cloned().expect("a service")
}

#[test]
fn services_run_in_their_own_context() {
    common::init_tracing();
    let mut module = Module::new("test");
    let counter = add_counter(&mut module);
    let mut runtime = Runtime::new(module).expect("load");
    assert_eq!(runtime.context_count(), 1);

    let service = new_service(&mut runtime, counter);
    assert!(matches!(service, Value::Service(_)));
    assert_eq!(runtime.context_count(), 2);

    let outcome = runtime
        .invoke(service.clone(), "increment", vec![Value::Int(5)])
        .expect("run");
    assert_eq!(outcome.value(), Some(&Value::Int(5)));
    let outcome = runtime
        .invoke(service, "increment", vec![Value::Int(2)])
        .expect("run");
    assert_eq!(outcome.value(), Some(&Value::Int(7)));
}

#[test]
fn bytecode_waits_for_service_replies() {
    let mut module = Module::new("test");
    let counter = add_counter(&mut module);
    let app = class(&mut module, "App", Format::Class);
    let sig = signature("bump", &[TypeId::OBJECT], &[TypeId::INT]).as_static();
    let bump = method(&mut module, app, sig, |code, pool| {
        let increment = pool.string("increment");
        let count = pool.string("count");
        let one = pool.int(1);
        let ignored = code.declare(TypeId::INT)?;
        for _ in 0..2 {
            code.add(Op::Invoke {
                target: Argument::Register(Reg(0)),
                name: increment,
                args: vec![Argument::Constant(one)],
                dsts: vec![ignored],
            })?;
        }
        let total = code.declare(TypeId::INT)?;
        code.add(Op::PGet {
            target: Argument::Register(Reg(0)),
            property: count,
            dst: total,
        })?;
        code.add(Op::Return1 {
            value: total.into(),
        })
    });
    let mut runtime = Runtime::new(module).expect("load");

    let service = new_service(&mut runtime, counter);
    let outcome = runtime.call(bump, Value::Null, vec![service]).expect("run");
    assert_eq!(outcome.value(), Some(&Value::Int(2)));
}

#[test]
fn foreign_services_refuse_property_writes() {
    let mut module = Module::new("test");
    let counter = add_counter(&mut module);
    let app = class(&mut module, "App", Format::Class);
    let sig = signature("poke", &[TypeId::OBJECT], &[]).as_static();
    let poke = method(&mut module, app, sig, |code, pool| {
        let count = pool.string("count");
        let nine = pool.int(9);
        code.add(Op::PSet {
            target: Argument::Register(Reg(0)),
            property: count,
            value: Argument::Constant(nine),
        })?;
        code.add(Op::Return0)
    });
    let mut runtime = Runtime::new(module).expect("load");

    let service = new_service(&mut runtime, counter);
    let outcome = runtime.call(poke, Value::Null, vec![service]).expect("run");
    let exception = outcome.exception().expect("an exception");
    assert_eq!(exception.class(), core::ILLEGAL_STATE);
}

#[test]
fn service_exceptions_travel_back_to_the_caller() {
    let mut module = Module::new("test");
    let counter = add_counter(&mut module);
    let mut runtime = Runtime::new(module).expect("load");

    let service = new_service(&mut runtime, counter);
    let outcome = runtime
        .invoke(service.clone(), "increment", vec![Value::Int(i64::MAX)])
        .expect("run");
    assert_eq!(outcome.value(), Some(&Value::Int(i64::MAX)));
    let outcome = runtime
        .invoke(service, "increment", vec![Value::Int(1)])
        .expect("run");
    let exception = outcome.exception().expect("an exception");
    assert_eq!(exception.class(), core::OVERFLOW);
}

/// A singleton first touched inside a service is still initialized by main.
#[test]
fn services_ask_main_for_singletons() {
    let mut module = Module::new("test");
    let settings = class(&mut module, "Settings", Format::Module);
    let ten = module.pool.int(10);
    module
        .classes
        .add_property(
            settings,
            PropertyStructure::new("limit", TypeId::INT).with_initial(ten),
        )
        .expect("add property");
    let counter = add_counter(&mut module);
    let limit: MethodId = method(
        &mut module,
        counter,
        signature("limit", &[], &[TypeId::INT]),
        |code, pool| {
            let singleton = pool.singleton(settings);
            let name = pool.string("limit");
            let value = code.declare(TypeId::INT)?;
            code.add(Op::PGet {
                target: Argument::Constant(singleton),
                property: name,
                dst: value,
            })?;
            code.add(Op::Return1 {
                value: value.into(),
            })
        },
    );
    let mut runtime = Runtime::new(module).expect("load");
    assert_eq!(runtime.module().classes.method(limit).name(), "limit");

    let service = new_service(&mut runtime, counter);
    let outcome = runtime.invoke(service, "limit", vec![]).expect("run");
    assert_eq!(outcome.value(), Some(&Value::Int(10)));
    assert!(runtime.singleton(settings).is_some());
}
