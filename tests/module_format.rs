mod common;

use common::{class, method, signature};
use ember_asm::{Argument, Format, Module, Op, Parameter, PropertyStructure, Reg, TypeId};
use ember_vm::{Runtime, Value};

/// `Shapes.area(w, h = 3)` and a `Unit` singleton holding the default scale.
fn shapes() -> Module {
    let mut module = Module::new("shapes");
    let unit = class(&mut module, "Unit", Format::Module);
    let one = module.pool.int(1);
    module
        .classes
        .add_property(
            unit,
            PropertyStructure::new("scale", TypeId::INT).with_initial(one),
        )
        .expect("add property");

    let shapes = class(&mut module, "Shapes", Format::Class);
    let three = module.pool.int(3);
    let sig = ember_asm::MethodStructure::new(
        "area",
        vec![
            Parameter::value("w", TypeId::INT),
            Parameter::value("h", TypeId::INT).with_default(three),
        ],
        vec![Parameter::ret(TypeId::INT)],
    )
    .expect("valid parameters")
    .as_static();
    method(&mut module, shapes, sig, |code, pool| {
        let singleton = pool.singleton(unit);
        let scale_name = pool.string("scale");
        code.add(Op::Line { delta: 1 })?;
        let scale = code.declare(TypeId::INT)?;
        code.add(Op::PGet {
            target: Argument::Constant(singleton),
            property: scale_name,
            dst: scale,
        })?;
        code.add(Op::Line { delta: 1 })?;
        let area = code.declare(TypeId::INT)?;
        code.add(Op::Mul {
            a: Argument::Register(Reg(0)),
            b: Argument::Register(Reg(1)),
            dst: area,
        })?;
        code.add(Op::Mul {
            a: area.into(),
            b: scale.into(),
            dst: area,
        })?;
        code.add(Op::Return1 { value: area.into() })
    });
    module
}

#[test]
fn decoded_modules_encode_to_the_same_bytes() {
    common::init_tracing();
    let mut module = shapes();
    let bytes = module.to_bytes().expect("encode");
    let mut decoded = Module::from_bytes(&bytes).expect("decode");
    assert_eq!(decoded.name, "shapes");
    assert_eq!(decoded.class_id("Shapes"), module.class_id("Shapes"));
    assert_eq!(decoded.to_bytes().expect("encode"), bytes);
}

#[test]
fn decoded_modules_run_like_the_original() {
    let mut module = shapes();
    let bytes = module.to_bytes().expect("encode");
    let shapes = module.class_id("Shapes").expect("declared");
    let area = module.classes.class(shapes).methods_named("area")[0];

    let mut original = Runtime::new(module).expect("load");
    let mut decoded = Runtime::new(Module::from_bytes(&bytes).expect("decode")).expect("load");
    for runtime in [&mut original, &mut decoded] {
        let outcome = runtime.call(area, Value::Null, vec![Value::Int(4)]).expect("run");
        assert_eq!(outcome.value(), Some(&Value::Int(12)));
        let outcome = runtime
            .call(area, Value::Null, vec![Value::Int(4), Value::Int(5)])
            .expect("run");
        assert_eq!(outcome.value(), Some(&Value::Int(20)));
        let outcome = runtime.call(area, Value::Null, vec![]).expect("run");
        assert!(outcome.exception().is_some());
    }
}
