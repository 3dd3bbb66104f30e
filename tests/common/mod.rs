#![allow(dead_code)]

use ember_asm::{
    ClassId, Code, CodeError, Composition, ConstantPool, Contribution, Format, FormalType,
    MethodId, MethodStructure, Module, Parameter, TypeId,
};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Declares a top-level class extending `Object`.
pub fn class(module: &mut Module, name: &str, format: Format) -> ClassId {
    let class = module
        .classes
        .add_class(name, format, None)
        .expect("declare class");
    extend(module, class, TypeId::OBJECT);
    class
}

pub fn extend(module: &mut Module, class: ClassId, base: TypeId) {
    module
        .classes
        .add_contribution(class, Contribution::new(Composition::Extends, base))
        .expect("add contribution");
}

/// Declares `name<T extends Object>` and returns it with the type of `T`.
pub fn generic_class(module: &mut Module, name: &str) -> (ClassId, TypeId) {
    let class = class(module, name, Format::Class);
    module
        .classes
        .add_type_param(class, "T", TypeId::OBJECT)
        .expect("add type param");
    let t = module.pool.formal(FormalType::TypeParam {
        class,
        name: "T".to_string(),
        index: 0,
    });
    (class, t)
}

/// Adds `method` to `class` and emits its body.
pub fn method(
    module: &mut Module,
    class: ClassId,
    method: MethodStructure,
    body: impl FnOnce(&mut Code, &mut ConstantPool) -> Result<(), CodeError>,
) -> MethodId {
    let id = module.classes.add_method(class, method).expect("add method");
    let code = module
        .classes
        .method_mut(id)
        .expect("method just added")
        .code_mut();
    body(code, &mut module.pool).expect("emit body");
    id
}

/// A method signature with value parameters `p0..` of the given types.
pub fn signature(name: &str, params: &[TypeId], returns: &[TypeId]) -> MethodStructure {
    let params = params
        .iter()
        .enumerate()
        .map(|(idx, ty)| Parameter::value(format!("p{idx}"), *ty))
        .collect();
    let returns = returns.iter().map(|ty| Parameter::ret(*ty)).collect();
    MethodStructure::new(name, params, returns).expect("valid parameters")
}
