//! Synthetic members added to classes before assembly.

use tracing::debug;

use crate::class::Format;
use crate::code::Op;
use crate::core;
use crate::error::{CodeError, ResolveError};
use crate::method::MethodStructure;
use crate::param::{Argument, Parameter, Reg};
use crate::pool::TypeId;
use crate::types::FormalType;
use crate::{ClassId, MethodId, Module};

const COMPILE_TYPE: &str = "CompileType";

/// Adds the native static `equals`, `compare` and `hashCode` functions a `Const` class
/// needs, each generic over `CompileType extends <the class>`. Members already present are
/// left alone. Returns whether anything was added.
pub fn synthesize_const_interface(module: &mut Module, class: ClassId) -> Result<bool, ResolveError> {
    let structure = module.classes.class(class);
    if structure.format() != Format::Const
        || ["equals", "compare", "hashCode"]
            .iter()
            .all(|name| !structure.methods_named(name).is_empty())
    {
        return Ok(false);
    }
    let constraint = module.type_system().formal_type(class);
    let mut added = false;
    for (name, arity, returns) in [
        ("equals", 2, TypeId::BOOLEAN),
        ("compare", 2, TypeId::INT),
        ("hashCode", 1, TypeId::INT),
    ] {
        if !module.classes.class(class).methods_named(name).is_empty() {
            continue;
        }
        // The method's own type parameter; its id is the next one the table hands out.
        let next = MethodId(module.classes.method_count() as u32);
        let compile_type = module.pool.formal(FormalType::MethodTypeParam {
            method: next,
            name: COMPILE_TYPE.to_string(),
            index: 0,
        });
        let mut params = vec![Parameter::type_param(COMPILE_TYPE, constraint)];
        params.extend((0..arity).map(|idx| Parameter::value(format!("value{}", idx + 1), compile_type)));
        let method = MethodStructure::new(name, params, vec![Parameter::ret(returns)])?
            .as_static()
            .as_native()
            .as_synthetic();
        let id = module.classes.add_method(class, method)?;
        debug_assert_eq!(id, next);
        added = true;
    }
    if added {
        debug!(class = %module.classes.class(class).qualified_name(), "const interface synthesized");
    }
    Ok(added)
}

/// Adds `estimateStringLength()` and `appendTo(buf)` routed through `toString()` when the
/// class declares `toString()` but no `appendTo`. Returns whether anything was added.
pub fn synthesize_append_to(module: &mut Module, class: ClassId) -> Result<bool, ResolveError> {
    let structure = module.classes.class(class);
    if structure.methods_named("toString").is_empty()
        || !structure.methods_named("appendTo").is_empty()
    {
        return Ok(false);
    }

    let to_string = module.pool.string("toString");
    let size = module.pool.string("size");
    let add_all = module.pool.string("addAll");
    let appender = module.pool.parameterized(core::APPENDER, &[TypeId::CHAR]);

    let estimate = MethodStructure::new("estimateStringLength", vec![], vec![Parameter::ret(TypeId::INT)])?
        .as_synthetic();
    let estimate = module.classes.add_method(class, estimate)?;
    emit(module, estimate, |code| {
        let text = code.declare(TypeId::STRING)?;
        code.add(Op::Invoke {
            target: Argument::This,
            name: to_string,
            args: vec![],
            dsts: vec![text],
        })?;
        let length = code.declare(TypeId::INT)?;
        code.add(Op::PGet {
            target: Argument::Register(text),
            property: size,
            dst: length,
        })?;
        code.add(Op::Return1 {
            value: Argument::Register(length),
        })
    })?;

    let append_to = MethodStructure::new(
        "appendTo",
        vec![Parameter::value("buf", appender)],
        vec![Parameter::ret(appender)],
    )?
    .as_synthetic();
    let append_to = module.classes.add_method(class, append_to)?;
    emit(module, append_to, |code| {
        let text = code.declare(TypeId::STRING)?;
        code.add(Op::Invoke {
            target: Argument::This,
            name: to_string,
            args: vec![],
            dsts: vec![text],
        })?;
        let result = code.declare(appender)?;
        code.add(Op::Invoke {
            target: Argument::Register(Reg(0)),
            name: add_all,
            args: vec![Argument::Register(text)],
            dsts: vec![result],
        })?;
        code.add(Op::Return1 {
            value: Argument::Register(result),
        })
    })?;

    debug!(class = %module.classes.class(class).qualified_name(), "appendTo synthesized");
    Ok(true)
}

fn emit(
    module: &mut Module,
    method: MethodId,
    body: impl FnOnce(&mut crate::code::Code) -> Result<(), CodeError>,
) -> Result<(), ResolveError> {
    let structure = module.classes.method_mut(method)?;
    let name = structure.name().to_string();
    body(structure.code_mut()).map_err(|source| ResolveError::Code {
        method: name,
        source,
    })
}

/// Runs every synthesis pass over the classes a module declares. Core classes are left as
/// bootstrapped. Returns whether any class gained members.
pub fn synthesize_all(module: &mut Module) -> Result<bool, ResolveError> {
    let mut added = false;
    for idx in core::CORE_CLASS_COUNT..module.classes.class_count() as u32 {
        let class = ClassId(idx);
        added |= synthesize_const_interface(module, class)?;
        added |= synthesize_append_to(module, class)?;
    }
    Ok(added)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::{Composition, Contribution};
    use crate::code::AssembleOptions;

    fn point(module: &mut Module) -> ClassId {
        let class = module
            .classes
            .add_class("geo.Point", Format::Const, None)
            .unwrap();
        module
            .classes
            .add_contribution(class, Contribution::new(Composition::Extends, TypeId::OBJECT))
            .unwrap();
        class
    }

    #[test]
    fn const_interface_is_added_once() {
        let mut module = Module::new("test");
        let class = point(&mut module);
        assert!(synthesize_const_interface(&mut module, class).unwrap());
        let count = module.classes.method_count();
        assert!(!synthesize_const_interface(&mut module, class).unwrap());
        assert_eq!(module.classes.method_count(), count);

        let equals = module.classes.class(class).methods_named("equals")[0];
        let method = module.classes.method(equals);
        assert!(method.flags().is_static && method.flags().is_native);
        assert_eq!(method.type_param_count(), 1);
        assert_eq!(method.params()[0].name, "CompileType");
        assert_eq!(method.value_arity(), 2);
    }

    #[test]
    fn non_const_classes_are_skipped() {
        let mut module = Module::new("test");
        let class = module
            .classes
            .add_class("Plain", Format::Class, None)
            .unwrap();
        assert!(!synthesize_const_interface(&mut module, class).unwrap());
    }

    #[test]
    fn append_to_routes_through_to_string() {
        let mut module = Module::new("test");
        let class = point(&mut module);
        let to_string = MethodStructure::new("toString", vec![], vec![Parameter::ret(TypeId::STRING)])
            .unwrap()
            .as_native();
        module.classes.add_method(class, to_string).unwrap();

        assert!(synthesize_append_to(&mut module, class).unwrap());
        assert!(!synthesize_append_to(&mut module, class).unwrap());

        let append_to = module.classes.class(class).methods_named("appendTo")[0];
        let code = module
            .ensure_assembled(append_to, &AssembleOptions::default())
            .unwrap();
        assert!(matches!(code.ops.last().map(|op| &op.op), Some(Op::Return1 { .. })));
        assert_eq!(code.max_vars, 3);
    }

    #[test]
    fn emitting_into_assembled_code_names_the_method() {
        let mut module = Module::new("test");
        let class = point(&mut module);
        let describe = MethodStructure::new("describe", vec![], vec![]).unwrap().as_native();
        let describe = module.classes.add_method(class, describe).unwrap();
        module
            .ensure_assembled(describe, &AssembleOptions::default())
            .unwrap();

        let err = emit(&mut module, describe, |code| code.declare(TypeId::INT).map(|_| ()))
            .unwrap_err();
        assert_eq!(
            err,
            ResolveError::Code {
                method: "describe".to_string(),
                source: CodeError::NotAppendable,
            }
        );
        assert_eq!(
            emit(&mut module, MethodId(99), |_| Ok(())),
            Err(ResolveError::UnknownMethod(MethodId(99)))
        );
    }

    #[test]
    fn frozen_classes_are_not_synthesized_into() {
        let mut module = Module::new("test");
        let class = point(&mut module);
        module.classes.freeze(class);
        assert_eq!(
            synthesize_all(&mut module),
            Err(ResolveError::Frozen(class))
        );
    }

    #[test]
    fn classes_without_to_string_get_nothing() {
        let mut module = Module::new("test");
        let class = point(&mut module);
        assert!(!synthesize_append_to(&mut module, class).unwrap());
    }
}
