use crate::class::{Composition, Format};
use crate::code::{Code, CodeOp, Op};
use crate::core;
use crate::error::VerifyError;
use crate::method::check_parameters;
use crate::pool::ConstId;
use crate::types::TypeConstant;
use crate::Module;

/// Checks the structural rules the class table itself does not enforce.
///
/// Reports the first violation found, scanning classes and then methods in id order.
pub fn verify_module(module: &Module) -> Result<(), VerifyError> {
    let pool = &module.pool;
    for class in module.classes.classes() {
        let name = || class.qualified_name().to_string();
        let extends = class
            .contributions()
            .iter()
            .filter(|c| c.composition == Composition::Extends)
            .count();
        match class.format() {
            Format::Interface if extends > 0 => {
                return Err(VerifyError::InterfaceExtends { class: name() });
            }
            format if format.requires_extends() && class.id() != core::OBJECT && extends != 1 => {
                return Err(VerifyError::ExtendsCount {
                    class: name(),
                    count: extends,
                });
            }
            _ => {}
        }

        for contribution in class.contributions() {
            if contribution.composition == Composition::Into && class.format() != Format::Mixin {
                return Err(VerifyError::IntoOnNonMixin { class: name() });
            }
            if let TypeConstant::Unresolved(unresolved) = pool.ty(contribution.ty) {
                return Err(VerifyError::UnresolvedContribution {
                    class: name(),
                    name: unresolved.clone(),
                });
            }
        }
    }

    for method in module.classes.methods() {
        check_parameters(method.name(), method.params()).map_err(|message| {
            VerifyError::Parameters {
                method: method.name().to_string(),
                message,
            }
        })?;
        let ops: &[CodeOp] = match method.code() {
            Code::Building(builder) => builder.ops(),
            Code::Assembled(code) => &code.ops,
            Code::Suppressed => &[],
        };
        for op in ops {
            check_references(module, &op.op)?;
        }
    }
    Ok(())
}

fn check_references(module: &Module, op: &Op) -> Result<(), VerifyError> {
    for constant in op.constants() {
        check_constant(module, constant)?;
    }
    match op {
        Op::Call { method, .. } if module.classes.get_method(*method).is_none() => {
            Err(VerifyError::Dangling {
                kind: "method",
                index: method.0,
            })
        }
        Op::New { class, .. } if module.classes.get_class(*class).is_none() => {
            Err(VerifyError::Dangling {
                kind: "class",
                index: class.0,
            })
        }
        _ => Ok(()),
    }
}

fn check_constant(module: &Module, id: ConstId) -> Result<(), VerifyError> {
    if module.pool.get(id).is_none() {
        return Err(VerifyError::Dangling {
            kind: "constant",
            index: id.0,
        });
    }
    Ok(())
}
