#![forbid(unsafe_code)]

/// Constant pool, type constants, classes, methods and their assembled code.
pub use ember_asm as asm;

/// Service contexts, fibers and frames executing assembled methods.
pub use ember_vm as vm;

pub use ember_asm::{ClassId, MethodId, Module};
pub use ember_vm::{Outcome, Runtime, RuntimeConfig, Value, VmError};

/// Assembles `module` with the default options and loads it into a runtime.
pub fn load(module: Module) -> Result<Runtime, VmError> {
    Runtime::new(module)
}
