use ember_asm::{ClassId, CodeError, MethodId, ResolveError};
use thiserror::Error;

/// Errors returned by the runtime API.
///
/// Failures of the running program are in-language exceptions and reach the embedder as
/// [`crate::Outcome::Threw`]; these errors mean the runtime itself cannot continue.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VmError {
    #[error("invalid runtime state: {message}")]
    InvalidState { message: String },

    #[error(transparent)]
    Assemble(#[from] CodeError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("unknown method id {0:?}")]
    UnknownMethod(MethodId),

    #[error("no method `{name}` taking {arity} argument(s) on class {class:?}")]
    NoSuchMethod {
        class: ClassId,
        name: String,
        arity: usize,
    },

    #[error("constant #{0} cannot be used as a runtime value")]
    UnsupportedConstant(u32),

    #[error("scheduler stalled with {parked} parked fiber(s) and no pending messages")]
    Deadlock { parked: usize },
}
