use thiserror::Error;

use crate::{ClassId, MethodId};

/// Errors raised while building or assembling a method's [`crate::Code`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodeError {
    #[error("method `{method}` has no code and is neither native nor abstract")]
    EmptyCode { method: String },

    #[error("code is already assembled and not appendable")]
    NotAppendable,

    #[error("label {label} is never placed")]
    UnplacedLabel { label: u32 },

    #[error("label {label} is placed twice")]
    LabelPlacedTwice { label: u32 },

    #[error("op {index} branches to {target}, outside of 0..{len}")]
    BranchOutOfRange { index: usize, target: i64, len: usize },

    #[error("unbalanced scope exit at op {index}")]
    UnbalancedExit { index: usize },

    #[error("unknown method id {0:?}")]
    UnknownMethod(MethodId),

    #[error("class {0:?} is frozen")]
    Frozen(ClassId),
}

/// Errors raised by name and contribution resolution when a lookup cannot be deferred.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("unknown class `{0}`")]
    UnknownClass(String),

    #[error("class {0:?} is frozen")]
    Frozen(ClassId),

    #[error("unknown method id {0:?}")]
    UnknownMethod(MethodId),

    #[error("duplicate member `{name}` in class `{class}`")]
    DuplicateMember { class: String, name: String },

    #[error("duplicate type parameter `{name}` in class `{class}`")]
    DuplicateTypeParam { class: String, name: String },

    #[error("invalid parameter list for `{method}`: {message}")]
    InvalidParameters { method: String, message: String },

    #[error("unresolved identity constant `{0}` used as a defining constant")]
    UnresolvedIdentity(String),

    #[error("building `{method}` failed: {source}")]
    Code {
        method: String,
        #[source]
        source: CodeError,
    },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error("method `{0}` is not assembled")]
    NotAssembled(String),

    #[error("{0} overflows the encodable range")]
    Overflow(&'static str),

    #[error(transparent)]
    Code(#[from] CodeError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("decode error at byte {offset}: {message}")]
pub struct DecodeError {
    pub message: String,
    pub offset: usize,
}

/// Structural rule violations reported by [`crate::verify::verify_module`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VerifyError {
    #[error("class `{class}` must extend exactly one class, found {count}")]
    ExtendsCount { class: String, count: usize },

    #[error("class `{class}` is an interface and cannot extend a class")]
    InterfaceExtends { class: String },

    #[error("class `{class}` uses `into` but is not a mixin")]
    IntoOnNonMixin { class: String },

    #[error("method `{method}`: {message}")]
    Parameters { method: String, message: String },

    #[error("class `{class}` has an unresolved contribution `{name}`")]
    UnresolvedContribution { class: String, name: String },

    #[error("invalid {kind} reference {index}")]
    Dangling { kind: &'static str, index: u32 },
}
