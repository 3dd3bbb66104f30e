use crate::pool::{ConstId, TypeId};

/// A register index within a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Reg(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ParamKind {
    TypeParam,
    Value,
    Return,
}

/// A method parameter or return value.
///
/// For a type parameter `ty` is its constraint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Parameter {
    pub name: String,
    pub ty: TypeId,
    pub index: u32,
    pub kind: ParamKind,
    pub default: Option<ConstId>,
}

impl Parameter {
    pub fn value(name: impl Into<String>, ty: TypeId) -> Self {
        Self {
            name: name.into(),
            ty,
            index: 0,
            kind: ParamKind::Value,
            default: None,
        }
    }

    pub fn type_param(name: impl Into<String>, constraint: TypeId) -> Self {
        Self {
            name: name.into(),
            ty: constraint,
            index: 0,
            kind: ParamKind::TypeParam,
            default: None,
        }
    }

    pub fn ret(ty: TypeId) -> Self {
        Self {
            name: String::new(),
            ty,
            index: 0,
            kind: ParamKind::Return,
            default: None,
        }
    }

    pub fn with_default(mut self, value: ConstId) -> Self {
        self.default = Some(value);
        self
    }
}

/// An op operand: a register, a pool constant, or the frame's `this`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Argument {
    Register(Reg),
    Constant(ConstId),
    This,
}

impl Argument {
    pub fn register(self) -> Option<Reg> {
        match self {
            Argument::Register(reg) => Some(reg),
            _ => None,
        }
    }
}

impl From<Reg> for Argument {
    fn from(reg: Reg) -> Self {
        Argument::Register(reg)
    }
}

impl From<ConstId> for Argument {
    fn from(id: ConstId) -> Self {
        Argument::Constant(id)
    }
}
