use tracing::trace;

use crate::code::{AssembleOptions, AssembledCode, Code};
use crate::error::{CodeError, ResolveError};
use crate::param::{ParamKind, Parameter};
use crate::pool::{ConstId, ConstantPool, SignatureConstant, TypeId};
use crate::types::Access;
use crate::{ClassId, MethodId};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Annotation {
    pub class: ClassId,
    pub args: Vec<ConstId>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MethodFlags {
    pub is_static: bool,
    pub is_native: bool,
    pub is_abstract: bool,
    pub is_synthetic: bool,
}

impl MethodFlags {
    pub(crate) fn bits(self) -> u8 {
        (self.is_static as u8)
            | (self.is_native as u8) << 1
            | (self.is_abstract as u8) << 2
            | (self.is_synthetic as u8) << 3
    }

    pub(crate) fn from_bits(bits: u8) -> Self {
        Self {
            is_static: bits & 1 != 0,
            is_native: bits & 2 != 0,
            is_abstract: bits & 4 != 0,
            is_synthetic: bits & 8 != 0,
        }
    }
}

#[derive(Clone, Debug)]
pub struct MethodStructure {
    pub(crate) id: MethodId,
    pub(crate) class: ClassId,
    pub(crate) name: String,
    pub(crate) access: Access,
    pub(crate) flags: MethodFlags,
    pub(crate) annotations: Vec<Annotation>,
    pub(crate) params: Vec<Parameter>,
    pub(crate) returns: Vec<Parameter>,
    pub(crate) code: Code,
}

impl MethodStructure {
    /// Creates a method, validating the parameter layout: type parameters form a prefix and
    /// parameters with defaults form a contiguous suffix.
    pub fn new(
        name: impl Into<String>,
        params: Vec<Parameter>,
        returns: Vec<Parameter>,
    ) -> Result<Self, ResolveError> {
        let name = name.into();
        check_parameters(&name, &params).map_err(|message| ResolveError::InvalidParameters {
            method: name.clone(),
            message,
        })?;
        Ok(Self::declared(name, params, returns))
    }

    /// Builds a method from a parameter list already known to be well formed.
    pub(crate) fn declared(
        name: impl Into<String>,
        params: Vec<Parameter>,
        returns: Vec<Parameter>,
    ) -> Self {
        let params: Vec<Parameter> = params
            .into_iter()
            .enumerate()
            .map(|(idx, mut p)| {
                p.index = idx as u32;
                p
            })
            .collect();
        let returns: Vec<Parameter> = returns
            .into_iter()
            .enumerate()
            .map(|(idx, mut p)| {
                p.index = idx as u32;
                p.kind = ParamKind::Return;
                p
            })
            .collect();
        let value_count = params.iter().filter(|p| p.kind == ParamKind::Value).count();
        // Value parameters occupy the first registers of the frame.
        let code = Code::new(value_count as u32);
        Self {
            id: MethodId(u32::MAX),
            class: ClassId(u32::MAX),
            name: name.into(),
            access: Access::Public,
            flags: MethodFlags::default(),
            annotations: Vec::new(),
            params,
            returns,
            code,
        }
    }

    pub fn as_static(mut self) -> Self {
        self.flags.is_static = true;
        self
    }

    pub fn as_native(mut self) -> Self {
        self.flags.is_native = true;
        self
    }

    pub fn as_abstract(mut self) -> Self {
        self.flags.is_abstract = true;
        self
    }

    pub fn as_synthetic(mut self) -> Self {
        self.flags.is_synthetic = true;
        self
    }

    pub fn with_access(mut self, access: Access) -> Self {
        self.access = access;
        self
    }

    pub fn set_access(&mut self, access: Access) {
        self.access = access;
    }

    pub fn with_annotation(mut self, annotation: Annotation) -> Self {
        self.annotations.push(annotation);
        self
    }

    pub fn id(&self) -> MethodId {
        self.id
    }

    pub fn class(&self) -> ClassId {
        self.class
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn access(&self) -> Access {
        self.access
    }

    pub fn flags(&self) -> MethodFlags {
        self.flags
    }

    pub fn annotations(&self) -> &[Annotation] {
        &self.annotations
    }

    /// Type parameters followed by value parameters.
    pub fn params(&self) -> &[Parameter] {
        &self.params
    }

    pub fn type_param_count(&self) -> usize {
        self.params
            .iter()
            .take_while(|p| p.kind == ParamKind::TypeParam)
            .count()
    }

    pub fn value_params(&self) -> impl Iterator<Item = &Parameter> {
        self.params.iter().filter(|p| p.kind == ParamKind::Value)
    }

    /// Number of value parameters a caller must supply.
    pub fn required_arity(&self) -> usize {
        self.value_params().filter(|p| p.default.is_none()).count()
    }

    pub fn value_arity(&self) -> usize {
        self.params.len() - self.type_param_count()
    }

    pub fn returns(&self) -> &[Parameter] {
        &self.returns
    }

    pub fn signature(&self) -> SignatureConstant {
        let params: Vec<TypeId> = self.value_params().map(|p| p.ty).collect();
        let returns: Vec<TypeId> = self.returns.iter().map(|p| p.ty).collect();
        SignatureConstant::method(self.name.clone(), &params, &returns)
    }

    /// Interns this method's signature and identity.
    pub fn identity(&self, pool: &mut ConstantPool) -> (ConstId, ConstId) {
        let sig = pool.signature(self.signature());
        let id = pool.ensure(crate::pool::Constant::Method(self.id));
        (id, sig)
    }

    pub fn code(&self) -> &Code {
        &self.code
    }

    pub fn code_mut(&mut self) -> &mut Code {
        &mut self.code
    }

    /// Assembles the code the first time it is called; later calls return the same result.
    pub(crate) fn ensure_assembled(
        &mut self,
        options: &AssembleOptions,
    ) -> Result<&AssembledCode, CodeError> {
        if !self.code.is_assembled() {
            trace!(method = %self.name, "assembling");
        }
        let needs_code = !(self.flags.is_native || self.flags.is_abstract);
        self.code.ensure_assembled(&self.name, needs_code, options)
    }
}

pub(crate) fn check_parameters(method: &str, params: &[Parameter]) -> Result<(), String> {
    let mut seen_value = false;
    let mut seen_default = false;
    for (idx, param) in params.iter().enumerate() {
        match param.kind {
            ParamKind::TypeParam => {
                if seen_value {
                    return Err(format!(
                        "type parameter `{}` at {idx} follows a value parameter",
                        param.name
                    ));
                }
                if param.default.is_some() {
                    return Err(format!("type parameter `{}` has a default", param.name));
                }
            }
            ParamKind::Value => {
                seen_value = true;
                if param.default.is_some() {
                    seen_default = true;
                } else if seen_default {
                    return Err(format!(
                        "parameter `{}` at {idx} has no default but follows one that does",
                        param.name
                    ));
                }
            }
            ParamKind::Return => {
                return Err(format!("return value listed among parameters of `{method}`"));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_params_must_come_first() {
        let err = MethodStructure::new(
            "bad",
            vec![
                Parameter::value("a", TypeId::INT),
                Parameter::type_param("T", TypeId::OBJECT),
            ],
            vec![],
        )
        .unwrap_err();
        assert!(matches!(err, ResolveError::InvalidParameters { .. }));
    }

    #[test]
    fn defaults_must_be_a_suffix() {
        let mut pool = ConstantPool::new();
        let zero = pool.int(0);
        let err = MethodStructure::new(
            "bad",
            vec![
                Parameter::value("a", TypeId::INT).with_default(zero),
                Parameter::value("b", TypeId::INT),
            ],
            vec![],
        )
        .unwrap_err();
        assert!(matches!(err, ResolveError::InvalidParameters { .. }));

        let ok = MethodStructure::new(
            "good",
            vec![
                Parameter::type_param("T", TypeId::OBJECT),
                Parameter::value("a", TypeId::INT),
                Parameter::value("b", TypeId::INT).with_default(zero),
            ],
            vec![Parameter::ret(TypeId::INT)],
        )
        .unwrap();
        assert_eq!(ok.type_param_count(), 1);
        assert_eq!(ok.value_arity(), 2);
        assert_eq!(ok.required_arity(), 1);
        assert_eq!(ok.params()[2].index, 2);
        assert_eq!(
            ok.signature(),
            SignatureConstant::method("good", &[TypeId::INT, TypeId::INT], &[TypeId::INT])
        );
    }

    #[test]
    fn flag_bits_round_trip() {
        let flags = MethodFlags {
            is_static: true,
            is_native: false,
            is_abstract: true,
            is_synthetic: true,
        };
        assert_eq!(MethodFlags::from_bits(flags.bits()), flags);
    }
}
