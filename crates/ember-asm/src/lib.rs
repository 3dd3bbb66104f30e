#![forbid(unsafe_code)]

pub mod class;
pub mod code;
pub mod core;
pub mod error;
pub mod format;
pub mod method;
pub mod param;
pub mod pool;
pub mod synth;
pub mod types;
pub mod verify;

pub use class::{
    ClassStructure, ClassTable, Component, Composition, Contribution, Format, ParentRef,
    PropertyStructure, TypeParamDecl,
};
pub use code::{
    AssembleOptions, AssembledCode, Code, CodeBuilder, CodeOp, Label, Op, OptLevel, Prefix,
    Target,
};
pub use error::{CodeError, DecodeError, EncodeError, ResolveError, VerifyError};
pub use method::{Annotation, MethodFlags, MethodStructure};
pub use param::{Argument, ParamKind, Parameter, Reg};
pub use pool::{ConstId, Constant, ConstantPool, MemberKind, SignatureConstant, TypeId};
pub use types::{
    Access, ContributionMatch, FormalType, Narrowing, Relation, ResolutionResult, TypeConstant,
    TypeInfoCache, TypeList, TypeSystem,
};

/// A stable identifier for a class-like structure within a [`Module`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ClassId(pub u32);

/// A stable identifier for a property within a [`Module`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PropertyId(pub u32);

/// A stable identifier for a method within a [`Module`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MethodId(pub u32);

/// A compilation unit: the constant pool, the class table and the derived-type cache.
///
/// The pool is owned here and passed explicitly to every API that interns or reads
/// constants; nothing in this crate reaches for ambient state.
#[derive(Clone, Debug)]
pub struct Module {
    pub name: String,
    pub pool: ConstantPool,
    pub classes: ClassTable,
    pub cache: TypeInfoCache,
}

impl Module {
    /// Creates a module with the core classes (`Object`, `Tuple`, `Int`, ...) declared.
    pub fn new(name: impl Into<String>) -> Self {
        let mut pool = ConstantPool::new();
        let mut classes = ClassTable::default();
        core::bootstrap(&mut pool, &mut classes);
        Self {
            name: name.into(),
            pool,
            classes,
            cache: TypeInfoCache::default(),
        }
    }

    /// Borrows the pool, classes and cache as one type-relation engine.
    pub fn type_system(&mut self) -> TypeSystem<'_> {
        TypeSystem::new(&mut self.pool, &self.classes, &mut self.cache)
    }

    pub fn class_id(&self, name: &str) -> Option<ClassId> {
        self.classes.class_id(name)
    }

    /// Binds the unresolved names in a class's contribution types.
    ///
    /// Bound contributions are updated even when others stay unresolved; the result is
    /// `Unknown` if any name can never bind and `Possible` if some may bind later.
    pub fn resolve_contributions(
        &mut self,
        class: ClassId,
    ) -> Result<ResolutionResult<()>, ResolveError> {
        let pending: Vec<(usize, TypeId)> = self
            .classes
            .class(class)
            .contributions()
            .iter()
            .map(|c| c.ty)
            .enumerate()
            .collect();
        let mut outcome = ResolutionResult::Resolved(());
        let mut bound = Vec::new();
        {
            let mut ts = self.type_system();
            for (idx, ty) in pending {
                if !ts.has_unresolved(ty) {
                    continue;
                }
                match ts.resolve_type(ty) {
                    ResolutionResult::Resolved(resolved) => bound.push((idx, resolved)),
                    ResolutionResult::Unknown => outcome = ResolutionResult::Unknown,
                    ResolutionResult::Possible => {
                        if outcome.is_resolved() {
                            outcome = ResolutionResult::Possible;
                        }
                    }
                }
            }
        }
        for (idx, ty) in bound {
            self.classes.set_contribution_type(class, idx, ty)?;
        }
        Ok(outcome)
    }

    /// Checks the structural rules; see [`verify::verify_module`].
    pub fn verify(&self) -> Result<(), VerifyError> {
        verify::verify_module(self)
    }

    /// Assembles one method's code if it has not been assembled yet.
    pub fn ensure_assembled(
        &mut self,
        method: MethodId,
        options: &AssembleOptions,
    ) -> Result<&AssembledCode, CodeError> {
        self.classes.ensure_assembled(method, options)
    }

    /// Assembles every method in the module.
    pub fn assemble_all(&mut self, options: &AssembleOptions) -> Result<(), CodeError> {
        for idx in 0..self.classes.method_count() {
            let id = MethodId(idx as u32);
            self.classes.ensure_assembled(id, options)?;
        }
        Ok(())
    }

    /// Adds synthetic members, assembles all methods and encodes the module in the binary
    /// format.
    pub fn to_bytes(&mut self) -> Result<Vec<u8>, EncodeError> {
        synth::synthesize_all(self)?;
        self.assemble_all(&AssembleOptions::default())?;
        format::to_bytes(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        format::from_bytes(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contributions_bind_once_their_names_exist() {
        let mut module = Module::new("test");
        let pending = module.pool.unresolved_type("shapes.Shape");
        let square = module
            .classes
            .add_class("shapes.Square", Format::Class, None)
            .unwrap();
        module
            .classes
            .add_contribution(square, Contribution::new(Composition::Extends, TypeId::OBJECT))
            .unwrap();
        module
            .classes
            .add_contribution(square, Contribution::new(Composition::Implements, pending))
            .unwrap();
        assert_eq!(
            module.resolve_contributions(square).unwrap(),
            ResolutionResult::Unknown
        );

        let shape = module
            .classes
            .add_class("shapes.Shape", Format::Interface, None)
            .unwrap();
        assert_eq!(
            module.resolve_contributions(square).unwrap(),
            ResolutionResult::Resolved(())
        );
        let shape_type = module.pool.class_type(shape);
        assert_eq!(module.classes.class(square).contributions()[1].ty, shape_type);
        assert_eq!(module.verify(), Ok(()));
    }
}
