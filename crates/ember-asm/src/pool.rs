//! Interned constants.
//!
//! Every constant a structure or an op refers to lives in one [`ConstantPool`] and is addressed
//! by a [`ConstId`]. Equal constants intern to the same id, so id equality is value equality.
//! Types are constants too; [`TypeId`] is the typed handle of a [`Constant::Type`].

use rustc_hash::FxHashMap;

use crate::core;
use crate::types::{Access, FormalType, Narrowing, TypeConstant, TypeList};
use crate::{ClassId, MethodId, PropertyId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ConstId(pub u32);

/// Handle to an interned [`TypeConstant`].
///
/// The index is shared with [`ConstId`]: `TypeId(n)` names the constant `ConstId(n)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TypeId(pub(crate) u32);

impl TypeId {
    // Reserved ids: the terminal types of the core classes, interned by `ConstantPool::new`
    // in class-id order.
    pub const OBJECT: TypeId = TypeId(core::OBJECT.0);
    pub const TUPLE: TypeId = TypeId(core::TUPLE.0);
    pub const NULLABLE: TypeId = TypeId(core::NULLABLE.0);
    pub const BOOLEAN: TypeId = TypeId(core::BOOLEAN.0);
    pub const INT: TypeId = TypeId(core::INT.0);
    pub const CHAR: TypeId = TypeId(core::CHAR.0);
    pub const STRING: TypeId = TypeId(core::STRING.0);
    pub const STRING_BUFFER: TypeId = TypeId(core::STRING_BUFFER.0);
    pub const EXCEPTION: TypeId = TypeId(core::EXCEPTION.0);

    pub fn as_const(self) -> ConstId {
        ConstId(self.0)
    }

    pub fn index(self) -> u32 {
        self.0
    }
}

impl From<TypeId> for ConstId {
    fn from(ty: TypeId) -> Self {
        ty.as_const()
    }
}

/// Whether a signature names a method or a property.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MemberKind {
    Method,
    Property,
}

/// A member signature: name, value parameter types and return types.
///
/// Properties are described as a signature with no parameters and one return.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SignatureConstant {
    pub name: String,
    pub kind: MemberKind,
    pub params: TypeList,
    pub returns: TypeList,
}

impl SignatureConstant {
    pub fn method(name: impl Into<String>, params: &[TypeId], returns: &[TypeId]) -> Self {
        Self {
            name: name.into(),
            kind: MemberKind::Method,
            params: params.iter().copied().collect(),
            returns: returns.iter().copied().collect(),
        }
    }

    pub fn property(name: impl Into<String>, ty: TypeId) -> Self {
        Self {
            name: name.into(),
            kind: MemberKind::Property,
            params: TypeList::new(),
            returns: std::iter::once(ty).collect(),
        }
    }

    /// A property with a setter; the setter's parameter is the property type.
    pub fn settable_property(name: impl Into<String>, ty: TypeId) -> Self {
        Self {
            params: std::iter::once(ty).collect(),
            ..Self::property(name, ty)
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Constant {
    Int(i64),
    Bool(bool),
    Char(char),
    String(String),
    Class(ClassId),
    Method(MethodId),
    Property(PropertyId),
    Type(TypeConstant),
    Signature(SignatureConstant),
    /// The value of a singleton class; materialized by the runtime on first use.
    Singleton(ClassId),
    Array { element: TypeId, items: Vec<ConstId> },
    /// A name the lowering phase has not bound yet.
    Unresolved(String),
}

#[derive(Clone, Debug)]
pub struct ConstantPool {
    constants: Vec<Constant>,
    intern_map: FxHashMap<Constant, ConstId>,
}

impl Default for ConstantPool {
    fn default() -> Self {
        Self::new()
    }
}

impl ConstantPool {
    pub fn new() -> Self {
        let mut pool = Self {
            constants: Vec::new(),
            intern_map: FxHashMap::default(),
        };
        for idx in 0..core::CORE_CLASS_COUNT {
            let id = pool.ensure_type(TypeConstant::Terminal(ClassId(idx)));
            debug_assert_eq!(id, TypeId(idx));
        }
        pool
    }

    /// Pool with no reserved entries, filled by the binary decoder.
    pub(crate) fn empty() -> Self {
        Self {
            constants: Vec::new(),
            intern_map: FxHashMap::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.constants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constants.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ConstId, &Constant)> {
        self.constants
            .iter()
            .enumerate()
            .map(|(idx, c)| (ConstId(idx as u32), c))
    }

    /// Interns `constant`, returning the existing id when an equal constant is present.
    pub fn ensure(&mut self, constant: Constant) -> ConstId {
        let next_id = ConstId(self.constants.len() as u32);
        *self.intern_map.entry(constant.clone()).or_insert_with(|| {
            self.constants.push(constant);
            next_id
        })
    }

    pub fn find(&self, constant: &Constant) -> Option<ConstId> {
        self.intern_map.get(constant).copied()
    }

    pub fn get(&self, id: ConstId) -> Option<&Constant> {
        self.constants.get(id.0 as usize)
    }

    /// Returns the constant for an id minted by this pool.
    pub fn constant(&self, id: ConstId) -> &Constant {
        &self.constants[id.0 as usize]
    }

    pub fn ensure_type(&mut self, ty: TypeConstant) -> TypeId {
        TypeId(self.ensure(Constant::Type(ty)).0)
    }

    /// Returns the type constant behind `id`.
    pub fn ty(&self, id: TypeId) -> &TypeConstant {
        match &self.constants[id.0 as usize] {
            Constant::Type(ty) => ty,
            other => unreachable!("type id {id:?} names a non-type constant {other:?}"),
        }
    }

    /// Views a constant id as a type id when it names a type.
    pub fn as_type(&self, id: ConstId) -> Option<TypeId> {
        match self.get(id)? {
            Constant::Type(_) => Some(TypeId(id.0)),
            _ => None,
        }
    }

    pub fn int(&mut self, value: i64) -> ConstId {
        self.ensure(Constant::Int(value))
    }

    pub fn bool(&mut self, value: bool) -> ConstId {
        self.ensure(Constant::Bool(value))
    }

    pub fn char(&mut self, value: char) -> ConstId {
        self.ensure(Constant::Char(value))
    }

    pub fn string(&mut self, value: &str) -> ConstId {
        self.ensure(Constant::String(value.to_string()))
    }

    pub fn singleton(&mut self, class: ClassId) -> ConstId {
        self.ensure(Constant::Singleton(class))
    }

    pub fn array(&mut self, element: TypeId, items: Vec<ConstId>) -> ConstId {
        self.ensure(Constant::Array { element, items })
    }

    pub fn signature(&mut self, sig: SignatureConstant) -> ConstId {
        self.ensure(Constant::Signature(sig))
    }

    pub fn class_type(&mut self, class: ClassId) -> TypeId {
        self.ensure_type(TypeConstant::Terminal(class))
    }

    /// `Class<params...>`; with no params this is the terminal type.
    pub fn parameterized(&mut self, class: ClassId, params: &[TypeId]) -> TypeId {
        let base = self.class_type(class);
        if params.is_empty() {
            return base;
        }
        self.ensure_type(TypeConstant::Parameterized {
            base,
            params: params.iter().copied().collect(),
        })
    }

    pub fn parameterized_over(&mut self, base: TypeId, params: TypeList) -> TypeId {
        if params.is_empty() {
            return base;
        }
        self.ensure_type(TypeConstant::Parameterized { base, params })
    }

    pub fn tuple(&mut self, elements: &[TypeId]) -> TypeId {
        self.parameterized(core::TUPLE, elements)
    }

    pub fn nullable(&mut self, ty: TypeId) -> TypeId {
        self.union(TypeId::NULLABLE, ty)
    }

    pub fn union(&mut self, a: TypeId, b: TypeId) -> TypeId {
        if a == b {
            return a;
        }
        self.ensure_type(TypeConstant::Union(a, b))
    }

    pub fn intersection(&mut self, a: TypeId, b: TypeId) -> TypeId {
        if a == b {
            return a;
        }
        self.ensure_type(TypeConstant::Intersection(a, b))
    }

    pub fn annotated(&mut self, annotation: TypeId, underlying: TypeId) -> TypeId {
        self.ensure_type(TypeConstant::Annotated {
            annotation,
            underlying,
        })
    }

    pub fn access(&mut self, underlying: TypeId, access: Access) -> TypeId {
        if access == Access::Public {
            return underlying;
        }
        self.ensure_type(TypeConstant::Access { underlying, access })
    }

    pub fn virtual_child(&mut self, parent: TypeId, name: &str) -> TypeId {
        self.ensure_type(TypeConstant::VirtualChild {
            parent,
            name: name.to_string(),
        })
    }

    pub fn formal(&mut self, formal: FormalType) -> TypeId {
        self.ensure_type(TypeConstant::Formal(formal))
    }

    pub fn this_type(&mut self) -> TypeId {
        self.ensure_type(TypeConstant::AutoNarrowing(Narrowing::This))
    }

    pub fn unresolved_type(&mut self, name: &str) -> TypeId {
        self.ensure_type(TypeConstant::Unresolved(name.to_string()))
    }

    /// Splits `Class` or `Class<params>` into the class and its actual parameters.
    pub fn split_class_type(&self, ty: TypeId) -> Option<(ClassId, &[TypeId])> {
        match self.ty(ty) {
            TypeConstant::Terminal(class) => Some((*class, &[][..])),
            TypeConstant::Parameterized { base, params } => match self.ty(*base) {
                TypeConstant::Terminal(class) => Some((*class, params.as_slice())),
                _ => None,
            },
            _ => None,
        }
    }

    /// Collects every singleton constant reachable from `id`, looking through arrays.
    pub fn collect_singletons(&self, id: ConstId, out: &mut Vec<ClassId>) {
        match self.get(id) {
            Some(Constant::Singleton(class)) => {
                if !out.contains(class) {
                    out.push(*class);
                }
            }
            Some(Constant::Array { items, .. }) => {
                for item in items {
                    self.collect_singletons(*item, out);
                }
            }
            _ => {}
        }
    }

    /// Appends a decoded constant; decoded pools must not contain duplicates.
    pub(crate) fn push_decoded(&mut self, constant: Constant) -> Result<ConstId, String> {
        let expected = ConstId(self.constants.len() as u32);
        let id = self.ensure(constant);
        if id != expected {
            return Err(format!("constant {} duplicates constant {}", expected.0, id.0));
        }
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_terminal_types_are_reserved() {
        let mut pool = ConstantPool::new();
        assert_eq!(pool.class_type(core::OBJECT), TypeId::OBJECT);
        assert_eq!(pool.class_type(core::STRING), TypeId::STRING);
        assert_eq!(pool.class_type(core::TUPLE), TypeId::TUPLE);
        assert_eq!(pool.len(), core::CORE_CLASS_COUNT as usize);
    }

    #[test]
    fn structurally_equal_types_intern_to_one_id() {
        let mut pool = ConstantPool::new();
        let a = pool.parameterized(core::ARRAY, &[TypeId::STRING]);
        let b = pool.parameterized(core::ARRAY, &[TypeId::STRING]);
        let c = pool.parameterized(core::ARRAY, &[TypeId::INT]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(pool.nullable(a), pool.nullable(b));
    }

    #[test]
    fn split_class_type_sees_through_parameterization() {
        let mut pool = ConstantPool::new();
        let ty = pool.parameterized(core::ARRAY, &[TypeId::INT]);
        let (class, params) = pool.split_class_type(ty).unwrap();
        assert_eq!(class, core::ARRAY);
        assert_eq!(params, &[TypeId::INT]);
        let nullable = pool.nullable(ty);
        assert!(pool.split_class_type(nullable).is_none());
    }

    #[test]
    fn singletons_are_collected_through_arrays() {
        let mut pool = ConstantPool::new();
        let a = pool.singleton(ClassId(40));
        let b = pool.singleton(ClassId(41));
        let inner = pool.array(TypeId::OBJECT, vec![b, a]);
        let outer = pool.array(TypeId::OBJECT, vec![a, inner]);
        let mut found = Vec::new();
        pool.collect_singletons(outer, &mut found);
        assert_eq!(found, vec![ClassId(40), ClassId(41)]);
    }
}
