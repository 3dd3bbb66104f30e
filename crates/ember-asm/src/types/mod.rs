//! The type constant graph.
//!
//! Types are immutable values interned in the [`ConstantPool`]; everything derived from a class
//! (its formal and canonical types, the variance of its parameters, relation answers) is
//! memoized in a [`TypeInfoCache`] side table that is dropped whenever the [`ClassTable`]
//! revision moves.

mod duck;
mod relation;
mod resolve;
mod variance;

use std::fmt::Write as _;

use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

use crate::class::ClassTable;
use crate::pool::{ConstantPool, TypeId};
use crate::{ClassId, MethodId};

pub(crate) use variance::Usage;

pub type TypeList = SmallVec<[TypeId; 4]>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Access {
    #[default]
    Public,
    Protected,
    Private,
    Struct,
}

/// A generic placeholder owned by a class or a method.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum FormalType {
    TypeParam {
        class: ClassId,
        name: String,
        index: u32,
    },
    MethodTypeParam {
        method: MethodId,
        name: String,
        index: u32,
    },
}

impl FormalType {
    pub fn name(&self) -> &str {
        match self {
            FormalType::TypeParam { name, .. } | FormalType::MethodTypeParam { name, .. } => name,
        }
    }

    pub fn index(&self) -> usize {
        match self {
            FormalType::TypeParam { index, .. } | FormalType::MethodTypeParam { index, .. } => {
                *index as usize
            }
        }
    }

    pub(crate) fn owner(&self) -> FormalOwner {
        match self {
            FormalType::TypeParam { class, .. } => FormalOwner::Class(*class),
            FormalType::MethodTypeParam { method, .. } => FormalOwner::Method(*method),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) enum FormalOwner {
    Class(ClassId),
    Method(MethodId),
}

/// `this`-relative types that narrow to the type of the object they are seen through.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Narrowing {
    This,
    Parent,
    Child(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TypeConstant {
    Terminal(ClassId),
    Unresolved(String),
    Parameterized {
        base: TypeId,
        params: TypeList,
    },
    Annotated {
        annotation: TypeId,
        underlying: TypeId,
    },
    /// `Union(Nullable, T)` is the nullable form of `T`.
    Union(TypeId, TypeId),
    Intersection(TypeId, TypeId),
    VirtualChild {
        parent: TypeId,
        name: String,
    },
    Formal(FormalType),
    AutoNarrowing(Narrowing),
    Access {
        underlying: TypeId,
        access: Access,
    },
}

/// The answer to "may a value of the right type be used where the left type is required".
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Relation {
    IsA,
    /// Substitutable only through an adapter that wraps the consuming members.
    IsAWeak,
    Incompatible,
}

impl Relation {
    pub fn worse_of(self, other: Relation) -> Relation {
        self.max(other)
    }

    pub fn best_of(self, other: Relation) -> Relation {
        self.min(other)
    }

    pub fn is_assignable(self) -> bool {
        self != Relation::Incompatible
    }
}

/// Tri-state answer of resolution entry points polled by the lowering phase.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResolutionResult<T> {
    Resolved(T),
    /// Definitely does not resolve.
    Unknown,
    /// Cannot be decided until more names are bound.
    Possible,
}

impl<T> ResolutionResult<T> {
    pub fn is_resolved(&self) -> bool {
        matches!(self, ResolutionResult::Resolved(_))
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ResolutionResult<U> {
        match self {
            ResolutionResult::Resolved(v) => ResolutionResult::Resolved(f(v)),
            ResolutionResult::Unknown => ResolutionResult::Unknown,
            ResolutionResult::Possible => ResolutionResult::Possible,
        }
    }
}

/// Result of a contribution graph search.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ContributionMatch {
    /// The target class contributes, seen with these actual parameters.
    Found(TypeList),
    NotFound,
    /// An unresolved contribution blocked the search.
    Deferred,
}

/// Memoized derived type information, keyed by class.
#[derive(Clone, Debug, Default)]
pub struct TypeInfoCache {
    revision: u64,
    formal_types: FxHashMap<ClassId, TypeId>,
    canonical_params: FxHashMap<ClassId, TypeList>,
    usage: FxHashMap<(ClassId, u32), Usage>,
    relations: FxHashMap<(TypeId, TypeId), Relation>,
}

impl TypeInfoCache {
    pub fn invalidate(&mut self) {
        self.formal_types.clear();
        self.canonical_params.clear();
        self.usage.clear();
        self.relations.clear();
    }

    fn sync(&mut self, revision: u64) {
        if self.revision != revision {
            self.invalidate();
            self.revision = revision;
        }
    }

    pub fn len(&self) -> usize {
        self.formal_types.len() + self.canonical_params.len() + self.usage.len() + self.relations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Substitution of formal types by actual types.
pub(crate) struct Bindings<'b> {
    pub owner: FormalOwner,
    pub actuals: &'b [TypeId],
    pub this: Option<TypeId>,
}

/// Borrowed view of a module answering relation, variance and resolution questions.
pub struct TypeSystem<'a> {
    pub(crate) pool: &'a mut ConstantPool,
    pub(crate) classes: &'a ClassTable,
    pub(crate) cache: &'a mut TypeInfoCache,
    in_progress: FxHashSet<(TypeId, TypeId)>,
    usage_stack: FxHashSet<(ClassId, u32)>,
    context: Option<TypeId>,
    /// Relations answered `Incompatible` only because an unresolved name blocked them.
    deferrals: u32,
}

impl<'a> TypeSystem<'a> {
    pub fn new(
        pool: &'a mut ConstantPool,
        classes: &'a ClassTable,
        cache: &'a mut TypeInfoCache,
    ) -> Self {
        cache.sync(classes.revision());
        Self {
            pool,
            classes,
            cache,
            in_progress: FxHashSet::default(),
            usage_stack: FxHashSet::default(),
            context: None,
            deferrals: 0,
        }
    }

    /// Sets the type `this`-relative types narrow to.
    pub fn with_context(mut self, context: TypeId) -> Self {
        self.context = Some(context);
        self
    }

    pub fn pool(&mut self) -> &mut ConstantPool {
        &mut *self.pool
    }

    pub fn classes(&self) -> &ClassTable {
        self.classes
    }

    /// The class's type seen through its own formal parameters, e.g. `Box<T>`.
    pub fn formal_type(&mut self, class: ClassId) -> TypeId {
        if let Some(&ty) = self.cache.formal_types.get(&class) {
            return ty;
        }
        let decls: Vec<String> = self
            .classes
            .class(class)
            .type_params()
            .iter()
            .map(|p| p.name.clone())
            .collect();
        let params: TypeList = decls
            .into_iter()
            .enumerate()
            .map(|(index, name)| {
                self.pool.formal(FormalType::TypeParam {
                    class,
                    name,
                    index: index as u32,
                })
            })
            .collect();
        let base = self.pool.class_type(class);
        let ty = self.pool.parameterized_over(base, params);
        self.cache.formal_types.insert(class, ty);
        ty
    }

    /// The class's type with every parameter at its constraint, e.g. `Box<Object>`.
    pub fn canonical_type(&mut self, class: ClassId) -> TypeId {
        let params = self.canonical_params(class);
        let base = self.pool.class_type(class);
        self.pool.parameterized_over(base, params)
    }

    /// Constraint types of the class's parameters, resolved with every formal primed to
    /// `Object` so that self-referential constraints terminate.
    pub fn canonical_params(&mut self, class: ClassId) -> TypeList {
        if let Some(params) = self.cache.canonical_params.get(&class) {
            return params.clone();
        }
        let constraints: Vec<TypeId> = self
            .classes
            .class(class)
            .type_params()
            .iter()
            .map(|p| p.constraint)
            .collect();
        let primed: TypeList = constraints.iter().map(|_| TypeId::OBJECT).collect();
        let bindings = Bindings {
            owner: FormalOwner::Class(class),
            actuals: &primed,
            this: None,
        };
        let params: TypeList = constraints
            .into_iter()
            .map(|c| self.substitute(c, &bindings))
            .collect();
        self.cache.canonical_params.insert(class, params.clone());
        params
    }

    /// Replaces formal types owned by `bindings.owner` and `this` types.
    pub(crate) fn substitute(&mut self, ty: TypeId, bindings: &Bindings<'_>) -> TypeId {
        match self.pool.ty(ty).clone() {
            TypeConstant::Formal(formal) => {
                if formal.owner() == bindings.owner {
                    if let Some(&actual) = bindings.actuals.get(formal.index()) {
                        return actual;
                    }
                }
                ty
            }
            TypeConstant::AutoNarrowing(Narrowing::This) => bindings.this.unwrap_or(ty),
            TypeConstant::Parameterized { base, params } => {
                let new_base = self.substitute(base, bindings);
                let new_params: TypeList =
                    params.iter().map(|p| self.substitute(*p, bindings)).collect();
                if new_base == base && new_params == params {
                    return ty;
                }
                self.pool.parameterized_over(new_base, new_params)
            }
            TypeConstant::Union(a, b) => {
                let (a, b) = (self.substitute(a, bindings), self.substitute(b, bindings));
                self.pool.union(a, b)
            }
            TypeConstant::Intersection(a, b) => {
                let (a, b) = (self.substitute(a, bindings), self.substitute(b, bindings));
                self.pool.intersection(a, b)
            }
            TypeConstant::Annotated {
                annotation,
                underlying,
            } => {
                let underlying = self.substitute(underlying, bindings);
                self.pool.annotated(annotation, underlying)
            }
            TypeConstant::Access { underlying, access } => {
                let underlying = self.substitute(underlying, bindings);
                self.pool.access(underlying, access)
            }
            TypeConstant::VirtualChild { parent, name } => {
                let parent = self.substitute(parent, bindings);
                self.pool.virtual_child(parent, &name)
            }
            TypeConstant::Terminal(_)
            | TypeConstant::Unresolved(_)
            | TypeConstant::AutoNarrowing(_) => ty,
        }
    }

    /// Resolves a contributed type's formals against the contributing class's actuals,
    /// defaulting missing trailing actuals to the canonical types.
    pub(crate) fn resolve_generics(
        &mut self,
        ty: TypeId,
        class: ClassId,
        actuals: &[TypeId],
    ) -> TypeId {
        let formal_count = self.classes.class(class).type_params().len();
        let mut full: TypeList = actuals.iter().copied().take(formal_count).collect();
        if full.len() < formal_count {
            let canonical = self.canonical_params(class);
            full.extend(canonical[full.len()..].iter().copied());
        }
        self.substitute(
            ty,
            &Bindings {
                owner: FormalOwner::Class(class),
                actuals: &full,
                this: None,
            },
        )
    }

    pub fn has_unresolved(&self, ty: TypeId) -> bool {
        match self.pool.ty(ty) {
            TypeConstant::Unresolved(_) => true,
            TypeConstant::Parameterized { base, params } => {
                self.has_unresolved(*base) || params.iter().any(|p| self.has_unresolved(*p))
            }
            TypeConstant::Union(a, b) | TypeConstant::Intersection(a, b) => {
                self.has_unresolved(*a) || self.has_unresolved(*b)
            }
            TypeConstant::Annotated {
                annotation,
                underlying,
            } => self.has_unresolved(*annotation) || self.has_unresolved(*underlying),
            TypeConstant::Access { underlying, .. } => self.has_unresolved(*underlying),
            TypeConstant::VirtualChild { parent, .. } => self.has_unresolved(*parent),
            TypeConstant::Terminal(_)
            | TypeConstant::Formal(_)
            | TypeConstant::AutoNarrowing(_) => false,
        }
    }

    /// Renders a type the way diagnostics print it, e.g. `Box<String>?`.
    pub fn describe(&self, ty: TypeId) -> String {
        let mut out = String::new();
        self.describe_into(ty, &mut out);
        out
    }

    fn describe_into(&self, ty: TypeId, out: &mut String) {
        match self.pool.ty(ty) {
            TypeConstant::Terminal(class) => out.push_str(self.classes.class(*class).name()),
            TypeConstant::Unresolved(name) => {
                let _ = write!(out, "{name}?unresolved");
            }
            TypeConstant::Parameterized { base, params } => {
                self.describe_into(*base, out);
                out.push('<');
                for (idx, p) in params.iter().enumerate() {
                    if idx > 0 {
                        out.push_str(", ");
                    }
                    self.describe_into(*p, out);
                }
                out.push('>');
            }
            TypeConstant::Annotated {
                annotation,
                underlying,
            } => {
                out.push('@');
                self.describe_into(*annotation, out);
                out.push(' ');
                self.describe_into(*underlying, out);
            }
            TypeConstant::Union(a, b) if *a == TypeId::NULLABLE => {
                self.describe_into(*b, out);
                out.push('?');
            }
            TypeConstant::Union(a, b) => {
                self.describe_into(*a, out);
                out.push_str(" | ");
                self.describe_into(*b, out);
            }
            TypeConstant::Intersection(a, b) => {
                self.describe_into(*a, out);
                out.push_str(" + ");
                self.describe_into(*b, out);
            }
            TypeConstant::VirtualChild { parent, name } => {
                self.describe_into(*parent, out);
                out.push('.');
                out.push_str(name);
            }
            TypeConstant::Formal(formal) => out.push_str(formal.name()),
            TypeConstant::AutoNarrowing(Narrowing::This) => out.push_str("this"),
            TypeConstant::AutoNarrowing(Narrowing::Parent) => out.push_str("this:parent"),
            TypeConstant::AutoNarrowing(Narrowing::Child(name)) => {
                let _ = write!(out, "this.{name}");
            }
            TypeConstant::Access { underlying, access } => {
                self.describe_into(*underlying, out);
                let _ = write!(out, ":{}", format!("{access:?}").to_lowercase());
            }
        }
    }
}
