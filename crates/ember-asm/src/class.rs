//! Class-like structures and the table that owns them.
//!
//! Classes, properties and methods live in arenas addressed by [`ClassId`], [`PropertyId`] and
//! [`MethodId`]. All mutation goes through [`ClassTable`] so that the table revision moves and
//! derived type information cached elsewhere is dropped.

use std::collections::BTreeMap;

use rustc_hash::FxHashSet;
use tracing::{debug, trace};

use crate::code::{AssembleOptions, AssembledCode};
use crate::error::{CodeError, ResolveError};
use crate::method::MethodStructure;
use crate::pool::{ConstId, ConstantPool, TypeId};
use crate::types::{Access, ResolutionResult, TypeConstant};
use crate::{ClassId, MethodId, PropertyId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Format {
    Module,
    Package,
    Class,
    Const,
    Service,
    Enum,
    EnumValue,
    Interface,
    Mixin,
}

impl Format {
    /// Formats that must extend exactly one class.
    pub fn requires_extends(self) -> bool {
        !matches!(self, Format::Interface | Format::Mixin)
    }

    /// Formats whose instances may be nested inside a parent instance.
    fn may_be_virtual(self) -> bool {
        matches!(
            self,
            Format::Class | Format::Const | Format::Service | Format::Interface | Format::Mixin
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Composition {
    Extends,
    Implements,
    Incorporates,
    Delegates { property: String },
    Annotation,
    Into,
}

/// One inheritance, mixin or delegation edge from a class to a contributing type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Contribution {
    pub composition: Composition,
    pub ty: TypeId,
    /// Compile-time condition guarding the contribution, if any.
    pub condition: Option<ConstId>,
}

impl Contribution {
    pub fn new(composition: Composition, ty: TypeId) -> Self {
        Self {
            composition,
            ty,
            condition: None,
        }
    }

    pub fn when(mut self, condition: ConstId) -> Self {
        self.condition = Some(condition);
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypeParamDecl {
    pub name: String,
    pub constraint: TypeId,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Component {
    Class(ClassId),
    Property(PropertyId),
    /// All methods sharing one name.
    MultiMethod { name: String, methods: Vec<MethodId> },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ParentRef {
    Class(ClassId),
    Property(PropertyId),
    Method(MethodId),
}

#[derive(Clone, Debug)]
pub struct ClassStructure {
    pub(crate) id: ClassId,
    pub(crate) name: String,
    pub(crate) qualified_name: String,
    pub(crate) format: Format,
    pub(crate) access: Access,
    pub(crate) is_static: bool,
    pub(crate) is_abstract: bool,
    pub(crate) is_synthetic: bool,
    pub(crate) parent: Option<ParentRef>,
    pub(crate) type_params: Vec<TypeParamDecl>,
    pub(crate) contributions: Vec<Contribution>,
    pub(crate) children: Vec<Component>,
    pub(crate) virtual_supers: Option<Vec<TypeId>>,
    pub(crate) frozen: bool,
}

impl ClassStructure {
    pub fn id(&self) -> ClassId {
        self.id
    }

    /// The simple name, e.g. `Widget` for `ui.Widget`.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn qualified_name(&self) -> &str {
        &self.qualified_name
    }

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn access(&self) -> Access {
        self.access
    }

    pub fn is_static(&self) -> bool {
        self.is_static
    }

    pub fn is_abstract(&self) -> bool {
        self.is_abstract
    }

    pub fn is_synthetic(&self) -> bool {
        self.is_synthetic
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn parent(&self) -> Option<ParentRef> {
        self.parent
    }

    pub fn type_params(&self) -> &[TypeParamDecl] {
        &self.type_params
    }

    pub fn contributions(&self) -> &[Contribution] {
        &self.contributions
    }

    pub fn children(&self) -> &[Component] {
        &self.children
    }

    /// Same-named classes in the outer class's ancestry, once [`ClassTable::resolve_virtual_super`]
    /// has decided them.
    pub fn virtual_supers(&self) -> Option<&[TypeId]> {
        self.virtual_supers.as_deref()
    }

    pub fn methods_named(&self, name: &str) -> &[MethodId] {
        self.children
            .iter()
            .find_map(|c| match c {
                Component::MultiMethod { name: n, methods } if n == name => Some(methods.as_slice()),
                _ => None,
            })
            .unwrap_or(&[])
    }

    pub fn extends(&self) -> Option<TypeId> {
        self.contributions
            .iter()
            .find(|c| c.composition == Composition::Extends)
            .map(|c| c.ty)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PropertyStructure {
    pub class: ClassId,
    pub name: String,
    pub ty: TypeId,
    pub access: Access,
    /// No setter.
    pub readonly: bool,
    pub is_static: bool,
    pub initial: Option<ConstId>,
}

impl PropertyStructure {
    pub fn new(name: impl Into<String>, ty: TypeId) -> Self {
        Self {
            class: ClassId(u32::MAX),
            name: name.into(),
            ty,
            access: Access::Public,
            readonly: false,
            is_static: false,
            initial: None,
        }
    }

    pub fn readonly(mut self) -> Self {
        self.readonly = true;
        self
    }

    pub fn with_access(mut self, access: Access) -> Self {
        self.access = access;
        self
    }

    pub fn as_static(mut self) -> Self {
        self.is_static = true;
        self
    }

    pub fn with_initial(mut self, value: ConstId) -> Self {
        self.initial = Some(value);
        self
    }
}

#[derive(Clone, Debug, Default)]
pub struct ClassTable {
    classes: Vec<ClassStructure>,
    properties: Vec<PropertyStructure>,
    methods: Vec<MethodStructure>,
    names: BTreeMap<String, ClassId>,
    revision: u64,
}

impl ClassTable {
    /// Moves on every structural mutation; caches keyed on the old value are stale.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn class_count(&self) -> usize {
        self.classes.len()
    }

    pub fn property_count(&self) -> usize {
        self.properties.len()
    }

    pub fn method_count(&self) -> usize {
        self.methods.len()
    }

    /// Returns the class for an id minted by this table.
    pub fn class(&self, id: ClassId) -> &ClassStructure {
        &self.classes[id.0 as usize]
    }

    pub fn get_class(&self, id: ClassId) -> Option<&ClassStructure> {
        self.classes.get(id.0 as usize)
    }

    pub fn class_id(&self, qualified_name: &str) -> Option<ClassId> {
        self.names.get(qualified_name).copied()
    }

    pub fn classes(&self) -> impl Iterator<Item = &ClassStructure> {
        self.classes.iter()
    }

    pub fn property(&self, id: PropertyId) -> &PropertyStructure {
        &self.properties[id.0 as usize]
    }

    pub fn properties(&self) -> impl Iterator<Item = (PropertyId, &PropertyStructure)> {
        self.properties
            .iter()
            .enumerate()
            .map(|(idx, p)| (PropertyId(idx as u32), p))
    }

    pub fn method(&self, id: MethodId) -> &MethodStructure {
        &self.methods[id.0 as usize]
    }

    pub fn get_method(&self, id: MethodId) -> Option<&MethodStructure> {
        self.methods.get(id.0 as usize)
    }

    /// Mutable access to a method, e.g. to append to its code. Fails once the declaring
    /// class is frozen.
    pub fn method_mut(&mut self, id: MethodId) -> Result<&mut MethodStructure, ResolveError> {
        let class = self
            .methods
            .get(id.0 as usize)
            .map(MethodStructure::class)
            .ok_or(ResolveError::UnknownMethod(id))?;
        if self.classes[class.0 as usize].frozen {
            return Err(ResolveError::Frozen(class));
        }
        self.revision += 1;
        Ok(&mut self.methods[id.0 as usize])
    }

    pub fn methods(&self) -> impl Iterator<Item = &MethodStructure> {
        self.methods.iter()
    }

    pub fn add_class(
        &mut self,
        name: &str,
        format: Format,
        parent: Option<ParentRef>,
    ) -> Result<ClassId, ResolveError> {
        let qualified_name = match parent {
            None => name.to_string(),
            Some(ParentRef::Class(p)) => format!("{}.{}", self.class(p).qualified_name, name),
            Some(ParentRef::Property(p)) => {
                let property = self.property(p);
                format!(
                    "{}.{}.{}",
                    self.class(property.class).qualified_name,
                    property.name,
                    name
                )
            }
            Some(ParentRef::Method(m)) => {
                let method = self.method(m);
                format!(
                    "{}.{}.{}",
                    self.class(method.class()).qualified_name,
                    method.name(),
                    name
                )
            }
        };
        if self.names.contains_key(&qualified_name) {
            return Err(ResolveError::DuplicateMember {
                class: qualified_name,
                name: name.to_string(),
            });
        }
        if let Some(ParentRef::Class(p)) = parent {
            self.mutate(p)?;
        }

        let id = self.insert_class(name, qualified_name, format, parent);
        trace!(class = id.0, name, ?format, "class declared");
        Ok(id)
    }

    /// Declares a class without the duplicate and frozen checks.
    pub(crate) fn insert_class(
        &mut self,
        name: &str,
        qualified_name: String,
        format: Format,
        parent: Option<ParentRef>,
    ) -> ClassId {
        let id = ClassId(self.classes.len() as u32);
        let simple = name.rsplit('.').next().unwrap_or(name).to_string();
        self.classes.push(ClassStructure {
            id,
            name: simple,
            qualified_name: qualified_name.clone(),
            format,
            access: Access::Public,
            is_static: false,
            is_abstract: false,
            is_synthetic: false,
            parent,
            type_params: Vec::new(),
            contributions: Vec::new(),
            children: Vec::new(),
            virtual_supers: None,
            frozen: false,
        });
        if let Some(ParentRef::Class(p)) = parent {
            self.classes[p.0 as usize].children.push(Component::Class(id));
        }
        self.names.insert(qualified_name, id);
        self.revision += 1;
        id
    }

    fn mutate(&mut self, id: ClassId) -> Result<&mut ClassStructure, ResolveError> {
        let class = self
            .classes
            .get_mut(id.0 as usize)
            .ok_or_else(|| ResolveError::UnknownClass(format!("#{}", id.0)))?;
        if class.frozen {
            return Err(ResolveError::Frozen(id));
        }
        self.revision += 1;
        Ok(class)
    }

    pub fn add_type_param(
        &mut self,
        class: ClassId,
        name: &str,
        constraint: TypeId,
    ) -> Result<(), ResolveError> {
        let structure = self.mutate(class)?;
        if structure.type_params.iter().any(|p| p.name == name) {
            return Err(ResolveError::DuplicateTypeParam {
                class: structure.qualified_name.clone(),
                name: name.to_string(),
            });
        }
        structure.type_params.push(TypeParamDecl {
            name: name.to_string(),
            constraint,
        });
        Ok(())
    }

    pub fn add_contribution(
        &mut self,
        class: ClassId,
        contribution: Contribution,
    ) -> Result<(), ResolveError> {
        self.mutate(class)?.contributions.push(contribution);
        Ok(())
    }

    /// Replaces the type of one contribution, e.g. once its name has been bound.
    pub fn set_contribution_type(
        &mut self,
        class: ClassId,
        index: usize,
        ty: TypeId,
    ) -> Result<(), ResolveError> {
        let structure = self.mutate(class)?;
        if let Some(contribution) = structure.contributions.get_mut(index) {
            contribution.ty = ty;
        }
        Ok(())
    }

    pub fn set_static(&mut self, class: ClassId, is_static: bool) -> Result<(), ResolveError> {
        self.mutate(class)?.is_static = is_static;
        Ok(())
    }

    pub fn set_abstract(&mut self, class: ClassId, is_abstract: bool) -> Result<(), ResolveError> {
        self.mutate(class)?.is_abstract = is_abstract;
        Ok(())
    }

    pub fn set_synthetic(&mut self, class: ClassId, synthetic: bool) -> Result<(), ResolveError> {
        self.mutate(class)?.is_synthetic = synthetic;
        Ok(())
    }

    pub fn set_access(&mut self, class: ClassId, access: Access) -> Result<(), ResolveError> {
        self.mutate(class)?.access = access;
        Ok(())
    }

    pub fn add_property(
        &mut self,
        class: ClassId,
        property: PropertyStructure,
    ) -> Result<PropertyId, ResolveError> {
        let duplicate = self.class(class).children.iter().any(|c| match c {
            Component::Property(p) => self.property(*p).name == property.name,
            _ => false,
        });
        if duplicate {
            return Err(ResolveError::DuplicateMember {
                class: self.class(class).qualified_name.clone(),
                name: property.name,
            });
        }
        self.mutate(class)?;
        Ok(self.insert_property(class, property))
    }

    pub(crate) fn insert_property(&mut self, class: ClassId, mut property: PropertyStructure) -> PropertyId {
        let id = PropertyId(self.properties.len() as u32);
        self.classes[class.0 as usize]
            .children
            .push(Component::Property(id));
        property.class = class;
        self.properties.push(property);
        self.revision += 1;
        id
    }

    /// Adds a method, grouping it with same-named methods of the class.
    ///
    /// Two methods with the same name and parameter types are duplicates.
    pub fn add_method(
        &mut self,
        class: ClassId,
        method: MethodStructure,
    ) -> Result<MethodId, ResolveError> {
        let param_types: Vec<TypeId> = method.params().iter().map(|p| p.ty).collect();
        let duplicate = self
            .class(class)
            .methods_named(method.name())
            .iter()
            .any(|m| {
                let existing: Vec<TypeId> = self.method(*m).params().iter().map(|p| p.ty).collect();
                existing == param_types
            });
        if duplicate {
            return Err(ResolveError::DuplicateMember {
                class: self.class(class).qualified_name.clone(),
                name: method.name().to_string(),
            });
        }

        self.mutate(class)?;
        Ok(self.insert_method(class, method))
    }

    /// Adds a method without the duplicate and frozen checks.
    pub(crate) fn insert_method(&mut self, class: ClassId, mut method: MethodStructure) -> MethodId {
        let id = MethodId(self.methods.len() as u32);
        method.id = id;
        method.class = class;
        let name = method.name().to_string();
        let structure = &mut self.classes[class.0 as usize];
        let group = structure.children.iter_mut().find_map(|c| match c {
            Component::MultiMethod { name: n, methods } if *n == name => Some(methods),
            _ => None,
        });
        match group {
            Some(methods) => methods.push(id),
            None => structure.children.push(Component::MultiMethod {
                name,
                methods: vec![id],
            }),
        }
        self.methods.push(method);
        self.revision += 1;
        id
    }

    /// Unchecked mutable access for seeding structures the table itself declared.
    pub(crate) fn structure_mut(&mut self, id: ClassId) -> &mut ClassStructure {
        self.revision += 1;
        &mut self.classes[id.0 as usize]
    }

    /// Marks the class immutable; later mutation attempts fail with `Frozen`.
    pub fn freeze(&mut self, class: ClassId) {
        if let Some(structure) = self.classes.get_mut(class.0 as usize) {
            structure.frozen = true;
        }
    }

    pub fn freeze_all(&mut self) {
        for structure in &mut self.classes {
            structure.frozen = true;
        }
    }

    pub(crate) fn ensure_assembled(
        &mut self,
        method: MethodId,
        options: &AssembleOptions,
    ) -> Result<&AssembledCode, CodeError> {
        let structure = self
            .methods
            .get_mut(method.0 as usize)
            .ok_or(CodeError::UnknownMethod(method))?;
        structure.ensure_assembled(options)
    }

    /// The class an instance of `class` is nested in, skipping interposed properties.
    pub fn outer_class(&self, class: ClassId) -> Option<ClassId> {
        match self.class(class).parent? {
            ParentRef::Class(p) => Some(p),
            ParentRef::Property(p) => Some(self.property(p).class),
            ParentRef::Method(_) => None,
        }
    }

    pub fn is_singleton(&self, class: ClassId) -> bool {
        let structure = self.class(class);
        match structure.format {
            Format::Module | Format::Package | Format::EnumValue => true,
            Format::Const | Format::Service | Format::Class => {
                structure.is_static && !matches!(structure.parent, Some(ParentRef::Method(_)))
            }
            Format::Enum | Format::Interface | Format::Mixin => false,
        }
    }

    /// Whether instances are created relative to an instance of the outer class.
    pub fn is_virtual_child(&self, class: ClassId) -> bool {
        let structure = self.class(class);
        if structure.is_static || !structure.format.may_be_virtual() {
            return false;
        }
        match self.outer_class(class) {
            Some(outer) => !matches!(
                self.class(outer).format,
                Format::Module | Format::Package
            ),
            None => false,
        }
    }

    /// Whether instances carry a reference to an enclosing `this`.
    pub fn has_outer(&self, class: ClassId) -> bool {
        if self.is_virtual_child(class) {
            return true;
        }
        let structure = self.class(class);
        match structure.parent {
            Some(ParentRef::Method(m)) => !structure.is_static && !self.method(m).flags().is_static,
            _ => false,
        }
    }

    /// The native substrate class a format rebases onto.
    pub fn rebase_type(&self, class: ClassId) -> Option<ClassId> {
        match self.class(class).format {
            Format::Module => Some(crate::core::MODULE),
            Format::Package => Some(crate::core::PACKAGE),
            Format::Enum => Some(crate::core::ENUM),
            Format::Const => Some(crate::core::CONST),
            Format::Service => Some(crate::core::SERVICE),
            _ => None,
        }
    }

    pub fn find_child_class(&self, class: ClassId, name: &str) -> Option<ClassId> {
        self.class(class).children.iter().find_map(|c| match c {
            Component::Class(child) if self.class(*child).name == name => Some(*child),
            _ => None,
        })
    }

    /// A child class named `name` in `class` or any class it contributes from.
    pub fn find_contributed_child(
        &self,
        pool: &ConstantPool,
        class: ClassId,
        name: &str,
    ) -> Option<ClassId> {
        match self.resolve_contributed_name(pool, class, name) {
            ResolutionResult::Resolved(child) => Some(child),
            _ => None,
        }
    }

    /// Binds a possibly-qualified class name.
    ///
    /// An exact qualified match wins; otherwise a unique simple-name match resolves and an
    /// ambiguous one is `Possible`.
    pub fn resolve_name(&self, name: &str) -> ResolutionResult<ClassId> {
        if let Some(id) = self.class_id(name) {
            return ResolutionResult::Resolved(id);
        }
        let mut found = self.classes.iter().filter(|c| c.name == name).map(|c| c.id);
        match (found.next(), found.next()) {
            (Some(id), None) => ResolutionResult::Resolved(id),
            (Some(_), Some(_)) => ResolutionResult::Possible,
            (None, _) => ResolutionResult::Unknown,
        }
    }

    /// Looks for a child class named `name` on `class` and then through its contributions.
    ///
    /// An unresolved contribution on the way makes a miss `Possible` instead of `Unknown`.
    pub fn resolve_contributed_name(
        &self,
        pool: &ConstantPool,
        class: ClassId,
        name: &str,
    ) -> ResolutionResult<ClassId> {
        let mut visited = FxHashSet::default();
        let mut stack = vec![class];
        let mut blocked = false;
        while let Some(current) = stack.pop() {
            if !visited.insert(current) {
                continue;
            }
            if let Some(child) = self.find_child_class(current, name) {
                return ResolutionResult::Resolved(child);
            }
            for contribution in self.class(current).contributions.iter().rev() {
                if contribution.composition == Composition::Into {
                    continue;
                }
                match pool.ty(contribution.ty) {
                    TypeConstant::Unresolved(_) => blocked = true,
                    _ => {
                        if let Some((next, _)) = pool.split_class_type(contribution.ty) {
                            stack.push(next);
                        }
                    }
                }
            }
        }
        if blocked {
            ResolutionResult::Possible
        } else {
            ResolutionResult::Unknown
        }
    }

    /// Decides which classes a virtual child overrides: same-named children of the classes
    /// the outer class contributes from, and of the outer class's own virtual supers.
    ///
    /// Returns `false` when an unresolved contribution blocks the answer; the caller must
    /// retry once more names are bound. Returns `true` once the supers are recorded.
    pub fn resolve_virtual_super(&mut self, pool: &mut ConstantPool, class: ClassId) -> bool {
        if self.class(class).virtual_supers.is_some() {
            return true;
        }
        let outer = match self.outer_class(class) {
            Some(outer) if self.is_virtual_child(class) => outer,
            _ => {
                self.record_virtual_supers(class, Vec::new());
                return true;
            }
        };
        let name = self.class(class).name.clone();

        let mut worklist: Vec<TypeId> = self
            .class(outer)
            .contributions
            .iter()
            .filter(|c| c.composition != Composition::Into)
            .map(|c| c.ty)
            .collect();
        if self.is_virtual_child(outer) {
            if !self.resolve_virtual_super(pool, outer) {
                return false;
            }
            worklist.extend(self.class(outer).virtual_supers().unwrap_or(&[]));
        }

        let mut visited = FxHashSet::default();
        visited.insert(outer);
        let mut supers = Vec::new();
        let mut idx = 0;
        while idx < worklist.len() {
            let ty = worklist[idx];
            idx += 1;
            if matches!(pool.ty(ty), TypeConstant::Unresolved(_)) {
                debug!(class = %self.class(class).qualified_name, "virtual super blocked");
                return false;
            }
            let Some((ancestor, _)) = pool.split_class_type(ty) else {
                continue;
            };
            if !visited.insert(ancestor) {
                continue;
            }
            if let Some(child) = self.find_child_class(ancestor, &name) {
                if child != class {
                    supers.push(pool.class_type(child));
                    continue;
                }
            }
            worklist.extend(
                self.class(ancestor)
                    .contributions
                    .iter()
                    .filter(|c| c.composition != Composition::Into)
                    .map(|c| c.ty),
            );
        }
        self.record_virtual_supers(class, supers);
        true
    }

    fn record_virtual_supers(&mut self, class: ClassId, supers: Vec<TypeId>) {
        let structure = &mut self.classes[class.0 as usize];
        structure.virtual_supers = Some(supers);
        self.revision += 1;
    }

    pub(crate) fn push_decoded_class(&mut self, structure: ClassStructure) {
        self.names
            .insert(structure.qualified_name.clone(), structure.id);
        self.classes.push(structure);
    }

    pub(crate) fn push_decoded_property(&mut self, property: PropertyStructure) {
        self.properties.push(property);
    }

    pub(crate) fn push_decoded_method(&mut self, method: MethodStructure) {
        self.methods.push(method);
    }
}
