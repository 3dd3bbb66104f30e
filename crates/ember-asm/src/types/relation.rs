use rustc_hash::FxHashSet;
use tracing::{debug, trace, warn};

use super::{
    ContributionMatch, Narrowing, Relation, ResolutionResult, TypeConstant, TypeList, TypeSystem,
};
use crate::class::{Composition, Format};
use crate::core;
use crate::pool::TypeId;
use crate::types::FormalType;
use crate::ClassId;

impl TypeSystem<'_> {
    /// Whether a value of type `right` may be used where `left` is required.
    pub fn is_a(&mut self, left: TypeId, right: TypeId) -> bool {
        self.calculate_relation(left, right).is_assignable()
    }

    /// Like [`Self::calculate_relation`], but an `Incompatible` answer that hinges on an
    /// unresolved name comes back as `Possible` instead of a final verdict.
    pub fn try_relation(&mut self, left: TypeId, right: TypeId) -> ResolutionResult<Relation> {
        let deferrals = self.deferrals;
        let relation = self.calculate_relation(left, right);
        if relation == Relation::Incompatible && self.deferrals != deferrals {
            ResolutionResult::Possible
        } else {
            ResolutionResult::Resolved(relation)
        }
    }

    /// Relation of an actual type `right` to a required type `left`.
    pub fn calculate_relation(&mut self, left: TypeId, right: TypeId) -> Relation {
        if left == right || left == TypeId::OBJECT {
            return Relation::IsA;
        }
        let key = (left, right);
        if self.context.is_none() {
            if let Some(&relation) = self.cache.relations.get(&key) {
                return relation;
            }
        }
        // A pair already on the stack is assumed to hold; the outer computation decides.
        if !self.in_progress.insert(key) {
            return Relation::IsA;
        }
        let deferrals = self.deferrals;
        let relation = self.compute_relation(left, right);
        self.in_progress.remove(&key);
        // A deferred answer may change once more names bind, so it is never memoized.
        if self.in_progress.is_empty() && self.context.is_none() && self.deferrals == deferrals {
            self.cache.relations.insert(key, relation);
        }
        trace!(
            left = %self.describe(left),
            right = %self.describe(right),
            ?relation,
            "relation"
        );
        relation
    }

    fn compute_relation(&mut self, left: TypeId, right: TypeId) -> Relation {
        let left_ty = self.pool.ty(left).clone();
        let right_ty = self.pool.ty(right).clone();

        if matches!(left_ty, TypeConstant::Unresolved(_))
            || matches!(right_ty, TypeConstant::Unresolved(_))
        {
            debug!(left = left.index(), right = right.index(), "relation on unresolved type");
            self.deferrals += 1;
            return Relation::Incompatible;
        }

        // Every member of an actual union must fit; any member of an intersection may.
        match right_ty {
            TypeConstant::Access { underlying, .. } => {
                return self.calculate_relation(left, underlying);
            }
            TypeConstant::Annotated {
                annotation,
                underlying,
            } => {
                let base = self.calculate_relation(left, underlying);
                return base.best_of(self.calculate_relation(left, annotation));
            }
            TypeConstant::Union(a, b) => {
                let first = self.calculate_relation(left, a);
                return first.worse_of(self.calculate_relation(left, b));
            }
            TypeConstant::Intersection(a, b) => {
                let first = self.calculate_relation(left, a);
                return first.best_of(self.calculate_relation(left, b));
            }
            _ => {}
        }

        match left_ty {
            TypeConstant::Access { underlying, .. } => {
                return self.calculate_relation(underlying, right);
            }
            TypeConstant::Annotated {
                annotation,
                underlying,
            } => {
                let base = self.calculate_relation(underlying, right);
                return base.worse_of(self.calculate_relation(annotation, right));
            }
            TypeConstant::Union(a, b) => {
                let first = self.calculate_relation(a, right);
                return first.best_of(self.calculate_relation(b, right));
            }
            TypeConstant::Intersection(a, b) => {
                let first = self.calculate_relation(a, right);
                return first.worse_of(self.calculate_relation(b, right));
            }
            _ => {}
        }

        if let TypeConstant::Formal(formal) = &right_ty {
            let constraint = self.formal_constraint(formal);
            if constraint == right {
                return Relation::Incompatible;
            }
            return self.calculate_relation(left, constraint);
        }
        if matches!(left_ty, TypeConstant::Formal(_)) {
            return Relation::Incompatible;
        }

        if let TypeConstant::AutoNarrowing(narrowing) = &right_ty {
            return match self.narrow(narrowing) {
                Some(narrowed) if narrowed != right => self.calculate_relation(left, narrowed),
                _ => Relation::Incompatible,
            };
        }
        if let TypeConstant::AutoNarrowing(narrowing) = &left_ty {
            return match self.narrow(narrowing) {
                Some(narrowed) if narrowed != left => self.calculate_relation(narrowed, right),
                _ => Relation::Incompatible,
            };
        }

        match (&left_ty, &right_ty) {
            (
                TypeConstant::VirtualChild {
                    parent: left_parent,
                    name: left_name,
                },
                TypeConstant::VirtualChild {
                    parent: right_parent,
                    ..
                },
            ) => {
                return self.virtual_child_relation(
                    *left_parent,
                    left_name,
                    right,
                    *right_parent,
                );
            }
            (TypeConstant::VirtualChild { .. }, _) => {
                return match self.virtual_child_class(left) {
                    Some(class) => {
                        let ty = self.pool.class_type(class);
                        self.calculate_relation(ty, right)
                    }
                    None => Relation::Incompatible,
                };
            }
            (_, TypeConstant::VirtualChild { .. }) => {
                return match self.virtual_child_class(right) {
                    Some(class) => {
                        let ty = self.pool.class_type(class);
                        self.calculate_relation(left, ty)
                    }
                    None => Relation::Incompatible,
                };
            }
            _ => {}
        }

        let Some((left_class, left_params)) = self.split(left) else {
            return Relation::Incompatible;
        };
        let Some((right_class, right_params)) = self.split(right) else {
            return Relation::Incompatible;
        };
        if left_class == right_class {
            return self.calculate_assignability(left_class, &left_params, &right_params);
        }
        match self.find_contribution(right_class, &right_params, left_class, false) {
            ContributionMatch::Found(params) => {
                self.calculate_assignability(left_class, &left_params, &params)
            }
            ContributionMatch::Deferred => {
                debug!(
                    left = %self.describe(left),
                    right = %self.describe(right),
                    "relation deferred on unresolved contribution"
                );
                self.deferrals += 1;
                Relation::Incompatible
            }
            ContributionMatch::NotFound => {
                if self.classes.class(left_class).format() != Format::Interface {
                    return Relation::Incompatible;
                }
                // Marker interfaces are nominal only.
                if self.interface_members(left).is_empty() {
                    return Relation::Incompatible;
                }
                if self.is_interface_assignable_from(left, right).is_empty() {
                    Relation::IsA
                } else {
                    Relation::Incompatible
                }
            }
        }
    }

    /// Relation between two parameterizations of one generic class.
    ///
    /// Positions are compared pairwise. Missing trailing actuals default to the canonical
    /// types; a position used by neither producing nor consuming members always passes.
    pub fn calculate_assignability(
        &mut self,
        class: ClassId,
        left_params: &[TypeId],
        right_params: &[TypeId],
    ) -> Relation {
        let is_tuple = class == core::TUPLE;
        let formal_count = self.classes.class(class).type_params().len();
        if !is_tuple && (left_params.len() > formal_count || right_params.len() > formal_count) {
            warn!(
                class = self.classes.class(class).name(),
                formal_count,
                left = left_params.len(),
                right = right_params.len(),
                "type parameter arity mismatch"
            );
            return Relation::Incompatible;
        }

        let canonical = if is_tuple {
            TypeList::new()
        } else {
            self.canonical_params(class)
        };
        let count = if is_tuple {
            left_params.len().max(right_params.len())
        } else {
            formal_count
        };

        let mut relation = Relation::IsA;
        for idx in 0..count {
            let default = canonical.get(idx).copied().unwrap_or(TypeId::OBJECT);
            let left_param = left_params.get(idx).copied().unwrap_or(default);
            let right_param = right_params.get(idx).copied().unwrap_or(default);
            if left_param == right_param {
                continue;
            }

            let (produces, consumes) = if is_tuple {
                (true, false)
            } else {
                let usage = self.formal_usage(class, idx as u32);
                (usage.produces, usage.consumes)
            };

            match (produces, consumes) {
                (false, false) => {}
                (true, false) => {
                    if !self.is_a(left_param, right_param) {
                        return Relation::Incompatible;
                    }
                }
                (false, true) => {
                    let congruent =
                        self.is_a(left_param, right_param) && self.is_a(right_param, left_param);
                    if !congruent {
                        return Relation::Incompatible;
                    }
                }
                (true, true) => {
                    if !self.is_a(left_param, right_param) {
                        return Relation::Incompatible;
                    }
                    if !self.is_a(right_param, left_param) {
                        relation = Relation::IsAWeak;
                    }
                }
            }
        }
        relation
    }

    /// Searches the contributions of `class` (seen with `params`) for `target`.
    pub fn find_contribution(
        &mut self,
        class: ClassId,
        params: &[TypeId],
        target: ClassId,
        allow_into: bool,
    ) -> ContributionMatch {
        let mut visited = FxHashSet::default();
        self.find_contribution_in(class, params, target, allow_into, &mut visited)
    }

    /// Type-level entry point: relation of `right` to `left` through the contribution graph.
    pub fn find_contribution_relation(
        &mut self,
        left: TypeId,
        right: TypeId,
        allow_into: bool,
    ) -> Relation {
        let (Some((left_class, left_params)), Some((right_class, right_params))) =
            (self.split(left), self.split(right))
        else {
            return Relation::Incompatible;
        };
        match self.find_contribution(right_class, &right_params, left_class, allow_into) {
            ContributionMatch::Found(params) => {
                self.calculate_assignability(left_class, &left_params, &params)
            }
            ContributionMatch::Deferred => {
                self.deferrals += 1;
                Relation::Incompatible
            }
            ContributionMatch::NotFound => Relation::Incompatible,
        }
    }

    fn find_contribution_in(
        &mut self,
        class: ClassId,
        params: &[TypeId],
        target: ClassId,
        allow_into: bool,
        visited: &mut FxHashSet<ClassId>,
    ) -> ContributionMatch {
        if class == target {
            return ContributionMatch::Found(params.iter().copied().collect());
        }
        if !visited.insert(class) {
            return ContributionMatch::NotFound;
        }

        let contributions = self.classes.class(class).contributions().to_vec();
        let mut deferred = false;
        for contribution in contributions {
            if contribution.composition == Composition::Into && !allow_into {
                continue;
            }
            let resolved = self.resolve_generics(contribution.ty, class, params);
            if self.has_unresolved(resolved) {
                deferred = true;
                continue;
            }
            let Some((contributor, contributor_params)) = self.split(resolved) else {
                continue;
            };
            match self.find_contribution_in(
                contributor,
                &contributor_params,
                target,
                allow_into,
                visited,
            ) {
                ContributionMatch::Found(found) => return ContributionMatch::Found(found),
                ContributionMatch::Deferred => deferred = true,
                ContributionMatch::NotFound => {}
            }
        }
        if deferred {
            ContributionMatch::Deferred
        } else {
            ContributionMatch::NotFound
        }
    }

    fn virtual_child_relation(
        &mut self,
        left_parent: TypeId,
        left_name: &str,
        right: TypeId,
        right_parent: TypeId,
    ) -> Relation {
        let right_name = match self.pool.ty(right) {
            TypeConstant::VirtualChild { name, .. } => name.clone(),
            _ => return Relation::Incompatible,
        };
        if right_name != left_name {
            let Some(right_class) = self.virtual_child_class(right) else {
                return Relation::Incompatible;
            };
            if !self.virtual_supers_contain(right_class, left_name) {
                return Relation::Incompatible;
            }
        }
        let relation = Relation::IsA;
        relation.worse_of(self.calculate_relation(left_parent, right_parent))
    }

    fn virtual_supers_contain(&self, class: ClassId, name: &str) -> bool {
        let mut visited = FxHashSet::default();
        let mut stack = vec![class];
        while let Some(current) = stack.pop() {
            if !visited.insert(current) {
                continue;
            }
            let Some(supers) = self.classes.class(current).virtual_supers() else {
                continue;
            };
            for &ty in supers {
                if let Some((super_class, _)) = self.pool.split_class_type(ty) {
                    if self.classes.class(super_class).name() == name {
                        return true;
                    }
                    stack.push(super_class);
                }
            }
        }
        false
    }

    /// The class a virtual child type names, found through its parent's class.
    pub(crate) fn virtual_child_class(&self, ty: TypeId) -> Option<ClassId> {
        match self.pool.ty(ty) {
            TypeConstant::VirtualChild { parent, name } => {
                let parent_class = match self.pool.ty(*parent) {
                    TypeConstant::VirtualChild { .. } => self.virtual_child_class(*parent)?,
                    _ => self.pool.split_class_type(*parent)?.0,
                };
                self.classes.find_contributed_child(&*self.pool, parent_class, name)
            }
            _ => self.pool.split_class_type(ty).map(|(class, _)| class),
        }
    }

    pub(crate) fn formal_constraint(&self, formal: &FormalType) -> TypeId {
        match formal {
            FormalType::TypeParam { class, index, .. } => self
                .classes
                .class(*class)
                .type_params()
                .get(*index as usize)
                .map(|p| p.constraint)
                .unwrap_or(TypeId::OBJECT),
            FormalType::MethodTypeParam { method, index, .. } => self
                .classes
                .method(*method)
                .params()
                .get(*index as usize)
                .map(|p| p.ty)
                .unwrap_or(TypeId::OBJECT),
        }
    }

    fn narrow(&mut self, narrowing: &Narrowing) -> Option<TypeId> {
        let context = self.context?;
        match narrowing {
            Narrowing::This => Some(context),
            Narrowing::Parent => {
                let (class, _) = self.pool.split_class_type(context)?;
                let parent = self.classes.outer_class(class)?;
                Some(self.pool.class_type(parent))
            }
            Narrowing::Child(name) => Some(self.pool.virtual_child(context, name)),
        }
    }

    pub(crate) fn split(&self, ty: TypeId) -> Option<(ClassId, TypeList)> {
        self.pool
            .split_class_type(ty)
            .map(|(class, params)| (class, params.iter().copied().collect()))
    }
}
