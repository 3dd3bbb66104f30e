use rustc_hash::FxHashSet;
use tracing::debug;

use super::{Bindings, FormalOwner, TypeList, TypeSystem};
use crate::class::{Component, Composition};
use crate::pool::{MemberKind, SignatureConstant, TypeId};
use crate::types::Access;
use crate::ClassId;

impl TypeSystem<'_> {
    /// Members of the interface `left` that `right` has no substitutable counterpart for.
    ///
    /// An empty set means `right` structurally satisfies `left`. Every gap is reported so a
    /// caller can list them all.
    pub fn is_interface_assignable_from(
        &mut self,
        left: TypeId,
        right: TypeId,
    ) -> FxHashSet<SignatureConstant> {
        let mut missing = FxHashSet::default();
        for sig in self.interface_members(left) {
            if !self.contains_substitutable_method(right, &sig) {
                missing.insert(sig);
            }
        }
        if !missing.is_empty() {
            debug!(
                left = %self.describe(left),
                right = %self.describe(right),
                gaps = missing.len(),
                "interface is not satisfied"
            );
        }
        missing
    }

    /// Whether the class behind `ty` (or one of its contributions) has a member that can stand
    /// in for `sig`: same name and arity, parameters accepting the required ones, returns
    /// fitting the required ones. A settable property is checked both ways: its getter
    /// covariantly, its setter contravariantly.
    pub fn contains_substitutable_method(&mut self, ty: TypeId, sig: &SignatureConstant) -> bool {
        let Some((class, params)) = self.split(ty) else {
            return false;
        };
        for (current, current_params) in self.contribution_chain(class, &params) {
            let candidates = self.member_signatures(current, &current_params, ty, &sig.name);
            for candidate in candidates {
                if candidate.kind != sig.kind || candidate.returns.len() != sig.returns.len() {
                    continue;
                }
                // A readonly property requirement says nothing about the offered setter.
                let params_fit = match sig.kind {
                    MemberKind::Property if sig.params.is_empty() => true,
                    _ => {
                        candidate.params.len() == sig.params.len()
                            && sig
                                .params
                                .iter()
                                .zip(candidate.params.iter())
                                .all(|(required, offered)| self.is_a(*offered, *required))
                    }
                };
                let returns_fit = sig
                    .returns
                    .iter()
                    .zip(candidate.returns.iter())
                    .all(|(required, offered)| self.is_a(*required, *offered));
                if params_fit && returns_fit {
                    return true;
                }
            }
        }
        false
    }

    /// Signatures of every non-private instance member of the interface type, with generics
    /// resolved against its actuals and `this` narrowed to the interface type itself.
    pub(crate) fn interface_members(&mut self, left: TypeId) -> Vec<SignatureConstant> {
        let Some((class, params)) = self.split(left) else {
            return Vec::new();
        };
        let mut members: Vec<SignatureConstant> = Vec::new();
        for (current, current_params) in self.contribution_chain(class, &params) {
            let names: Vec<String> = self
                .classes
                .class(current)
                .children()
                .iter()
                .filter_map(|c| match c {
                    Component::Property(p) => Some(self.classes.property(*p).name.clone()),
                    Component::MultiMethod { name, .. } => Some(name.clone()),
                    Component::Class(_) => None,
                })
                .collect();
            for name in names {
                for sig in self.member_signatures(current, &current_params, left, &name) {
                    let seen = members.iter().any(|m| {
                        m.name == sig.name && m.kind == sig.kind && m.params.len() == sig.params.len()
                    });
                    if !seen {
                        members.push(sig);
                    }
                }
            }
        }
        members
    }

    /// Non-private instance members of `class` named `name`, as resolved signatures.
    fn member_signatures(
        &mut self,
        class: ClassId,
        params: &[TypeId],
        this: TypeId,
        name: &str,
    ) -> Vec<SignatureConstant> {
        let mut raw: Vec<(MemberKind, TypeList, TypeList)> = Vec::new();
        for component in self.classes.class(class).children() {
            match component {
                Component::Property(id) => {
                    let property = self.classes.property(*id);
                    if property.name == name
                        && property.access != Access::Private
                        && !property.is_static
                    {
                        // The setter consumes the property type.
                        let setter: TypeList = if property.readonly {
                            TypeList::new()
                        } else {
                            std::iter::once(property.ty).collect()
                        };
                        raw.push((
                            MemberKind::Property,
                            setter,
                            std::iter::once(property.ty).collect(),
                        ));
                    }
                }
                Component::MultiMethod {
                    name: method_name,
                    methods,
                } if method_name == name => {
                    for id in methods {
                        let method = self.classes.method(*id);
                        if method.access() == Access::Private || method.flags().is_static {
                            continue;
                        }
                        raw.push((
                            MemberKind::Method,
                            method.value_params().map(|p| p.ty).collect(),
                            method.returns().iter().map(|p| p.ty).collect(),
                        ));
                    }
                }
                _ => {}
            }
        }

        let mut full: TypeList = params.iter().copied().collect();
        let canonical = self.canonical_params(class);
        if full.len() < canonical.len() {
            full.extend(canonical[full.len()..].iter().copied());
        }
        let bindings = Bindings {
            owner: FormalOwner::Class(class),
            actuals: &full,
            this: Some(this),
        };
        raw.into_iter()
            .map(|(kind, param_types, return_types)| SignatureConstant {
                name: name.to_string(),
                kind,
                params: param_types
                    .iter()
                    .map(|t| self.substitute(*t, &bindings))
                    .collect(),
                returns: return_types
                    .iter()
                    .map(|t| self.substitute(*t, &bindings))
                    .collect(),
            })
            .collect()
    }

    /// `class` followed by every class it contributes from (except through `into`), each
    /// with its actual parameters, in depth-first declaration order.
    pub(crate) fn contribution_chain(
        &mut self,
        class: ClassId,
        params: &[TypeId],
    ) -> Vec<(ClassId, TypeList)> {
        let mut out = Vec::new();
        let mut visited = FxHashSet::default();
        self.collect_chain(class, params.iter().copied().collect(), &mut visited, &mut out);
        out
    }

    fn collect_chain(
        &mut self,
        class: ClassId,
        params: TypeList,
        visited: &mut FxHashSet<ClassId>,
        out: &mut Vec<(ClassId, TypeList)>,
    ) {
        if !visited.insert(class) {
            return;
        }
        let contributions = self.classes.class(class).contributions().to_vec();
        out.push((class, params.clone()));
        for contribution in contributions {
            if contribution.composition == Composition::Into {
                continue;
            }
            let resolved = self.resolve_generics(contribution.ty, class, &params);
            if let Some((next, next_params)) = self.split(resolved) {
                self.collect_chain(next, next_params, visited, out);
            }
        }
    }
}
