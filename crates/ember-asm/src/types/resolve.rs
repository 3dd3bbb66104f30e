use tracing::debug;

use super::{ResolutionResult, TypeConstant, TypeList, TypeSystem};
use crate::pool::TypeId;

impl TypeSystem<'_> {
    /// Binds every unresolved name inside `ty` through the class table.
    ///
    /// `Unknown` wins over `Possible`: one name that can never bind makes the whole type
    /// unresolvable.
    pub fn resolve_type(&mut self, ty: TypeId) -> ResolutionResult<TypeId> {
        match self.pool.ty(ty).clone() {
            TypeConstant::Unresolved(name) => match self.classes.resolve_name(&name) {
                ResolutionResult::Resolved(class) => {
                    ResolutionResult::Resolved(self.pool.class_type(class))
                }
                other => {
                    debug!(name = %name, result = ?other, "type name not bound");
                    other.map(|_| ty)
                }
            },
            TypeConstant::Parameterized { base, params } => {
                let mut parts = vec![base];
                parts.extend(params.iter().copied());
                self.resolve_all(&parts).map(|resolved| {
                    let params: TypeList = resolved[1..].iter().copied().collect();
                    self.pool.parameterized_over(resolved[0], params)
                })
            }
            TypeConstant::Union(a, b) => self
                .resolve_all(&[a, b])
                .map(|r| self.pool.union(r[0], r[1])),
            TypeConstant::Intersection(a, b) => self
                .resolve_all(&[a, b])
                .map(|r| self.pool.intersection(r[0], r[1])),
            TypeConstant::Annotated {
                annotation,
                underlying,
            } => self
                .resolve_all(&[annotation, underlying])
                .map(|r| self.pool.annotated(r[0], r[1])),
            TypeConstant::Access { underlying, access } => self
                .resolve_type(underlying)
                .map(|r| self.pool.access(r, access)),
            TypeConstant::VirtualChild { parent, name } => self
                .resolve_type(parent)
                .map(|r| self.pool.virtual_child(r, &name)),
            TypeConstant::Terminal(_)
            | TypeConstant::Formal(_)
            | TypeConstant::AutoNarrowing(_) => ResolutionResult::Resolved(ty),
        }
    }

    fn resolve_all(&mut self, parts: &[TypeId]) -> ResolutionResult<Vec<TypeId>> {
        let mut resolved = Vec::with_capacity(parts.len());
        let mut possible = false;
        for part in parts {
            match self.resolve_type(*part) {
                ResolutionResult::Resolved(ty) => resolved.push(ty),
                ResolutionResult::Unknown => return ResolutionResult::Unknown,
                ResolutionResult::Possible => possible = true,
            }
        }
        if possible {
            ResolutionResult::Possible
        } else {
            ResolutionResult::Resolved(resolved)
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::class::Format;
    use crate::pool::TypeId;
    use crate::types::ResolutionResult;
    use crate::{core, Module};

    #[test]
    fn resolves_nested_names() {
        let mut module = Module::new("test");
        let pending = module.pool.unresolved_type("String");
        let array = module.pool.parameterized(core::ARRAY, &[pending]);
        let mut ts = module.type_system();
        let expected = ts.pool().parameterized(core::ARRAY, &[TypeId::STRING]);
        assert_eq!(ts.resolve_type(array), ResolutionResult::Resolved(expected));
    }

    #[test]
    fn unknown_beats_possible() {
        let mut module = Module::new("test");
        module.classes.add_class("a.Widget", Format::Class, None).unwrap();
        module.classes.add_class("b.Widget", Format::Class, None).unwrap();
        let ambiguous = module.pool.unresolved_type("Widget");
        let missing = module.pool.unresolved_type("Gadget");
        let both = module.pool.union(ambiguous, missing);
        let mut ts = module.type_system();
        assert_eq!(ts.resolve_type(ambiguous), ResolutionResult::Possible);
        assert_eq!(ts.resolve_type(missing), ResolutionResult::Unknown);
        assert_eq!(ts.resolve_type(both), ResolutionResult::Unknown);
    }
}
