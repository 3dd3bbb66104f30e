use super::{FormalType, TypeConstant, TypeSystem};
use crate::class::{Component, Composition};
use crate::core;
use crate::pool::TypeId;
use crate::types::Access;
use crate::ClassId;

/// Where a class's formal parameter appears in its public surface.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct Usage {
    pub produces: bool,
    pub consumes: bool,
}

impl Usage {
    fn absorb(&mut self, other: Usage) {
        self.produces |= other.produces;
        self.consumes |= other.consumes;
    }

    fn flipped(self) -> Usage {
        Usage {
            produces: self.consumes,
            consumes: self.produces,
        }
    }
}

impl TypeSystem<'_> {
    /// Whether the formal parameter `name` of `class` appears in a producing position
    /// (a getter or a method return, transitively through nested generics and contributions).
    pub fn produces_formal_type(&mut self, class: ClassId, name: &str) -> bool {
        self.formal_index(class, name)
            .is_some_and(|index| self.formal_usage(class, index).produces)
    }

    /// Whether the formal parameter `name` of `class` appears in a consuming position
    /// (a setter or a method parameter, transitively).
    pub fn consumes_formal_type(&mut self, class: ClassId, name: &str) -> bool {
        self.formal_index(class, name)
            .is_some_and(|index| self.formal_usage(class, index).consumes)
    }

    fn formal_index(&self, class: ClassId, name: &str) -> Option<u32> {
        self.classes
            .class(class)
            .type_params()
            .iter()
            .position(|p| p.name == name)
            .map(|idx| idx as u32)
    }

    pub(crate) fn formal_usage(&mut self, class: ClassId, index: u32) -> Usage {
        if class == core::TUPLE {
            return Usage {
                produces: true,
                consumes: false,
            };
        }
        let key = (class, index);
        if let Some(&usage) = self.cache.usage.get(&key) {
            return usage;
        }
        // Recursion through a self-referential surface contributes nothing new.
        if !self.usage_stack.insert(key) {
            return Usage::default();
        }

        let Some(name) = self
            .classes
            .class(class)
            .type_params()
            .get(index as usize)
            .map(|p| p.name.clone())
        else {
            self.usage_stack.remove(&key);
            return Usage::default();
        };
        let formal = self.pool.formal(FormalType::TypeParam { class, name, index });

        let mut usage = Usage::default();
        let children = self.classes.class(class).children().to_vec();
        for child in children {
            match child {
                Component::Property(id) => {
                    let property = self.classes.property(id);
                    if property.access == Access::Private {
                        continue;
                    }
                    let (ty, readonly) = (property.ty, property.readonly);
                    let getter = self.type_usage(ty, formal);
                    usage.absorb(getter);
                    if !readonly {
                        usage.absorb(getter.flipped());
                    }
                }
                Component::MultiMethod { methods, .. } => {
                    for id in methods {
                        let method = self.classes.method(id);
                        if method.access() == Access::Private || method.flags().is_static {
                            continue;
                        }
                        let returns: Vec<TypeId> = method.returns().iter().map(|p| p.ty).collect();
                        let params: Vec<TypeId> = method.value_params().map(|p| p.ty).collect();
                        for ty in returns {
                            let produced = self.type_usage(ty, formal);
                            usage.absorb(produced);
                        }
                        for ty in params {
                            let consumed = self.type_usage(ty, formal);
                            usage.absorb(consumed.flipped());
                        }
                    }
                }
                Component::Class(_) => {}
            }
        }

        let contributions = self.classes.class(class).contributions().to_vec();
        for contribution in contributions {
            if contribution.composition == Composition::Into {
                continue;
            }
            let contributed = self.type_usage(contribution.ty, formal);
            usage.absorb(contributed);
        }

        self.usage_stack.remove(&key);
        if self.usage_stack.is_empty() {
            self.cache.usage.insert(key, usage);
        }
        usage
    }

    /// How `formal` is used when it appears inside `ty` in a producing position.
    ///
    /// The formal itself produces; inside `C<..., X, ...>` the answer for `X` is flipped
    /// when `C` consumes its own parameter at that position.
    fn type_usage(&mut self, ty: TypeId, formal: TypeId) -> Usage {
        if ty == formal {
            return Usage {
                produces: true,
                consumes: false,
            };
        }
        match self.pool.ty(ty).clone() {
            TypeConstant::Parameterized { base, params } => {
                let Some((class, _)) = self.pool.split_class_type(base) else {
                    return Usage::default();
                };
                let mut usage = Usage::default();
                for (idx, param) in params.iter().enumerate() {
                    let inner = self.type_usage(*param, formal);
                    if inner == Usage::default() {
                        continue;
                    }
                    let position = self.formal_usage(class, idx as u32);
                    if position.produces {
                        usage.absorb(inner);
                    }
                    if position.consumes {
                        usage.absorb(inner.flipped());
                    }
                }
                usage
            }
            TypeConstant::Union(a, b) | TypeConstant::Intersection(a, b) => {
                let mut usage = self.type_usage(a, formal);
                usage.absorb(self.type_usage(b, formal));
                usage
            }
            TypeConstant::Access { underlying, .. }
            | TypeConstant::Annotated { underlying, .. } => self.type_usage(underlying, formal),
            _ => Usage::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::class::{Format, PropertyStructure};
    use crate::method::MethodStructure;
    use crate::param::Parameter;
    use crate::pool::TypeId;
    use crate::types::FormalType;
    use crate::{ClassId, Module};

    fn generic_class(module: &mut Module, name: &str) -> (ClassId, TypeId) {
        let class = module
            .classes
            .add_class(name, Format::Class, None)
            .unwrap();
        module
            .classes
            .add_type_param(class, "T", TypeId::OBJECT)
            .unwrap();
        let t = module.pool.formal(FormalType::TypeParam {
            class,
            name: "T".to_string(),
            index: 0,
        });
        (class, t)
    }

    #[test]
    fn readonly_property_only_produces() {
        let mut module = Module::new("test");
        let (class, t) = generic_class(&mut module, "Holder");
        module
            .classes
            .add_property(class, PropertyStructure::new("value", t).readonly())
            .unwrap();
        let mut ts = module.type_system();
        assert!(ts.produces_formal_type(class, "T"));
        assert!(!ts.consumes_formal_type(class, "T"));
    }

    #[test]
    fn writable_property_produces_and_consumes() {
        let mut module = Module::new("test");
        let (class, t) = generic_class(&mut module, "Cell");
        module
            .classes
            .add_property(class, PropertyStructure::new("value", t))
            .unwrap();
        let mut ts = module.type_system();
        assert!(ts.produces_formal_type(class, "T"));
        assert!(ts.consumes_formal_type(class, "T"));
    }

    #[test]
    fn private_members_are_ignored() {
        let mut module = Module::new("test");
        let (class, t) = generic_class(&mut module, "Sink");
        let private_get = MethodStructure::new("peek", vec![], vec![Parameter::ret(t)])
            .unwrap()
            .as_native()
            .with_access(crate::types::Access::Private);
        module.classes.add_method(class, private_get).unwrap();
        let mut ts = module.type_system();
        assert!(!ts.produces_formal_type(class, "T"));
        assert!(!ts.consumes_formal_type(class, "T"));
    }

    #[test]
    fn consumer_of_a_consumer_produces() {
        let mut module = Module::new("test");
        let (sink, sink_t) = generic_class(&mut module, "Sink");
        let accept = MethodStructure::new("accept", vec![Parameter::value("v", sink_t)], vec![])
            .unwrap()
            .as_native();
        module.classes.add_method(sink, accept).unwrap();

        let (source, source_t) = generic_class(&mut module, "Source");
        let sink_of_t = module.pool.parameterized(sink, &[source_t]);
        let drain = MethodStructure::new("drain", vec![Parameter::value("to", sink_of_t)], vec![])
            .unwrap()
            .as_native();
        module.classes.add_method(source, drain).unwrap();

        let mut ts = module.type_system();
        assert!(ts.consumes_formal_type(sink, "T"));
        assert!(ts.produces_formal_type(source, "T"));
        assert!(!ts.consumes_formal_type(source, "T"));
    }

    #[test]
    fn self_referential_surface_terminates() {
        let mut module = Module::new("test");
        let (list, t) = generic_class(&mut module, "List");
        let list_of_t = module.pool.parameterized(list, &[t]);
        let tail = MethodStructure::new("tail", vec![], vec![Parameter::ret(list_of_t)])
            .unwrap()
            .as_native();
        module.classes.add_method(list, tail).unwrap();
        let head = MethodStructure::new("head", vec![], vec![Parameter::ret(t)])
            .unwrap()
            .as_native();
        module.classes.add_method(list, head).unwrap();
        let mut ts = module.type_system();
        assert!(ts.produces_formal_type(list, "T"));
        assert!(!ts.consumes_formal_type(list, "T"));
    }
}
