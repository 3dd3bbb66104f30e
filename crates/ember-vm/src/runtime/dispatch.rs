use std::cell::RefCell;
use std::rc::Rc;

use ember_asm::{core, ClassId, Component, Composition, ConstId, Format, MethodId, PropertyId, Reg};
use rustc_hash::FxHashSet;
use smallvec::SmallVec;
use tracing::trace;

use super::{Runtime, Step};
use crate::context::{Address, ContextId, Fiber, Message, Wait};
use crate::error::VmError;
use crate::frame::{Continuation, Delivery, Frame, Pending};
use crate::native::{NativeEnv, NativeResult};
use crate::value::{Object, ObjectRef, ServiceRef, Value};

/// A method and its place in the call chain it was found in.
#[derive(Clone, Debug)]
pub(crate) struct Callee {
    pub method: MethodId,
    pub chain: Rc<[MethodId]>,
    pub pos: usize,
}

/// Contributions searched for members, in call-chain order.
const CHAIN_ORDER: [Composition; 3] = [
    Composition::Incorporates,
    Composition::Extends,
    Composition::Implements,
];

fn illegal_argument(message: String) -> Step {
    Step::Exception(Value::exception(core::ILLEGAL_ARGUMENT, message))
}

fn illegal_state(message: String) -> Step {
    Step::Exception(Value::exception(core::ILLEGAL_STATE, message))
}

impl Runtime {
    fn class_name(&self, class: ClassId) -> &str {
        match self.module.classes.get_class(class) {
            Some(structure) => structure.qualified_name(),
            None => "?",
        }
    }

    /// Methods answering `name` with `arity` arguments on `class`, most derived first: the
    /// class itself, then incorporated mixins, the extended class and the default methods of
    /// implemented interfaces.
    pub(crate) fn chain(&mut self, class: ClassId, name: &str, arity: usize) -> Rc<[MethodId]> {
        let key = (class, name.to_string(), arity);
        if let Some(chain) = self.chains.get(&key) {
            return chain.clone();
        }
        let mut found: SmallVec<[MethodId; 4]> = SmallVec::new();
        let mut visited = FxHashSet::default();
        self.collect_chain(class, name, arity, &mut found, &mut visited);
        trace!(class = class.0, name, arity, len = found.len(), "call chain built");
        let chain: Rc<[MethodId]> = Rc::from(found.as_slice());
        self.chains.insert(key, chain.clone());
        chain
    }

    fn collect_chain(
        &self,
        class: ClassId,
        name: &str,
        arity: usize,
        out: &mut SmallVec<[MethodId; 4]>,
        visited: &mut FxHashSet<ClassId>,
    ) {
        if !visited.insert(class) {
            return;
        }
        let Some(structure) = self.module.classes.get_class(class) else {
            return;
        };
        for &id in structure.methods_named(name) {
            let method = self.module.classes.method(id);
            let accepts = method.required_arity() <= arity && arity <= method.value_arity();
            if accepts && !method.flags().is_abstract && !out.contains(&id) {
                out.push(id);
            }
        }
        for composition in CHAIN_ORDER {
            for contribution in structure.contributions() {
                if contribution.composition != composition {
                    continue;
                }
                if let Some((next, _)) = self.module.pool.split_class_type(contribution.ty) {
                    self.collect_chain(next, name, arity, out, visited);
                }
            }
        }
    }

    /// The callee for a direct call of `method`.
    pub(crate) fn callee_of(&mut self, method: MethodId) -> Result<Callee, VmError> {
        let structure = self
            .module
            .classes
            .get_method(method)
            .ok_or(VmError::UnknownMethod(method))?;
        let class = structure.class();
        let name = structure.name().to_string();
        let arity = structure.value_arity();
        let chain = self.chain(class, &name, arity);
        Ok(match chain.iter().position(|m| *m == method) {
            Some(pos) => Callee { method, chain, pos },
            None => Callee {
                method,
                chain: Rc::from([method].as_slice()),
                pos: 0,
            },
        })
    }

    /// Starts a call: a frame for bytecode, an immediate answer for natives.
    pub(crate) fn begin_call(
        &mut self,
        ctx: ContextId,
        fiber: &mut Fiber,
        callee: Callee,
        this: Value,
        mut args: Vec<Value>,
        continuation: Continuation,
    ) -> Result<Step, VmError> {
        let method = self
            .module
            .classes
            .get_method(callee.method)
            .ok_or(VmError::UnknownMethod(callee.method))?;
        let (required, arity) = (method.required_arity(), method.value_arity());
        if args.len() < required || args.len() > arity {
            return Ok(illegal_argument(format!(
                "`{}` takes {required}..={arity} argument(s), got {}",
                method.name(),
                args.len()
            )));
        }
        let defaults: Vec<ConstId> = method
            .value_params()
            .skip(args.len())
            .filter_map(|p| p.default)
            .collect();
        let flags = method.flags();
        let name = method.name().to_string();

        // Defaults naming singletons are bound by the callee frame once they are initialized.
        let mut pending = Vec::new();
        for default in defaults {
            if !flags.is_native && self.refers_to_singletons(default) {
                pending.push(Pending::Register(Reg(args.len() as u32), default));
                args.push(Value::Null);
                continue;
            }
            match self.initialized_value(default)? {
                Some(value) => args.push(value),
                None => {
                    return Ok(illegal_state(format!(
                        "the default for `{name}` needs a singleton that is not initialized"
                    )));
                }
            }
        }
        let this = if flags.is_static { Value::Null } else { this };
        if flags.is_native {
            return self.call_native(ctx, fiber, callee.method, this, args, continuation);
        }
        if flags.is_abstract {
            return Ok(illegal_state(format!("`{name}` is abstract")));
        }
        let Some(code) = self.code(callee.method) else {
            return Err(VmError::InvalidState {
                message: format!("method `{name}` is not assembled"),
            });
        };
        trace!(method = %name, args = args.len(), "enter");
        let mut frame = Frame::new(
            callee.method,
            code,
            this,
            args,
            callee.chain,
            callee.pos,
            continuation,
        );
        frame.pending = pending;
        Ok(Step::Call(Box::new(frame)))
    }

    /// Hands `pending` to the frame `step` opens. Without a frame to bind them in, a frame
    /// with no ops is opened for `this` that completes `continuation` once they are bound.
    pub(crate) fn with_pending(
        &self,
        step: Option<Step>,
        this: Value,
        pending: Vec<Pending>,
        continuation: Continuation,
    ) -> Option<Step> {
        match step {
            Some(Step::Call(mut frame)) => {
                frame.pending.extend(pending);
                Some(Step::Call(frame))
            }
            Some(step) => Some(step),
            None if pending.is_empty() => None,
            None => Some(Step::Call(Box::new(Frame::prelude(
                self.prelude.clone(),
                this,
                pending,
                continuation,
            )))),
        }
    }

    fn call_native(
        &mut self,
        ctx: ContextId,
        fiber: &mut Fiber,
        method: MethodId,
        this: Value,
        args: Vec<Value>,
        continuation: Continuation,
    ) -> Result<Step, VmError> {
        let structure = self.module.classes.method(method);
        let name = structure.name().to_string();
        let returns = structure.returns().len();
        let class_name = self.class_name(structure.class());
        // Natives declared on classes without a template of their own get the structural
        // Object behavior.
        let Some(template) = self
            .natives
            .get(class_name)
            .or_else(|| self.natives.get("Object"))
        else {
            return Ok(illegal_state(format!(
                "no native implementation of `{class_name}.{name}`"
            )));
        };
        let env = NativeEnv {
            module: &self.module,
        };
        let result = match args.as_slice() {
            [arg] => template.invoke_native1(&env, &name, &this, arg),
            _ => template.invoke_native_n(&env, &name, &this, &args),
        };
        if self.config.metrics {
            self.metrics.native_calls += 1;
        }
        trace!(method = %name, "native");
        self.native_result(ctx, fiber, result, returns, continuation)
    }

    fn native_result(
        &mut self,
        ctx: ContextId,
        fiber: &mut Fiber,
        result: NativeResult,
        returns: usize,
        continuation: Continuation,
    ) -> Result<Step, VmError> {
        match result {
            NativeResult::Value(value) => {
                let values = if returns == 0 { Vec::new() } else { vec![value] };
                self.resume_with(fiber, continuation, values)?;
                Ok(Step::Next)
            }
            NativeResult::Exception(exception) => Ok(Step::Exception(exception)),
            NativeResult::Call(call) => {
                let continuation = match (call.append_to, continuation) {
                    (Some(prefix), Continuation::Deliver(Delivery { dsts, prefix: None })) => {
                        Continuation::Deliver(Delivery {
                            dsts,
                            prefix: Some(prefix),
                        })
                    }
                    (_, continuation) => continuation,
                };
                self.invoke_value(ctx, fiber, call.target, &call.name, call.args, continuation)
            }
        }
    }

    /// Calls `name` on `target`'s runtime class; a service owned by another context gets an
    /// `Invoke` message and the fiber parks.
    pub(crate) fn invoke_value(
        &mut self,
        ctx: ContextId,
        fiber: &mut Fiber,
        target: Value,
        name: &str,
        args: Vec<Value>,
        continuation: Continuation,
    ) -> Result<Step, VmError> {
        if let Value::Service(service) = &target
            && service.context != ctx
        {
            let to = service.context;
            self.send(
                to,
                Message::Invoke {
                    target,
                    name: name.to_string(),
                    args,
                    reply_to: Address {
                        context: ctx,
                        fiber: fiber.id,
                    },
                },
            )?;
            return Ok(Step::Block(Wait::Results(continuation)));
        }

        let class = target.class();
        let chain = self.chain(class, name, args.len());
        let Some(&method) = chain.first() else {
            return Ok(illegal_argument(format!(
                "{} has no method `{name}` taking {} argument(s)",
                self.class_name(class),
                args.len()
            )));
        };
        let callee = Callee {
            method,
            chain,
            pos: 0,
        };
        self.begin_call(ctx, fiber, callee, target, args, continuation)
    }

    /// Non-static properties of `class` and its bases, base first.
    fn instance_fields(&self, class: ClassId) -> Vec<(String, Option<ConstId>)> {
        let mut out = Vec::new();
        let mut visited = FxHashSet::default();
        self.collect_fields(class, &mut out, &mut visited);
        out
    }

    fn collect_fields(
        &self,
        class: ClassId,
        out: &mut Vec<(String, Option<ConstId>)>,
        visited: &mut FxHashSet<ClassId>,
    ) {
        if !visited.insert(class) {
            return;
        }
        let Some(structure) = self.module.classes.get_class(class) else {
            return;
        };
        for contribution in structure.contributions() {
            if matches!(
                contribution.composition,
                Composition::Extends | Composition::Incorporates
            ) && let Some((base, _)) = self.module.pool.split_class_type(contribution.ty)
            {
                self.collect_fields(base, out, visited);
            }
        }
        for child in structure.children() {
            let Component::Property(id) = child else {
                continue;
            };
            let property = self.module.classes.property(*id);
            if !property.is_static && !out.iter().any(|(name, _)| *name == property.name) {
                out.push((property.name.clone(), property.initial));
            }
        }
    }

    fn find_property(&self, class: ClassId, name: &str) -> Option<PropertyId> {
        let mut visited = FxHashSet::default();
        let mut pending = vec![class];
        while let Some(class) = pending.pop() {
            if !visited.insert(class) {
                continue;
            }
            let Some(structure) = self.module.classes.get_class(class) else {
                continue;
            };
            for child in structure.children() {
                if let Component::Property(id) = child
                    && self.module.classes.property(*id).name == name
                {
                    return Some(*id);
                }
            }
            pending.extend(structure.contributions().iter().filter_map(|c| {
                matches!(c.composition, Composition::Extends | Composition::Incorporates)
                    .then(|| self.module.pool.split_class_type(c.ty).map(|(base, _)| base))
                    .flatten()
            }));
        }
        None
    }

    /// Fields whose initial value names a singleton start out null and are returned as
    /// pending.
    fn allocate(&self, class: ClassId) -> Result<(ObjectRef, Vec<Pending>), VmError> {
        let mut object = Object::new(class);
        let mut pending = Vec::new();
        for (name, initial) in self.instance_fields(class) {
            let value = match initial {
                Some(id) if self.refers_to_singletons(id) => {
                    pending.push(Pending::Field(name.clone(), id));
                    Value::Null
                }
                Some(id) => self.constant_value(id)?,
                None => Value::Null,
            };
            object.fields.insert(name, value);
        }
        Ok((Rc::new(RefCell::new(object)), pending))
    }

    /// Allocates an instance; a service gets a context of its own.
    pub(crate) fn create(&mut self, class: ClassId) -> Result<(Value, Vec<Pending>), VmError> {
        let (object, pending) = self.allocate(class)?;
        let structure = self.module.classes.class(class);
        if structure.format() == Format::Service {
            let name = structure.qualified_name().to_string();
            let context = self.spawn_context(&name);
            return Ok((Value::Service(ServiceRef { context, object }), pending));
        }
        Ok((Value::Object(object), pending))
    }

    /// `New`: allocate, then run a matching `construct` or assign the arguments to the
    /// fields in declaration order.
    pub(crate) fn new_instance(
        &mut self,
        ctx: ContextId,
        fiber: &mut Fiber,
        class: ClassId,
        args: Vec<Value>,
        dst: Option<Reg>,
    ) -> Result<Step, VmError> {
        let Some(structure) = self.module.classes.get_class(class) else {
            return Err(VmError::InvalidState {
                message: format!("unknown class #{}", class.0),
            });
        };
        let value = match class {
            core::ARRAY => Some(Value::array(args.clone())),
            core::STRING_BUFFER => {
                let text: String = args.iter().map(Value::to_string).collect();
                Some(Value::Buffer(Rc::new(RefCell::new(text))))
            }
            _ => None,
        };
        if let Some(value) = value {
            self.resume_with(fiber, Continuation::Construct { object: value, dst }, Vec::new())?;
            return Ok(Step::Next);
        }
        if structure.is_abstract()
            || matches!(
                structure.format(),
                Format::Interface | Format::Mixin | Format::Module | Format::Package
            )
        {
            return Ok(illegal_state(format!(
                "{} cannot be instantiated",
                structure.qualified_name()
            )));
        }

        let (value, mut pending) = self.create(class)?;
        let continuation = Continuation::Construct {
            object: value.clone(),
            dst,
        };
        let chain = self.chain(class, "construct", args.len());
        if let Some(&method) = chain.first() {
            let callee = Callee {
                method,
                chain,
                pos: 0,
            };
            let step = self.begin_call(ctx, fiber, callee, value.clone(), args, continuation.clone())?;
            return Ok(self
                .with_pending(Some(step), value, pending, continuation)
                .unwrap_or(Step::Next));
        }

        let fields = self.instance_fields(class);
        if args.len() > fields.len() {
            return Ok(illegal_argument(format!(
                "{} has {} field(s), got {} argument(s)",
                self.class_name(class),
                fields.len(),
                args.len()
            )));
        }
        if let Some(object) = value.as_object() {
            let mut object = object.borrow_mut();
            for ((name, _), arg) in fields.into_iter().zip(args) {
                pending.retain(|p| !matches!(p, Pending::Field(field, _) if *field == name));
                object.fields.insert(name, arg);
            }
        }
        if let Some(step) = self.with_pending(None, value, pending, continuation.clone()) {
            return Ok(step);
        }
        self.resume_with(fiber, continuation, Vec::new())?;
        Ok(Step::Next)
    }

    /// `PGet`: a field, a zero-argument method of the same name, or a native property.
    pub(crate) fn get_property(
        &mut self,
        ctx: ContextId,
        fiber: &mut Fiber,
        target: Value,
        name: &str,
        continuation: Continuation,
    ) -> Result<Step, VmError> {
        if let Value::Service(service) = &target
            && service.context != ctx
        {
            let to = service.context;
            self.send(
                to,
                Message::PropertyGet {
                    target,
                    property: name.to_string(),
                    reply_to: Address {
                        context: ctx,
                        fiber: fiber.id,
                    },
                },
            )?;
            return Ok(Step::Block(Wait::Results(continuation)));
        }

        if let Some(object) = target.as_object() {
            let field = object.borrow().fields.get(name).cloned();
            if let Some(value) = field {
                self.resume_with(fiber, continuation, vec![value])?;
                return Ok(Step::Next);
            }
            let chain = self.chain(target.class(), name, 0);
            if let Some(&method) = chain.first() {
                let callee = Callee {
                    method,
                    chain,
                    pos: 0,
                };
                return self.begin_call(ctx, fiber, callee, target, Vec::new(), continuation);
            }
            return Ok(illegal_argument(format!(
                "{} has no property `{name}`",
                self.class_name(target.class())
            )));
        }

        let class_name = self.class_name(target.class());
        let Some(template) = self.natives.get(class_name) else {
            return Ok(illegal_argument(format!("{class_name} has no property `{name}`")));
        };
        let env = NativeEnv {
            module: &self.module,
        };
        let result = template.invoke_native_get(&env, name, &target);
        self.native_result(ctx, fiber, result, 1, continuation)
    }

    /// `PSet`: fields of local instances only; readonly properties refuse.
    pub(crate) fn set_property(
        &mut self,
        ctx: ContextId,
        target: Value,
        name: &str,
        value: Value,
    ) -> Result<Step, VmError> {
        if let Value::Service(service) = &target
            && service.context != ctx
        {
            return Ok(illegal_state(format!(
                "cannot set `{name}` on a service owned by another context"
            )));
        }
        let Some(object) = target.as_object() else {
            return Ok(illegal_state(format!(
                "cannot set `{name}` on a {} value",
                target.kind()
            )));
        };
        let class = object.borrow().class;
        let property = self.find_property(class, name);
        if let Some(id) = property
            && self.module.classes.property(id).readonly
        {
            return Ok(illegal_state(format!("property `{name}` is readonly")));
        }
        let known = property.is_some() || object.borrow().fields.contains_key(name);
        if !known {
            return Ok(illegal_argument(format!(
                "{} has no property `{name}`",
                self.class_name(class)
            )));
        }
        object.borrow_mut().fields.insert(name.to_string(), value);
        Ok(Step::Next)
    }
}
