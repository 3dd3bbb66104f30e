//! The interpreter: a cooperative scheduler over service contexts, each running fibers of
//! register frames.

mod dispatch;
mod init;
mod step;

use std::rc::Rc;

use ember_asm::{core, synth, AssembledCode, ClassId, ConstId, Constant, MethodId, Module, TypeId};
use rustc_hash::FxHashMap;
use tracing::{debug, trace, warn};

use crate::config::RuntimeConfig;
use crate::context::{ContextId, Fiber, FiberId, FiberOrigin, Message, ServiceContext, Wait};
use crate::error::VmError;
use crate::frame::{Continuation, Delivery};
use crate::metrics::VmMetrics;
use crate::native::{NativeRegistry, NativeTemplate};
use crate::value::Value;

pub(crate) use dispatch::Callee;
pub(crate) use init::SingletonState;
pub(crate) use step::Step;

/// How a call ended.
#[derive(Clone, Debug, PartialEq)]
pub enum Outcome {
    Returned(Vec<Value>),
    /// An in-language exception nothing caught.
    Threw(Value),
}

impl Outcome {
    /// The first returned value.
    pub fn value(&self) -> Option<&Value> {
        match self {
            Outcome::Returned(values) => values.first(),
            Outcome::Threw(_) => None,
        }
    }

    pub fn exception(&self) -> Option<&Value> {
        match self {
            Outcome::Threw(exception) => Some(exception),
            Outcome::Returned(_) => None,
        }
    }
}

impl From<Result<Vec<Value>, Value>> for Outcome {
    fn from(result: Result<Vec<Value>, Value>) -> Self {
        match result {
            Ok(values) => Outcome::Returned(values),
            Err(exception) => Outcome::Threw(exception),
        }
    }
}

/// Runs the methods of one assembled module.
pub struct Runtime {
    module: Module,
    config: RuntimeConfig,
    natives: NativeRegistry,
    codes: Vec<Option<Rc<AssembledCode>>>,
    /// Code of the frames that only bind pending field initials.
    prelude: Rc<AssembledCode>,
    chains: FxHashMap<(ClassId, String, usize), Rc<[MethodId]>>,
    contexts: Vec<ServiceContext>,
    singletons: FxHashMap<ClassId, SingletonState>,
    outcomes: FxHashMap<FiberId, Outcome>,
    next_fiber: u64,
    metrics: VmMetrics,
}

impl Runtime {
    pub fn new(module: Module) -> Result<Self, VmError> {
        Self::with_config(module, RuntimeConfig::default())
    }

    /// Adds synthetic members, assembles every method, freezes the class table and opens
    /// the main context.
    pub fn with_config(mut module: Module, config: RuntimeConfig) -> Result<Self, VmError> {
        synth::synthesize_all(&mut module)?;
        module.assemble_all(&config.assemble)?;
        module.classes.freeze_all();
        let codes = module
            .classes
            .methods()
            .map(|method| method.code().assembled().cloned().map(Rc::new))
            .collect();
        debug!(
            module = %module.name,
            methods = module.classes.method_count(),
            "runtime loaded"
        );
        Ok(Self {
            module,
            config,
            natives: NativeRegistry::with_core(),
            codes,
            prelude: Rc::new(AssembledCode {
                ops: Vec::new(),
                depths: Vec::new(),
                max_vars: 0,
                max_scopes: 1,
                param_count: 0,
                constants: Vec::new(),
                bytes: Vec::new(),
            }),
            chains: FxHashMap::default(),
            contexts: vec![ServiceContext::new(ContextId::MAIN, "main")],
            singletons: FxHashMap::default(),
            outcomes: FxHashMap::default(),
            next_fiber: 0,
            metrics: VmMetrics::default(),
        })
    }

    pub fn module(&self) -> &Module {
        &self.module
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn metrics(&self) -> &VmMetrics {
        &self.metrics
    }

    pub fn take_metrics(&mut self) -> VmMetrics {
        std::mem::take(&mut self.metrics)
    }

    /// Registers native behavior for the class with this qualified name.
    pub fn register_native(&mut self, class: impl Into<String>, template: impl NativeTemplate) {
        self.natives.register(class, template);
    }

    /// Contexts opened so far; main plus one per service instance.
    pub fn context_count(&self) -> usize {
        self.contexts.len()
    }

    /// The value of a singleton, once initialized.
    pub fn singleton(&self, class: ClassId) -> Option<&Value> {
        match self.singletons.get(&class) {
            Some(SingletonState::Initialized(value)) => Some(value),
            _ => None,
        }
    }

    /// Calls `method` on the main context and runs until it completes.
    pub fn call(
        &mut self,
        method: MethodId,
        this: Value,
        args: Vec<Value>,
    ) -> Result<Outcome, VmError> {
        let mut fiber = self.spawn_fiber(FiberOrigin::Entry);
        let id = fiber.id;
        let callee = self.callee_of(method)?;
        let step = self.begin_call(
            ContextId::MAIN,
            &mut fiber,
            callee,
            this,
            args,
            Continuation::returning(Vec::new()),
        )?;
        self.launch(ContextId::MAIN, fiber, step)?;
        self.run_until(id)
    }

    /// Calls `name` on `target` by name and arity, the way `Invoke` does. Services owned by
    /// another context are reached by message.
    pub fn invoke(&mut self, target: Value, name: &str, args: Vec<Value>) -> Result<Outcome, VmError> {
        let mut fiber = self.spawn_fiber(FiberOrigin::Entry);
        let id = fiber.id;
        let step = self.invoke_value(
            ContextId::MAIN,
            &mut fiber,
            target,
            name,
            args,
            Continuation::returning(Vec::new()),
        )?;
        self.launch(ContextId::MAIN, fiber, step)?;
        self.run_until(id)
    }

    /// Creates an instance of `class` the way `New` does.
    pub fn instantiate(&mut self, class: ClassId, args: Vec<Value>) -> Result<Outcome, VmError> {
        let mut fiber = self.spawn_fiber(FiberOrigin::Entry);
        let id = fiber.id;
        let step = self.new_instance(ContextId::MAIN, &mut fiber, class, args, None)?;
        self.launch(ContextId::MAIN, fiber, step)?;
        self.run_until(id)
    }

    fn spawn_fiber(&mut self, origin: FiberOrigin) -> Fiber {
        let id = FiberId(self.next_fiber);
        self.next_fiber += 1;
        if self.config.metrics {
            self.metrics.fibers_spawned += 1;
        }
        Fiber::new(id, origin)
    }

    pub(crate) fn spawn_context(&mut self, name: &str) -> ContextId {
        let id = ContextId(self.contexts.len() as u32);
        self.contexts.push(ServiceContext::new(id, name));
        debug!(context = id.0, name, "service context opened");
        id
    }

    fn context(&mut self, ctx: ContextId) -> Result<&mut ServiceContext, VmError> {
        self.contexts
            .get_mut(ctx.0 as usize)
            .ok_or_else(|| VmError::InvalidState {
                message: format!("unknown context {}", ctx.0),
            })
    }

    pub(crate) fn send(&mut self, to: ContextId, message: Message) -> Result<(), VmError> {
        if self.config.metrics {
            self.metrics.messages_sent += 1;
        }
        self.context(to)?.mailbox.push_back(message);
        Ok(())
    }

    /// Applies the first step of a new fiber, then parks, queues or finishes it.
    fn launch(&mut self, ctx: ContextId, mut fiber: Fiber, step: Step) -> Result<(), VmError> {
        if let Some(wait) = self.apply(&mut fiber, step)? {
            self.context(ctx)?.park(fiber, wait);
            return Ok(());
        }
        self.file(ctx, fiber)
    }

    /// Queues a fiber that has frames left; finishes one that has none.
    fn file(&mut self, ctx: ContextId, mut fiber: Fiber) -> Result<(), VmError> {
        if !fiber.frames.is_empty() {
            self.context(ctx)?.ready.push_back(fiber);
            return Ok(());
        }
        let outcome = match (fiber.outcome.take(), fiber.pending.take()) {
            (Some(outcome), _) => outcome,
            (None, Some(exception)) => Err(exception),
            (None, None) => Ok(Vec::new()),
        };
        self.finish(&fiber, outcome)
    }

    fn finish(&mut self, fiber: &Fiber, outcome: Result<Vec<Value>, Value>) -> Result<(), VmError> {
        trace!(fiber = fiber.id.0, ok = outcome.is_ok(), "fiber finished");
        match fiber.origin {
            FiberOrigin::Entry => {
                self.outcomes.insert(fiber.id, outcome.into());
            }
            FiberOrigin::Reply(address) => {
                self.send(
                    address.context,
                    Message::Response {
                        fiber: address.fiber,
                        outcome,
                    },
                )?;
            }
            FiberOrigin::Detached => {
                if let Err(exception) = &outcome {
                    warn!(fiber = fiber.id.0, exception = %exception, "detached fiber failed");
                }
            }
        }
        Ok(())
    }

    /// Runs every context until the entry fiber has an outcome.
    fn run_until(&mut self, entry: FiberId) -> Result<Outcome, VmError> {
        loop {
            if let Some(outcome) = self.outcomes.remove(&entry) {
                return Ok(outcome);
            }
            let mut progressed = false;
            for idx in 0..self.contexts.len() {
                let ctx = ContextId(idx as u32);
                while let Some(message) = self.contexts[idx].mailbox.pop_front() {
                    progressed = true;
                    self.handle(ctx, message)?;
                }
                if let Some(fiber) = self.contexts[idx].ready.pop_front() {
                    progressed = true;
                    self.run_slice(ctx, fiber)?;
                }
            }
            if !progressed {
                let parked = self.contexts.iter().map(|c| c.parked.len()).sum();
                return Err(VmError::Deadlock { parked });
            }
        }
    }

    /// Runs a fiber until it finishes, parks, or spends its fuel.
    fn run_slice(&mut self, ctx: ContextId, mut fiber: Fiber) -> Result<(), VmError> {
        if let Some(exception) = fiber.pending.take() {
            self.unwind(&mut fiber, exception)?;
        }
        let mut fuel = self.config.slice_fuel.max(1);
        while !fiber.frames.is_empty() {
            if fuel == 0 {
                trace!(fiber = fiber.id.0, context = ctx.0, "slice spent");
                self.context(ctx)?.ready.push_back(fiber);
                return Ok(());
            }
            fuel -= 1;
            let step = self.step(ctx, &mut fiber)?;
            if let Some(wait) = self.apply(&mut fiber, step)? {
                self.context(ctx)?.park(fiber, wait);
                return Ok(());
            }
        }
        self.file(ctx, fiber)
    }

    fn apply(&mut self, fiber: &mut Fiber, step: Step) -> Result<Option<Wait>, VmError> {
        match step {
            Step::Next => {}
            Step::Jump(target) => {
                if let Some(frame) = fiber.frames.last_mut() {
                    frame.jump(target);
                }
            }
            Step::Call(frame) => {
                if fiber.frames.len() >= self.config.max_call_depth {
                    let exception = Value::exception(core::ILLEGAL_STATE, "Call depth exceeded");
                    if let Continuation::Initialize { class, .. } = &frame.continuation {
                        self.singleton_ready(*class, Err(exception.clone()))?;
                    }
                    self.unwind(fiber, exception)?;
                } else {
                    trace!(method = frame.method.0, depth = fiber.frames.len(), "call");
                    fiber.frames.push(*frame);
                    if self.config.metrics {
                        self.metrics.record_frames(fiber.frames.len());
                    }
                }
            }
            Step::Return(values) => {
                let Some(frame) = fiber.frames.pop() else {
                    return Err(VmError::InvalidState {
                        message: "return without a frame".to_string(),
                    });
                };
                self.resume_with(fiber, frame.continuation, values)?;
            }
            Step::Exception(exception) => self.unwind(fiber, exception)?,
            Step::Block(wait) => return Ok(Some(wait)),
        }
        Ok(None)
    }

    /// Completes `continuation` with a callee's results.
    pub(crate) fn resume_with(
        &mut self,
        fiber: &mut Fiber,
        continuation: Continuation,
        values: Vec<Value>,
    ) -> Result<(), VmError> {
        let (values, dsts) = match continuation {
            Continuation::Deliver(Delivery { dsts, prefix: None }) => (values, dsts),
            Continuation::Deliver(Delivery {
                dsts,
                prefix: Some(prefix),
            }) => {
                let rendered = values.first().map(Value::to_string).unwrap_or_default();
                (vec![Value::string(format!("{prefix}{rendered}"))], dsts)
            }
            Continuation::Construct { object, dst } => (vec![object], dst.into_iter().collect()),
            Continuation::Initialize { class, object } => {
                self.singleton_ready(class, Ok(object))?;
                (Vec::new(), Vec::new())
            }
        };
        match fiber.frames.last_mut() {
            Some(caller) => caller.deliver(&dsts, values),
            None => fiber.outcome = Some(Ok(values)),
        }
        Ok(())
    }

    /// Unwinds to the innermost guard that catches `exception`; a fiber with no such guard
    /// finishes with the exception.
    pub(crate) fn unwind(&mut self, fiber: &mut Fiber, exception: Value) -> Result<(), VmError> {
        loop {
            let Some(frame) = fiber.frames.last_mut() else {
                fiber.outcome = Some(Err(exception));
                return Ok(());
            };
            while let Some(guard) = frame.guards.pop() {
                if self.catches(guard.catch_type, &exception) {
                    trace!(method = frame.method.0, handler = guard.handler, "exception caught");
                    frame.jump(guard.handler);
                    frame.set(guard.catch_reg, exception);
                    return Ok(());
                }
            }
            if let Some(frame) = fiber.frames.pop()
                && let Continuation::Initialize { class, .. } = frame.continuation
            {
                self.singleton_ready(class, Err(exception.clone()))?;
            }
        }
    }

    fn catches(&mut self, catch_type: TypeId, exception: &Value) -> bool {
        let actual = self.module.pool.class_type(exception.class());
        self.module
            .type_system()
            .calculate_relation(catch_type, actual)
            .is_assignable()
    }

    fn handle(&mut self, ctx: ContextId, message: Message) -> Result<(), VmError> {
        match message {
            Message::InitSingleton { class, reply_to } => self.init_requested(class, reply_to),
            Message::SingletonReady {
                class,
                fiber,
                outcome,
            } => {
                let Some((mut parked, _)) = self.context(ctx)?.unpark(fiber) else {
                    warn!(fiber = fiber.0, context = ctx.0, "no parked fiber for singleton reply");
                    return Ok(());
                };
                debug!(class = class.0, fiber = fiber.0, context = ctx.0, "singleton reply");
                if let Err(exception) = outcome {
                    parked.pending = Some(exception);
                }
                self.file(ctx, parked)
            }
            Message::Invoke {
                target,
                name,
                args,
                reply_to,
            } => {
                trace!(name = %name, context = ctx.0, "service invoke");
                let mut fiber = self.spawn_fiber(FiberOrigin::Reply(reply_to));
                let step = self.invoke_value(
                    ctx,
                    &mut fiber,
                    target,
                    &name,
                    args,
                    Continuation::returning(Vec::new()),
                )?;
                self.launch(ctx, fiber, step)
            }
            Message::PropertyGet {
                target,
                property,
                reply_to,
            } => {
                trace!(property = %property, context = ctx.0, "service property get");
                let mut fiber = self.spawn_fiber(FiberOrigin::Reply(reply_to));
                let step = self.get_property(
                    ctx,
                    &mut fiber,
                    target,
                    &property,
                    Continuation::returning(Vec::new()),
                )?;
                self.launch(ctx, fiber, step)
            }
            Message::Response { fiber, outcome } => {
                let Some((mut parked, wait)) = self.context(ctx)?.unpark(fiber) else {
                    warn!(fiber = fiber.0, context = ctx.0, "no parked fiber for response");
                    return Ok(());
                };
                match (wait, outcome) {
                    (Wait::Results(continuation), Ok(values)) => {
                        self.resume_with(&mut parked, continuation, values)?;
                    }
                    (_, Err(exception)) => parked.pending = Some(exception),
                    (Wait::Singleton(_), Ok(_)) => {}
                }
                self.file(ctx, parked)
            }
        }
    }

    /// The runtime value of a pool constant.
    pub(crate) fn constant_value(&self, id: ConstId) -> Result<Value, VmError> {
        let Some(constant) = self.module.pool.get(id) else {
            return Err(VmError::UnsupportedConstant(id.0));
        };
        Ok(match constant {
            Constant::Int(value) => Value::Int(*value),
            Constant::Bool(value) => Value::Bool(*value),
            Constant::Char(value) => Value::Char(*value),
            Constant::String(text) => Value::string(text.as_str()),
            Constant::Singleton(class) => match self.singletons.get(class) {
                Some(SingletonState::Initialized(value)) => value.clone(),
                _ => {
                    return Err(VmError::InvalidState {
                        message: format!(
                            "singleton `{}` used before initialization",
                            self.module.classes.class(*class).qualified_name()
                        ),
                    });
                }
            },
            Constant::Array { items, .. } => {
                let items = items
                    .iter()
                    .map(|item| self.constant_value(*item))
                    .collect::<Result<Vec<_>, _>>()?;
                Value::array(items)
            }
            _ => Value::Constant(id),
        })
    }

    /// A string constant, as used for member names.
    pub(crate) fn name_constant(&self, id: ConstId) -> Result<String, VmError> {
        match self.module.pool.get(id) {
            Some(Constant::String(text)) => Ok(text.clone()),
            _ => Err(VmError::UnsupportedConstant(id.0)),
        }
    }

    pub(crate) fn code(&self, method: MethodId) -> Option<Rc<AssembledCode>> {
        self.codes.get(method.0 as usize).cloned().flatten()
    }
}
