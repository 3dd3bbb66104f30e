//! Singleton initialization.
//!
//! Only the main context initializes singletons. Other contexts send `InitSingleton` and park
//! until `SingletonReady` arrives. On main, the fiber that starts an initialization owns it;
//! the owner reaching the same singleton again is a cycle.

use ember_asm::{core, ClassId, ConstId};
use tracing::debug;

use super::{Callee, Runtime, Step};
use crate::context::{Address, ContextId, Fiber, FiberOrigin, Message, Wait};
use crate::error::VmError;
use crate::frame::{Continuation, Pending};
use crate::value::Value;

#[derive(Debug)]
pub(crate) enum SingletonState {
    Initializing {
        owner: Address,
        waiters: Vec<Address>,
    },
    Initialized(Value),
}

enum Seen {
    Ready,
    Missing,
    Cycle,
    Busy,
}

impl Runtime {
    fn seen(&self, class: ClassId, me: Address) -> Seen {
        match self.singletons.get(&class) {
            None => Seen::Missing,
            Some(SingletonState::Initialized(_)) => Seen::Ready,
            Some(SingletonState::Initializing { owner, .. }) if *owner == me => Seen::Cycle,
            Some(SingletonState::Initializing { .. }) => Seen::Busy,
        }
    }

    pub(crate) fn refers_to_singletons(&self, id: ConstId) -> bool {
        let mut classes = Vec::new();
        self.module.pool.collect_singletons(id, &mut classes);
        !classes.is_empty()
    }

    /// The value of `id`, or `None` while a singleton it names is not initialized.
    pub(crate) fn initialized_value(&self, id: ConstId) -> Result<Option<Value>, VmError> {
        let mut classes = Vec::new();
        self.module.pool.collect_singletons(id, &mut classes);
        if classes
            .iter()
            .any(|class| !matches!(self.singletons.get(class), Some(SingletonState::Initialized(_))))
        {
            return Ok(None);
        }
        self.constant_value(id).map(Some)
    }

    /// Runs before the first op of a frame: every singleton its code or its pending
    /// bindings refer to, directly or inside array constants, must be initialized. The
    /// pending bindings are filled in afterwards.
    pub(super) fn ensure_initialized(
        &mut self,
        ctx: ContextId,
        fiber: &mut Fiber,
    ) -> Result<Step, VmError> {
        let Some(frame) = fiber.frames.last() else {
            return Ok(Step::Next);
        };
        let code = frame.code.clone();
        let mut pending = Vec::new();
        for id in code
            .constants
            .iter()
            .copied()
            .chain(frame.pending.iter().map(Pending::constant))
        {
            self.module.pool.collect_singletons(id, &mut pending);
        }

        let me = Address {
            context: ctx,
            fiber: fiber.id,
        };
        for class in pending {
            match self.seen(class, me) {
                Seen::Ready => continue,
                Seen::Cycle => {
                    debug!(class = %self.module.classes.class(class).qualified_name(), "circular initialization");
                    return Ok(Step::Exception(Value::exception(
                        core::ILLEGAL_STATE,
                        "Circular initialization",
                    )));
                }
                Seen::Busy if ctx == ContextId::MAIN => {
                    if let Some(SingletonState::Initializing { waiters, .. }) =
                        self.singletons.get_mut(&class)
                    {
                        waiters.push(me);
                    }
                    return Ok(Step::Block(Wait::Singleton(class)));
                }
                Seen::Missing if ctx == ContextId::MAIN => {
                    match self.begin_singleton(ctx, fiber, class, Vec::new())? {
                        Step::Next => continue,
                        step => return Ok(step),
                    }
                }
                Seen::Busy | Seen::Missing => {
                    debug!(class = class.0, context = ctx.0, "singleton requested from main");
                    self.send(ContextId::MAIN, Message::InitSingleton { class, reply_to: me })?;
                    return Ok(Step::Block(Wait::Singleton(class)));
                }
            }
        }
        if let Some(frame) = fiber.frames.last_mut() {
            for binding in std::mem::take(&mut frame.pending) {
                let value = self.constant_value(binding.constant())?;
                match binding {
                    Pending::Register(reg, _) => frame.set(reg, value),
                    Pending::Field(name, _) => {
                        if let Some(object) = frame.this.as_object() {
                            object.borrow_mut().fields.insert(name, value);
                        }
                    }
                }
            }
            frame.initialized = true;
        }
        Ok(Step::Next)
    }

    /// Marks `class` initializing on behalf of `fiber` and starts its constructor.
    fn begin_singleton(
        &mut self,
        ctx: ContextId,
        fiber: &mut Fiber,
        class: ClassId,
        waiters: Vec<Address>,
    ) -> Result<Step, VmError> {
        debug!(class = %self.module.classes.class(class).qualified_name(), "initializing singleton");
        let owner = Address {
            context: ctx,
            fiber: fiber.id,
        };
        self.singletons
            .insert(class, SingletonState::Initializing { owner, waiters });

        let (value, pending) = self.create(class)?;
        let continuation = Continuation::Initialize {
            class,
            object: value.clone(),
        };
        let chain = self.chain(class, "construct", 0);
        let step = match chain.first() {
            Some(&method) => {
                let callee = Callee {
                    method,
                    chain,
                    pos: 0,
                };
                let step =
                    self.begin_call(ctx, fiber, callee, value.clone(), Vec::new(), continuation.clone())?;
                Some(step)
            }
            None => None,
        };
        let Some(step) = self.with_pending(step, value.clone(), pending, continuation) else {
            self.singleton_ready(class, Ok(value))?;
            return Ok(Step::Next);
        };
        if let Step::Exception(exception) = &step {
            self.singleton_ready(class, Err(exception.clone()))?;
        }
        Ok(step)
    }

    /// Records the end of an initialization and answers everyone waiting on it. A failed
    /// initialization leaves the singleton uninitialized.
    pub(crate) fn singleton_ready(
        &mut self,
        class: ClassId,
        outcome: Result<Value, Value>,
    ) -> Result<(), VmError> {
        let previous = self.singletons.remove(&class);
        match &outcome {
            Ok(value) => {
                self.singletons
                    .insert(class, SingletonState::Initialized(value.clone()));
                if self.config.metrics {
                    self.metrics.singletons_initialized += 1;
                }
                debug!(class = %self.module.classes.class(class).qualified_name(), "singleton initialized");
            }
            Err(exception) => {
                debug!(class = class.0, exception = %exception, "singleton initialization failed");
            }
        }
        if let Some(SingletonState::Initializing { waiters, .. }) = previous {
            for waiter in waiters {
                self.send(
                    waiter.context,
                    Message::SingletonReady {
                        class,
                        fiber: waiter.fiber,
                        outcome: outcome.clone(),
                    },
                )?;
            }
        }
        Ok(())
    }

    /// Main's side of `InitSingleton`.
    pub(super) fn init_requested(&mut self, class: ClassId, reply_to: Address) -> Result<(), VmError> {
        match self.singletons.get_mut(&class) {
            Some(SingletonState::Initialized(value)) => {
                let outcome = Ok(value.clone());
                self.send(
                    reply_to.context,
                    Message::SingletonReady {
                        class,
                        fiber: reply_to.fiber,
                        outcome,
                    },
                )
            }
            Some(SingletonState::Initializing { waiters, .. }) => {
                waiters.push(reply_to);
                Ok(())
            }
            None => {
                debug!(class = class.0, from = reply_to.context.0, "initializing singleton for context");
                let mut fiber = self.spawn_fiber(FiberOrigin::Detached);
                let step = self.begin_singleton(ContextId::MAIN, &mut fiber, class, vec![reply_to])?;
                self.launch(ContextId::MAIN, fiber, step)
            }
        }
    }
}
