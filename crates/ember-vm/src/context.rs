//! Service contexts: each owns a queue of fibers and a mailbox.
//!
//! A context runs one fiber at a time. Fibers never block their context; a fiber that waits
//! on another context parks with a [`Wait`] and is requeued when the answer arrives.

use std::collections::VecDeque;

use ember_asm::ClassId;
use rustc_hash::FxHashMap;

use crate::frame::{Continuation, Frame};
use crate::value::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContextId(pub u32);

impl ContextId {
    /// The context singleton initialization funnels through.
    pub const MAIN: ContextId = ContextId(0);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FiberId(pub u64);

/// Where a reply goes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Address {
    pub context: ContextId,
    pub fiber: FiberId,
}

/// A request or reply between contexts.
#[derive(Clone, Debug)]
pub enum Message {
    /// Ask main to initialize a singleton.
    InitSingleton { class: ClassId, reply_to: Address },
    /// A singleton finished initializing, or failed with an exception.
    SingletonReady {
        class: ClassId,
        fiber: FiberId,
        outcome: Result<Value, Value>,
    },
    /// Call a method on a service owned by the receiving context.
    Invoke {
        target: Value,
        name: String,
        args: Vec<Value>,
        reply_to: Address,
    },
    /// Read a property of a service owned by the receiving context.
    PropertyGet {
        target: Value,
        property: String,
        reply_to: Address,
    },
    /// The answer to an `Invoke` or `PropertyGet`.
    Response {
        fiber: FiberId,
        outcome: Result<Vec<Value>, Value>,
    },
}

/// What a parked fiber waits for.
#[derive(Debug)]
pub(crate) enum Wait {
    /// A `Response`; its values complete the continuation.
    Results(Continuation),
    /// A `SingletonReady`; the top frame then re-checks its singletons.
    Singleton(ClassId),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum FiberOrigin {
    /// Started by the embedder; the outcome is kept for it.
    Entry,
    /// Serves a request; the outcome is sent back as a `Response`.
    Reply(Address),
    /// Runs for its side effects only.
    Detached,
}

/// A stack of frames plus what to do with its outcome.
#[derive(Debug)]
pub(crate) struct Fiber {
    pub id: FiberId,
    pub frames: Vec<Frame>,
    pub origin: FiberOrigin,
    /// An exception to raise in the top frame when the fiber next runs.
    pub pending: Option<Value>,
    /// Set once the bottom frame completes.
    pub outcome: Option<Result<Vec<Value>, Value>>,
}

impl Fiber {
    pub fn new(id: FiberId, origin: FiberOrigin) -> Self {
        Self {
            id,
            frames: Vec::new(),
            origin,
            pending: None,
            outcome: None,
        }
    }
}

#[derive(Debug)]
pub(crate) struct ServiceContext {
    pub id: ContextId,
    pub name: String,
    pub ready: VecDeque<Fiber>,
    pub parked: FxHashMap<FiberId, (Fiber, Wait)>,
    pub mailbox: VecDeque<Message>,
}

impl ServiceContext {
    pub fn new(id: ContextId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            ready: VecDeque::new(),
            parked: FxHashMap::default(),
            mailbox: VecDeque::new(),
        }
    }

    pub fn park(&mut self, fiber: Fiber, wait: Wait) {
        self.parked.insert(fiber.id, (fiber, wait));
    }

    pub fn unpark(&mut self, fiber: FiberId) -> Option<(Fiber, Wait)> {
        self.parked.remove(&fiber)
    }

    /// Whether the context has nothing to run and nothing to read.
    pub fn is_idle(&self) -> bool {
        self.ready.is_empty() && self.mailbox.is_empty()
    }
}
