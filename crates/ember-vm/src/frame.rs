use std::rc::Rc;

use ember_asm::{AssembledCode, ClassId, ConstId, MethodId, Reg, TypeId};

use crate::value::Value;

/// A handler installed by `GuardStart`.
#[derive(Clone, Debug)]
pub(crate) struct Guard {
    pub catch_type: TypeId,
    pub catch_reg: Reg,
    /// Absolute index of the handler op.
    pub handler: usize,
}

/// What happens with a callee's results once it completes.
#[derive(Clone, Debug)]
pub(crate) enum Continuation {
    /// Results land in the caller's registers.
    Deliver(Delivery),
    /// A constructor finished; the new instance is the result.
    Construct { object: Value, dst: Option<Reg> },
    /// A singleton's constructor finished; the waiting frame re-checks its singletons.
    Initialize { class: ClassId, object: Value },
}

impl Continuation {
    pub fn returning(dsts: Vec<Reg>) -> Self {
        Continuation::Deliver(Delivery { dsts, prefix: None })
    }
}

#[derive(Clone, Debug)]
pub(crate) struct Delivery {
    pub dsts: Vec<Reg>,
    /// When set, the first result is rendered and appended to this text.
    pub prefix: Option<Rc<str>>,
}

/// A constant whose value waits for the singletons it refers to.
#[derive(Clone, Debug)]
pub(crate) enum Pending {
    /// A parameter default.
    Register(Reg, ConstId),
    /// A property initial value of `this`.
    Field(String, ConstId),
}

impl Pending {
    pub fn constant(&self) -> ConstId {
        match self {
            Pending::Register(_, id) | Pending::Field(_, id) => *id,
        }
    }
}

/// One activation of a bytecode method.
#[derive(Debug)]
pub(crate) struct Frame {
    pub method: MethodId,
    pub code: Rc<AssembledCode>,
    pub pc: usize,
    regs: Vec<Value>,
    pub this: Value,
    /// Register high-water mark saved by each open `Enter`.
    scopes: Vec<u32>,
    top: u32,
    pub guards: Vec<Guard>,
    pub continuation: Continuation,
    /// The call chain this activation belongs to, for `CallSuper`.
    pub chain: Rc<[MethodId]>,
    pub chain_pos: usize,
    /// Set once every singleton the code refers to is initialized.
    pub initialized: bool,
    /// Filled in once `initialized` is set, before the first op runs.
    pub pending: Vec<Pending>,
}

impl Frame {
    pub fn new(
        method: MethodId,
        code: Rc<AssembledCode>,
        this: Value,
        args: Vec<Value>,
        chain: Rc<[MethodId]>,
        chain_pos: usize,
        continuation: Continuation,
    ) -> Self {
        let size = (code.max_vars as usize).max(args.len());
        let top = args.len() as u32;
        let mut regs = args;
        regs.resize(size, Value::Null);
        Self {
            method,
            code,
            pc: 0,
            regs,
            this,
            scopes: Vec::with_capacity(4),
            top,
            guards: Vec::new(),
            continuation,
            chain,
            chain_pos,
            initialized: false,
            pending: Vec::new(),
        }
    }

    /// A frame with no ops: it binds `pending` on `this`, then completes `continuation`.
    pub fn prelude(
        code: Rc<AssembledCode>,
        this: Value,
        pending: Vec<Pending>,
        continuation: Continuation,
    ) -> Self {
        let mut frame = Self::new(
            MethodId(u32::MAX),
            code,
            this,
            Vec::new(),
            Rc::from(Vec::new()),
            0,
            continuation,
        );
        frame.pending = pending;
        frame
    }

    pub fn get(&self, reg: Reg) -> Value {
        self.regs.get(reg.0 as usize).cloned().unwrap_or(Value::Null)
    }

    pub fn set(&mut self, reg: Reg, value: Value) {
        let idx = reg.0 as usize;
        if idx >= self.regs.len() {
            self.regs.resize(idx + 1, Value::Null);
        }
        self.regs[idx] = value;
    }

    /// Writes results into `dsts`; extra results are dropped, missing ones leave registers
    /// untouched.
    pub fn deliver(&mut self, dsts: &[Reg], values: Vec<Value>) {
        for (dst, value) in dsts.iter().zip(values) {
            self.set(*dst, value);
        }
    }

    pub fn declare(&mut self, reg: Reg) {
        self.top = self.top.max(reg.0 + 1);
        self.set(reg, Value::Null);
    }

    pub fn enter(&mut self) {
        self.scopes.push(self.top);
    }

    /// Closes the innermost scope and clears the registers it declared.
    pub fn exit(&mut self) {
        let Some(mark) = self.scopes.pop() else {
            return;
        };
        let end = (self.top as usize).min(self.regs.len());
        for reg in &mut self.regs[mark as usize..end] {
            *reg = Value::Null;
        }
        self.top = mark;
    }

    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    /// Continues at `target`, closing scopes the target is outside of.
    pub fn jump(&mut self, target: usize) {
        let depth = self.code.depths.get(target).copied().unwrap_or(0) as usize;
        while self.scopes.len() > depth {
            self.exit();
        }
        while self.scopes.len() < depth {
            self.enter();
        }
        self.pc = target;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn code(max_vars: u32, depths: Vec<u32>) -> Rc<AssembledCode> {
        Rc::new(AssembledCode {
            ops: Vec::new(),
            depths,
            max_vars,
            max_scopes: 1,
            param_count: 0,
            constants: Vec::new(),
            bytes: Vec::new(),
        })
    }

    fn frame(max_vars: u32, depths: Vec<u32>, args: Vec<Value>) -> Frame {
        Frame::new(
            MethodId(0),
            code(max_vars, depths),
            Value::Null,
            args,
            Rc::from(vec![MethodId(0)]),
            0,
            Continuation::returning(vec![]),
        )
    }

    #[test]
    fn arguments_occupy_the_first_registers() {
        let frame = frame(3, vec![], vec![Value::Int(7)]);
        assert_eq!(frame.get(Reg(0)), Value::Int(7));
        assert_eq!(frame.get(Reg(2)), Value::Null);
    }

    #[test]
    fn exit_clears_scope_registers() {
        let mut frame = frame(3, vec![], vec![Value::Int(1)]);
        frame.enter();
        frame.declare(Reg(1));
        frame.set(Reg(1), Value::Int(2));
        frame.exit();
        assert_eq!(frame.get(Reg(0)), Value::Int(1));
        assert_eq!(frame.get(Reg(1)), Value::Null);
        assert_eq!(frame.depth(), 0);
    }

    #[test]
    fn jumps_restore_the_target_depth() {
        let mut frame = frame(2, vec![0, 1, 1, 0], vec![]);
        frame.enter();
        frame.declare(Reg(0));
        frame.set(Reg(0), Value::Bool(true));
        frame.jump(3);
        assert_eq!(frame.depth(), 0);
        assert_eq!(frame.pc, 3);
        assert_eq!(frame.get(Reg(0)), Value::Null);
    }
}
