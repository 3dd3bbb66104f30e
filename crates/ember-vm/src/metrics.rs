use ember_asm::Op;

/// Counters for the interpreter loop and the scheduler.
///
/// Collection is best-effort and meant for profiling; it is off unless
/// [`crate::RuntimeConfig::metrics`] is set.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VmMetrics {
    /// Total number of executed ops.
    pub executed_ops: u64,

    pub scope_ops: u64,
    pub move_ops: u64,
    pub arith_ops: u64,
    pub compare_ops: u64,
    pub jump_ops: u64,
    pub guard_ops: u64,
    pub throw_ops: u64,
    pub return_ops: u64,

    pub call_ops: u64,
    pub invoke_ops: u64,
    /// Calls answered by a native template instead of a bytecode frame.
    pub native_calls: u64,
    pub new_ops: u64,
    pub property_ops: u64,
    pub other_ops: u64,

    /// Maximum observed frame stack of any fiber.
    pub max_frames_len: u64,
    /// Fibers created, including the entry fiber.
    pub fibers_spawned: u64,
    /// Messages delivered between contexts.
    pub messages_sent: u64,
    /// Singletons whose initialization completed.
    pub singletons_initialized: u64,
}

impl VmMetrics {
    pub(crate) fn record(&mut self, op: &Op) {
        self.executed_ops = self.executed_ops.saturating_add(1);

        match op {
            Op::Enter | Op::Exit | Op::Var { .. } | Op::VarI { .. } => self.scope_ops += 1,
            Op::Move { .. } => self.move_ops += 1,

            Op::Add { .. }
            | Op::Sub { .. }
            | Op::Mul { .. }
            | Op::Div { .. }
            | Op::Mod { .. }
            | Op::Not { .. } => self.arith_ops += 1,
            Op::IsEq { .. } | Op::IsLt { .. } => self.compare_ops += 1,

            Op::Jump { .. } | Op::JumpTrue { .. } | Op::JumpFalse { .. } | Op::JumpInt { .. } => {
                self.jump_ops += 1
            }
            Op::GuardStart { .. } | Op::GuardEnd { .. } => self.guard_ops += 1,
            Op::Throw { .. } => self.throw_ops += 1,
            Op::Return0 | Op::Return1 { .. } | Op::ReturnN { .. } => self.return_ops += 1,

            Op::Call { .. } | Op::CallSuper { .. } => self.call_ops += 1,
            Op::Invoke { .. } => self.invoke_ops += 1,
            Op::New { .. } => self.new_ops += 1,
            Op::PGet { .. } | Op::PSet { .. } => self.property_ops += 1,

            _ => self.other_ops += 1,
        }
    }

    pub(crate) fn record_frames(&mut self, len: usize) {
        self.max_frames_len = self.max_frames_len.max(len as u64);
    }

    /// Adds all counters from `other` into `self`.
    pub fn add_from(&mut self, other: &Self) {
        self.executed_ops = self.executed_ops.saturating_add(other.executed_ops);

        self.scope_ops = self.scope_ops.saturating_add(other.scope_ops);
        self.move_ops = self.move_ops.saturating_add(other.move_ops);
        self.arith_ops = self.arith_ops.saturating_add(other.arith_ops);
        self.compare_ops = self.compare_ops.saturating_add(other.compare_ops);
        self.jump_ops = self.jump_ops.saturating_add(other.jump_ops);
        self.guard_ops = self.guard_ops.saturating_add(other.guard_ops);
        self.throw_ops = self.throw_ops.saturating_add(other.throw_ops);
        self.return_ops = self.return_ops.saturating_add(other.return_ops);

        self.call_ops = self.call_ops.saturating_add(other.call_ops);
        self.invoke_ops = self.invoke_ops.saturating_add(other.invoke_ops);
        self.native_calls = self.native_calls.saturating_add(other.native_calls);
        self.new_ops = self.new_ops.saturating_add(other.new_ops);
        self.property_ops = self.property_ops.saturating_add(other.property_ops);
        self.other_ops = self.other_ops.saturating_add(other.other_ops);

        self.max_frames_len = self.max_frames_len.max(other.max_frames_len);
        self.fibers_spawned = self.fibers_spawned.saturating_add(other.fibers_spawned);
        self.messages_sent = self.messages_sent.saturating_add(other.messages_sent);
        self.singletons_initialized = self
            .singletons_initialized
            .saturating_add(other.singletons_initialized);
    }
}
